use serde_json::{Value, json};

use super::{
    Optimizer,
    optimizer::{non_negative, usable_gradient},
};
use crate::{NetErr, Result, config::NetworkConfig};

/// Plain stochastic gradient descent with optional L2 regularization.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientDescent {
    learning_rate: f32,
    l2_reg: f32,
    n_steps: u64,
}

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    ///
    /// # Returns
    /// A new `GradientDescent` instance.
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            l2_reg: 0.,
            n_steps: 0,
        }
    }

    /// Adds `l2_reg * param` to the gradient of every parameter.
    pub fn with_l2_reg(mut self, l2_reg: f32) -> Self {
        self.l2_reg = l2_reg;
        self
    }

    /// Reads `learning_rate` (1e-3) and `l2_reg` (0).
    pub fn from_config(config: &NetworkConfig) -> Result<Self> {
        let learning_rate = non_negative(config, "learning_rate", 1e-3)?;
        let l2_reg = non_negative(config, "l2_reg", 0.)?;
        Ok(Self::new(learning_rate).with_l2_reg(l2_reg))
    }
}

impl Optimizer for GradientDescent {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        NetErr::check_dim("gradient", grad.len(), params.len())?;
        if !usable_gradient(grad, self.n_steps) {
            return Ok(());
        }

        let (lr, l2) = (self.learning_rate, self.l2_reg);
        params
            .iter_mut()
            .zip(grad)
            .for_each(|(p, g)| *p -= lr * (g + l2 * *p));

        self.n_steps += 1;
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    fn n_steps(&self) -> u64 {
        self.n_steps
    }

    fn hyperparams(&self) -> Value {
        json!({
            "otype": "SGD",
            "learning_rate": self.learning_rate,
            "l2_reg": self.l2_reg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_against_the_gradient() {
        let mut sgd = GradientDescent::new(0.5);
        let mut params = [1.0, -1.0];
        sgd.update_params(&[2.0, -4.0], &mut params).unwrap();
        assert_eq!(params, [0.0, 1.0]);
        assert_eq!(sgd.n_steps(), 1);
    }

    #[test]
    fn l2_pulls_towards_zero() {
        let mut sgd = GradientDescent::new(0.5).with_l2_reg(1.0);
        let mut params = [2.0];
        sgd.update_params(&[0.0], &mut params).unwrap();
        assert_eq!(params, [1.0]);
    }

    #[test]
    fn non_finite_gradient_skips_the_step() {
        let mut sgd = GradientDescent::new(0.5);
        let mut params = [1.0, -1.0];
        sgd.update_params(&[f32::INFINITY, 1.0], &mut params).unwrap();
        assert_eq!(params, [1.0, -1.0]);
        assert_eq!(sgd.n_steps(), 0);
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let mut sgd = GradientDescent::new(0.5);
        let mut params = [1.0, -1.0];
        assert!(sgd.update_params(&[2.0], &mut params).is_err());
    }
}
