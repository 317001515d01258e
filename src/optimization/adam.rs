use ndarray::{ArrayView1, ArrayViewMut1, Zip};
use serde_json::{Value, json};

use super::{
    Optimizer,
    optimizer::{non_negative, usable_gradient},
};
use crate::{NetErr, Result, config::NetworkConfig};

/// Adam with bias corrected moments and optional L2 regularization.
///
/// The moment buffers are sized by the first update and every later update must match it.
#[derive(Debug, Clone, PartialEq)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    l2_reg: f32,
    n_steps: u64,
    first_moment: Vec<f32>,
    second_moment: Vec<f32>,
}

impl Adam {
    /// Creates a new `Adam` optimizer with `beta1 = 0.9`, `beta2 = 0.999` and `epsilon = 1e-8`.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            l2_reg: 0.,
            n_steps: 0,
            first_moment: Vec::new(),
            second_moment: Vec::new(),
        }
    }

    pub fn with_betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_l2_reg(mut self, l2_reg: f32) -> Self {
        self.l2_reg = l2_reg;
        self
    }

    /// Reads `learning_rate` (1e-3), `beta1` (0.9), `beta2` (0.999), `epsilon` (1e-8) and
    /// `l2_reg` (0). Both betas must lie in `[0, 1)`.
    pub fn from_config(config: &NetworkConfig) -> Result<Self> {
        let defaults = Self::new(1e-3);
        let beta = |key: &str, default: f32| -> Result<f32> {
            let value = non_negative(config, key, default)?;
            if value >= 1. {
                return Err(NetErr::config(key, format!("must be below 1, got {value}")));
            }
            Ok(value)
        };

        Ok(Self::new(non_negative(config, "learning_rate", defaults.learning_rate)?)
            .with_betas(beta("beta1", defaults.beta1)?, beta("beta2", defaults.beta2)?)
            .with_epsilon(non_negative(config, "epsilon", defaults.epsilon)?)
            .with_l2_reg(non_negative(config, "l2_reg", defaults.l2_reg)?))
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        NetErr::check_dim("gradient", grad.len(), params.len())?;
        if self.n_steps == 0 {
            self.first_moment = vec![0.; params.len()];
            self.second_moment = vec![0.; params.len()];
        }
        NetErr::check_dim("adam moments", self.first_moment.len(), params.len())?;

        if !usable_gradient(grad, self.n_steps) {
            return Ok(());
        }

        self.n_steps += 1;
        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            l2_reg: l2,
            ..
        } = *self;

        let t = self.n_steps as f32;
        let step_size = lr * (1. - b2.powf(t)).sqrt() / (1. - b1.powf(t));

        Zip::from(ArrayViewMut1::from(params))
            .and(ArrayView1::from(grad))
            .and(ArrayViewMut1::from(&mut self.first_moment[..]))
            .and(ArrayViewMut1::from(&mut self.second_moment[..]))
            .for_each(|p, &g, m, v| {
                let g = g + l2 * *p;
                *m = b1 * *m + (1. - b1) * g;
                *v = b2 * *v + (1. - b2) * g * g;
                *p -= step_size * *m / (v.sqrt() + eps);
            });

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
            "otype": "Adam",
            "learning_rate": self.learning_rate,
            "beta1": self.beta1,
            "beta2": self.beta2,
            "epsilon": self.epsilon,
            "l2_reg": self.l2_reg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_has_learning_rate_length() {
        let mut adam = Adam::new(0.1);
        let mut params = [0.0, 0.0];
        adam.update_params(&[3.0, -0.5], &mut params).unwrap();

        assert!((params[0] + 0.1).abs() < 1e-4);
        assert!((params[1] - 0.1).abs() < 1e-4);
    }

    #[test]
    fn moments_keep_their_first_size() {
        let mut adam = Adam::new(0.1);
        adam.update_params(&[1.0; 3], &mut [0.0; 3]).unwrap();
        assert!(adam.update_params(&[1.0; 2], &mut [0.0; 2]).is_err());
    }

    #[test]
    fn non_finite_gradient_skips_the_step() {
        let mut adam = Adam::new(0.1);
        let mut params = [1.0, 1.0];
        adam.update_params(&[f32::NAN, 1.0], &mut params).unwrap();
        assert_eq!(params, [1.0, 1.0]);
        assert_eq!(adam.n_steps(), 0);

        adam.update_params(&[1.0, 1.0], &mut params).unwrap();
        assert!((params[0] - 0.9).abs() < 1e-4);
        assert_eq!(adam.n_steps(), 1);
    }
}
