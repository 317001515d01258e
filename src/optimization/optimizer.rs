use log::warn;
use serde_json::Value;

use super::{Adam, GradientDescent};
use crate::{NetErr, Result, config::NetworkConfig};

/// Defines the strategy for updating a network's full precision parameters from its gradient.
pub trait Optimizer: Send {
    /// Updates `params` in place.
    ///
    /// A gradient holding a non-finite value (e.g. an overflowed half precision gradient) skips
    /// the step and leaves both the parameters and the optimizer state untouched.
    ///
    /// # Arguments
    /// * `grad` - The gradient, widened to `f32`.
    /// * `params` - The full precision parameters to update.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grad` and `params`.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;

    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, learning_rate: f32);

    /// Returns the amount of steps applied so far, skipped ones excluded.
    fn n_steps(&self) -> u64;

    /// Returns a configuration document that re-creates this optimizer with a fresh state.
    fn hyperparams(&self) -> Value;
}

/// Builds the optimizer described by `config`.
///
/// # Arguments
/// * `config` - A JSON object whose `otype` is `SGD` or `Adam`, case-insensitive.
///
/// # Returns
/// The optimizer or a configuration error naming the offending key.
pub fn create_optimizer(config: &Value) -> Result<Box<dyn Optimizer>> {
    let config = NetworkConfig::from_value(config)?;
    let otype = config.otype()?;

    match otype.to_ascii_lowercase().as_str() {
        "sgd" => Ok(Box::new(GradientDescent::from_config(&config)?)),
        "adam" => Ok(Box::new(Adam::from_config(&config)?)),
        _ => Err(NetErr::config("otype", format!("unknown optimizer `{otype}`"))),
    }
}

/// Returns whether the step with `grad` should be applied, logging the ones that aren't.
pub(super) fn usable_gradient(grad: &[f32], step: u64) -> bool {
    if grad.iter().all(|g| g.is_finite()) {
        return true;
    }

    warn!(step = step; "skipped an update with a non-finite gradient");
    false
}

pub(super) fn non_negative(config: &NetworkConfig, key: &str, default: f32) -> Result<f32> {
    let value = config.f32_or(key, default)?;
    if value < 0. {
        return Err(NetErr::config(key, format!("must not be negative, got {value}")));
    }

    Ok(value)
}
