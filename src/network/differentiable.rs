use rand::RngCore;

use super::{ParamStore, WeightUsage};
use crate::{
    Result,
    device::Stream,
    matrix::{MatrixView, MatrixViewMut},
    optimization::Optimizer,
    precision::Element,
};

/// A trainable object with parameters, gradients and forward / backward passes.
///
/// Matrices are `width x batch`, one column per sample. Inputs must be column-major.
pub trait Differentiable<T: Element> {
    fn input_width(&self) -> usize;

    /// The amount of meaningful output rows.
    fn output_width(&self) -> usize;

    /// The width of the last layer, may exceed `output_width` when the architecture aligns it.
    fn padded_output_width(&self) -> usize;

    /// Returns the `(fan_out, fan_in)` of every weight matrix.
    fn layer_sizes(&self) -> Vec<(usize, usize)>;

    fn params(&self) -> &ParamStore<T>;

    fn params_mut(&mut self) -> &mut ParamStore<T>;

    fn n_params(&self) -> usize {
        self.params().n_params()
    }

    fn set_params(&mut self, params: &[f32]) -> Result<()> {
        self.params_mut().set_params(params)
    }

    /// Installs a dedicated set of weights for `WeightUsage::Inference`, `None` removes it.
    fn set_inference_params(&mut self, params: Option<&[f32]>) -> Result<()> {
        self.params_mut().set_inference_params(params)
    }

    fn gradients(&self) -> &[T] {
        self.params().gradients()
    }

    /// Redraws every weight matrix.
    ///
    /// # Arguments
    /// * `rng` - The random number generator.
    /// * `scale` - Multiplies the initialization range.
    fn initialize_params(&mut self, rng: &mut dyn RngCore, scale: f32) -> Result<()>;

    /// Evaluates the network with its full precision weights, without rounding any activation.
    ///
    /// # Arguments
    /// * `stream` - The stream the work is ordered on.
    /// * `input` - The `input_width x batch` input.
    /// * `output` - Receives the `output_width x batch` output.
    fn inference(
        &self,
        stream: Stream,
        input: MatrixView<'_, T>,
        output: &mut MatrixViewMut<'_, f32>,
    ) -> Result<()>;

    /// Evaluates the network in the storage precision.
    ///
    /// Unless `usage` is `WeightUsage::Inference` the activations are kept for the next
    /// `backward` call, replacing any previously kept ones.
    ///
    /// # Arguments
    /// * `stream` - The stream the work is ordered on.
    /// * `input` - The `input_width x batch` input.
    /// * `output` - Receives the `output_width x batch` output, if any.
    /// * `usage` - The intent of the pass.
    fn forward(
        &mut self,
        stream: Stream,
        input: MatrixView<'_, T>,
        output: Option<&mut MatrixViewMut<'_, T>>,
        usage: WeightUsage,
    ) -> Result<()>;

    /// Backpropagates the loss gradient through the activations the last `forward` kept,
    /// consuming them.
    ///
    /// # Arguments
    /// * `stream` - The stream the work is ordered on.
    /// * `input` - The input of the matching `forward` call.
    /// * `dl_doutput` - The `output_width x batch` loss gradient.
    /// * `dl_dinput` - Receives the `input_width x batch` input gradient, if any.
    /// * `usage` - The intent of the pass.
    /// * `compute_param_gradients` - Whether to overwrite the parameter gradients.
    fn backward(
        &mut self,
        stream: Stream,
        input: MatrixView<'_, T>,
        dl_doutput: MatrixView<'_, T>,
        dl_dinput: Option<&mut MatrixViewMut<'_, T>>,
        usage: WeightUsage,
        compute_param_gradients: bool,
    ) -> Result<()>;

    /// Takes an optimization step with the current gradients.
    fn update_params(&mut self, optimizer: &mut dyn Optimizer) -> Result<()> {
        self.params_mut().apply(optimizer)
    }
}
