use std::ops::Range;

use rand::RngCore;
use rand_distr::{Distribution, Uniform};

use super::WeightUsage;
use crate::{
    NetErr, Result,
    optimization::Optimizer,
    precision::{self, Element},
};

/// One weight matrix inside the flat parameter buffer, stored row-major as `fan_out x fan_in`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixSlot {
    pub fan_out: usize,
    pub fan_in: usize,
    pub range: Range<usize>,
}

/// Maps a flat parameter buffer onto a network's weight matrices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterLayout {
    matrices: Vec<MatrixSlot>,
}

impl ParameterLayout {
    /// Creates a new `ParameterLayout` laying the matrices out back to back.
    ///
    /// # Arguments
    /// * `sizes` - The `(fan_out, fan_in)` of every matrix, in evaluation order.
    ///
    /// # Returns
    /// A new `ParameterLayout` or a configuration error if the parameter count overflows.
    pub fn new<I>(sizes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, usize)>,
    {
        let mut offset: usize = 0;
        let matrices = sizes
            .into_iter()
            .map(|(fan_out, fan_in)| {
                let start = offset;
                offset = fan_out
                    .checked_mul(fan_in)
                    .and_then(|size| offset.checked_add(size))
                    .ok_or_else(|| {
                        NetErr::config(
                            "n_neurons",
                            format!("a {fan_out}x{fan_in} matrix overflows the parameter count"),
                        )
                    })?;

                Ok(MatrixSlot {
                    fan_out,
                    fan_in,
                    range: start..offset,
                })
            })
            .collect::<Result<_>>()?;

        Ok(Self { matrices })
    }

    pub fn matrices(&self) -> &[MatrixSlot] {
        &self.matrices
    }

    pub fn n_params(&self) -> usize {
        self.matrices.last().map(|m| m.range.end).unwrap_or(0)
    }

    /// Returns the `(fan_out, fan_in)` of every matrix.
    pub fn layer_sizes(&self) -> Vec<(usize, usize)> {
        self.matrices.iter().map(|m| (m.fan_out, m.fan_in)).collect()
    }
}

/// The parameter and gradient storage of a network.
///
/// The optimizer only ever touches the `f32` master copy, the `T` copies are refreshed from it.
/// An inference copy may be installed separately (e.g. averaged weights), otherwise inference
/// reads the training weights.
#[derive(Debug, Clone)]
pub struct ParamStore<T> {
    full_precision: Vec<f32>,
    params: Vec<T>,
    inference_params: Option<(Vec<f32>, Vec<T>)>,
    gradients: Vec<T>,
}

impl<T: Element> ParamStore<T> {
    /// Creates a zeroed `ParamStore` for `n_params` parameters.
    ///
    /// # Returns
    /// The store or a configuration error if the buffers can't be allocated.
    pub fn zeros(n_params: usize) -> Result<Self> {
        Ok(Self {
            full_precision: zeroed(n_params)?,
            params: zeroed(n_params)?,
            inference_params: None,
            gradients: zeroed(n_params)?,
        })
    }

    #[inline]
    pub fn n_params(&self) -> usize {
        self.full_precision.len()
    }

    pub fn full_precision(&self) -> &[f32] {
        &self.full_precision
    }

    /// Returns the weights a pass with `usage` reads.
    pub fn weights(&self, usage: WeightUsage) -> &[T] {
        match (usage, &self.inference_params) {
            (WeightUsage::Inference, Some((_, params))) => params,
            _ => &self.params,
        }
    }

    /// Returns the full precision counterpart of `weights(usage)`.
    pub fn full_precision_weights(&self, usage: WeightUsage) -> &[f32] {
        match (usage, &self.inference_params) {
            (WeightUsage::Inference, Some((params, _))) => params,
            _ => &self.full_precision,
        }
    }

    pub fn gradients(&self) -> &[T] {
        &self.gradients
    }

    pub(crate) fn gradients_mut(&mut self) -> &mut [T] {
        &mut self.gradients
    }

    /// Overwrites the training parameters.
    ///
    /// # Arguments
    /// * `params` - The new full precision parameters.
    pub fn set_params(&mut self, params: &[f32]) -> Result<()> {
        NetErr::check_dim("parameters", params.len(), self.n_params())?;

        self.full_precision.copy_from_slice(params);
        precision::narrow_into(&self.full_precision, &mut self.params);
        Ok(())
    }

    /// Installs (or removes, with `None`) a dedicated set of inference weights.
    pub fn set_inference_params(&mut self, params: Option<&[f32]>) -> Result<()> {
        let Some(params) = params else {
            self.inference_params = None;
            return Ok(());
        };

        NetErr::check_dim("inference parameters", params.len(), self.n_params())?;
        let mut narrow = vec![T::default(); params.len()];
        precision::narrow_into(params, &mut narrow);
        self.inference_params = Some((params.to_vec(), narrow));
        Ok(())
    }

    /// Draws every weight matrix from a scaled Xavier uniform distribution.
    ///
    /// # Arguments
    /// * `layout` - The matrices to initialize.
    /// * `rng` - The random number generator.
    /// * `scale` - Multiplies the Xavier range.
    pub fn initialize_xavier(
        &mut self,
        layout: &ParameterLayout,
        rng: &mut dyn RngCore,
        scale: f32,
    ) -> Result<()> {
        NetErr::check_dim("parameters", layout.n_params(), self.n_params())?;

        for m in layout.matrices() {
            let range = scale * (6. / (m.fan_in + m.fan_out) as f32).sqrt();
            let dist = Uniform::new_inclusive(-range, range)
                .map_err(|e| NetErr::config("scale", format!("invalid initialization range: {e}")))?;

            for w in &mut self.full_precision[m.range.clone()] {
                *w = dist.sample(&mut *rng);
            }
        }

        precision::narrow_into(&self.full_precision, &mut self.params);
        Ok(())
    }

    /// Takes an optimization step using the current gradient.
    pub fn apply(&mut self, optimizer: &mut dyn Optimizer) -> Result<()> {
        let mut grad = vec![0.; self.n_params()];
        precision::widen_into(&self.gradients, &mut grad);

        optimizer.update_params(&grad, &mut self.full_precision)?;
        precision::narrow_into(&self.full_precision, &mut self.params);
        Ok(())
    }
}

fn zeroed<E: Element>(len: usize) -> Result<Vec<E>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|e| {
        NetErr::config("n_neurons", format!("can't allocate {len} parameters: {e}"))
    })?;
    buf.resize(len, E::default());
    Ok(buf)
}
