//! Concrete architectures.
//!
//! Every architecture is a `DenseStack` of bias-free layers. They differ in how the stack is laid
//! out and in how inference is scheduled: the fully fused MLP evaluates independent batch tiles
//! with tile-local scratch, the GEMM based ones evaluate the whole batch layer by layer with
//! scratch leased from the stream's workspace.
mod cutlass;
mod fully_fused;

use std::sync::Arc;

use log::debug;
use ndarray::{Array2, ArrayView2, s};
use rand::{RngCore, SeedableRng, rngs::StdRng};
use serde_json::{Map, Value, json};

use super::{
    Differentiable, ForwardCache, MixedPrecisionInference, Network, ParamStore, WeightUsage,
    contract::{check_input, check_output},
    dense::DenseStack,
};
use crate::{
    NetErr, Result,
    config::NetworkConfig,
    device::{Stream, WorkspacePool},
    matrix::{Matrix, MatrixLayout, MatrixView, MatrixViewMut},
    precision::{self, Element},
};

pub use cutlass::{GemmMlp, GemmResNet};
pub use fully_fused::FusedMlp;

pub const DEFAULT_SEED: u64 = 1337;

/// A multilayer perceptron evaluated in batch tiles by fused kernels.
pub type FullyFusedMlp<T> = DenseNetwork<T, FusedMlp>;

/// A multilayer perceptron evaluated one GEMM per layer.
pub type CutlassMlp<T> = DenseNetwork<T, GemmMlp>;

/// A residual perceptron evaluated one GEMM per layer.
pub type CutlassResNet<T> = DenseNetwork<T, GemmResNet>;

/// The layout and inference schedule of a dense architecture.
pub trait Architecture: Sized + Send + Sync + 'static {
    /// The tag the factory knows this architecture by.
    const OTYPE: &'static str;

    /// The output width is padded up to a multiple of this.
    const OUTPUT_ALIGNMENT: usize = 1;

    /// Reads and validates the architecture specific keys of `config`.
    fn from_config(config: &NetworkConfig) -> Result<Self>;

    /// Lays out the layers between the given widths.
    fn stack(&self, input_width: usize, padded_output_width: usize) -> Result<DenseStack>;

    /// Writes the architecture specific keys into a configuration document.
    fn write_hyperparams(&self, doc: &mut Map<String, Value>);

    /// Evaluates `stack` on `input` without keeping any activation.
    ///
    /// # Arguments
    /// * `stack` - The layers.
    /// * `pool` - The workspace the scratch memory may be leased from.
    /// * `stream` - The stream the work is ordered on.
    /// * `weights` - The weights of every layer.
    /// * `input` - The `input_width x batch` input.
    /// * `round` - Applied to every activation.
    ///
    /// # Returns
    /// The `padded_output_width x batch` output.
    fn infer<E: Element>(
        &self,
        stack: &DenseStack,
        pool: &WorkspacePool,
        stream: Stream,
        weights: &[E],
        input: ArrayView2<'_, f32>,
        round: fn(f32) -> f32,
    ) -> Result<Array2<f32>>;
}

/// A network made of a `DenseStack` laid out by the architecture `A`, storing `T` elements.
#[derive(Debug)]
pub struct DenseNetwork<T, A> {
    arch: A,
    stack: DenseStack,
    output_width: usize,
    seed: u64,
    params: ParamStore<T>,
    cache: Option<ForwardCache>,
    pool: Arc<WorkspacePool>,
}

impl<T: Element, A: Architecture> DenseNetwork<T, A> {
    /// Creates a new initialized `DenseNetwork`.
    ///
    /// The whole configuration is validated before anything is allocated.
    ///
    /// # Arguments
    /// * `config` - The configuration document.
    /// * `pool` - The workspace inference leases its scratch memory from.
    ///
    /// # Returns
    /// A new `DenseNetwork` or a configuration error naming the offending key.
    pub fn new(config: &NetworkConfig, pool: Arc<WorkspacePool>) -> Result<Self> {
        let input_width = at_least("n_input_dims", config.required_usize("n_input_dims")?, 1)?;
        let output_width = at_least("n_output_dims", config.required_usize("n_output_dims")?, 1)?;
        let seed = config.u64_or("seed", DEFAULT_SEED)?;
        let arch = A::from_config(config)?;

        let padded_output_width = output_width
            .checked_next_multiple_of(A::OUTPUT_ALIGNMENT)
            .ok_or_else(|| NetErr::config("n_output_dims", format!("{output_width} is too large")))?;
        let stack = arch.stack(input_width, padded_output_width)?;

        let mut net = Self {
            params: ParamStore::zeros(stack.n_params())?,
            arch,
            stack,
            output_width,
            seed,
            cache: None,
            pool,
        };
        net.initialize_params(&mut StdRng::seed_from_u64(seed), 1.)?;

        debug!(
            otype = A::OTYPE,
            precision = T::NAME,
            n_params = net.params.n_params(),
            seed = seed;
            "created network"
        );

        Ok(net)
    }

    /// Creates a boxed network, the signature the registry expects.
    pub fn create(
        config: &NetworkConfig,
        pool: &Arc<WorkspacePool>,
    ) -> Result<Box<dyn Network<T>>> {
        Ok(Box::new(Self::new(config, Arc::clone(pool))?))
    }

    /// Widens `weights(usage)` for the training paths.
    fn training_weights(&self, usage: WeightUsage) -> Vec<f32> {
        let weights = self.params.weights(usage);
        let mut wide = vec![0.; weights.len()];
        precision::widen_into(weights, &mut wide);
        wide
    }
}

fn at_least(key: &str, value: usize, min: usize) -> Result<usize> {
    if value < min {
        return Err(NetErr::config(key, format!("must be at least {min}, got {value}")));
    }

    Ok(value)
}

fn full_precision(value: f32) -> f32 {
    value
}

/// Copies `input` into a standard layout `f32` array.
fn widen<T: Element>(input: &MatrixView<'_, T>) -> Array2<f32> {
    let src = input.array();
    Array2::from_shape_fn((src.nrows(), src.ncols()), |(r, c)| src[[r, c]].to_f32())
}

/// Rounds the first `dst.rows()` rows of `src` into `dst`, in `dst`'s layout.
fn write_rows<U: Element>(src: ArrayView2<'_, f32>, dst: &mut MatrixViewMut<'_, U>) {
    let src = src.slice(s![..dst.rows(), ..]);
    dst.array_mut()
        .zip_mut_with(&src, |d, &v| *d = U::from_f32(v));
}

impl<T: Element, A: Architecture> Differentiable<T> for DenseNetwork<T, A> {
    fn input_width(&self) -> usize {
        self.stack.input_width()
    }

    fn output_width(&self) -> usize {
        self.output_width
    }

    fn padded_output_width(&self) -> usize {
        self.stack.output_width()
    }

    fn layer_sizes(&self) -> Vec<(usize, usize)> {
        self.stack.layout().layer_sizes()
    }

    fn params(&self) -> &ParamStore<T> {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamStore<T> {
        &mut self.params
    }

    fn initialize_params(&mut self, rng: &mut dyn RngCore, scale: f32) -> Result<()> {
        self.params
            .initialize_xavier(self.stack.layout(), rng, scale)
    }

    fn inference(
        &self,
        stream: Stream,
        input: MatrixView<'_, T>,
        output: &mut MatrixViewMut<'_, f32>,
    ) -> Result<()> {
        let batch = check_input(&input, self.input_width())?;
        check_output(output.rows(), output.cols(), self.output_width, batch)?;

        let y = self.arch.infer(
            &self.stack,
            &self.pool,
            stream,
            self.params.full_precision_weights(WeightUsage::Inference),
            widen(&input).view(),
            full_precision,
        )?;

        write_rows(y.view(), output);
        Ok(())
    }

    fn forward(
        &mut self,
        stream: Stream,
        input: MatrixView<'_, T>,
        output: Option<&mut MatrixViewMut<'_, T>>,
        usage: WeightUsage,
    ) -> Result<()> {
        let batch = check_input(&input, self.input_width())?;
        if let Some(out) = &output {
            check_output(out.rows(), out.cols(), self.output_width, batch)?;
        }

        if !usage.caches_activations() {
            let y = self.arch.infer(
                &self.stack,
                &self.pool,
                stream,
                self.params.weights(usage),
                widen(&input).view(),
                T::quantize,
            )?;

            if let Some(out) = output {
                write_rows(y.view(), out);
            }
            return Ok(());
        }

        let weights = self.training_weights(usage);
        let cache = self.stack.forward(&weights, widen(&input), T::quantize)?;

        if let (Some(out), Some(y)) = (output, cache.output()) {
            write_rows(y.view(), out);
        }

        self.cache = Some(cache);
        Ok(())
    }

    fn backward(
        &mut self,
        _stream: Stream,
        input: MatrixView<'_, T>,
        dl_doutput: MatrixView<'_, T>,
        dl_dinput: Option<&mut MatrixViewMut<'_, T>>,
        usage: WeightUsage,
        compute_param_gradients: bool,
    ) -> Result<()> {
        let cache = self.cache.as_ref().ok_or(NetErr::MissingForwardPass)?;

        let batch = check_input(&input, self.stack.input_width())?;
        NetErr::check_dim("input columns", batch, cache.batch())?;
        check_output(dl_doutput.rows(), dl_doutput.cols(), self.output_width, batch)?;
        if let Some(dx) = &dl_dinput {
            NetErr::check_dim("input gradient rows", dx.rows(), self.stack.input_width())?;
            NetErr::check_dim("input gradient columns", dx.cols(), batch)?;
        }

        let dl = dl_doutput.array();
        let padded = Array2::from_shape_fn((self.stack.output_width(), batch), |(r, c)| {
            dl.get((r, c)).map_or(0., |v| v.to_f32())
        });

        let weights = self.training_weights(usage);
        let mut grads = compute_param_gradients.then(|| vec![0.; self.params.n_params()]);

        let dx = self.stack.backward(
            &weights,
            cache,
            padded,
            grads.as_deref_mut(),
            dl_dinput.is_some(),
        )?;

        if let Some(grads) = grads {
            precision::narrow_into(&grads, self.params.gradients_mut());
        }

        if let (Some(out), Some(dx)) = (dl_dinput, dx) {
            write_rows(dx.view(), out);
        }

        self.cache = None;
        Ok(())
    }
}

impl<T: Element, A: Architecture> MixedPrecisionInference<T> for DenseNetwork<T, A> {
    fn inference_mixed_precision(
        &self,
        stream: Stream,
        input: MatrixView<'_, T>,
        output: &mut MatrixViewMut<'_, T>,
    ) -> Result<()> {
        let batch = check_input(&input, self.input_width())?;
        check_output(output.rows(), output.cols(), self.output_width, batch)?;

        let y = self.arch.infer(
            &self.stack,
            &self.pool,
            stream,
            self.params.weights(WeightUsage::Inference),
            widen(&input).view(),
            T::quantize,
        )?;

        write_rows(y.view(), output);
        Ok(())
    }
}

impl<T: Element, A: Architecture> Network<T> for DenseNetwork<T, A> {
    fn name(&self) -> &'static str {
        A::OTYPE
    }

    fn width(&self, layer: usize) -> Option<usize> {
        self.stack.layers().get(layer).map(|l| l.fan_out)
    }

    fn num_forward_activations(&self) -> usize {
        self.stack.layers().len()
    }

    fn forward_activations(&self, layer: usize) -> Option<Matrix<T>> {
        let act = self.cache.as_ref()?.activations(layer)?;

        Some(Matrix::from_fn(
            act.nrows(),
            act.ncols(),
            MatrixLayout::ColumnMajor,
            |r, c| T::from_f32(act[[r, c]]),
        ))
    }

    fn hyperparams(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("otype".into(), json!(A::OTYPE));
        doc.insert("n_input_dims".into(), json!(self.stack.input_width()));
        doc.insert("n_output_dims".into(), json!(self.output_width));
        doc.insert("seed".into(), json!(self.seed));
        self.arch.write_hyperparams(&mut doc);

        Value::Object(doc)
    }
}
