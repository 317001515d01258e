use ndarray::{Array2, ArrayView2};
use serde_json::{Map, Value, json};

use super::{Architecture, at_least};
use crate::{
    NetErr, Result,
    config::NetworkConfig,
    device::{Stream, WorkspacePool},
    network::{Activation, dense::DenseStack},
    precision::{self, Element},
};

/// A multilayer perceptron of arbitrary width evaluated one GEMM per layer.
///
/// With no hidden layers it is a single linear map followed by the output activation.
#[derive(Debug, Clone, PartialEq)]
pub struct GemmMlp {
    pub n_neurons: usize,
    pub n_hidden_layers: usize,
    pub activation: Activation,
    pub output_activation: Activation,
}

/// A residual perceptron evaluated one GEMM per layer.
///
/// An input layer maps to `n_neurons`, followed by `n_blocks` residual blocks of
/// `n_matrices_per_block` square layers each, followed by the output layer.
#[derive(Debug, Clone, PartialEq)]
pub struct GemmResNet {
    pub n_neurons: usize,
    pub n_blocks: usize,
    pub n_matrices_per_block: usize,
    pub activation: Activation,
    pub output_activation: Activation,
}

/// Evaluates `stack` with the weights and activations in the stream's workspace.
///
/// The lease holds the upcast weights followed by the activation scratch, and is returned to
/// the pool before this function does.
fn pooled_inference<E: Element>(
    stack: &DenseStack,
    pool: &WorkspacePool,
    stream: Stream,
    weights: &[E],
    input: ArrayView2<'_, f32>,
    round: fn(f32) -> f32,
) -> Result<Array2<f32>> {
    let mut lease = pool.acquire(stream, weights.len() + stack.scratch_len(input.ncols()))?;
    let (wide, scratch) = lease.split_at_mut(weights.len());

    precision::widen_into(weights, wide);
    scratch.fill(0.);

    let y = stack.infer(wide, input, scratch, round)?;
    Ok(y.to_owned())
}

impl Architecture for GemmMlp {
    const OTYPE: &'static str = "CutlassMLP";

    fn from_config(config: &NetworkConfig) -> Result<Self> {
        Ok(Self {
            n_neurons: at_least("n_neurons", config.usize_or("n_neurons", 64)?, 1)?,
            n_hidden_layers: config.usize_or("n_hidden_layers", 2)?,
            activation: config.activation_or("activation", Activation::ReLU)?,
            output_activation: config.activation_or("output_activation", Activation::None)?,
        })
    }

    fn stack(&self, input_width: usize, padded_output_width: usize) -> Result<DenseStack> {
        let mut layers = vec![(self.n_neurons, self.activation); self.n_hidden_layers];
        layers.push((padded_output_width, self.output_activation));
        DenseStack::new(input_width, &layers, vec![])
    }

    fn write_hyperparams(&self, doc: &mut Map<String, Value>) {
        doc.insert("n_neurons".into(), json!(self.n_neurons));
        doc.insert("n_hidden_layers".into(), json!(self.n_hidden_layers));
        doc.insert("activation".into(), json!(self.activation.name()));
        doc.insert("output_activation".into(), json!(self.output_activation.name()));
    }

    fn infer<E: Element>(
        &self,
        stack: &DenseStack,
        pool: &WorkspacePool,
        stream: Stream,
        weights: &[E],
        input: ArrayView2<'_, f32>,
        round: fn(f32) -> f32,
    ) -> Result<Array2<f32>> {
        pooled_inference(stack, pool, stream, weights, input, round)
    }
}

impl Architecture for GemmResNet {
    const OTYPE: &'static str = "CutlassResNet";

    fn from_config(config: &NetworkConfig) -> Result<Self> {
        Ok(Self {
            n_neurons: at_least("n_neurons", config.usize_or("n_neurons", 64)?, 1)?,
            n_blocks: at_least("n_blocks", config.usize_or("n_blocks", 1)?, 1)?,
            n_matrices_per_block: at_least(
                "n_matrices_per_block",
                config.usize_or("n_matrices_per_block", 2)?,
                1,
            )?,
            activation: config.activation_or("activation", Activation::ReLU)?,
            output_activation: config.activation_or("output_activation", Activation::None)?,
        })
    }

    fn stack(&self, input_width: usize, padded_output_width: usize) -> Result<DenseStack> {
        let per_block = self.n_matrices_per_block;
        let n_layers = self
            .n_blocks
            .checked_mul(per_block)
            .and_then(|n| n.checked_add(2))
            .ok_or_else(|| NetErr::config("n_blocks", "too many layers"))?;

        // Input layer, the blocks, then the output layer.
        let mut layers = Vec::new();
        layers
            .try_reserve_exact(n_layers)
            .map_err(|e| NetErr::config("n_blocks", e.to_string()))?;
        layers.resize(n_layers - 1, (self.n_neurons, self.activation));
        layers.push((padded_output_width, self.output_activation));

        let blocks = (0..self.n_blocks)
            .map(|b| 1 + b * per_block..1 + (b + 1) * per_block)
            .collect();

        DenseStack::new(input_width, &layers, blocks)
    }

    fn write_hyperparams(&self, doc: &mut Map<String, Value>) {
        doc.insert("n_neurons".into(), json!(self.n_neurons));
        doc.insert("n_blocks".into(), json!(self.n_blocks));
        doc.insert("n_matrices_per_block".into(), json!(self.n_matrices_per_block));
        doc.insert("activation".into(), json!(self.activation.name()));
        doc.insert("output_activation".into(), json!(self.output_activation.name()));
    }

    fn infer<E: Element>(
        &self,
        stack: &DenseStack,
        pool: &WorkspacePool,
        stream: Stream,
        weights: &[E],
        input: ArrayView2<'_, f32>,
        round: fn(f32) -> f32,
    ) -> Result<Array2<f32>> {
        pooled_inference(stack, pool, stream, weights, input, round)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{NetErr, error::AcceleratorErr};

    fn config(value: Value) -> NetworkConfig {
        NetworkConfig::from_value(&value).unwrap()
    }

    #[test]
    fn mlp_without_hidden_layers_is_linear() {
        let arch = GemmMlp::from_config(&config(json!({ "n_hidden_layers": 0 }))).unwrap();
        let stack = arch.stack(5, 2).unwrap();
        assert_eq!(stack.layout().layer_sizes(), vec![(2, 5)]);
    }

    #[test]
    fn resnet_layout() {
        let arch = GemmResNet::from_config(&config(json!({
            "n_neurons": 8,
            "n_blocks": 2,
            "n_matrices_per_block": 3,
        })))
        .unwrap();

        let stack = arch.stack(4, 1).unwrap();
        let sizes = stack.layout().layer_sizes();
        assert_eq!(sizes.len(), 1 + 6 + 1);
        assert_eq!(sizes[0], (8, 4));
        assert!(sizes[1..7].iter().all(|&s| s == (8, 8)));
        assert_eq!(sizes[7], (1, 8));
    }

    #[test]
    fn resnet_rejects_empty_blocks() {
        let err = GemmResNet::from_config(&config(json!({ "n_matrices_per_block": 0 }))).unwrap_err();
        assert!(matches!(err, NetErr::Config { key, .. } if key == "n_matrices_per_block"));
    }

    #[test]
    fn inference_leases_the_stream_workspace() {
        let arch = GemmMlp::from_config(&config(json!({ "n_neurons": 4 }))).unwrap();
        let stack = arch.stack(2, 1).unwrap();
        let weights = vec![0.5_f32; stack.n_params()];
        let input = Array2::<f32>::ones((2, 3));
        let pool = WorkspacePool::new();
        let stream = Stream::create();

        let y = arch
            .infer(&stack, &pool, stream, &weights, input.view(), |v| v)
            .unwrap();
        assert_eq!(y.dim(), (1, 3));

        let expected = (stack.n_params() + stack.scratch_len(3)) * size_of::<f32>();
        assert_eq!(pool.stream_bytes(stream), expected);
        assert_eq!(pool.release(stream), expected);
    }

    #[test]
    fn inference_reports_out_of_memory() {
        let arch = GemmMlp::from_config(&config(json!({ "n_neurons": 4 }))).unwrap();
        let stack = arch.stack(2, 1).unwrap();
        let weights = vec![0.5_f32; stack.n_params()];
        let input = Array2::<f32>::ones((2, 3));
        let pool = WorkspacePool::with_capacity(16);

        let err = arch
            .infer(&stack, &pool, Stream::create(), &weights, input.view(), |v| v)
            .unwrap_err();
        assert!(matches!(
            err,
            NetErr::Accelerator(AcceleratorErr::OutOfMemory { .. })
        ));
    }
}
