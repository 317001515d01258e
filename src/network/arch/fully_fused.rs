use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde_json::{Map, Value, json};

use super::{Architecture, at_least};
use crate::{
    NetErr, Result,
    config::NetworkConfig,
    device::{Stream, WorkspacePool},
    network::{Activation, dense::DenseStack},
    precision::{self, Element},
};

/// The hidden widths a fused kernel supports.
const WIDTHS: [usize; 4] = [16, 32, 64, 128];

/// The amount of batch columns a single fused kernel evaluates.
const TILE: usize = 128;

/// A multilayer perceptron whose hidden layers all have the same small width.
///
/// Every batch tile runs through all the layers at once with its activations kept in
/// tile-local scratch, so inference never touches the stream's workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedMlp {
    pub n_neurons: usize,
    pub n_hidden_layers: usize,
    pub activation: Activation,
    pub output_activation: Activation,
}

impl Architecture for FusedMlp {
    const OTYPE: &'static str = "FullyFusedMLP";
    const OUTPUT_ALIGNMENT: usize = 16;

    fn from_config(config: &NetworkConfig) -> Result<Self> {
        let n_neurons = config.usize_or("n_neurons", 64)?;
        if !WIDTHS.contains(&n_neurons) {
            return Err(NetErr::config(
                "n_neurons",
                format!("must be one of {WIDTHS:?}, got {n_neurons}"),
            ));
        }

        Ok(Self {
            n_neurons,
            n_hidden_layers: at_least("n_hidden_layers", config.usize_or("n_hidden_layers", 2)?, 1)?,
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
        _pool: &WorkspacePool,
        _stream: Stream,
        weights: &[E],
        input: ArrayView2<'_, f32>,
        round: fn(f32) -> f32,
    ) -> Result<Array2<f32>> {
        let mut wide = vec![0.; weights.len()];
        precision::widen_into(weights, &mut wide);

        let tiles: Vec<_> = input.axis_chunks_iter(Axis(1), TILE).collect();
        let outputs = tiles
            .par_iter()
            .map(|x| -> Result<Array2<f32>> {
                let mut scratch = vec![0.; stack.scratch_len(x.ncols())];
                let y = stack.infer(&wide, x.view(), &mut scratch, round)?.to_owned();
                Ok(y)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut output = Array2::zeros((stack.output_width(), input.ncols()));
        for (mut dst, src) in output
            .axis_chunks_iter_mut(Axis(1), TILE)
            .zip(&outputs)
        {
            dst.assign(src);
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn config(value: Value) -> NetworkConfig {
        NetworkConfig::from_value(&value).unwrap()
    }

    #[test]
    fn defaults() {
        let arch = FusedMlp::from_config(&config(json!({}))).unwrap();
        assert_eq!(arch.n_neurons, 64);
        assert_eq!(arch.n_hidden_layers, 2);
        assert_eq!(arch.activation, Activation::ReLU);
        assert_eq!(arch.output_activation, Activation::None);
    }

    #[test]
    fn rejects_unsupported_widths() {
        let err = FusedMlp::from_config(&config(json!({ "n_neurons": 48 }))).unwrap_err();
        assert!(matches!(err, NetErr::Config { key, .. } if key == "n_neurons"));

        let err = FusedMlp::from_config(&config(json!({ "n_hidden_layers": 0 }))).unwrap_err();
        assert!(matches!(err, NetErr::Config { key, .. } if key == "n_hidden_layers"));
    }

    #[test]
    fn stack_layout() {
        let arch = FusedMlp::from_config(&config(json!({ "n_neurons": 16 }))).unwrap();
        let stack = arch.stack(3, 16).unwrap();
        assert_eq!(stack.layout().layer_sizes(), vec![(16, 3), (16, 16), (16, 16)]);
    }

    #[test]
    fn tiles_cover_the_whole_batch() {
        let arch = FusedMlp::from_config(&config(json!({ "n_neurons": 16 }))).unwrap();
        let stack = arch.stack(2, 16).unwrap();
        let weights: Vec<f32> = (0..stack.n_params()).map(|i| (i % 5) as f32 * 0.1).collect();
        let input = Array2::from_shape_fn((2, 300), |(r, c)| (r + c) as f32 * 0.01);

        let tiled = arch
            .infer(&stack, &WorkspacePool::new(), Stream::DEFAULT, &weights, input.view(), |v| v)
            .unwrap();

        let mut scratch = vec![0.; stack.scratch_len(300)];
        let whole = stack.infer(&weights, input.view(), &mut scratch, |v| v).unwrap();

        assert_eq!(tiled.dim(), (16, 300));
        for (a, b) in tiled.iter().zip(whole.iter()) {
            assert!((a - b).abs() <= 1e-4 * (1. + b.abs()));
        }
    }
}
