use std::env;

use anyhow::Context;
use half::f16;
use log::info;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::{Value, json};

use tiny_network::{
    Differentiable, Matrix, MatrixLayout, MixedPrecisionInference, Network, Stream,
    config::NetworkConfig, create_network, free_workspace,
};

const DEFAULT_BATCH: usize = 128;
const PREVIEW: usize = 4;

fn default_config() -> Value {
    json!({
        "otype": "FullyFusedMLP",
        "n_input_dims": 3,
        "n_output_dims": 1,
        "n_neurons": 64,
        "n_hidden_layers": 2,
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let config = match args.next() {
        Some(path) => NetworkConfig::from_path(&path)
            .with_context(|| format!("loading {path}"))?
            .as_map()
            .clone()
            .into(),
        None => default_config(),
    };
    let batch = match args.next() {
        Some(batch) => batch
            .parse()
            .with_context(|| format!("invalid batch size `{batch}`"))?,
        None => DEFAULT_BATCH,
    };

    let net = create_network::<f16>(&config)?;
    info!(
        "created {} with {} parameters, layers {:?}",
        net.name(),
        net.n_params(),
        net.layer_sizes()
    );

    let stream = Stream::create();
    let mut rng = StdRng::seed_from_u64(0);

    let inputs = [
        ("zeros", Matrix::zeros(net.input_width(), batch, MatrixLayout::ColumnMajor)),
        (
            "random",
            Matrix::from_fn(net.input_width(), batch, MatrixLayout::ColumnMajor, |_, _| {
                f16::from_f32(rng.random_range(-1.0..1.0))
            }),
        ),
    ];

    for (label, input) in &inputs {
        let mut output = Matrix::zeros(net.output_width(), batch, MatrixLayout::ColumnMajor);
        net.inference_mixed_precision(stream, input.view(), &mut output.view_mut())?;

        let preview: Vec<f32> = output
            .as_slice()
            .iter()
            .take(PREVIEW)
            .map(|v| v.to_f32())
            .collect();
        println!(
            "{label}: {}x{} output, first values {preview:?}",
            output.rows(),
            output.cols()
        );
    }

    free_workspace(stream);
    Ok(())
}
