use std::ops::Range;

use ndarray::{Array2, ArrayView2, ArrayViewMut2, Zip, linalg::general_mat_mul};

use super::{Activation, ParameterLayout};
use crate::{NetErr, Result};

/// A single bias-free weight matrix followed by an element-wise activation.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseLayer {
    pub fan_in: usize,
    pub fan_out: usize,
    pub params: Range<usize>,
    pub activation: Activation,
}

/// A chain of dense layers, optionally grouped into residual blocks.
///
/// Activations are `width x batch`, one column per sample. The output of a residual block is the
/// output of its last layer plus the block's input, so every block must preserve the width.
#[derive(Debug, Clone)]
pub struct DenseStack {
    input_width: usize,
    layers: Vec<DenseLayer>,
    blocks: Vec<Range<usize>>,
    layout: ParameterLayout,
}

/// The activations a training forward pass keeps for the backward pass.
#[derive(Debug, Clone)]
pub struct ForwardCache {
    input: Array2<f32>,
    pre: Vec<Array2<f32>>,
    post: Vec<Array2<f32>>,
}

impl ForwardCache {
    #[inline]
    pub fn batch(&self) -> usize {
        self.input.ncols()
    }

    /// Returns the output of `layer`, after its activation and residual connection.
    pub fn activations(&self, layer: usize) -> Option<&Array2<f32>> {
        self.post.get(layer)
    }

    pub fn output(&self) -> Option<&Array2<f32>> {
        self.post.last()
    }
}

impl DenseStack {
    /// Creates a new `DenseStack`.
    ///
    /// # Arguments
    /// * `input_width` - The width of the input activations.
    /// * `layers` - The `(fan_out, activation)` of every layer, in evaluation order.
    /// * `blocks` - The layer index ranges wrapped by a residual connection.
    ///
    /// # Returns
    /// A new `DenseStack` or a configuration error if the parameter count overflows.
    pub fn new(
        input_width: usize,
        layers: &[(usize, Activation)],
        blocks: Vec<Range<usize>>,
    ) -> Result<Self> {
        let mut fan_in = input_width;
        let layout = ParameterLayout::new(layers.iter().map(|&(fan_out, _)| {
            let size = (fan_out, fan_in);
            fan_in = fan_out;
            size
        }))?;

        let layers = layout
            .matrices()
            .iter()
            .zip(layers)
            .map(|(m, &(_, activation))| DenseLayer {
                fan_in: m.fan_in,
                fan_out: m.fan_out,
                params: m.range.clone(),
                activation,
            })
            .collect();

        Ok(Self {
            input_width,
            layers,
            blocks,
            layout,
        })
    }

    #[inline]
    pub fn input_width(&self) -> usize {
        self.input_width
    }

    pub fn output_width(&self) -> usize {
        self.layers
            .last()
            .map(|l| l.fan_out)
            .unwrap_or(self.input_width)
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    pub fn n_params(&self) -> usize {
        self.layout.n_params()
    }

    fn max_width(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.fan_out)
            .fold(self.input_width, usize::max)
    }

    /// The amount of scratch elements `infer` needs for `batch` samples.
    pub fn scratch_len(&self, batch: usize) -> usize {
        3 * self.max_width() * batch
    }

    fn block_starting_at(&self, layer: usize) -> bool {
        self.blocks.iter().any(|b| b.start == layer)
    }

    fn block_ending_at(&self, layer: usize) -> Option<&Range<usize>> {
        self.blocks.iter().find(|b| b.end == layer + 1)
    }

    /// Evaluates the stack without keeping any intermediate activation.
    ///
    /// # Arguments
    /// * `weights` - The full precision weights of every layer.
    /// * `input` - The `input_width x batch` input activations.
    /// * `scratch` - Exactly `scratch_len(batch)` elements of working memory.
    /// * `round` - Applied to every activation, it emulates the storage precision.
    ///
    /// # Returns
    /// The `output_width x batch` output, borrowed from `scratch`.
    pub fn infer<'s>(
        &self,
        weights: &[f32],
        input: ArrayView2<'_, f32>,
        scratch: &'s mut [f32],
        round: fn(f32) -> f32,
    ) -> Result<ArrayView2<'s, f32>> {
        let batch = input.ncols();
        NetErr::check_dim("scratch elements", scratch.len(), self.scratch_len(batch))?;
        NetErr::check_dim("input rows", input.nrows(), self.input_width)?;

        let stride = self.max_width() * batch;
        let (mut cur, rest) = scratch.split_at_mut(stride);
        let (mut next, skip) = rest.split_at_mut(stride);

        let mut rows = self.input_width;
        view_mut(cur, rows, batch)?.assign(&input);

        for (i, layer) in self.layers.iter().enumerate() {
            if self.block_starting_at(i) {
                let len = rows * batch;
                skip[..len].copy_from_slice(&cur[..len]);
            }

            let w = weight_view(weights, layer)?;
            let x = view(cur, rows, batch)?;
            let mut y = view_mut(next, layer.fan_out, batch)?;

            general_mat_mul(1., &w, &x, 0., &mut y);
            let act = layer.activation;
            y.mapv_inplace(|z| round(act.f(z)));

            if self.block_ending_at(i).is_some() {
                let s = view(skip, layer.fan_out, batch)?;
                y.zip_mut_with(&s, |a, &b| *a = round(*a + b));
            }

            std::mem::swap(&mut cur, &mut next);
            rows = layer.fan_out;
        }

        let out: &'s [f32] = cur;
        view(out, rows, batch)
    }

    /// Evaluates the stack keeping every activation for `backward`.
    ///
    /// # Arguments
    /// * `weights` - The full precision weights of every layer.
    /// * `input` - The `input_width x batch` input activations.
    /// * `round` - Applied to every activation, it emulates the storage precision.
    pub fn forward(
        &self,
        weights: &[f32],
        input: Array2<f32>,
        round: fn(f32) -> f32,
    ) -> Result<ForwardCache> {
        NetErr::check_dim("input rows", input.nrows(), self.input_width)?;

        let mut pre = Vec::with_capacity(self.layers.len());
        let mut post: Vec<Array2<f32>> = Vec::with_capacity(self.layers.len());

        for (i, layer) in self.layers.iter().enumerate() {
            let w = weight_view(weights, layer)?;
            let x = post.last().map_or(input.view(), |p| p.view());

            let z = w.dot(&x);
            let act = layer.activation;
            let mut y = z.mapv(|v| round(act.f(v)));

            if let Some(block) = self.block_ending_at(i) {
                let skip = block
                    .start
                    .checked_sub(1)
                    .and_then(|j| post.get(j))
                    .map_or(input.view(), |p| p.view());
                y.zip_mut_with(&skip, |a, &b| *a = round(*a + b));
            }

            pre.push(z);
            post.push(y);
        }

        Ok(ForwardCache { input, pre, post })
    }

    /// Backpropagates `dl_doutput` through the activations of a previous `forward`.
    ///
    /// # Arguments
    /// * `weights` - The weights the forward pass used.
    /// * `cache` - The activations of the forward pass.
    /// * `dl_doutput` - The `output_width x batch` loss gradient.
    /// * `param_grads` - Receives the weight gradients, laid out like `weights`.
    /// * `want_input_grad` - Whether to compute the loss gradient with respect to the input.
    ///
    /// # Returns
    /// The `input_width x batch` input gradient if requested.
    pub fn backward(
        &self,
        weights: &[f32],
        cache: &ForwardCache,
        dl_doutput: Array2<f32>,
        mut param_grads: Option<&mut [f32]>,
        want_input_grad: bool,
    ) -> Result<Option<Array2<f32>>> {
        NetErr::check_dim("output gradient rows", dl_doutput.nrows(), self.output_width())?;
        NetErr::check_dim("output gradient batch", dl_doutput.ncols(), cache.batch())?;

        let mut delta = dl_doutput;
        let mut skip: Option<(usize, Array2<f32>)> = None;

        for (i, layer) in self.layers.iter().enumerate().rev() {
            if let Some(block) = self.block_ending_at(i) {
                skip = Some((block.start, delta.clone()));
            }

            let z = cache.pre.get(i).ok_or(NetErr::MissingForwardPass)?;
            let act = layer.activation;
            Zip::from(&mut delta)
                .and(z)
                .for_each(|d, &z| *d *= act.df(z));

            if let Some(grads) = param_grads.as_deref_mut() {
                let x = i
                    .checked_sub(1)
                    .and_then(|j| cache.post.get(j))
                    .map_or(cache.input.view(), |p| p.view());

                let len = grads.len();
                let g = grads
                    .get_mut(layer.params.clone())
                    .ok_or_else(|| too_short(len, layer.params.end))?;
                let mut g = ArrayViewMut2::from_shape((layer.fan_out, layer.fan_in), g)
                    .map_err(|_| too_short(len, layer.params.end))?;

                general_mat_mul(1., &delta, &x.t(), 0., &mut g);
            }

            if i == 0 && !want_input_grad {
                return Ok(None);
            }

            let w = weight_view(weights, layer)?;
            delta = w.t().dot(&delta);

            if skip.as_ref().is_some_and(|(start, _)| *start == i) {
                if let Some((_, s)) = skip.take() {
                    delta += &s;
                }
            }
        }

        Ok(Some(delta))
    }
}

fn too_short(got: usize, expected: usize) -> NetErr {
    NetErr::DimensionMismatch {
        what: "buffer elements",
        got,
        expected,
    }
}

fn view(buf: &[f32], rows: usize, cols: usize) -> Result<ArrayView2<'_, f32>> {
    let len = rows * cols;
    let data = buf.get(..len).ok_or_else(|| too_short(buf.len(), len))?;
    ArrayView2::from_shape((rows, cols), data).map_err(|_| too_short(buf.len(), len))
}

fn view_mut(buf: &mut [f32], rows: usize, cols: usize) -> Result<ArrayViewMut2<'_, f32>> {
    let len = rows * cols;
    let got = buf.len();
    let data = buf.get_mut(..len).ok_or_else(|| too_short(got, len))?;
    ArrayViewMut2::from_shape((rows, cols), data).map_err(|_| too_short(got, len))
}

fn weight_view<'w>(weights: &'w [f32], layer: &DenseLayer) -> Result<ArrayView2<'w, f32>> {
    let data = weights
        .get(layer.params.clone())
        .ok_or_else(|| too_short(weights.len(), layer.params.end))?;

    ArrayView2::from_shape((layer.fan_out, layer.fan_in), data)
        .map_err(|_| too_short(weights.len(), layer.params.end))
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn identity(v: f32) -> f32 {
        v
    }

    #[test]
    fn infer_and_forward_agree() {
        let stack = DenseStack::new(
            2,
            &[(3, Activation::ReLU), (3, Activation::Tanh), (1, Activation::None)],
            vec![1..2],
        )
        .unwrap();
        let weights: Vec<f32> = (0..stack.n_params())
            .map(|i| ((i * 7 % 11) as f32 - 5.) / 10.)
            .collect();
        let input = array![[0.5, -1.0, 2.0], [1.5, 0.25, -0.75]];

        let mut scratch = vec![0.; stack.scratch_len(3)];
        let inferred = stack
            .infer(&weights, input.view(), &mut scratch, identity)
            .unwrap()
            .to_owned();

        let cache = stack.forward(&weights, input, identity).unwrap();
        let out = cache.output().unwrap();
        assert_eq!(out.dim(), (1, 3));
        for (a, b) in inferred.iter().zip(out) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn residual_block_adds_its_input() {
        let stack = DenseStack::new(1, &[(1, Activation::None)], vec![0..1]).unwrap();
        let cache = stack.forward(&[2.], array![[3.]], identity).unwrap();
        assert_eq!(cache.output().unwrap()[[0, 0]], 9.);

        let mut grads = [0.];
        let dx = stack
            .backward(&[2.], &cache, array![[1.]], Some(&mut grads[..]), true)
            .unwrap()
            .unwrap();
        assert_eq!(grads[0], 3.);
        assert_eq!(dx[[0, 0]], 3.);
    }

    #[test]
    fn single_layer_gradient() {
        let stack = DenseStack::new(2, &[(1, Activation::None)], vec![]).unwrap();
        let weights = [1., -2.];
        let cache = stack.forward(&weights, array![[1.], [3.]], identity).unwrap();

        let mut grads = [0.; 2];
        let dx = stack
            .backward(&weights, &cache, array![[0.5]], Some(&mut grads[..]), true)
            .unwrap()
            .unwrap();
        assert_eq!(grads, [0.5, 1.5]);
        assert_eq!(dx, array![[0.5], [-1.0]]);
    }

    #[test]
    fn scratch_must_be_exact() {
        let stack = DenseStack::new(2, &[(4, Activation::ReLU)], vec![]).unwrap();
        let mut scratch = vec![0.; 3];
        let input = Array2::zeros((2, 5));
        assert!(stack.infer(&[0.; 8], input.view(), &mut scratch, identity).is_err());
    }
}
