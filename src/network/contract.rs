use serde_json::Value;

use super::Differentiable;
use crate::{
    NetErr, Result,
    device::Stream,
    matrix::{Matrix, MatrixLayout, MatrixView, MatrixViewMut},
    precision::Element,
};

/// Reduced precision evaluation of a network.
pub trait MixedPrecisionInference<T: Element> {
    /// Evaluates the network with its inference weights, accumulating in `f32` and rounding every
    /// activation to `T`.
    ///
    /// `output` is fully overwritten in its own layout. No parameter, gradient or cached
    /// activation is touched, scratch memory may be taken from the workspace of `stream`.
    ///
    /// # Arguments
    /// * `stream` - The stream the work is ordered on.
    /// * `input` - The column-major `input_width x batch` input.
    /// * `output` - Receives the `output_width x batch` output.
    ///
    /// # Errors
    /// A layout mismatch if `input` is not column-major, a dimension mismatch if either matrix
    /// disagrees with the network's widths or with the other's batch size.
    fn inference_mixed_precision(
        &self,
        stream: Stream,
        input: MatrixView<'_, T>,
        output: &mut MatrixViewMut<'_, T>,
    ) -> Result<()>;
}

/// A differentiable network usable through dynamic dispatch.
pub trait Network<T: Element>: Differentiable<T> + MixedPrecisionInference<T> + Send {
    /// The architecture tag, as accepted by the factory.
    fn name(&self) -> &'static str;

    /// The width of the output of `layer`, `None` past the last layer.
    fn width(&self, layer: usize) -> Option<usize>;

    /// The amount of activations a training forward pass keeps.
    fn num_forward_activations(&self) -> usize;

    /// Copies the kept output of `layer`, `None` without a pending forward pass.
    fn forward_activations(&self, layer: usize) -> Option<Matrix<T>>;

    /// A configuration document that recreates this architecture.
    fn hyperparams(&self) -> Value;
}

/// Checks an input matrix against the network's input width.
///
/// # Returns
/// The batch size.
pub fn check_input<T: Element>(input: &MatrixView<'_, T>, width: usize) -> Result<usize> {
    if input.layout() != MatrixLayout::ColumnMajor {
        return Err(NetErr::LayoutMismatch {
            what: "input",
            got: input.layout(),
            expected: MatrixLayout::ColumnMajor,
        });
    }

    NetErr::check_dim("input rows", input.rows(), width)?;
    Ok(input.cols())
}

/// Checks a `rows x cols` output against the network's output width and the batch size.
pub fn check_output(rows: usize, cols: usize, width: usize, batch: usize) -> Result<()> {
    NetErr::check_dim("output rows", rows, width)?;
    NetErr::check_dim("output columns", cols, batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_must_be_column_major() {
        let data = [0.0_f32; 6];
        let input = MatrixView::new(&data, 3, 2, MatrixLayout::RowMajor).unwrap();
        assert!(matches!(
            check_input(&input, 3),
            Err(NetErr::LayoutMismatch { what: "input", .. })
        ));

        let input = MatrixView::new(&data, 3, 2, MatrixLayout::ColumnMajor).unwrap();
        assert_eq!(check_input(&input, 3).unwrap(), 2);
        assert!(check_input(&input, 2).is_err());
    }

    #[test]
    fn output_batch_must_match() {
        assert!(check_output(1, 10, 1, 10).is_ok());
        assert!(matches!(
            check_output(1, 5, 1, 10),
            Err(NetErr::DimensionMismatch {
                got: 5,
                expected: 10,
                ..
            })
        ));
    }
}
