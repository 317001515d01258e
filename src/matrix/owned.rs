use ndarray::Array2;

use super::{MatrixLayout, MatrixView, MatrixViewMut};
use crate::{NetErr, Result, precision::Element};

/// An owned, contiguous `rows x cols` matrix with an explicit layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    inner: Array2<T>,
    layout: MatrixLayout,
}

impl<T: Element> Matrix<T> {
    /// Creates a zero filled matrix.
    pub fn zeros(rows: usize, cols: usize, layout: MatrixLayout) -> Self {
        Self::filled(rows, cols, layout, T::default())
    }

    /// Creates a matrix with every element set to `value`.
    pub fn filled(rows: usize, cols: usize, layout: MatrixLayout, value: T) -> Self {
        Self {
            inner: Array2::from_elem(layout.shape(rows, cols), value),
            layout,
        }
    }

    /// Creates a matrix taking ownership of `data`, which must already follow `layout`.
    ///
    /// # Returns
    /// A new `Matrix` or a dimension mismatch if `data` has the wrong length.
    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize, layout: MatrixLayout) -> Result<Self> {
        let len = data.len();
        NetErr::check_dim("matrix elements", len, rows * cols)?;

        let inner = Array2::from_shape_vec(layout.shape(rows, cols), data).map_err(|_| {
            NetErr::DimensionMismatch {
                what: "matrix elements",
                got: len,
                expected: rows * cols,
            }
        })?;

        Ok(Self { inner, layout })
    }

    /// Creates a matrix by evaluating `f(row, col)` on every logical position.
    pub fn from_fn<F>(rows: usize, cols: usize, layout: MatrixLayout, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> T,
    {
        Self {
            inner: Array2::from_shape_fn(layout.shape(rows, cols), |(r, c)| f(r, c)),
            layout,
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.inner.nrows()
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.inner.ncols()
    }

    #[inline]
    pub fn layout(&self) -> MatrixLayout {
        self.layout
    }

    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        self.inner.get((row, col)).copied()
    }

    /// Returns the elements in memory order.
    pub fn as_slice(&self) -> &[T] {
        self.inner.as_slice_memory_order().unwrap_or_default()
    }

    /// Returns the raw bytes of the elements in memory order.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.as_slice())
    }

    pub fn view(&self) -> MatrixView<'_, T> {
        MatrixView::from_array(self.inner.view(), self.layout)
    }

    pub fn view_mut(&mut self) -> MatrixViewMut<'_, T> {
        MatrixViewMut::from_array(self.inner.view_mut(), self.layout)
    }

    /// Returns a copy of this matrix stored with `layout`.
    pub fn to_layout(&self, layout: MatrixLayout) -> Self {
        Self::from_fn(self.rows(), self.cols(), layout, |r, c| self.inner[[r, c]])
    }

    /// Returns a copy of this matrix converted element-wise to `U`.
    pub fn cast<U: Element>(&self) -> Matrix<U> {
        Matrix::from_fn(self.rows(), self.cols(), self.layout, |r, c| {
            U::from_f32(self.inner[[r, c]].to_f32())
        })
    }
}

#[cfg(test)]
mod tests {
    use half::f16;

    use super::*;

    #[test]
    fn memory_order_follows_the_layout() {
        let m = Matrix::<f32>::from_fn(2, 3, MatrixLayout::ColumnMajor, |r, c| (r * 10 + c) as f32);
        assert_eq!(m.as_slice(), &[0., 10., 1., 11., 2., 12.]);

        let t = m.to_layout(MatrixLayout::RowMajor);
        assert_eq!(t.as_slice(), &[0., 1., 2., 10., 11., 12.]);
        assert_eq!(t.layout(), MatrixLayout::RowMajor);
    }

    #[test]
    fn bytes_are_exact() {
        let m = Matrix::filled(1, 2, MatrixLayout::ColumnMajor, f16::ONE);
        assert_eq!(m.as_bytes(), &[0x00, 0x3c, 0x00, 0x3c]);
    }

    #[test]
    fn from_vec_checks_the_length() {
        assert!(Matrix::from_vec(vec![0.0_f32; 6], 3, 2, MatrixLayout::RowMajor).is_ok());
        assert!(Matrix::from_vec(vec![0.0_f32; 7], 3, 2, MatrixLayout::RowMajor).is_err());
    }

    #[test]
    fn cast_rounds() {
        let m = Matrix::filled(2, 2, MatrixLayout::ColumnMajor, 0.1_f32);
        let h = m.cast::<f16>();
        assert_eq!(h.get(1, 1), Some(f16::from_f32(0.1)));
    }
}
