use ndarray::{ArrayView2, ArrayViewMut2};

use super::MatrixLayout;
use crate::{NetErr, Result, precision::Element};

/// A read-only view over an externally owned `rows x cols` buffer.
///
/// The view does not own the elements, it interprets them through its `MatrixLayout`.
#[derive(Debug, Clone, Copy)]
pub struct MatrixView<'a, T> {
    inner: ArrayView2<'a, T>,
    layout: MatrixLayout,
}

impl<'a, T: Element> MatrixView<'a, T> {
    /// Creates a new `MatrixView`.
    ///
    /// # Arguments
    /// * `data` - The borrowed elements, must hold exactly `rows * cols` of them.
    /// * `rows` - The amount of rows (the feature width).
    /// * `cols` - The amount of columns (the batch size).
    /// * `layout` - How `data` is laid out in memory.
    ///
    /// # Returns
    /// A new `MatrixView` or a dimension mismatch if `data` has the wrong length.
    pub fn new(data: &'a [T], rows: usize, cols: usize, layout: MatrixLayout) -> Result<Self> {
        NetErr::check_dim("matrix elements", data.len(), rows * cols)?;

        let inner = ArrayView2::from_shape(layout.shape(rows, cols), data).map_err(|_| {
            NetErr::DimensionMismatch {
                what: "matrix elements",
                got: data.len(),
                expected: rows * cols,
            }
        })?;

        Ok(Self { inner, layout })
    }

    pub(crate) fn from_array(inner: ArrayView2<'a, T>, layout: MatrixLayout) -> Self {
        Self { inner, layout }
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

    #[inline]
    pub fn n_elements(&self) -> usize {
        self.inner.len()
    }

    /// Returns the element at logical position `(row, col)`, regardless of the layout.
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        self.inner.get((row, col)).copied()
    }

    /// Returns the underlying `ndarray` view, indexed logically as `[[row, col]]`.
    pub fn array(&self) -> ArrayView2<'a, T> {
        self.inner
    }
}

/// A mutable view over an externally owned `rows x cols` buffer.
#[derive(Debug)]
pub struct MatrixViewMut<'a, T> {
    inner: ArrayViewMut2<'a, T>,
    layout: MatrixLayout,
}

impl<'a, T: Element> MatrixViewMut<'a, T> {
    /// Creates a new `MatrixViewMut`.
    ///
    /// # Arguments
    /// * `data` - The borrowed elements, must hold exactly `rows * cols` of them.
    /// * `rows` - The amount of rows (the feature width).
    /// * `cols` - The amount of columns (the batch size).
    /// * `layout` - How `data` is laid out in memory.
    ///
    /// # Returns
    /// A new `MatrixViewMut` or a dimension mismatch if `data` has the wrong length.
    pub fn new(data: &'a mut [T], rows: usize, cols: usize, layout: MatrixLayout) -> Result<Self> {
        let len = data.len();
        NetErr::check_dim("matrix elements", len, rows * cols)?;

        let inner = ArrayViewMut2::from_shape(layout.shape(rows, cols), data).map_err(|_| {
            NetErr::DimensionMismatch {
                what: "matrix elements",
                got: len,
                expected: rows * cols,
            }
        })?;

        Ok(Self { inner, layout })
    }

    pub(crate) fn from_array(inner: ArrayViewMut2<'a, T>, layout: MatrixLayout) -> Self {
        Self { inner, layout }
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

    #[inline]
    pub fn n_elements(&self) -> usize {
        self.inner.len()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        self.inner.get((row, col)).copied()
    }

    /// Writes `value` at logical position `(row, col)`.
    ///
    /// # Returns
    /// `false` if the position is out of bounds.
    pub fn set(&mut self, row: usize, col: usize, value: T) -> bool {
        match self.inner.get_mut((row, col)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn fill(&mut self, value: T) {
        self.inner.fill(value);
    }

    /// Reborrows this view as a read-only one.
    pub fn view(&self) -> MatrixView<'_, T> {
        MatrixView::from_array(self.inner.view(), self.layout)
    }

    pub fn array(&self) -> ArrayView2<'_, T> {
        self.inner.view()
    }

    pub fn array_mut(&mut self) -> ArrayViewMut2<'_, T> {
        self.inner.view_mut()
    }
}
