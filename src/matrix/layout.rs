use std::fmt;

use ndarray::{Ix2, Shape, ShapeBuilder};
use serde::{Deserialize, Serialize};

/// How the elements of a 2-D buffer map onto linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MatrixLayout {
    /// Element `(r, c)` of an `R x C` matrix lives at `r * C + c`.
    RowMajor,
    /// Element `(r, c)` of an `R x C` matrix lives at `c * R + r`.
    #[default]
    ColumnMajor,
}

impl MatrixLayout {
    /// Returns the `ndarray` shape of a `rows x cols` matrix stored with this layout.
    pub(crate) fn shape(self, rows: usize, cols: usize) -> Shape<Ix2> {
        (rows, cols).set_f(self == MatrixLayout::ColumnMajor)
    }
}

impl fmt::Display for MatrixLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixLayout::RowMajor => write!(f, "row-major"),
            MatrixLayout::ColumnMajor => write!(f, "column-major"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_major_is_the_default() {
        assert_eq!(MatrixLayout::default(), MatrixLayout::ColumnMajor);
    }

    #[test]
    fn serde_names() {
        let json = serde_json::to_string(&MatrixLayout::RowMajor).unwrap();
        assert_eq!(json, "\"RowMajor\"");
    }
}
