mod layout;
mod owned;
mod view;

pub use layout::MatrixLayout;
pub use owned::Matrix;
pub use view::{MatrixView, MatrixViewMut};
