pub mod config;
pub mod device;
pub mod error;
pub mod matrix;
pub mod network;
pub mod optimization;
pub mod precision;

pub use device::{Stream, WorkspacePool, free_workspace};
pub use error::{AcceleratorErr, NetErr, Result};
pub use matrix::{Matrix, MatrixLayout, MatrixView, MatrixViewMut};
pub use network::{
    Differentiable, MixedPrecisionInference, Network, NetworkRegistry, WeightUsage, create_network,
};
pub use precision::Element;
