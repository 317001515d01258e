mod activation;
pub mod arch;
mod contract;
pub mod dense;
mod differentiable;
mod params;
mod registry;
mod weight_usage;

pub use activation::Activation;
pub use arch::{CutlassMlp, CutlassResNet, DenseNetwork, FullyFusedMlp};
pub use contract::{MixedPrecisionInference, Network, check_input, check_output};
pub use dense::ForwardCache;
pub use differentiable::Differentiable;
pub use params::{MatrixSlot, ParamStore, ParameterLayout};
pub use registry::{Constructor, NetworkRegistry, create_network};
pub use weight_usage::WeightUsage;
