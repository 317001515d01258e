use std::fmt;

use serde::{Deserialize, Serialize};

/// The execution intent of a call into a network.
///
/// It is advisory: concrete networks use it to pick the weight set a pass reads and to decide
/// whether a forward pass keeps its activations around for a later backward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeightUsage {
    Inference,
    Forward,
    Backward,
}

impl WeightUsage {
    /// Whether a forward pass with this usage must cache activations for backpropagation.
    pub fn caches_activations(self) -> bool {
        !matches!(self, WeightUsage::Inference)
    }
}

impl fmt::Display for WeightUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightUsage::Inference => write!(f, "inference"),
            WeightUsage::Forward => write!(f, "forward"),
            WeightUsage::Backward => write!(f, "backward"),
        }
    }
}
