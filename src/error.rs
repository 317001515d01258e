use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use crate::{device::Stream, matrix::MatrixLayout};

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, NetErr>;

/// The crate's error type.
#[derive(Debug)]
pub enum NetErr {
    /// A configuration document was rejected by the factory.
    Config { key: String, reason: String },
    /// A buffer's shape disagrees with the network's declared dimensions.
    DimensionMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    /// A buffer was handed over with the wrong memory layout.
    LayoutMismatch {
        what: &'static str,
        got: MatrixLayout,
        expected: MatrixLayout,
    },
    /// `backward` was called without a pending forward pass.
    MissingForwardPass,
    /// A fatal failure of the compute or memory subsystem.
    Accelerator(AcceleratorErr),
    Io(io::Error),
}

impl NetErr {
    /// Builds a configuration error for `key`.
    ///
    /// # Arguments
    /// * `key` - The offending key of the configuration document.
    /// * `reason` - Why the key was rejected.
    ///
    /// # Returns
    /// A new `NetErr::Config`.
    pub fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Checks that `got` equals `expected`, erroring with a dimension mismatch otherwise.
    ///
    /// # Arguments
    /// * `what` - Human readable name of the checked dimension.
    /// * `got` - The observed value.
    /// * `expected` - The declared value.
    pub fn check_dim(what: &'static str, got: usize, expected: usize) -> Result<()> {
        if got != expected {
            return Err(Self::DimensionMismatch {
                what,
                got,
                expected,
            });
        }

        Ok(())
    }
}

impl Display for NetErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetErr::Config { key, reason } => {
                write!(f, "invalid configuration at key `{key}`: {reason}")
            }
            NetErr::DimensionMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "dimension mismatch for {what}: got {got}, expected {expected}"
            ),
            NetErr::LayoutMismatch {
                what,
                got,
                expected,
            } => write!(f, "layout mismatch for {what}: got {got}, expected {expected}"),
            NetErr::MissingForwardPass => {
                write!(f, "backward requires a preceding forward pass with cached activations")
            }
            NetErr::Accelerator(e) => write!(f, "accelerator failure: {e}"),
            NetErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for NetErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NetErr::Io(e) => Some(e),
            NetErr::Accelerator(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for NetErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<AcceleratorErr> for NetErr {
    fn from(value: AcceleratorErr) -> Self {
        Self::Accelerator(value)
    }
}

/// Failures originating in the compute/memory subsystem. These are never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceleratorErr {
    OutOfMemory {
        stream: Stream,
        requested: usize,
        available: usize,
    },
}

impl Display for AcceleratorErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceleratorErr::OutOfMemory {
                stream,
                requested,
                available,
            } => write!(
                f,
                "out of workspace memory on {stream}: requested {requested} bytes, {available} available"
            ),
        }
    }
}

impl Error for AcceleratorErr {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_the_key() {
        let err = NetErr::config("n_neurons", "must be one of 16, 32, 64, 128");
        let msg = err.to_string();
        assert!(msg.contains("n_neurons"));
        assert!(msg.contains("must be one of"));
    }

    #[test]
    fn check_dim() {
        assert!(NetErr::check_dim("batch size", 5, 5).is_ok());

        let err = NetErr::check_dim("batch size", 10, 5).unwrap_err();
        assert!(matches!(
            err,
            NetErr::DimensionMismatch {
                what: "batch size",
                got: 10,
                expected: 5
            }
        ));
    }

    #[test]
    fn accelerator_error_is_the_source() {
        let err: NetErr = AcceleratorErr::OutOfMemory {
            stream: Stream::DEFAULT,
            requested: 64,
            available: 0,
        }
        .into();
        assert!(err.source().is_some());
    }
}
