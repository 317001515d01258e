use std::fmt;

use serde::{Deserialize, Serialize};

const LEAKY_RELU_SLOPE: f32 = 0.01;

/// Element-wise activation functions applied after each weight matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Activation {
    #[default]
    None,
    ReLU,
    LeakyReLU,
    Exponential,
    Sine,
    Sigmoid,
    Squareplus,
    Softplus,
    Tanh,
}
use Activation::*;

impl Activation {
    pub const ALL: [Activation; 9] = [
        None,
        ReLU,
        LeakyReLU,
        Exponential,
        Sine,
        Sigmoid,
        Squareplus,
        Softplus,
        Tanh,
    ];

    /// Looks an activation up by name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|act| act.name().eq_ignore_ascii_case(name))
    }

    pub fn name(&self) -> &'static str {
        match self {
            None => "None",
            ReLU => "ReLU",
            LeakyReLU => "LeakyReLU",
            Exponential => "Exponential",
            Sine => "Sine",
            Sigmoid => "Sigmoid",
            Squareplus => "Squareplus",
            Softplus => "Softplus",
            Tanh => "Tanh",
        }
    }

    pub fn f(&self, z: f32) -> f32 {
        match self {
            None => z,
            ReLU => z.max(0.),
            LeakyReLU => {
                if z > 0. {
                    z
                } else {
                    z * LEAKY_RELU_SLOPE
                }
            }
            Exponential => z.exp(),
            Sine => z.sin(),
            Sigmoid => sigmoid(z),
            Squareplus => 0.5 * (z + (z * z + 4.).sqrt()),
            Softplus => z.max(0.) + (-z.abs()).exp().ln_1p(),
            Tanh => z.tanh(),
        }
    }

    /// The derivative with respect to the pre-activation `z`.
    pub fn df(&self, z: f32) -> f32 {
        match self {
            None => 1.,
            ReLU => {
                if z > 0. {
                    1.
                } else {
                    0.
                }
            }
            LeakyReLU => {
                if z > 0. {
                    1.
                } else {
                    LEAKY_RELU_SLOPE
                }
            }
            Exponential => z.exp(),
            Sine => z.cos(),
            Sigmoid => {
                let s = sigmoid(z);
                s * (1. - s)
            }
            Squareplus => 0.5 * (1. + z / (z * z + 4.).sqrt()),
            Softplus => sigmoid(z),
            Tanh => 1. - z.tanh().powi(2),
        }
    }
}

fn sigmoid(z: f32) -> f32 {
    1. / (1. + (-z).exp())
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!(Activation::from_name("relu"), Some(ReLU));
        assert_eq!(Activation::from_name("SoftPlus"), Some(Softplus));
        assert_eq!(Activation::from_name("none"), Some(None));
        assert_eq!(Activation::from_name("gelu"), Option::None);
    }

    #[test]
    fn derivatives_match_finite_differences() {
        const EPS: f32 = 1e-2;

        for act in Activation::ALL {
            for z in [-1.3_f32, -0.4, 0.35, 1.7] {
                let numeric = (act.f(z + EPS) - act.f(z - EPS)) / (2. * EPS);
                let analytic = act.df(z);
                assert!(
                    (numeric - analytic).abs() < 1e-2 * (1. + analytic.abs()),
                    "{act} at {z}: numeric {numeric} vs analytic {analytic}"
                );
            }
        }
    }

    #[test]
    fn softplus_is_stable() {
        assert!(Softplus.f(100.).is_finite());
        assert!((Softplus.f(100.) - 100.).abs() < 1e-3);
        assert!(Softplus.f(-100.) >= 0.);
    }
}
