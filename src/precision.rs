//! Storage element types.
//!
//! Networks store parameters, activations and gradients as `T` while every kernel accumulates
//! in `f32`. Widening (`to_f32`) is exact for all implementors, narrowing (`from_f32`) rounds to
//! nearest.
use std::fmt::Debug;

use bytemuck::Pod;
use half::{bf16, f16};

/// A numeric type usable as the storage element of a network.
pub trait Element: Pod + Default + PartialEq + Debug + Send + Sync + 'static {
    /// The name of the type, as reported in hyperparameters and logs.
    const NAME: &'static str;

    /// Rounds an `f32` to this type.
    fn from_f32(value: f32) -> Self;

    /// Widens this value to `f32`.
    fn to_f32(self) -> f32;

    /// Rounds `value` through this type, returning the representable `f32` closest to it.
    #[inline]
    fn quantize(value: f32) -> f32 {
        Self::from_f32(value).to_f32()
    }
}

impl Element for f32 {
    const NAME: &'static str = "f32";

    #[inline]
    fn from_f32(value: f32) -> Self {
        value
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }
}

impl Element for f16 {
    const NAME: &'static str = "f16";

    #[inline]
    fn from_f32(value: f32) -> Self {
        f16::from_f32(value)
    }

    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }
}

impl Element for bf16 {
    const NAME: &'static str = "bf16";

    #[inline]
    fn from_f32(value: f32) -> Self {
        bf16::from_f32(value)
    }

    #[inline]
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }
}

/// Widens every element of `src` into `dst`.
pub fn widen_into<T: Element>(src: &[T], dst: &mut [f32]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = s.to_f32();
    }
}

/// Rounds every element of `src` into `dst`.
pub fn narrow_into<T: Element>(src: &[f32], dst: &mut [T]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = T::from_f32(s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f16_rounds_to_nearest() {
        // 1 + 2^-11 is exactly halfway between two f16 values, ties go to even.
        let x = 1.0 + f32::powi(2., -11);
        assert_eq!(f16::quantize(x), 1.0);
        assert_eq!(f16::quantize(0.1), f16::from_f32(0.1).to_f32());
        assert_ne!(f16::quantize(0.1), 0.1);
    }

    #[test]
    fn f32_is_lossless() {
        for x in [0.1_f32, -3.75, 1e-20, 6.5e4] {
            assert_eq!(f32::quantize(x), x);
        }
    }

    #[test]
    fn widen_narrow_roundtrip_is_exact_on_representable_values() {
        let src = [f16::from_f32(0.5), f16::from_f32(-2.0), f16::from_f32(0.1)];
        let mut wide = [0.0; 3];
        widen_into(&src, &mut wide);

        let mut back = [f16::ZERO; 3];
        narrow_into(&wide, &mut back);
        assert_eq!(src, back);
    }

    #[test]
    fn bf16_keeps_f32_range() {
        assert!(bf16::quantize(1e30).is_finite());
        assert!(f16::quantize(1e30).is_infinite());
    }
}
