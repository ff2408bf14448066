//! Element trait for mapping Rust types to DType

use super::DType;
use bytemuck::{Pod, Zeroable};

/// Trait for Rust types that can live inside a runtime tensor
///
/// Reference evaluators compute in f64 and convert back through
/// `to_f64`/`from_f64`, so every element type round-trips through the same
/// arithmetic regardless of precision.
///
/// # Bounds
/// - `Pod + Zeroable` - Buffers are reinterpreted with bytemuck
/// - `PartialOrd` - Comparisons for activation functions
pub trait Element: Copy + Send + Sync + Pod + Zeroable + PartialOrd + 'static {
    /// The corresponding DType for this Rust type
    const DTYPE: DType;

    /// Convert to f64 for generic numeric operations
    fn to_f64(self) -> f64;

    /// Convert from f64 to this type (saturating for integers)
    fn from_f64(v: f64) -> Self;

    /// Zero value
    fn zero() -> Self {
        Self::zeroed()
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

macro_rules! impl_int_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;

                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }

                #[inline]
                fn from_f64(v: f64) -> Self {
                    v as $ty
                }
            }
        )*
    };
}

impl_int_element! {
    i64 => I64,
    i32 => I32,
    i16 => I16,
    i8 => I8,
    u64 => U64,
    u32 => U32,
    u16 => U16,
    u8 => U8,
}

// bool is not Pod; DType::Bool buffers are viewed as u8 by the dispatch macro.

#[cfg(feature = "f16")]
impl Element for half::f16 {
    const DTYPE: DType = DType::F16;

    #[inline]
    fn to_f64(self) -> f64 {
        self.to_f64()
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        half::f16::from_f64(v)
    }
}

#[cfg(feature = "f16")]
impl Element for half::bf16 {
    const DTYPE: DType = DType::BF16;

    #[inline]
    fn to_f64(self) -> f64 {
        self.to_f64()
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        half::bf16::from_f64(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_conversion_saturates() {
        assert_eq!(<u8 as Element>::from_f64(300.0), 255);
        assert_eq!(<i8 as Element>::from_f64(-1000.0), -128);
        assert_eq!(<u32 as Element>::from_f64(-5.0), 0);
    }

    #[test]
    fn test_dtype_constants() {
        assert_eq!(<f32 as Element>::DTYPE, DType::F32);
        assert_eq!(<i64 as Element>::DTYPE, DType::I64);
        assert_eq!(<u8 as Element>::zero(), 0);
    }

    #[cfg(feature = "f16")]
    #[test]
    fn test_half_roundtrip() {
        let v = <half::f16 as Element>::from_f64(1.5);
        assert_eq!(Element::to_f64(v), 1.5);
        let b = <half::bf16 as Element>::from_f64(-2.0);
        assert_eq!(Element::to_f64(b), -2.0);
    }
}
