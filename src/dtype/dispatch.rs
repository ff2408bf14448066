//! Runtime dtype dispatch
//!
//! `dispatch_dtype!` turns a runtime `DType` into a concrete Rust type bound
//! to an identifier, so reference evaluators can be written once generically.
//!
//! ```ignore
//! fn relu(dtype: DType, src: &[u8], dst: &mut [u8]) -> Result<()> {
//!     dispatch_dtype!(dtype, T => {
//!         let src: &[T] = bytemuck::cast_slice(src);
//!         // ...
//!         Ok(())
//!     }, "relu")
//! }
//! ```
//!
//! `Bool` is viewed as `u8`. `F16`/`BF16` require the "f16" feature and
//! return `UnsupportedDType` without it.

/// Internal helper dispatching the half-precision types.
#[macro_export]
#[doc(hidden)]
macro_rules! dispatch_half_type {
    ($T:ident, $body:block, $dtype:expr, $error_op:expr, $type:ty) => {{
        #[cfg(feature = "f16")]
        {
            type $T = $type;
            $body
        }
        #[cfg(not(feature = "f16"))]
        {
            return Err($crate::error::Error::unsupported_dtype($dtype, $error_op));
        }
    }};
}

/// Execute `$body` with `$T` bound to the Rust type of `$dtype`.
#[macro_export]
macro_rules! dispatch_dtype {
    ($dtype:expr, $T:ident => $body:block, $error_op:expr) => {
        match $dtype {
            $crate::dtype::DType::F64 => {
                type $T = f64;
                $body
            }
            $crate::dtype::DType::F32 => {
                type $T = f32;
                $body
            }
            $crate::dtype::DType::F16 => {
                $crate::dispatch_half_type!($T, $body, $dtype, $error_op, ::half::f16)
            }
            $crate::dtype::DType::BF16 => {
                $crate::dispatch_half_type!($T, $body, $dtype, $error_op, ::half::bf16)
            }
            $crate::dtype::DType::I64 => {
                type $T = i64;
                $body
            }
            $crate::dtype::DType::I32 => {
                type $T = i32;
                $body
            }
            $crate::dtype::DType::I16 => {
                type $T = i16;
                $body
            }
            $crate::dtype::DType::I8 => {
                type $T = i8;
                $body
            }
            $crate::dtype::DType::U64 => {
                type $T = u64;
                $body
            }
            $crate::dtype::DType::U32 => {
                type $T = u32;
                $body
            }
            $crate::dtype::DType::U16 => {
                type $T = u16;
                $body
            }
            $crate::dtype::DType::U8 | $crate::dtype::DType::Bool => {
                type $T = u8;
                $body
            }
        }
    };
}
