//! Core runtime Tensor type

use super::{BytesMut, BytesRef, Layout, Shape, Storage};
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use std::fmt;

/// Dense, row-major runtime tensor bound to a graph tensor descriptor
///
/// A `Tensor` consists of:
/// - **DType**: element type, fixed for the tensor's lifetime
/// - **Shape**: concrete extents, or unset while an operator has not yet
///   produced a dynamically shaped output
/// - **Storage**: reference-counted bytes
///
/// # Aliasing
///
/// `clone()` aliases the storage, so writes through one handle are visible
/// through the other. Use [`Tensor::deep_clone`] for an independent copy.
///
/// # Example
///
/// ```
/// use graphrt::tensor::Tensor;
///
/// let t = Tensor::from_slice(&[1.0f32, -2.0, 3.0], &[3]).unwrap();
/// assert_eq!(t.shape(), Some(&[3][..]));
/// assert_eq!(t.to_vec::<f32>().unwrap(), vec![1.0, -2.0, 3.0]);
/// ```
pub struct Tensor {
    dtype: DType,
    shape: Option<Shape>,
    storage: Storage,
}

impl Tensor {
    /// Create a tensor whose shape is not known yet
    pub fn unshaped(dtype: DType) -> Self {
        Self {
            dtype,
            shape: None,
            storage: Storage::zeroed(0),
        }
    }

    /// Create a zero-filled tensor
    pub fn zeros(dtype: DType, shape: &[usize]) -> Self {
        let shape = Shape::from(shape);
        let storage = Storage::zeroed(shape.numel() * dtype.size_in_bytes());
        Self {
            dtype,
            shape: Some(shape),
            storage,
        }
    }

    /// Create a tensor from a slice of data
    ///
    /// Returns an error if `data.len()` does not equal the product of the
    /// `shape` dimensions.
    pub fn from_slice<T: Element>(data: &[T], shape: &[usize]) -> Result<Self> {
        Self::from_bytes(T::DTYPE, shape, bytemuck::cast_slice(data))
    }

    /// Create a tensor from raw little-endian element bytes
    pub fn from_bytes(dtype: DType, shape: &[usize], bytes: &[u8]) -> Result<Self> {
        let shape = Shape::from(shape);
        let elem = dtype.size_in_bytes();
        if bytes.len() != shape.numel() * elem {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![bytes.len() / elem],
            });
        }
        Ok(Self {
            dtype,
            shape: Some(shape),
            storage: Storage::from_bytes(bytes),
        })
    }

    /// Element type
    #[inline]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Concrete shape, or `None` while unresolved
    #[inline]
    pub fn shape(&self) -> Option<&[usize]> {
        self.shape.as_deref()
    }

    /// Whether the shape has been resolved
    #[inline]
    pub fn has_shape(&self) -> bool {
        self.shape.is_some()
    }

    /// Shape of a tensor that must already be resolved
    pub fn resolved_shape(&self) -> Result<&[usize]> {
        self.shape
            .as_deref()
            .ok_or_else(|| Error::Internal("tensor shape is not resolved".into()))
    }

    /// Number of elements (0 while unshaped)
    #[inline]
    pub fn numel(&self) -> usize {
        self.shape.as_ref().map_or(0, |s| s.numel())
    }

    /// Size of the data in bytes
    #[inline]
    pub fn nbytes(&self) -> usize {
        self.storage.len()
    }

    /// Dense layout of the tensor, if shaped
    pub fn layout(&self) -> Option<Layout> {
        self.shape.as_deref().map(Layout::contiguous)
    }

    /// Underlying storage
    #[inline]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Whether both tensors alias the same buffer
    #[inline]
    pub fn shares_storage(&self, other: &Tensor) -> bool {
        self.storage.ptr_eq(&other.storage)
    }

    /// Whether no other handle aliases this tensor's buffer
    #[inline]
    pub fn is_exclusive(&self) -> bool {
        self.storage.is_unique()
    }

    /// Give the tensor `shape`, reallocating zeroed storage when it changes
    ///
    /// Keeps the current buffer if the shape is already `shape`.
    pub fn resize(&mut self, shape: &[usize]) {
        if self.shape.as_deref() == Some(shape) {
            return;
        }
        *self = Self::zeros(self.dtype, shape);
    }

    /// Shared access to the element bytes
    pub fn bytes(&self) -> BytesRef<'_> {
        self.storage.read()
    }

    /// Exclusive access to the element bytes
    pub fn bytes_mut(&self) -> BytesMut<'_> {
        self.storage.write()
    }

    /// Copy the elements out as a typed vector
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(Error::DTypeMismatch {
                expected: self.dtype,
                got: T::DTYPE,
            });
        }
        let mut out = vec![T::zeroed(); self.numel()];
        bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&self.bytes());
        Ok(out)
    }

    /// Copy `src`'s elements into this tensor's buffer
    ///
    /// Both tensors must have the same dtype and shape. Copying a tensor onto
    /// an alias of itself is a no-op.
    pub fn copy_from(&self, src: &Tensor) -> Result<()> {
        if src.dtype != self.dtype {
            return Err(Error::DTypeMismatch {
                expected: self.dtype,
                got: src.dtype,
            });
        }
        if src.shape != self.shape {
            return Err(Error::shape_mismatch(
                self.shape.as_deref().unwrap_or(&[]),
                src.shape.as_deref().unwrap_or(&[]),
            ));
        }
        if self.shares_storage(src) {
            return Ok(());
        }
        self.bytes_mut().copy_from_slice(&src.bytes());
        Ok(())
    }

    /// Independent copy with its own storage
    pub fn deep_clone(&self) -> Self {
        Self {
            dtype: self.dtype,
            shape: self.shape.clone(),
            storage: Storage::from_bytes(&self.bytes()),
        }
    }
}

impl Clone for Tensor {
    /// Clone creates a new handle sharing the same storage (zero-copy)
    fn clone(&self) -> Self {
        Self {
            dtype: self.dtype,
            shape: self.shape.clone(),
            storage: self.storage.clone(),
        }
    }
}

impl Default for Tensor {
    /// An unshaped `f32` tensor, the usual placeholder for an output slot
    fn default() -> Self {
        Self::unshaped(DType::F32)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("refs", &self.storage.ref_count())
            .finish()
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shape {
            Some(shape) => write!(f, "Tensor({:?}, dtype={})", shape, self.dtype),
            None => write!(f, "Tensor(?, dtype={})", self.dtype),
        }
    }
}
