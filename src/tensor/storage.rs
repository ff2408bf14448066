//! Storage: reference-counted host buffers shared between tensors

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Reference-counted byte buffer backing a runtime tensor
///
/// Cloning a `Storage` aliases the same bytes. The buffer is allocated as
/// `u64` words so every element type up to 8 bytes is aligned when the bytes
/// are reinterpreted with bytemuck.
///
/// Access goes through a `parking_lot::RwLock`: evaluators take read guards on
/// inputs and write guards on outputs; the fused scheduler locks every
/// distinct buffer exactly once for the duration of a kernel run.
pub struct Storage {
    inner: Arc<StorageInner>,
}

struct StorageInner {
    words: RwLock<Vec<u64>>,
    /// Length in bytes (the word vector may carry up to 7 bytes of padding)
    len: usize,
}

impl Storage {
    /// Allocate `len` zeroed bytes
    pub fn zeroed(len: usize) -> Self {
        Self {
            inner: Arc::new(StorageInner {
                words: RwLock::new(vec![0u64; len.div_ceil(8)]),
                len,
            }),
        }
    }

    /// Allocate storage holding a copy of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let storage = Self::zeroed(bytes.len());
        storage.write().copy_from_slice(bytes);
        storage
    }

    /// Length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Whether the buffer holds no bytes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Get the reference count
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Check if this is the only reference
    #[inline]
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }

    /// Whether two storages alias the same buffer
    #[inline]
    pub fn ptr_eq(&self, other: &Storage) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stable identity of the buffer, usable as a map key while it is alive
    #[inline]
    pub fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Shared access to the bytes
    ///
    /// Recursive: the same thread may hold several read guards on one buffer,
    /// as when a tensor is passed twice to the same operator.
    pub fn read(&self) -> BytesRef<'_> {
        BytesRef {
            guard: self.inner.words.read_recursive(),
            len: self.inner.len,
        }
    }

    /// Exclusive access to the bytes
    pub fn write(&self) -> BytesMut<'_> {
        BytesMut {
            guard: self.inner.words.write(),
            len: self.inner.len,
        }
    }
}

impl Clone for Storage {
    /// Clone increments the reference count (zero-copy)
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("len", &self.inner.len)
            .field("refs", &Arc::strong_count(&self.inner))
            .finish()
    }
}

/// Read guard over a storage's bytes
pub struct BytesRef<'a> {
    guard: RwLockReadGuard<'a, Vec<u64>>,
    len: usize,
}

impl Deref for BytesRef<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.guard)[..self.len]
    }
}

/// Write guard over a storage's bytes
pub struct BytesMut<'a> {
    guard: RwLockWriteGuard<'a, Vec<u64>>,
    len: usize,
}

impl Deref for BytesMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.guard)[..self.len]
    }
}

impl DerefMut for BytesMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.guard)[..len]
    }
}
