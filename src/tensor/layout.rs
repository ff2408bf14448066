//! Layout: shape, strides, and offset for tensor memory layout

use super::{Shape, Strides};
use crate::error::{Error, Result};
use std::fmt;

/// Layout describes how logical indices map onto a flat buffer
///
/// Address of element at indices [i0, i1, ..., in]:
///   offset + i0 * strides[0] + i1 * strides[1] + ... + in * strides[n]
///
/// Runtime tensors are always dense; non-dense layouts only appear as
/// broadcast views while an evaluator reads its inputs.
#[derive(Clone, PartialEq, Eq)]
pub struct Layout {
    shape: Shape,
    strides: Strides,
    offset: usize,
}

impl Layout {
    /// Create a new contiguous (row-major) layout from a shape
    ///
    /// # Example
    /// ```
    /// use graphrt::tensor::Layout;
    /// let layout = Layout::contiguous(&[2, 3, 4]);
    /// assert_eq!(layout.shape(), &[2, 3, 4]);
    /// assert_eq!(layout.strides(), &[12, 4, 1]);
    /// ```
    pub fn contiguous(shape: &[usize]) -> Self {
        Self {
            shape: Shape::from(shape),
            strides: Strides::dense(shape),
            offset: 0,
        }
    }

    /// Create a layout with explicit shape, strides, and offset
    pub fn new(shape: Shape, strides: Strides, offset: usize) -> Self {
        debug_assert_eq!(shape.len(), strides.len());
        Self {
            shape,
            strides,
            offset,
        }
    }

    /// Get the shape
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the strides
    #[inline]
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    /// Get the offset
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of dimensions (rank)
    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements
    #[inline]
    pub fn elem_count(&self) -> usize {
        self.shape.numel()
    }

    /// Create a broadcast view of this layout with the target shape
    ///
    /// Leading and size-1 dimensions that are stretched get stride 0.
    pub fn broadcast_to(&self, target: &[usize]) -> Result<Self> {
        if target.len() < self.ndim() {
            return Err(Error::broadcast(&self.shape, target));
        }

        let pad = target.len() - self.ndim();
        let mut shape = Shape::with_capacity(target.len());
        let mut strides = Strides::with_capacity(target.len());
        for &t in &target[..pad] {
            shape.push(t);
            strides.push(0);
        }

        for ((&s, &st), &t) in self
            .shape
            .iter()
            .zip(self.strides.iter())
            .zip(&target[pad..])
        {
            if s == t {
                shape.push(t);
                strides.push(st);
            } else if s == 1 {
                shape.push(t);
                strides.push(0);
            } else {
                return Err(Error::broadcast(&self.shape, target));
            }
        }

        Ok(Self::new(shape, strides, self.offset))
    }

    /// Iterate the element offsets of this layout in row-major logical order
    pub fn offsets(&self) -> Offsets<'_> {
        Offsets {
            layout: self,
            index: Shape::from(vec![0; self.ndim()]),
            current: self.offset as isize,
            remaining: self.elem_count(),
        }
    }
}

/// Iterator over the element offsets of a [`Layout`]
pub struct Offsets<'a> {
    layout: &'a Layout,
    index: Shape,
    current: isize,
    remaining: usize,
}

impl Iterator for Offsets<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let out = self.current as usize;

        // Odometer increment from the innermost dimension
        for d in (0..self.index.len()).rev() {
            self.index[d] += 1;
            self.current += self.layout.strides[d];
            if self.index[d] < self.layout.shape[d] {
                break;
            }
            self.current -= self.layout.strides[d] * self.index[d] as isize;
            self.index[d] = 0;
        }
        Some(out)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Offsets<'_> {}

impl fmt::Debug for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Layout {{ shape: {:?}, strides: {:?}, offset: {} }}",
            self.shape.as_slice(),
            self.strides.as_slice(),
            self.offset
        )
    }
}

/// Check whether two extents are broadcast-compatible (equal, or one is 1)
#[inline]
pub fn extents_compatible(a: usize, b: usize) -> bool {
    a == b || a == 1 || b == 1
}

/// Compute the numpy-style broadcast shape of two shapes
///
/// Shapes are aligned at their trailing dimension. A size-1 extent stretches
/// to the other side's extent, including 0.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Shape> {
    let max_ndim = a.len().max(b.len());
    let mut result = Shape::with_capacity(max_ndim);

    for i in 0..max_ndim {
        let a_dim = if i < a.len() { a[a.len() - 1 - i] } else { 1 };
        let b_dim = if i < b.len() { b[b.len() - 1 - i] } else { 1 };

        if !extents_compatible(a_dim, b_dim) {
            return Err(Error::broadcast(a, b));
        }
        result.push(if a_dim == 1 { b_dim } else { a_dim });
    }

    result.reverse();
    Ok(result)
}
