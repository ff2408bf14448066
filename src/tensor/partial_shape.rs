//! Partially known shapes of graph tensor descriptors

use super::Shape;
use super::shape::STACK_DIMS;
use smallvec::SmallVec;
use std::fmt;

/// One dimension of a [`PartialShape`]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dim {
    /// Extent known when the graph is built
    Static(usize),
    /// Extent known only once a runtime tensor is bound
    Dynamic,
}

impl Dim {
    /// The static extent, if any
    #[inline]
    pub fn as_static(self) -> Option<usize> {
        match self {
            Self::Static(n) => Some(n),
            Self::Dynamic => None,
        }
    }

    /// Whether a concrete extent satisfies this dimension
    #[inline]
    pub fn accepts(self, extent: usize) -> bool {
        match self {
            Self::Static(n) => n == extent,
            Self::Dynamic => true,
        }
    }
}

impl From<usize> for Dim {
    fn from(n: usize) -> Self {
        Self::Static(n)
    }
}

/// Shape whose rank is always known but whose extents may be dynamic
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct PartialShape(SmallVec<[Dim; STACK_DIMS]>);

impl PartialShape {
    /// Fully dynamic shape of the given rank
    pub fn dynamic(rank: usize) -> Self {
        Self(std::iter::repeat(Dim::Dynamic).take(rank).collect())
    }

    /// Rank of the shape
    #[inline]
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Dimensions as a slice
    #[inline]
    pub fn dims(&self) -> &[Dim] {
        &self.0
    }

    /// True when every extent is static
    pub fn is_static(&self) -> bool {
        self.0.iter().all(|d| matches!(d, Dim::Static(_)))
    }

    /// The concrete shape, if fully static
    pub fn to_shape(&self) -> Option<Shape> {
        self.0.iter().map(|d| d.as_static()).collect()
    }

    /// Whether a concrete shape is an instance of this partial shape
    pub fn is_compatible(&self, shape: &[usize]) -> bool {
        self.rank() == shape.len() && self.0.iter().zip(shape).all(|(d, &n)| d.accepts(n))
    }

    /// Extents with dynamic dims reported as 0, for error messages
    pub fn extents_or_zero(&self) -> Vec<usize> {
        self.0.iter().map(|d| d.as_static().unwrap_or(0)).collect()
    }
}

impl From<&[usize]> for PartialShape {
    fn from(shape: &[usize]) -> Self {
        Self(shape.iter().map(|&n| Dim::Static(n)).collect())
    }
}

impl<const N: usize> From<[usize; N]> for PartialShape {
    fn from(shape: [usize; N]) -> Self {
        Self(shape.into_iter().map(Dim::Static).collect())
    }
}

impl<const N: usize> From<[Dim; N]> for PartialShape {
    fn from(dims: [Dim; N]) -> Self {
        Self(dims.into_iter().collect())
    }
}

impl From<&Shape> for PartialShape {
    fn from(shape: &Shape) -> Self {
        Self::from(shape.as_slice())
    }
}

impl FromIterator<Dim> for PartialShape {
    fn from_iter<T: IntoIterator<Item = Dim>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Debug for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match d {
                Dim::Static(n) => write!(f, "{n}")?,
                Dim::Dynamic => f.write_str("?")?,
            }
        }
        f.write_str("]")
    }
}
