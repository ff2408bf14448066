//! Tensor types
//!
//! Runtime tensors (`Tensor`) hold concrete, dense, row-major data. Graph
//! tensor descriptors use `PartialShape` to describe shapes that may only be
//! known once the graph runs. `Layout` provides broadcast views used by
//! evaluators to index inputs of differing shapes.

mod core;
mod layout;
mod partial_shape;
mod shape;
mod storage;
mod strides;

pub use core::Tensor;
pub use layout::{Layout, Offsets, broadcast_shapes, extents_compatible};
pub use partial_shape::{Dim, PartialShape};
pub use shape::Shape;
pub use storage::{BytesMut, BytesRef, Storage};
pub use strides::Strides;
