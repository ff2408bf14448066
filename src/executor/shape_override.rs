//! Scoped override of parameter descriptor shapes

use crate::graph::TensorDesc;
use crate::tensor::{PartialShape, Tensor};
use std::ops::Deref;

/// Re-shapes parameter descriptors to the shapes of concrete inputs
///
/// While the guard lives, every descriptor whose input carries a shape
/// reports that shape as fully static. The original partial shapes are
/// restored on drop, on every exit path including `?` and panics.
pub struct ParameterShapeOverride<'a> {
    table: &'a mut [TensorDesc],
    saved: Vec<PartialShape>,
}

impl<'a> ParameterShapeOverride<'a> {
    /// Override `table[i]` with the shape of `inputs[i]`
    ///
    /// Extra descriptors or inputs beyond the shorter of the two are left
    /// untouched.
    pub fn apply(table: &'a mut [TensorDesc], inputs: &[Tensor]) -> Self {
        let saved = table.iter().map(|d| d.shape.clone()).collect();
        for (desc, input) in table.iter_mut().zip(inputs) {
            if let Some(shape) = input.shape() {
                desc.shape = PartialShape::from(shape);
            }
        }
        Self { table, saved }
    }
}

impl Deref for ParameterShapeOverride<'_> {
    type Target = [TensorDesc];

    fn deref(&self) -> &[TensorDesc] {
        self.table
    }
}

impl Drop for ParameterShapeOverride<'_> {
    fn drop(&mut self) {
        for (desc, shape) in self.table.iter_mut().zip(self.saved.drain(..)) {
            desc.shape = shape;
        }
    }
}
