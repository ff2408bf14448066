//! Calling convention of generated fused kernels

use super::planner::MAX_TILE_RANK;
use std::fmt;

/// Error reported by a kernel invocation
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct KernelError {
    message: String,
}

impl KernelError {
    /// Error with a description of what went wrong
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The description
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Argument bundle of one kernel invocation
///
/// Pointers address the element at the current outer index of each port.
/// The kernel walks `tile_extents[0] x tile_extents[1]` elements from there
/// using the per-port `tile_strides` (bytes, inputs first, then outputs).
pub struct KernelArgs<'a> {
    /// Input pointers
    pub inputs: &'a [*const u8],
    /// Output pointers
    pub outputs: &'a [*mut u8],
    /// Byte strides of the tiled dims per port
    pub tile_strides: &'a [[isize; MAX_TILE_RANK]],
    /// Extents of the tiled dims, outermost first
    pub tile_extents: [usize; MAX_TILE_RANK],
    /// Outer index of this invocation
    pub outer_index: &'a [usize],
    /// Start of this task's scratchpad region
    pub scratchpad: *mut u8,
    /// Length of the scratchpad region in bytes
    pub scratchpad_len: usize,
}

impl fmt::Debug for KernelArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelArgs")
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("tile_extents", &self.tile_extents)
            .field("outer_index", &self.outer_index)
            .field("scratchpad_len", &self.scratchpad_len)
            .finish()
    }
}

/// Compiled body of a fused subgraph
///
/// One call processes one tile. Tiles run concurrently on different
/// workers; per-call temporaries belong in the scratchpad region.
pub trait FusedKernel: Send + Sync {
    /// Scratch bytes one concurrently running invocation needs
    fn scratchpad_size(&self) -> usize {
        0
    }

    /// Process the tile described by `args`
    ///
    /// # Safety
    ///
    /// Every pointer in `args`, advanced by any combination of tile indices
    /// times the matching strides, must stay inside a live buffer of its
    /// port. Output tiles of concurrent calls must not overlap.
    unsafe fn call(&self, args: &KernelArgs<'_>) -> Result<(), KernelError>;
}
