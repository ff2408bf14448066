//! Boundary tensor metadata of a fused subgraph

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::tensor::{Shape, Tensor};
use smallvec::SmallVec;

/// Permutation mapping blocked dims to logical dims
pub type MemoryOrder = SmallVec<[usize; 6]>;

/// Layout of one input or output of a fused subgraph
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortDesc {
    /// Extents in memory order, outermost first
    pub blocked_dims: Shape,
    /// Logical dimension stored at each blocked position
    ///
    /// Ports below the subgraph's rank must keep the identity order.
    pub order: MemoryOrder,
    /// Element type
    pub dtype: DType,
    /// Elements to skip before the first addressed element
    pub offset: usize,
}

impl PortDesc {
    /// Dense row-major port with identity memory order
    pub fn new(dtype: DType, blocked_dims: impl Into<Shape>) -> Self {
        let blocked_dims = blocked_dims.into();
        let order = (0..blocked_dims.len()).collect();
        Self {
            blocked_dims,
            order,
            dtype,
            offset: 0,
        }
    }

    /// Replace the memory order
    pub fn with_order(mut self, order: &[usize]) -> Self {
        self.order = order.iter().copied().collect();
        self
    }

    /// Set the element offset of the first addressed element
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Number of blocked dims
    pub fn rank(&self) -> usize {
        self.blocked_dims.len()
    }

    /// Bytes per element
    pub fn elem_size(&self) -> usize {
        self.dtype.size_in_bytes()
    }

    /// Port describing a shaped runtime tensor
    pub fn of(tensor: &Tensor) -> Result<Self> {
        Ok(Self::new(tensor.dtype(), tensor.resolved_shape()?))
    }

    pub(crate) fn validate_order(&self) -> Result<()> {
        let rank = self.rank();
        let mut seen: SmallVec<[bool; 12]> = SmallVec::from_elem(false, rank);
        if self.order.len() != rank {
            return Err(Error::InvalidArgument {
                arg: "order",
                reason: format!(
                    "memory order {:?} has {} entries for rank {rank}",
                    self.order.as_slice(),
                    self.order.len()
                ),
            });
        }
        for &axis in &self.order {
            if axis >= rank || std::mem::replace(&mut seen[axis], true) {
                return Err(Error::InvalidArgument {
                    arg: "order",
                    reason: format!(
                        "{:?} is not a permutation of 0..{rank}",
                        self.order.as_slice()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Blocked dims, memory order and precision of every boundary tensor
///
/// Ports are numbered inputs first, then outputs. A descriptor is produced
/// once per shape change and consumed read-only by the planner.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubgraphDescriptor {
    /// Input ports
    pub inputs: Vec<PortDesc>,
    /// Output ports
    pub outputs: Vec<PortDesc>,
}

impl SubgraphDescriptor {
    /// Descriptor from explicit ports
    pub fn new(inputs: Vec<PortDesc>, outputs: Vec<PortDesc>) -> Self {
        Self { inputs, outputs }
    }

    /// Dense descriptor matching runtime tensors
    pub fn from_tensors(inputs: &[Tensor], outputs: &[Tensor]) -> Result<Self> {
        Ok(Self {
            inputs: inputs.iter().map(PortDesc::of).collect::<Result<_>>()?,
            outputs: outputs.iter().map(PortDesc::of).collect::<Result<_>>()?,
        })
    }

    /// All ports, inputs first
    pub fn ports(&self) -> impl Iterator<Item = &PortDesc> {
        self.inputs.iter().chain(&self.outputs)
    }

    /// Total number of ports
    pub fn num_ports(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }
}
