//! Fused subgraph execution
//!
//! A fused subgraph is a cluster of elementwise operators compiled into a
//! single [`FusedKernel`]. Running it takes three steps:
//!
//! - the caller describes the boundary tensors in a [`SubgraphDescriptor`]
//! - [`DomainPlanner`] turns the descriptor into a [`SubgraphPlan`]: the
//!   broadcast execution domain, its tile rank and per-port strides
//! - [`SubgraphScheduler`] splits the outer part of the domain across
//!   workers and calls the kernel once per outer index
//!
//! [`FusedSubgraph`] wraps all three as a node evaluator and falls back to
//! interpreting its body graph when no kernel is attached.
//!
//! ```
//! use graphrt::prelude::*;
//! use graphrt::subgraph::{DomainPlanner, PortDesc, SubgraphDescriptor};
//!
//! let desc = SubgraphDescriptor::new(
//!     vec![PortDesc::new(DType::F32, [2, 3]), PortDesc::new(DType::F32, [1, 3])],
//!     vec![PortDesc::new(DType::F32, [2, 3])],
//! );
//! let plan = DomainPlanner::new(&RuntimeConfig::default()).plan(&desc).unwrap();
//! assert_eq!(plan.domain.master_shape(), &[2, 3]);
//! assert_eq!(plan.domain.tile_rank(), 2);
//! assert_eq!(plan.domain.harness_work_amount(), 1);
//! ```

mod descriptor;
mod fused;
mod kernel;
mod planner;
mod scheduler;
mod scratchpad;

pub use descriptor::{MemoryOrder, PortDesc, SubgraphDescriptor};
pub use fused::FusedSubgraph;
pub use kernel::{FusedKernel, KernelArgs, KernelError};
pub use planner::{
    BOUNDED_RANK, DomainPlanner, ExecutionDomain, MAX_RANK, MAX_TILE_RANK, PlanCache,
    SubgraphPlan, TensorAccess,
};
pub use scheduler::{PortBuffers, SubgraphScheduler, split_range};
pub use scratchpad::{ScratchRegions, Scratchpad};
