//! # graphrt
//!
//! **Execution core for tensor dataflow graphs.**
//!
//! graphrt runs a topologically ordered graph of numeric operators against
//! concrete buffers. Operators are evaluated either by an interpreter that
//! dispatches to an injectable evaluator registry, or, for clusters of
//! elementwise operators, by a compiled fused kernel driven over a
//! broadcast execution domain.
//!
//! ## Overview
//!
//! - **Graphs**: [`graph::GraphBuilder`] assembles nodes and tensor
//!   descriptors into a validated, frozen [`graph::Graph`]
//! - **Interpreter**: [`executor::Executor`] binds inputs, walks the nodes,
//!   keeps per-executor variable state and honors cooperative cancellation
//! - **Evaluators**: [`registry::EvaluatorRegistry`] maps operator types to
//!   evaluators; a small reference set ships for end-to-end runs
//! - **Fused subgraphs**: [`subgraph`] plans the execution domain, tile rank
//!   and strides of a fused cluster and schedules its kernel across workers
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use graphrt::prelude::*;
//!
//! let mut b = GraphBuilder::new();
//! let x = b.parameter(DType::F32, [2, 3]);
//! let y = b.parameter(DType::F32, [1, 3]);
//! let sum = b.op(OpType::ADD, &[x, y])?;
//! b.result(sum)?;
//!
//! let exec = Executor::new(
//!     Arc::new(b.build()?),
//!     Arc::new(EvaluatorRegistry::with_reference_ops()),
//! );
//! let x = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3])?;
//! let y = Tensor::from_slice(&[10.0f32, 20.0, 30.0], &[1, 3])?;
//! let mut out = vec![Tensor::default()];
//! assert!(exec.execute(&mut out, &[x, y], false)?.is_completed());
//! assert_eq!(out[0].to_vec::<f32>()?, vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
//! # Ok::<(), graphrt::error::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `rayon` (default): Parallel fused kernel scheduling
//! - `f16` (default): Half-precision floats (F16, BF16)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod config;
pub mod dtype;
pub mod error;
pub mod executor;
pub mod graph;
pub mod registry;
pub mod subgraph;
pub mod tensor;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::RuntimeConfig;
    pub use crate::dtype::DType;
    pub use crate::error::{Error, Result};
    pub use crate::executor::{CancelHandle, EvalContext, ExecStatus, Executor};
    pub use crate::graph::{Graph, GraphBuilder, NodeSpec, OpType, TensorDesc, TensorHandle};
    pub use crate::registry::{EvaluatorRegistry, NodeEvaluator};
    pub use crate::subgraph::{FusedKernel, FusedSubgraph, SubgraphScheduler};
    pub use crate::tensor::{Dim, PartialShape, Tensor};
}
