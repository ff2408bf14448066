//! Operator evaluators and the registry that dispatches to them
//!
//! The executor never computes operator math itself. A node is evaluated
//! either by the inline [`NodeEvaluator`] it carries (fused subgraphs and
//! other self-executing operators) or by the evaluator registered for its
//! [`OpType`] in an [`EvaluatorRegistry`].
//!
//! Any `Fn(&Node, &mut [Tensor], &[Tensor], &EvalContext) -> Result<()>`
//! closure is a `NodeEvaluator`.

mod reference;

use crate::error::Result;
use crate::executor::EvalContext;
use crate::graph::{Node, OpType};
use crate::tensor::Tensor;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Computes a node's outputs from its inputs
///
/// `outputs` arrive pre-allocated from static descriptors, or unshaped for
/// dynamic ones; an evaluator resizes outputs whose shape it decides. An
/// `Err` aborts the whole graph execution.
pub trait NodeEvaluator: Send + Sync {
    /// Evaluate `node`
    fn evaluate(
        &self,
        node: &Node,
        outputs: &mut [Tensor],
        inputs: &[Tensor],
        ctx: &EvalContext,
    ) -> Result<()>;
}

impl<F> NodeEvaluator for F
where
    F: Fn(&Node, &mut [Tensor], &[Tensor], &EvalContext) -> Result<()> + Send + Sync,
{
    fn evaluate(
        &self,
        node: &Node,
        outputs: &mut [Tensor],
        inputs: &[Tensor],
        ctx: &EvalContext,
    ) -> Result<()> {
        self(node, outputs, inputs, ctx)
    }
}

/// Map from operator type to evaluator
///
/// Built once, then shared read-only (typically behind an `Arc`) by every
/// executor that runs graphs against it.
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    evaluators: HashMap<OpType, Arc<dyn NodeEvaluator>>,
}

impl EvaluatorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the reference evaluators
    ///
    /// Covers `Relu`, `Add`, `Subtract`, `Multiply`, `Accumulate`,
    /// `ReadValue` and `Assign` for every dtype.
    pub fn with_reference_ops() -> Self {
        let mut registry = Self::new();
        reference::register_all(&mut registry);
        registry
    }

    /// Register (or replace) the evaluator for `op_type`
    pub fn register<E>(&mut self, op_type: impl Into<OpType>, evaluator: E) -> &mut Self
    where
        E: NodeEvaluator + 'static,
    {
        self.evaluators.insert(op_type.into(), Arc::new(evaluator));
        self
    }

    /// Register a closure evaluator
    ///
    /// Same as [`register`](Self::register), but the closure's argument types
    /// are inferred from the evaluator signature.
    pub fn register_fn<F>(&mut self, op_type: impl Into<OpType>, f: F) -> &mut Self
    where
        F: Fn(&Node, &mut [Tensor], &[Tensor], &EvalContext) -> Result<()> + Send + Sync + 'static,
    {
        self.register(op_type, f)
    }

    /// Evaluator registered for `op_type`
    pub fn get(&self, op_type: &OpType) -> Option<&Arc<dyn NodeEvaluator>> {
        self.evaluators.get(op_type)
    }

    /// Whether an evaluator is registered for `op_type`
    pub fn contains(&self, op_type: &OpType) -> bool {
        self.evaluators.contains_key(op_type)
    }

    /// Number of registered operator types
    pub fn len(&self) -> usize {
        self.evaluators.len()
    }

    /// Whether no evaluator is registered
    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }
}

impl fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ops: Vec<&str> = self.evaluators.keys().map(OpType::as_str).collect();
        ops.sort_unstable();
        f.debug_struct("EvaluatorRegistry").field("ops", &ops).finish()
    }
}
