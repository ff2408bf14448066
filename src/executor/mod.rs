//! Graph interpreter
//!
//! [`Executor`] runs a frozen [`Graph`] against caller-supplied tensors:
//!
//! 1. Validate input and output slot counts, dtypes and shapes.
//! 2. Register zero-valued state for variables that have none yet.
//! 3. Bind parameters to the caller's inputs (aliased, not copied).
//! 4. Walk the nodes in order: gather bound inputs, allocate or reuse
//!    outputs, dispatch, bind outputs. Result nodes deliver their value into
//!    the caller's output slot.
//!
//! Dispatch follows a single rule: a node carrying an inline evaluator is
//! executed by it, every other node by the registry entry for its operator
//! type. A missing entry is a fatal [`Error::MissingEvaluator`].
//!
//! # Cancellation
//!
//! [`Executor::cancel`] (or a [`CancelHandle`]) may be called from any
//! thread. The flag is polled before and after every node; when observed,
//! the call returns [`ExecStatus::Cancelled`] with the output slots in an
//! unspecified state, and the flag is cleared.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use graphrt::prelude::*;
//!
//! let mut b = GraphBuilder::new();
//! let x = b.parameter(DType::F32, [3]);
//! let y = b.op(OpType::RELU, &[x]).unwrap();
//! b.result(y).unwrap();
//!
//! let exec = Executor::new(
//!     Arc::new(b.build().unwrap()),
//!     Arc::new(EvaluatorRegistry::with_reference_ops()),
//! );
//! let input = Tensor::from_slice(&[-1.0f32, 2.0, -3.0], &[3]).unwrap();
//! let mut outputs = vec![Tensor::default()];
//! let status = exec.execute(&mut outputs, &[input], false).unwrap();
//! assert_eq!(status, ExecStatus::Completed);
//! assert_eq!(outputs[0].to_vec::<f32>().unwrap(), vec![0.0, 2.0, 0.0]);
//! ```

mod binding;
mod cancel;
mod context;
mod shape_override;
mod stats;
mod variables;

pub use binding::TensorMap;
pub use cancel::CancelHandle;
pub use context::EvalContext;
pub use shape_override::ParameterShapeOverride;
pub use stats::{ExecStats, NodeStats};
pub use variables::VariableContext;

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::graph::{Graph, Node, TensorDesc, TensorHandle};
use crate::registry::EvaluatorRegistry;
use crate::tensor::Tensor;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// Outcome of an execution that did not fail
#[must_use]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExecStatus {
    /// Every node ran and every output slot holds its result
    Completed,
    /// Cancellation was observed; output slots are unspecified
    Cancelled,
}

impl ExecStatus {
    /// Whether the execution ran to completion
    pub fn is_completed(self) -> bool {
        self == Self::Completed
    }
}

/// Interpreter for one graph
///
/// `Executor` is `Send + Sync`; concurrent `execute` calls are allowed and
/// share the variable context, the cancellation flag and the statistics.
pub struct Executor {
    graph: Arc<Graph>,
    registry: Arc<EvaluatorRegistry>,
    config: RuntimeConfig,
    variables: Arc<VariableContext>,
    cancel: CancelHandle,
    /// Parameter index of each tensor handle that a parameter produces
    parameter_of: Vec<Option<usize>>,
    /// Output slot of each result node, by node index
    result_slot: Vec<Option<usize>>,
    parameter_table: Mutex<Vec<TensorDesc>>,
    intermediates: Mutex<Vec<Option<Tensor>>>,
    stats: Mutex<ExecStats>,
}

impl Executor {
    /// Executor with the default configuration
    pub fn new(graph: Arc<Graph>, registry: Arc<EvaluatorRegistry>) -> Self {
        Self::with_config(graph, registry, RuntimeConfig::default())
    }

    /// Executor with an explicit configuration
    pub fn with_config(
        graph: Arc<Graph>,
        registry: Arc<EvaluatorRegistry>,
        config: RuntimeConfig,
    ) -> Self {
        let mut parameter_of = vec![None; graph.tensors().len()];
        let mut parameter_table = Vec::with_capacity(graph.parameters().len());
        for (i, &id) in graph.parameters().iter().enumerate() {
            let handle = graph.node(id).outputs()[0];
            parameter_of[handle.index()] = Some(i);
            parameter_table.push(graph.tensor(handle).clone());
        }
        let mut result_slot = vec![None; graph.nodes().len()];
        for (i, &id) in graph.results().iter().enumerate() {
            result_slot[id.index()] = Some(i);
        }

        Self {
            graph,
            registry,
            config,
            variables: Arc::new(VariableContext::new()),
            cancel: CancelHandle::default(),
            parameter_of,
            result_slot,
            parameter_table: Mutex::new(parameter_table),
            intermediates: Mutex::new(Vec::new()),
            stats: Mutex::new(ExecStats::default()),
        }
    }

    /// The graph this executor runs
    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// The registry used for dispatch
    pub fn registry(&self) -> &Arc<EvaluatorRegistry> {
        &self.registry
    }

    /// Active configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Persistent variable state
    pub fn variables(&self) -> &Arc<VariableContext> {
        &self.variables
    }

    /// Drop every variable value; the next execution starts from zeros
    pub fn reset_state(&self) {
        self.variables.reset();
    }

    /// Request cancellation of the running (or next) execution
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Handle that cancels this executor from elsewhere
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Snapshot of collected statistics
    pub fn stats(&self) -> ExecStats {
        self.stats.lock().clone()
    }

    /// Forget collected statistics
    pub fn clear_stats(&self) {
        self.stats.lock().clear();
    }

    /// Allocate a zeroed tensor matching the `index`-th parameter
    pub fn create_input_tensor(&self, index: usize) -> Result<Tensor> {
        let desc = self.graph.parameter_desc(index)?;
        allocate_static(desc, || format!("parameter {index}"))
    }

    /// Allocate a zeroed tensor matching the `index`-th result
    pub fn create_output_tensor(&self, index: usize) -> Result<Tensor> {
        let desc = self.graph.result_desc(index)?;
        allocate_static(desc, || format!("result {index}"))
    }

    /// Run `f` over the parameter descriptors re-shaped to `inputs`
    ///
    /// The override is undone when `f` returns or unwinds. `f` must not call
    /// back into this method on the same executor.
    pub fn parameter_shapes_for<R>(
        &self,
        inputs: &[Tensor],
        f: impl FnOnce(&[TensorDesc]) -> R,
    ) -> R {
        let mut table = self.parameter_table.lock();
        let overridden = ParameterShapeOverride::apply(&mut table, inputs);
        f(&overridden)
    }

    /// Execute the graph with the executor's own variable context
    pub fn execute(
        &self,
        outputs: &mut [Tensor],
        inputs: &[Tensor],
        collect_stats: bool,
    ) -> Result<ExecStatus> {
        let ctx = EvalContext::new().with_variables(self.variables.clone());
        self.execute_with_context(outputs, inputs, &ctx, collect_stats)
    }

    /// Execute the graph with a caller-provided context
    ///
    /// A context without variables gets the executor's variable context.
    pub fn execute_with_context(
        &self,
        outputs: &mut [Tensor],
        inputs: &[Tensor],
        ctx: &EvalContext,
        collect_stats: bool,
    ) -> Result<ExecStatus> {
        let span = tracing::debug_span!("execute", nodes = self.graph.nodes().len());
        let _enter = span.enter();

        if self.cancel.take() {
            debug!("cancelled before start");
            return Ok(ExecStatus::Cancelled);
        }
        self.validate_io(outputs, inputs)?;

        let ctx = match ctx.variables() {
            Some(_) => Cow::Borrowed(ctx),
            None => Cow::Owned(ctx.clone().with_variables(self.variables.clone())),
        };
        if let Some(variables) = ctx.variables() {
            self.init_variables(variables, inputs);
        }

        let mut map = TensorMap::new(self.graph.tensors().len());
        for (&id, input) in self.graph.parameters().iter().zip(inputs) {
            map.bind(self.graph.node(id).outputs()[0], input.clone());
        }

        let mut cache = if self.config.reuse_intermediates {
            std::mem::take(&mut *self.intermediates.lock())
        } else {
            Vec::new()
        };
        cache.resize(self.graph.tensors().len(), None);

        let status = self.run_nodes(&mut map, &mut cache, outputs, &ctx, collect_stats);

        if self.config.reuse_intermediates {
            self.retain_intermediates(map, cache);
        }
        if matches!(status, Ok(ExecStatus::Cancelled)) {
            debug!("cancelled");
        }
        status
    }

    fn validate_io(&self, outputs: &[Tensor], inputs: &[Tensor]) -> Result<()> {
        let params = self.graph.parameters().len();
        if inputs.len() != params {
            return Err(Error::InputCountMismatch {
                expected: params,
                got: inputs.len(),
            });
        }
        let results = self.graph.results().len();
        if outputs.len() != results {
            return Err(Error::OutputCountMismatch {
                expected: results,
                got: outputs.len(),
            });
        }
        for (i, input) in inputs.iter().enumerate() {
            let desc = self.graph.parameter_desc(i)?;
            if input.dtype() != desc.dtype {
                return Err(Error::DTypeMismatch {
                    expected: desc.dtype,
                    got: input.dtype(),
                });
            }
            let shape = input.shape().unwrap_or(&[]);
            if !input.has_shape() || !desc.shape.is_compatible(shape) {
                return Err(Error::shape_mismatch(&desc.shape.extents_or_zero(), shape));
            }
        }
        Ok(())
    }

    /// Zero state for stateful nodes whose variable has no value yet
    ///
    /// The value takes the dtype and shape of the node's first input. Inputs
    /// that are neither parameters nor statically shaped are left to the
    /// operator, which initializes from the runtime tensor.
    fn init_variables(&self, variables: &VariableContext, inputs: &[Tensor]) {
        let pending: Vec<&Node> = self
            .graph
            .nodes()
            .iter()
            .filter(|n| n.variable().is_some_and(|v| !variables.contains(v)))
            .collect();
        if pending.is_empty() {
            return;
        }

        self.parameter_shapes_for(inputs, |params| {
            for node in pending {
                let (Some(id), Some(&first)) = (node.variable(), node.inputs().first()) else {
                    continue;
                };
                let desc = match self.parameter_of[first.index()] {
                    Some(p) => &params[p],
                    None => self.graph.tensor(first),
                };
                if let Some(shape) = desc.shape.to_shape() {
                    debug!(variable = id.as_str(), ?shape, "initializing variable");
                    variables.get_or_init(id, || Tensor::zeros(desc.dtype, &shape));
                }
            }
        });
    }

    fn run_nodes(
        &self,
        map: &mut TensorMap,
        cache: &mut [Option<Tensor>],
        outputs: &mut [Tensor],
        ctx: &EvalContext,
        collect_stats: bool,
    ) -> Result<ExecStatus> {
        for node in self.graph.nodes() {
            if self.cancel.take() {
                return Ok(ExecStatus::Cancelled);
            }
            if node.is_parameter() {
                continue;
            }

            let inputs: SmallVec<[Tensor; 4]> = node
                .inputs()
                .iter()
                .map(|&h| map.get(h).cloned())
                .collect::<Result<_>>()?;

            if node.is_result() {
                let value = inputs[0].clone();
                if let Some(slot) = self.result_slot[node.id().index()] {
                    deliver(&mut outputs[slot], &value)?;
                }
                map.bind(node.outputs()[0], value);
                continue;
            }

            let mut produced: SmallVec<[Tensor; 2]> = node
                .outputs()
                .iter()
                .map(|&h| self.allocate(h, cache))
                .collect();

            trace!(node = node.id().index(), op = %node.op_type(), "evaluate");
            let start = collect_stats.then(Instant::now);
            self.dispatch(node, &mut produced, &inputs, ctx)?;
            if let Some(start) = start {
                self.stats.lock().record(node, start.elapsed());
            }

            for (index, (&handle, tensor)) in node.outputs().iter().zip(produced).enumerate() {
                if !tensor.has_shape() {
                    return Err(Error::UnresolvedShape {
                        op_type: node.op_type().to_string(),
                        index,
                    });
                }
                let expected = self.graph.tensor(handle).dtype;
                if tensor.dtype() != expected {
                    return Err(Error::DTypeMismatch {
                        expected,
                        got: tensor.dtype(),
                    });
                }
                map.bind(handle, tensor);
            }

            if self.cancel.take() {
                return Ok(ExecStatus::Cancelled);
            }
        }
        Ok(ExecStatus::Completed)
    }

    fn dispatch(
        &self,
        node: &Node,
        outputs: &mut [Tensor],
        inputs: &[Tensor],
        ctx: &EvalContext,
    ) -> Result<()> {
        if let Some(inline) = node.evaluator() {
            return inline.evaluate(node, outputs, inputs, ctx);
        }
        let evaluator = self
            .registry
            .get(node.op_type())
            .ok_or_else(|| Error::MissingEvaluator {
                op_type: node.op_type().to_string(),
            })?;
        evaluator.evaluate(node, outputs, inputs, ctx)
    }

    /// Output tensor for `handle`: last call's buffer when it still fits and
    /// nobody else holds it, otherwise a fresh one
    fn allocate(&self, handle: TensorHandle, cache: &mut [Option<Tensor>]) -> Tensor {
        let desc = self.graph.tensor(handle);
        let static_shape = desc.shape.to_shape();

        if let Some(cached) = cache.get_mut(handle.index()).and_then(Option::take) {
            let fits = cached.dtype() == desc.dtype
                && cached.is_exclusive()
                && static_shape
                    .as_deref()
                    .map_or(true, |s| cached.shape() == Some(s));
            if fits {
                return cached;
            }
        }

        match static_shape {
            Some(shape) => Tensor::zeros(desc.dtype, &shape),
            None => Tensor::unshaped(desc.dtype),
        }
    }

    /// Keep this call's intermediates for the next call
    ///
    /// Parameter bindings belong to the caller and result bindings alias
    /// other entries; neither is retained.
    fn retain_intermediates(&self, map: TensorMap, mut cache: Vec<Option<Tensor>>) {
        for (index, slot) in map.into_slots().into_iter().enumerate() {
            if self.parameter_of[index].is_some() {
                continue;
            }
            if let Some(tensor) = slot {
                cache[index] = Some(tensor);
            }
        }
        for &id in self.graph.results() {
            cache[self.graph.node(id).outputs()[0].index()] = None;
        }
        *self.intermediates.lock() = cache;
    }
}

/// Hand a result value to the caller's output slot
///
/// An empty slot, or one whose shape or dtype differs, receives the value
/// itself; a matching slot keeps its buffer and receives a copy.
fn deliver(slot: &mut Tensor, value: &Tensor) -> Result<()> {
    if !slot.has_shape() || slot.shape() != value.shape() || slot.dtype() != value.dtype() {
        *slot = value.clone();
        Ok(())
    } else {
        slot.copy_from(value)
    }
}

fn allocate_static(desc: &TensorDesc, name: impl FnOnce() -> String) -> Result<Tensor> {
    let shape = desc
        .shape
        .to_shape()
        .ok_or_else(|| Error::DynamicShape { tensor: name() })?;
    Ok(Tensor::zeros(desc.dtype, &shape))
}
