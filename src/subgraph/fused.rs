//! Fused subgraph operator

use super::descriptor::SubgraphDescriptor;
use super::kernel::FusedKernel;
use super::planner::{DomainPlanner, PlanCache};
use super::scheduler::{PortBuffers, SubgraphScheduler};
use crate::error::{Error, Result};
use crate::executor::{EvalContext, ExecStatus, Executor};
use crate::graph::{Graph, Node, NodeSpec, OpType, TensorHandle};
use crate::registry::{EvaluatorRegistry, NodeEvaluator};
use crate::tensor::{BytesMut, BytesRef, Shape, Tensor, broadcast_shapes};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// A cluster of elementwise operators executed as one node
///
/// With a compiled [`FusedKernel`] the node plans the broadcast domain of
/// its inputs and runs the kernel over it on the shared
/// [`SubgraphScheduler`]. Without one, the body graph is interpreted by a
/// nested [`Executor`]; both paths write the same outputs.
///
/// Every output takes the broadcast shape of all inputs.
pub struct FusedSubgraph {
    body: Arc<Graph>,
    kernel: Option<Arc<dyn FusedKernel>>,
    scheduler: Arc<SubgraphScheduler>,
    planner: DomainPlanner,
    plans: PlanCache,
    interpreter: Executor,
}

impl FusedSubgraph {
    /// Subgraph over `body`, interpreted with `registry` until a kernel is set
    pub fn new(
        body: Arc<Graph>,
        registry: Arc<EvaluatorRegistry>,
        scheduler: Arc<SubgraphScheduler>,
    ) -> Self {
        let planner = DomainPlanner::new(scheduler.config());
        let interpreter = Executor::with_config(body.clone(), registry, scheduler.config().clone());
        Self {
            body,
            kernel: None,
            scheduler,
            planner,
            plans: PlanCache::new(),
            interpreter,
        }
    }

    /// Attach the compiled kernel
    pub fn with_kernel(mut self, kernel: Arc<dyn FusedKernel>) -> Self {
        self.kernel = Some(kernel);
        self
    }

    /// Whether a compiled kernel is attached
    pub fn available(&self) -> bool {
        self.kernel.is_some()
    }

    /// The body graph
    pub fn body(&self) -> &Arc<Graph> {
        &self.body
    }

    /// Node running this subgraph on `inputs`, with the body's result
    /// descriptors as outputs
    pub fn node_spec(self: &Arc<Self>, inputs: &[TensorHandle]) -> Result<NodeSpec> {
        let mut spec = NodeSpec::new(OpType::FUSED_SUBGRAPH)
            .inputs(inputs)
            .evaluator(self.clone());
        for index in 0..self.body.results().len() {
            spec = spec.output(self.body.result_desc(index)?.clone());
        }
        Ok(spec)
    }

    /// Same checks the interpreted body applies, so both paths accept the
    /// same inputs
    fn check_io(&self, outputs: &[Tensor], inputs: &[Tensor]) -> Result<()> {
        let params = self.body.parameters().len();
        if inputs.len() != params {
            return Err(Error::InputCountMismatch {
                expected: params,
                got: inputs.len(),
            });
        }
        let results = self.body.results().len();
        if outputs.len() != results {
            return Err(Error::OutputCountMismatch {
                expected: results,
                got: outputs.len(),
            });
        }
        for (index, input) in inputs.iter().enumerate() {
            let desc = self.body.parameter_desc(index)?;
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

    fn interpret(&self, outputs: &mut [Tensor], inputs: &[Tensor], ctx: &EvalContext) -> Result<()> {
        match self.interpreter.execute_with_context(outputs, inputs, ctx, false)? {
            ExecStatus::Completed => Ok(()),
            ExecStatus::Cancelled => Err(Error::Internal("subgraph body was cancelled".into())),
        }
    }

    fn run_kernel(&self, kernel: &dyn FusedKernel, outputs: &[Tensor], inputs: &[Tensor]) -> Result<()> {
        let desc = SubgraphDescriptor::from_tensors(inputs, outputs)?;
        let plan = self.plans.get_or_plan(&self.planner, &desc)?;

        let locks = BufferLocks::acquire(inputs, outputs)?;
        let buffers = locks.port_buffers(inputs, outputs);
        // SAFETY: every buffer is locked for the duration of the run and
        // holds at least the dense extent of the shape it was planned with.
        unsafe { self.scheduler.run(kernel, &plan, &buffers) }
    }
}

impl NodeEvaluator for FusedSubgraph {
    fn evaluate(
        &self,
        node: &Node,
        outputs: &mut [Tensor],
        inputs: &[Tensor],
        ctx: &EvalContext,
    ) -> Result<()> {
        self.check_io(outputs, inputs)?;
        let shape = broadcast_inputs(inputs)?;
        for output in outputs.iter_mut() {
            output.resize(&shape);
        }

        match &self.kernel {
            Some(kernel) => self.run_kernel(kernel.as_ref(), outputs, inputs),
            None => {
                warn!(op = %node.op_type(), name = node.name(), "no fused kernel, interpreting subgraph body");
                self.interpret(outputs, inputs, ctx)
            }
        }
    }
}

impl fmt::Debug for FusedSubgraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FusedSubgraph")
            .field("nodes", &self.body.nodes().len())
            .field("available", &self.available())
            .finish()
    }
}

fn broadcast_inputs(inputs: &[Tensor]) -> Result<Shape> {
    let mut shape = Shape::new();
    for input in inputs {
        shape = broadcast_shapes(&shape, input.resolved_shape()?)?;
    }
    Ok(shape)
}

/// Locks over the distinct buffers of a run
///
/// A buffer shared by several ports is locked once, for writing if any
/// output uses it.
struct BufferLocks<'a> {
    _writes: SmallVec<[BytesMut<'a>; 4]>,
    _reads: SmallVec<[BytesRef<'a>; 8]>,
    addresses: SmallVec<[(usize, usize); 8]>,
}

impl<'a> BufferLocks<'a> {
    fn acquire(inputs: &'a [Tensor], outputs: &'a [Tensor]) -> Result<Self> {
        let mut locks = Self {
            _writes: SmallVec::new(),
            _reads: SmallVec::new(),
            addresses: SmallVec::new(),
        };
        for output in outputs {
            if locks.contains(output) {
                continue;
            }
            let mut bytes = output.bytes_mut();
            check_len(output, bytes.len())?;
            locks.addresses.push((output.storage().key(), bytes.as_mut_ptr() as usize));
            locks._writes.push(bytes);
        }
        for input in inputs {
            if locks.contains(input) {
                continue;
            }
            let bytes = input.bytes();
            check_len(input, bytes.len())?;
            locks.addresses.push((input.storage().key(), bytes.as_ptr() as usize));
            locks._reads.push(bytes);
        }
        Ok(locks)
    }

    fn contains(&self, tensor: &Tensor) -> bool {
        self.address(tensor).is_some()
    }

    fn address(&self, tensor: &Tensor) -> Option<usize> {
        let key = tensor.storage().key();
        self.addresses.iter().find(|(k, _)| *k == key).map(|&(_, a)| a)
    }

    fn port_buffers(&self, inputs: &[Tensor], outputs: &[Tensor]) -> PortBuffers {
        let ins: SmallVec<[*const u8; 8]> = inputs
            .iter()
            .map(|t| self.address(t).unwrap_or(0) as *const u8)
            .collect();
        let outs: SmallVec<[*mut u8; 4]> = outputs
            .iter()
            .map(|t| self.address(t).unwrap_or(0) as *mut u8)
            .collect();
        PortBuffers::new(&ins, &outs)
    }
}

fn check_len(tensor: &Tensor, len: usize) -> Result<()> {
    if len < tensor.nbytes() {
        return Err(Error::Internal(format!(
            "buffer of {len} bytes is too small for {tensor}"
        )));
    }
    Ok(())
}
