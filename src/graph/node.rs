//! Operator nodes and tensor descriptors

use crate::dtype::DType;
use crate::registry::NodeEvaluator;
use crate::tensor::PartialShape;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Index of a tensor descriptor in its graph's arena
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorHandle(pub(crate) u32);

impl TensorHandle {
    /// Arena index
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Position of a node in its graph's execution order
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Position in execution order
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Operator type identity used for evaluator dispatch
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpType(Cow<'static, str>);

impl OpType {
    /// Graph input; bound to a caller-supplied tensor
    pub const PARAMETER: OpType = OpType::from_static("Parameter");
    /// Graph output; forwards its input to a caller output slot
    pub const RESULT: OpType = OpType::from_static("Result");
    /// Elementwise `max(x, 0)`
    pub const RELU: OpType = OpType::from_static("Relu");
    /// Broadcasting addition
    pub const ADD: OpType = OpType::from_static("Add");
    /// Broadcasting subtraction
    pub const SUBTRACT: OpType = OpType::from_static("Subtract");
    /// Broadcasting multiplication
    pub const MULTIPLY: OpType = OpType::from_static("Multiply");
    /// Stateful running sum held in a variable
    pub const ACCUMULATE: OpType = OpType::from_static("Accumulate");
    /// Reads a variable
    pub const READ_VALUE: OpType = OpType::from_static("ReadValue");
    /// Overwrites a variable
    pub const ASSIGN: OpType = OpType::from_static("Assign");
    /// Cluster of operators executed as one generated kernel
    pub const FUSED_SUBGRAPH: OpType = OpType::from_static("Subgraph");

    /// Operator type from a static name
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Operator type from any name
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Name of the operator type
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for OpType {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

/// Identity of a persistent variable read and written by stateful operators
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct VariableId(Arc<str>);

impl VariableId {
    /// Variable identity from a name
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// Variable name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// Graph-level description of a tensor; never owns data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorDesc {
    /// Element type
    pub dtype: DType,
    /// Rank is always known; extents may be dynamic
    pub shape: PartialShape,
}

impl TensorDesc {
    /// Descriptor from a dtype and (partial) shape
    pub fn new(dtype: DType, shape: impl Into<PartialShape>) -> Self {
        Self {
            dtype,
            shape: shape.into(),
        }
    }
}

/// One operator in a graph
///
/// Nodes are immutable once the graph is built. The output handles are
/// owned by the node: every tensor descriptor has exactly one producer.
#[derive(Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) op_type: OpType,
    pub(crate) name: Option<String>,
    pub(crate) inputs: SmallVec<[TensorHandle; 4]>,
    pub(crate) outputs: SmallVec<[TensorHandle; 2]>,
    pub(crate) variable: Option<VariableId>,
    pub(crate) evaluator: Option<Arc<dyn NodeEvaluator>>,
}

impl Node {
    /// Position in execution order
    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Operator type identity
    #[inline]
    pub fn op_type(&self) -> &OpType {
        &self.op_type
    }

    /// Optional debug name
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Input tensor handles in operand order
    #[inline]
    pub fn inputs(&self) -> &[TensorHandle] {
        &self.inputs
    }

    /// Output tensor handles in result order
    #[inline]
    pub fn outputs(&self) -> &[TensorHandle] {
        &self.outputs
    }

    /// Variable used by a stateful operator
    #[inline]
    pub fn variable(&self) -> Option<&VariableId> {
        self.variable.as_ref()
    }

    /// Inline evaluator carried by the node, if any
    #[inline]
    pub fn evaluator(&self) -> Option<&Arc<dyn NodeEvaluator>> {
        self.evaluator.as_ref()
    }

    /// Whether this node binds a caller-supplied input
    #[inline]
    pub fn is_parameter(&self) -> bool {
        self.op_type == OpType::PARAMETER
    }

    /// Whether this node forwards a value to a caller output slot
    #[inline]
    pub fn is_result(&self) -> bool {
        self.op_type == OpType::RESULT
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id.0)
            .field("op_type", &self.op_type)
            .field("inputs", &self.inputs.as_slice())
            .field("outputs", &self.outputs.as_slice())
            .field("variable", &self.variable)
            .field("inline", &self.evaluator.is_some())
            .finish()
    }
}

/// Everything needed to append a node to a [`GraphBuilder`](super::GraphBuilder)
pub struct NodeSpec {
    pub(crate) op_type: OpType,
    pub(crate) name: Option<String>,
    pub(crate) inputs: Vec<TensorHandle>,
    pub(crate) outputs: Vec<TensorDesc>,
    pub(crate) variable: Option<VariableId>,
    pub(crate) evaluator: Option<Arc<dyn NodeEvaluator>>,
}

impl NodeSpec {
    /// Start a node of the given operator type
    pub fn new(op_type: impl Into<OpType>) -> Self {
        Self {
            op_type: op_type.into(),
            name: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            variable: None,
            evaluator: None,
        }
    }

    /// Debug name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append input operands
    pub fn inputs(mut self, handles: &[TensorHandle]) -> Self {
        self.inputs.extend_from_slice(handles);
        self
    }

    /// Append an output descriptor
    pub fn output(mut self, desc: TensorDesc) -> Self {
        self.outputs.push(desc);
        self
    }

    /// Attach a persistent variable
    pub fn variable(mut self, id: VariableId) -> Self {
        self.variable = Some(id);
        self
    }

    /// Attach an inline evaluator that replaces registry dispatch
    pub fn evaluator(mut self, evaluator: Arc<dyn NodeEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }
}
