//! Error types for graphrt

use crate::dtype::DType;
use thiserror::Error;

/// Result type alias using graphrt's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or executing graphs and subgraphs
///
/// Every variant is fatal for the call (or construction) that produced it.
/// Cancellation is not an error; see
/// [`ExecStatus`](crate::executor::ExecStatus).
#[derive(Error, Debug)]
pub enum Error {
    /// Shape mismatch between a descriptor and a supplied tensor
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape (dynamic dims reported as 0)
        expected: Vec<usize>,
        /// Actual shape
        got: Vec<usize>,
    },

    /// Shapes cannot be broadcast together
    #[error("Cannot broadcast shapes {lhs:?} and {rhs:?}")]
    BroadcastError {
        /// Left-hand side shape
        lhs: Vec<usize>,
        /// Right-hand side shape
        rhs: Vec<usize>,
    },

    /// Unsupported dtype for an operation
    #[error("Unsupported dtype {dtype:?} for operation '{op}'")]
    UnsupportedDType {
        /// The unsupported dtype
        dtype: DType,
        /// The operation name
        op: &'static str,
    },

    /// DType mismatch between a descriptor and a supplied tensor
    #[error("DType mismatch: expected {expected:?}, got {got:?}")]
    DTypeMismatch {
        /// Expected dtype
        expected: DType,
        /// Actual dtype
        got: DType,
    },

    /// No evaluator registered for an operator type
    #[error("No evaluator registered for operator type '{op_type}'")]
    MissingEvaluator {
        /// Operator type identity
        op_type: String,
    },

    /// Canonical rank exceeds what the subgraph scheduler supports
    #[error("Rank {rank} exceeds the supported maximum of {max}")]
    UnsupportedRank {
        /// Requested rank
        rank: usize,
        /// Supported maximum
        max: usize,
    },

    /// Number of supplied inputs differs from the graph's parameter count
    #[error("Expected {expected} inputs, got {got}")]
    InputCountMismatch {
        /// Parameter count
        expected: usize,
        /// Supplied input count
        got: usize,
    },

    /// Number of output slots differs from the graph's result count
    #[error("Expected {expected} output slots, got {got}")]
    OutputCountMismatch {
        /// Result count
        expected: usize,
        /// Supplied slot count
        got: usize,
    },

    /// Boundary tensors of a fused subgraph disagree on memory order
    #[error("Memory order {got:?} of port {port} is incompatible with {expected:?}")]
    LayoutMismatch {
        /// Port index (inputs first, then outputs)
        port: usize,
        /// Order shared by the full-rank ports, identity for lower-rank ones
        expected: Vec<usize>,
        /// Order declared by this port
        got: Vec<usize>,
    },

    /// Graph construction violated a structural invariant
    #[error("Invalid graph: {reason}")]
    InvalidGraph {
        /// What was violated
        reason: String,
    },

    /// Invalid argument provided to an operation
    #[error("Invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// The argument name
        arg: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// A static shape was required but the descriptor is dynamic
    #[error("Tensor {tensor} has a dynamic shape")]
    DynamicShape {
        /// Tensor name or handle
        tensor: String,
    },

    /// An operator left one of its outputs without a shape
    #[error("Operator '{op_type}' did not resolve the shape of output {index}")]
    UnresolvedShape {
        /// Operator type identity
        op_type: String,
        /// Output index
        index: usize,
    },

    /// A tensor was read before any node produced it
    #[error("Tensor {tensor} is not bound")]
    UnboundTensor {
        /// Tensor handle
        tensor: String,
    },

    /// Index out of bounds
    #[error("Index {index} out of bounds for {size} entries")]
    IndexOutOfBounds {
        /// The invalid index
        index: usize,
        /// Number of entries
        size: usize,
    },

    /// The evaluator of an operator failed
    #[error("Evaluation of '{op_type}' failed: {reason}")]
    EvaluationFailed {
        /// Operator type identity
        op_type: String,
        /// Failure description
        reason: String,
    },

    /// A generated kernel reported an internal error
    #[error("Kernel execution failed: {0}")]
    KernelFailed(#[from] crate::subgraph::KernelError),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// Create a broadcast error
    pub fn broadcast(lhs: &[usize], rhs: &[usize]) -> Self {
        Self::BroadcastError {
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
        }
    }

    /// Create an unsupported dtype error
    pub fn unsupported_dtype(dtype: DType, op: &'static str) -> Self {
        Self::UnsupportedDType { dtype, op }
    }

    /// Create an evaluation failure for an operator
    pub fn evaluation(op_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EvaluationFailed {
            op_type: op_type.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a configuration error (detected before any math runs)
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingEvaluator { .. }
                | Self::UnsupportedRank { .. }
                | Self::InputCountMismatch { .. }
                | Self::OutputCountMismatch { .. }
                | Self::LayoutMismatch { .. }
                | Self::InvalidGraph { .. }
                | Self::InvalidArgument { .. }
                | Self::DynamicShape { .. }
        )
    }

    /// Whether this error is a shape error
    pub fn is_shape(&self) -> bool {
        matches!(
            self,
            Self::ShapeMismatch { .. }
                | Self::BroadcastError { .. }
                | Self::UnresolvedShape { .. }
                | Self::DTypeMismatch { .. }
                | Self::UnsupportedDType { .. }
        )
    }
}
