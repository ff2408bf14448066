//! Incremental graph construction

use super::node::{Node, NodeId, NodeSpec, OpType, TensorDesc, TensorHandle};
use super::Graph;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::tensor::PartialShape;

/// Appends nodes in execution order and freezes them into a [`Graph`]
///
/// Every tensor handle is created by the node that produces it, so a graph
/// built only through this builder is topologically ordered by construction.
/// Handles from another builder are rejected.
///
/// # Example
///
/// ```
/// use graphrt::dtype::DType;
/// use graphrt::graph::{GraphBuilder, OpType};
///
/// let mut b = GraphBuilder::new();
/// let x = b.parameter(DType::F32, [4]);
/// let y = b.op(OpType::RELU, &[x]).unwrap();
/// b.result(y).unwrap();
/// let graph = b.build().unwrap();
/// assert_eq!(graph.nodes().len(), 3);
/// ```
#[derive(Default)]
pub struct GraphBuilder {
    tensors: Vec<TensorDesc>,
    nodes: Vec<Node>,
}

impl GraphBuilder {
    /// Empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a graph input
    pub fn parameter(&mut self, dtype: DType, shape: impl Into<PartialShape>) -> TensorHandle {
        let handle = self.push_tensor(TensorDesc::new(dtype, shape));
        self.push_node(NodeSpec::new(OpType::PARAMETER), vec![handle]);
        handle
    }

    /// Add a graph output forwarding `value`; returns the result's own handle
    pub fn result(&mut self, value: TensorHandle) -> Result<TensorHandle> {
        let desc = self.desc(value)?.clone();
        let outputs = self.add(NodeSpec::new(OpType::RESULT).inputs(&[value]).output(desc))?;
        Ok(outputs[0])
    }

    /// Add a single-output node whose output mirrors its first input
    ///
    /// Shorthand for elementwise operators: the output has the dtype of the
    /// first input and the broadcast of all input shapes when they are
    /// static, otherwise a dynamic shape of the highest input rank.
    pub fn op(&mut self, op_type: impl Into<OpType>, inputs: &[TensorHandle]) -> Result<TensorHandle> {
        let first = inputs.first().ok_or(Error::InvalidArgument {
            arg: "inputs",
            reason: "at least one input is required".into(),
        })?;
        let dtype = self.desc(*first)?.dtype;
        let shape = self.broadcast_desc_shapes(inputs)?;
        let outputs = self.add(
            NodeSpec::new(op_type)
                .inputs(inputs)
                .output(TensorDesc::new(dtype, shape)),
        )?;
        Ok(outputs[0])
    }

    /// Append an arbitrary node; returns its output handles in order
    pub fn add(&mut self, spec: NodeSpec) -> Result<Vec<TensorHandle>> {
        if spec.op_type == OpType::PARAMETER {
            return Err(Error::InvalidGraph {
                reason: "parameters are added with GraphBuilder::parameter".into(),
            });
        }
        for &input in &spec.inputs {
            self.desc(input)?;
        }
        let handles: Vec<TensorHandle> = spec
            .outputs
            .iter()
            .map(|desc| self.push_tensor(desc.clone()))
            .collect();
        self.push_node(spec, handles.clone());
        Ok(handles)
    }

    /// Descriptor of a handle created by this builder
    pub fn desc(&self, handle: TensorHandle) -> Result<&TensorDesc> {
        self.tensors
            .get(handle.index())
            .ok_or_else(|| Error::InvalidGraph {
                reason: format!("tensor {handle} does not belong to this graph"),
            })
    }

    /// Validate and freeze
    pub fn build(self) -> Result<Graph> {
        Graph::from_parts(self.tensors, self.nodes)
    }

    fn push_tensor(&mut self, desc: TensorDesc) -> TensorHandle {
        let handle = TensorHandle(self.tensors.len() as u32);
        self.tensors.push(desc);
        handle
    }

    fn push_node(&mut self, spec: NodeSpec, outputs: Vec<TensorHandle>) {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            op_type: spec.op_type,
            name: spec.name,
            inputs: spec.inputs.into_iter().collect(),
            outputs: outputs.into_iter().collect(),
            variable: spec.variable,
            evaluator: spec.evaluator,
        });
    }

    fn broadcast_desc_shapes(&self, inputs: &[TensorHandle]) -> Result<PartialShape> {
        let mut rank = 0;
        let mut acc: Option<crate::tensor::Shape> = Some(crate::tensor::Shape::new());
        for &input in inputs {
            let desc = self.desc(input)?;
            rank = rank.max(desc.shape.rank());
            acc = match (acc, desc.shape.to_shape()) {
                (Some(a), Some(s)) => Some(crate::tensor::broadcast_shapes(&a, &s)?),
                _ => None,
            };
        }
        Ok(match acc {
            Some(shape) => PartialShape::from(&shape),
            None => PartialShape::dynamic(rank),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Dim;

    #[test]
    fn test_op_broadcasts_static_shapes() {
        let mut b = GraphBuilder::new();
        let x = b.parameter(DType::F32, [2, 3]);
        let y = b.parameter(DType::F32, [1, 3]);
        let z = b.op(OpType::ADD, &[x, y]).unwrap();
        assert_eq!(b.desc(z).unwrap().shape, PartialShape::from([2, 3]));
    }

    #[test]
    fn test_op_dynamic_input_gives_dynamic_output() {
        let mut b = GraphBuilder::new();
        let x = b.parameter(DType::F32, [Dim::Dynamic, Dim::Static(3)]);
        let z = b.op(OpType::RELU, &[x]).unwrap();
        assert_eq!(b.desc(z).unwrap().shape, PartialShape::dynamic(2));
    }

    #[test]
    fn test_incompatible_static_shapes_rejected() {
        let mut b = GraphBuilder::new();
        let x = b.parameter(DType::F32, [2]);
        let y = b.parameter(DType::F32, [3]);
        assert!(matches!(
            b.op(OpType::ADD, &[x, y]),
            Err(Error::BroadcastError { .. })
        ));
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let mut other = GraphBuilder::new();
        other.parameter(DType::F32, [1]);
        let foreign = other.parameter(DType::F32, [1]);

        let mut b = GraphBuilder::new();
        b.parameter(DType::F32, [1]);
        assert!(matches!(b.result(foreign), Err(Error::InvalidGraph { .. })));
    }

    #[test]
    fn test_build_collects_parameters_and_results() {
        let mut b = GraphBuilder::new();
        let x = b.parameter(DType::I32, [4]);
        let y = b.parameter(DType::I32, [4]);
        let s = b.op(OpType::ADD, &[x, y]).unwrap();
        b.result(s).unwrap();
        b.result(x).unwrap();
        let g = b.build().unwrap();
        assert_eq!(g.parameters().len(), 2);
        assert_eq!(g.results().len(), 2);
        assert_eq!(g.result_desc(1).unwrap().dtype, DType::I32);
    }
}
