//! Frozen, topologically ordered operator graphs
//!
//! A [`Graph`] is an arena of [`TensorDesc`]s plus an ordered list of
//! [`Node`]s. Tensors and nodes refer to each other by index
//! ([`TensorHandle`], [`NodeId`]), so the graph is a plain value that can be
//! shared behind an `Arc` by any number of executors.
//!
//! Graphs are assembled with [`GraphBuilder`] and validated once in
//! [`GraphBuilder::build`] / [`Graph::from_parts`]: every input of a node
//! must be produced by an earlier node, every tensor has exactly one
//! producer, parameters have no inputs and results forward exactly one
//! value. After that nothing is mutated.

mod builder;
mod node;

pub use builder::GraphBuilder;
pub use node::{Node, NodeId, NodeSpec, OpType, TensorDesc, TensorHandle, VariableId};

use crate::error::{Error, Result};

/// Immutable operator graph in execution order
#[derive(Clone, Debug)]
pub struct Graph {
    tensors: Vec<TensorDesc>,
    nodes: Vec<Node>,
    parameters: Vec<NodeId>,
    results: Vec<NodeId>,
}

impl Graph {
    /// Assemble a graph from an arena and an ordered node list, validating it
    ///
    /// Node ids are reassigned from list positions. Parameters and results
    /// are collected in node order.
    pub fn from_parts(tensors: Vec<TensorDesc>, mut nodes: Vec<Node>) -> Result<Self> {
        let mut producer: Vec<Option<usize>> = vec![None; tensors.len()];
        let mut parameters = Vec::new();
        let mut results = Vec::new();

        for (pos, node) in nodes.iter_mut().enumerate() {
            node.id = NodeId(pos as u32);

            for &input in &node.inputs {
                match producer.get(input.index()) {
                    None => {
                        return Err(invalid(format!(
                            "node {pos} ({}) reads unknown tensor {input}",
                            node.op_type
                        )));
                    }
                    Some(None) => {
                        return Err(invalid(format!(
                            "node {pos} ({}) reads {input} before it is produced",
                            node.op_type
                        )));
                    }
                    Some(Some(_)) => {}
                }
            }

            for &output in &node.outputs {
                let slot = producer.get_mut(output.index()).ok_or_else(|| {
                    invalid(format!("node {pos} writes unknown tensor {output}"))
                })?;
                if let Some(prev) = slot {
                    return Err(invalid(format!(
                        "tensor {output} produced by nodes {prev} and {pos}"
                    )));
                }
                *slot = Some(pos);
            }

            if node.is_parameter() {
                if !node.inputs.is_empty() || node.outputs.len() != 1 {
                    return Err(invalid(format!(
                        "parameter node {pos} must have no inputs and one output"
                    )));
                }
                parameters.push(node.id);
            } else if node.is_result() {
                if node.inputs.len() != 1 || node.outputs.len() != 1 {
                    return Err(invalid(format!(
                        "result node {pos} must have one input and one output"
                    )));
                }
                let src = &tensors[node.inputs[0].index()];
                let dst = &tensors[node.outputs[0].index()];
                if src.dtype != dst.dtype {
                    return Err(invalid(format!(
                        "result node {pos} changes dtype {} to {}",
                        src.dtype, dst.dtype
                    )));
                }
                results.push(node.id);
            }
        }

        if let Some(t) = producer.iter().position(Option::is_none) {
            return Err(invalid(format!("tensor %{t} has no producer")));
        }

        Ok(Self {
            tensors,
            nodes,
            parameters,
            results,
        })
    }

    /// Nodes in execution order
    #[inline]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Node by id
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// All tensor descriptors, indexed by handle
    #[inline]
    pub fn tensors(&self) -> &[TensorDesc] {
        &self.tensors
    }

    /// Descriptor of a tensor
    pub fn tensor(&self, handle: TensorHandle) -> &TensorDesc {
        &self.tensors[handle.index()]
    }

    /// Parameter nodes in input order
    #[inline]
    pub fn parameters(&self) -> &[NodeId] {
        &self.parameters
    }

    /// Result nodes in output order
    #[inline]
    pub fn results(&self) -> &[NodeId] {
        &self.results
    }

    /// Descriptor of the `index`-th parameter
    pub fn parameter_desc(&self, index: usize) -> Result<&TensorDesc> {
        let id = self.parameters.get(index).ok_or(Error::IndexOutOfBounds {
            index,
            size: self.parameters.len(),
        })?;
        Ok(self.tensor(self.node(*id).outputs[0]))
    }

    /// Descriptor of the `index`-th result
    pub fn result_desc(&self, index: usize) -> Result<&TensorDesc> {
        let id = self.results.get(index).ok_or(Error::IndexOutOfBounds {
            index,
            size: self.results.len(),
        })?;
        Ok(self.tensor(self.node(*id).outputs[0]))
    }
}

fn invalid(reason: String) -> Error {
    Error::InvalidGraph { reason }
}
