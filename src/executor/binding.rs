//! Call-scoped binding of graph tensors to runtime tensors

use crate::error::{Error, Result};
use crate::graph::TensorHandle;
use crate::tensor::Tensor;

/// Runtime tensor bound to each graph tensor during one execution
///
/// Indexed by [`TensorHandle`]. Entries are filled as nodes run and dropped
/// (or handed to the intermediate cache) when the call ends.
pub struct TensorMap {
    slots: Vec<Option<Tensor>>,
}

impl TensorMap {
    /// Empty map for a graph with `len` tensors
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
        }
    }

    /// Bind `tensor` to `handle`, replacing any earlier binding
    pub fn bind(&mut self, handle: TensorHandle, tensor: Tensor) {
        self.slots[handle.index()] = Some(tensor);
    }

    /// Tensor bound to `handle`
    pub fn get(&self, handle: TensorHandle) -> Result<&Tensor> {
        self.slots
            .get(handle.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::UnboundTensor {
                tensor: handle.to_string(),
            })
    }

    /// Whether `handle` is bound
    pub fn contains(&self, handle: TensorHandle) -> bool {
        matches!(self.slots.get(handle.index()), Some(Some(_)))
    }

    /// Consume the map, yielding bindings by handle
    pub fn into_slots(self) -> Vec<Option<Tensor>> {
        self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    #[test]
    fn test_unbound_is_error() {
        let mut map = TensorMap::new(2);
        map.bind(TensorHandle(0), Tensor::zeros(DType::F32, &[1]));
        assert!(map.contains(TensorHandle(0)));
        assert!(map.get(TensorHandle(0)).is_ok());
        assert!(matches!(
            map.get(TensorHandle(1)),
            Err(Error::UnboundTensor { .. })
        ));
        assert!(map.get(TensorHandle(9)).is_err());
    }
}
