//! Persistent variable state for stateful operators

use crate::graph::VariableId;
use crate::tensor::Tensor;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Table of variable values that outlives individual executions
///
/// Each value sits behind its own mutex, so stateful operators touching
/// different variables never contend, while two writers of the same variable
/// are serialized.
#[derive(Default)]
pub struct VariableContext {
    values: RwLock<HashMap<VariableId, Arc<Mutex<Tensor>>>>,
}

impl VariableContext {
    /// Empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a value exists for `id`
    pub fn contains(&self, id: &VariableId) -> bool {
        self.values.read().contains_key(id)
    }

    /// Handle to the value of `id`
    pub fn get(&self, id: &VariableId) -> Option<Arc<Mutex<Tensor>>> {
        self.values.read().get(id).cloned()
    }

    /// Handle to the value of `id`, registering `init()` if absent
    pub fn get_or_init(&self, id: &VariableId, init: impl FnOnce() -> Tensor) -> Arc<Mutex<Tensor>> {
        if let Some(value) = self.get(id) {
            return value;
        }
        let mut values = self.values.write();
        values
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(init())))
            .clone()
    }

    /// Replace (or create) the value of `id`
    pub fn set(&self, id: &VariableId, value: Tensor) {
        let mut values = self.values.write();
        match values.get(id) {
            Some(slot) => *slot.lock() = value,
            None => {
                values.insert(id.clone(), Arc::new(Mutex::new(value)));
            }
        }
    }

    /// Independent copy of the current value of `id`
    pub fn snapshot(&self, id: &VariableId) -> Option<Tensor> {
        let value = self.get(id)?;
        let guard: MutexGuard<'_, Tensor> = value.lock();
        Some(guard.deep_clone())
    }

    /// Number of variables holding a value
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether no variable holds a value
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Drop every value; the next execution re-initializes them
    pub fn reset(&self) {
        self.values.write().clear();
    }
}

impl fmt::Debug for VariableContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.values.read();
        let mut ids: Vec<&str> = values.keys().map(VariableId::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("VariableContext").field("variables", &ids).finish()
    }
}
