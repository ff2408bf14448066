//! Evaluation context handed to every evaluator

use super::VariableContext;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Per-call context visible to evaluators
///
/// Carries the variable context used by stateful operators plus arbitrary
/// typed entries a caller wants to thread through to its own evaluators.
/// Cloning is cheap: entries are reference counted.
#[derive(Clone, Default)]
pub struct EvalContext {
    variables: Option<Arc<VariableContext>>,
    entries: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl EvalContext {
    /// Context without variables or entries
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `variables` for stateful operators
    pub fn with_variables(mut self, variables: Arc<VariableContext>) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Variable context, if one is attached
    pub fn variables(&self) -> Option<&Arc<VariableContext>> {
        self.variables.as_ref()
    }

    /// Attach a typed entry under `key`
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), Arc::new(value));
    }

    /// Typed entry under `key`, if present with type `T`
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.entries.get(key)?.downcast_ref()
    }
}

impl fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalContext")
            .field("variables", &self.variables.is_some())
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
