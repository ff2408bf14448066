//! Cooperative cancellation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag of an executor
///
/// Any thread may request cancellation. The executor polls the flag at node
/// boundaries and consumes it when it observes it, so a request cancels at
/// most one execution.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Request cancellation of the running (or next) execution
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether a request is pending
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Consume a pending request
    pub(crate) fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_clears() {
        let handle = CancelHandle::default();
        assert!(!handle.take());
        handle.clone().cancel();
        assert!(handle.is_requested());
        assert!(handle.take());
        assert!(!handle.is_requested());
        assert!(!handle.take());
    }
}
