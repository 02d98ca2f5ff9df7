// Call recording for test doubles

use parking_lot::Mutex;
use std::sync::Arc;

/// Records method calls with their arguments.
///
/// Clones share the same log.
#[derive(Clone, Default)]
pub struct CallRecorder {
    calls: Arc<Mutex<Vec<(String, Vec<String>)>>>,
}

impl CallRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a method call with arguments
    pub fn record(&self, method: &str, args: Vec<String>) {
        self.calls.lock().push((method.to_string(), args));
    }

    /// Get the total number of calls
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Get the number of calls to a specific method
    pub fn method_call_count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|(m, _)| m == method).count()
    }

    /// Check if a method was called
    pub fn was_called(&self, method: &str) -> bool {
        self.method_call_count(method) > 0
    }

    /// Get all calls in order
    pub fn get_calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().clone()
    }

    /// Method names in call order
    pub fn methods(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(m, _)| m.clone()).collect()
    }

    /// Clear all recorded calls
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl std::fmt::Debug for CallRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRecorder")
            .field("calls", &self.call_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_counts_per_method() {
        let recorder = CallRecorder::new();
        recorder.record("get", vec!["user:1".to_string()]);
        recorder.record("set", vec!["user:1".to_string()]);
        recorder.record("get", vec!["user:2".to_string()]);

        assert_eq!(recorder.call_count(), 3);
        assert_eq!(recorder.method_call_count("get"), 2);
        assert!(recorder.was_called("set"));
        assert!(!recorder.was_called("delete"));
        assert_eq!(recorder.methods(), vec!["get", "set", "get"]);
    }

    #[test]
    fn test_clones_share_log() {
        let recorder = CallRecorder::new();
        recorder.clone().record("has", vec![]);
        assert_eq!(recorder.call_count(), 1);
        recorder.clear();
        assert_eq!(recorder.call_count(), 0);
    }
}
