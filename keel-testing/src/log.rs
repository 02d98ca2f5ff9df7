// Log capture for tests

use keel_log::{Level, LogSink, Logger, Record};
use parking_lot::Mutex;
use std::sync::Arc;

/// A captured log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRecord {
    pub level: Level,
    pub target: String,
    pub message: String,
}

/// [`LogSink`] that keeps every record in memory.
///
/// Records are still filtered by the process log level; tests that assert on
/// debug output should raise it with `keel_log::set_level`.
#[derive(Debug, Default)]
pub struct CapturingLogSink {
    records: Mutex<Vec<CapturedRecord>>,
}

impl CapturingLogSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Logger writing into `sink`.
    pub fn logger(sink: &Arc<Self>) -> Logger {
        Logger::new(sink.clone())
    }

    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records.lock().clone()
    }

    /// Messages logged at exactly `level`.
    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.level == level)
            .map(|record| record.message.clone())
            .collect()
    }

    /// Whether any message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|record| record.message.contains(needle))
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl LogSink for CapturingLogSink {
    fn write(&self, record: &Record<'_>) {
        self.records.lock().push(CapturedRecord {
            level: record.level,
            target: record.target.to_string(),
            message: record.message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captures_warnings() {
        let sink = CapturingLogSink::new();
        let logger = CapturingLogSink::logger(&sink);

        keel_log::warn!(logger: logger, "Slow request {}", "CreateUser");

        assert_eq!(sink.messages_at(Level::Warn), vec!["Slow request CreateUser"]);
        assert!(sink.contains("CreateUser"));
        sink.clear();
        assert!(sink.records().is_empty());
    }
}
