//! Keel Logging
//!
//! The single logging collaborator used by every keel component. Components
//! only ever write to it.
//!
//! # Features
//!
//! - **Environment defaults**: `KEEL_DEBUG=1` enables debug logging
//! - **Pluggable sinks**: records go through a [`LogSink`], stderr by default
//! - **Explicit handles**: components hold a [`Logger`] instead of reaching
//!   for a global, which keeps tests able to capture output
//! - **Multiple backends**: stderr formats, or `tracing` with the `tracing` feature
//!
//! # Usage
//!
//! ```rust
//! use keel_log::{debug, info, warn, error, Logger};
//!
//! debug!("Processing request");
//! info!("Dispatcher ready with {} handlers", 3);
//!
//! let logger = Logger::global().with_target("keel::mediator");
//! warn!(logger: &logger, "Slow request: {}", "CreateUser");
//! error!(target: "keel::events", "Drain failed");
//! ```
//!
//! # Environment Variables
//!
//! - `KEEL_DEBUG=1` - Enable debug logging
//! - `KEEL_LOG_LEVEL=debug|info|warn|error` - Set log level
//! - `KEEL_LOG_FORMAT=pretty|json|compact` - Set output format
//! - `KEEL_LOG_COLOR=1|0` - Enable/disable colors

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use std::borrow::Cow;
use std::env;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

// ============================================================================
// Log Levels
// ============================================================================

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Level {
    /// Trace level (most verbose)
    Trace = 0,
    /// Debug level
    Debug = 1,
    /// Info level
    Info = 2,
    /// Warning level
    Warn = 3,
    /// Error level (least verbose)
    Error = 4,
    /// Off (no logging)
    Off = 5,
}

impl Level {
    /// Get level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Off => "OFF",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            4 => Level::Error,
            _ => Level::Off,
        }
    }

    /// Get colored level name (if color feature enabled).
    #[cfg(feature = "color")]
    pub fn colored(&self) -> colored::ColoredString {
        use colored::Colorize;
        match self {
            Level::Trace => "TRACE".magenta(),
            Level::Debug => "DEBUG".blue(),
            Level::Info => "INFO".green(),
            Level::Warn => "WARN".yellow(),
            Level::Error => "ERROR".red().bold(),
            Level::Off => "OFF".white(),
        }
    }
}

impl FromStr for Level {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "off" | "none" => Ok(Level::Off),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for the stderr sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Pretty format with colors
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for structured logging
    Json,
}

impl FromStr for Format {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Format::Pretty),
            "compact" => Ok(Format::Compact),
            "json" => Ok(Format::Json),
            _ => Err(()),
        }
    }
}

// ============================================================================
// Global Configuration
// ============================================================================

/// Global debug flag - checked by macros.
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Global log level.
static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// Process defaults (lazy initialized from the environment).
static CONFIG: Lazy<LogConfig> = Lazy::new(LogConfig::from_env);

/// Default sink shared by [`Logger::global`].
static GLOBAL_SINK: Lazy<Arc<dyn LogSink>> =
    Lazy::new(|| Arc::new(StderrSink::from_config(config())));

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether colors are enabled
    pub color: bool,
    /// Whether to include timestamps
    pub timestamps: bool,
    /// Whether to include module path
    pub module_path: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false,
            timestamps: true,
            module_path: true,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl LogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let debug = env_flag("KEEL_DEBUG").unwrap_or(false);

        let level = env::var("KEEL_LOG_LEVEL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = env::var("KEEL_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(Format::Json);

        let color = env_flag("KEEL_LOG_COLOR").unwrap_or_else(terminal::supports_color);
        let timestamps = env_flag("KEEL_LOG_TIMESTAMPS").unwrap_or(true);
        let module_path = env_flag("KEEL_LOG_MODULE").unwrap_or(true);

        DEBUG_ENABLED.store(debug, Ordering::SeqCst);
        LOG_LEVEL.store(level as u8, Ordering::SeqCst);

        Self {
            debug,
            level,
            format,
            color,
            timestamps,
            module_path,
        }
    }
}

mod terminal {
    pub fn supports_color() -> bool {
        std::env::var("NO_COLOR").is_err() && std::env::var("TERM").is_ok()
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Initialize the logging system eagerly.
pub fn init() {
    Lazy::force(&CONFIG);
}

/// Check if debug logging is enabled.
#[inline]
pub fn is_debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Check if a log level is enabled.
#[inline]
pub fn is_level_enabled(level: Level) -> bool {
    level != Level::Off && level as u8 >= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Get current log level.
pub fn current_level() -> Level {
    Level::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Set log level at runtime.
pub fn set_level(level: Level) {
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Enable or disable debug mode at runtime.
pub fn set_debug(enabled: bool) {
    DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
    if enabled && current_level() > Level::Debug {
        set_level(Level::Debug);
    }
}

/// Get the process configuration.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

// ============================================================================
// Records and sinks
// ============================================================================

/// A single log record handed to a sink.
#[derive(Debug, Clone)]
pub struct Record<'a> {
    /// Severity
    pub level: Level,
    /// Module path or explicit target
    pub target: &'a str,
    /// Rendered message
    pub message: &'a str,
    /// Time the record was produced
    pub timestamp: DateTime<Utc>,
}

/// Destination for log records.
///
/// Implementations must not panic and must not block for long; failures are
/// swallowed.
pub trait LogSink: Send + Sync {
    /// Write one record.
    fn write(&self, record: &Record<'_>);
}

/// Sink writing formatted records to stderr.
#[derive(Debug, Clone)]
pub struct StderrSink {
    format: Format,
    #[cfg_attr(not(feature = "color"), allow(dead_code))]
    color: bool,
    timestamps: bool,
    module_path: bool,
}

impl StderrSink {
    /// Create a sink with the given format.
    pub fn new(format: Format) -> Self {
        Self {
            format,
            color: false,
            timestamps: true,
            module_path: true,
        }
    }

    /// Create a sink matching a [`LogConfig`].
    pub fn from_config(config: &LogConfig) -> Self {
        Self {
            format: config.format,
            color: config.color,
            timestamps: config.timestamps,
            module_path: config.module_path,
        }
    }

    fn write_pretty(&self, record: &Record<'_>) {
        let mut stderr = std::io::stderr().lock();

        if self.timestamps {
            let local = record.timestamp.with_timezone(&chrono::Local);
            let _ = write!(stderr, "{} ", local.format("%Y-%m-%d %H:%M:%S%.3f"));
        }

        #[cfg(feature = "color")]
        if self.color {
            let _ = write!(stderr, "{:5} ", record.level.colored());
        } else {
            let _ = write!(stderr, "{:5} ", record.level.as_str());
        }

        #[cfg(not(feature = "color"))]
        let _ = write!(stderr, "{:5} ", record.level.as_str());

        if self.module_path && !record.target.is_empty() {
            let _ = write!(stderr, "[{}] ", record.target);
        }

        let _ = writeln!(stderr, "{}", record.message);
    }

    fn write_compact(&self, record: &Record<'_>) {
        let mut stderr = std::io::stderr().lock();

        if self.timestamps {
            let local = record.timestamp.with_timezone(&chrono::Local);
            let _ = write!(stderr, "{} ", local.format("%H:%M:%S"));
        }

        let initial = record.level.as_str().chars().next().unwrap_or('?');
        let _ = write!(stderr, "{} ", initial);

        if self.module_path && !record.target.is_empty() {
            let _ = write!(stderr, "{}: ", record.target);
        }

        let _ = writeln!(stderr, "{}", record.message);
    }

    #[cfg(feature = "json")]
    fn write_json(&self, record: &Record<'_>) {
        use serde::Serialize;

        #[derive(Serialize)]
        struct Entry<'a> {
            timestamp: String,
            level: &'a str,
            target: &'a str,
            message: &'a str,
        }

        let entry = Entry {
            timestamp: record.timestamp.to_rfc3339(),
            level: record.level.as_str(),
            target: record.target,
            message: record.message,
        };

        if let Ok(json) = serde_json::to_string(&entry) {
            eprintln!("{}", json);
        }
    }

    #[cfg(not(feature = "json"))]
    fn write_json(&self, record: &Record<'_>) {
        eprintln!(
            r#"{{"timestamp":"{}","level":"{}","target":"{}","message":"{}"}}"#,
            record.timestamp.to_rfc3339(),
            record.level.as_str(),
            escape_json(record.target),
            escape_json(record.message)
        );
    }
}

impl LogSink for StderrSink {
    fn write(&self, record: &Record<'_>) {
        match self.format {
            Format::Pretty => self.write_pretty(record),
            Format::Compact => self.write_compact(record),
            Format::Json => self.write_json(record),
        }
    }
}

#[cfg(not(feature = "json"))]
fn escape_json(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            c if c.is_control() => {
                result.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => result.push(c),
        }
    }
    result
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn write(&self, _record: &Record<'_>) {}
}

// ============================================================================
// Logger handle
// ============================================================================

/// Clonable handle to a sink, passed into components at construction.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    target: Option<Cow<'static, str>>,
}

impl Logger {
    /// Create a logger writing to `sink`.
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink, target: None }
    }

    /// Logger backed by the process-wide stderr sink.
    pub fn global() -> Self {
        Self::new(GLOBAL_SINK.clone())
    }

    /// Logger that discards every record.
    pub fn null() -> Self {
        Self::new(Arc::new(NullSink))
    }

    /// Override the target reported for records written through this handle.
    pub fn with_target(mut self, target: impl Into<Cow<'static, str>>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Target override, if any.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Whether a record at `level` would be written.
    #[inline]
    pub fn enabled(&self, level: Level) -> bool {
        match level {
            Level::Debug => is_debug_enabled() || is_level_enabled(level),
            _ => is_level_enabled(level),
        }
    }

    /// Write a message. `target` is used when the handle has no override.
    pub fn log(&self, level: Level, target: &str, message: &str) {
        if !self.enabled(level) {
            return;
        }
        let record = Record {
            level,
            target: self.target.as_deref().unwrap_or(target),
            message,
            timestamp: Utc::now(),
        };
        self.sink.write(&record);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::global()
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Log a message through the global logger.
#[doc(hidden)]
pub fn log(level: Level, target: &str, message: &str) {
    Logger::global().log(level, target, message);
}

// ============================================================================
// Macros
// ============================================================================

#[doc(hidden)]
#[macro_export]
macro_rules! __log {
    ($level:expr, logger: $logger:expr, $($arg:tt)+) => {{
        let __logger: &$crate::Logger = &$logger;
        if __logger.enabled($level) {
            __logger.log($level, module_path!(), &format!($($arg)+));
        }
    }};
    ($level:expr, target: $target:expr, $($arg:tt)+) => {{
        let __logger = $crate::Logger::global();
        if __logger.enabled($level) {
            __logger.log($level, $target, &format!($($arg)+));
        }
    }};
    ($level:expr, $($arg:tt)+) => {{
        let __logger = $crate::Logger::global();
        if __logger.enabled($level) {
            __logger.log($level, module_path!(), &format!($($arg)+));
        }
    }};
}

/// Log a trace message.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => { $crate::__log!($crate::Level::Trace, $($arg)+) };
}

/// Log a debug message.
///
/// Enabled when `KEEL_DEBUG=1`, `KEEL_LOG_LEVEL=debug`, or [`set_debug`].
///
/// # Example
///
/// ```rust
/// use keel_log::{debug, Logger};
///
/// debug!("Processing request");
/// let key = "app::CreateUser";
/// debug!(target: "keel::mediator", "Dispatching {}", key);
/// let logger = Logger::null();
/// debug!(logger: logger, "Dispatching {}", key);
/// ```
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => { $crate::__log!($crate::Level::Debug, $($arg)+) };
}

/// Log an info message.
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => { $crate::__log!($crate::Level::Info, $($arg)+) };
}

/// Log a warning message.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => { $crate::__log!($crate::Level::Warn, $($arg)+) };
}

/// Log an error message.
#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => { $crate::__log!($crate::Level::Error, $($arg)+) };
}

// ============================================================================
// Tracing Integration
// ============================================================================

#[cfg(feature = "tracing")]
pub mod tracing_compat {
    //! Tracing compatibility layer.
    //!
    //! [`TracingSink`] forwards keel records into `tracing`, so an application
    //! that already installs a subscriber sees keel output in the same place.

    use super::*;

    /// Sink forwarding records as `tracing` events.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct TracingSink;

    impl LogSink for TracingSink {
        fn write(&self, record: &Record<'_>) {
            let target = record.target;
            let message = record.message;
            match record.level {
                Level::Trace => tracing::trace!(keel_target = target, "{}", message),
                Level::Debug => tracing::debug!(keel_target = target, "{}", message),
                Level::Info => tracing::info!(keel_target = target, "{}", message),
                Level::Warn => tracing::warn!(keel_target = target, "{}", message),
                Level::Error => tracing::error!(keel_target = target, "{}", message),
                Level::Off => {}
            }
        }
    }

    /// Logger handle backed by [`TracingSink`].
    pub fn logger() -> Logger {
        Logger::new(Arc::new(TracingSink))
    }

    /// Create a tracing subscriber that respects keel config.
    pub fn subscriber() -> impl tracing::Subscriber {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{EnvFilter, fmt};

        let config = config();
        let level = match config.level {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(config.color))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<(Level, String, String)>>);

    impl LogSink for Collect {
        fn write(&self, record: &Record<'_>) {
            self.0.lock().unwrap().push((
                record.level,
                record.target.to_string(),
                record.message.to_string(),
            ));
        }
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Off);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("debug".parse(), Ok(Level::Debug));
        assert_eq!("DEBUG".parse(), Ok(Level::Debug));
        assert_eq!("warning".parse(), Ok(Level::Warn));
        assert_eq!("invalid".parse::<Level>(), Err(()));
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("pretty".parse(), Ok(Format::Pretty));
        assert_eq!("compact".parse(), Ok(Format::Compact));
        assert_eq!("json".parse(), Ok(Format::Json));
        assert!("invalid".parse::<Format>().is_err());
    }

    // Level and debug flag are process globals; keep their mutations in one test.
    #[test]
    #[serial]
    fn test_runtime_level_changes() {
        let original_level = current_level();
        let original_debug = is_debug_enabled();

        set_level(Level::Error);
        assert_eq!(current_level(), Level::Error);
        assert!(!is_level_enabled(Level::Warn));

        set_debug(true);
        assert!(is_debug_enabled());
        assert_eq!(current_level(), Level::Debug);

        set_debug(original_debug);
        set_level(original_level);
    }

    #[test]
    #[serial]
    fn test_logger_writes_to_sink_with_target_override() {
        let sink = Arc::new(Collect::default());
        let logger = Logger::new(sink.clone()).with_target("keel::test");

        warn!(logger: logger, "slow request {}", 7);
        error!(logger: &logger, "boom");

        let records = sink.0.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, Level::Warn);
        assert_eq!(records[0].1, "keel::test");
        assert_eq!(records[0].2, "slow request 7");
        assert_eq!(records[1].0, Level::Error);
    }

    #[test]
    #[serial]
    fn test_logger_without_override_uses_module_path() {
        let sink = Arc::new(Collect::default());
        let logger = Logger::new(sink.clone());

        error!(logger: logger, "failed");

        let records = sink.0.lock().unwrap();
        assert_eq!(records[0].1, module_path!());
    }

    #[test]
    fn test_off_level_is_never_enabled() {
        assert!(!is_level_enabled(Level::Off));
    }

    #[test]
    fn test_macros_compile() {
        trace!("trace message");
        debug!("debug message");
        info!("info message");
        warn!("warn message");
        error!("error message");

        trace!(target: "test", "with target");
        debug!(target: "test", "with target");
        info!(target: "test", "with target");
        warn!(target: "test", "with target");
        error!(target: "test", "with target");

        let null = Logger::null();
        info!(logger: null, "discarded {}", 1);
    }
}
