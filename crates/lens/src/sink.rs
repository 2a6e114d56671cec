//! Log sinks for the lens execution environment.
//!
//! Host-side events (the LEE) and script `print`/`debug` output go through
//! separately configured sinks so either side can be silenced without the
//! other. Records carry structured fields and are forwarded to `tracing`.

use std::fmt;

/// Severity ordering: `DEBUG < INFO < WARN < ERROR < FATAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn parse(level: &str) -> Option<Self> {
        match level.to_ascii_uppercase().as_str() {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARN" | "WARNING" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            "FATAL" => Some(LogLevel::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        };
        f.write_str(name)
    }
}

/// One structured event.
#[derive(Debug, Clone)]
pub struct LogRecord<'a> {
    pub file: &'a str,
    pub task: &'a str,
    pub level: LogLevel,
    pub lens_id: Option<&'a str>,
    pub request_id: Option<&'a str>,
    pub message: &'a str,
}

pub trait LogSink: Send + Sync {
    fn enabled(&self, level: LogLevel) -> bool;
    fn log(&self, record: &LogRecord<'_>);
}

/// Forwards to `tracing`, filtered by a minimum level and an on/off switch.
#[derive(Debug, Clone)]
pub struct TracingSink {
    min_level: LogLevel,
    enabled: bool,
}

impl TracingSink {
    pub fn new(min_level: LogLevel, enabled: bool) -> Self {
        Self { min_level, enabled }
    }
}

impl LogSink for TracingSink {
    fn enabled(&self, level: LogLevel) -> bool {
        self.enabled && level >= self.min_level
    }

    fn log(&self, record: &LogRecord<'_>) {
        if !self.enabled(record.level) {
            return;
        }
        let lens_id = record.lens_id.unwrap_or("-");
        let request_id = record.request_id.unwrap_or("-");
        match record.level {
            LogLevel::Debug => tracing::debug!(
                file = record.file,
                task = record.task,
                lens_id,
                request_id,
                "{}",
                record.message
            ),
            LogLevel::Info => tracing::info!(
                file = record.file,
                task = record.task,
                lens_id,
                request_id,
                "{}",
                record.message
            ),
            LogLevel::Warn => tracing::warn!(
                file = record.file,
                task = record.task,
                lens_id,
                request_id,
                "{}",
                record.message
            ),
            LogLevel::Error | LogLevel::Fatal => tracing::error!(
                file = record.file,
                task = record.task,
                lens_id,
                request_id,
                level = %record.level,
                "{}",
                record.message
            ),
        }
    }
}

/// Swallows everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn enabled(&self, _level: LogLevel) -> bool {
        false
    }

    fn log(&self, _record: &LogRecord<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_order_is_total() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Fatal);
    }

    #[test]
    fn parse_accepts_any_case() {
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("nope"), None);
    }

    #[test]
    fn disabled_sink_filters_everything() {
        let sink = TracingSink::new(LogLevel::Debug, false);
        assert!(!sink.enabled(LogLevel::Fatal));
    }

    #[test]
    fn min_level_filters_below() {
        let sink = TracingSink::new(LogLevel::Warn, true);
        assert!(!sink.enabled(LogLevel::Info));
        assert!(sink.enabled(LogLevel::Warn));
        assert!(sink.enabled(LogLevel::Fatal));
    }
}
