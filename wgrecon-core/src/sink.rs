//! Explicit log sink handed to the reconstruction engine.

use log::{Level, Log, Metadata, Record};
use std::fmt;
use std::sync::Arc;

const DEFAULT_TARGET: &str = "wgrecon";

/// Destination for engine log records.
///
/// Engines never touch the global logger directly; the caller decides where
/// records go by choosing the sink.
#[derive(Clone)]
pub struct LogSink {
    logger: Arc<dyn Log>,
    target: &'static str,
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::global()
    }
}

impl LogSink {
    /// Wraps a caller-owned logger.
    #[must_use]
    pub fn new(logger: Arc<dyn Log>) -> Self {
        Self {
            logger,
            target: DEFAULT_TARGET,
        }
    }

    /// Forwards to the logger installed through the `log` facade.
    #[must_use]
    pub fn global() -> Self {
        Self::new(Arc::new(GlobalLogger))
    }

    /// Drops every record.
    #[must_use]
    pub fn discard() -> Self {
        Self::new(Arc::new(DiscardLogger))
    }

    /// Sets the record target.
    #[must_use]
    pub fn with_target(mut self, target: &'static str) -> Self {
        self.target = target;
        self
    }

    /// Record target.
    #[must_use]
    pub fn target(&self) -> &'static str {
        self.target
    }

    /// Whether records at `level` would be kept.
    #[must_use]
    pub fn enabled(&self, level: Level) -> bool {
        let metadata = Metadata::builder()
            .level(level)
            .target(self.target)
            .build();
        self.logger.enabled(&metadata)
    }

    /// Emits one record.
    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        self.logger.log(
            &Record::builder()
                .level(level)
                .target(self.target)
                .args(args)
                .build(),
        );
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    /// Flushes buffered records.
    pub fn flush(&self) {
        self.logger.flush();
    }
}

struct GlobalLogger;

impl Log for GlobalLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        log::logger().log(record);
    }

    fn flush(&self) {
        log::logger().flush();
    }
}

struct DiscardLogger;

impl Log for DiscardLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        false
    }

    fn log(&self, _record: &Record<'_>) {}

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture {
        records: Mutex<Vec<(Level, String)>>,
    }

    impl Log for Capture {
        fn enabled(&self, metadata: &Metadata<'_>) -> bool {
            metadata.level() <= Level::Info
        }

        fn log(&self, record: &Record<'_>) {
            self.records
                .lock()
                .unwrap()
                .push((record.level(), record.args().to_string()));
        }

        fn flush(&self) {}
    }

    #[test]
    fn test_sink_filters_by_level() {
        let capture = Arc::new(Capture::default());
        let sink = LogSink::new(capture.clone());

        sink.warn(format_args!("rejected {}", 3));
        sink.debug(format_args!("hidden"));
        sink.info(format_args!("done"));

        let records = capture.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], (Level::Warn, "rejected 3".to_string()));
        assert_eq!(records[1].0, Level::Info);
    }

    #[test]
    fn test_discard() {
        let sink = LogSink::discard().with_target("test");
        assert!(!sink.enabled(Level::Error));
        assert_eq!(sink.target(), "test");
        sink.warn(format_args!("ignored"));
    }
}
