use chrono::Utc;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Debug,
    Error,
}

/// One advisory event on the progress channel. Consumers (a parent
/// process, a log) may do anything with these; they never affect
/// control flow.
#[derive(Clone, Debug, Serialize)]
pub struct ProgressEvent {
    pub level: Level,
    pub message: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl ProgressEvent {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Where progress events go. Always passed explicitly; there is no
/// process-wide emitter.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl dyn ProgressSink {
    pub fn info(&self, message: &str) {
        self.emit(ProgressEvent::new(Level::Info, message));
    }

    pub fn debug(&self, message: &str) {
        self.emit(ProgressEvent::new(Level::Debug, message));
    }

    pub fn error(&self, message: &str) {
        self.emit(ProgressEvent::new(Level::Error, message));
    }
}

/// Forwards events to the log crate.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, event: ProgressEvent) {
        match event.level {
            Level::Info => info!("{}", event.message),
            Level::Debug => debug!("{}", event.message),
            Level::Error => error!("{}", event.message),
        }
    }
}
