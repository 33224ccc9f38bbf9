use std::fmt;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// External tool stages of reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeStage {
    Concat,
    Metadata,
    Thumbnail,
}

impl MergeStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Concat => "concat",
            Self::Metadata => "metadata",
            Self::Thumbnail => "thumbnail",
        }
    }
}

impl fmt::Display for MergeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events a session reports to whoever drives it (the CLI progress bar).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Log {
        level: LogLevel,
        message: String,
    },
    /// A fragment was attempted. `bytes` is 0 when it could not be retrieved.
    FragmentCompleted {
        index: usize,
        total: usize,
        bytes: u64,
    },
    /// Tool progress for one reassembly stage, 0-100.
    MergeProgress {
        stage: MergeStage,
        percent: f32,
    },
}

/// Optional channel for [`SessionEvent`]s. Without a receiver events are
/// dropped; log events are always mirrored to `tracing`.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            // A dropped receiver just means nobody is watching anymore.
            let _ = tx.send(event);
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        self.emit(SessionEvent::Log {
            level: LogLevel::Info,
            message,
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.emit(SessionEvent::Log {
            level: LogLevel::Warn,
            message,
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{message}");
        self.emit(SessionEvent::Log {
            level: LogLevel::Error,
            message,
        });
    }

    pub fn fragment_completed(&self, index: usize, total: usize, bytes: u64) {
        self.emit(SessionEvent::FragmentCompleted {
            index,
            total,
            bytes,
        });
    }

    pub fn merge_progress(&self, stage: MergeStage, percent: f32) {
        self.emit(SessionEvent::MergeProgress {
            stage,
            percent: percent.clamp(0.0, 100.0),
        });
    }
}
