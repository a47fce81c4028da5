//! Append-only audit trail of controller activity.

use chrono::{DateTime, Local};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Info,
    Error,
    Tool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
    pub category: LogCategory,
}

impl LogEntry {
    pub fn display_line(&self) -> String {
        let tag = match self.category {
            LogCategory::Info => "info",
            LogCategory::Error => "error",
            LogCategory::Tool => "tool",
        };
        format!(
            "{} [{}] {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            tag,
            self.message
        )
    }
}

#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Vec<LogEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and mirror it to tracing.
    pub fn push(&mut self, category: LogCategory, message: impl Into<String>) {
        let message = message.into();
        match category {
            LogCategory::Info => tracing::info!("[Session] {}", message),
            LogCategory::Error => tracing::error!("[Session] {}", message),
            LogCategory::Tool => tracing::info!("[Tools] {}", message),
        }
        self.entries.push(LogEntry {
            timestamp: Local::now(),
            message,
            category,
        });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogCategory::Info, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogCategory::Error, message);
    }

    pub fn tool(&mut self, message: impl Into<String>) {
        self.push(LogCategory::Tool, message);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn count(&self, category: LogCategory) -> usize {
        self.entries.iter().filter(|e| e.category == category).count()
    }

    /// Last `n` entries, oldest first
    pub fn tail(&self, n: usize) -> &[LogEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }
}
