use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::scripts::SlotId;

pub const LOG_TARGET: &str = "sceneforge::script";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "slot")]
pub enum LogSource {
    Host,
    Slot(SlotId),
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSource::Host => f.write_str("host"),
            LogSource::Slot(slot) => write!(f, "{slot}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub frame: u64,
    pub level: LogLevel,
    pub source: LogSource,
    pub message: String,
}

/// Operator-visible diagnostics. Bounded; the oldest entries fall off first.
#[derive(Debug)]
pub struct ScriptLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    dropped: u64,
    frame: u64,
}

impl ScriptLog {
    pub fn new(capacity: usize) -> Self {
        Self { entries: VecDeque::new(), capacity: capacity.max(1), dropped: 0, frame: 0 }
    }

    pub fn set_frame(&mut self, frame: u64) {
        self.frame = frame;
    }

    pub fn push(&mut self, level: LogLevel, source: LogSource, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => log::info!(target: LOG_TARGET, "[{source}] {message}"),
            LogLevel::Warn => log::warn!(target: LOG_TARGET, "[{source}] {message}"),
            LogLevel::Error => log::error!(target: LOG_TARGET, "[{source}] {message}"),
        }
        self.entries.push_back(LogEntry { frame: self.frame, level, source, message });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
    }

    pub fn info(&mut self, source: LogSource, message: impl Into<String>) {
        self.push(LogLevel::Info, source, message);
    }

    pub fn warn(&mut self, source: LogSource, message: impl Into<String>) {
        self.push(LogLevel::Warn, source, message);
    }

    pub fn error(&mut self, source: LogSource, message: impl Into<String>) {
        self.push(LogLevel::Error, source, message);
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn take(&mut self) -> Vec<LogEntry> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::EntityId;

    #[test]
    fn capacity_drops_oldest() {
        let mut log = ScriptLog::new(2);
        log.info(LogSource::Host, "one");
        log.warn(LogSource::Slot(SlotId::Scene), "two");
        log.error(LogSource::Slot(SlotId::Entity(EntityId(4))), "three");
        let messages: Vec<_> = log.entries().map(|entry| entry.message.as_str()).collect();
        assert_eq!(messages, vec!["two", "three"]);
        assert_eq!(log.dropped(), 1);
    }

    #[test]
    fn take_drains_and_keeps_frame() {
        let mut log = ScriptLog::new(8);
        log.set_frame(7);
        log.info(LogSource::Slot(SlotId::Scene), "hello");
        let entries = log.take();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].frame, 7);
        assert_eq!(entries[0].source.to_string(), "scene");
        assert!(log.is_empty());
    }
}
