//! Bounded in-memory event log kept for postmortem dumps.

use std::collections::VecDeque;

use serde::Serialize;

pub const DEFAULT_LOG_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub realtime_ms: u64,
    pub message: String,
}

/// Ring buffer of the most recent engine decisions. Oldest entries are
/// dropped first once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct LocalLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LocalLog {
    pub fn new(capacity: usize) -> Self {
        LocalLog {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, realtime_ms: u64, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            realtime_ms,
            message: message.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for LocalLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_when_full() {
        let mut log = LocalLog::new(3);
        for i in 0..5u64 {
            log.push(i, format!("entry {i}"));
        }
        assert_eq!(log.len(), 3);
        let first = log.entries().next().unwrap();
        assert_eq!(first.message, "entry 2");
        assert_eq!(log.last().unwrap().realtime_ms, 4);
    }

    #[test]
    fn zero_capacity_keeps_one() {
        let mut log = LocalLog::new(0);
        log.push(1, "a");
        log.push(2, "b");
        assert_eq!(log.len(), 1);
        assert_eq!(log.last().unwrap().message, "b");
    }
}
