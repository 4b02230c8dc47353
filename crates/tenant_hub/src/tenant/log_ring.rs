//! Bounded, most-recent-first log buffer backing each tenant's `game-logs`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

/// Maximum number of lines retained per tenant.
pub const LOG_RING_CAPACITY: usize = 1000;

/// Bounded ring of backend log lines, newest first.
///
/// A ring starts closed and is opened by the first backend build of its
/// tenant. A closed ring has no log to show at all, while an open one may
/// simply be empty.
#[derive(Debug)]
pub struct LogRing {
    lines: Mutex<VecDeque<Value>>,
    capacity: usize,
    open: AtomicBool,
}

impl LogRing {
    pub fn new() -> Self {
        Self::with_capacity(LOG_RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            open: AtomicBool::new(false),
        }
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// The lines of an open ring, most recent first; `None` while closed.
    pub fn lines(&self) -> Option<Vec<Value>> {
        self.is_open().then(|| self.snapshot())
    }

    /// Prepends a line, dropping the oldest one once the ring is full.
    pub fn push(&self, line: Value) {
        self.open();
        let mut lines = self.lines.lock();
        lines.push_front(line);
        lines.truncate(self.capacity);
    }

    /// Snapshot of the ring, most recent line first.
    pub fn snapshot(&self) -> Vec<Value> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new()
    }
}
