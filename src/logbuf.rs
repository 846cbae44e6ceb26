//! Bounded in-memory log buffers for service output.
//!
//! Each service owns one [`LogBuffer`]: a FIFO ring of at most `capacity`
//! lines. One writer (the process output reader task) appends; any number of
//! readers snapshot concurrently. Appends and snapshots hold a short
//! synchronous lock and never await, so a snapshot can never block behind
//! process I/O.

use chrono::Local;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default maximum number of log lines kept in memory per service.
pub const DEFAULT_LOG_CAPACITY: usize = 5_000;

/// Bounded, thread-safe ring buffer of log lines.
pub struct LogBuffer {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
    /// Count of lines evicted because the buffer was full.
    dropped: AtomicUsize,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Append one line, evicting the oldest line if the buffer is full.
    pub fn append(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        lines.push_back(line.into());
    }

    /// Immutable copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    /// The last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock();
        lines.iter().rev().take(n).rev().cloned().collect()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    /// Append a separator marking a service restart.
    ///
    /// The buffer is rolled over rather than cleared so that output from a
    /// crashed run stays visible after a quick restart.
    pub fn restart_marker(&self) {
        let stamp = Local::now().format("%H:%M:%S");
        self.append(format!("---- restart {stamp} ----"));
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn append_and_snapshot() {
        let buf = LogBuffer::with_capacity(10);
        buf.append("one");
        buf.append("two");
        assert_eq!(buf.snapshot(), vec!["one", "two"]);
    }

    #[test]
    fn evicts_oldest_first() {
        let buf = LogBuffer::with_capacity(3);
        for i in 0..5 {
            buf.append(format!("line {i}"));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.snapshot(), vec!["line 2", "line 3", "line 4"]);
        assert_eq!(buf.dropped_count(), 2);
    }

    #[test]
    fn never_exceeds_capacity() {
        let buf = LogBuffer::with_capacity(5_000);
        for i in 0..10_000 {
            buf.append(format!("line {i}"));
        }
        let snap = buf.snapshot();
        assert_eq!(snap.len(), 5_000);
        // Exactly the most recent 5000 lines, in original order
        assert_eq!(snap[0], "line 5000");
        assert_eq!(snap[4999], "line 9999");
    }

    #[test]
    fn tail_returns_last_n_in_order() {
        let buf = LogBuffer::with_capacity(10);
        for i in 0..10 {
            buf.append(format!("line {i}"));
        }
        assert_eq!(buf.tail(3), vec!["line 7", "line 8", "line 9"]);
        // Asking for more than present returns everything
        assert_eq!(buf.tail(100).len(), 10);
    }

    #[test]
    fn clear_empties_buffer() {
        let buf = LogBuffer::with_capacity(10);
        buf.append("x");
        buf.clear();
        assert!(buf.is_empty());
    }

    #[test]
    fn restart_marker_is_appended() {
        let buf = LogBuffer::with_capacity(10);
        buf.append("old run");
        buf.restart_marker();
        let snap = buf.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap[1].starts_with("---- restart "));
    }

    #[test]
    fn concurrent_writer_and_readers() {
        let buf = Arc::new(LogBuffer::with_capacity(100));

        let writer = {
            let buf = Arc::clone(&buf);
            std::thread::spawn(move || {
                for i in 0..1_000 {
                    buf.append(format!("line {i}"));
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let buf = Arc::clone(&buf);
            readers.push(std::thread::spawn(move || {
                for _ in 0..200 {
                    let snap = buf.snapshot();
                    assert!(snap.len() <= 100);
                    // Lines are whole; no torn writes
                    for line in &snap {
                        assert!(line.starts_with("line "));
                    }
                }
            }));
        }

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(buf.len(), 100);
    }
}
