//! Outgoing stream buffer.
//!
//! One bounded FIFO of formatted entry lines shared by every producer
//! (local sampler, remote merge) and every relay connection handler. The
//! buffer is constructed once at startup and injected; it is not ambient
//! class-level state.
//!
//! Backpressure policy is deliberately lossy: when a stalled or absent
//! consumer lets the buffer grow past its cap, the whole buffer is cleared.
//! Dropping an interval of stream data is preferred over unbounded memory
//! or blocking the producers; the recording log remains the system of
//! record.

use log::warn;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Default line cap, matching the relay's historical limit.
pub const DEFAULT_BUFFER_CAP: usize = 100;

#[derive(Debug)]
pub struct StreamBuffer {
    cap: usize,
    queue: Mutex<VecDeque<String>>,
}

impl StreamBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            queue: Mutex::new(VecDeque::with_capacity(cap)),
        }
    }

    /// Append one formatted line. Never blocks and never fails. The cap is
    /// enforced here so a stalled or absent consumer cannot grow the buffer
    /// without bound; going over the cap drops everything, the line just
    /// pushed included.
    pub fn push(&self, line: String) {
        let mut queue = self.queue.lock().unwrap();
        queue.push_back(line);
        if queue.len() > self.cap {
            queue.clear();
            warn!("Stream buffer overflowed without a consumer, dropped pending lines");
        }
    }

    /// Take the most recently inserted line. The relay drains in
    /// reverse-insertion order; the stream carries no ordering guarantee.
    pub fn pop_back(&self) -> Option<String> {
        self.queue.lock().unwrap().pop_back()
    }

    /// Full-clear overflow check: if the buffer has grown past its cap,
    /// drop everything. Returns whether a clear happened.
    pub fn clear_if_over_cap(&self) -> bool {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() > self.cap {
            queue.clear();
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_push_pop_reverse_order() {
        let buffer = StreamBuffer::new(10);
        buffer.push("first".to_string());
        buffer.push("second".to_string());

        assert_eq!(buffer.pop_back().as_deref(), Some("second"));
        assert_eq!(buffer.pop_back().as_deref(), Some("first"));
        assert!(buffer.pop_back().is_none());
    }

    #[test]
    fn test_overflow_clears_completely() {
        let buffer = StreamBuffer::new(100);
        for i in 0..101 {
            buffer.push(format!("line {}", i));
        }

        // Full-clear semantics: not truncated-but-nonempty
        assert_eq!(buffer.len(), 0);
        assert!(buffer.pop_back().is_none());
        assert!(!buffer.clear_if_over_cap());
    }

    #[test]
    fn test_bounded_without_consumer() {
        // Producers keep pushing while no relay handler drains; the cap
        // must hold regardless
        let buffer = StreamBuffer::new(100);
        for i in 0..5000 {
            buffer.push(format!("line {}", i));
            assert!(buffer.len() <= 100);
        }
        assert!(buffer.len() <= 100);
    }

    #[test]
    fn test_at_cap_is_not_cleared() {
        let buffer = StreamBuffer::new(100);
        for i in 0..100 {
            buffer.push(format!("line {}", i));
        }
        assert!(!buffer.clear_if_over_cap());
        assert_eq!(buffer.len(), 100);
    }

    #[test]
    fn test_concurrent_producers() {
        let buffer = Arc::new(StreamBuffer::new(10_000));
        let mut handles = Vec::new();

        for t in 0..8 {
            let buffer = Arc::clone(&buffer);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    buffer.push(format!("{}:{}", t, i));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(buffer.len(), 800);
        assert!(!buffer.clear_if_over_cap());
    }
}
