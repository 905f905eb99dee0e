//! Bounded ring buffer of output chunks.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Default number of chunks retained per adapter.
pub const DEFAULT_BUFFER_CHUNKS: usize = 2000;

/// Bounded, lock-guarded ring of raw output chunks.
///
/// The reader thread appends with [`on_chunk`](Self::on_chunk); any thread
/// may take a [`snapshot`](Self::snapshot). Both use the same lock, so a
/// snapshot never observes a half-evicted ring.
#[derive(Debug)]
pub struct OutputBuffer {
    chunks: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl OutputBuffer {
    /// Create a buffer holding at most `capacity` chunks (minimum one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            chunks: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_BUFFER_CHUNKS))),
            capacity,
        }
    }

    /// Append a chunk, evicting the oldest ones once the ring is full.
    pub fn on_chunk(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut chunks = self.chunks.lock();
        while chunks.len() >= self.capacity {
            chunks.pop_front();
        }
        chunks.push_back(text.to_string());
    }

    /// The last `tail_chars` characters of buffered output.
    #[must_use]
    pub fn snapshot(&self, tail_chars: usize) -> String {
        if tail_chars == 0 {
            return String::new();
        }

        let chunks = self.chunks.lock();
        let mut taken = 0;
        let mut count = 0;
        for chunk in chunks.iter().rev() {
            taken += 1;
            count += chunk.chars().count();
            if count >= tail_chars {
                break;
            }
        }
        let joined: String = chunks
            .iter()
            .skip(chunks.len() - taken)
            .map(String::as_str)
            .collect();
        drop(chunks);

        let skip = count.saturating_sub(tail_chars);
        match joined.char_indices().nth(skip) {
            Some((start, _)) => joined[start..].to_string(),
            None => String::new(),
        }
    }

    /// Number of chunks currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all buffered output.
    pub fn clear(&self) {
        self.chunks.lock().clear();
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CHUNKS)
    }
}
