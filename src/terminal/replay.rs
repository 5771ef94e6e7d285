//! Bounded scrollback used to catch up newly attached observers.

/// Default replay limit (100KB)
pub const DEFAULT_REPLAY_LIMIT: usize = 100 * 1024;

/// Sliding-window byte buffer: never holds more than `capacity` bytes and
/// always holds the most recent ones.
#[derive(Debug)]
pub struct ReplayBuffer {
    buffer: Vec<u8>,
    capacity: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append data to buffer, removing old data if needed
    pub fn append(&mut self, data: &[u8]) {
        // If data is larger than capacity, only keep the last `capacity` bytes
        if data.len() >= self.capacity {
            self.buffer.clear();
            self.buffer
                .extend_from_slice(&data[data.len() - self.capacity..]);
            return;
        }

        // If adding data would exceed capacity, remove old data
        let new_len = self.buffer.len() + data.len();
        if new_len > self.capacity {
            let to_remove = new_len - self.capacity;
            self.buffer.drain(..to_remove);
        }

        self.buffer.extend_from_slice(data);
    }

    /// Get all buffered output, oldest first
    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ReplayBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_LIMIT)
    }
}
