//! Latest-frame ring buffer shared between the reader thread and consumers

use crate::types::Frame;
use parking_lot::Mutex;
use std::collections::VecDeque;

struct Inner {
    frames: VecDeque<Frame>,
    count: u64,
}

/// Bounded buffer holding the most recent frames, oldest evicted first
///
/// The reader thread is the only writer. Every read hands out an owned copy,
/// so consumers never observe a frame the writer could still touch.
pub struct FrameBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl FrameBuffer {
    /// Create a buffer holding at most `capacity` frames (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                count: 0,
            }),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest one when full
    pub fn push(&self, frame: Frame) {
        let mut inner = self.inner.lock();
        if inner.frames.len() == self.capacity {
            inner.frames.pop_front();
        }
        inner.frames.push_back(frame);
        inner.count += 1;
    }

    /// Copy of the newest frame, if any was produced yet
    pub fn latest(&self) -> Option<Frame> {
        self.inner.lock().frames.back().cloned()
    }

    /// Copies of all buffered frames, oldest first
    pub fn snapshot(&self) -> Vec<Frame> {
        self.inner.lock().frames.iter().cloned().collect()
    }

    /// Total number of frames ever pushed
    pub fn frame_count(&self) -> u64 {
        self.inner.lock().count
    }

    /// Newest frame together with the counter value it belongs to
    pub(crate) fn latest_with_count(&self) -> Option<(Frame, u64)> {
        let inner = self.inner.lock();
        inner.frames.back().map(|f| (f.clone(), inner.count))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("FrameBuffer")
            .field("len", &inner.frames.len())
            .field("capacity", &self.capacity)
            .field("count", &inner.count)
            .finish()
    }
}
