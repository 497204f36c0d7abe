//! FIFO buffer for frames sent while the channel is not connected.

use std::collections::VecDeque;

use super::messages::Envelope;

/// Unbounded FIFO queue of outbound frames.
///
/// Frames accumulate here while the channel is `Disconnected` or
/// `Connecting` and are drained, in order, on the next successful open.
/// [`drain`](Self::drain) takes the whole queue in one step so a frame
/// enqueued mid-drain lands behind the drained batch, never inside it.
#[derive(Debug, Default)]
pub struct SendQueue {
    frames: VecDeque<Envelope>,
}

impl SendQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a frame to the back of the queue.
    pub fn push(&mut self, envelope: Envelope) {
        self.frames.push_back(envelope);
    }

    /// Takes every queued frame, leaving the queue empty.
    pub fn drain(&mut self) -> std::collections::vec_deque::IntoIter<Envelope> {
        std::mem::take(&mut self.frames).into_iter()
    }

    /// Discards all queued frames.
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Number of frames currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
