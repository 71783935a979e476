//! Per-stream send-side flow control: window accounting plus the FIFO
//! queue of outbound data chunks waiting for window.

use std::collections::VecDeque;

use bytes::Bytes;
use smallvec::SmallVec;

/// The flow-control window ceiling, cf. RFC 9113 section 6.9.1.
pub const MAX_WINDOW_SIZE: i64 = (1 << 31) - 1;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FlowError {
    #[error("window increment {increment} on window {window} exceeds the protocol ceiling")]
    WindowOverflow { window: i64, increment: i64 },
}

/// One outbound unit: at most max-frame-size payload bytes, plus
/// whether this is the final chunk of the stream's body.
#[derive(Debug, Clone)]
pub(crate) struct DataChunk {
    pub payload: Bytes,
    pub end_stream: bool,
}

/// Send-window accounting for one stream.
///
/// The window may go negative, but only as the result of a
/// SETTINGS-driven decrease applied retroactively — never because a
/// send exceeded the window at send time.
#[derive(Debug)]
pub(crate) struct StreamFlow {
    capacity: i64,
    max_frame_size: u32,
    queue: VecDeque<DataChunk>,
}

impl StreamFlow {
    pub(crate) fn new(initial_window_size: u32, max_frame_size: u32) -> Self {
        Self {
            capacity: initial_window_size as i64,
            max_frame_size,
            queue: VecDeque::new(),
        }
    }

    /// Bytes the peer currently permits us to send.
    pub(crate) fn capacity(&self) -> i64 {
        self.capacity
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Queue one payload, splitting it at the negotiated max frame
    /// size. Only the final chunk carries the end-of-stream marker.
    pub(crate) fn enqueue(&mut self, payload: Bytes, end_stream: bool) {
        let max = self.max_frame_size as usize;
        let mut rest = payload;
        while rest.len() > max {
            let chunk = rest.split_to(max);
            self.queue.push_back(DataChunk {
                payload: chunk,
                end_stream: false,
            });
        }
        self.queue.push_back(DataChunk {
            payload: rest,
            end_stream,
        });
    }

    /// Dequeue chunks while the window covers them, in submission
    /// order. A head chunk larger than the remaining window stays
    /// queued until a future increment; partial sends never happen.
    pub(crate) fn take_sendable(&mut self) -> SmallVec<[DataChunk; 4]> {
        let mut out = SmallVec::new();
        while self
            .queue
            .front()
            .map_or(false, |head| head.payload.len() as i64 <= self.capacity)
        {
            if let Some(chunk) = self.queue.pop_front() {
                self.capacity -= chunk.payload.len() as i64;
                out.push(chunk);
            }
        }
        out
    }

    /// Add to the window. Negative increments come from retroactive
    /// initial-window-size decreases.
    pub(crate) fn increment_window(&mut self, increment: i64) -> Result<(), FlowError> {
        let next = self.capacity.saturating_add(increment);
        if next > MAX_WINDOW_SIZE {
            return Err(FlowError::WindowOverflow {
                window: self.capacity,
                increment,
            });
        }
        self.capacity = next;
        Ok(())
    }

    /// Applies to future [StreamFlow::enqueue] calls only; chunks
    /// already queued are not resegmented.
    pub(crate) fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.max_frame_size = max_frame_size;
    }
}
