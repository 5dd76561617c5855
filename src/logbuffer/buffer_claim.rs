//! Zero-copy claim over a reserved frame

use super::frame::data_frame_header as hdr;
use super::frame::frame_descriptor;
use crate::buffer::AtomicBuffer;

/// A contiguous frame reserved by `try_claim`, filled in place by the caller.
///
/// The frame's length field holds the negated frame length while the claim
/// is open, so readers treat it as in-progress. `commit` publishes the frame
/// with an ordered store of the positive length; `abort` rewrites the frame
/// as padding so readers skip it.
#[derive(Debug, Default)]
pub struct BufferClaim {
    frame: Option<AtomicBuffer>,
    frame_length: i32,
}

impl BufferClaim {
    pub(crate) fn wrap(&mut self, term: &AtomicBuffer, frame_offset: usize, frame_length: usize) {
        self.frame = Some(term.view(frame_offset, frame_length));
        self.frame_length = frame_length as i32;
    }

    /// Buffer spanning the whole claimed frame (header included).
    pub fn buffer(&self) -> AtomicBuffer {
        self.frame.expect("claim is not wrapped")
    }

    /// Offset of the payload within [`buffer`](Self::buffer).
    pub fn offset(&self) -> usize {
        hdr::DATA_OFFSET
    }

    /// Payload length available to the caller.
    pub fn length(&self) -> usize {
        (self.frame_length as usize) - hdr::LENGTH
    }

    /// Publish the claimed frame.
    pub fn commit(&mut self) {
        if let Some(frame) = self.frame.take() {
            frame_descriptor::set_frame_length_ordered(&frame, 0, self.frame_length);
        }
    }

    /// Abandon the claim: the frame becomes padding that readers step over.
    pub fn abort(&mut self) {
        if let Some(frame) = self.frame.take() {
            frame_descriptor::set_frame_type(&frame, 0, hdr::HDR_TYPE_PAD);
            frame_descriptor::set_frame_length_ordered(&frame, 0, self.frame_length);
        }
    }

    /// True while a wrapped frame awaits commit or abort.
    pub fn is_open(&self) -> bool {
        self.frame.is_some()
    }
}
