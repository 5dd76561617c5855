//! Term scanning on the subscription side

use super::frame::data_frame_header as hdr;
use super::frame::{frame_descriptor, FRAME_ALIGNMENT};
use super::header::Header;
use crate::buffer::AtomicBuffer;
use crate::util::align;

/// Result of one term scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Term offset the scan stopped at.
    pub offset: usize,
    /// Fragments delivered to the handler.
    pub fragments_read: usize,
}

/// Action returned by a controlled fragment handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlledPollAction {
    /// Stop and do not include the current fragment.
    Abort,
    /// Include the current fragment, then stop.
    Break,
    /// Include the current fragment and commit the position to this point.
    Commit,
    /// Include the current fragment and continue.
    Continue,
}

/// Scan `term` from `offset`, delivering committed data frames to
/// `handler(buffer, payload_offset, payload_length, header)` until the
/// fragment limit, an uncommitted frame, or the end of the term.
///
/// Padding frames advance the scan but are not delivered or counted.
pub fn read<F>(
    term: &AtomicBuffer,
    offset: usize,
    handler: &mut F,
    fragments_limit: usize,
    header: &mut Header,
) -> ReadOutcome
where
    F: FnMut(&AtomicBuffer, usize, usize, &Header),
{
    let capacity = term.capacity();
    let mut offset = offset;
    let mut fragments_read = 0;

    while fragments_read < fragments_limit && offset < capacity {
        let frame_length = frame_descriptor::frame_length_volatile(term, offset);
        if frame_length <= 0 {
            break;
        }

        let frame_offset = offset;
        offset += align(frame_length as usize, FRAME_ALIGNMENT);

        if frame_descriptor::is_padding_frame(term, frame_offset) {
            continue;
        }

        header.read_from(term, frame_offset);
        handler(
            term,
            frame_offset + hdr::DATA_OFFSET,
            frame_length as usize - hdr::LENGTH,
            header,
        );
        fragments_read += 1;
    }

    ReadOutcome {
        offset,
        fragments_read,
    }
}

/// Scan for a contiguous block of committed frames starting at `term_offset`
/// and ending before `limit_offset`. A padding frame terminates the block:
/// it is included only when it is the first frame, so the caller can step
/// the position over it.
pub fn block_scan(term: &AtomicBuffer, term_offset: usize, limit_offset: usize) -> usize {
    let mut offset = term_offset;

    while offset < limit_offset {
        let frame_length = frame_descriptor::frame_length_volatile(term, offset);
        if frame_length <= 0 {
            break;
        }

        let aligned_frame_length = align(frame_length as usize, FRAME_ALIGNMENT);

        if frame_descriptor::is_padding_frame(term, offset) {
            if term_offset == offset {
                offset += aligned_frame_length;
            }
            break;
        }

        if offset + aligned_frame_length > limit_offset {
            break;
        }

        offset += aligned_frame_length;
    }

    offset
}
