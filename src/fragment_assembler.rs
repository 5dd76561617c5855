//! Reassembly of fragmented messages
//!
//! Messages larger than the MTU payload arrive as runs of fragments flagged
//! BEGIN / middle / END. The assembler buffers each session's run and hands
//! the delegate one contiguous message with a synthesised header whose flags
//! read as unfragmented. Fragments within a session arrive in order; an
//! unexpected BEGIN silently restarts that session's assembly.

use std::collections::HashMap;

use crate::buffer::AtomicBuffer;
use crate::logbuffer::frame_descriptor::{BEGIN_FRAG_FLAG, END_FRAG_FLAG, UNFRAGMENTED};
use crate::logbuffer::{data_frame_header, Header};

/// Initial per-session assembly capacity.
const INITIAL_BUILDER_CAPACITY: usize = 4096;

#[derive(Debug, Default)]
struct BufferBuilder {
    buffer: Vec<u8>,
    in_progress: bool,
}

impl BufferBuilder {
    fn begin(&mut self, src: &[u8]) {
        self.buffer.clear();
        if self.buffer.capacity() < INITIAL_BUILDER_CAPACITY {
            self.buffer.reserve(INITIAL_BUILDER_CAPACITY);
        }
        self.buffer.extend_from_slice(src);
        self.in_progress = true;
    }

    fn append(&mut self, src: &[u8]) {
        self.buffer.extend_from_slice(src);
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.in_progress = false;
    }
}

/// Wraps a fragment handler, reassembling multi-fragment messages per
/// session before delegating.
pub struct FragmentAssembler<F> {
    delegate: F,
    builders: HashMap<i32, BufferBuilder>,
}

impl<F> FragmentAssembler<F>
where
    F: FnMut(&AtomicBuffer, usize, usize, &Header),
{
    pub fn new(delegate: F) -> Self {
        Self {
            delegate,
            builders: HashMap::new(),
        }
    }

    /// Feed one fragment; pass this method as the handler to a poll.
    pub fn on_fragment(
        &mut self,
        buffer: &AtomicBuffer,
        offset: usize,
        length: usize,
        header: &Header,
    ) {
        let flags = header.flags();

        if flags & UNFRAGMENTED == UNFRAGMENTED {
            (self.delegate)(buffer, offset, length, header);
            return;
        }

        let mut fragment = vec![0u8; length];
        buffer.get_bytes(offset, &mut fragment);

        let builder = self.builders.entry(header.session_id()).or_default();

        if flags & BEGIN_FRAG_FLAG != 0 {
            builder.begin(&fragment);
            return;
        }

        if !builder.in_progress {
            // Middle or end without a begin: the run started before we
            // joined, drop it.
            return;
        }

        builder.append(&fragment);

        if flags & END_FRAG_FLAG != 0 {
            let mut assembled_header = *header;
            assembled_header.set_flags(flags | UNFRAGMENTED);
            assembled_header
                .set_frame_length((builder.buffer.len() + data_frame_header::LENGTH) as i32);

            let view = AtomicBuffer::wrap_slice(&mut builder.buffer);
            (self.delegate)(&view, 0, view.capacity(), &assembled_header);
            builder.reset();
        }
    }

    /// Drop any partial assembly for a session (its image went away).
    pub fn free_session_buffer(&mut self, session_id: i32) -> bool {
        self.builders.remove(&session_id).is_some()
    }
}
