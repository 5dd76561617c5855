//! Frame header snapshot handed to fragment handlers

use super::frame::data_frame_header as hdr;
use super::{compute_position, FRAME_ALIGNMENT};
use crate::buffer::AtomicBuffer;
use crate::util::align;

/// Snapshot of one frame's header fields, plus the stream context needed to
/// turn them into a position.
///
/// A fresh snapshot is taken per delivered fragment; a fragment assembler
/// synthesises one for a reassembled message.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    initial_term_id: i32,
    position_bits_to_shift: u32,
    frame_length: i32,
    version: u8,
    flags: u8,
    frame_type: u16,
    term_offset: i32,
    session_id: i32,
    stream_id: i32,
    term_id: i32,
    reserved_value: i64,
}

impl Header {
    pub fn new(initial_term_id: i32, position_bits_to_shift: u32) -> Self {
        Self {
            initial_term_id,
            position_bits_to_shift,
            frame_length: 0,
            version: 0,
            flags: 0,
            frame_type: 0,
            term_offset: 0,
            session_id: 0,
            stream_id: 0,
            term_id: 0,
            reserved_value: 0,
        }
    }

    /// Fill the snapshot from the frame at `frame_offset`.
    pub fn read_from(&mut self, term: &AtomicBuffer, frame_offset: usize) {
        self.frame_length = term.get_i32(frame_offset + hdr::FRAME_LENGTH_FIELD_OFFSET);
        self.version = term.get_u8(frame_offset + hdr::VERSION_FIELD_OFFSET);
        self.flags = term.get_u8(frame_offset + hdr::FLAGS_FIELD_OFFSET);
        self.frame_type = term.get_u16(frame_offset + hdr::TYPE_FIELD_OFFSET);
        self.term_offset = term.get_i32(frame_offset + hdr::TERM_OFFSET_FIELD_OFFSET);
        self.session_id = term.get_i32(frame_offset + hdr::SESSION_ID_FIELD_OFFSET);
        self.stream_id = term.get_i32(frame_offset + hdr::STREAM_ID_FIELD_OFFSET);
        self.term_id = term.get_i32(frame_offset + hdr::TERM_ID_FIELD_OFFSET);
        self.reserved_value = term.get_i64(frame_offset + hdr::RESERVED_VALUE_FIELD_OFFSET);
    }

    pub fn frame_length(&self) -> i32 {
        self.frame_length
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn frame_type(&self) -> u16 {
        self.frame_type
    }

    pub fn term_offset(&self) -> i32 {
        self.term_offset
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub fn term_id(&self) -> i32 {
        self.term_id
    }

    pub fn reserved_value(&self) -> i64 {
        self.reserved_value
    }

    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }

    /// Stream position just past the end of this frame.
    pub fn position(&self) -> i64 {
        let aligned = align(self.frame_length as usize, FRAME_ALIGNMENT) as i32;
        compute_position(
            self.term_id,
            self.term_offset + aligned,
            self.position_bits_to_shift,
            self.initial_term_id,
        )
    }

    pub(crate) fn set_flags(&mut self, flags: u8) {
        self.flags = flags;
    }

    pub(crate) fn set_frame_length(&mut self, frame_length: i32) {
        self.frame_length = frame_length;
    }
}
