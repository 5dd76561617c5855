//! Data frame header layout and field access
//!
//! Every frame in a term is a 32-byte little-endian header followed by the
//! payload, with the whole frame padded to 32-byte alignment. A frame length
//! of zero means unwritten; a negative length marks a claim in progress.

use crate::buffer::AtomicBuffer;

/// Frames are padded to this alignment within a term.
pub const FRAME_ALIGNMENT: usize = 32;

/// Field offsets and type ids of the 32-byte data frame header.
pub mod data_frame_header {
    pub const FRAME_LENGTH_FIELD_OFFSET: usize = 0;
    pub const VERSION_FIELD_OFFSET: usize = 4;
    pub const FLAGS_FIELD_OFFSET: usize = 5;
    pub const TYPE_FIELD_OFFSET: usize = 6;
    pub const TERM_OFFSET_FIELD_OFFSET: usize = 8;
    pub const SESSION_ID_FIELD_OFFSET: usize = 12;
    pub const STREAM_ID_FIELD_OFFSET: usize = 16;
    pub const TERM_ID_FIELD_OFFSET: usize = 20;
    pub const RESERVED_VALUE_FIELD_OFFSET: usize = 24;
    pub const DATA_OFFSET: usize = 32;

    /// Total header length.
    pub const LENGTH: usize = 32;

    pub const CURRENT_VERSION: u8 = 0;

    pub const HDR_TYPE_PAD: u16 = 0x00;
    pub const HDR_TYPE_DATA: u16 = 0x01;
    pub const HDR_TYPE_NAK: u16 = 0x02;
    pub const HDR_TYPE_SM: u16 = 0x03;
    pub const HDR_TYPE_ERR: u16 = 0x04;
    pub const HDR_TYPE_SETUP: u16 = 0x05;
    pub const HDR_TYPE_EXT: u16 = 0xFFFF;
}

/// Flag bits and frame-level helpers over a term buffer.
pub mod frame_descriptor {
    use super::data_frame_header as hdr;
    use super::AtomicBuffer;

    /// First fragment of a message.
    pub const BEGIN_FRAG_FLAG: u8 = 0x80;
    /// Last fragment of a message.
    pub const END_FRAG_FLAG: u8 = 0x40;
    /// Message is a single fragment.
    pub const UNFRAGMENTED: u8 = BEGIN_FRAG_FLAG | END_FRAG_FLAG;
    /// End of stream.
    pub const EOS_FLAG: u8 = 0x20;

    #[inline]
    pub fn frame_length_volatile(term: &AtomicBuffer, frame_offset: usize) -> i32 {
        term.get_i32_volatile(frame_offset + hdr::FRAME_LENGTH_FIELD_OFFSET)
    }

    /// Commit a frame: the ordered length store happens-after every payload
    /// and header write.
    #[inline]
    pub fn set_frame_length_ordered(term: &AtomicBuffer, frame_offset: usize, length: i32) {
        term.put_i32_ordered(frame_offset + hdr::FRAME_LENGTH_FIELD_OFFSET, length)
    }

    #[inline]
    pub fn frame_type(term: &AtomicBuffer, frame_offset: usize) -> u16 {
        term.get_u16(frame_offset + hdr::TYPE_FIELD_OFFSET)
    }

    #[inline]
    pub fn set_frame_type(term: &AtomicBuffer, frame_offset: usize, frame_type: u16) {
        term.put_u16(frame_offset + hdr::TYPE_FIELD_OFFSET, frame_type)
    }

    #[inline]
    pub fn is_padding_frame(term: &AtomicBuffer, frame_offset: usize) -> bool {
        frame_type(term, frame_offset) == hdr::HDR_TYPE_PAD
    }

    #[inline]
    pub fn frame_flags(term: &AtomicBuffer, frame_offset: usize) -> u8 {
        term.get_u8(frame_offset + hdr::FLAGS_FIELD_OFFSET)
    }

    #[inline]
    pub fn set_frame_flags(term: &AtomicBuffer, frame_offset: usize, flags: u8) {
        term.put_u8(frame_offset + hdr::FLAGS_FIELD_OFFSET, flags)
    }

    #[inline]
    pub fn frame_term_offset(term: &AtomicBuffer, frame_offset: usize) -> i32 {
        term.get_i32(frame_offset + hdr::TERM_OFFSET_FIELD_OFFSET)
    }

    #[inline]
    pub fn frame_session_id(term: &AtomicBuffer, frame_offset: usize) -> i32 {
        term.get_i32(frame_offset + hdr::SESSION_ID_FIELD_OFFSET)
    }

    #[inline]
    pub fn frame_term_id(term: &AtomicBuffer, frame_offset: usize) -> i32 {
        term.get_i32(frame_offset + hdr::TERM_ID_FIELD_OFFSET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::OwnedBuffer;

    #[test]
    fn committed_length_is_visible() {
        let owned = OwnedBuffer::new(256);
        let term = owned.buffer();

        assert_eq!(frame_descriptor::frame_length_volatile(&term, 0), 0);
        frame_descriptor::set_frame_length_ordered(&term, 0, 64);
        assert_eq!(frame_descriptor::frame_length_volatile(&term, 0), 64);
    }

    #[test]
    fn padding_frames_are_recognised() {
        let owned = OwnedBuffer::new(256);
        let term = owned.buffer();

        frame_descriptor::set_frame_type(&term, 32, data_frame_header::HDR_TYPE_PAD);
        assert!(frame_descriptor::is_padding_frame(&term, 32));

        frame_descriptor::set_frame_type(&term, 32, data_frame_header::HDR_TYPE_DATA);
        assert!(!frame_descriptor::is_padding_frame(&term, 32));
    }

    #[test]
    fn flags_round_trip() {
        let owned = OwnedBuffer::new(64);
        let term = owned.buffer();

        frame_descriptor::set_frame_flags(&term, 0, frame_descriptor::BEGIN_FRAG_FLAG);
        assert_eq!(
            frame_descriptor::frame_flags(&term, 0),
            frame_descriptor::BEGIN_FRAG_FLAG
        );
        assert_eq!(frame_descriptor::UNFRAGMENTED, 0xC0);
    }
}
