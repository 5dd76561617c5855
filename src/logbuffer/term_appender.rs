//! Term appenders: frame writing on the publication side
//!
//! [`TermAppender`] serves concurrent publishers: the partition tail is
//! reserved with an atomic add, so each writer owns a disjoint span of the
//! term. [`ExclusiveTermAppender`] serves a single-threaded publisher that
//! tracks the tail itself and publishes it with a plain ordered store.

use super::buffer_claim::BufferClaim;
use super::frame::data_frame_header as hdr;
use super::frame::{frame_descriptor, FRAME_ALIGNMENT};
use super::{pack_tail, tail_counter_offset, term_id as tail_term_id};
use crate::buffer::AtomicBuffer;
use crate::util::align;

/// Fills the reserved-value field of a frame before it is committed:
/// `(term_buffer, frame_offset, frame_length) -> value`.
pub type ReservedValueSupplier<'a> = &'a dyn Fn(&AtomicBuffer, usize, usize) -> i64;

/// Outcome of an append attempt on one term partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    /// Frame(s) written; `resulting_offset` is one past the last frame.
    Position { resulting_offset: i32, term_id: i32 },
    /// The term is exhausted (padding written if there was a remainder);
    /// the publication must rotate to the next partition.
    TermFull { term_id: i32 },
}

/// Concurrent appender over one term partition.
#[derive(Debug)]
pub struct TermAppender {
    term_buffer: AtomicBuffer,
    meta_buffer: AtomicBuffer,
    default_header: AtomicBuffer,
    tail_offset: usize,
}

impl TermAppender {
    pub fn new(
        term_buffer: AtomicBuffer,
        meta_buffer: AtomicBuffer,
        default_header: AtomicBuffer,
        partition_index: usize,
    ) -> Self {
        Self {
            term_buffer,
            meta_buffer,
            default_header,
            tail_offset: tail_counter_offset(partition_index),
        }
    }

    /// Raw tail of this partition.
    pub fn raw_tail_volatile(&self) -> i64 {
        self.meta_buffer.get_i64_volatile(self.tail_offset)
    }

    /// Append a message that fits a single frame.
    pub fn append_unfragmented(
        &self,
        src: &[u8],
        reserved_value_supplier: Option<ReservedValueSupplier>,
    ) -> Appended {
        let frame_length = src.len() + hdr::LENGTH;
        let aligned_length = align(frame_length, FRAME_ALIGNMENT);
        let term_length = self.term_buffer.capacity();

        let raw_tail = self.get_and_add_raw_tail(aligned_length);
        let term_offset = raw_tail & 0xFFFF_FFFF;
        let term_id = tail_term_id(raw_tail);

        let resulting_offset = term_offset + aligned_length as i64;
        if resulting_offset > term_length as i64 {
            self.handle_end_of_log(term_offset, term_length, term_id);
            return Appended::TermFull { term_id };
        }

        let frame_offset = term_offset as usize;
        self.write_header(frame_offset, term_id);
        self.term_buffer.put_bytes(frame_offset + hdr::DATA_OFFSET, src);

        if let Some(supplier) = reserved_value_supplier {
            let value = supplier(&self.term_buffer, frame_offset, frame_length);
            self.term_buffer
                .put_i64(frame_offset + hdr::RESERVED_VALUE_FIELD_OFFSET, value);
        }

        frame_descriptor::set_frame_length_ordered(
            &self.term_buffer,
            frame_offset,
            frame_length as i32,
        );

        Appended::Position {
            resulting_offset: resulting_offset as i32,
            term_id,
        }
    }

    /// Append a message larger than the max payload as a run of fragments.
    /// The whole run is reserved in one tail add, so readers never observe a
    /// partially-reserved message interleaved with another publisher.
    pub fn append_fragmented(
        &self,
        src: &[u8],
        max_payload_length: usize,
        reserved_value_supplier: Option<ReservedValueSupplier>,
    ) -> Appended {
        let num_max_payloads = src.len() / max_payload_length;
        let remaining_payload = src.len() % max_payload_length;
        let last_frame_length = if remaining_payload > 0 {
            align(remaining_payload + hdr::LENGTH, FRAME_ALIGNMENT)
        } else {
            0
        };
        let required_length =
            num_max_payloads * (max_payload_length + hdr::LENGTH) + last_frame_length;
        let term_length = self.term_buffer.capacity();

        let raw_tail = self.get_and_add_raw_tail(required_length);
        let term_offset = raw_tail & 0xFFFF_FFFF;
        let term_id = tail_term_id(raw_tail);

        let resulting_offset = term_offset + required_length as i64;
        if resulting_offset > term_length as i64 {
            self.handle_end_of_log(term_offset, term_length, term_id);
            return Appended::TermFull { term_id };
        }

        let mut flags = frame_descriptor::BEGIN_FRAG_FLAG;
        let mut remaining = src.len();
        let mut frame_offset = term_offset as usize;

        loop {
            let bytes_to_write = remaining.min(max_payload_length);
            let frame_length = bytes_to_write + hdr::LENGTH;
            let aligned_frame_length = align(frame_length, FRAME_ALIGNMENT);

            self.write_header(frame_offset, term_id);
            self.term_buffer.put_bytes(
                frame_offset + hdr::DATA_OFFSET,
                &src[src.len() - remaining..src.len() - remaining + bytes_to_write],
            );

            if remaining <= max_payload_length {
                flags |= frame_descriptor::END_FRAG_FLAG;
            }
            frame_descriptor::set_frame_flags(&self.term_buffer, frame_offset, flags);

            if let Some(supplier) = reserved_value_supplier {
                let value = supplier(&self.term_buffer, frame_offset, frame_length);
                self.term_buffer
                    .put_i64(frame_offset + hdr::RESERVED_VALUE_FIELD_OFFSET, value);
            }

            frame_descriptor::set_frame_length_ordered(
                &self.term_buffer,
                frame_offset,
                frame_length as i32,
            );

            flags = 0;
            frame_offset += aligned_frame_length;
            remaining -= bytes_to_write;

            if remaining == 0 {
                break;
            }
        }

        Appended::Position {
            resulting_offset: resulting_offset as i32,
            term_id,
        }
    }

    /// Reserve a frame for in-place filling via [`BufferClaim`].
    pub fn claim(&self, length: usize, buffer_claim: &mut BufferClaim) -> Appended {
        let frame_length = length + hdr::LENGTH;
        let aligned_length = align(frame_length, FRAME_ALIGNMENT);
        let term_length = self.term_buffer.capacity();

        let raw_tail = self.get_and_add_raw_tail(aligned_length);
        let term_offset = raw_tail & 0xFFFF_FFFF;
        let term_id = tail_term_id(raw_tail);

        let resulting_offset = term_offset + aligned_length as i64;
        if resulting_offset > term_length as i64 {
            self.handle_end_of_log(term_offset, term_length, term_id);
            return Appended::TermFull { term_id };
        }

        let frame_offset = term_offset as usize;
        self.write_header(frame_offset, term_id);
        // Negative length marks the claim in progress until commit/abort.
        self.term_buffer.put_i32_ordered(
            frame_offset + hdr::FRAME_LENGTH_FIELD_OFFSET,
            -(frame_length as i32),
        );
        buffer_claim.wrap(&self.term_buffer, frame_offset, frame_length);

        Appended::Position {
            resulting_offset: resulting_offset as i32,
            term_id,
        }
    }

    fn get_and_add_raw_tail(&self, aligned_length: usize) -> i64 {
        self.meta_buffer
            .get_and_add_i64(self.tail_offset, aligned_length as i64)
    }

    /// Copy the default header template and stamp the per-frame fields.
    /// The frame length slot stays zero until the ordered commit.
    fn write_header(&self, frame_offset: usize, term_id: i32) {
        self.term_buffer
            .copy_from(frame_offset, &self.default_header, 0, hdr::LENGTH);
        self.term_buffer
            .put_i32(frame_offset + hdr::FRAME_LENGTH_FIELD_OFFSET, 0);
        self.term_buffer
            .put_i32(frame_offset + hdr::TERM_OFFSET_FIELD_OFFSET, frame_offset as i32);
        self.term_buffer
            .put_i32(frame_offset + hdr::TERM_ID_FIELD_OFFSET, term_id);
    }

    /// First appender past the end pads out the remainder of the term.
    fn handle_end_of_log(&self, term_offset: i64, term_length: usize, term_id: i32) {
        if term_offset < term_length as i64 {
            let frame_offset = term_offset as usize;
            let padding_length = term_length - frame_offset;

            self.write_header(frame_offset, term_id);
            frame_descriptor::set_frame_type(&self.term_buffer, frame_offset, hdr::HDR_TYPE_PAD);
            frame_descriptor::set_frame_flags(
                &self.term_buffer,
                frame_offset,
                frame_descriptor::UNFRAGMENTED,
            );
            frame_descriptor::set_frame_length_ordered(
                &self.term_buffer,
                frame_offset,
                padding_length as i32,
            );
        }
    }
}

/// Single-writer appender: the publication tracks `termId`/`termOffset`
/// itself and the new raw tail is published with a plain ordered store.
#[derive(Debug)]
pub struct ExclusiveTermAppender {
    term_buffer: AtomicBuffer,
    meta_buffer: AtomicBuffer,
    default_header: AtomicBuffer,
    tail_offset: usize,
}

impl ExclusiveTermAppender {
    pub fn new(
        term_buffer: AtomicBuffer,
        meta_buffer: AtomicBuffer,
        default_header: AtomicBuffer,
        partition_index: usize,
    ) -> Self {
        Self {
            term_buffer,
            meta_buffer,
            default_header,
            tail_offset: tail_counter_offset(partition_index),
        }
    }

    /// Append a single-frame message; returns the resulting term offset, or
    /// `None` when the term is exhausted.
    pub fn append_unfragmented(
        &self,
        term_id: i32,
        term_offset: i32,
        src: &[u8],
        reserved_value_supplier: Option<ReservedValueSupplier>,
    ) -> Option<i32> {
        let frame_length = src.len() + hdr::LENGTH;
        let aligned_length = align(frame_length, FRAME_ALIGNMENT);
        let term_length = self.term_buffer.capacity();

        let resulting_offset = term_offset as i64 + aligned_length as i64;
        self.put_raw_tail_ordered(term_id, resulting_offset);

        if resulting_offset > term_length as i64 {
            self.handle_end_of_log(term_offset as i64, term_length, term_id);
            return None;
        }

        let frame_offset = term_offset as usize;
        self.write_header(frame_offset, term_id);
        self.term_buffer.put_bytes(frame_offset + hdr::DATA_OFFSET, src);

        if let Some(supplier) = reserved_value_supplier {
            let value = supplier(&self.term_buffer, frame_offset, frame_length);
            self.term_buffer
                .put_i64(frame_offset + hdr::RESERVED_VALUE_FIELD_OFFSET, value);
        }

        frame_descriptor::set_frame_length_ordered(
            &self.term_buffer,
            frame_offset,
            frame_length as i32,
        );

        Some(resulting_offset as i32)
    }

    /// Append a multi-fragment message.
    pub fn append_fragmented(
        &self,
        term_id: i32,
        term_offset: i32,
        src: &[u8],
        max_payload_length: usize,
        reserved_value_supplier: Option<ReservedValueSupplier>,
    ) -> Option<i32> {
        let num_max_payloads = src.len() / max_payload_length;
        let remaining_payload = src.len() % max_payload_length;
        let last_frame_length = if remaining_payload > 0 {
            align(remaining_payload + hdr::LENGTH, FRAME_ALIGNMENT)
        } else {
            0
        };
        let required_length =
            num_max_payloads * (max_payload_length + hdr::LENGTH) + last_frame_length;
        let term_length = self.term_buffer.capacity();

        let resulting_offset = term_offset as i64 + required_length as i64;
        self.put_raw_tail_ordered(term_id, resulting_offset);

        if resulting_offset > term_length as i64 {
            self.handle_end_of_log(term_offset as i64, term_length, term_id);
            return None;
        }

        let mut flags = frame_descriptor::BEGIN_FRAG_FLAG;
        let mut remaining = src.len();
        let mut frame_offset = term_offset as usize;

        loop {
            let bytes_to_write = remaining.min(max_payload_length);
            let frame_length = bytes_to_write + hdr::LENGTH;
            let aligned_frame_length = align(frame_length, FRAME_ALIGNMENT);

            self.write_header(frame_offset, term_id);
            self.term_buffer.put_bytes(
                frame_offset + hdr::DATA_OFFSET,
                &src[src.len() - remaining..src.len() - remaining + bytes_to_write],
            );

            if remaining <= max_payload_length {
                flags |= frame_descriptor::END_FRAG_FLAG;
            }
            frame_descriptor::set_frame_flags(&self.term_buffer, frame_offset, flags);

            if let Some(supplier) = reserved_value_supplier {
                let value = supplier(&self.term_buffer, frame_offset, frame_length);
                self.term_buffer
                    .put_i64(frame_offset + hdr::RESERVED_VALUE_FIELD_OFFSET, value);
            }

            frame_descriptor::set_frame_length_ordered(
                &self.term_buffer,
                frame_offset,
                frame_length as i32,
            );

            flags = 0;
            frame_offset += aligned_frame_length;
            remaining -= bytes_to_write;

            if remaining == 0 {
                break;
            }
        }

        Some(resulting_offset as i32)
    }

    /// Reserve a frame for in-place filling.
    pub fn claim(
        &self,
        term_id: i32,
        term_offset: i32,
        length: usize,
        buffer_claim: &mut BufferClaim,
    ) -> Option<i32> {
        let frame_length = length + hdr::LENGTH;
        let aligned_length = align(frame_length, FRAME_ALIGNMENT);
        let term_length = self.term_buffer.capacity();

        let resulting_offset = term_offset as i64 + aligned_length as i64;
        self.put_raw_tail_ordered(term_id, resulting_offset);

        if resulting_offset > term_length as i64 {
            self.handle_end_of_log(term_offset as i64, term_length, term_id);
            return None;
        }

        let frame_offset = term_offset as usize;
        self.write_header(frame_offset, term_id);
        self.term_buffer.put_i32_ordered(
            frame_offset + hdr::FRAME_LENGTH_FIELD_OFFSET,
            -(frame_length as i32),
        );
        buffer_claim.wrap(&self.term_buffer, frame_offset, frame_length);

        Some(resulting_offset as i32)
    }

    fn put_raw_tail_ordered(&self, term_id: i32, term_offset: i64) {
        self.meta_buffer
            .put_i64_ordered(self.tail_offset, pack_tail(term_id, term_offset as i32));
    }

    fn write_header(&self, frame_offset: usize, term_id: i32) {
        self.term_buffer
            .copy_from(frame_offset, &self.default_header, 0, hdr::LENGTH);
        self.term_buffer
            .put_i32(frame_offset + hdr::FRAME_LENGTH_FIELD_OFFSET, 0);
        self.term_buffer
            .put_i32(frame_offset + hdr::TERM_OFFSET_FIELD_OFFSET, frame_offset as i32);
        self.term_buffer
            .put_i32(frame_offset + hdr::TERM_ID_FIELD_OFFSET, term_id);
    }

    fn handle_end_of_log(&self, term_offset: i64, term_length: usize, term_id: i32) {
        if term_offset < term_length as i64 {
            let frame_offset = term_offset as usize;
            let padding_length = term_length - frame_offset;

            self.write_header(frame_offset, term_id);
            frame_descriptor::set_frame_type(&self.term_buffer, frame_offset, hdr::HDR_TYPE_PAD);
            frame_descriptor::set_frame_flags(
                &self.term_buffer,
                frame_offset,
                frame_descriptor::UNFRAGMENTED,
            );
            frame_descriptor::set_frame_length_ordered(
                &self.term_buffer,
                frame_offset,
                padding_length as i32,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::OwnedBuffer;
    use crate::logbuffer::{
        default_frame_header, initialise_log_metadata, raw_tail_volatile, LOG_META_DATA_LENGTH,
    };

    const TERM_LENGTH: usize = 64 * 1024;
    const INITIAL_TERM_ID: i32 = 40;

    fn appender() -> (OwnedBuffer, OwnedBuffer, TermAppender) {
        let term = OwnedBuffer::new(TERM_LENGTH);
        let meta = OwnedBuffer::new(LOG_META_DATA_LENGTH);
        initialise_log_metadata(&meta.buffer(), TERM_LENGTH, 4096, 4096, INITIAL_TERM_ID, 9, 10);
        let appender = TermAppender::new(
            term.buffer(),
            meta.buffer(),
            default_frame_header(&meta.buffer()),
            0,
        );
        (term, meta, appender)
    }

    #[test]
    fn unfragmented_append_writes_committed_frame() {
        let (term, _meta, appender) = appender();
        let payload = b"twelve bytes";

        let outcome = appender.append_unfragmented(payload, None);
        let expected_frame = align(payload.len() + hdr::LENGTH, FRAME_ALIGNMENT);
        assert_eq!(
            outcome,
            Appended::Position {
                resulting_offset: expected_frame as i32,
                term_id: INITIAL_TERM_ID
            }
        );

        let term = term.buffer();
        assert_eq!(
            frame_descriptor::frame_length_volatile(&term, 0),
            (payload.len() + hdr::LENGTH) as i32
        );
        assert_eq!(frame_descriptor::frame_session_id(&term, 0), 9);
        assert_eq!(frame_descriptor::frame_term_id(&term, 0), INITIAL_TERM_ID);
        assert_eq!(frame_descriptor::frame_term_offset(&term, 0), 0);
        assert_eq!(
            frame_descriptor::frame_flags(&term, 0),
            frame_descriptor::UNFRAGMENTED
        );

        let mut out = vec![0u8; payload.len()];
        term.get_bytes(hdr::DATA_OFFSET, &mut out);
        assert_eq!(&out, payload);
    }

    #[test]
    fn appends_advance_the_tail_contiguously() {
        let (term, meta, appender) = appender();

        appender.append_unfragmented(&[1u8; 10], None);
        let outcome = appender.append_unfragmented(&[2u8; 10], None);

        assert_eq!(
            outcome,
            Appended::Position {
                resulting_offset: 128,
                term_id: INITIAL_TERM_ID
            }
        );
        assert_eq!(
            raw_tail_volatile(&meta.buffer(), 0) & 0xFFFF_FFFF,
            128
        );
        assert_eq!(
            frame_descriptor::frame_length_volatile(&term.buffer(), 64),
            42
        );
    }

    #[test]
    fn reserved_value_supplier_fills_header_field() {
        let (term, _meta, appender) = appender();
        let supplier = |_: &AtomicBuffer, _offset: usize, frame_length: usize| frame_length as i64;
        appender.append_unfragmented(&[0u8; 8], Some(&supplier));

        assert_eq!(
            term.buffer().get_i64(hdr::RESERVED_VALUE_FIELD_OFFSET),
            40
        );
    }

    #[test]
    fn fragments_carry_begin_and_end_flags() {
        let (term, _meta, appender) = appender();
        let max_payload = 4096 - hdr::LENGTH;
        let message = vec![7u8; max_payload * 2 + 100];

        let outcome = appender.append_fragmented(&message, max_payload, None);
        assert!(matches!(outcome, Appended::Position { .. }));

        let term = term.buffer();
        let first = frame_descriptor::frame_flags(&term, 0);
        let second = frame_descriptor::frame_flags(&term, 4096);
        let third = frame_descriptor::frame_flags(&term, 8192);

        assert_eq!(first, frame_descriptor::BEGIN_FRAG_FLAG);
        assert_eq!(second, 0);
        assert_eq!(third, frame_descriptor::END_FRAG_FLAG);
        assert_eq!(
            frame_descriptor::frame_length_volatile(&term, 8192),
            (100 + hdr::LENGTH) as i32
        );
    }

    #[test]
    fn term_overflow_pads_and_reports_full() {
        let (term, meta, appender) = appender();
        // Park the tail 32 bytes short of the end.
        crate::logbuffer::set_raw_tail(
            &meta.buffer(),
            0,
            pack_tail(INITIAL_TERM_ID, (TERM_LENGTH - 32) as i32),
        );

        let outcome = appender.append_unfragmented(&[0u8; 64], None);
        assert_eq!(outcome, Appended::TermFull { term_id: INITIAL_TERM_ID });

        let term = term.buffer();
        let pad_offset = TERM_LENGTH - 32;
        assert!(frame_descriptor::is_padding_frame(&term, pad_offset));
        assert_eq!(frame_descriptor::frame_length_volatile(&term, pad_offset), 32);
    }

    #[test]
    fn claim_reserves_then_commit_publishes() {
        let (term, _meta, appender) = appender();
        let mut claim = BufferClaim::default();

        let outcome = appender.claim(100, &mut claim);
        assert!(matches!(outcome, Appended::Position { .. }));

        // In-progress claim is negative to readers.
        assert_eq!(
            term.buffer().get_i32(hdr::FRAME_LENGTH_FIELD_OFFSET),
            -(100 + hdr::LENGTH as i32)
        );

        claim.buffer().put_bytes(claim.offset(), &[9u8; 100]);
        claim.commit();
        assert_eq!(
            frame_descriptor::frame_length_volatile(&term.buffer(), 0),
            100 + hdr::LENGTH as i32
        );
    }

    #[test]
    fn exclusive_appender_tracks_caller_tail() {
        let term = OwnedBuffer::new(TERM_LENGTH);
        let meta = OwnedBuffer::new(LOG_META_DATA_LENGTH);
        initialise_log_metadata(&meta.buffer(), TERM_LENGTH, 4096, 4096, INITIAL_TERM_ID, 9, 10);
        let appender = ExclusiveTermAppender::new(
            term.buffer(),
            meta.buffer(),
            default_frame_header(&meta.buffer()),
            0,
        );

        let first = appender.append_unfragmented(INITIAL_TERM_ID, 0, &[1u8; 8], None);
        assert_eq!(first, Some(64));
        let second = appender.append_unfragmented(INITIAL_TERM_ID, 64, &[2u8; 8], None);
        assert_eq!(second, Some(128));

        let raw = raw_tail_volatile(&meta.buffer(), 0);
        assert_eq!(tail_term_id(raw), INITIAL_TERM_ID);
        assert_eq!(raw & 0xFFFF_FFFF, 128);

        // Term full: padding written, tail parked past the end.
        let full = appender.append_unfragmented(
            INITIAL_TERM_ID,
            (TERM_LENGTH - 32) as i32,
            &[0u8; 64],
            None,
        );
        assert_eq!(full, None);
        assert!(frame_descriptor::is_padding_frame(
            &term.buffer(),
            TERM_LENGTH - 32
        ));
    }
}
