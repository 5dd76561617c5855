//! Loss-detecting broadcast receiver

use std::sync::atomic::{fence, Ordering};

use super::record_descriptor::*;
use super::{LATEST_COUNTER_OFFSET, TAIL_COUNTER_OFFSET, TAIL_INTENT_COUNTER_OFFSET, TRAILER_LENGTH};
use crate::buffer::AtomicBuffer;
use crate::error::{Result, SeuratError};
use crate::util::{align, is_power_of_two};

/// One consumer's view of a broadcast buffer.
///
/// The receiver keeps a local cursor and is not flow-controlled: if the
/// producer laps it, the receiver re-syncs to the latest record and counts
/// the loss. A delivered record is only trustworthy once [`validate`]
/// (Self::validate) confirms the producer did not overwrite it mid-read.
#[derive(Debug)]
pub struct Receiver {
    buffer: AtomicBuffer,
    capacity: usize,
    mask: i64,
    tail_intent_counter_index: usize,
    tail_counter_index: usize,
    latest_counter_index: usize,
    record_offset: usize,
    cursor: i64,
    next_record: i64,
    lapped_count: i64,
}

impl Receiver {
    /// Wrap a region whose layout is `[data (power of two)] [trailer]`.
    /// Reception starts at the current tail; history is not replayed.
    pub fn new(buffer: AtomicBuffer) -> Result<Self> {
        let total = buffer.capacity();
        if total <= TRAILER_LENGTH {
            return Err(SeuratError::invalid_parameter(
                "buffer",
                "region shorter than the broadcast trailer",
            ));
        }
        let capacity = total - TRAILER_LENGTH;
        if !is_power_of_two(capacity) {
            return Err(SeuratError::invalid_parameter(
                "buffer",
                format!("data capacity {} is not a power of two", capacity),
            ));
        }

        let tail_counter_index = capacity + TAIL_COUNTER_OFFSET;
        let cursor = buffer.get_i64_volatile(tail_counter_index);

        Ok(Self {
            buffer,
            capacity,
            mask: capacity as i64 - 1,
            tail_intent_counter_index: capacity + TAIL_INTENT_COUNTER_OFFSET,
            tail_counter_index,
            latest_counter_index: capacity + LATEST_COUNTER_OFFSET,
            record_offset: (cursor & (capacity as i64 - 1)) as usize,
            cursor,
            next_record: cursor,
            lapped_count: 0,
        })
    }

    /// Data-area capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Times this receiver has been lapped by the producer.
    pub fn lapped_count(&self) -> i64 {
        self.lapped_count
    }

    /// Advance to the next record if one is available.
    pub fn receive_next(&mut self) -> bool {
        let tail = self.buffer.get_i64_volatile(self.tail_counter_index);
        let mut cursor = self.next_record;

        if tail <= cursor {
            return false;
        }

        let mut record_offset = (cursor & self.mask) as usize;

        if !self.validate_at(cursor) {
            // Lapped while idle: jump forward to the latest record.
            self.lapped_count += 1;
            cursor = self.buffer.get_i64(self.latest_counter_index);
            record_offset = (cursor & self.mask) as usize;
        }

        self.cursor = cursor;
        self.next_record = cursor
            + align(
                self.buffer.get_i32(length_offset(record_offset)) as usize,
                RECORD_ALIGNMENT,
            ) as i64;

        if self.buffer.get_i32(type_offset(record_offset)) == PADDING_MSG_TYPE_ID {
            // The producer padded out the wrap; the record follows at zero.
            record_offset = 0;
            self.cursor = self.next_record;
            self.next_record += align(
                self.buffer.get_i32(length_offset(record_offset)) as usize,
                RECORD_ALIGNMENT,
            ) as i64;
        }

        self.record_offset = record_offset;
        true
    }

    /// Confirm the record delivered by the last [`receive_next`]
    /// (Self::receive_next) was not overwritten while it was being read.
    pub fn validate(&self) -> bool {
        fence(Ordering::Acquire);
        self.validate_at(self.cursor)
    }

    #[inline]
    fn validate_at(&self, cursor: i64) -> bool {
        cursor + self.capacity as i64
            > self.buffer.get_i64_volatile(self.tail_intent_counter_index)
    }

    /// Type id of the current record.
    pub fn msg_type_id(&self) -> i32 {
        self.buffer.get_i32(type_offset(self.record_offset))
    }

    /// Offset of the current record's payload within [`buffer`](Self::buffer).
    pub fn offset(&self) -> usize {
        msg_offset(self.record_offset)
    }

    /// Payload length of the current record.
    pub fn length(&self) -> usize {
        self.buffer.get_i32(length_offset(self.record_offset)) as usize - HEADER_LENGTH
    }

    /// The underlying buffer the payload must be read from.
    pub fn buffer(&self) -> &AtomicBuffer {
        &self.buffer
    }
}
