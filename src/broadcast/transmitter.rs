//! Single-producer broadcast transmitter
//!
//! The media driver is the producer of the to-clients broadcast; this
//! transmitter implements that side of the protocol so the receiver can be
//! exercised in-process by tests and tooling.

use std::sync::atomic::{fence, Ordering};

use super::record_descriptor::*;
use super::{LATEST_COUNTER_OFFSET, TAIL_COUNTER_OFFSET, TAIL_INTENT_COUNTER_OFFSET, TRAILER_LENGTH};
use crate::buffer::AtomicBuffer;
use crate::error::{Result, SeuratError};
use crate::util::{align, is_power_of_two};

/// Single-threaded producer over a broadcast buffer.
#[derive(Debug)]
pub struct Transmitter {
    buffer: AtomicBuffer,
    capacity: usize,
    mask: i64,
    max_msg_length: usize,
    tail_intent_counter_index: usize,
    tail_counter_index: usize,
    latest_counter_index: usize,
}

impl Transmitter {
    /// Wrap a region whose layout is `[data (power of two)] [trailer]`.
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

        Ok(Self {
            buffer,
            capacity,
            mask: capacity as i64 - 1,
            max_msg_length: capacity / 8,
            tail_intent_counter_index: capacity + TAIL_INTENT_COUNTER_OFFSET,
            tail_counter_index: capacity + TAIL_COUNTER_OFFSET,
            latest_counter_index: capacity + LATEST_COUNTER_OFFSET,
        })
    }

    /// Largest payload accepted by [`transmit`](Self::transmit).
    pub fn max_msg_length(&self) -> usize {
        self.max_msg_length
    }

    /// Broadcast one record. Never blocks: receivers that cannot keep up
    /// are lapped, not waited for.
    pub fn transmit(&self, msg_type_id: i32, src: &[u8]) -> Result<()> {
        if msg_type_id < 1 {
            return Err(SeuratError::invalid_parameter(
                "msg_type_id",
                format!("{} is not a valid message type id", msg_type_id),
            ));
        }
        if src.len() > self.max_msg_length {
            return Err(SeuratError::invalid_parameter(
                "length",
                format!("{} exceeds max message length {}", src.len(), self.max_msg_length),
            ));
        }

        let mut current_tail = self.buffer.get_i64(self.tail_counter_index);
        let mut record_offset = (current_tail & self.mask) as usize;
        let to_end_of_buffer = self.capacity - record_offset;

        let record_length = src.len() + HEADER_LENGTH;
        let aligned_length = align(record_length, RECORD_ALIGNMENT);

        if to_end_of_buffer < aligned_length {
            // Pad out the wrap; the record goes at offset zero.
            self.signal_tail_intent(current_tail + (to_end_of_buffer + aligned_length) as i64);

            self.buffer
                .put_i32(length_offset(record_offset), to_end_of_buffer as i32);
            self.buffer
                .put_i32(type_offset(record_offset), PADDING_MSG_TYPE_ID);

            current_tail += to_end_of_buffer as i64;
            record_offset = 0;
        } else {
            self.signal_tail_intent(current_tail + aligned_length as i64);
        }

        self.buffer
            .put_i32(length_offset(record_offset), record_length as i32);
        self.buffer.put_i32(type_offset(record_offset), msg_type_id);
        self.buffer.put_bytes(msg_offset(record_offset), src);

        self.buffer.put_i64(self.latest_counter_index, current_tail);
        self.buffer
            .put_i64_ordered(self.tail_counter_index, current_tail + aligned_length as i64);

        Ok(())
    }

    /// Publish the tail the producer is about to reach so receivers can
    /// detect records being overwritten underneath them.
    fn signal_tail_intent(&self, new_tail: i64) {
        self.buffer
            .put_i64_ordered(self.tail_intent_counter_index, new_tail);
        // Record writes below must not be reordered before the intent store.
        fence(Ordering::SeqCst);
    }
}
