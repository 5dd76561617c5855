//! Copying broadcast receiver used by the client conductor

use super::Receiver;
use crate::buffer::AtomicBuffer;

/// Initial scratch capacity; grows to the largest record seen.
const SCRATCH_BUFFER_LENGTH: usize = 4096;

/// Wraps a raw [`Receiver`], copying each record into an owned scratch
/// buffer before the handler runs. The producer's slot is validated and
/// released before user code executes, so a slow handler delays delivery
/// by at most one record rather than stalling loss detection mid-read.
#[derive(Debug)]
pub struct CopyReceiver {
    receiver: Receiver,
    scratch: Vec<u8>,
}

impl CopyReceiver {
    pub fn new(receiver: Receiver) -> Self {
        Self {
            receiver,
            scratch: vec![0u8; SCRATCH_BUFFER_LENGTH],
        }
    }

    /// Drain available records, invoking `handler(msg_type_id, buffer,
    /// offset, length)` over the copied payload. Records overwritten while
    /// being copied are discarded (the lap is counted). Returns the number
    /// of records delivered.
    pub fn receive<F>(&mut self, handler: &mut F) -> usize
    where
        F: FnMut(i32, &AtomicBuffer, usize, usize),
    {
        let mut messages_received = 0;

        while self.receiver.receive_next() {
            let length = self.receiver.length();
            if length > self.scratch.len() {
                self.scratch.resize(length.next_power_of_two(), 0);
            }

            let msg_type_id = self.receiver.msg_type_id();
            self.receiver
                .buffer()
                .get_bytes(self.receiver.offset(), &mut self.scratch[..length]);

            if !self.receiver.validate() {
                // Torn copy; the lap was counted, skip the record.
                continue;
            }

            let view = AtomicBuffer::wrap_slice(&mut self.scratch[..length]);
            handler(msg_type_id, &view, 0, length);
            messages_received += 1;
        }

        messages_received
    }

    /// Times the underlying receiver has been lapped.
    pub fn lapped_count(&self) -> i64 {
        self.receiver.lapped_count()
    }
}
