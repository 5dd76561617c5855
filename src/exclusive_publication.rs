//! Single-threaded publication with cached term state

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::buffer::AtomicBuffer;
use crate::conductor::ClientConductor;
use crate::counters::Position;
use crate::error::Result;
use crate::logbuffer::{
    self, data_frame_header, BufferClaim, ExclusiveTermAppender, LogBuffers,
    ReservedValueSupplier, PARTITION_COUNT,
};
use crate::publication::{
    ADMIN_ACTION, BACK_PRESSURED, MAX_POSITION_EXCEEDED, NOT_CONNECTED, PUBLICATION_CLOSED,
};

/// Publication promising single-threaded use: offers take `&mut self`, the
/// term tail is a plain ordered store instead of an atomic add, and the
/// current term id/offset are cached between calls.
#[derive(Debug)]
pub struct ExclusivePublication {
    conductor: Weak<ClientConductor>,
    /// Keeps the mapping alive for the lifetime of this handle.
    _log_buffers: Arc<LogBuffers>,
    meta_buffer: AtomicBuffer,
    appenders: [ExclusiveTermAppender; PARTITION_COUNT],
    channel: String,
    stream_id: i32,
    session_id: i32,
    initial_term_id: i32,
    correlation_id: i64,
    registration_id: i64,
    max_payload_length: usize,
    max_message_length: usize,
    position_bits_to_shift: u32,
    term_length: usize,
    max_possible_position: i64,
    position_limit: Position,
    channel_status_id: i32,
    is_closed: AtomicBool,

    active_partition_index: usize,
    term_count: i32,
    term_id: i32,
    term_offset: i32,
    term_begin_position: i64,
}

impl ExclusivePublication {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        conductor: Weak<ClientConductor>,
        log_buffers: Arc<LogBuffers>,
        channel: String,
        stream_id: i32,
        session_id: i32,
        correlation_id: i64,
        registration_id: i64,
        position_limit: Position,
        channel_status_id: i32,
    ) -> Self {
        let meta_buffer = log_buffers.meta_buffer();
        let default_header = logbuffer::default_frame_header(&meta_buffer);
        let appenders = [
            ExclusiveTermAppender::new(log_buffers.term_buffer(0), meta_buffer, default_header, 0),
            ExclusiveTermAppender::new(log_buffers.term_buffer(1), meta_buffer, default_header, 1),
            ExclusiveTermAppender::new(log_buffers.term_buffer(2), meta_buffer, default_header, 2),
        ];

        let term_length = log_buffers.term_length();
        let mtu = logbuffer::mtu_length(&meta_buffer);
        let initial_term_id = logbuffer::initial_term_id(&meta_buffer);
        let position_bits_to_shift = logbuffer::position_bits_to_shift(term_length);

        // Seed the cached tail from the active partition.
        let term_count = logbuffer::active_term_count(&meta_buffer);
        let index = logbuffer::index_by_term_count(term_count as i64);
        let raw_tail = meta_buffer.get_i64_volatile(logbuffer::tail_counter_offset(index));
        let term_id = logbuffer::term_id(raw_tail);
        let term_offset = logbuffer::term_offset(raw_tail, term_length as i64);

        Self {
            conductor,
            meta_buffer,
            appenders,
            channel,
            stream_id,
            session_id,
            initial_term_id,
            correlation_id,
            registration_id,
            max_payload_length: mtu - data_frame_header::LENGTH,
            max_message_length: term_length / 8,
            position_bits_to_shift,
            term_length,
            max_possible_position: (term_length as i64) << 31,
            position_limit,
            channel_status_id,
            is_closed: AtomicBool::new(false),
            active_partition_index: index,
            term_count,
            term_id,
            term_offset,
            term_begin_position: logbuffer::compute_term_begin_position(
                term_id,
                position_bits_to_shift,
                initial_term_id,
            ),
            _log_buffers: log_buffers,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }

    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    pub fn term_length(&self) -> usize {
        self.term_length
    }

    pub fn max_payload_length(&self) -> usize {
        self.max_payload_length
    }

    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    pub fn channel_status_id(&self) -> i32 {
        self.channel_status_id
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        !self.is_closed() && logbuffer::is_connected(&self.meta_buffer)
    }

    /// Current publisher position (cached; exact for the single writer).
    pub fn position(&self) -> i64 {
        if self.is_closed() {
            return PUBLICATION_CLOSED;
        }
        self.term_begin_position + self.term_offset as i64
    }

    pub fn position_limit(&self) -> i64 {
        if self.is_closed() {
            return PUBLICATION_CLOSED;
        }
        self.position_limit.get_volatile()
    }

    /// Non-blocking publish; see [`Publication::offer`](crate::Publication::offer)
    /// for sentinel semantics.
    ///
    /// # Panics
    /// If `src` exceeds [`max_message_length`](Self::max_message_length).
    pub fn offer(&mut self, src: &[u8]) -> i64 {
        self.offer_with(src, None)
    }

    pub fn offer_with(
        &mut self,
        src: &[u8],
        reserved_value_supplier: Option<ReservedValueSupplier>,
    ) -> i64 {
        assert!(
            src.len() <= self.max_message_length,
            "message length {} exceeds max {}",
            src.len(),
            self.max_message_length
        );

        if self.is_closed() {
            return PUBLICATION_CLOSED;
        }

        let limit = self.position_limit.get_volatile();
        let position = self.term_begin_position + self.term_offset as i64;
        if position >= limit {
            return self.back_pressure_status(position, src.len());
        }

        let appender = &self.appenders[self.active_partition_index];
        let result = if src.len() <= self.max_payload_length {
            appender.append_unfragmented(self.term_id, self.term_offset, src, reserved_value_supplier)
        } else {
            appender.append_fragmented(
                self.term_id,
                self.term_offset,
                src,
                self.max_payload_length,
                reserved_value_supplier,
            )
        };

        self.resolve(result, position)
    }

    /// Reserve a frame for zero-copy filling.
    ///
    /// # Panics
    /// If `length` exceeds [`max_payload_length`](Self::max_payload_length).
    pub fn try_claim(&mut self, length: usize, buffer_claim: &mut BufferClaim) -> i64 {
        assert!(
            length <= self.max_payload_length,
            "claim length {} exceeds max payload {}",
            length,
            self.max_payload_length
        );

        if self.is_closed() {
            return PUBLICATION_CLOSED;
        }

        let limit = self.position_limit.get_volatile();
        let position = self.term_begin_position + self.term_offset as i64;
        if position >= limit {
            return self.back_pressure_status(position, length);
        }

        let appender = &self.appenders[self.active_partition_index];
        let result = appender.claim(self.term_id, self.term_offset, length, buffer_claim);
        self.resolve(result, position)
    }

    /// Close the publication and release driver resources. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if !self.is_closed.swap(true, Ordering::AcqRel) {
            if let Some(conductor) = self.conductor.upgrade() {
                conductor.release_publication(self.correlation_id)?;
            }
        }
        Ok(())
    }

    fn resolve(&mut self, result: Option<i32>, position: i64) -> i64 {
        match result {
            Some(resulting_offset) => {
                self.term_offset = resulting_offset;
                self.term_begin_position + resulting_offset as i64
            }
            None => {
                if position + self.term_length as i64 > self.max_possible_position {
                    return MAX_POSITION_EXCEEDED;
                }
                self.rotate_term();
                ADMIN_ACTION
            }
        }
    }

    fn rotate_term(&mut self) {
        let next_index = logbuffer::index_by_term_count(self.term_count as i64 + 1);
        self.active_partition_index = next_index;
        self.term_count += 1;
        self.term_id += 1;
        self.term_offset = 0;
        self.term_begin_position += self.term_length as i64;

        self.meta_buffer.put_i64_ordered(
            logbuffer::tail_counter_offset(next_index),
            logbuffer::pack_tail(self.term_id, 0),
        );
        logbuffer::set_active_term_count_ordered(&self.meta_buffer, self.term_count);
    }

    fn back_pressure_status(&self, current_position: i64, message_length: usize) -> i64 {
        if current_position + message_length as i64 >= self.max_possible_position {
            return MAX_POSITION_EXCEEDED;
        }
        if logbuffer::is_connected(&self.meta_buffer) {
            BACK_PRESSURED
        } else {
            NOT_CONNECTED
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.is_closed.store(true, Ordering::Release);
    }
}

impl Drop for ExclusivePublication {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
