//! User-facing publication: non-blocking offers into a log buffer

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::buffer::AtomicBuffer;
use crate::conductor::ClientConductor;
use crate::counters::Position;
use crate::error::Result;
use crate::logbuffer::{
    self, data_frame_header, Appended, BufferClaim, LogBuffers, ReservedValueSupplier,
    TermAppender, PARTITION_COUNT,
};

/// Stream is not connected to a subscriber.
pub const NOT_CONNECTED: i64 = -1;
/// Offer rejected by flow control; retry after pacing.
pub const BACK_PRESSURED: i64 = -2;
/// An administrative action (term rotation) occupied the slot; retry.
pub const ADMIN_ACTION: i64 = -3;
/// The publication (or its client) is closed.
pub const PUBLICATION_CLOSED: i64 = -4;
/// The stream reached the maximum position a term id can express.
pub const MAX_POSITION_EXCEEDED: i64 = -5;

/// Shared publication: any number of threads may offer concurrently; frame
/// slots are reserved with atomic adds on the partition tail.
#[derive(Debug)]
pub struct Publication {
    conductor: Weak<ClientConductor>,
    /// Keeps the mapping alive for the lifetime of this handle.
    _log_buffers: Arc<LogBuffers>,
    meta_buffer: AtomicBuffer,
    appenders: [TermAppender; PARTITION_COUNT],
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
}

impl Publication {
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
            TermAppender::new(log_buffers.term_buffer(0), meta_buffer, default_header, 0),
            TermAppender::new(log_buffers.term_buffer(1), meta_buffer, default_header, 1),
            TermAppender::new(log_buffers.term_buffer(2), meta_buffer, default_header, 2),
        ];

        let term_length = log_buffers.term_length();
        let mtu = logbuffer::mtu_length(&meta_buffer);
        let initial_term_id = logbuffer::initial_term_id(&meta_buffer);

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
            position_bits_to_shift: logbuffer::position_bits_to_shift(term_length),
            term_length,
            max_possible_position: (term_length as i64) << 31,
            position_limit,
            channel_status_id,
            is_closed: AtomicBool::new(false),
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

    /// Registration id assigned by the driver (shared across publications
    /// on the same channel/stream).
    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    /// Correlation id of the add command that created this instance.
    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    pub fn term_length(&self) -> usize {
        self.term_length
    }

    /// Largest payload carried in a single frame.
    pub fn max_payload_length(&self) -> usize {
        self.max_payload_length
    }

    /// Largest message accepted by [`offer`](Self::offer).
    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    pub fn channel_status_id(&self) -> i32 {
        self.channel_status_id
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    /// True when the driver reports at least one connected subscriber.
    pub fn is_connected(&self) -> bool {
        !self.is_closed() && logbuffer::is_connected(&self.meta_buffer)
    }

    /// Current publisher position.
    pub fn position(&self) -> i64 {
        if self.is_closed() {
            return PUBLICATION_CLOSED;
        }
        let term_count = logbuffer::active_term_count(&self.meta_buffer);
        let index = logbuffer::index_by_term_count(term_count as i64);
        let raw_tail = self.appenders[index].raw_tail_volatile();
        let term_offset = logbuffer::term_offset(raw_tail, self.term_length as i64);
        logbuffer::compute_position(
            logbuffer::term_id(raw_tail),
            term_offset,
            self.position_bits_to_shift,
            self.initial_term_id,
        )
    }

    /// Position limit imposed by the slowest consumer / flow control.
    pub fn position_limit(&self) -> i64 {
        if self.is_closed() {
            return PUBLICATION_CLOSED;
        }
        self.position_limit.get_volatile()
    }

    /// Non-blocking publish. Returns the new stream position, or one of the
    /// negative sentinels. On `ADMIN_ACTION` the term rotated; retry.
    ///
    /// # Panics
    /// If `src` exceeds [`max_message_length`](Self::max_message_length).
    pub fn offer(&self, src: &[u8]) -> i64 {
        self.offer_with(src, None)
    }

    /// As [`offer`](Self::offer) with a reserved-value supplier run before
    /// each frame is committed.
    pub fn offer_with(&self, src: &[u8], reserved_value_supplier: Option<ReservedValueSupplier>) -> i64 {
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
        let term_count = logbuffer::active_term_count(&self.meta_buffer);
        let index = logbuffer::index_by_term_count(term_count as i64);
        let appender = &self.appenders[index];
        let raw_tail = appender.raw_tail_volatile();
        let term_id = logbuffer::term_id(raw_tail);
        let term_offset = logbuffer::term_offset(raw_tail, self.term_length as i64);

        if term_count != term_id - self.initial_term_id {
            // Rotation in progress on another thread.
            return ADMIN_ACTION;
        }

        let position = logbuffer::compute_position(
            term_id,
            term_offset,
            self.position_bits_to_shift,
            self.initial_term_id,
        );
        if position >= limit {
            return self.back_pressure_status(position, src.len());
        }

        let outcome = if src.len() <= self.max_payload_length {
            appender.append_unfragmented(src, reserved_value_supplier)
        } else {
            appender.append_fragmented(src, self.max_payload_length, reserved_value_supplier)
        };

        self.resolve(outcome, term_count, position)
    }

    /// Reserve a frame for zero-copy filling. On success returns the new
    /// position and wraps `buffer_claim`; the caller must `commit` or
    /// `abort`. The claim must fit a single frame.
    ///
    /// # Panics
    /// If `length` exceeds [`max_payload_length`](Self::max_payload_length).
    pub fn try_claim(&self, length: usize, buffer_claim: &mut BufferClaim) -> i64 {
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
        let term_count = logbuffer::active_term_count(&self.meta_buffer);
        let index = logbuffer::index_by_term_count(term_count as i64);
        let appender = &self.appenders[index];
        let raw_tail = appender.raw_tail_volatile();
        let term_id = logbuffer::term_id(raw_tail);
        let term_offset = logbuffer::term_offset(raw_tail, self.term_length as i64);

        if term_count != term_id - self.initial_term_id {
            return ADMIN_ACTION;
        }

        let position = logbuffer::compute_position(
            term_id,
            term_offset,
            self.position_bits_to_shift,
            self.initial_term_id,
        );
        if position >= limit {
            return self.back_pressure_status(position, length);
        }

        let outcome = appender.claim(length, buffer_claim);
        self.resolve(outcome, term_count, position)
    }

    /// Add a destination to a multi-destination-cast publication; blocks
    /// until the driver acknowledges.
    pub fn add_destination(&self, channel: &str) -> Result<()> {
        self.conductor()?
            .add_publication_destination(self.registration_id, channel)
    }

    /// Remove a destination; blocks until the driver acknowledges.
    pub fn remove_destination(&self, channel: &str) -> Result<()> {
        self.conductor()?
            .remove_publication_destination(self.registration_id, channel)
    }

    /// Close the publication and release driver resources. Idempotent.
    pub fn close(&self) -> Result<()> {
        if !self.is_closed.swap(true, Ordering::AcqRel) {
            if let Some(conductor) = self.conductor.upgrade() {
                conductor.release_publication(self.correlation_id)?;
            }
        }
        Ok(())
    }

    fn conductor(&self) -> Result<Arc<ClientConductor>> {
        self.conductor
            .upgrade()
            .ok_or(crate::error::SeuratError::ClientClosed)
    }

    fn resolve(&self, outcome: Appended, term_count: i32, position: i64) -> i64 {
        match outcome {
            Appended::Position {
                resulting_offset,
                term_id,
            } => {
                logbuffer::compute_term_begin_position(
                    term_id,
                    self.position_bits_to_shift,
                    self.initial_term_id,
                ) + resulting_offset as i64
            }
            Appended::TermFull { term_id } => {
                if position + self.term_length as i64 > self.max_possible_position {
                    return MAX_POSITION_EXCEEDED;
                }
                logbuffer::rotate_log(&self.meta_buffer, term_count, term_id);
                ADMIN_ACTION
            }
        }
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
