//! A subscriber's view of one publisher session on one stream

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use crate::buffer::AtomicBuffer;
use crate::counters::Position;
use crate::logbuffer::frame_descriptor;
use crate::logbuffer::{
    self, data_frame_header, block_scan, term_reader, ControlledPollAction, Header, LogBuffers,
    PARTITION_COUNT,
};
use crate::util::align;

/// Handler for a contiguous block of frames:
/// `(term_buffer, offset, length, session_id, term_id)`.
pub type BlockHandler<'a> = &'a mut dyn FnMut(&AtomicBuffer, usize, usize, i32, i32);

/// One session's log within a subscription.
///
/// Created and removed by the conductor; polled by exactly one subscriber
/// thread at a time. Progress is recorded in the subscriber position counter
/// with ordered stores so the driver observes consumption.
#[derive(Debug)]
pub struct Image {
    session_id: i32,
    correlation_id: i64,
    subscription_registration_id: i64,
    source_identity: String,
    log_buffers: Arc<LogBuffers>,
    term_buffers: [AtomicBuffer; PARTITION_COUNT],
    meta_buffer: AtomicBuffer,
    subscriber_position: Position,
    initial_term_id: i32,
    position_bits_to_shift: u32,
    term_length_mask: i64,
    join_position: i64,
    final_position: AtomicI64,
    is_closed: AtomicBool,
}

impl Image {
    pub(crate) fn new(
        session_id: i32,
        correlation_id: i64,
        subscription_registration_id: i64,
        source_identity: String,
        log_buffers: Arc<LogBuffers>,
        subscriber_position: Position,
    ) -> Self {
        let meta_buffer = log_buffers.meta_buffer();
        let term_buffers = [
            log_buffers.term_buffer(0),
            log_buffers.term_buffer(1),
            log_buffers.term_buffer(2),
        ];
        let term_length = log_buffers.term_length();
        let join_position = subscriber_position.get_volatile();

        Self {
            session_id,
            correlation_id,
            subscription_registration_id,
            source_identity,
            term_buffers,
            meta_buffer,
            subscriber_position,
            initial_term_id: logbuffer::initial_term_id(&log_buffers.meta_buffer()),
            position_bits_to_shift: logbuffer::position_bits_to_shift(term_length),
            term_length_mask: term_length as i64 - 1,
            join_position,
            final_position: AtomicI64::new(0),
            is_closed: AtomicBool::new(false),
            log_buffers,
        }
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    pub fn subscription_registration_id(&self) -> i64 {
        self.subscription_registration_id
    }

    pub fn source_identity(&self) -> &str {
        &self.source_identity
    }

    pub fn term_length(&self) -> usize {
        (self.term_length_mask + 1) as usize
    }

    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }

    /// Position this image joined the stream at.
    pub fn join_position(&self) -> i64 {
        self.join_position
    }

    /// Current consumption position (final position once closed).
    pub fn position(&self) -> i64 {
        if self.is_closed() {
            return self.final_position.load(Ordering::Acquire);
        }
        self.subscriber_position.get_volatile()
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    /// True once the publisher marked end-of-stream and this image has
    /// consumed up to it.
    pub fn is_end_of_stream(&self) -> bool {
        self.position() >= logbuffer::end_of_stream_position(&self.meta_buffer)
    }

    /// Poll committed fragments, up to `fragment_limit`.
    pub fn poll<F>(&self, handler: &mut F, fragment_limit: usize) -> usize
    where
        F: FnMut(&AtomicBuffer, usize, usize, &Header),
    {
        if self.is_closed() {
            return 0;
        }

        let position = self.subscriber_position.get_volatile();
        let term_offset = (position & self.term_length_mask) as usize;
        let index = logbuffer::index_by_position(position, self.position_bits_to_shift);
        let term = &self.term_buffers[index];
        let mut header = Header::new(self.initial_term_id, self.position_bits_to_shift);

        let outcome = term_reader::read(term, term_offset, handler, fragment_limit, &mut header);

        let new_position = position + (outcome.offset - term_offset) as i64;
        if new_position > position {
            self.subscriber_position.set_ordered(new_position);
        }

        outcome.fragments_read
    }

    /// Poll with per-fragment control over consumption and position commits.
    pub fn controlled_poll<F>(&self, handler: &mut F, fragment_limit: usize) -> usize
    where
        F: FnMut(&AtomicBuffer, usize, usize, &Header) -> ControlledPollAction,
    {
        if self.is_closed() {
            return 0;
        }

        let start_position = self.subscriber_position.get_volatile();
        let initial_offset = (start_position & self.term_length_mask) as usize;
        let index = logbuffer::index_by_position(start_position, self.position_bits_to_shift);
        let term = &self.term_buffers[index];
        let capacity = term.capacity();

        let mut header = Header::new(self.initial_term_id, self.position_bits_to_shift);
        let mut committed_position = start_position;
        let mut offset = initial_offset;
        let mut fragments_read = 0;

        while fragments_read < fragment_limit && offset < capacity {
            let frame_length = frame_descriptor::frame_length_volatile(term, offset);
            if frame_length <= 0 {
                break;
            }

            let frame_offset = offset;
            offset += align(frame_length as usize, crate::logbuffer::FRAME_ALIGNMENT);

            if frame_descriptor::is_padding_frame(term, frame_offset) {
                continue;
            }

            header.read_from(term, frame_offset);
            let action = handler(
                term,
                frame_offset + data_frame_header::DATA_OFFSET,
                frame_length as usize - data_frame_header::LENGTH,
                &header,
            );

            if action == ControlledPollAction::Abort {
                offset = frame_offset;
                break;
            }

            fragments_read += 1;

            if action == ControlledPollAction::Commit {
                committed_position = start_position + (offset - initial_offset) as i64;
                self.subscriber_position.set_ordered(committed_position);
            }

            if action == ControlledPollAction::Break {
                break;
            }
        }

        let resulting_position = start_position + (offset - initial_offset) as i64;
        if resulting_position > committed_position {
            self.subscriber_position.set_ordered(resulting_position);
        }

        fragments_read
    }

    /// Hand the caller a contiguous span of committed frames, at most
    /// `block_length_limit` bytes. Returns the number of bytes consumed.
    pub fn block_poll(&self, handler: BlockHandler, block_length_limit: usize) -> usize {
        if self.is_closed() {
            return 0;
        }

        let position = self.subscriber_position.get_volatile();
        let term_offset = (position & self.term_length_mask) as usize;
        let index = logbuffer::index_by_position(position, self.position_bits_to_shift);
        let term = &self.term_buffers[index];
        let limit_offset = (term_offset + block_length_limit).min(term.capacity());

        let resulting_offset = block_scan(term, term_offset, limit_offset);
        let length = resulting_offset - term_offset;

        if resulting_offset > term_offset {
            let term_id = frame_descriptor::frame_term_id(term, term_offset);
            handler(term, term_offset, length, self.session_id, term_id);
            self.subscriber_position.set_ordered(position + length as i64);
        }

        length
    }

    /// Conductor-side teardown: freeze the position and mark closed. The
    /// log mapping itself lingers with the conductor.
    pub(crate) fn close(&self) {
        if !self.is_closed.swap(true, Ordering::AcqRel) {
            self.final_position
                .store(self.subscriber_position.get_volatile(), Ordering::Release);
        }
    }

    pub(crate) fn log_buffers(&self) -> Arc<LogBuffers> {
        Arc::clone(&self.log_buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::OwnedBuffer;
    use crate::counters::COUNTER_LENGTH;
    use crate::logbuffer::{
        default_frame_header, initialise_log_metadata, TermAppender, LOG_META_DATA_LENGTH,
        TERM_MIN_LENGTH,
    };
    use std::io::Write;

    fn image_fixture(dir: &std::path::Path) -> (OwnedBuffer, Image, TermAppender) {
        let term_length = TERM_MIN_LENGTH;
        let path = dir.join("image.logbuffer");
        let len = PARTITION_COUNT * term_length + LOG_META_DATA_LENGTH;
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&vec![0u8; len]).unwrap();
        drop(f);

        {
            let mapped = crate::memory::MappedFile::map_existing(&path).unwrap();
            let meta = mapped.sub_buffer(len - LOG_META_DATA_LENGTH, LOG_META_DATA_LENGTH);
            initialise_log_metadata(&meta, term_length, 4096, 4096, 0, 5, 1001);
        }
        let log = Arc::new(LogBuffers::map(&path).unwrap());

        let values = OwnedBuffer::new(COUNTER_LENGTH * 4);
        let position = Position::new(values.buffer(), 1);

        let appender = TermAppender::new(
            log.term_buffer(0),
            log.meta_buffer(),
            default_frame_header(&log.meta_buffer()),
            0,
        );

        let image = Image::new(
            5,
            77,
            42,
            "127.0.0.1:40123".to_string(),
            Arc::clone(&log),
            position,
        );
        (values, image, appender)
    }

    #[test]
    fn poll_delivers_fragments_and_advances_position() {
        let dir = tempfile::tempdir().unwrap();
        let (_values, image, appender) = image_fixture(dir.path());

        appender.append_unfragmented(b"hello", None);
        appender.append_unfragmented(b"world", None);

        let mut seen = Vec::new();
        let count = image.poll(
            &mut |buffer: &AtomicBuffer, offset, length, _header: &Header| {
                let mut data = vec![0u8; length];
                buffer.get_bytes(offset, &mut data);
                seen.push(data);
            },
            10,
        );

        assert_eq!(count, 2);
        assert_eq!(seen, vec![b"hello".to_vec(), b"world".to_vec()]);
        assert_eq!(image.position(), 128);

        // Nothing further committed.
        assert_eq!(image.poll(&mut |_, _, _, _: &Header| {}, 10), 0);
    }

    #[test]
    fn controlled_poll_abort_leaves_position_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (_values, image, appender) = image_fixture(dir.path());
        appender.append_unfragmented(b"one", None);

        let count = image.controlled_poll(
            &mut |_: &AtomicBuffer, _, _, _: &Header| ControlledPollAction::Abort,
            10,
        );
        assert_eq!(count, 0);
        assert_eq!(image.position(), 0);
    }

    #[test]
    fn controlled_poll_break_consumes_one() {
        let dir = tempfile::tempdir().unwrap();
        let (_values, image, appender) = image_fixture(dir.path());
        appender.append_unfragmented(b"one", None);
        appender.append_unfragmented(b"two", None);

        let count = image.controlled_poll(
            &mut |_: &AtomicBuffer, _, _, _: &Header| ControlledPollAction::Break,
            10,
        );
        assert_eq!(count, 1);
        assert_eq!(image.position(), 64);
    }

    #[test]
    fn block_poll_hands_over_contiguous_span() {
        let dir = tempfile::tempdir().unwrap();
        let (_values, image, appender) = image_fixture(dir.path());
        appender.append_unfragmented(b"one", None);
        appender.append_unfragmented(b"two", None);

        let mut blocks = Vec::new();
        let bytes = image.block_poll(
            &mut |_buffer: &AtomicBuffer, offset, length, session_id, term_id| {
                blocks.push((offset, length, session_id, term_id));
            },
            4096,
        );

        assert_eq!(bytes, 128);
        assert_eq!(blocks, vec![(0, 128, 5, 0)]);
        assert_eq!(image.position(), 128);
    }

    #[test]
    fn closed_image_reports_final_position() {
        let dir = tempfile::tempdir().unwrap();
        let (_values, image, appender) = image_fixture(dir.path());
        appender.append_unfragmented(b"data", None);
        image.poll(&mut |_, _, _, _: &Header| {}, 10);

        image.close();
        assert!(image.is_closed());
        assert_eq!(image.position(), 64);
        assert_eq!(image.poll(&mut |_, _, _, _: &Header| {}, 10), 0);
    }
}
