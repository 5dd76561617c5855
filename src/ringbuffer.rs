//! Many-producer/single-consumer record ring buffer
//!
//! Carries client commands to the media driver through the CnC file's
//! to-driver region. The data area is a power-of-two span followed by a
//! trailer of cache-line-padded counters shared by all producers and the
//! single consumer (the driver). Records are framed `[length i32 | type i32
//! | payload]`, 8-byte aligned, and become visible only when the length
//! field flips positive via an ordered store.

use crate::buffer::AtomicBuffer;
use crate::error::{Result, SeuratError};
use crate::util::{align, is_power_of_two, CACHE_LINE_LENGTH};

/// Offset of the producer tail position within the trailer.
pub const TAIL_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 2;
/// Offset of the producers' cached view of the consumer head.
pub const HEAD_CACHE_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 4;
/// Offset of the consumer head position.
pub const HEAD_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 6;
/// Offset of the shared correlation-id counter.
pub const CORRELATION_COUNTER_OFFSET: usize = CACHE_LINE_LENGTH * 8;
/// Offset of the consumer heartbeat timestamp (epoch milliseconds).
pub const CONSUMER_HEARTBEAT_OFFSET: usize = CACHE_LINE_LENGTH * 10;
/// Total trailer length appended to the data area.
pub const TRAILER_LENGTH: usize = CACHE_LINE_LENGTH * 12;

/// Record framing constants.
pub mod record_descriptor {
    /// Length of the `[length i32 | type i32]` record header.
    pub const HEADER_LENGTH: usize = 8;
    /// Records are padded to this alignment.
    pub const ALIGNMENT: usize = 8;
    /// Type id of a padding record covering the gap at the buffer end.
    pub const PADDING_MSG_TYPE_ID: i32 = -1;

    #[inline]
    pub fn length_offset(record_offset: usize) -> usize {
        record_offset
    }

    #[inline]
    pub fn type_offset(record_offset: usize) -> usize {
        record_offset + 4
    }

    #[inline]
    pub fn encoded_msg_offset(record_offset: usize) -> usize {
        record_offset + HEADER_LENGTH
    }

    /// Pack the record header into a single `i64` (little-endian layout puts
    /// the length in the low word and the type in the high word).
    #[inline]
    pub fn make_header(length: i32, msg_type_id: i32) -> i64 {
        ((msg_type_id as i64 & 0xFFFF_FFFF) << 32) | (length as i64 & 0xFFFF_FFFF)
    }

    #[inline]
    pub fn record_length(header: i64) -> i32 {
        header as i32
    }

    #[inline]
    pub fn message_type_id(header: i64) -> i32 {
        (header >> 32) as i32
    }
}

use record_descriptor::*;

/// MPSC ring buffer over a shared-memory region (data area + trailer).
#[derive(Debug)]
pub struct ManyToOneRingBuffer {
    buffer: AtomicBuffer,
    capacity: usize,
    max_msg_length: usize,
    tail_position_index: usize,
    head_cache_position_index: usize,
    head_position_index: usize,
    correlation_counter_index: usize,
    consumer_heartbeat_index: usize,
}

impl ManyToOneRingBuffer {
    /// Wrap a region whose layout is `[data (power of two)] [trailer]`.
    pub fn new(buffer: AtomicBuffer) -> Result<Self> {
        let total = buffer.capacity();
        if total <= TRAILER_LENGTH {
            return Err(SeuratError::invalid_parameter(
                "buffer",
                "region shorter than the ring trailer",
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
            max_msg_length: capacity / 8,
            tail_position_index: capacity + TAIL_POSITION_OFFSET,
            head_cache_position_index: capacity + HEAD_CACHE_POSITION_OFFSET,
            head_position_index: capacity + HEAD_POSITION_OFFSET,
            correlation_counter_index: capacity + CORRELATION_COUNTER_OFFSET,
            consumer_heartbeat_index: capacity + CONSUMER_HEARTBEAT_OFFSET,
        })
    }

    /// Data-area capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest payload accepted by [`write`](Self::write).
    pub fn max_msg_length(&self) -> usize {
        self.max_msg_length
    }

    /// Write one record. Fails with `InsufficientCapacity` when the ring is
    /// full; the caller paces with its idle strategy and retries.
    pub fn write(&self, msg_type_id: i32, src: &[u8]) -> Result<()> {
        check_msg_type_id(msg_type_id)?;
        if src.len() > self.max_msg_length {
            return Err(SeuratError::invalid_parameter(
                "length",
                format!("{} exceeds max message length {}", src.len(), self.max_msg_length),
            ));
        }

        let record_length = src.len() + HEADER_LENGTH;
        let required = align(record_length, ALIGNMENT);
        let record_index = self.claim_capacity(required)?;

        // Negative length marks the record as reserved until committed.
        self.buffer.put_i64_ordered(
            record_index,
            make_header(-(record_length as i32), msg_type_id),
        );
        self.buffer.put_bytes(encoded_msg_offset(record_index), src);
        self.buffer
            .put_i32_ordered(length_offset(record_index), record_length as i32);

        Ok(())
    }

    /// Read up to `message_count_limit` committed records, invoking
    /// `handler(msg_type_id, buffer, msg_offset, msg_length)` for each.
    ///
    /// Single-consumer only. Consumed bytes are zeroed and the head advanced
    /// even if the handler panics.
    pub fn read<F>(&self, mut handler: F, message_count_limit: usize) -> usize
    where
        F: FnMut(i32, &AtomicBuffer, usize, usize),
    {
        let head = self.buffer.get_i64(self.head_position_index);
        let head_index = (head & (self.capacity as i64 - 1)) as usize;
        let contiguous_block_length = self.capacity - head_index;
        let mut messages_read = 0;

        let mut progress = ReadProgress {
            buffer: &self.buffer,
            head_position_index: self.head_position_index,
            head,
            head_index,
            bytes_read: 0,
        };

        while progress.bytes_read < contiguous_block_length
            && messages_read < message_count_limit
        {
            let record_index = head_index + progress.bytes_read;
            let header = self.buffer.get_i64_volatile(record_index);
            let record_length = record_length(header);
            if record_length <= 0 {
                break;
            }

            progress.bytes_read += align(record_length as usize, ALIGNMENT);

            let msg_type_id = message_type_id(header);
            if msg_type_id == PADDING_MSG_TYPE_ID {
                continue;
            }

            messages_read += 1;
            handler(
                msg_type_id,
                &self.buffer,
                encoded_msg_offset(record_index),
                record_length as usize - HEADER_LENGTH,
            );
        }

        messages_read
    }

    /// Next unique correlation id from the counter shared with the driver
    /// and all other clients of this driver instance.
    pub fn next_correlation_id(&self) -> i64 {
        self.buffer.get_and_add_i64(self.correlation_counter_index, 1)
    }

    /// Consumer heartbeat timestamp in epoch milliseconds; the driver stamps
    /// this as it services the ring.
    pub fn consumer_heartbeat_time_ms(&self) -> i64 {
        self.buffer.get_i64_volatile(self.consumer_heartbeat_index)
    }

    /// Stamp the consumer heartbeat. Only the ring's consumer does this.
    pub fn set_consumer_heartbeat_time_ms(&self, time_ms: i64) {
        self.buffer.put_i64_ordered(self.consumer_heartbeat_index, time_ms);
    }

    /// Producer position (monotonic byte count).
    pub fn producer_position(&self) -> i64 {
        self.buffer.get_i64_volatile(self.tail_position_index)
    }

    /// Consumer position (monotonic byte count).
    pub fn consumer_position(&self) -> i64 {
        self.buffer.get_i64_volatile(self.head_position_index)
    }

    fn claim_capacity(&self, required: usize) -> Result<usize> {
        let capacity = self.capacity as i64;
        let mask = capacity - 1;
        let required = required as i64;

        let mut head = self.buffer.get_i64_volatile(self.head_cache_position_index);
        let mut tail;
        let mut padding;
        let mut record_index;

        loop {
            tail = self.buffer.get_i64_volatile(self.tail_position_index);
            let available = capacity - (tail - head);

            if required > available {
                head = self.buffer.get_i64_volatile(self.head_position_index);
                if required > capacity - (tail - head) {
                    return Err(SeuratError::insufficient_capacity("to-driver ring"));
                }
                self.buffer.put_i64_ordered(self.head_cache_position_index, head);
            }

            padding = 0i64;
            record_index = (tail & mask) as usize;
            let to_buffer_end = capacity - record_index as i64;

            if required > to_buffer_end {
                // Claim would wrap: pad out the tail of the buffer and start
                // at offset zero, provided the start has been consumed.
                let mut head_index = head & mask;
                if required > head_index {
                    head = self.buffer.get_i64_volatile(self.head_position_index);
                    head_index = head & mask;
                    if required > head_index {
                        return Err(SeuratError::insufficient_capacity("to-driver ring"));
                    }
                    self.buffer.put_i64_ordered(self.head_cache_position_index, head);
                }
                padding = to_buffer_end;
            }

            if self
                .buffer
                .compare_and_set_i64(self.tail_position_index, tail, tail + required + padding)
            {
                break;
            }
        }

        if padding != 0 {
            self.buffer
                .put_i64_ordered(record_index, make_header(padding as i32, PADDING_MSG_TYPE_ID));
            record_index = 0;
        }

        Ok(record_index)
    }
}

fn check_msg_type_id(msg_type_id: i32) -> Result<()> {
    if msg_type_id < 1 {
        return Err(SeuratError::invalid_parameter(
            "msg_type_id",
            format!("{} is not a valid message type id", msg_type_id),
        ));
    }
    Ok(())
}

/// Commits read progress on drop so a panicking handler cannot wedge the ring.
struct ReadProgress<'a> {
    buffer: &'a AtomicBuffer,
    head_position_index: usize,
    head: i64,
    head_index: usize,
    bytes_read: usize,
}

impl Drop for ReadProgress<'_> {
    fn drop(&mut self) {
        if self.bytes_read > 0 {
            self.buffer.set_memory(self.head_index, self.bytes_read, 0);
            self.buffer
                .put_i64_ordered(self.head_position_index, self.head + self.bytes_read as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::OwnedBuffer;

    fn ring_of(data_capacity: usize) -> (OwnedBuffer, ManyToOneRingBuffer) {
        let owned = OwnedBuffer::new(data_capacity + TRAILER_LENGTH);
        let ring = ManyToOneRingBuffer::new(owned.buffer()).unwrap();
        (owned, ring)
    }

    #[test]
    fn rejects_non_power_of_two_data_capacity() {
        let owned = OwnedBuffer::new(100 + TRAILER_LENGTH);
        assert!(ManyToOneRingBuffer::new(owned.buffer()).is_err());
    }

    #[test]
    fn rejects_message_beyond_max_length() {
        let (_owned, ring) = ring_of(128);
        assert_eq!(ring.max_msg_length(), 16);
        let payload = [0u8; 17];
        assert!(matches!(
            ring.write(1, &payload),
            Err(SeuratError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn write_then_read_advances_head_by_aligned_record() {
        let (_owned, ring) = ring_of(128);
        let payload: Vec<u8> = (0u8..16).collect();
        ring.write(7, &payload).unwrap();

        let mut seen = Vec::new();
        let count = ring.read(
            |msg_type_id, buffer, offset, length| {
                let mut data = vec![0u8; length];
                buffer.get_bytes(offset, &mut data);
                seen.push((msg_type_id, data));
            },
            10,
        );

        assert_eq!(count, 1);
        assert_eq!(seen, vec![(7, payload)]);
        assert_eq!(ring.consumer_position(), 24); // align(16 + 8, 8)
    }

    #[test]
    fn uncommitted_record_stops_the_reader() {
        let (_owned, ring) = ring_of(256);
        // Simulate a reserved-but-uncommitted record.
        ring.buffer
            .put_i64_ordered(0, make_header(-16, 1));
        let count = ring.read(|_, _, _, _| panic!("must not deliver"), 10);
        assert_eq!(count, 0);
        assert_eq!(ring.consumer_position(), 0);
    }

    #[test]
    fn wrap_inserts_padding_record() {
        let (_owned, ring) = ring_of(128);

        // Move tail and head to 120 so the ring is empty mid-buffer.
        ring.buffer.put_i64(ring.tail_position_index, 120);
        ring.buffer.put_i64(ring.head_position_index, 120);

        let payload = [0xABu8; 16];
        ring.write(5, &payload).unwrap();

        // Padding record of 8 bytes at offset 120, real record at 0.
        assert_eq!(ring.buffer.get_i32(length_offset(120)), 8);
        assert_eq!(ring.buffer.get_i32(type_offset(120)), PADDING_MSG_TYPE_ID);
        assert_eq!(ring.buffer.get_i32(length_offset(0)), 24);

        // First read consumes the padding up to the buffer end, the next
        // picks up the wrapped record at offset zero.
        let mut seen = 0;
        let mut count = 0;
        for _ in 0..2 {
            count += ring.read(
                |msg_type_id, _, _, length| {
                    assert_eq!(msg_type_id, 5);
                    assert_eq!(length, 16);
                    seen += 1;
                },
                10,
            );
        }
        assert_eq!(count, 1);
        assert_eq!(seen, 1);
        // Head consumed padding + record.
        assert_eq!(ring.consumer_position(), 120 + 8 + 24);
    }

    #[test]
    fn full_ring_reports_insufficient_capacity() {
        let (_owned, ring) = ring_of(128);
        // 5 × 24-byte records fit in 128 bytes; the 6th would leave less
        // than a record free.
        for _ in 0..5 {
            ring.write(1, &[0u8; 16]).unwrap();
        }
        assert!(matches!(
            ring.write(1, &[0u8; 16]),
            Err(SeuratError::InsufficientCapacity { .. })
        ));
    }

    #[test]
    fn consumed_region_is_zeroed() {
        let (_owned, ring) = ring_of(128);
        ring.write(9, &[0xFFu8; 8]).unwrap();
        ring.read(|_, _, _, _| {}, 1);
        for offset in 0..16 {
            assert_eq!(ring.buffer.get_u8(offset), 0);
        }
    }

    #[test]
    fn handler_panic_still_advances_head() {
        let (_owned, ring) = ring_of(128);
        ring.write(3, &[1u8; 8]).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ring.read(|_, _, _, _| panic!("boom"), 1);
        }));
        assert!(result.is_err());
        assert_eq!(ring.consumer_position(), 16);
    }

    #[test]
    fn correlation_ids_are_unique_and_increasing() {
        let (_owned, ring) = ring_of(128);
        let a = ring.next_correlation_id();
        let b = ring.next_correlation_id();
        assert_eq!(b, a + 1);
    }

    #[test]
    fn concurrent_writers_never_interleave_payloads() {
        use std::sync::Arc;

        let owned = Arc::new(OwnedBuffer::new(4096 + TRAILER_LENGTH));
        let ring = Arc::new(ManyToOneRingBuffer::new(owned.buffer()).unwrap());
        let writers = 4;
        let per_writer = 200;

        let handles: Vec<_> = (0..writers)
            .map(|w| {
                let ring = Arc::clone(&ring);
                std::thread::spawn(move || {
                    let payload = [w as u8; 32];
                    let mut written = 0;
                    while written < per_writer {
                        if ring.write(1 + w as i32, &payload).is_ok() {
                            written += 1;
                        } else {
                            std::thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let mut read_total = 0;
        while read_total < writers * per_writer {
            read_total += ring.read(
                |msg_type_id, buffer, offset, length| {
                    assert_eq!(length, 32);
                    let expected = (msg_type_id - 1) as u8;
                    let mut data = vec![0u8; length];
                    buffer.get_bytes(offset, &mut data);
                    assert!(data.iter().all(|&b| b == expected));
                },
                16,
            );
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
