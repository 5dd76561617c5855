//! Counter value and metadata regions of the CnC file
//!
//! The driver allocates counters (publisher limits, subscriber positions,
//! channel status) and announces their ids over the control protocol. The
//! client reads and, for positions it owns, writes the value slots directly.

use crate::buffer::AtomicBuffer;
use crate::util::CACHE_LINE_LENGTH;

/// Length of one counter value slot (own cache-line pair).
pub const COUNTER_LENGTH: usize = CACHE_LINE_LENGTH * 2;

/// Length of one counter metadata record.
pub const METADATA_LENGTH: usize = CACHE_LINE_LENGTH * 4;

/// Metadata record field offsets.
pub const RECORD_STATE_OFFSET: usize = 0;
pub const RECORD_TYPE_ID_OFFSET: usize = 4;
pub const RECORD_LABEL_OFFSET: usize = 16;

/// Metadata record states.
pub const RECORD_UNUSED: i32 = 0;
pub const RECORD_ALLOCATED: i32 = 1;
pub const RECORD_RECLAIMED: i32 = -1;

#[inline]
pub fn counter_offset(counter_id: i32) -> usize {
    counter_id as usize * COUNTER_LENGTH
}

#[inline]
pub fn metadata_offset(counter_id: i32) -> usize {
    counter_id as usize * METADATA_LENGTH
}

/// Read-only view over the counter regions; the opaque handle the client
/// exposes for monitoring.
#[derive(Debug, Clone, Copy)]
pub struct CountersReader {
    metadata: AtomicBuffer,
    values: AtomicBuffer,
}

impl CountersReader {
    pub fn new(metadata: AtomicBuffer, values: AtomicBuffer) -> Self {
        Self { metadata, values }
    }

    /// Highest counter id the value region can hold.
    pub fn max_counter_id(&self) -> i32 {
        (self.values.capacity() / COUNTER_LENGTH) as i32 - 1
    }

    /// Volatile value of a counter.
    pub fn counter_value(&self, counter_id: i32) -> i64 {
        self.values.get_i64_volatile(counter_offset(counter_id))
    }

    /// Allocation state of a counter's metadata record.
    pub fn counter_state(&self, counter_id: i32) -> i32 {
        self.metadata
            .get_i32_volatile(metadata_offset(counter_id) + RECORD_STATE_OFFSET)
    }

    /// Type id recorded for a counter.
    pub fn counter_type_id(&self, counter_id: i32) -> i32 {
        self.metadata
            .get_i32(metadata_offset(counter_id) + RECORD_TYPE_ID_OFFSET)
    }

    /// Label recorded for a counter.
    pub fn counter_label(&self, counter_id: i32) -> String {
        self.metadata
            .get_string_ascii(metadata_offset(counter_id) + RECORD_LABEL_OFFSET)
    }

    /// Number of metadata records currently allocated.
    pub fn allocated_count(&self) -> usize {
        let max = (self.metadata.capacity() / METADATA_LENGTH) as i32;
        (0..max)
            .filter(|&id| self.counter_state(id) == RECORD_ALLOCATED)
            .count()
    }
}

/// A read-write position backed by one counter value slot.
#[derive(Debug, Clone, Copy)]
pub struct Position {
    buffer: AtomicBuffer,
    id: i32,
    offset: usize,
}

impl Position {
    pub fn new(values: AtomicBuffer, counter_id: i32) -> Self {
        Self {
            buffer: values,
            id: counter_id,
            offset: counter_offset(counter_id),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    #[inline]
    pub fn get(&self) -> i64 {
        self.buffer.get_i64(self.offset)
    }

    #[inline]
    pub fn get_volatile(&self) -> i64 {
        self.buffer.get_i64_volatile(self.offset)
    }

    #[inline]
    pub fn set(&self, value: i64) {
        self.buffer.put_i64(self.offset, value);
    }

    #[inline]
    pub fn set_ordered(&self, value: i64) {
        self.buffer.put_i64_ordered(self.offset, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::OwnedBuffer;

    #[test]
    fn positions_address_distinct_slots() {
        let owned = OwnedBuffer::new(COUNTER_LENGTH * 8);
        let values = owned.buffer();

        let a = Position::new(values, 0);
        let b = Position::new(values, 3);

        a.set_ordered(100);
        b.set_ordered(300);

        assert_eq!(a.get_volatile(), 100);
        assert_eq!(b.get_volatile(), 300);
        assert_eq!(values.get_i64_volatile(3 * COUNTER_LENGTH), 300);
    }

    #[test]
    fn reader_reflects_metadata_state() {
        let meta = OwnedBuffer::new(METADATA_LENGTH * 4);
        let values = OwnedBuffer::new(COUNTER_LENGTH * 4);
        let reader = CountersReader::new(meta.buffer(), values.buffer());

        assert_eq!(reader.allocated_count(), 0);

        let record = metadata_offset(2);
        meta.buffer().put_i32(record + RECORD_TYPE_ID_OFFSET, 9);
        meta.buffer()
            .put_string_ascii(record + RECORD_LABEL_OFFSET, "pub-lmt: 42");
        meta.buffer()
            .put_i32_ordered(record + RECORD_STATE_OFFSET, RECORD_ALLOCATED);
        values.buffer().put_i64_ordered(counter_offset(2), 640);

        assert_eq!(reader.allocated_count(), 1);
        assert_eq!(reader.counter_value(2), 640);
        assert_eq!(reader.counter_type_id(2), 9);
        assert_eq!(reader.counter_label(2), "pub-lmt: 42");
        assert_eq!(reader.max_counter_id(), 3);
    }
}
