//! Log-buffer layout, metadata, and position arithmetic
//!
//! A log buffer is a driver-created file of three term partitions followed
//! by one metadata page:
//!
//! ```text
//! [term 0][term 1][term 2][metadata]
//! ```
//!
//! Terms rotate in order as the stream advances. Each partition has a raw
//! tail counter in the metadata packing `termId << 32 | tailOffset`; the
//! stream position of a frame is
//! `(termId - initialTermId) * termLength + termOffset`.

pub mod buffer_claim;
pub mod frame;
pub mod header;
pub mod log_buffers;
pub mod term_appender;
pub mod term_reader;

pub use buffer_claim::BufferClaim;
pub use frame::{data_frame_header, frame_descriptor, FRAME_ALIGNMENT};
pub use header::Header;
pub use log_buffers::LogBuffers;
pub use term_appender::{Appended, ExclusiveTermAppender, ReservedValueSupplier, TermAppender};
pub use term_reader::{block_scan, read, ControlledPollAction, ReadOutcome};

use crate::buffer::AtomicBuffer;
use crate::util::{is_power_of_two, number_of_trailing_zeroes, CACHE_LINE_LENGTH};

/// Number of term partitions per log.
pub const PARTITION_COUNT: usize = 3;
/// Minimum term length.
pub const TERM_MIN_LENGTH: usize = 64 * 1024;
/// Maximum term length.
pub const TERM_MAX_LENGTH: usize = 1024 * 1024 * 1024;
/// Length of the metadata section at the end of the log file.
pub const LOG_META_DATA_LENGTH: usize = 4096;

/// Metadata field offsets.
pub const TERM_TAIL_COUNTERS_OFFSET: usize = 0;
pub const LOG_ACTIVE_TERM_COUNT_OFFSET: usize = TERM_TAIL_COUNTERS_OFFSET + 8 * PARTITION_COUNT;
pub const LOG_END_OF_STREAM_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 2;
pub const LOG_IS_CONNECTED_OFFSET: usize = LOG_END_OF_STREAM_POSITION_OFFSET + 8;
pub const LOG_INITIAL_TERM_ID_OFFSET: usize = CACHE_LINE_LENGTH * 5;
pub const LOG_MTU_LENGTH_OFFSET: usize = LOG_INITIAL_TERM_ID_OFFSET + 4;
pub const LOG_TERM_LENGTH_OFFSET: usize = LOG_MTU_LENGTH_OFFSET + 4;
pub const LOG_PAGE_SIZE_OFFSET: usize = LOG_TERM_LENGTH_OFFSET + 4;
pub const LOG_DEFAULT_FRAME_HEADER_OFFSET: usize = CACHE_LINE_LENGTH * 6;

/// Validate a term length against protocol bounds.
pub fn check_term_length(term_length: usize) -> crate::error::Result<()> {
    if term_length < TERM_MIN_LENGTH
        || term_length > TERM_MAX_LENGTH
        || !is_power_of_two(term_length)
    {
        return Err(crate::error::SeuratError::invalid_parameter(
            "termLength",
            format!(
                "{} must be a power of two in [{}, {}]",
                term_length, TERM_MIN_LENGTH, TERM_MAX_LENGTH
            ),
        ));
    }
    Ok(())
}

// ---- metadata accessors ---------------------------------------------------

pub fn active_term_count(meta: &AtomicBuffer) -> i32 {
    meta.get_i32_volatile(LOG_ACTIVE_TERM_COUNT_OFFSET)
}

pub fn set_active_term_count_ordered(meta: &AtomicBuffer, value: i32) {
    meta.put_i32_ordered(LOG_ACTIVE_TERM_COUNT_OFFSET, value);
}

pub fn cas_active_term_count(meta: &AtomicBuffer, expected: i32, desired: i32) -> bool {
    meta.compare_and_set_i32(LOG_ACTIVE_TERM_COUNT_OFFSET, expected, desired)
}

pub fn initial_term_id(meta: &AtomicBuffer) -> i32 {
    meta.get_i32(LOG_INITIAL_TERM_ID_OFFSET)
}

pub fn mtu_length(meta: &AtomicBuffer) -> usize {
    meta.get_i32(LOG_MTU_LENGTH_OFFSET) as usize
}

pub fn term_length(meta: &AtomicBuffer) -> usize {
    meta.get_i32(LOG_TERM_LENGTH_OFFSET) as usize
}

pub fn page_size(meta: &AtomicBuffer) -> usize {
    meta.get_i32(LOG_PAGE_SIZE_OFFSET) as usize
}

pub fn is_connected(meta: &AtomicBuffer) -> bool {
    meta.get_i32_volatile(LOG_IS_CONNECTED_OFFSET) == 1
}

pub fn set_is_connected(meta: &AtomicBuffer, connected: bool) {
    meta.put_i32_ordered(LOG_IS_CONNECTED_OFFSET, connected as i32);
}

pub fn end_of_stream_position(meta: &AtomicBuffer) -> i64 {
    meta.get_i64_volatile(LOG_END_OF_STREAM_POSITION_OFFSET)
}

pub fn set_end_of_stream_position(meta: &AtomicBuffer, position: i64) {
    meta.put_i64_ordered(LOG_END_OF_STREAM_POSITION_OFFSET, position);
}

/// A 32-byte view of the default frame header template the driver seeded.
pub fn default_frame_header(meta: &AtomicBuffer) -> AtomicBuffer {
    meta.view(LOG_DEFAULT_FRAME_HEADER_OFFSET, data_frame_header::LENGTH)
}

#[inline]
pub fn tail_counter_offset(partition_index: usize) -> usize {
    TERM_TAIL_COUNTERS_OFFSET + partition_index * 8
}

pub fn raw_tail_volatile(meta: &AtomicBuffer, partition_index: usize) -> i64 {
    meta.get_i64_volatile(tail_counter_offset(partition_index))
}

pub fn set_raw_tail(meta: &AtomicBuffer, partition_index: usize, value: i64) {
    meta.put_i64(tail_counter_offset(partition_index), value);
}

pub fn cas_raw_tail(
    meta: &AtomicBuffer,
    partition_index: usize,
    expected: i64,
    desired: i64,
) -> bool {
    meta.compare_and_set_i64(tail_counter_offset(partition_index), expected, desired)
}

// ---- tail packing and position arithmetic ---------------------------------

#[inline]
pub fn pack_tail(term_id: i32, term_offset: i32) -> i64 {
    ((term_id as i64) << 32) | (term_offset as i64 & 0xFFFF_FFFF)
}

#[inline]
pub fn term_id(raw_tail: i64) -> i32 {
    (raw_tail >> 32) as i32
}

/// Tail offset within the term, clamped to `term_length` (the raw counter
/// may run past the end under concurrent reservation).
#[inline]
pub fn term_offset(raw_tail: i64, term_length: i64) -> i32 {
    let tail = raw_tail & 0xFFFF_FFFF;
    tail.min(term_length) as i32
}

#[inline]
pub fn position_bits_to_shift(term_length: usize) -> u32 {
    number_of_trailing_zeroes(term_length as u32)
}

#[inline]
pub fn compute_term_begin_position(
    active_term_id: i32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    ((active_term_id as i64) - (initial_term_id as i64)) << position_bits_to_shift
}

#[inline]
pub fn compute_position(
    active_term_id: i32,
    term_offset: i32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    compute_term_begin_position(active_term_id, position_bits_to_shift, initial_term_id)
        + term_offset as i64
}

#[inline]
pub fn compute_term_id_from_position(
    position: i64,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i32 {
    ((position >> position_bits_to_shift) + initial_term_id as i64) as i32
}

#[inline]
pub fn index_by_term(initial_term_id: i32, active_term_id: i32) -> usize {
    ((active_term_id as i64 - initial_term_id as i64) % PARTITION_COUNT as i64) as usize
}

#[inline]
pub fn index_by_term_count(term_count: i64) -> usize {
    (term_count % PARTITION_COUNT as i64) as usize
}

#[inline]
pub fn index_by_position(position: i64, position_bits_to_shift: u32) -> usize {
    ((position >> position_bits_to_shift) % PARTITION_COUNT as i64) as usize
}

/// Rotate the log to the next partition: initialise the next tail to
/// `termId + 1, offset 0` and advance the active term count. Both steps are
/// CAS so concurrent appenders race benignly.
pub fn rotate_log(meta: &AtomicBuffer, current_term_count: i32, current_term_id: i32) -> bool {
    let next_term_id = current_term_id + 1;
    let next_term_count = current_term_count + 1;
    let next_index = index_by_term_count(next_term_count as i64);
    let expected_raw_tail = pack_tail(next_term_id - PARTITION_COUNT as i32, 0);
    let new_raw_tail = pack_tail(next_term_id, 0);

    cas_raw_tail(meta, next_index, expected_raw_tail, new_raw_tail);
    cas_active_term_count(meta, current_term_count, next_term_count)
}

/// Seed a blank metadata page the way the driver does at log creation.
/// The client uses this only to build test fixtures.
pub fn initialise_log_metadata(
    meta: &AtomicBuffer,
    term_len: usize,
    mtu: usize,
    page: usize,
    initial_id: i32,
    session_id: i32,
    stream_id: i32,
) {
    meta.put_i32(LOG_TERM_LENGTH_OFFSET, term_len as i32);
    meta.put_i32(LOG_MTU_LENGTH_OFFSET, mtu as i32);
    meta.put_i32(LOG_PAGE_SIZE_OFFSET, page as i32);
    meta.put_i32(LOG_INITIAL_TERM_ID_OFFSET, initial_id);
    meta.put_i64(LOG_END_OF_STREAM_POSITION_OFFSET, i64::MAX);

    // Partition 0 starts at the initial term; the others hold the raw tail
    // the rotation CAS expects for their first activation.
    set_raw_tail(meta, 0, pack_tail(initial_id, 0));
    for i in 1..PARTITION_COUNT {
        set_raw_tail(meta, i, pack_tail(initial_id + i as i32 - PARTITION_COUNT as i32, 0));
    }

    let header = default_frame_header(meta);
    header.put_i32(data_frame_header::FRAME_LENGTH_FIELD_OFFSET, 0);
    header.put_u8(data_frame_header::VERSION_FIELD_OFFSET, data_frame_header::CURRENT_VERSION);
    header.put_u8(
        data_frame_header::FLAGS_FIELD_OFFSET,
        frame_descriptor::UNFRAGMENTED,
    );
    header.put_u16(data_frame_header::TYPE_FIELD_OFFSET, data_frame_header::HDR_TYPE_DATA);
    header.put_i32(data_frame_header::SESSION_ID_FIELD_OFFSET, session_id);
    header.put_i32(data_frame_header::STREAM_ID_FIELD_OFFSET, stream_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_packing_round_trip() {
        let raw = pack_tail(5, 4096);
        assert_eq!(term_id(raw), 5);
        assert_eq!(term_offset(raw, 65_536), 4096);
    }

    #[test]
    fn term_offset_is_clamped_to_term_length() {
        let raw = pack_tail(5, 70_000);
        assert_eq!(term_offset(raw, 65_536), 65_536);
    }

    #[test]
    fn position_math_round_trips() {
        let term_len = 64 * 1024;
        let bits = position_bits_to_shift(term_len);
        assert_eq!(bits, 16);

        let initial = 100;
        let position = compute_position(102, 4096, bits, initial);
        assert_eq!(position, 2 * term_len as i64 + 4096);

        assert_eq!(compute_term_id_from_position(position, bits, initial), 102);
        assert_eq!(index_by_position(position, bits), 2);
    }

    #[test]
    fn partition_indexing_cycles() {
        assert_eq!(index_by_term_count(0), 0);
        assert_eq!(index_by_term_count(1), 1);
        assert_eq!(index_by_term_count(2), 2);
        assert_eq!(index_by_term_count(3), 0);
        assert_eq!(index_by_term(100, 104), 1);
    }

    #[test]
    fn term_length_bounds_are_enforced() {
        assert!(check_term_length(64 * 1024).is_ok());
        assert!(check_term_length(1024 * 1024 * 1024).is_ok());
        assert!(check_term_length(32 * 1024).is_err());
        assert!(check_term_length(96 * 1024).is_err());
        assert!(check_term_length(2 * 1024 * 1024 * 1024).is_err());
    }

    #[test]
    fn rotation_advances_term_count_and_seeds_next_tail() {
        let owned = crate::buffer::OwnedBuffer::new(LOG_META_DATA_LENGTH);
        let meta = owned.buffer();
        initialise_log_metadata(&meta, 64 * 1024, 4096, 4096, 7, 1, 1);

        assert!(rotate_log(&meta, 0, 7));
        assert_eq!(active_term_count(&meta), 1);
        let raw = raw_tail_volatile(&meta, 1);
        assert_eq!(term_id(raw), 8);
        assert_eq!(term_offset(raw, 64 * 1024), 0);
    }
}
