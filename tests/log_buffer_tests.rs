//! Term protocol scenarios: framing, fragmentation, rotation, reassembly

use proptest::prelude::*;
use seurat::buffer::{AtomicBuffer, OwnedBuffer};
use seurat::logbuffer::{
    self, data_frame_header, frame_descriptor, initialise_log_metadata, term_reader, Appended,
    Header, TermAppender, FRAME_ALIGNMENT, LOG_META_DATA_LENGTH,
};
use seurat::FragmentAssembler;

const TERM_LENGTH: usize = 64 * 1024;
const INITIAL_TERM_ID: i32 = 100;
const SESSION_ID: i32 = 7;
const STREAM_ID: i32 = 1001;

struct Fixture {
    terms: Vec<OwnedBuffer>,
    meta: OwnedBuffer,
    mtu: usize,
}

impl Fixture {
    fn new(mtu: usize) -> Self {
        let terms = (0..3).map(|_| OwnedBuffer::new(TERM_LENGTH)).collect();
        let meta = OwnedBuffer::new(LOG_META_DATA_LENGTH);
        initialise_log_metadata(
            &meta.buffer(),
            TERM_LENGTH,
            mtu,
            4096,
            INITIAL_TERM_ID,
            SESSION_ID,
            STREAM_ID,
        );
        Self { terms, meta, mtu }
    }

    fn appender(&self, partition: usize) -> TermAppender {
        TermAppender::new(
            self.terms[partition].buffer(),
            self.meta.buffer(),
            logbuffer::default_frame_header(&self.meta.buffer()),
            partition,
        )
    }

    fn max_payload(&self) -> usize {
        self.mtu - data_frame_header::LENGTH
    }
}

#[test]
fn large_offer_is_fragmented_with_begin_and_end_flags() {
    let fixture = Fixture::new(64);
    let appender = fixture.appender(0);
    let max_payload = fixture.max_payload();
    assert_eq!(max_payload, 32);

    let message: Vec<u8> = (0..100u8).collect();
    let outcome = appender.append_fragmented(&message, max_payload, None);
    assert!(matches!(outcome, Appended::Position { .. }));

    let term = fixture.terms[0].buffer();
    let expected_fragments = message.len().div_ceil(max_payload);
    assert_eq!(expected_fragments, 4);

    let mut offset = 0;
    let mut flags_seen = Vec::new();
    for _ in 0..expected_fragments {
        let frame_length = frame_descriptor::frame_length_volatile(&term, offset);
        assert!(frame_length > 0);
        flags_seen.push(frame_descriptor::frame_flags(&term, offset));
        offset += seurat::util::align(frame_length as usize, FRAME_ALIGNMENT);
    }

    assert_eq!(flags_seen[0], 0x80);
    assert_eq!(flags_seen[1], 0x00);
    assert_eq!(flags_seen[2], 0x00);
    assert_eq!(flags_seen[3], 0x40);

    // First three frames carry full payloads, the last the remainder.
    assert_eq!(frame_descriptor::frame_length_volatile(&term, 0), 64);
    assert_eq!(
        frame_descriptor::frame_length_volatile(&term, 192),
        (100 - 3 * 32 + data_frame_header::LENGTH) as i32
    );
}

#[test]
fn assembler_reconstructs_fragmented_message_exactly() {
    let fixture = Fixture::new(64);
    let appender = fixture.appender(0);
    let message: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

    appender.append_fragmented(&message, fixture.max_payload(), None);

    let mut assembled: Vec<Vec<u8>> = Vec::new();
    let mut assembler = FragmentAssembler::new(
        |buffer: &AtomicBuffer, offset: usize, length: usize, _header: &Header| {
            let mut data = vec![0u8; length];
            buffer.get_bytes(offset, &mut data);
            assembled.push(data);
        },
    );

    let term = fixture.terms[0].buffer();
    let mut header = Header::new(INITIAL_TERM_ID, logbuffer::position_bits_to_shift(TERM_LENGTH));
    term_reader::read(
        &term,
        0,
        &mut |buffer: &AtomicBuffer, offset, length, header: &Header| {
            assembler.on_fragment(buffer, offset, length, header)
        },
        1024,
        &mut header,
    );

    assert_eq!(assembled.len(), 1);
    assert_eq!(assembled[0], message);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A message longer than the max payload always splits into
    /// ceil(L / maxPayload) fragments and reassembles to exactly L bytes.
    #[test]
    fn fragmentation_round_trip(extra in 1usize..4000, mtu_pow in 6u32..10) {
        let mtu = 1usize << mtu_pow; // 64..512
        let fixture = Fixture::new(mtu);
        let appender = fixture.appender(0);
        let max_payload = fixture.max_payload();
        let length = max_payload + extra;
        let message: Vec<u8> = (0..length).map(|i| (i % 251) as u8).collect();

        appender.append_fragmented(&message, max_payload, None);

        let mut fragment_count = 0usize;
        let mut assembled: Vec<u8> = Vec::new();
        let term = fixture.terms[0].buffer();
        let mut header = Header::new(INITIAL_TERM_ID, logbuffer::position_bits_to_shift(TERM_LENGTH));
        term_reader::read(
            &term,
            0,
            &mut |buffer: &AtomicBuffer, offset, fragment_length, _header: &Header| {
                fragment_count += 1;
                let mut data = vec![0u8; fragment_length];
                buffer.get_bytes(offset, &mut data);
                assembled.extend_from_slice(&data);
            },
            usize::MAX,
            &mut header,
        );

        prop_assert_eq!(fragment_count, length.div_ceil(max_payload));
        prop_assert_eq!(assembled, message);
    }

    /// Every committed frame length in a term is 32-byte aligned in its
    /// stored aligned extent and no frame crosses the term end.
    #[test]
    fn frames_stay_aligned_and_bounded(lengths in prop::collection::vec(0usize..600, 1..200)) {
        let fixture = Fixture::new(1408);
        let appender = fixture.appender(0);

        for length in &lengths {
            let payload = vec![0u8; *length];
            if matches!(
                appender.append_unfragmented(&payload, None),
                Appended::TermFull { .. }
            ) {
                break;
            }
        }

        let term = fixture.terms[0].buffer();
        let mut offset = 0;
        while offset < TERM_LENGTH {
            let frame_length = frame_descriptor::frame_length_volatile(&term, offset);
            if frame_length <= 0 {
                break;
            }
            let aligned = seurat::util::align(frame_length as usize, FRAME_ALIGNMENT);
            prop_assert_eq!(aligned % FRAME_ALIGNMENT, 0);
            prop_assert!(offset + aligned <= TERM_LENGTH);
            offset += aligned;
        }
    }
}

#[test]
fn term_end_padding_then_rotation_starts_next_term_at_zero() {
    let fixture = Fixture::new(4096);
    let appender0 = fixture.appender(0);
    let meta = fixture.meta.buffer();

    // Park the active tail close to the end of term 0.
    logbuffer::set_raw_tail(
        &meta,
        0,
        logbuffer::pack_tail(INITIAL_TERM_ID, (TERM_LENGTH - 64) as i32),
    );

    let outcome = appender0.append_unfragmented(&[0u8; 100], None);
    assert_eq!(
        outcome,
        Appended::TermFull {
            term_id: INITIAL_TERM_ID
        }
    );

    // Padding covers the remainder of term 0.
    let term0 = fixture.terms[0].buffer();
    let pad_offset = TERM_LENGTH - 64;
    assert!(frame_descriptor::is_padding_frame(&term0, pad_offset));
    assert_eq!(
        frame_descriptor::frame_length_volatile(&term0, pad_offset),
        64
    );

    // Rotate as the publication would.
    let term_count = logbuffer::active_term_count(&meta);
    assert!(logbuffer::rotate_log(&meta, term_count, INITIAL_TERM_ID));
    assert_eq!(logbuffer::active_term_count(&meta), 1);

    // Next append lands at offset zero of partition 1 with termId + 1.
    let appender1 = fixture.appender(1);
    let outcome = appender1.append_unfragmented(b"next term", None);
    assert_eq!(
        outcome,
        Appended::Position {
            resulting_offset: 64,
            term_id: INITIAL_TERM_ID + 1
        }
    );

    let term1 = fixture.terms[1].buffer();
    assert_eq!(frame_descriptor::frame_term_id(&term1, 0), INITIAL_TERM_ID + 1);
    assert_eq!(frame_descriptor::frame_term_offset(&term1, 0), 0);
}

#[test]
fn positions_increase_monotonically_across_rotation() {
    let fixture = Fixture::new(4096);
    let meta = fixture.meta.buffer();
    let bits = logbuffer::position_bits_to_shift(TERM_LENGTH);

    let mut last_position = -1i64;
    let mut term_count = logbuffer::active_term_count(&meta);

    for _ in 0..40_000 {
        let index = logbuffer::index_by_term_count(term_count as i64);
        let appender = fixture.appender(index);
        match appender.append_unfragmented(&[0u8; 17], None) {
            Appended::Position {
                resulting_offset,
                term_id,
            } => {
                let position = logbuffer::compute_term_begin_position(
                    term_id,
                    bits,
                    INITIAL_TERM_ID,
                ) + resulting_offset as i64;
                assert!(position > last_position);
                last_position = position;
            }
            Appended::TermFull { term_id } => {
                assert!(logbuffer::rotate_log(&meta, term_count, term_id));
                term_count = logbuffer::active_term_count(&meta);
                // The driver cleans rotated-out partitions: zero the one
                // the next rotation will activate and park its tail where
                // the rotation CAS expects it.
                let cleanup_index = logbuffer::index_by_term_count(term_count as i64 + 1);
                fixture.terms[cleanup_index]
                    .buffer()
                    .set_memory(0, TERM_LENGTH, 0);
                logbuffer::set_raw_tail(&meta, cleanup_index, logbuffer::pack_tail(term_id - 1, 0));
            }
        }
    }
    assert!(last_position > TERM_LENGTH as i64);
}
