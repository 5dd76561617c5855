//! Property and scenario tests for the MPSC command ring buffer

use proptest::prelude::*;
use seurat::buffer::OwnedBuffer;
use seurat::ringbuffer::{record_descriptor, ManyToOneRingBuffer, TRAILER_LENGTH};

fn ring_of(data_capacity: usize) -> (OwnedBuffer, ManyToOneRingBuffer) {
    let owned = OwnedBuffer::new(data_capacity + TRAILER_LENGTH);
    let ring = ManyToOneRingBuffer::new(owned.buffer()).unwrap();
    (owned, ring)
}

fn drain(ring: &ManyToOneRingBuffer) -> Vec<(i32, Vec<u8>)> {
    let mut drained = Vec::new();
    loop {
        let count = ring.read(
            |msg_type_id, buffer, offset, length| {
                let mut data = vec![0u8; length];
                buffer.get_bytes(offset, &mut data);
                drained.push((msg_type_id, data));
            },
            64,
        );
        if count == 0 {
            break;
        }
    }
    drained
}

#[test]
fn small_ring_rejects_payload_that_cannot_fit() {
    let (_owned, ring) = ring_of(32);
    // max message length is capacity / 8.
    assert_eq!(ring.max_msg_length(), 4);
    assert!(ring.write(1, &[0u8; 16]).is_err());
}

#[test]
fn single_record_round_trip_advances_head_by_aligned_length() {
    let (_owned, ring) = ring_of(128);
    ring.write(3, &[7u8; 16]).unwrap();

    let drained = drain(&ring);
    assert_eq!(drained, vec![(3, vec![7u8; 16])]);
    assert_eq!(ring.consumer_position(), 24);
}

proptest! {
    /// Writing any message sequence and reading it back yields exactly the
    /// same sequence in order, provided the reader keeps pace.
    #[test]
    fn round_trip_preserves_order_and_content(
        messages in prop::collection::vec(
            (1i32..100, prop::collection::vec(any::<u8>(), 0..512)),
            1..64,
        )
    ) {
        let (_owned, ring) = ring_of(64 * 1024);
        let mut expected = Vec::new();

        for (msg_type_id, payload) in &messages {
            // Drain whenever the ring fills so every message fits eventually.
            while ring.write(*msg_type_id, payload).is_err() {
                let drained = drain(&ring);
                prop_assert!(!drained.is_empty());
                expected.extend(drained);
            }
        }
        expected.extend(drain(&ring));

        prop_assert_eq!(expected, messages);
    }

    /// Producer and consumer positions only ever land on record alignment,
    /// and no record crosses the buffer end.
    #[test]
    fn positions_stay_aligned(payload_lengths in prop::collection::vec(0usize..256, 1..128)) {
        let (_owned, ring) = ring_of(4096);

        for length in payload_lengths {
            let payload = vec![0xA5u8; length];
            if ring.write(1, &payload).is_err() {
                drain(&ring);
                ring.write(1, &payload).unwrap();
            }
            prop_assert_eq!(ring.producer_position() % record_descriptor::ALIGNMENT as i64, 0);
        }

        drain(&ring);
        prop_assert_eq!(ring.consumer_position() % record_descriptor::ALIGNMENT as i64, 0);
        prop_assert_eq!(ring.consumer_position(), ring.producer_position());
    }
}

#[test]
fn wrap_padding_keeps_records_inside_the_buffer() {
    let (_owned, ring) = ring_of(1024);

    // Offset the ring so records land near the end repeatedly.
    for round in 0..200 {
        let payload = vec![round as u8; 100];
        while ring.write(1, &payload).is_err() {
            drain(&ring);
        }
        let drained = drain(&ring);
        for (_, data) in drained {
            assert_eq!(data.len(), 100);
            assert!(data.iter().all(|&b| b == round as u8));
        }
    }
}

#[test]
fn concurrent_writers_with_single_reader_lose_nothing() {
    use std::sync::Arc;

    let owned = Arc::new(OwnedBuffer::new(8192 + TRAILER_LENGTH));
    let ring = Arc::new(ManyToOneRingBuffer::new(owned.buffer()).unwrap());
    let writers = 3;
    let per_writer = 500usize;

    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                for i in 0..per_writer {
                    let payload = [(i % 251) as u8; 24];
                    while ring.write(1 + w, &payload).is_err() {
                        std::thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let mut counts = vec![0usize; writers as usize];
    let mut total = 0;
    while total < writers as usize * per_writer {
        total += ring.read(
            |msg_type_id, _, _, length| {
                assert_eq!(length, 24);
                counts[(msg_type_id - 1) as usize] += 1;
            },
            32,
        );
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(counts.iter().all(|&c| c == per_writer));
}
