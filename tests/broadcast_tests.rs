//! Broadcast buffer loss-detection and copy-receiver scenarios

use seurat::broadcast::{CopyReceiver, Receiver, Transmitter, TRAILER_LENGTH};
use seurat::buffer::OwnedBuffer;

#[test]
fn slow_receiver_detects_loss_and_resumes_consistently() {
    let data_capacity = 256;
    let owned = OwnedBuffer::new(data_capacity + TRAILER_LENGTH);
    let transmitter = Transmitter::new(owned.buffer()).unwrap();
    let mut receiver = Receiver::new(owned.buffer()).unwrap();

    // Consume the first record, then fall asleep while the producer laps
    // the buffer many times over.
    transmitter.transmit(1, &[0u8; 16]).unwrap();
    assert!(receiver.receive_next());
    assert!(receiver.validate());

    for i in 2..200 {
        transmitter.transmit(i, &[0u8; 16]).unwrap();
    }

    let mut delivered = Vec::new();
    while receiver.receive_next() {
        let msg_type_id = receiver.msg_type_id();
        if receiver.validate() {
            delivered.push(msg_type_id);
        }
    }

    assert!(receiver.lapped_count() >= 1, "receiver must notice the lap");
    // After re-sync, delivery is a contiguous suffix ending at the last
    // transmitted record.
    assert_eq!(*delivered.last().unwrap(), 199);
    for pair in delivered.windows(2) {
        assert_eq!(pair[1], pair[0] + 1);
    }
}

#[test]
fn copy_receiver_reports_lap_count_to_its_owner() {
    let data_capacity = 128;
    let owned = OwnedBuffer::new(data_capacity + TRAILER_LENGTH);
    let transmitter = Transmitter::new(owned.buffer()).unwrap();
    let mut copy_receiver = CopyReceiver::new(Receiver::new(owned.buffer()).unwrap());

    assert_eq!(copy_receiver.lapped_count(), 0);

    for i in 0..64 {
        transmitter.transmit(1 + i, &[0u8; 8]).unwrap();
    }

    let mut count = 0;
    copy_receiver.receive(&mut |_, _, _, _| count += 1);
    assert!(count > 0);
    assert!(copy_receiver.lapped_count() >= 1);
}

#[test]
fn interleaved_transmit_receive_delivers_everything() {
    let owned = OwnedBuffer::new(1024 + TRAILER_LENGTH);
    let transmitter = Transmitter::new(owned.buffer()).unwrap();
    let mut copy_receiver = CopyReceiver::new(Receiver::new(owned.buffer()).unwrap());

    let mut received = Vec::new();
    for i in 0..500 {
        let payload = vec![(i % 256) as u8; 1 + (i % 48)];
        transmitter.transmit(1 + (i as i32 % 7), &payload).unwrap();

        copy_receiver.receive(&mut |msg_type_id, buffer, offset, length| {
            let mut data = vec![0u8; length];
            buffer.get_bytes(offset, &mut data);
            received.push((msg_type_id, data));
        });
    }

    // Kept pace with the producer: nothing lost, everything in order.
    assert_eq!(copy_receiver.lapped_count(), 0);
    assert_eq!(received.len(), 500);
    for (i, (msg_type_id, data)) in received.iter().enumerate() {
        assert_eq!(*msg_type_id, 1 + (i as i32 % 7));
        assert_eq!(data.len(), 1 + (i % 48));
        assert!(data.iter().all(|&b| b == (i % 256) as u8));
    }
}
