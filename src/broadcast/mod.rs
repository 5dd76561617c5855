//! Single-producer/many-consumer broadcast buffer
//!
//! The media driver transmits client-facing events on a broadcast buffer in
//! the CnC file: every attached client reads every record. Consumers are not
//! flow-controlled; a slow consumer gets lapped and must re-sync, detecting
//! the loss. The conductor consumes through [`CopyReceiver`] so the producer
//! is never stalled by a user handler.

mod copy_receiver;
mod receiver;
mod transmitter;

pub use copy_receiver::CopyReceiver;
pub use receiver::Receiver;
pub use transmitter::Transmitter;

use crate::util::CACHE_LINE_LENGTH;

/// Offset of the tail intent counter within the trailer (producer signals
/// the tail it is about to publish, letting receivers detect in-flight laps).
pub const TAIL_INTENT_COUNTER_OFFSET: usize = 0;
/// Offset of the committed tail counter within the trailer.
pub const TAIL_COUNTER_OFFSET: usize = 8;
/// Offset of the latest record counter within the trailer (re-sync point).
pub const LATEST_COUNTER_OFFSET: usize = 16;
/// Total trailer length appended to the data area.
pub const TRAILER_LENGTH: usize = CACHE_LINE_LENGTH * 2;

/// Record framing constants, shared by transmitter and receivers.
pub mod record_descriptor {
    /// Length of the `[length i32 | type i32]` record header.
    pub const HEADER_LENGTH: usize = 8;
    /// Records are padded to this alignment.
    pub const RECORD_ALIGNMENT: usize = 8;
    /// Type id of the padding record inserted when a message would wrap.
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
    pub fn msg_offset(record_offset: usize) -> usize {
        record_offset + HEADER_LENGTH
    }
}
