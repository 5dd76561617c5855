//! Control protocol between client and media driver
//!
//! Commands travel client → driver as records on the to-driver ring buffer;
//! events travel driver → client on the to-clients broadcast. Both sides are
//! fixed little-endian layouts accessed through flyweights over an
//! [`AtomicBuffer`](crate::buffer::AtomicBuffer); strings are `i32`
//! length-prefixed ASCII.

mod commands;
mod events;

pub use commands::{
    CorrelatedMessage, DestinationMessage, PublicationMessage, RemoveMessage, SubscriptionMessage,
};
pub use events::{
    ClientTimeout, CounterUpdate, ErrorResponse, ImageMessage, ImageReady, OperationSucceeded,
    PublicationReady, SubscriptionReady,
};

/// Command type ids (to-driver ring records).
pub const ADD_PUBLICATION: i32 = 0x01;
pub const REMOVE_PUBLICATION: i32 = 0x02;
pub const ADD_SUBSCRIPTION: i32 = 0x04;
pub const REMOVE_SUBSCRIPTION: i32 = 0x05;
pub const CLIENT_KEEPALIVE: i32 = 0x06;
pub const ADD_EXCLUSIVE_PUBLICATION: i32 = 0x07;
pub const ADD_DESTINATION: i32 = 0x08;
pub const REMOVE_DESTINATION: i32 = 0x09;
pub const CLIENT_CLOSE: i32 = 0x0F;

/// Event type ids (to-clients broadcast records).
pub const ON_ERROR: i32 = 0x0F01;
pub const ON_AVAILABLE_IMAGE: i32 = 0x0F02;
pub const ON_PUBLICATION_READY: i32 = 0x0F03;
pub const ON_OPERATION_SUCCESS: i32 = 0x0F04;
pub const ON_UNAVAILABLE_IMAGE: i32 = 0x0F05;
pub const ON_EXCLUSIVE_PUBLICATION_READY: i32 = 0x0F06;
pub const ON_SUBSCRIPTION_READY: i32 = 0x0F07;
pub const ON_COUNTER_READY: i32 = 0x0F08;
pub const ON_UNAVAILABLE_COUNTER: i32 = 0x0F09;
pub const ON_CLIENT_TIMEOUT: i32 = 0x0F0A;

/// Sentinel for fields the protocol leaves unset.
pub const NULL_VALUE: i64 = -1;
