//! Command encoder over the to-driver ring buffer

use std::sync::Arc;

use crate::buffer::AtomicBuffer;
use crate::command::{self, DestinationMessage, PublicationMessage, RemoveMessage, SubscriptionMessage};
use crate::command::CorrelatedMessage;
use crate::error::Result;
use crate::ringbuffer::ManyToOneRingBuffer;

/// Largest encoded command: fixed fields plus a maximum-length channel URI.
const COMMAND_BUFFER_LENGTH: usize = 4096 + 512;

/// Stateless encoder that builds command flyweights in a scratch buffer and
/// forwards them to the driver through the MPSC ring.
///
/// Every command carries a correlation id allocated from the ring's shared
/// counter. A full ring surfaces as `InsufficientCapacity`; callers do not
/// retry here, the conductor's idle strategy paces them.
#[derive(Debug)]
pub struct DriverProxy {
    ring: Arc<ManyToOneRingBuffer>,
    client_id: i64,
}

impl DriverProxy {
    /// The client id is allocated once from the driver-wide correlation
    /// counter, identifying this client instance for its lifetime.
    pub fn new(ring: Arc<ManyToOneRingBuffer>) -> Self {
        let client_id = ring.next_correlation_id();
        Self { ring, client_id }
    }

    /// Identity of this client as seen by the driver.
    pub fn client_id(&self) -> i64 {
        self.client_id
    }

    /// Next unique correlation id.
    pub fn next_correlation_id(&self) -> i64 {
        self.ring.next_correlation_id()
    }

    /// Epoch-millisecond timestamp of the driver's last pass over the ring.
    pub fn time_of_last_driver_keepalive_ms(&self) -> i64 {
        self.ring.consumer_heartbeat_time_ms()
    }

    pub fn add_publication(&self, channel: &str, stream_id: i32) -> Result<i64> {
        self.publication_command(command::ADD_PUBLICATION, channel, stream_id)
    }

    pub fn add_exclusive_publication(&self, channel: &str, stream_id: i32) -> Result<i64> {
        self.publication_command(command::ADD_EXCLUSIVE_PUBLICATION, channel, stream_id)
    }

    pub fn remove_publication(&self, registration_id: i64) -> Result<i64> {
        self.remove_command(command::REMOVE_PUBLICATION, registration_id)
    }

    pub fn add_subscription(&self, channel: &str, stream_id: i32) -> Result<i64> {
        let correlation_id = self.ring.next_correlation_id();
        let mut scratch = [0u8; COMMAND_BUFFER_LENGTH];
        let buffer = AtomicBuffer::wrap_slice(&mut scratch);

        let message = SubscriptionMessage::wrap(buffer, 0);
        message.correlated().set_client_id(self.client_id);
        message.correlated().set_correlation_id(correlation_id);
        message.set_registration_correlation_id(command::NULL_VALUE);
        message.set_stream_id(stream_id);
        message.set_channel(channel);

        self.ring
            .write(command::ADD_SUBSCRIPTION, &scratch[..message.length()])?;
        Ok(correlation_id)
    }

    pub fn remove_subscription(&self, registration_id: i64) -> Result<i64> {
        self.remove_command(command::REMOVE_SUBSCRIPTION, registration_id)
    }

    pub fn add_destination(&self, registration_id: i64, channel: &str) -> Result<i64> {
        self.destination_command(command::ADD_DESTINATION, registration_id, channel)
    }

    pub fn remove_destination(&self, registration_id: i64, channel: &str) -> Result<i64> {
        self.destination_command(command::REMOVE_DESTINATION, registration_id, channel)
    }

    pub fn client_keepalive(&self) -> Result<()> {
        let mut scratch = [0u8; CorrelatedMessage::LENGTH];
        let buffer = AtomicBuffer::wrap_slice(&mut scratch);

        let message = CorrelatedMessage::wrap(buffer, 0);
        message.set_client_id(self.client_id);
        message.set_correlation_id(0);

        self.ring.write(command::CLIENT_KEEPALIVE, &scratch)
    }

    pub fn client_close(&self) -> Result<()> {
        let mut scratch = [0u8; CorrelatedMessage::LENGTH];
        let buffer = AtomicBuffer::wrap_slice(&mut scratch);

        let message = CorrelatedMessage::wrap(buffer, 0);
        message.set_client_id(self.client_id);
        message.set_correlation_id(self.ring.next_correlation_id());

        self.ring.write(command::CLIENT_CLOSE, &scratch)
    }

    fn publication_command(&self, msg_type_id: i32, channel: &str, stream_id: i32) -> Result<i64> {
        let correlation_id = self.ring.next_correlation_id();
        let mut scratch = [0u8; COMMAND_BUFFER_LENGTH];
        let buffer = AtomicBuffer::wrap_slice(&mut scratch);

        let message = PublicationMessage::wrap(buffer, 0);
        message.correlated().set_client_id(self.client_id);
        message.correlated().set_correlation_id(correlation_id);
        message.set_stream_id(stream_id);
        message.set_channel(channel);

        self.ring.write(msg_type_id, &scratch[..message.length()])?;
        Ok(correlation_id)
    }

    fn remove_command(&self, msg_type_id: i32, registration_id: i64) -> Result<i64> {
        let correlation_id = self.ring.next_correlation_id();
        let mut scratch = [0u8; RemoveMessage::LENGTH];
        let buffer = AtomicBuffer::wrap_slice(&mut scratch);

        let message = RemoveMessage::wrap(buffer, 0);
        message.correlated().set_client_id(self.client_id);
        message.correlated().set_correlation_id(correlation_id);
        message.set_registration_id(registration_id);

        self.ring.write(msg_type_id, &scratch)?;
        Ok(correlation_id)
    }

    fn destination_command(
        &self,
        msg_type_id: i32,
        registration_id: i64,
        channel: &str,
    ) -> Result<i64> {
        let correlation_id = self.ring.next_correlation_id();
        let mut scratch = [0u8; COMMAND_BUFFER_LENGTH];
        let buffer = AtomicBuffer::wrap_slice(&mut scratch);

        let message = DestinationMessage::wrap(buffer, 0);
        message.correlated().set_client_id(self.client_id);
        message.correlated().set_correlation_id(correlation_id);
        message.set_registration_id(registration_id);
        message.set_channel(channel);

        self.ring.write(msg_type_id, &scratch[..message.length()])?;
        Ok(correlation_id)
    }
}
