//! Driver → client event flyweights

use crate::buffer::AtomicBuffer;

/// `ON_ERROR`: `offendingCommandCorrelationId i64 @0, errorCode i32 @8,
/// errorMessage string @12`.
#[derive(Debug, Clone, Copy)]
pub struct ErrorResponse {
    buffer: AtomicBuffer,
    offset: usize,
}

impl ErrorResponse {
    pub fn wrap(buffer: AtomicBuffer, offset: usize) -> Self {
        Self { buffer, offset }
    }

    pub fn offending_command_correlation_id(&self) -> i64 {
        self.buffer.get_i64(self.offset)
    }

    pub fn set_offending_command_correlation_id(&self, value: i64) {
        self.buffer.put_i64(self.offset, value);
    }

    pub fn error_code(&self) -> i32 {
        self.buffer.get_i32(self.offset + 8)
    }

    pub fn set_error_code(&self, value: i32) {
        self.buffer.put_i32(self.offset + 8, value);
    }

    pub fn error_message(&self) -> String {
        self.buffer.get_string_ascii(self.offset + 12)
    }

    pub fn set_error_message(&self, value: &str) {
        self.buffer.put_string_ascii(self.offset + 12, value);
    }

    pub fn length(&self) -> usize {
        12 + 4 + self.buffer.get_i32(self.offset + 12) as usize
    }
}

/// `ON_PUBLICATION_READY` / `ON_EXCLUSIVE_PUBLICATION_READY`:
/// `correlationId i64 @0, registrationId i64 @8, sessionId i32 @16,
/// streamId i32 @20, positionLimitCounterId i32 @24,
/// channelStatusCounterId i32 @28, logFileName string @32`.
#[derive(Debug, Clone, Copy)]
pub struct PublicationReady {
    buffer: AtomicBuffer,
    offset: usize,
}

impl PublicationReady {
    const LOG_FILE_OFFSET: usize = 32;

    pub fn wrap(buffer: AtomicBuffer, offset: usize) -> Self {
        Self { buffer, offset }
    }

    pub fn correlation_id(&self) -> i64 {
        self.buffer.get_i64(self.offset)
    }

    pub fn set_correlation_id(&self, value: i64) {
        self.buffer.put_i64(self.offset, value);
    }

    pub fn registration_id(&self) -> i64 {
        self.buffer.get_i64(self.offset + 8)
    }

    pub fn set_registration_id(&self, value: i64) {
        self.buffer.put_i64(self.offset + 8, value);
    }

    pub fn session_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + 16)
    }

    pub fn set_session_id(&self, value: i32) {
        self.buffer.put_i32(self.offset + 16, value);
    }

    pub fn stream_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + 20)
    }

    pub fn set_stream_id(&self, value: i32) {
        self.buffer.put_i32(self.offset + 20, value);
    }

    pub fn position_limit_counter_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + 24)
    }

    pub fn set_position_limit_counter_id(&self, value: i32) {
        self.buffer.put_i32(self.offset + 24, value);
    }

    pub fn channel_status_counter_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + 28)
    }

    pub fn set_channel_status_counter_id(&self, value: i32) {
        self.buffer.put_i32(self.offset + 28, value);
    }

    pub fn log_file_name(&self) -> String {
        self.buffer.get_string_ascii(self.offset + Self::LOG_FILE_OFFSET)
    }

    pub fn set_log_file_name(&self, value: &str) {
        self.buffer
            .put_string_ascii(self.offset + Self::LOG_FILE_OFFSET, value);
    }

    pub fn length(&self) -> usize {
        Self::LOG_FILE_OFFSET
            + 4
            + self.buffer.get_i32(self.offset + Self::LOG_FILE_OFFSET) as usize
    }
}

/// `ON_SUBSCRIPTION_READY`: `correlationId i64 @0,
/// channelStatusCounterId i32 @8`.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionReady {
    buffer: AtomicBuffer,
    offset: usize,
}

impl SubscriptionReady {
    pub const LENGTH: usize = 12;

    pub fn wrap(buffer: AtomicBuffer, offset: usize) -> Self {
        Self { buffer, offset }
    }

    pub fn correlation_id(&self) -> i64 {
        self.buffer.get_i64(self.offset)
    }

    pub fn set_correlation_id(&self, value: i64) {
        self.buffer.put_i64(self.offset, value);
    }

    pub fn channel_status_counter_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + 8)
    }

    pub fn set_channel_status_counter_id(&self, value: i32) {
        self.buffer.put_i32(self.offset + 8, value);
    }
}

/// `ON_AVAILABLE_IMAGE`: `correlationId i64 @0, sessionId i32 @8,
/// streamId i32 @12, subscriptionRegistrationId i64 @16,
/// subscriberPositionId i32 @24, logFileName string @28,
/// sourceIdentity string following`.
#[derive(Debug, Clone, Copy)]
pub struct ImageReady {
    buffer: AtomicBuffer,
    offset: usize,
}

impl ImageReady {
    const LOG_FILE_OFFSET: usize = 28;

    pub fn wrap(buffer: AtomicBuffer, offset: usize) -> Self {
        Self { buffer, offset }
    }

    pub fn correlation_id(&self) -> i64 {
        self.buffer.get_i64(self.offset)
    }

    pub fn set_correlation_id(&self, value: i64) {
        self.buffer.put_i64(self.offset, value);
    }

    pub fn session_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + 8)
    }

    pub fn set_session_id(&self, value: i32) {
        self.buffer.put_i32(self.offset + 8, value);
    }

    pub fn stream_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + 12)
    }

    pub fn set_stream_id(&self, value: i32) {
        self.buffer.put_i32(self.offset + 12, value);
    }

    pub fn subscription_registration_id(&self) -> i64 {
        self.buffer.get_i64(self.offset + 16)
    }

    pub fn set_subscription_registration_id(&self, value: i64) {
        self.buffer.put_i64(self.offset + 16, value);
    }

    pub fn subscriber_position_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + 24)
    }

    pub fn set_subscriber_position_id(&self, value: i32) {
        self.buffer.put_i32(self.offset + 24, value);
    }

    pub fn log_file_name(&self) -> String {
        self.buffer.get_string_ascii(self.offset + Self::LOG_FILE_OFFSET)
    }

    pub fn set_log_file_name(&self, value: &str) {
        self.buffer
            .put_string_ascii(self.offset + Self::LOG_FILE_OFFSET, value);
    }

    fn source_identity_offset(&self) -> usize {
        self.offset
            + Self::LOG_FILE_OFFSET
            + 4
            + self.buffer.get_i32(self.offset + Self::LOG_FILE_OFFSET) as usize
    }

    pub fn source_identity(&self) -> String {
        self.buffer.get_string_ascii(self.source_identity_offset())
    }

    /// Set after the log file name; order matters.
    pub fn set_source_identity(&self, value: &str) {
        self.buffer
            .put_string_ascii(self.source_identity_offset(), value);
    }

    pub fn length(&self) -> usize {
        let source_offset = self.source_identity_offset();
        source_offset - self.offset + 4 + self.buffer.get_i32(source_offset) as usize
    }
}

/// `ON_UNAVAILABLE_IMAGE`: `correlationId i64 @0,
/// subscriptionRegistrationId i64 @8, streamId i32 @16, channel string @20`.
#[derive(Debug, Clone, Copy)]
pub struct ImageMessage {
    buffer: AtomicBuffer,
    offset: usize,
}

impl ImageMessage {
    const CHANNEL_OFFSET: usize = 20;

    pub fn wrap(buffer: AtomicBuffer, offset: usize) -> Self {
        Self { buffer, offset }
    }

    pub fn correlation_id(&self) -> i64 {
        self.buffer.get_i64(self.offset)
    }

    pub fn set_correlation_id(&self, value: i64) {
        self.buffer.put_i64(self.offset, value);
    }

    pub fn subscription_registration_id(&self) -> i64 {
        self.buffer.get_i64(self.offset + 8)
    }

    pub fn set_subscription_registration_id(&self, value: i64) {
        self.buffer.put_i64(self.offset + 8, value);
    }

    pub fn stream_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + 16)
    }

    pub fn set_stream_id(&self, value: i32) {
        self.buffer.put_i32(self.offset + 16, value);
    }

    pub fn channel(&self) -> String {
        self.buffer.get_string_ascii(self.offset + Self::CHANNEL_OFFSET)
    }

    pub fn set_channel(&self, value: &str) {
        self.buffer
            .put_string_ascii(self.offset + Self::CHANNEL_OFFSET, value);
    }

    pub fn length(&self) -> usize {
        Self::CHANNEL_OFFSET + 4 + self.buffer.get_i32(self.offset + Self::CHANNEL_OFFSET) as usize
    }
}

/// `ON_OPERATION_SUCCESS`: `correlationId i64 @0`.
#[derive(Debug, Clone, Copy)]
pub struct OperationSucceeded {
    buffer: AtomicBuffer,
    offset: usize,
}

impl OperationSucceeded {
    pub const LENGTH: usize = 8;

    pub fn wrap(buffer: AtomicBuffer, offset: usize) -> Self {
        Self { buffer, offset }
    }

    pub fn correlation_id(&self) -> i64 {
        self.buffer.get_i64(self.offset)
    }

    pub fn set_correlation_id(&self, value: i64) {
        self.buffer.put_i64(self.offset, value);
    }
}

/// `ON_COUNTER_READY` / `ON_UNAVAILABLE_COUNTER`:
/// `correlationId i64 @0, counterId i32 @8`.
#[derive(Debug, Clone, Copy)]
pub struct CounterUpdate {
    buffer: AtomicBuffer,
    offset: usize,
}

impl CounterUpdate {
    pub const LENGTH: usize = 12;

    pub fn wrap(buffer: AtomicBuffer, offset: usize) -> Self {
        Self { buffer, offset }
    }

    pub fn correlation_id(&self) -> i64 {
        self.buffer.get_i64(self.offset)
    }

    pub fn set_correlation_id(&self, value: i64) {
        self.buffer.put_i64(self.offset, value);
    }

    pub fn counter_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + 8)
    }

    pub fn set_counter_id(&self, value: i32) {
        self.buffer.put_i32(self.offset + 8, value);
    }
}

/// `ON_CLIENT_TIMEOUT`: `clientId i64 @0`.
#[derive(Debug, Clone, Copy)]
pub struct ClientTimeout {
    buffer: AtomicBuffer,
    offset: usize,
}

impl ClientTimeout {
    pub const LENGTH: usize = 8;

    pub fn wrap(buffer: AtomicBuffer, offset: usize) -> Self {
        Self { buffer, offset }
    }

    pub fn client_id(&self) -> i64 {
        self.buffer.get_i64(self.offset)
    }

    pub fn set_client_id(&self, value: i64) {
        self.buffer.put_i64(self.offset, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::OwnedBuffer;

    #[test]
    fn publication_ready_round_trip() {
        let owned = OwnedBuffer::new(512);
        let event = PublicationReady::wrap(owned.buffer(), 0);

        event.set_correlation_id(7);
        event.set_registration_id(42);
        event.set_session_id(-123);
        event.set_stream_id(1001);
        event.set_position_limit_counter_id(4);
        event.set_channel_status_counter_id(5);
        event.set_log_file_name("/dev/shm/aeron-x/publications/42.logbuffer");

        assert_eq!(event.correlation_id(), 7);
        assert_eq!(event.registration_id(), 42);
        assert_eq!(event.session_id(), -123);
        assert_eq!(event.stream_id(), 1001);
        assert_eq!(event.position_limit_counter_id(), 4);
        assert_eq!(event.channel_status_counter_id(), 5);
        assert_eq!(
            event.log_file_name(),
            "/dev/shm/aeron-x/publications/42.logbuffer"
        );
        assert_eq!(event.length(), 32 + 4 + 42);
    }

    #[test]
    fn image_ready_carries_two_strings() {
        let owned = OwnedBuffer::new(512);
        let event = ImageReady::wrap(owned.buffer(), 0);

        event.set_correlation_id(99);
        event.set_session_id(17);
        event.set_stream_id(1001);
        event.set_subscription_registration_id(88);
        event.set_subscriber_position_id(12);
        event.set_log_file_name("/dev/shm/aeron-x/images/99.logbuffer");
        event.set_source_identity("127.0.0.1:40123");

        assert_eq!(event.correlation_id(), 99);
        assert_eq!(event.subscription_registration_id(), 88);
        assert_eq!(event.subscriber_position_id(), 12);
        assert_eq!(event.log_file_name(), "/dev/shm/aeron-x/images/99.logbuffer");
        assert_eq!(event.source_identity(), "127.0.0.1:40123");
        assert_eq!(event.length(), 28 + 4 + 36 + 4 + 15);
    }

    #[test]
    fn error_response_round_trip() {
        let owned = OwnedBuffer::new(256);
        let event = ErrorResponse::wrap(owned.buffer(), 0);

        event.set_offending_command_correlation_id(55);
        event.set_error_code(11);
        event.set_error_message("stream unknown");

        assert_eq!(event.offending_command_correlation_id(), 55);
        assert_eq!(event.error_code(), 11);
        assert_eq!(event.error_message(), "stream unknown");
    }
}
