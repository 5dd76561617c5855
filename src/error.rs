//! Error types and handling for Seurat

/// Result type alias for Seurat operations
pub type Result<T> = std::result::Result<T, SeuratError>;

/// Error types for the Seurat client
#[derive(Debug, thiserror::Error)]
pub enum SeuratError {
    /// I/O related errors (file operations, mmap, etc.)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// CnC file carries a version this client cannot speak
    #[error("CnC version mismatch: file has {actual}, client requires major {required_major}")]
    CncVersion { required_major: u8, actual: String },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// A bounded buffer could not accept the request (transient; pace and retry)
    #[error("Insufficient capacity: {buffer_type}")]
    InsufficientCapacity { buffer_type: String },

    /// Media driver stopped heartbeating within the configured timeout
    #[error("Media driver timeout: {message}")]
    DriverTimeout { message: String },

    /// Media driver declared this client timed out
    #[error("Client timeout: driver timed out client {client_id}")]
    ClientTimeout { client_id: i64 },

    /// Driver rejected a registration with an error response
    #[error("Registration error {code}: {message}")]
    Registration { code: i32, message: String },

    /// Channel URI failed validation
    #[error("Invalid channel '{uri}': {message}")]
    Channel { uri: String, message: String },

    /// Operation attempted on a closed client
    #[error("Client is closed")]
    ClientClosed,

    /// The to-clients broadcast lapped this receiver; driver state was missed
    #[error("Driver event stream lost: lapped {lapped} time(s)")]
    EventStreamLost { lapped: i64 },
}

impl SeuratError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an insufficient capacity error
    pub fn insufficient_capacity(buffer_type: impl Into<String>) -> Self {
        Self::InsufficientCapacity {
            buffer_type: buffer_type.into(),
        }
    }

    /// Create a driver timeout error
    pub fn driver_timeout(message: impl Into<String>) -> Self {
        Self::DriverTimeout {
            message: message.into(),
        }
    }

    /// Create a registration error from a driver error response
    pub fn registration(code: i32, message: impl Into<String>) -> Self {
        Self::Registration {
            code,
            message: message.into(),
        }
    }

    /// Create a channel validation error
    pub fn channel(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Channel {
            uri: uri.into(),
            message: message.into(),
        }
    }
}

// Convert from common error types
impl From<std::io::Error> for SeuratError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SeuratError::invalid_parameter("termLength", "must be a power of two");
        assert!(matches!(err, SeuratError::InvalidParameter { .. }));

        let err = SeuratError::registration(11, "unknown stream");
        assert!(matches!(err, SeuratError::Registration { code: 11, .. }));

        let err = SeuratError::insufficient_capacity("to-driver ring");
        assert!(matches!(err, SeuratError::InsufficientCapacity { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = SeuratError::driver_timeout("no heartbeat for 10s");
        let display = format!("{}", err);
        assert!(display.contains("Media driver timeout"));
        assert!(display.contains("no heartbeat"));
    }
}
