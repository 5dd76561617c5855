//! Channel URI validation
//!
//! Channels are opaque strings the driver interprets; the client checks only
//! shape and length before forwarding: `aeron:<media>[?key=value...]` with
//! media `udp` or `ipc`, optionally behind the `aeron-spy:` prefix.

use crate::error::{Result, SeuratError};

/// Scheme prefix of every channel URI.
pub const AERON_PREFIX: &str = "aeron:";

/// Prefix for spy subscriptions onto a local publication.
pub const SPY_PREFIX: &str = "aeron-spy:";

/// Shorthand accepted for the IPC media.
pub const IPC_CHANNEL: &str = "aeron:ipc";

/// Maximum encoded channel length accepted by the control protocol.
pub const MAX_CHANNEL_LENGTH: usize = 4096;

/// Validate a channel URI for dispatch to the driver.
pub fn validate_channel(uri: &str) -> Result<()> {
    if uri.is_empty() {
        return Err(SeuratError::channel(uri, "channel is empty"));
    }
    if uri.len() > MAX_CHANNEL_LENGTH {
        return Err(SeuratError::channel(
            uri,
            format!("channel exceeds {} bytes", MAX_CHANNEL_LENGTH),
        ));
    }

    let base = uri.strip_prefix(SPY_PREFIX).unwrap_or(uri);
    let rest = base.strip_prefix(AERON_PREFIX).ok_or_else(|| {
        SeuratError::channel(uri, format!("channel must start with '{}'", AERON_PREFIX))
    })?;

    let media = rest.split('?').next().unwrap_or("");
    match media {
        "udp" | "ipc" => Ok(()),
        other => Err(SeuratError::channel(
            uri,
            format!("unknown media '{}', expected 'udp' or 'ipc'", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_channels() {
        assert!(validate_channel("aeron:ipc").is_ok());
        assert!(validate_channel("aeron:udp?endpoint=localhost:40123").is_ok());
        assert!(validate_channel("aeron:udp?endpoint=224.0.1.1:40456|interface=192.168.1.1").is_ok());
        assert!(validate_channel("aeron-spy:aeron:udp?endpoint=localhost:40123").is_ok());
    }

    #[test]
    fn rejects_malformed_channels() {
        assert!(validate_channel("").is_err());
        assert!(validate_channel("udp://localhost:40123").is_err());
        assert!(validate_channel("aeron:tcp?endpoint=localhost:40123").is_err());
        assert!(validate_channel(&format!(
            "aeron:udp?endpoint={}",
            "x".repeat(MAX_CHANNEL_LENGTH)
        ))
        .is_err());
    }
}
