//! Command-and-Control (CnC) file layout and mapping
//!
//! The media driver exposes one mmapped `cnc.dat` file per driver instance:
//!
//! ```text
//! [MetadataHeader][ToDriverBuffer][ToClientsBuffer][CountersMetadata][CountersValues][ErrorLog]
//! ```
//!
//! The metadata header names the version and the length of each subregion;
//! everything after it is located by accumulating those lengths in order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::buffer::AtomicBuffer;
use crate::error::{Result, SeuratError};
use crate::memory::MappedFile;
use crate::util::{
    align, semantic_version_compose, semantic_version_major, semantic_version_to_string,
    CACHE_LINE_LENGTH,
};

/// File name of the CnC file within the Aeron directory.
pub const CNC_FILE: &str = "cnc.dat";

/// CnC protocol version this client speaks. Only the major component must
/// match the file.
pub const CNC_VERSION: i32 = semantic_version_compose(0, 2, 0);

/// Metadata header field offsets.
pub const CNC_VERSION_FIELD_OFFSET: usize = 0;
pub const TO_DRIVER_BUFFER_LENGTH_FIELD_OFFSET: usize = 4;
pub const TO_CLIENTS_BUFFER_LENGTH_FIELD_OFFSET: usize = 8;
pub const COUNTERS_METADATA_BUFFER_LENGTH_FIELD_OFFSET: usize = 12;
pub const COUNTERS_VALUES_BUFFER_LENGTH_FIELD_OFFSET: usize = 16;
pub const ERROR_LOG_BUFFER_LENGTH_FIELD_OFFSET: usize = 20;
pub const CLIENT_LIVENESS_TIMEOUT_FIELD_OFFSET: usize = 24;
pub const START_TIMESTAMP_FIELD_OFFSET: usize = 32;
pub const PID_FIELD_OFFSET: usize = 40;

/// Total length of the metadata header region.
pub const META_DATA_LENGTH: usize = CACHE_LINE_LENGTH * 2;

/// Lengths of the five subregions following the metadata header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CncLengths {
    pub to_driver: usize,
    pub to_clients: usize,
    pub counters_metadata: usize,
    pub counters_values: usize,
    pub error_log: usize,
}

impl CncLengths {
    /// Total CnC file length implied by these region lengths.
    pub fn file_length(&self) -> usize {
        align(
            META_DATA_LENGTH
                + self.to_driver
                + self.to_clients
                + self.counters_metadata
                + self.counters_values
                + self.error_log,
            CACHE_LINE_LENGTH,
        )
    }
}

/// A mapped CnC file with validated version and located subregions.
#[derive(Debug)]
pub struct CncFile {
    mapped: Arc<MappedFile>,
    lengths: CncLengths,
}

impl CncFile {
    /// Map `<dir>/cnc.dat` and validate it.
    pub fn map_in_dir(aeron_dir: impl AsRef<Path>) -> Result<Self> {
        Self::map(aeron_dir.as_ref().join(CNC_FILE))
    }

    /// Map a CnC file by explicit path and validate its version and length.
    pub fn map(path: impl AsRef<Path>) -> Result<Self> {
        let mapped = Arc::new(MappedFile::map_existing(path)?);
        let buffer = mapped.buffer();

        if buffer.capacity() < META_DATA_LENGTH {
            return Err(SeuratError::invalid_parameter(
                "cnc",
                "file shorter than metadata header",
            ));
        }

        let version = buffer.get_i32_volatile(CNC_VERSION_FIELD_OFFSET);
        if semantic_version_major(version) != semantic_version_major(CNC_VERSION) {
            return Err(SeuratError::CncVersion {
                required_major: semantic_version_major(CNC_VERSION),
                actual: semantic_version_to_string(version),
            });
        }

        let lengths = CncLengths {
            to_driver: buffer.get_i32(TO_DRIVER_BUFFER_LENGTH_FIELD_OFFSET) as usize,
            to_clients: buffer.get_i32(TO_CLIENTS_BUFFER_LENGTH_FIELD_OFFSET) as usize,
            counters_metadata: buffer.get_i32(COUNTERS_METADATA_BUFFER_LENGTH_FIELD_OFFSET)
                as usize,
            counters_values: buffer.get_i32(COUNTERS_VALUES_BUFFER_LENGTH_FIELD_OFFSET) as usize,
            error_log: buffer.get_i32(ERROR_LOG_BUFFER_LENGTH_FIELD_OFFSET) as usize,
        };

        if mapped.len() < lengths.file_length() {
            return Err(SeuratError::invalid_parameter(
                "cnc",
                format!(
                    "file length {} shorter than {} implied by region lengths",
                    mapped.len(),
                    lengths.file_length()
                ),
            ));
        }

        Ok(Self { mapped, lengths })
    }

    /// Region lengths read from the header.
    pub fn lengths(&self) -> CncLengths {
        self.lengths
    }

    /// Keep-alive handle for the underlying mapping.
    pub fn mapped_file(&self) -> Arc<MappedFile> {
        Arc::clone(&self.mapped)
    }

    /// Client liveness timeout announced by the driver, in nanoseconds.
    pub fn client_liveness_timeout_ns(&self) -> i64 {
        self.mapped
            .buffer()
            .get_i64_volatile(CLIENT_LIVENESS_TIMEOUT_FIELD_OFFSET)
    }

    /// Driver start timestamp, epoch milliseconds.
    pub fn start_timestamp_ms(&self) -> i64 {
        self.mapped.buffer().get_i64(START_TIMESTAMP_FIELD_OFFSET)
    }

    /// Driver process id.
    pub fn pid(&self) -> i64 {
        self.mapped.buffer().get_i64(PID_FIELD_OFFSET)
    }

    /// The to-driver command ring buffer region (includes its trailer).
    pub fn to_driver_buffer(&self) -> AtomicBuffer {
        self.mapped.sub_buffer(META_DATA_LENGTH, self.lengths.to_driver)
    }

    /// The to-clients broadcast buffer region (includes its trailer).
    pub fn to_clients_buffer(&self) -> AtomicBuffer {
        self.mapped
            .sub_buffer(META_DATA_LENGTH + self.lengths.to_driver, self.lengths.to_clients)
    }

    /// The counters metadata region.
    pub fn counters_metadata_buffer(&self) -> AtomicBuffer {
        self.mapped.sub_buffer(
            META_DATA_LENGTH + self.lengths.to_driver + self.lengths.to_clients,
            self.lengths.counters_metadata,
        )
    }

    /// The counters values region.
    pub fn counters_values_buffer(&self) -> AtomicBuffer {
        self.mapped.sub_buffer(
            META_DATA_LENGTH
                + self.lengths.to_driver
                + self.lengths.to_clients
                + self.lengths.counters_metadata,
            self.lengths.counters_values,
        )
    }

    /// The distinct error log region.
    pub fn error_log_buffer(&self) -> AtomicBuffer {
        self.mapped.sub_buffer(
            META_DATA_LENGTH
                + self.lengths.to_driver
                + self.lengths.to_clients
                + self.lengths.counters_metadata
                + self.lengths.counters_values,
            self.lengths.error_log,
        )
    }
}

/// Resolve the default Aeron directory for this platform and user:
/// `/dev/shm/aeron-<user>` on Linux, `<tmp>/aeron-<user>` elsewhere.
pub fn default_aeron_dir() -> PathBuf {
    let user = nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|u| u.name)
        .unwrap_or_else(|| "default".to_string());

    if cfg!(target_os = "linux") {
        PathBuf::from(format!("/dev/shm/aeron-{}", user))
    } else {
        std::env::temp_dir().join(format!("aeron-{}", user))
    }
}

/// Write a metadata header into a blank CnC region. Drivers do this once at
/// startup; the client library uses it only to build test fixtures.
pub fn initialise_header(
    buffer: &AtomicBuffer,
    lengths: &CncLengths,
    client_liveness_timeout_ns: i64,
    start_timestamp_ms: i64,
    pid: i64,
) {
    buffer.put_i32(TO_DRIVER_BUFFER_LENGTH_FIELD_OFFSET, lengths.to_driver as i32);
    buffer.put_i32(TO_CLIENTS_BUFFER_LENGTH_FIELD_OFFSET, lengths.to_clients as i32);
    buffer.put_i32(
        COUNTERS_METADATA_BUFFER_LENGTH_FIELD_OFFSET,
        lengths.counters_metadata as i32,
    );
    buffer.put_i32(
        COUNTERS_VALUES_BUFFER_LENGTH_FIELD_OFFSET,
        lengths.counters_values as i32,
    );
    buffer.put_i32(ERROR_LOG_BUFFER_LENGTH_FIELD_OFFSET, lengths.error_log as i32);
    buffer.put_i64(CLIENT_LIVENESS_TIMEOUT_FIELD_OFFSET, client_liveness_timeout_ns);
    buffer.put_i64(START_TIMESTAMP_FIELD_OFFSET, start_timestamp_ms);
    buffer.put_i64(PID_FIELD_OFFSET, pid);
    // Version last: readers treat a non-zero version as "header complete".
    buffer.put_i32_ordered(CNC_VERSION_FIELD_OFFSET, CNC_VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_cnc_file(path: &Path, lengths: &CncLengths, version: Option<i32>) {
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(&vec![0u8; lengths.file_length()]).unwrap();
        drop(f);

        let mapped = MappedFile::map_existing(path).unwrap();
        let buffer = mapped.buffer();
        initialise_header(&buffer, lengths, 5_000_000_000, 1_700_000_000_000, 4242);
        if let Some(v) = version {
            buffer.put_i32_ordered(CNC_VERSION_FIELD_OFFSET, v);
        }
    }

    fn test_lengths() -> CncLengths {
        CncLengths {
            to_driver: 64 * 1024 + crate::ringbuffer::TRAILER_LENGTH,
            to_clients: 64 * 1024 + crate::broadcast::TRAILER_LENGTH,
            counters_metadata: 16 * 1024,
            counters_values: 8 * 1024,
            error_log: 4 * 1024,
        }
    }

    #[test]
    fn maps_and_locates_regions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CNC_FILE);
        let lengths = test_lengths();
        write_cnc_file(&path, &lengths, None);

        let cnc = CncFile::map(&path).unwrap();
        assert_eq!(cnc.lengths(), lengths);
        assert_eq!(cnc.client_liveness_timeout_ns(), 5_000_000_000);
        assert_eq!(cnc.start_timestamp_ms(), 1_700_000_000_000);
        assert_eq!(cnc.pid(), 4242);

        assert_eq!(cnc.to_driver_buffer().capacity(), lengths.to_driver);
        assert_eq!(cnc.to_clients_buffer().capacity(), lengths.to_clients);
        assert_eq!(
            cnc.counters_values_buffer().capacity(),
            lengths.counters_values
        );
        assert_eq!(cnc.error_log_buffer().capacity(), lengths.error_log);

        // Regions tile the file without overlap.
        cnc.to_driver_buffer().put_i32(0, 7);
        assert_eq!(cnc.to_clients_buffer().get_i32(0), 0);
    }

    #[test]
    fn version_major_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CNC_FILE);
        let lengths = test_lengths();
        write_cnc_file(&path, &lengths, Some(semantic_version_compose(9, 0, 0)));

        let result = CncFile::map(&path);
        assert!(matches!(result, Err(SeuratError::CncVersion { .. })));
    }

    #[test]
    fn minor_version_difference_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CNC_FILE);
        let lengths = test_lengths();
        write_cnc_file(
            &path,
            &lengths,
            Some(semantic_version_compose(
                semantic_version_major(CNC_VERSION),
                9,
                9,
            )),
        );

        assert!(CncFile::map(&path).is_ok());
    }
}
