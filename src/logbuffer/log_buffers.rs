//! Mapped log-buffer files

use std::path::Path;

use super::{check_term_length, LOG_META_DATA_LENGTH, LOG_TERM_LENGTH_OFFSET, PARTITION_COUNT};
use crate::buffer::AtomicBuffer;
use crate::error::{Result, SeuratError};
use crate::memory::MappedFile;

/// A mapped log file: three term partitions and the trailing metadata page.
///
/// Held by `Arc` from publications and images; the conductor keeps released
/// logs on a linger list so in-flight users observe a valid mapping until
/// the linger deadline passes.
#[derive(Debug)]
pub struct LogBuffers {
    mapped: MappedFile,
    term_length: usize,
}

impl LogBuffers {
    /// Map an existing log file named by the driver and validate its shape.
    pub fn map(path: impl AsRef<Path>) -> Result<Self> {
        let mapped = MappedFile::map_existing(path)?;

        if mapped.len() < LOG_META_DATA_LENGTH {
            return Err(SeuratError::invalid_parameter(
                "logFileName",
                "file shorter than the log metadata section",
            ));
        }

        let meta = mapped.sub_buffer(mapped.len() - LOG_META_DATA_LENGTH, LOG_META_DATA_LENGTH);
        let term_length = meta.get_i32(LOG_TERM_LENGTH_OFFSET) as usize;
        check_term_length(term_length)?;

        let expected = PARTITION_COUNT * term_length + LOG_META_DATA_LENGTH;
        if mapped.len() != expected {
            return Err(SeuratError::invalid_parameter(
                "logFileName",
                format!(
                    "file length {} does not match {} for term length {}",
                    mapped.len(),
                    expected,
                    term_length
                ),
            ));
        }

        Ok(Self { mapped, term_length })
    }

    /// Term length of each partition.
    pub fn term_length(&self) -> usize {
        self.term_length
    }

    /// Buffer over one term partition.
    pub fn term_buffer(&self, partition_index: usize) -> AtomicBuffer {
        assert!(partition_index < PARTITION_COUNT);
        self.mapped
            .sub_buffer(partition_index * self.term_length, self.term_length)
    }

    /// Buffer over the metadata page.
    pub fn meta_buffer(&self) -> AtomicBuffer {
        self.mapped
            .sub_buffer(self.mapped.len() - LOG_META_DATA_LENGTH, LOG_META_DATA_LENGTH)
    }
}
