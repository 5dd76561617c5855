//! Memory-mapped views of driver-created files
//!
//! The client never creates shared-memory files; the media driver owns the
//! CnC file and every log-buffer file. This module maps those existing files
//! read-write and hands out [`AtomicBuffer`] views over the mappings.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::buffer::AtomicBuffer;
use crate::error::{Result, SeuratError};

/// A read-write mapping of an existing file.
#[derive(Debug)]
pub struct MappedFile {
    path: PathBuf,
    mmap: MmapMut,
}

impl MappedFile {
    /// Map an existing file in its entirety.
    ///
    /// Fails if the file does not exist or is empty; the driver creates and
    /// sizes these files before publishing their names.
    pub fn map_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                SeuratError::from_io(e, &format!("Failed to open {}", path.display()))
            })?;

        let len = file
            .metadata()
            .map_err(|e| SeuratError::from_io(e, "Failed to stat mapped file"))?
            .len() as usize;
        if len == 0 {
            return Err(SeuratError::invalid_parameter(
                "path",
                format!("{} is empty; driver has not initialised it", path.display()),
            ));
        }

        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .map_err(|e| SeuratError::from_io(e, "Failed to map file"))?
        };

        Ok(Self { path, mmap })
    }

    /// Length of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// True when the mapping is zero length (never the case after `map_existing`).
    pub fn is_empty(&self) -> bool {
        self.mmap.len() == 0
    }

    /// Path the mapping was created from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// An [`AtomicBuffer`] over the whole mapping.
    ///
    /// The mapping is shared with the driver, so mutation through the view
    /// under `&self` is the normal mode of operation.
    pub fn buffer(&self) -> AtomicBuffer {
        unsafe { AtomicBuffer::from_raw(self.mmap.as_ptr() as *mut u8, self.mmap.len()) }
    }

    /// An [`AtomicBuffer`] over `[offset, offset + len)` of the mapping.
    pub fn sub_buffer(&self, offset: usize, len: usize) -> AtomicBuffer {
        self.buffer().view(offset, len)
    }
}

unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn map_existing_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.dat");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(&vec![0u8; 4096]).unwrap();
        }

        let mapped = MappedFile::map_existing(&path).unwrap();
        assert_eq!(mapped.len(), 4096);

        let buffer = mapped.buffer();
        buffer.put_i64(128, 0x5EA7);
        assert_eq!(buffer.get_i64(128), 0x5EA7);

        let sub = mapped.sub_buffer(128, 8);
        assert_eq!(sub.get_i64(0), 0x5EA7);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = MappedFile::map_existing(dir.path().join("absent.dat"));
        assert!(matches!(result, Err(SeuratError::Io { .. })));
    }

    #[test]
    fn empty_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.dat");
        std::fs::File::create(&path).unwrap();

        let result = MappedFile::map_existing(&path);
        assert!(matches!(result, Err(SeuratError::InvalidParameter { .. })));
    }
}
