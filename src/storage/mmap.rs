use std::fs::File;

/// A fixed-size, writable memory-mapped region of a file.
///
/// # Purpose
/// Backs the index: entries are encoded straight into mapped memory, so a
/// lookup is a slice access instead of a `read(2)` per call.
///
/// # Ownership & Lifetime Rules
/// - The region is OWNED by exactly one Index (never shared, never cloned)
/// - The backing file is sized up front; the mapping covers all of it
/// - The region MUST be dropped before the file is truncated
///
/// # Safety Invariants (MUST HOLD)
/// 1. File length does not change while mapped
/// 2. No other process or handle writes the same file
/// 3. All access is bounds checked through slices
///
/// # Thread Safety
/// Callers serialize access (the Index wraps it in a Mutex).
#[derive(Debug)]
pub struct MmapRegion {
    mmap: memmap2::MmapMut,
}

impl MmapRegion {
    /// Map the whole file read/write.
    ///
    /// # Errors
    /// - File has zero length (cannot mmap empty file)
    /// - OS mmap call fails (permissions, limits, etc.)
    pub fn open_mut(file: &File) -> std::io::Result<Self> {
        let len = file.metadata()?.len();

        if len == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "cannot mmap empty file",
            ));
        }

        // SAFETY: the file is opened read/write by the owning Index, kept at a
        // fixed length for the whole lifetime of this mapping, and never
        // handed to another writer. Drop unmaps before the file is resized.
        let mmap = unsafe { memmap2::MmapMut::map_mut(file)? };

        Ok(MmapRegion { mmap })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    /// Length of the mapping; matches the file size at map time.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Synchronously write dirty pages back to the file (msync MS_SYNC).
    pub fn flush(&self) -> std::io::Result<()> {
        self.mmap.flush()
    }
}
