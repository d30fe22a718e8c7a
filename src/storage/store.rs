use crate::error::{LogError, Result};
use crate::storage::LEN_WIDTH;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A Store is the append-only record file of one segment.
///
/// Responsibilities:
/// - Own a `.store` file on disk
/// - Append length-prefixed frames through a write buffer
/// - Read a frame back by the byte position `append` returned
/// - Serve raw positional reads for bulk copies
///
/// NOT responsible for:
/// - Offset assignment (the index and the log own that)
/// - Checksums or self-validation of frames
///
/// ## On-disk format:
/// ```text
/// | length: u64 (big-endian) | payload: [u8; length] |
/// ```
/// No magic number, no padding. Frames are never overwritten.
///
/// ## Concurrency:
/// Every operation, including the flush implied by a read, holds one mutex
/// over the buffered writer and `size` for its whole duration. Store
/// operations on the same instance never overlap.
///
/// ## Durability:
/// `append` only fills the buffer. Bytes reach stable storage after
/// `flush` or `close`.
pub struct Store {
    path: PathBuf,
    state: Mutex<Option<StoreState>>,
}

struct StoreState {
    /// The file is opened in append mode, so the write position is always
    /// the end of file no matter where reads leave the cursor.
    writer: BufWriter<File>,

    /// Bytes written so far, buffered or not. Position of the next frame.
    size: u64,
}

impl Store {
    /// Open or create a store file.
    ///
    /// `size` is taken from the current file length, so reopening a store
    /// continues after the data already on disk.
    ///
    /// # Errors
    /// - I/O errors opening or statting the file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let size = file.metadata()?.len();

        tracing::debug!(path = %path.display(), size, "opened store");

        Ok(Store {
            path,
            state: Mutex::new(Some(StoreState {
                writer: BufWriter::new(file),
                size,
            })),
        })
    }

    /// Append one frame.
    ///
    /// Writes `[len(data): u64 BE][data]` at the logical end of the store.
    ///
    /// # Returns
    /// `(entry_length, entry_position)`: bytes written (`8 + len(data)`) and
    /// the offset where the length prefix begins.
    ///
    /// # Errors
    /// - I/O errors from the buffered writer. Buffered content is then
    ///   undefined; treat the store as suspect rather than retrying.
    pub fn append(&self, data: &[u8]) -> Result<(u64, u64)> {
        let mut guard = self.state.lock()?;
        let state = guard.as_mut().ok_or(LogError::Closed)?;

        let position = state.size;
        state
            .writer
            .write_all(&(data.len() as u64).to_be_bytes())?;
        state.writer.write_all(data)?;

        let written = LEN_WIDTH + data.len() as u64;
        state.size += written;

        Ok((written, position))
    }

    /// Read the frame starting at `position`.
    ///
    /// Flushes the write buffer first, so every prior append is visible.
    ///
    /// # Errors
    /// - `PositionOutOfRange` if no length prefix fits at `position`
    /// - `CorruptFrame` if the decoded length runs past the end of the store,
    ///   which is what a position off a frame boundary usually produces
    /// - I/O errors during flush or read
    pub fn read(&self, position: u64) -> Result<Vec<u8>> {
        let mut guard = self.state.lock()?;
        let state = guard.as_mut().ok_or(LogError::Closed)?;

        state.writer.flush()?;
        let size = state.size;

        let payload_start = match position.checked_add(LEN_WIDTH) {
            Some(end) if end <= size => end,
            _ => return Err(LogError::PositionOutOfRange { position, size }),
        };

        let mut file: &File = state.writer.get_ref();
        file.seek(SeekFrom::Start(position))?;

        let mut len_buf = [0u8; LEN_WIDTH as usize];
        file.read_exact(&mut len_buf)?;
        let length = u64::from_be_bytes(len_buf);

        if length > size - payload_start {
            return Err(LogError::CorruptFrame {
                position,
                length,
                size,
            });
        }

        let mut data = vec![0u8; length as usize];
        file.read_exact(&mut data)?;

        Ok(data)
    }

    /// Raw positional read of exactly `buf.len()` bytes at `offset`.
    ///
    /// No framing is interpreted. Used to copy regions of the store
    /// elsewhere without decoding each frame.
    ///
    /// # Errors
    /// - `PositionOutOfRange` if the range extends past the end of the store
    /// - I/O errors during flush or read
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut guard = self.state.lock()?;
        let state = guard.as_mut().ok_or(LogError::Closed)?;

        state.writer.flush()?;
        let size = state.size;

        match offset.checked_add(buf.len() as u64) {
            Some(end) if end <= size => {}
            _ => {
                return Err(LogError::PositionOutOfRange {
                    position: offset,
                    size,
                })
            }
        }

        let mut file: &File = state.writer.get_ref();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;

        Ok(buf.len())
    }

    /// Push buffered frames to the file and fsync.
    pub fn flush(&self) -> Result<()> {
        let mut guard = self.state.lock()?;
        let state = guard.as_mut().ok_or(LogError::Closed)?;

        state.writer.flush()?;
        state.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Flush buffered writes, fsync and release the file handle.
    ///
    /// Existing content is never truncated or rewritten. Any later call on
    /// this store fails with `Closed`.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.state.lock()?;
        let mut state = guard.take().ok_or(LogError::Closed)?;

        state.writer.flush()?;
        state.writer.get_ref().sync_all()?;

        tracing::debug!(path = %self.path.display(), size = state.size, "closed store");
        Ok(())
    }

    /// Bytes written so far, including frames still in the write buffer.
    pub fn size(&self) -> Result<u64> {
        let guard = self.state.lock()?;
        guard.as_ref().map(|s| s.size).ok_or(LogError::Closed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let Ok(slot) = self.state.get_mut() else {
            return;
        };
        if let Some(mut state) = slot.take() {
            if let Err(e) = state.writer.flush() {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to flush store on drop");
            }
        }
    }
}
