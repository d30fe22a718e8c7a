use crate::error::{LogError, Result};
use crate::storage::{self, Config, EntryRef, Index, Store, LEN_WIDTH};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A record read back from a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Record payload bytes.
    pub value: Vec<u8>,
    /// Logical offset assigned when this record was appended.
    pub offset: u64,
}

/// A Segment is one Store plus its Index, covering the offsets
/// `[base_offset, next_offset)`.
///
/// Responsibilities:
/// - Assign monotonically increasing logical offsets
/// - Translate absolute offsets to index entry numbers (`offset - base_offset`)
/// - Keep the store and index in step on append
///
/// NOT responsible for:
/// - Rolling to a new segment when full (caller sees `IndexFull`)
/// - Retention or compaction
///
/// ## Files:
/// `<dir>/<base_offset>.store` and `<dir>/<base_offset>.index`.
///
/// ## Thread safety:
/// Appends serialize on the `next_offset` mutex so an offset, its frame and
/// its index entry are assigned together. Reads only take that lock long
/// enough to bound the offset, then go through the store and index locks.
pub struct Segment {
    dir: PathBuf,
    base_offset: u64,
    config: Config,
    store: Store,
    index: Index,
    /// Offset the next append receives. Published only after the index
    /// entry is written, so readers never see an offset without its entry.
    next_offset: Mutex<u64>,
}

impl Segment {
    /// Open or create the segment starting at `base_offset` in `dir`.
    ///
    /// On reopen `next_offset` resumes after the entries already indexed.
    /// An index that opens full may have been left at capacity by an
    /// unclean exit; its entries are checked against the store and the
    /// index is cut at the first one that does not point at a whole frame.
    ///
    /// # Errors
    /// - `CorruptIndex` if the last entry of an index that is not full does
    ///   not match its slot or points past the end of the store (index
    ///   persisted, store frame lost)
    /// - Any error from opening the store or index
    pub fn open(dir: impl AsRef<Path>, base_offset: u64, config: Config) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let store = Store::open(storage::store_path(&dir, base_offset))?;
        let index = Index::open(storage::index_path(&dir, base_offset), &config)?;

        if index.is_full()? {
            recover_index(&store, &index)?;
        }

        let entries = index.entries()?;
        if entries > 0 {
            let last = index.read(EntryRef::Last)?;
            let store_size = store.size()?;
            if u64::from(last.relative_offset) != entries - 1 || last.position >= store_size {
                return Err(LogError::CorruptIndex(format!(
                    "last entry {:?} of {} does not match {} entries over a {} byte store",
                    last,
                    index.name().display(),
                    entries,
                    store_size
                )));
            }
        }

        let next_offset = base_offset + entries;

        tracing::info!(
            dir = %dir.display(),
            base_offset,
            next_offset,
            "opened segment"
        );

        Ok(Segment {
            dir,
            base_offset,
            config,
            store,
            index,
            next_offset: Mutex::new(next_offset),
        })
    }

    /// Append a record and return its offset.
    ///
    /// # Errors
    /// - `IndexFull` when the index has no room. Checked before the store is
    ///   touched, so a full segment never gains an unindexed frame.
    /// - Store or index I/O errors
    pub fn append(&self, value: &[u8]) -> Result<u64> {
        let mut next = self.next_offset.lock()?;

        let full = LogError::IndexFull {
            capacity: self.config.max_index_bytes,
        };
        if self.index.is_full()? {
            return Err(full);
        }
        // Relative offsets are u32 on disk
        let relative = u32::try_from(*next - self.base_offset).map_err(|_| full)?;

        let (_, position) = self.store.append(value)?;
        self.index.write(relative, position)?;

        let offset = *next;
        *next += 1;
        Ok(offset)
    }

    /// Read the record at an absolute offset.
    ///
    /// # Errors
    /// - `OffsetNotFound` if `offset` is outside `[base_offset, next_offset)`
    pub fn read(&self, offset: u64) -> Result<Record> {
        let next = *self.next_offset.lock()?;
        if offset < self.base_offset || offset >= next {
            return Err(LogError::OffsetNotFound(offset));
        }

        let entry = self.index.read(EntryRef::Nth(offset - self.base_offset))?;
        let value = self.store.read(entry.position)?;

        Ok(Record { value, offset })
    }

    /// Push buffered store writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    /// Close the store and the index. Both are attempted; the first error wins.
    pub fn close(&self) -> Result<()> {
        let store_result = self.store.close();
        let index_result = self.index.close();

        tracing::info!(dir = %self.dir.display(), base_offset = self.base_offset, "closed segment");
        store_result.and(index_result)
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Offset the next append will receive.
    pub fn next_offset(&self) -> Result<u64> {
        Ok(*self.next_offset.lock()?)
    }

    /// Highest assigned offset, `None` while the segment is empty.
    pub fn last_offset(&self) -> Result<Option<u64>> {
        let next = self.next_offset()?;
        Ok((next > self.base_offset).then(|| next - 1))
    }

    /// True when the next append would fail with `IndexFull`.
    pub fn is_full(&self) -> Result<bool> {
        self.index.is_full()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn index(&self) -> &Index {
        &self.index
    }
}

/// Keep the longest prefix of index entries that are numbered in order and
/// point at non-overlapping positions each holding a whole frame. The store is
/// authoritative; entries past its end were never backed by a flushed frame.
fn recover_index(store: &Store, index: &Index) -> Result<u64> {
    let store_size = store.size()?;
    let slots = index.entries()?;

    let mut valid = 0u64;
    let mut prev_end = 0u64;
    while valid < slots {
        let entry = index.read(EntryRef::Nth(valid))?;
        if u64::from(entry.relative_offset) != valid || entry.position < prev_end {
            break;
        }
        match frame_end(store, entry.position, store_size)? {
            Some(end) => prev_end = end,
            None => break,
        }
        valid += 1;
    }

    if valid < slots {
        index.truncate_entries(valid)?;
        tracing::warn!(
            path = %index.name().display(),
            recovered = valid,
            discarded = slots - valid,
            store_size,
            "recovered index left at capacity"
        );
    }
    Ok(valid)
}

/// End position of the frame at `position`, `None` if it does not fit.
fn frame_end(store: &Store, position: u64, store_size: u64) -> Result<Option<u64>> {
    let mut header = [0u8; LEN_WIDTH as usize];
    match store.read_at(&mut header, position) {
        Ok(_) => {}
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e),
    }

    let end = (position + LEN_WIDTH).checked_add(u64::from_be_bytes(header));
    Ok(end.filter(|end| *end <= store_size))
}
