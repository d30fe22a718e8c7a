//! Storage layer for brecht
//!
//! The durable core of one log segment:
//! - Store: buffered, append-only file of length-prefixed frames
//! - Index: fixed-width entries in a memory-mapped file, entry number → position
//! - Mmap: the owned writable mapping behind the index
//!
//! Store and Index are independent; composing them over a base offset is the
//! job of `crate::log::Segment`.

use crate::error::{LogError, Result};
use std::path::{Path, PathBuf};

pub mod index;
pub mod mmap;
pub mod store;

pub use index::{EntryRef, Index, IndexEntry};
pub use store::Store;

/// Width of the big-endian length prefix in front of every store frame.
pub const LEN_WIDTH: u64 = 8;

/// Width of the relative offset field of an index entry.
pub const OFFSET_WIDTH: u64 = 4;

/// Width of the store position field of an index entry.
pub const POSITION_WIDTH: u64 = 8;

/// Width of one index entry: `| relative_offset: u32 | position: u64 |`.
pub const ENTRY_WIDTH: u64 = OFFSET_WIDTH + POSITION_WIDTH;

/// Default index capacity while mapped: 1 MiB, room for 87381 entries.
pub const DEFAULT_MAX_INDEX_BYTES: u64 = 1024 * 1024;

/// Storage configuration.
///
/// `max_index_bytes` is the only recognized option. It bounds the index file
/// while mapped and therefore the number of entries before `Index::write`
/// reports `IndexFull`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub max_index_bytes: u64,
}

impl Config {
    pub fn new(max_index_bytes: u64) -> Self {
        Self { max_index_bytes }
    }

    /// Reject settings the index cannot map.
    pub fn validate(&self) -> Result<()> {
        if self.max_index_bytes == 0 {
            return Err(LogError::InvalidConfig(
                "max_index_bytes must be greater than zero".to_string(),
            ));
        }
        if self.max_index_bytes > usize::MAX as u64 {
            return Err(LogError::InvalidConfig(format!(
                "max_index_bytes {} exceeds addressable memory",
                self.max_index_bytes
            )));
        }
        Ok(())
    }

    /// Number of whole entries that fit in the mapped index.
    pub fn max_entries(&self) -> u64 {
        self.max_index_bytes / ENTRY_WIDTH
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_index_bytes: DEFAULT_MAX_INDEX_BYTES,
        }
    }
}

/// `<dir>/<base_offset>.store`, base offset zero-padded to 20 digits.
pub fn store_path(dir: impl AsRef<Path>, base_offset: u64) -> PathBuf {
    dir.as_ref().join(format!("{:020}.store", base_offset))
}

/// `<dir>/<base_offset>.index`, base offset zero-padded to 20 digits.
pub fn index_path(dir: impl AsRef<Path>, base_offset: u64) -> PathBuf {
    dir.as_ref().join(format!("{:020}.index", base_offset))
}
