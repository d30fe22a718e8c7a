/// Storage-level errors.
///
/// Three families, kept distinguishable for the request layer:
/// - not found: `PositionOutOfRange`, `EntryNotFound`, `OffsetNotFound`
/// - capacity exhausted: `IndexFull` (caller rolls the segment)
/// - faults: everything else, propagated verbatim and never retried here
#[derive(thiserror::Error, Debug)]
pub enum LogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("position {position} is out of range (store size {size})")]
    PositionOutOfRange { position: u64, size: u64 },

    #[error("index entry not found: {0}")]
    EntryNotFound(String),

    #[error("offset not found: {0}")]
    OffsetNotFound(u64),

    #[error("index is full: capacity {capacity} bytes")]
    IndexFull { capacity: u64 },

    #[error("corrupt frame at position {position}: length {length} exceeds store size {size}")]
    CorruptFrame { position: u64, length: u64, size: u64 },

    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("already closed")]
    Closed,

    #[error("lock poisoned")]
    LockPoisoned,
}

impl LogError {
    /// True for the end-of-data family. The request layer maps these to
    /// "not found" rather than an internal fault.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LogError::PositionOutOfRange { .. }
                | LogError::EntryNotFound(_)
                | LogError::OffsetNotFound(_)
        )
    }

    /// True when the index has no room for another entry.
    pub fn is_full(&self) -> bool {
        matches!(self, LogError::IndexFull { .. })
    }
}

impl<T> From<std::sync::PoisonError<T>> for LogError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        LogError::LockPoisoned
    }
}

pub type Result<T> = std::result::Result<T, LogError>;

/// Broker-level errors
/// These represent failures in the connection handling layer.
#[derive(thiserror::Error, Debug)]
pub enum BrokerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),

    #[error("frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("encode error: {0}")]
    EncodeError(String),

    #[error("storage error: {0}")]
    Storage(#[from] LogError),

    #[error("storage task failed: {0}")]
    TaskFailed(String),
}
