pub mod broker;
pub mod error;
pub mod log;
pub mod protocol;
pub mod storage;

pub use error::{BrokerError, LogError};
pub use log::{Record, Segment};
pub use storage::{Config, EntryRef, Index, IndexEntry, Store};
