//! Log layer: composes storage primitives into addressable segments.
//!
//! Current scope:
//! - Segment: one Store + one Index over a base offset
//!
//! Rotation across segments, retention and compaction live above this layer.

pub mod segment;

pub use segment::{Record, Segment};
