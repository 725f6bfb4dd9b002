//! runsort: external sort of keyed text lines.
//!
//! Lines are buffered in memory together with the length of their sort key
//! (a prefix of the line). When the buffer fills it is sorted by key and
//! spilled to a self-contained, optionally zstd-compressed chunk file. Once
//! input ends, all chunks are merged back into one key-ordered stream with a
//! k-way merge. Chunks live in a scoped temporary directory that is removed
//! when the merged stream (or the sorter, on early exit) is dropped.
//!
//! Quick start
//!
//! ```no_run
//! use runsort::{ExternalSorter, Record, SorterOptions};
//!
//! let mut sorter = ExternalSorter::new(SorterOptions::default()).expect("sorter");
//! for line in ["b 2", "a 1", "b 1"] {
//!     let key_len = line.find(' ').unwrap();
//!     sorter.push(Record::new(line.to_string(), key_len).unwrap()).unwrap();
//! }
//! for record in sorter.finish().expect("merge") {
//!     let record = record.expect("record");
//!     println!("{} => {}", record.key(), record.line());
//! }
//! ```
//!
//! Records sharing a key come out in the order they were pushed.

pub mod chunk;
pub mod codec;
pub mod error;
pub mod merge;
pub mod sorter;

pub use chunk::{ChunkInfo, ChunkReader, ChunkWriter, Record};
pub use error::SortError;
pub use merge::KWayMerge;
pub use sorter::{ExternalSorter, SorterOptions};

/// Crate-level result type.
pub type Result<T> = std::result::Result<T, SortError>;
