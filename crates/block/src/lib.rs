//! # Block — Sorted Byte Map
//!
//! The immutable sorted block at the bottom of the StrataKV table format.
//! A [`SortedByteMap`] packs snapshot-versioned key/value entries into a
//! single contiguous [`MemoryRegion`] with prefix compression and varint
//! framing, and supports binary search directly over the packed bytes —
//! no entries are materialized on the search path.
//!
//! ## Block layout
//!
//! All fixed-width integers are little-endian; varints are unsigned LE
//! base-128 (see the `varint` crate).
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ key_prefix_size (u32)                         │
//! │ key_prefix bytes                              │
//! │ entry_count (u32)                             │
//! │ entry_offsets (u32 × entry_count, absolute)   │
//! ├───────────────────────────────────────────────┤
//! │ per entry:                                    │
//! │   suffix_key_size (varint u32)                │
//! │   suffix_key bytes (prefix ++ suffix = key)   │
//! │   snapshot_id (varint u64)                    │
//! │   value_size (varint u32)                     │
//! │   value bytes                                 │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! `key_prefix` is the longest common byte prefix of every key in the
//! block and is stored once. Entries are strictly ordered by key: unsigned
//! lexicographic on the bytes, then ascending snapshot id.
//!
//! Blocks are **write-once, read-many**: a [`SortedByteMapBuilder`]
//! serializes into one exactly-sized region, and the built map is shared
//! immutably until the owner releases the region.

mod entry;
mod map;
mod region;

pub use entry::{Entry, Key};
pub use map::{AscendingEntries, DescendingEntries, SortedByteMap, SortedByteMapBuilder};
pub use region::{MemoryRegion, PAGE_ALIGNMENT};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("malformed varint in block")]
    MalformedVarint(#[from] varint::MalformedVarint),
    #[error("entry index {index} out of bounds in block of {count} entries")]
    OutOfBounds { index: u32, count: u32 },
    #[error("block memory was already released")]
    UseAfterFree,
    #[error("block memory released twice")]
    DoubleFree,
    #[error("corrupt block: {0}")]
    Corrupt(&'static str),
    #[error("block serialization: {0}")]
    Io(#[from] std::io::Error),
}
