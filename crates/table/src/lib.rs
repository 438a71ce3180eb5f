//! # Table — immutable table files
//!
//! On-disk table format for the StrataKV storage engine. A table is the
//! immutable product of flushing or compacting sorted entries: data blocks
//! of versioned key/value pairs, a balanced index tree over them, and an
//! opaque membership filter, each in its own append-only file.
//!
//! ## File layout (v1)
//!
//! ```text
//! table file                     index file
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │ len (u32) | data block 0 │   │ len (u32) | index block  │
//! │ len (u32) | data block 1 │   │ len (u32) | index block  │
//! │ ...                      │   │ ...                      │
//! └──────────────────────────┘   │ len (u32) | root block   │
//!                                │ root offset (u64)        │
//! filter file                    └──────────────────────────┘
//! ┌──────────────────────────┐
//! │ opaque filter blob       │
//! └──────────────────────────┘
//! ```
//!
//! Every block is a serialized `block::SortedByteMap`; index block entries
//! carry a `[child offset (u64 LE) | leaf flag (u8)]` payload. An index
//! record's offset points at the **length prefix** of the child block — in
//! the table file when the record is a leaf, in the index file otherwise —
//! so a reader recovers any block with a single seek. The last 8 bytes of
//! the index file are the offset of the root index block.
//!
//! All fixed-width integers are little-endian.
//!
//! Writers are single-owner and streaming: [`TableWriter`] packs entries
//! into data blocks and feeds one [`IndexRecord`] per block into an
//! [`IndexWriter`], which cascades records up the index levels as blocks
//! fill. A half-written table (writer dropped before `finish`) is invalid
//! and must be discarded by the caller.

mod filter;
mod format;
mod index;
mod reader;
mod sink;
mod writer;

pub use filter::{FilterBuilder, FilterWriter, NoopFilter};
pub use format::{footer_pos, read_root_offset, FOOTER_BYTES};
pub use index::{IndexBlock, IndexBlockBuilder, IndexRecord};
pub use reader::{TableEntries, TableReader};
pub use sink::{AppendSink, FileSink, MemSink};
pub use writer::{
    IndexWriter, TableWriter, MAX_DATA_BLOCK_SIZE_BYTES, MAX_INDEX_BLOCK_SIZE_BYTES,
};

use std::io;

use block::BlockError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error("corrupt table: {0}")]
    Corrupt(&'static str),
    #[error("writer already finished")]
    WriterClosed,
    #[error("append sink already closed")]
    SinkClosed,
}
