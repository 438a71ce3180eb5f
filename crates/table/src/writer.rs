//! Table and index writers.
//!
//! [`IndexWriter`] builds a balanced index tree over an append-only file.
//! It keeps one open [`IndexBlockBuilder`] per tree level, `levels[0]`
//! holding leaf-pointing records. Each incoming record cascades upward:
//! a full level is flushed to the file, the flushed block's meta record
//! (start key + offset, non-leaf) is promoted to the next level, and the
//! incoming record seeds the replacement builder. At most one level grows
//! per write. `finish` flushes the remaining levels bottom-up, carrying a
//! single pending meta record, and the final meta's offset becomes the
//! 8-byte footer.
//!
//! [`TableWriter`] is the streaming front: it packs sorted entries into
//! data blocks, appends each block length-prefixed to the table file,
//! feeds one leaf record per block into the index, and hands every key to
//! the filter.

use std::mem;

use block::{Key, SortedByteMapBuilder};

use crate::filter::{FilterBuilder, FilterWriter};
use crate::index::{IndexBlock, IndexBlockBuilder, IndexRecord};
use crate::sink::{AppendSink, FileSink};
use crate::TableError;

/// Default cap on a serialized index block.
pub const MAX_INDEX_BLOCK_SIZE_BYTES: usize = 64 * 1024;

/// Default cap on a serialized data block.
pub const MAX_DATA_BLOCK_SIZE_BYTES: usize = 64 * 1024;

/// Streaming builder of the hierarchical block index.
///
/// Owns its sink for the lifetime of the writer; nothing else may append
/// to the index file while it is open. Not safe for concurrent use — the
/// caller serializes writes.
pub struct IndexWriter<S: AppendSink> {
    sink: S,
    max_block_size: usize,
    levels: Vec<IndexBlockBuilder>,
    finished: bool,
}

impl<S: AppendSink> IndexWriter<S> {
    pub fn new(sink: S) -> Self {
        Self::with_max_block_size(sink, MAX_INDEX_BLOCK_SIZE_BYTES)
    }

    pub fn with_max_block_size(sink: S, max_block_size: usize) -> Self {
        IndexWriter {
            sink,
            max_block_size,
            levels: vec![IndexBlockBuilder::new()],
            finished: false,
        }
    }

    /// Number of currently open index levels.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Accepts the next leaf record and cascades promotions up the open
    /// levels. Records must arrive in ascending start-key order.
    pub fn write(&mut self, record: IndexRecord) -> Result<(), TableError> {
        if self.finished {
            return Err(TableError::WriterClosed);
        }

        let mut pending = Some(record);
        for i in 0..self.levels.len() {
            let Some(record) = pending.take() else {
                return Ok(());
            };
            if self.levels[i].size_bytes() >= self.max_block_size {
                let full = mem::replace(&mut self.levels[i], IndexBlockBuilder::new());
                let meta = self.write_index_block(full.build()?)?;
                self.levels[i].add_record(record);
                pending = Some(meta);
            } else {
                self.levels[i].add_record(record);
            }
        }

        // Every existing level was full: grow the tree by one level.
        if let Some(record) = pending {
            let mut top = IndexBlockBuilder::new();
            top.add_record(record);
            self.levels.push(top);
        }
        Ok(())
    }

    /// Flushes the remaining levels bottom-up, writes the root offset
    /// footer, closes the sink, and returns the root offset.
    ///
    /// Must be called exactly once; the writer is unusable afterwards.
    /// Fails if no record was ever written — an empty index block has no
    /// start record to promote.
    pub fn finish(&mut self) -> Result<u64, TableError> {
        if self.finished {
            return Err(TableError::WriterClosed);
        }
        self.finished = true;

        let mut pending: Option<IndexRecord> = None;
        for i in 0..self.levels.len() {
            if let Some(record) = pending.take() {
                self.levels[i].add_record(record);
            }
            let builder = mem::replace(&mut self.levels[i], IndexBlockBuilder::new());
            pending = Some(self.write_index_block(builder.build()?)?);
        }

        let root = pending.expect("index writer always has an open level");
        self.sink.append_u64(root.offset)?;
        self.sink.close()?;
        Ok(root.offset)
    }

    /// Consumes the writer, yielding the sink. Meaningful after `finish`.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Appends `[len | block bytes]`, releases the block's region, and
    /// returns the meta record promoting the block to the level above.
    fn write_index_block(&mut self, mut block: IndexBlock) -> Result<IndexRecord, TableError> {
        let start = block.start_record()?;
        let offset = {
            let bytes = block.bytes()?;
            let offset = self.sink.append_u32(bytes.len() as u32)?;
            self.sink.append(bytes)?;
            offset
        };
        block.release()?;
        Ok(IndexRecord::new(start.start_key, offset, false))
    }
}

/// Streaming builder of a whole table: data file, index file, and filter
/// file together.
///
/// Entries must be added in strictly ascending key order. The writer packs
/// them into data blocks, flushing a block once its serialized size bound
/// reaches the configured max, and indexes each block by its first key.
pub struct TableWriter<S: AppendSink, F: FilterBuilder> {
    data_sink: S,
    index: IndexWriter<S>,
    filter: FilterWriter<F, S>,
    block: SortedByteMapBuilder,
    max_data_block_size: usize,
    finished: bool,
}

impl<F: FilterBuilder> TableWriter<FileSink, F> {
    /// Opens the three sinks of a fresh table on disk.
    pub fn create<P: AsRef<std::path::Path>>(
        table_path: P,
        index_path: P,
        filter_path: P,
        filter: F,
    ) -> Result<Self, TableError> {
        Ok(TableWriter::new(
            FileSink::create(table_path)?,
            FileSink::create(index_path)?,
            FilterWriter::new(filter, FileSink::create(filter_path)?),
        ))
    }
}

impl<S: AppendSink, F: FilterBuilder> TableWriter<S, F> {
    pub fn new(data_sink: S, index_sink: S, filter: FilterWriter<F, S>) -> Self {
        Self::with_block_sizes(
            data_sink,
            index_sink,
            filter,
            MAX_DATA_BLOCK_SIZE_BYTES,
            MAX_INDEX_BLOCK_SIZE_BYTES,
        )
    }

    pub fn with_block_sizes(
        data_sink: S,
        index_sink: S,
        filter: FilterWriter<F, S>,
        max_data_block_size: usize,
        max_index_block_size: usize,
    ) -> Self {
        TableWriter {
            data_sink,
            index: IndexWriter::with_max_block_size(index_sink, max_index_block_size),
            filter,
            block: SortedByteMapBuilder::new(),
            max_data_block_size,
            finished: false,
        }
    }

    /// Appends the next entry. Keys must arrive in strictly ascending
    /// order across the whole table.
    pub fn add(&mut self, key: Key, value: Vec<u8>) -> Result<(), TableError> {
        if self.finished {
            return Err(TableError::WriterClosed);
        }
        self.filter.put(&key);
        if !self.block.is_empty() && self.block.size_bytes() >= self.max_data_block_size {
            self.flush_block()?;
        }
        self.block.add(key, value);
        Ok(())
    }

    /// Flushes the tail block, finishes the index (root offset footer),
    /// closes the data sink, and writes the filter blob. Returns the root
    /// index offset.
    pub fn finish(&mut self) -> Result<u64, TableError> {
        if self.finished {
            return Err(TableError::WriterClosed);
        }
        self.finished = true;
        self.flush_block()?;
        let root_offset = self.index.finish()?;
        self.data_sink.close()?;
        self.filter.finish()?;
        Ok(root_offset)
    }

    fn flush_block(&mut self) -> Result<(), TableError> {
        let builder = mem::replace(&mut self.block, SortedByteMapBuilder::new());
        let Some(start_key) = builder.first_key().cloned() else {
            return Ok(());
        };

        let mut map = builder.build()?;
        let offset = {
            let bytes = map.bytes()?;
            let offset = self.data_sink.append_u32(bytes.len() as u32)?;
            self.data_sink.append(bytes)?;
            offset
        };
        map.release()?;
        self.index.write(IndexRecord::new(start_key, offset, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::read_root_offset;
    use crate::sink::MemSink;
    use block::{MemoryRegion, PAGE_ALIGNMENT};
    use byteorder::{ByteOrder, LittleEndian};
    use std::io::Cursor;

    fn leaf(key: &[u8], offset: u64) -> IndexRecord {
        IndexRecord::new(Key::new(key.to_vec(), 0), offset, true)
    }

    fn read_block_at(file: &[u8], offset: u64) -> IndexBlock {
        let offset = offset as usize;
        let len = LittleEndian::read_u32(&file[offset..offset + 4]) as usize;
        let payload = &file[offset + 4..offset + 4 + len];
        let mut region = MemoryRegion::allocate(len, PAGE_ALIGNMENT);
        region.bytes_mut().unwrap().copy_from_slice(payload);
        IndexBlock::from_region(region).unwrap()
    }

    // A record with a one-byte key costs 17 bytes in the size bound, plus
    // the 8-byte header: one record = 25, two = 42. A 40-byte budget
    // therefore holds exactly two records per block.
    const TWO_RECORD_BUDGET: usize = 40;

    // -------------------- Single level --------------------

    #[test]
    fn two_leaves_one_root() {
        let mut writer = IndexWriter::with_max_block_size(MemSink::new(), 64);
        writer.write(leaf(b"a", 0)).unwrap();
        writer.write(leaf(b"m", 40)).unwrap();
        let root_offset = writer.finish().unwrap();
        assert_eq!(root_offset, 0);

        let file = writer.into_sink().into_bytes();
        assert_eq!(
            read_root_offset(&mut Cursor::new(&file)).unwrap(),
            root_offset
        );

        let root = read_block_at(&file, root_offset);
        assert_eq!(root.record_count(), 2);
        assert_eq!(root.record(0).unwrap(), leaf(b"a", 0));
        assert_eq!(root.record(1).unwrap(), leaf(b"m", 40));
    }

    // -------------------- Level growth --------------------

    #[test]
    fn five_leaves_grow_two_index_levels() {
        let mut writer = IndexWriter::with_max_block_size(MemSink::new(), TWO_RECORD_BUDGET);
        for (i, k) in [b"a", b"b", b"c", b"d", b"e"].iter().enumerate() {
            let before = writer.level_count();
            writer.write(leaf(*k, i as u64 * 10)).unwrap();
            assert!(writer.level_count() - before <= 1);
        }
        assert_eq!(writer.level_count(), 2);
        let root_offset = writer.finish().unwrap();

        let file = writer.into_sink().into_bytes();
        let root = read_block_at(&file, root_offset);
        assert_eq!(root.record_count(), 3);

        // The root's children are level-0 index blocks holding the leaf
        // records in order: (a, b), (c, d), (e).
        let mut leaves = Vec::new();
        for i in 0..root.record_count() {
            let meta = root.record(i).unwrap();
            assert!(!meta.is_leaf);
            let child = read_block_at(&file, meta.offset);
            assert_eq!(
                meta.start_key,
                child.start_record().unwrap().start_key,
                "promoted start key must match the child's first record"
            );
            for j in 0..child.record_count() {
                let record = child.record(j).unwrap();
                assert!(record.is_leaf);
                leaves.push(record);
            }
        }
        let expected: Vec<IndexRecord> = [b"a", b"b", b"c", b"d", b"e"]
            .iter()
            .enumerate()
            .map(|(i, k)| leaf(*k, i as u64 * 10))
            .collect();
        assert_eq!(leaves, expected);
    }

    #[test]
    fn seven_leaves_grow_three_index_levels() {
        let mut writer = IndexWriter::with_max_block_size(MemSink::new(), TWO_RECORD_BUDGET);
        for (i, k) in [b"a", b"b", b"c", b"d", b"e", b"f", b"g"].iter().enumerate() {
            writer.write(leaf(*k, i as u64 * 10)).unwrap();
        }
        assert_eq!(writer.level_count(), 3);
        let root_offset = writer.finish().unwrap();

        // Walk the whole tree; every leaf record must be reachable and in
        // order, through exactly three levels of index blocks.
        let file = writer.into_sink().into_bytes();
        let root = read_block_at(&file, root_offset);
        let mut leaves = Vec::new();
        let mut depth = 0;
        let mut frontier = vec![root];
        while !frontier.is_empty() {
            depth += 1;
            let mut next = Vec::new();
            for node in &frontier {
                for i in 0..node.record_count() {
                    let record = node.record(i).unwrap();
                    if record.is_leaf {
                        leaves.push(record);
                    } else {
                        next.push(read_block_at(&file, record.offset));
                    }
                }
            }
            frontier = next;
        }
        assert_eq!(depth, 3);
        assert_eq!(leaves.len(), 7);
        for (i, record) in leaves.iter().enumerate() {
            assert_eq!(record.offset, i as u64 * 10);
        }
    }

    #[test]
    fn index_blocks_stay_near_budget() {
        let max = 256;
        let mut writer = IndexWriter::with_max_block_size(MemSink::new(), max);
        for i in 0..500u64 {
            writer.write(leaf(format!("key{i:04}").as_bytes(), i * 64)).unwrap();
        }
        writer.finish().unwrap();

        // Walk every length-prefixed block in the file; a block may
        // overshoot the budget by at most the records added after the
        // size bound crossed it (one per write, one more during finish).
        let file = writer.into_sink().into_bytes();
        let record_cost = 4 + 1 + 7 + 1 + 1 + 9;
        let mut pos = 0usize;
        while pos + 8 < file.len() {
            let len = LittleEndian::read_u32(&file[pos..pos + 4]) as usize;
            assert!(len <= max + 2 * record_cost, "oversized block: {len}");
            pos += 4 + len;
        }
        assert_eq!(pos + 8, file.len());
    }

    // -------------------- Failure modes --------------------

    #[test]
    fn write_after_finish_fails() {
        let mut writer = IndexWriter::new(MemSink::new());
        writer.write(leaf(b"a", 0)).unwrap();
        writer.finish().unwrap();
        assert!(matches!(
            writer.write(leaf(b"b", 10)),
            Err(TableError::WriterClosed)
        ));
        assert!(matches!(writer.finish(), Err(TableError::WriterClosed)));
    }

    #[test]
    fn finish_without_records_fails() {
        let mut writer = IndexWriter::new(MemSink::new());
        assert!(writer.finish().is_err());
    }

    // -------------------- Table writer --------------------

    #[test]
    fn table_writer_packs_blocks_and_feeds_index() {
        let filter = FilterWriter::new(crate::filter::NoopFilter, MemSink::new());
        let mut writer = TableWriter::with_block_sizes(
            MemSink::new(),
            MemSink::new(),
            filter,
            128,
            MAX_INDEX_BLOCK_SIZE_BYTES,
        );
        for i in 0..40u64 {
            writer
                .add(
                    Key::new(format!("key{i:03}").into_bytes(), i),
                    format!("value{i}").into_bytes(),
                )
                .unwrap();
        }
        writer.finish().unwrap();
        assert!(matches!(
            writer.add(Key::new(b"z".to_vec(), 99), Vec::new()),
            Err(TableError::WriterClosed)
        ));
        assert!(matches!(writer.finish(), Err(TableError::WriterClosed)));
    }
}
