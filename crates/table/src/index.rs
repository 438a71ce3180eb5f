//! Index records and index blocks.
//!
//! An index block is structurally a `SortedByteMap` whose entries map the
//! start key of a child block to its file offset. The entry value is the
//! fixed 9-byte payload `[offset (u64 LE) | leaf flag (u8)]`.

use byteorder::{ByteOrder, LittleEndian};

use block::{Key, MemoryRegion, SortedByteMap, SortedByteMapBuilder};

use crate::TableError;

/// Serialized size of an index entry's value payload.
const RECORD_PAYLOAD_BYTES: usize = 9;

/// Names a child block: the lowest key it holds, the offset of its length
/// prefix, and whether the child is a data block (`is_leaf`) or another
/// index block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub start_key: Key,
    pub offset: u64,
    pub is_leaf: bool,
}

impl IndexRecord {
    pub fn new(start_key: Key, offset: u64, is_leaf: bool) -> Self {
        IndexRecord {
            start_key,
            offset,
            is_leaf,
        }
    }

    fn payload(&self) -> [u8; RECORD_PAYLOAD_BYTES] {
        let mut buf = [0u8; RECORD_PAYLOAD_BYTES];
        LittleEndian::write_u64(&mut buf[..8], self.offset);
        buf[8] = self.is_leaf as u8;
        buf
    }
}

/// A sorted block of index records.
#[derive(Debug)]
pub struct IndexBlock {
    map: SortedByteMap,
}

impl IndexBlock {
    pub fn from_region(region: MemoryRegion) -> Result<Self, TableError> {
        Ok(IndexBlock {
            map: SortedByteMap::from_region(region)?,
        })
    }

    pub fn record_count(&self) -> u32 {
        self.map.entry_count()
    }

    pub fn record(&self, index: u32) -> Result<IndexRecord, TableError> {
        let entry = self.map.get(index)?;
        if entry.value.len() != RECORD_PAYLOAD_BYTES {
            return Err(TableError::Corrupt("index record payload size"));
        }
        Ok(IndexRecord {
            start_key: entry.key,
            offset: LittleEndian::read_u64(&entry.value[..8]),
            is_leaf: entry.value[8] != 0,
        })
    }

    /// The first (lowest) record; promoted upward when the block is
    /// flushed.
    pub fn start_record(&self) -> Result<IndexRecord, TableError> {
        self.record(0)
    }

    /// The child covering `key`: the record with the largest start key
    /// ≤ `key`, or `None` when `key` sorts below the whole block.
    pub fn floor_record(&self, key: &Key) -> Result<Option<IndexRecord>, TableError> {
        let index = self.map.floor_index(key)?;
        if index < 0 {
            return Ok(None);
        }
        Ok(Some(self.record(index as u32)?))
    }

    /// Serialized block bytes.
    pub fn bytes(&self) -> Result<&[u8], TableError> {
        Ok(self.map.bytes()?)
    }

    pub fn size_bytes(&self) -> usize {
        self.map.size_bytes()
    }

    pub fn release(&mut self) -> Result<(), TableError> {
        Ok(self.map.release()?)
    }
}

/// Accumulates index records for one block.
///
/// `size_bytes` is the same running upper bound the map builder keeps, so
/// the index writer can decide when a level is full without serializing.
#[derive(Debug, Default)]
pub struct IndexBlockBuilder {
    records: Vec<IndexRecord>,
    size_bound: usize,
}

impl IndexBlockBuilder {
    pub fn new() -> Self {
        IndexBlockBuilder {
            records: Vec::new(),
            // Prefix size + entry count header.
            size_bound: 8,
        }
    }

    /// Appends a record. Start keys must arrive in strictly ascending
    /// order, which the index writer's cascade guarantees.
    pub fn add_record(&mut self, record: IndexRecord) {
        self.size_bound += 4
            + varint::size32(record.start_key.size() as u32)
            + record.start_key.size()
            + varint::size64(record.start_key.snapshot_id())
            + varint::size32(RECORD_PAYLOAD_BYTES as u32)
            + RECORD_PAYLOAD_BYTES;
        self.records.push(record);
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The first record added, if any.
    pub fn start_record(&self) -> Option<&IndexRecord> {
        self.records.first()
    }

    /// Running upper bound of the serialized block size.
    pub fn size_bytes(&self) -> usize {
        self.size_bound
    }

    /// Freezes into an index block owning one serialized region.
    pub fn build(self) -> Result<IndexBlock, TableError> {
        let mut builder = SortedByteMapBuilder::new();
        for record in &self.records {
            builder.add(record.start_key.clone(), record.payload().to_vec());
        }
        Ok(IndexBlock {
            map: builder.build()?,
        })
    }
}
