//! Table read path.
//!
//! A [`TableReader`] opens a written table by its data and index files.
//! Point lookups read the 8-byte footer once at open, then descend the
//! index tree by binary search on start keys down to a leaf data block.
//! Range scans walk the table file's length-prefixed data blocks
//! sequentially — entries are in ascending key order across the whole
//! file by construction.
//!
//! Files are opened per operation, which keeps ownership simple and the
//! reader trivially shareable; block bytes are copied into fresh
//! page-aligned regions and released as soon as the block is done.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};

use block::{Entry, Key, MemoryRegion, SortedByteMap, PAGE_ALIGNMENT};

use crate::format::read_root_offset;
use crate::index::IndexBlock;
use crate::TableError;

pub struct TableReader {
    table_path: PathBuf,
    index_path: PathBuf,
    root_offset: u64,
}

impl TableReader {
    /// Opens a table, reading the root offset from the index file footer.
    pub fn open<P: AsRef<Path>>(table_path: P, index_path: P) -> Result<Self, TableError> {
        let index_path = index_path.as_ref().to_path_buf();
        let mut index_file = File::open(&index_path)?;
        let root_offset = read_root_offset(&mut index_file)?;
        Ok(TableReader {
            table_path: table_path.as_ref().to_path_buf(),
            index_path,
            root_offset,
        })
    }

    pub fn root_offset(&self) -> u64 {
        self.root_offset
    }

    /// Point lookup: the newest entry whose byte key equals `key` and
    /// whose snapshot id is ≤ `snapshot_id`, or `None`.
    pub fn get(&self, key: &[u8], snapshot_id: u64) -> Result<Option<Entry>, TableError> {
        let probe = Key::new(key.to_vec(), snapshot_id);

        let mut offset = self.root_offset;
        loop {
            let mut index_block = self.read_index_block(offset)?;
            let record = index_block.floor_record(&probe)?;
            index_block.release()?;
            let Some(record) = record else {
                // The probe sorts below the lowest key in the table.
                return Ok(None);
            };
            if record.is_leaf {
                return self.search_leaf(record.offset, key, &probe);
            }
            offset = record.offset;
        }
    }

    fn search_leaf(
        &self,
        offset: u64,
        key: &[u8],
        probe: &Key,
    ) -> Result<Option<Entry>, TableError> {
        let mut leaf = self.read_data_block(offset)?;
        let index = leaf.floor_index(probe)?;
        let result = if index < 0 {
            None
        } else {
            let entry = leaf.get(index as u32)?;
            (entry.key.bytes() == key).then_some(entry)
        };
        leaf.release()?;
        Ok(result)
    }

    /// Streams every entry in ascending key order.
    pub fn ascending_entries(&self) -> Result<TableEntries, TableError> {
        Ok(TableEntries {
            file: File::open(&self.table_path)?,
            current: None,
        })
    }

    fn read_index_block(&self, offset: u64) -> Result<IndexBlock, TableError> {
        IndexBlock::from_region(read_block_region(&self.index_path, offset)?)
    }

    fn read_data_block(&self, offset: u64) -> Result<SortedByteMap, TableError> {
        Ok(SortedByteMap::from_region(read_block_region(
            &self.table_path,
            offset,
        )?)?)
    }
}

/// Reads the length-prefixed block at `offset` into a fresh region.
fn read_block_region(path: &Path, offset: u64) -> Result<MemoryRegion, TableError> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let len = file.read_u32::<LittleEndian>()? as usize;
    if len == 0 {
        return Err(TableError::Corrupt("zero-length block"));
    }
    let mut region = MemoryRegion::allocate(len, PAGE_ALIGNMENT);
    file.read_exact(region.bytes_mut()?)?;
    Ok(region)
}

/// Lazy cursor over every entry in the table file, block by block.
pub struct TableEntries {
    file: File,
    current: Option<(SortedByteMap, u32)>,
}

impl TableEntries {
    /// Loads the next length-prefixed block, or `None` at end of file.
    fn next_block(&mut self) -> Result<Option<SortedByteMap>, TableError> {
        let len = match self.file.read_u32::<LittleEndian>() {
            Ok(v) => v as usize,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if len == 0 {
            return Err(TableError::Corrupt("zero-length block"));
        }
        let mut region = MemoryRegion::allocate(len, PAGE_ALIGNMENT);
        self.file.read_exact(region.bytes_mut()?)?;
        Ok(Some(SortedByteMap::from_region(region)?))
    }
}

impl Iterator for TableEntries {
    type Item = Result<Entry, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((map, index)) = &mut self.current {
                if *index < map.entry_count() {
                    let entry = map.get(*index).map_err(TableError::from);
                    *index += 1;
                    return Some(entry);
                }
            }
            self.current = None;
            match self.next_block() {
                Ok(Some(map)) => self.current = Some((map, 0)),
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
