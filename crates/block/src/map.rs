use std::cmp::Ordering;
use std::io::Write;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::entry::{Entry, Key};
use crate::region::{MemoryRegion, PAGE_ALIGNMENT};
use crate::BlockError;

/// Fixed part of the block header: prefix size (u32) + entry count (u32).
const HEADER_BYTES: usize = 8;

/// An immutable sorted block of versioned key/value entries, backed by one
/// exactly-sized [`MemoryRegion`].
///
/// Construction reads the key prefix and entry count once; everything else
/// is a pure read against the packed bytes. [`floor_index`] and
/// [`ceiling_index`] binary-search the block without materializing
/// entries, which keeps the lookup path allocation-free.
///
/// A built map may be shared across threads for reads. The owner releases
/// the backing region exactly once (typically right after the block is
/// persisted); reads after release fail with
/// [`UseAfterFree`](BlockError::UseAfterFree).
///
/// [`floor_index`]: SortedByteMap::floor_index
/// [`ceiling_index`]: SortedByteMap::ceiling_index
#[derive(Debug)]
pub struct SortedByteMap {
    region: MemoryRegion,
    key_prefix: Vec<u8>,
    entry_count: u32,
}

impl SortedByteMap {
    /// Overlays a serialized block on `region`, validating the framing of
    /// the header and offset array.
    pub fn from_region(region: MemoryRegion) -> Result<Self, BlockError> {
        let (key_prefix, entry_count) = {
            let data = region.bytes()?;
            if data.len() < HEADER_BYTES {
                return Err(BlockError::Corrupt("block shorter than header"));
            }
            let prefix_size = LittleEndian::read_u32(&data[0..4]) as usize;
            if data.len() - HEADER_BYTES < prefix_size {
                return Err(BlockError::Corrupt("key prefix out of bounds"));
            }
            let key_prefix = data[4..4 + prefix_size].to_vec();
            let entry_count = LittleEndian::read_u32(&data[4 + prefix_size..8 + prefix_size]);
            let offsets_end = HEADER_BYTES + prefix_size + entry_count as usize * 4;
            if offsets_end > data.len() {
                return Err(BlockError::Corrupt("entry offsets out of bounds"));
            }
            (key_prefix, entry_count)
        };
        Ok(SortedByteMap {
            region,
            key_prefix,
            entry_count,
        })
    }

    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    /// Serialized size of the block in bytes.
    pub fn size_bytes(&self) -> usize {
        self.region.len()
    }

    /// The serialized block bytes, exactly as written to disk.
    pub fn bytes(&self) -> Result<&[u8], BlockError> {
        self.region.bytes()
    }

    /// Releases the backing region. The map is unreadable afterwards.
    pub fn release(&mut self) -> Result<(), BlockError> {
        self.region.release()
    }

    pub fn is_free(&self) -> bool {
        self.region.is_free()
    }

    /// Reconstructs entry `index`, returning owned key and value bytes.
    pub fn get(&self, index: u32) -> Result<Entry, BlockError> {
        if index >= self.entry_count {
            return Err(BlockError::OutOfBounds {
                index,
                count: self.entry_count,
            });
        }
        let data = self.region.bytes()?;
        self.read_entry(data, index)
    }

    /// Index of the largest entry with key ≤ `key`, or `-1` if every entry
    /// is greater.
    pub fn floor_index(&self, key: &Key) -> Result<i64, BlockError> {
        let data = self.region.bytes()?;
        let mut low: i64 = 0;
        let mut high: i64 = self.entry_count as i64 - 1;
        while low <= high {
            let mid = (low + high) >> 1;
            match self.compare_stored(data, mid as u32, key)? {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid - 1,
                Ordering::Equal => return Ok(mid),
            }
        }
        Ok(low - 1)
    }

    /// Index of the smallest entry with key ≥ `key`, or `entry_count` if
    /// every entry is smaller.
    pub fn ceiling_index(&self, key: &Key) -> Result<i64, BlockError> {
        let data = self.region.bytes()?;
        let mut low: i64 = 0;
        let mut high: i64 = self.entry_count as i64 - 1;
        while low <= high {
            let mid = (low + high) >> 1;
            match self.compare_stored(data, mid as u32, key)? {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid - 1,
                Ordering::Equal => return Ok(mid),
            }
        }
        Ok(low)
    }

    /// Iterates every entry in ascending key order.
    pub fn ascending_entries(&self) -> Result<AscendingEntries<'_>, BlockError> {
        Ok(AscendingEntries {
            map: self,
            data: self.region.bytes()?,
            index: 0,
        })
    }

    /// Ascending iteration starting at the first entry whose byte key is
    /// ≥ `from`. The probe is pinned to snapshot 0 so the lowest version
    /// of the first matching byte key is included.
    pub fn ascending_entries_from(&self, from: &[u8]) -> Result<AscendingEntries<'_>, BlockError> {
        let probe = Key::new(from.to_vec(), 0);
        let start = self.ceiling_index(&probe)?;
        Ok(AscendingEntries {
            map: self,
            data: self.region.bytes()?,
            index: start as u32,
        })
    }

    /// Iterates every entry in descending key order.
    pub fn descending_entries(&self) -> Result<DescendingEntries<'_>, BlockError> {
        Ok(DescendingEntries {
            map: self,
            data: self.region.bytes()?,
            index: self.entry_count as i64 - 1,
        })
    }

    /// Descending iteration starting at the last entry whose byte key is
    /// ≤ `from`. The probe is pinned to the maximum snapshot so the
    /// highest version of the first matching byte key is included.
    pub fn descending_entries_from(
        &self,
        from: &[u8],
    ) -> Result<DescendingEntries<'_>, BlockError> {
        let probe = Key::new(from.to_vec(), u64::MAX);
        let start = self.floor_index(&probe)?;
        Ok(DescendingEntries {
            map: self,
            data: self.region.bytes()?,
            index: start,
        })
    }

    fn entry_offset(&self, data: &[u8], index: u32) -> Result<usize, BlockError> {
        let pos = HEADER_BYTES + self.key_prefix.len() + index as usize * 4;
        let off = LittleEndian::read_u32(&data[pos..pos + 4]) as usize;
        if off >= data.len() {
            return Err(BlockError::Corrupt("entry offset out of bounds"));
        }
        Ok(off)
    }

    fn read_entry(&self, data: &[u8], index: u32) -> Result<Entry, BlockError> {
        let mut pos = self.entry_offset(data, index)?;

        let (suffix_size, n) = varint::read32(&data[pos..])?;
        pos += n;
        let suffix_size = suffix_size as usize;
        let suffix = data
            .get(pos..pos + suffix_size)
            .ok_or(BlockError::Corrupt("key suffix out of bounds"))?;
        let mut key_bytes = Vec::with_capacity(self.key_prefix.len() + suffix_size);
        key_bytes.extend_from_slice(&self.key_prefix);
        key_bytes.extend_from_slice(suffix);
        pos += suffix_size;

        let (snapshot_id, n) = varint::read64(&data[pos..])?;
        pos += n;

        let (value_size, n) = varint::read32(&data[pos..])?;
        pos += n;
        let value = data
            .get(pos..pos + value_size as usize)
            .ok_or(BlockError::Corrupt("value out of bounds"))?
            .to_vec();

        Ok(Entry::new(Key::new(key_bytes, snapshot_id), value))
    }

    /// Compares stored entry `index` against `key` without materializing
    /// the entry: cached prefix bytes first, then the stored suffix, then
    /// total key length, then the snapshot id.
    fn compare_stored(&self, data: &[u8], index: u32, key: &Key) -> Result<Ordering, BlockError> {
        let query = key.bytes();
        let prefix = &self.key_prefix;

        let shared = prefix.len().min(query.len());
        match prefix[..shared].cmp(&query[..shared]) {
            Ordering::Equal => {}
            ord => return Ok(ord),
        }

        let mut pos = self.entry_offset(data, index)?;
        let (suffix_size, n) = varint::read32(&data[pos..])?;
        pos += n;
        let suffix_size = suffix_size as usize;
        let suffix = data
            .get(pos..pos + suffix_size)
            .ok_or(BlockError::Corrupt("key suffix out of bounds"))?;

        let query_rest = &query[shared..];
        let common = suffix_size.min(query_rest.len());
        match suffix[..common].cmp(&query_rest[..common]) {
            Ordering::Equal => {}
            ord => return Ok(ord),
        }

        // All compared bytes matched: the longer key sorts after. Prefix
        // bytes the query was too short to reach count toward the stored
        // length.
        let stored_len = prefix.len() + suffix_size;
        if stored_len != query.len() {
            return Ok(stored_len.cmp(&query.len()));
        }

        pos += suffix_size;
        let (snapshot_id, _) = varint::read64(&data[pos..])?;
        Ok(snapshot_id.cmp(&key.snapshot_id()))
    }
}

/// Ascending cursor over a block's entries. Holds a borrow of the map, so
/// the backing region cannot be released while iteration is in progress.
pub struct AscendingEntries<'a> {
    map: &'a SortedByteMap,
    data: &'a [u8],
    index: u32,
}

impl Iterator for AscendingEntries<'_> {
    type Item = Result<Entry, BlockError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.map.entry_count {
            return None;
        }
        let entry = self.map.read_entry(self.data, self.index);
        self.index += 1;
        Some(entry)
    }
}

/// Descending counterpart of [`AscendingEntries`].
pub struct DescendingEntries<'a> {
    map: &'a SortedByteMap,
    data: &'a [u8],
    index: i64,
}

impl Iterator for DescendingEntries<'_> {
    type Item = Result<Entry, BlockError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index < 0 {
            return None;
        }
        let entry = self.map.read_entry(self.data, self.index as u32);
        self.index -= 1;
        Some(entry)
    }
}

/// Accumulates strictly ascending entries and serializes them into one
/// exactly-sized, page-aligned region.
///
/// The longest common key prefix is maintained incrementally: each `add`
/// shrinks it to the first byte where the new key diverges from the first
/// key. `size_bytes` tracks a running upper bound of the serialized size
/// (computed as if the prefix were empty) so callers can make cheap flush
/// decisions while streaming; `build` computes the exact size.
#[derive(Debug, Default)]
pub struct SortedByteMapBuilder {
    entries: Vec<Entry>,
    prefix_len: usize,
    size_bound: usize,
}

impl SortedByteMapBuilder {
    pub fn new() -> Self {
        SortedByteMapBuilder {
            entries: Vec::new(),
            prefix_len: 0,
            size_bound: HEADER_BYTES,
        }
    }

    /// Appends an entry. Keys must arrive in strictly ascending order;
    /// violations are a programmer error caught in checked builds.
    pub fn add(&mut self, key: Key, value: Vec<u8>) {
        debug_assert!(
            self.entries.last().map_or(true, |prev| prev.key < key),
            "keys must be added in strictly ascending order"
        );

        match self.entries.first() {
            None => self.prefix_len = key.size(),
            Some(first) => {
                let limit = self.prefix_len.min(key.size());
                self.prefix_len = first.key.bytes()[..limit]
                    .iter()
                    .zip(key.bytes()[..limit].iter())
                    .take_while(|(a, b)| a == b)
                    .count();
            }
        }

        self.size_bound += 4
            + varint::size32(key.size() as u32)
            + key.size()
            + varint::size64(key.snapshot_id())
            + varint::size32(value.len() as u32)
            + value.len();
        self.entries.push(Entry::new(key, value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The lowest key added so far.
    pub fn first_key(&self) -> Option<&Key> {
        self.entries.first().map(|e| &e.key)
    }

    /// Running upper bound of the serialized block size.
    pub fn size_bytes(&self) -> usize {
        self.size_bound
    }

    /// Serializes into a fresh region and returns the built map.
    pub fn build(self) -> Result<SortedByteMap, BlockError> {
        let prefix_len = self.prefix_len;

        // Size walk: exact serialized size plus the absolute offset of
        // each entry. Must match the bytes written below.
        let mut offsets = Vec::with_capacity(self.entries.len());
        let mut size = HEADER_BYTES + prefix_len + 4 * self.entries.len();
        for entry in &self.entries {
            offsets.push(size as u32);
            let suffix_size = entry.key.size() - prefix_len;
            size += varint::size32(suffix_size as u32)
                + suffix_size
                + varint::size64(entry.key.snapshot_id())
                + varint::size32(entry.value.len() as u32)
                + entry.value.len();
        }

        let mut region = MemoryRegion::allocate(size, PAGE_ALIGNMENT);
        {
            let mut cursor = region.bytes_mut()?;
            cursor.write_u32::<LittleEndian>(prefix_len as u32)?;
            if let Some(first) = self.entries.first() {
                cursor.write_all(&first.key.bytes()[..prefix_len])?;
            }
            cursor.write_u32::<LittleEndian>(self.entries.len() as u32)?;
            for off in &offsets {
                cursor.write_u32::<LittleEndian>(*off)?;
            }
            for entry in &self.entries {
                let suffix = &entry.key.bytes()[prefix_len..];
                varint::write32(&mut cursor, suffix.len() as u32)?;
                cursor.write_all(suffix)?;
                varint::write64(&mut cursor, entry.key.snapshot_id())?;
                varint::write32(&mut cursor, entry.value.len() as u32)?;
                cursor.write_all(&entry.value)?;
            }
            debug_assert!(cursor.is_empty(), "size walk disagrees with bytes written");
        }
        SortedByteMap::from_region(region)
    }
}
