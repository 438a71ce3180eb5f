//! Index file footer helpers.
//!
//! The footer is always the **last 8 bytes** of an index file: the offset
//! of the root index block's length prefix, little-endian.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Read, Seek, SeekFrom};

use crate::TableError;

/// Size of the index file footer in bytes.
pub const FOOTER_BYTES: u64 = 8;

/// Byte offset where the footer starts: `filesize - 8`.
///
/// Uses [`u64::saturating_sub`] so files smaller than 8 bytes return 0
/// rather than underflowing.
pub fn footer_pos(filesize: u64) -> u64 {
    filesize.saturating_sub(FOOTER_BYTES)
}

/// Reads the root index block offset from the footer of `r`.
///
/// The reader is seeked to the end to determine file size, then to the
/// footer position. Files too small to hold a footer are corrupt.
pub fn read_root_offset<R: Read + Seek>(r: &mut R) -> Result<u64, TableError> {
    let filesize = r.seek(SeekFrom::End(0))?;
    if filesize < FOOTER_BYTES {
        return Err(TableError::Corrupt("index file too small for footer"));
    }
    r.seek(SeekFrom::Start(footer_pos(filesize)))?;
    Ok(r.read_u64::<LittleEndian>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn footer_is_last_eight_bytes() {
        let mut buf = vec![0xab; 13];
        buf[5..13].copy_from_slice(&4242u64.to_le_bytes());
        assert_eq!(read_root_offset(&mut Cursor::new(buf)).unwrap(), 4242);
    }

    #[test]
    fn short_file_is_corrupt() {
        let mut cur = Cursor::new(vec![0u8; 7]);
        assert!(matches!(
            read_root_offset(&mut cur),
            Err(TableError::Corrupt(_))
        ));
    }

    #[test]
    fn footer_pos_saturates() {
        assert_eq!(footer_pos(3), 0);
        assert_eq!(footer_pos(20), 12);
    }
}
