//! Append-only byte sinks.
//!
//! Table and index files are written strictly by appending; the sink is
//! the only file I/O primitive the writers use. Each append returns the
//! file size before the write, which is exactly the offset the written
//! bytes landed at.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::TableError;

/// An append-only byte sink with little-endian integer helpers.
pub trait AppendSink {
    /// Appends `bytes`, returning the sink length before the write.
    fn append(&mut self, bytes: &[u8]) -> Result<u64, TableError>;

    /// Flushes and closes the sink; subsequent appends fail with
    /// [`SinkClosed`](TableError::SinkClosed).
    fn close(&mut self) -> Result<(), TableError>;

    fn append_u32(&mut self, v: u32) -> Result<u64, TableError> {
        self.append(&v.to_le_bytes())
    }

    fn append_u64(&mut self, v: u64) -> Result<u64, TableError> {
        self.append(&v.to_le_bytes())
    }
}

/// File-backed sink. `close` flushes the buffer and fsyncs so a finished
/// table is durable before the writer reports success.
pub struct FileSink {
    writer: BufWriter<File>,
    len: u64,
    closed: bool,
}

impl FileSink {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(FileSink {
            writer: BufWriter::new(file),
            len: 0,
            closed: false,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AppendSink for FileSink {
    fn append(&mut self, bytes: &[u8]) -> Result<u64, TableError> {
        if self.closed {
            return Err(TableError::SinkClosed);
        }
        let offset = self.len;
        self.writer.write_all(bytes)?;
        self.len += bytes.len() as u64;
        Ok(offset)
    }

    fn close(&mut self) -> Result<(), TableError> {
        if self.closed {
            return Err(TableError::SinkClosed);
        }
        self.closed = true;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// Memory-backed sink for tests and embedding.
#[derive(Debug, Default)]
pub struct MemSink {
    buf: Vec<u8>,
    closed: bool,
}

impl MemSink {
    pub fn new() -> Self {
        MemSink::default()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl AppendSink for MemSink {
    fn append(&mut self, bytes: &[u8]) -> Result<u64, TableError> {
        if self.closed {
            return Err(TableError::SinkClosed);
        }
        let offset = self.buf.len() as u64;
        self.buf.extend_from_slice(bytes);
        Ok(offset)
    }

    fn close(&mut self) -> Result<(), TableError> {
        if self.closed {
            return Err(TableError::SinkClosed);
        }
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_return_pre_write_offset() {
        let mut sink = MemSink::new();
        assert_eq!(sink.append(b"abc").unwrap(), 0);
        assert_eq!(sink.append_u32(7).unwrap(), 3);
        assert_eq!(sink.append_u64(9).unwrap(), 7);
        assert_eq!(sink.bytes().len(), 15);
    }

    #[test]
    fn integers_are_little_endian() {
        let mut sink = MemSink::new();
        sink.append_u32(0x0102_0304).unwrap();
        assert_eq!(sink.bytes(), &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn append_after_close_fails() {
        let mut sink = MemSink::new();
        sink.append(b"x").unwrap();
        sink.close().unwrap();
        assert!(matches!(sink.append(b"y"), Err(TableError::SinkClosed)));
        assert!(matches!(sink.close(), Err(TableError::SinkClosed)));
    }

    #[test]
    fn file_sink_writes_through() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sink.bin");
        let mut sink = FileSink::create(&path).unwrap();
        assert_eq!(sink.append(b"hello").unwrap(), 0);
        assert_eq!(sink.append(b" world").unwrap(), 5);
        assert_eq!(sink.len(), 11);
        sink.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }
}
