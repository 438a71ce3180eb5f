//! Membership filter writing.
//!
//! The filter itself is an external collaborator: something that consumes
//! every key during ingest and serializes to an opaque blob. The table
//! layer only defines the handshake and appends the blob to the filter
//! file; filter construction lives with the embedding engine.

use block::Key;

use crate::sink::AppendSink;
use crate::TableError;

/// External filter collaborator.
pub trait FilterBuilder {
    /// Observes one key during ingest.
    fn put(&mut self, key: &Key);

    /// Serializes the filter into an opaque blob. Called once, after the
    /// last key.
    fn finish(&mut self) -> Vec<u8>;
}

/// Collaborator for tables written without a filter; produces an empty
/// blob.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFilter;

impl FilterBuilder for NoopFilter {
    fn put(&mut self, _key: &Key) {}

    fn finish(&mut self) -> Vec<u8> {
        Vec::new()
    }
}

/// Feeds keys to a filter during ingest and writes the finished blob to
/// the filter file.
pub struct FilterWriter<F: FilterBuilder, S: AppendSink> {
    builder: F,
    sink: S,
}

impl<F: FilterBuilder, S: AppendSink> FilterWriter<F, S> {
    pub fn new(builder: F, sink: S) -> Self {
        FilterWriter { builder, sink }
    }

    pub fn put(&mut self, key: &Key) {
        self.builder.put(key);
    }

    /// Appends the serialized filter and closes the filter file.
    pub fn finish(&mut self) -> Result<(), TableError> {
        let blob = self.builder.finish();
        self.sink.append(&blob)?;
        self.sink.close()
    }

    /// Consumes the writer, yielding the sink. Meaningful after `finish`.
    pub fn into_sink(self) -> S {
        self.sink
    }
}
