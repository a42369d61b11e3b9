//! Minimal TSI segment writer.  The importer only needs to materialize the
//! inverted-index entries for the series landing in one shard; the segment
//! is a flat log the engine compacts on first open.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::engine::tsm1::varint::append_uvarint;
use crate::error::Result;
use crate::models::Tags;

const SEGMENT_MAGIC: [u8; 4] = *b"TSL1";
const SEGMENT_NAME: &str = "L0-00000001.tsl";

/// TsiIndex accumulates series entries for one shard and writes a single
/// level-0 segment under `<shardDir>/index/` on close.
pub struct TsiIndex {
    dir: PathBuf,
    seen: HashSet<Vec<u8>>,
    entries: Vec<u8>,
}

impl TsiIndex {
    pub async fn open(shard_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = shard_dir.as_ref().join("index");
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            seen: HashSet::new(),
            entries: Vec::new(),
        })
    }

    /// add_series records one series entry: measurement, tag pairs, key.
    pub fn add_series(&mut self, key: &[u8], name: &[u8], tags: &Tags) {
        if !self.seen.insert(key.to_vec()) {
            return;
        }
        append_uvarint(&mut self.entries, name.len() as u64);
        self.entries.extend_from_slice(name);
        append_uvarint(&mut self.entries, tags.len() as u64);
        for tag in tags.iter() {
            append_uvarint(&mut self.entries, tag.key.len() as u64);
            self.entries.extend_from_slice(&tag.key);
            append_uvarint(&mut self.entries, tag.value.len() as u64);
            self.entries.extend_from_slice(&tag.value);
        }
        append_uvarint(&mut self.entries, key.len() as u64);
        self.entries.extend_from_slice(key);
    }

    pub fn series_count(&self) -> usize {
        self.seen.len()
    }

    /// close writes the segment.  An index with no series writes nothing.
    pub async fn close(&mut self) -> Result<()> {
        if self.seen.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::with_capacity(4 + self.entries.len());
        buf.extend_from_slice(&SEGMENT_MAGIC);
        buf.extend_from_slice(&self.entries);
        tokio::fs::write(self.dir.join(SEGMENT_NAME), buf).await?;
        Ok(())
    }
}
