//! Series writer: batches the series keys of one bucket into the shared
//! SeriesFile and, when requested, a per-shard TSI index.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::{self, Tags};
use crate::series::index::TsiIndex;
use crate::series::SeriesFile;

/// Series keys buffered before a flush to the index.
pub(crate) const SERIES_BATCH_SIZE: usize = 1000;

pub struct SeriesWriter {
    keys: Vec<Vec<u8>>,
    names: Vec<Vec<u8>>,
    tags: Vec<Tags>,
    sfile: Arc<Mutex<SeriesFile>>,
    idx: Option<TsiIndex>,
    closed: bool,
}

impl SeriesWriter {
    /// in_mem writes series to the shared SeriesFile only; the engine builds
    /// its index lazily on first query.
    pub fn in_mem(sfile: Arc<Mutex<SeriesFile>>) -> Self {
        Self {
            keys: Vec::with_capacity(SERIES_BATCH_SIZE),
            names: Vec::with_capacity(SERIES_BATCH_SIZE),
            tags: Vec::with_capacity(SERIES_BATCH_SIZE),
            sfile,
            idx: None,
            closed: false,
        }
    }

    /// tsi writes series to the SeriesFile and to a TSI index rooted under
    /// the shard directory.
    pub async fn tsi(sfile: Arc<Mutex<SeriesFile>>, shard_dir: impl AsRef<Path>) -> Result<Self> {
        let idx = TsiIndex::open(shard_dir).await?;
        let mut w = Self::in_mem(sfile);
        w.idx = Some(idx);
        Ok(w)
    }

    /// add_series splits the composite key and batches the series for the
    /// next flush.
    pub async fn add_series(&mut self, composite_key: &[u8]) -> Result<()> {
        let (series_key, _field) = models::series_and_field_from_composite_key(composite_key)?;
        let (name, tags) = models::parse_key(series_key)?;

        self.keys.push(series_key.to_vec());
        self.names.push(name);
        self.tags.push(tags);

        if self.keys.len() == SERIES_BATCH_SIZE {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.keys.is_empty() {
            return Ok(());
        }

        self.sfile
            .lock()
            .await
            .create_series_list_if_not_exists(&self.keys)
            .await?;

        if let Some(idx) = &mut self.idx {
            for ((key, name), tags) in self.keys.iter().zip(&self.names).zip(&self.tags) {
                idx.add_series(key, name, tags);
            }
        }

        self.keys.clear();
        self.names.clear();
        self.tags.clear();
        Ok(())
    }

    /// close flushes the partial batch and seals the index.  The SeriesFile
    /// itself is owned by the importer and closed there.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.flush().await?;
        if let Some(idx) = &mut self.idx {
            idx.close().await?;
        }
        Ok(())
    }
}
