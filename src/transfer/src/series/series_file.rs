//! SeriesFile: the per-database monotonic log of series keys.  Each entry is
//! a uvarint length prefix followed by the key bytes; a key is appended at
//! most once.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::engine::tsm1::varint::{append_uvarint, VarInt};
use crate::error::{Error, Result};

/// SERIES_FILE_DIRECTORY is the name of the directory holding the series
/// file under a database directory.
pub const SERIES_FILE_DIRECTORY: &str = "_series";

const LOG_NAME: &str = "series.log";

pub struct SeriesFile {
    dir: PathBuf,
    fd: File,
    existing: HashSet<Vec<u8>>,
}

impl SeriesFile {
    /// open loads the existing key set and positions the log for appends.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(LOG_NAME);

        let existing = match tokio::fs::read(&path).await {
            Ok(raw) => parse_log(&raw, &path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e.into()),
        };

        let fd = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self { dir, fd, existing })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn series_count(&self) -> usize {
        self.existing.len()
    }

    /// create_series_list_if_not_exists appends every key not yet present.
    pub async fn create_series_list_if_not_exists(&mut self, keys: &[Vec<u8>]) -> Result<()> {
        let mut buf = Vec::new();
        for key in keys {
            if self.existing.contains(key) {
                continue;
            }
            append_uvarint(&mut buf, key.len() as u64);
            buf.extend_from_slice(key);
            self.existing.insert(key.clone());
        }
        if !buf.is_empty() {
            self.fd.write_all(&buf).await?;
        }
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        self.fd.flush().await?;
        self.fd.sync_data().await?;
        Ok(())
    }
}

fn parse_log(raw: &[u8], path: &Path) -> Result<HashSet<Vec<u8>>> {
    let mut existing = HashSet::new();
    let mut i = 0usize;
    while i < raw.len() {
        let (len, n) = u64::decode_var(&raw[i..]).ok_or_else(|| {
            Error::CorruptFrame(format!("{}: bad series key length", path.display()))
        })?;
        i += n;
        let len = len as usize;
        if raw.len() - i < len {
            return Err(Error::CorruptFrame(format!(
                "{}: truncated series key",
                path.display()
            )));
        }
        existing.insert(raw[i..i + len].to_vec());
        i += len;
    }
    Ok(existing)
}
