//! Shard writer: buffers typed points per composite key and materializes
//! TSM files into the shard directory.  Files are written under temporary
//! names and renamed into place by close, so a shard only ever becomes
//! visible fully formed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::engine::tsm1::value::{Value, Values};
use crate::engine::tsm1::writer::TsmWriter;
use crate::error::{Error, Result};

/// Buffered point bytes that trigger a flush to a new TSM file.
const FLUSH_SIZE: usize = 16 * 1024 * 1024;

/// Maximum points encoded into one block.
const MAX_POINTS_PER_BLOCK: usize = 1000;

const TMP_EXT: &str = "tmp";

pub struct ShardWriter {
    id: u64,
    dir: PathBuf,

    values: BTreeMap<Vec<u8>, Values>,
    size: usize,
    gen: u64,
    tmp_files: Vec<PathBuf>,

    err: Option<Error>,
    closed: bool,
}

impl ShardWriter {
    pub fn new(id: u64, dir: impl Into<PathBuf>) -> Self {
        Self {
            id,
            dir: dir.into(),
            values: BTreeMap::new(),
            size: 0,
            gen: 0,
            tmp_files: Vec::new(),
            err: None,
            closed: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn latch(&mut self, e: Error) -> Error {
        let out = e.clone_shallow();
        if self.err.is_none() {
            self.err = Some(e);
        }
        out
    }

    pub fn err(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    /// write buffers a typed batch for key.  The first error latches; every
    /// later call returns it.
    pub async fn write(&mut self, key: &[u8], values: Values) -> Result<()> {
        if let Some(e) = &self.err {
            return Err(e.clone_shallow());
        }
        if values.is_empty() {
            return Ok(());
        }

        let size = values.encode_size();
        let entry = self
            .values
            .entry(key.to_vec())
            .or_insert_with(|| Values::empty(values.field_type()));
        if let Err(e) = entry.extend(values) {
            let e = match e {
                Error::UnorderedInput { ts, last, .. } => Error::UnorderedInput {
                    key: String::from_utf8_lossy(key).into_owned(),
                    ts,
                    last,
                },
                other => other,
            };
            return Err(self.latch(e));
        }
        self.size += size;

        if self.size >= FLUSH_SIZE {
            if let Err(e) = self.flush().await {
                return Err(self.latch(e));
            }
        }
        Ok(())
    }

    /// flush encodes the buffered values into one temporary TSM file.
    async fn flush(&mut self) -> Result<()> {
        if self.values.is_empty() {
            return Ok(());
        }

        self.gen += 1;
        let name = format!("{:09}-{:09}.tsm.{}", self.gen, 1, TMP_EXT);
        let path = self.dir.join(name);

        let mut w = TsmWriter::create(&path).await?;
        for (key, values) in &self.values {
            for chunk in chunks(values, MAX_POINTS_PER_BLOCK) {
                w.write(key, &chunk).await?;
            }
        }
        w.write_index().await?;
        w.close().await?;

        debug!(shard = self.id, path = %path.display(), "flushed tsm file");
        self.tmp_files.push(path);
        self.values.clear();
        self.size = 0;
        Ok(())
    }

    async fn seal(&mut self) -> Result<()> {
        self.flush().await?;
        for tmp in &self.tmp_files {
            let dst = tmp.with_extension("");
            tokio::fs::rename(tmp, &dst).await?;
        }
        self.tmp_files.clear();
        Ok(())
    }

    /// close flushes and publishes the shard's TSM files.  Closing twice
    /// returns the status of the first close.  On failure the temporaries
    /// are unlinked and the error latches.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return match &self.err {
                Some(e) => Err(e.clone_shallow()),
                None => Ok(()),
            };
        }
        self.closed = true;

        if let Some(e) = &self.err {
            let e = e.clone_shallow();
            self.remove_temporaries().await;
            return Err(e);
        }

        match self.seal().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.remove_temporaries().await;
                Err(self.latch(e))
            }
        }
    }

    /// abort discards all buffered and flushed state without publishing.
    pub async fn abort(&mut self) {
        self.closed = true;
        self.values.clear();
        self.remove_temporaries().await;
    }

    async fn remove_temporaries(&mut self) {
        for tmp in self.tmp_files.drain(..) {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
    }
}

/// chunks splits a batch into block-sized pieces.
fn chunks(values: &Values, n: usize) -> Vec<Values> {
    fn split<T: Clone>(v: &[Value<T>], n: usize) -> Vec<Vec<Value<T>>> {
        v.chunks(n).map(|c| c.to_vec()).collect()
    }

    match values {
        Values::Integer(v) => split(v, n).into_iter().map(Values::Integer).collect(),
        Values::Float(v) => split(v, n).into_iter().map(Values::Float).collect(),
        Values::Unsigned(v) => split(v, n).into_iter().map(Values::Unsigned).collect(),
        Values::Boolean(v) => split(v, n).into_iter().map(Values::Boolean).collect(),
        Values::String(v) => split(v, n).into_iter().map(Values::String).collect(),
    }
}

pub(crate) fn shard_path(data_dir: &Path, db: &str, rp: &str, shard_id: u64) -> PathBuf {
    data_dir.join(db).join(rp).join(shard_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::ShardWriter;
    use crate::engine::tsm1::value::{Value, Values};
    use crate::error::Error;
    use crate::storage::shard::ShardReader;

    #[tokio::test]
    async fn test_close_publishes_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = ShardWriter::new(1, dir.path());

        w.write(
            b"cpu\xffvalue",
            Values::Integer(vec![Value::new(1, 1), Value::new(2, 2)]),
        )
        .await
        .unwrap();

        // Nothing visible until close.
        let shard = ShardReader::open(dir.path()).await.unwrap();
        assert!(shard.keys().is_empty());

        w.close().await.unwrap();
        let shard = ShardReader::open(dir.path()).await.unwrap();
        assert_eq!(shard.keys().len(), 1);

        // Idempotent close.
        w.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unordered_input_latches() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = ShardWriter::new(1, dir.path());

        w.write(b"cpu\xffvalue", Values::Integer(vec![Value::new(5, 5)]))
            .await
            .unwrap();
        let err = w
            .write(b"cpu\xffvalue", Values::Integer(vec![Value::new(3, 3)]))
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::UnorderedInput { ts: 3, last: 5, .. }),
            "unexpected error: {}",
            err
        );

        // The latch is sticky for writes and for close.
        let err = w
            .write(b"cpu\xffvalue", Values::Integer(vec![Value::new(9, 9)]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnorderedInput { .. }));
        assert!(w.close().await.is_err());
        assert!(w.close().await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_timestamp_last_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = ShardWriter::new(1, dir.path());

        w.write(b"cpu\xffvalue", Values::Integer(vec![Value::new(1, 10)]))
            .await
            .unwrap();
        w.write(b"cpu\xffvalue", Values::Integer(vec![Value::new(1, 11)]))
            .await
            .unwrap();
        w.close().await.unwrap();

        let mut shard = ShardReader::open(dir.path()).await.unwrap();
        let req = crate::storage::CursorRequest {
            key: b"cpu\xffvalue".to_vec(),
            start: 0,
            end: 100,
        };
        use crate::storage::{BatchCursor as _, Cursor, CursorIterator as _};
        let Some(Cursor::Integer(mut cur)) = shard.cursor(&req).await.unwrap() else {
            panic!("expected integer cursor");
        };
        let batch = cur.try_next().await.unwrap().unwrap();
        assert_eq!(batch, vec![Value::new(1, 11)]);
    }

    #[tokio::test]
    async fn test_abort_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = ShardWriter::new(1, dir.path());
        w.write(b"cpu\xffvalue", Values::Integer(vec![Value::new(1, 1)]))
            .await
            .unwrap();
        w.abort().await;

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}
