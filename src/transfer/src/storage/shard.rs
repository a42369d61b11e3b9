//! ShardReader: the CursorIterator implementation backed by the TSM files of
//! one shard directory.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::tsm1::reader::{KeyIndex, TsmReader};
use crate::engine::tsm1::value::{FieldType, TypeValues};
use crate::engine::tsm1::writer::IndexEntry;
use crate::error::Result;
use crate::storage::{BatchCursor, Cursor, CursorIterator, CursorRequest, ValueType};

/// TsmFileIndex is the key index of one TSM file, detached from its file
/// descriptor so cursors can be constructed without holding files open.
struct TsmFileIndex {
    path: PathBuf,
    keys: Vec<KeyIndex>,
}

/// ShardReader snapshots the indexes of every TSM file in a shard directory.
/// Cloning is cheap; cursors open the data files on demand.
#[derive(Clone)]
pub struct ShardReader {
    files: Arc<Vec<TsmFileIndex>>,
}

impl ShardReader {
    /// open reads the index of every `.tsm` file under dir, in generation
    /// order.  A shard directory with no TSM files is a valid empty shard.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut names = Vec::new();
        let mut rd = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    files: Arc::new(Vec::new()),
                })
            }
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = rd.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(false, |e| e == "tsm") {
                names.push(path);
            }
        }
        names.sort();

        let mut files = Vec::with_capacity(names.len());
        for path in names {
            let reader = TsmReader::open(&path).await?;
            files.push(TsmFileIndex {
                path,
                keys: reader.keys().to_vec(),
            });
        }
        Ok(Self {
            files: Arc::new(files),
        })
    }

    /// keys yields every (composite key, field type) in this shard in
    /// ascending key order, first file to declare a key wins the type.
    pub fn keys(&self) -> Vec<(Vec<u8>, FieldType)> {
        let mut out: Vec<(Vec<u8>, FieldType)> = Vec::new();
        for file in self.files.iter() {
            for ki in &file.keys {
                out.push((ki.key.clone(), ki.typ));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out.dedup_by(|a, b| a.0 == b.0);
        out
    }

    fn plan(&self, req: &CursorRequest) -> Option<(FieldType, VecDeque<FilePlan>)> {
        let mut typ = None;
        let mut plan = VecDeque::new();
        for file in self.files.iter() {
            let Some(ki) = file.keys.iter().find(|ki| ki.key == req.key) else {
                continue;
            };
            let entries: Vec<IndexEntry> = ki
                .entries
                .iter()
                .filter(|e| e.overlaps(req.start, req.end - 1))
                .cloned()
                .collect();
            if entries.is_empty() {
                continue;
            }
            typ.get_or_insert(ki.typ);
            plan.push_back(FilePlan {
                path: file.path.clone(),
                entries: entries.into(),
            });
        }
        typ.map(|t| (t, plan))
    }
}

#[async_trait]
impl CursorIterator for ShardReader {
    async fn cursor(&mut self, req: &CursorRequest) -> Result<Option<Cursor>> {
        let Some((typ, plan)) = self.plan(req) else {
            return Ok(None);
        };

        fn mono<T: ValueType>(plan: VecDeque<FilePlan>, start: i64, end: i64) -> Cursor {
            T::into_cursor(Box::new(ShardBatchCursor::<T> {
                plan,
                reader: None,
                start,
                end,
                pending: Vec::new(),
                done: false,
            }))
        }

        Ok(Some(match typ {
            FieldType::Integer => mono::<i64>(plan, req.start, req.end),
            FieldType::Float => mono::<f64>(plan, req.start, req.end),
            FieldType::Unsigned => mono::<u64>(plan, req.start, req.end),
            FieldType::Boolean => mono::<bool>(plan, req.start, req.end),
            FieldType::String => mono::<Vec<u8>>(plan, req.start, req.end),
        }))
    }
}

struct FilePlan {
    path: PathBuf,
    entries: VecDeque<IndexEntry>,
}

/// ShardBatchCursor streams the planned blocks for one key.  It holds one
/// decoded block back so that a duplicate timestamp straddling a flush
/// boundary resolves to the later write.
struct ShardBatchCursor<T> {
    plan: VecDeque<FilePlan>,
    reader: Option<TsmReader>,
    start: i64,
    end: i64,
    pending: TypeValues<T>,
    done: bool,
}

impl<T: ValueType> ShardBatchCursor<T> {
    async fn next_block(&mut self) -> Result<Option<TypeValues<T>>> {
        loop {
            let Some(file) = self.plan.front_mut() else {
                return Ok(None);
            };
            let Some(entry) = file.entries.pop_front() else {
                self.plan.pop_front();
                self.reader = None;
                continue;
            };

            if self.reader.is_none() {
                self.reader = Some(TsmReader::open(&file.path).await?);
            }
            let values = self.reader.as_mut().unwrap().read_block(&entry).await?;
            let mut values = T::from_values(values).map_err(|got| {
                crate::error::Error::TypeMismatch {
                    expected: T::TYPE.name(),
                    got: got.name(),
                }
            })?;

            values.retain(|v| v.unix_nano >= self.start && v.unix_nano < self.end);
            if !values.is_empty() {
                return Ok(Some(values));
            }
        }
    }
}

#[async_trait]
impl<T: ValueType> BatchCursor<T> for ShardBatchCursor<T> {
    async fn try_next(&mut self) -> Result<Option<TypeValues<T>>> {
        if self.done {
            return Ok(None);
        }

        loop {
            match self.next_block().await? {
                Some(next) => {
                    if self.pending.is_empty() {
                        self.pending = next;
                        continue;
                    }
                    let mut out = std::mem::replace(&mut self.pending, next);
                    // Later blocks win duplicate boundary timestamps.
                    let first = self.pending[0].unix_nano;
                    while out.last().map_or(false, |v| v.unix_nano >= first) {
                        out.pop();
                    }
                    if out.is_empty() {
                        continue;
                    }
                    return Ok(Some(out));
                }
                None => {
                    self.done = true;
                    if self.pending.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(std::mem::take(&mut self.pending)));
                }
            }
        }
    }
}
