//! ResultSet: iterates the (name, tags, field) triples of one bucket in
//! canonical series order and builds the multi-shard cursor for each triple.

use std::collections::BTreeMap;

use common_base::iterator::TryIterator;

use crate::engine::tsm1::value::FieldType;
use crate::error::{Error, Result};
use crate::models::{self, Tags};
use crate::storage::shard::ShardReader;
use crate::storage::{cursor, Cursor, CursorIterator, CursorRequest, ReadRequest};

/// SeriesRow is one (name, tags, field) triple plus the per-shard cursor
/// iterators that may carry points for it.
pub struct SeriesRow {
    pub name: Vec<u8>,
    pub tags: Tags,
    pub field: Vec<u8>,
    pub field_type: FieldType,
    /// Composite key the cursors are resolved against.
    pub key: Vec<u8>,
    query: Vec<Box<dyn CursorIterator>>,
}

/// SeriesCursor yields series rows in canonical order: measurement
/// ascending, then tag set, then field.
pub type SeriesCursor = dyn TryIterator<Item = SeriesRow, Error = Error> + Send;

/// ShardSeriesCursor merges the key indexes of a bucket's shards.  The first
/// shard to declare a key fixes its type; a disagreeing shard surfaces as
/// TypeMismatch when its cursor is pulled.
pub struct ShardSeriesCursor {
    rows: std::vec::IntoIter<SeriesRow>,
}

impl ShardSeriesCursor {
    pub fn new(shards: &[ShardReader]) -> Result<Self> {
        // (series key, field) -> (type, shards that hold the key)
        let mut merged: BTreeMap<(Vec<u8>, Vec<u8>), (FieldType, Vec<u8>, Vec<usize>)> =
            BTreeMap::new();
        for (i, shard) in shards.iter().enumerate() {
            for (key, typ) in shard.keys() {
                let (series_key, field) = models::series_and_field_from_composite_key(&key)?;
                let entry = merged
                    .entry((series_key.to_vec(), field.to_vec()))
                    .or_insert_with(|| (typ, key.clone(), Vec::new()));
                entry.2.push(i);
            }
        }

        let mut rows = Vec::with_capacity(merged.len());
        for ((series_key, field), (typ, key, shard_idx)) in merged {
            let (name, tags) = models::parse_key(&series_key)?;
            let query = shard_idx
                .into_iter()
                .map(|i| Box::new(shards[i].clone()) as Box<dyn CursorIterator>)
                .collect();
            rows.push(SeriesRow {
                name,
                tags,
                field,
                field_type: typ,
                key,
                query,
            });
        }
        Ok(Self {
            rows: rows.into_iter(),
        })
    }
}

impl TryIterator for ShardSeriesCursor {
    type Item = SeriesRow;
    type Error = Error;

    fn try_next(&mut self) -> Result<Option<SeriesRow>> {
        Ok(self.rows.next())
    }
}

pub struct ResultSet {
    req: ReadRequest,
    cur: Box<SeriesCursor>,
}

impl ResultSet {
    pub fn new(req: ReadRequest, cur: Box<SeriesCursor>) -> Self {
        Self { req, cur }
    }

    /// try_next yields the next series row, or None at bucket exhaustion or
    /// cancellation.
    pub fn try_next(&mut self) -> Result<Option<SeriesRow>> {
        if self.req.ctx.is_cancelled() {
            return Ok(None);
        }
        self.cur.try_next()
    }

    /// create_cursor resolves the row's query plan into a typed multi-shard
    /// cursor.  None means no shard produced data for the triple; the caller
    /// skips the series.
    pub async fn create_cursor(&self, row: &mut SeriesRow) -> Result<Option<Cursor>> {
        let req = CursorRequest {
            key: row.key.clone(),
            start: self.req.start,
            end: self.req.end,
        };

        let mut itrs = std::mem::take(&mut row.query).into_iter();
        let mut first = None;
        for mut itr in itrs.by_ref() {
            if let Some(cur) = itr.cursor(&req).await? {
                first = Some(cur);
                break;
            }
        }
        let Some(first) = first else {
            return Ok(None);
        };

        Ok(Some(cursor::build(
            first,
            itrs.collect(),
            req,
            self.req.ctx.clone(),
            self.req.limit,
        )))
    }
}
