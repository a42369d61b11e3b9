//! Multi-shard batch cursor: concatenates the per-shard cursors for one
//! (series, field) pair into a single ordered batch stream.  Shard groups
//! arrive from the meta client non-overlapping and in ascending time order,
//! so draining each iterator in turn preserves global order.

use tokio_util::sync::CancellationToken;

use crate::engine::tsm1::value::TypeValues;
use crate::error::{Error, Result};
use crate::storage::{BatchCursor, Cursor, CursorIterator, CursorRequest, ValueType};

pub struct MultiShardBatchCursor<T: ValueType> {
    cur: Option<Box<dyn BatchCursor<T>>>,
    itrs: std::vec::IntoIter<Box<dyn CursorIterator>>,
    req: CursorRequest,
    ctx: CancellationToken,

    limit: u64,
    count: u64,
}

impl<T: ValueType> MultiShardBatchCursor<T> {
    pub fn new(
        first: Box<dyn BatchCursor<T>>,
        itrs: Vec<Box<dyn CursorIterator>>,
        req: CursorRequest,
        ctx: CancellationToken,
        limit: u64,
    ) -> Self {
        Self {
            cur: Some(first),
            itrs: itrs.into_iter(),
            req,
            ctx,
            limit,
            count: 0,
        }
    }

    async fn next_cursor(&mut self) -> Result<Option<Box<dyn BatchCursor<T>>>> {
        for mut itr in self.itrs.by_ref() {
            if let Some(cur) = itr.cursor(&self.req).await? {
                let cur = T::from_cursor(cur).map_err(|got| Error::TypeMismatch {
                    expected: T::TYPE.name(),
                    got: got.name(),
                })?;
                return Ok(Some(cur));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl<T: ValueType> BatchCursor<T> for MultiShardBatchCursor<T> {
    async fn try_next(&mut self) -> Result<Option<TypeValues<T>>> {
        loop {
            // Cancellation lands between batches, never inside one.
            if self.ctx.is_cancelled() {
                return Ok(None);
            }

            if self.limit > 0 && self.count >= self.limit {
                return Ok(None);
            }

            let Some(cur) = self.cur.as_mut() else {
                return Ok(None);
            };

            match cur.try_next().await? {
                Some(mut batch) if !batch.is_empty() => {
                    if self.limit > 0 {
                        let remaining = (self.limit - self.count) as usize;
                        batch.truncate(remaining);
                    }
                    self.count += batch.len() as u64;
                    return Ok(Some(batch));
                }
                Some(_) => continue,
                None => {
                    self.cur = self.next_cursor().await?;
                }
            }
        }
    }
}

/// build builds the typed multi-shard cursor around the first resolved
/// per-shard cursor, wrapping it back into the tagged variant.
pub fn build(
    first: Cursor,
    itrs: Vec<Box<dyn CursorIterator>>,
    req: CursorRequest,
    ctx: CancellationToken,
    limit: u64,
) -> Cursor {
    fn mono<T: ValueType>(
        first: Box<dyn BatchCursor<T>>,
        itrs: Vec<Box<dyn CursorIterator>>,
        req: CursorRequest,
        ctx: CancellationToken,
        limit: u64,
    ) -> Cursor {
        T::into_cursor(Box::new(MultiShardBatchCursor::new(
            first, itrs, req, ctx, limit,
        )))
    }

    match first {
        Cursor::Integer(c) => mono(c, itrs, req, ctx, limit),
        Cursor::Float(c) => mono(c, itrs, req, ctx, limit),
        Cursor::Unsigned(c) => mono(c, itrs, req, ctx, limit),
        Cursor::Boolean(c) => mono(c, itrs, req, ctx, limit),
        Cursor::String(c) => mono(c, itrs, req, ctx, limit),
    }
}
