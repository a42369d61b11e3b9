//! Format writers: polymorphic sinks for the export stream.  Writers latch
//! their first error; `err` reports it and every later call is a no-op.

pub mod binary;
pub mod line;
pub mod text;

use crate::error::{Error, Result};
use crate::models::Tags;
use crate::storage::resultset::ResultSet;
use crate::storage::Cursor;

/// Writer is the sink contract.  `new_bucket` opens a bucket,
/// `write_series` announces a triple, `write_cursor` drains its cursor, and
/// `close_bucket` seals the bucket.  Writers must be safe to close after any
/// partial write.
#[async_trait]
pub trait Writer: Send {
    async fn new_bucket(&mut self, start: i64, end: i64) -> Result<()>;

    fn write_series(&mut self, name: &[u8], field: &[u8], tags: &Tags);

    async fn write_cursor(&mut self, cur: Cursor);

    /// err returns the deferred error latched by write_series/write_cursor.
    fn err(&self) -> Option<&Error>;

    async fn close_bucket(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// write_bucket drives one bucket of a result set into a writer.  Triples
/// whose query plan resolves to no cursor are elided entirely.
pub async fn write_bucket(
    w: &mut dyn Writer,
    start: i64,
    end: i64,
    rs: &mut ResultSet,
) -> Result<()> {
    w.new_bucket(start, end).await?;

    while let Some(mut row) = rs.try_next()? {
        let Some(cur) = rs.create_cursor(&mut row).await? else {
            // No data for this series key + field combination.
            continue;
        };

        w.write_series(&row.name, &row.field, &row.tags);
        w.write_cursor(cur).await;

        if let Some(e) = w.err() {
            return Err(e.clone_shallow());
        }
    }

    w.close_bucket().await
}

/// Discard is a writer where all calls succeed and do nothing; it exists to
/// benchmark the read path.
#[derive(Default)]
pub struct Discard;

#[async_trait]
impl Writer for Discard {
    async fn new_bucket(&mut self, _start: i64, _end: i64) -> Result<()> {
        Ok(())
    }

    fn write_series(&mut self, _name: &[u8], _field: &[u8], _tags: &Tags) {}

    async fn write_cursor(&mut self, cur: Cursor) {
        // Drain so the read path is exercised end to end.
        let _ = drain(cur).await;
    }

    fn err(&self) -> Option<&Error> {
        None
    }

    async fn close_bucket(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

async fn drain(cur: Cursor) -> Result<()> {
    match cur {
        Cursor::Integer(mut c) => while c.try_next().await?.is_some() {},
        Cursor::Float(mut c) => while c.try_next().await?.is_some() {},
        Cursor::Unsigned(mut c) => while c.try_next().await?.is_some() {},
        Cursor::Boolean(mut c) => while c.try_next().await?.is_some() {},
        Cursor::String(mut c) => while c.try_next().await?.is_some() {},
    }
    Ok(())
}
