//! Line-protocol writer: one textual line per point, tag ordering as in the
//! series key, values escaped with the same rules ingestion uses.

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::error::{Error, Result};
use crate::format;
use crate::models::{escape, Tags};
use crate::storage::{BatchCursor, Cursor};

pub struct Writer<W: AsyncWrite + Unpin + Send> {
    w: BufWriter<W>,
    /// `series-key field=` prefix reused for every point of the series.
    prefix: Vec<u8>,
    buf: Vec<u8>,
    err: Option<Error>,
}

impl<W: AsyncWrite + Unpin + Send> Writer<W> {
    pub fn new(w: W) -> Self {
        Self {
            w: BufWriter::new(w),
            prefix: Vec::with_capacity(1024),
            buf: Vec::with_capacity(1024),
            err: None,
        }
    }

    async fn write_points<T, F>(&mut self, mut cur: Box<dyn BatchCursor<T>>, render: F) -> Result<()>
    where
        F: Fn(&mut Vec<u8>, &T),
    {
        while let Some(batch) = cur.try_next().await? {
            for v in &batch {
                self.buf.clear();
                self.buf.extend_from_slice(&self.prefix);
                render(&mut self.buf, &v.value);
                self.buf.push(b' ');
                self.buf.extend_from_slice(v.unix_nano.to_string().as_bytes());
                self.buf.push(b'\n');
                self.w.write_all(&self.buf).await?;
            }
        }
        Ok(())
    }

    async fn write_cursor_inner(&mut self, cur: Cursor) -> Result<()> {
        match cur {
            Cursor::Integer(c) => {
                self.write_points(c, |buf, v: &i64| {
                    buf.extend_from_slice(v.to_string().as_bytes());
                    buf.push(b'i');
                })
                .await
            }
            Cursor::Float(c) => {
                self.write_points(c, |buf, v: &f64| {
                    buf.extend_from_slice(v.to_string().as_bytes());
                })
                .await
            }
            Cursor::Unsigned(c) => {
                self.write_points(c, |buf, v: &u64| {
                    buf.extend_from_slice(v.to_string().as_bytes());
                    buf.push(b'u');
                })
                .await
            }
            Cursor::Boolean(c) => {
                self.write_points(c, |buf, v: &bool| {
                    buf.extend_from_slice(if *v { b"true" } else { b"false" });
                })
                .await
            }
            Cursor::String(c) => {
                self.write_points(c, |buf, v: &Vec<u8>| {
                    escape::append_string_field(buf, v);
                })
                .await
            }
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> format::Writer for Writer<W> {
    async fn new_bucket(&mut self, _start: i64, _end: i64) -> Result<()> {
        Ok(())
    }

    fn write_series(&mut self, name: &[u8], field: &[u8], tags: &Tags) {
        if self.err.is_some() {
            return;
        }
        self.prefix.clear();
        let key = crate::models::make_key(name, tags);
        self.prefix.extend_from_slice(&key);
        self.prefix.push(b' ');
        escape::append_field_key(&mut self.prefix, field);
        self.prefix.push(b'=');
    }

    async fn write_cursor(&mut self, cur: Cursor) {
        if self.err.is_some() {
            return;
        }
        if let Err(e) = self.write_cursor_inner(cur).await {
            self.err = Some(e);
        }
    }

    fn err(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    async fn close_bucket(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.w.flush().await?;
        Ok(())
    }
}
