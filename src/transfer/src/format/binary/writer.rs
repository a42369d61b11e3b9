//! Streaming writer for the binary wire format.

use bytes::BufMut;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::engine::tsm1::codec::encode_points;
use crate::engine::tsm1::varint::append_uvarint;
use crate::error::{Error, Result};
use crate::format::binary::{
    check_bucket_width, points_tag, BucketHeader, MAGIC, TAG_BUCKET_FOOTER, TAG_BUCKET_HEADER,
    TAG_FILE_HEADER, TAG_SERIES_HEADER, VERSION,
};
use crate::format;
use crate::models::{self, Tags};
use crate::storage::{BatchCursor, Cursor, ValueType};

struct PendingSeries {
    series_key: Vec<u8>,
    field: Vec<u8>,
}

pub struct Writer<W: AsyncWrite + Unpin + Send> {
    w: BufWriter<W>,
    database: String,
    rp: String,
    shard_duration: i64,

    wrote_header: bool,
    in_bucket: bool,
    pending: Option<PendingSeries>,
    err: Option<Error>,
}

impl<W: AsyncWrite + Unpin + Send> Writer<W> {
    pub fn new(w: W, database: &str, rp: &str, shard_duration: i64) -> Self {
        Self {
            w: BufWriter::new(w),
            database: database.to_string(),
            rp: rp.to_string(),
            shard_duration,
            wrote_header: false,
            in_bucket: false,
            pending: None,
            err: None,
        }
    }

    async fn write_frame(&mut self, tag: u8, payload: &[u8]) -> Result<()> {
        let mut head = Vec::with_capacity(11);
        head.push(tag);
        append_uvarint(&mut head, payload.len() as u64);
        self.w.write_all(&head).await?;
        self.w.write_all(payload).await?;
        Ok(())
    }

    async fn write_file_header(&mut self) -> Result<()> {
        self.w.write_all(&MAGIC).await?;

        let mut payload = Vec::with_capacity(32);
        payload.put_u32(VERSION);
        append_uvarint(&mut payload, self.database.len() as u64);
        payload.extend_from_slice(self.database.as_bytes());
        append_uvarint(&mut payload, self.rp.len() as u64);
        payload.extend_from_slice(self.rp.as_bytes());
        payload.put_u64(self.shard_duration as u64);

        self.write_frame(TAG_FILE_HEADER, &payload).await
    }

    /// write_series_header emits the pending series announcement once the
    /// cursor has fixed the field type.
    async fn write_series_header(&mut self, cur: &Cursor) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            return Err(Error::CorruptFrame(
                "cursor written before its series".into(),
            ));
        };

        let mut payload =
            Vec::with_capacity(2 + pending.series_key.len() + pending.field.len() + 8);
        payload.push(cur.field_type().as_u8());
        append_uvarint(&mut payload, pending.series_key.len() as u64);
        payload.extend_from_slice(&pending.series_key);
        append_uvarint(&mut payload, pending.field.len() as u64);
        payload.extend_from_slice(&pending.field);

        self.write_frame(TAG_SERIES_HEADER, &payload).await
    }

    async fn write_batches<T: ValueType>(
        &mut self,
        mut cur: Box<dyn BatchCursor<T>>,
    ) -> Result<()> {
        while let Some(batch) = cur.try_next().await? {
            let values = T::into_values(batch);
            let mut payload = Vec::with_capacity(values.encode_size());
            append_uvarint(&mut payload, values.len() as u64);
            encode_points(&mut payload, &values);
            self.write_frame(points_tag(values.field_type()), &payload)
                .await?;
        }
        Ok(())
    }

    async fn write_cursor_inner(&mut self, cur: Cursor) -> Result<()> {
        self.write_series_header(&cur).await?;
        match cur {
            Cursor::Integer(c) => self.write_batches(c).await,
            Cursor::Float(c) => self.write_batches(c).await,
            Cursor::Unsigned(c) => self.write_batches(c).await,
            Cursor::Boolean(c) => self.write_batches(c).await,
            Cursor::String(c) => self.write_batches(c).await,
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> format::Writer for Writer<W> {
    async fn new_bucket(&mut self, start: i64, end: i64) -> Result<()> {
        check_bucket_width(&BucketHeader { start, end }, self.shard_duration)?;
        if !self.wrote_header {
            self.write_file_header().await?;
            self.wrote_header = true;
        }

        let mut payload = Vec::with_capacity(16);
        payload.put_u64(start as u64);
        payload.put_u64(end as u64);
        self.write_frame(TAG_BUCKET_HEADER, &payload).await?;
        self.in_bucket = true;
        Ok(())
    }

    fn write_series(&mut self, name: &[u8], field: &[u8], tags: &Tags) {
        if self.err.is_some() {
            return;
        }
        self.pending = Some(PendingSeries {
            series_key: models::make_key(name, tags),
            field: field.to_vec(),
        });
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
        if !self.in_bucket {
            return Ok(());
        }
        self.in_bucket = false;
        self.write_frame(TAG_BUCKET_FOOTER, &[]).await
    }

    async fn close(&mut self) -> Result<()> {
        // An export with no buckets still yields a self-describing stream.
        if !self.wrote_header {
            self.write_file_header().await?;
            self.wrote_header = true;
        }
        self.w.flush().await?;
        Ok(())
    }
}
