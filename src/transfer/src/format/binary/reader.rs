//! Streaming reader for the binary wire format.  Frames are pulled one at a
//! time; nothing larger than the currently-decoded point batch is held in
//! memory.

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use crate::engine::tsm1::codec::{decode_points, SliceDecoder};
use crate::engine::tsm1::value::{FieldType, Values};
use crate::error::{map_eof, Error, Result};
use crate::format::binary::{
    check_bucket_width, points_type, unknown_tag, BucketHeader, FileHeader, SeriesHeader, MAGIC,
    TAG_BUCKET_FOOTER, TAG_BUCKET_HEADER, TAG_FILE_HEADER, TAG_SERIES_HEADER, VERSION,
};

pub struct Reader<R: AsyncRead + Unpin + Send> {
    r: BufReader<R>,
    header: Option<FileHeader>,
    /// One-frame tag lookahead used at series/points boundaries.
    peeked: Option<u8>,
}

impl<R: AsyncRead + Unpin + Send> Reader<R> {
    pub fn new(r: R) -> Self {
        Self {
            r: BufReader::new(r),
            header: None,
            peeked: None,
        }
    }

    /// read_header consumes the magic and the file header frame.  It must be
    /// the first call on a reader.
    pub async fn read_header(&mut self) -> Result<FileHeader> {
        let mut magic = [0u8; 4];
        self.r.read_exact(&mut magic).await.map_err(map_eof)?;
        if magic != MAGIC {
            return Err(Error::CorruptFrame("bad magic".into()));
        }

        let (tag, payload) = self.read_frame().await?;
        if tag != TAG_FILE_HEADER {
            return Err(unknown_tag(tag));
        }

        let mut dec = SliceDecoder::new(&payload);
        let version = dec.u32_be()?;
        let database = String::from_utf8(dec.varint_blob()?.to_vec())
            .map_err(|_| Error::CorruptFrame("database name is not utf-8".into()))?;
        let retention_policy = String::from_utf8(dec.varint_blob()?.to_vec())
            .map_err(|_| Error::CorruptFrame("retention policy name is not utf-8".into()))?;
        let shard_duration = dec.i64_be()?;
        dec.finish()?;

        if version != VERSION {
            return Err(Error::CorruptFrame(format!(
                "unsupported stream version {}",
                version
            )));
        }
        if shard_duration <= 0 {
            return Err(Error::CorruptFrame(format!(
                "non-positive shard duration {}",
                shard_duration
            )));
        }

        let header = FileHeader {
            version,
            database,
            retention_policy,
            shard_duration,
        };
        self.header = Some(header.clone());
        Ok(header)
    }

    /// next_bucket returns the next bucket header, or None at clean EOF.
    pub async fn next_bucket(&mut self) -> Result<Option<BucketHeader>> {
        let header = self
            .header
            .clone()
            .ok_or_else(|| Error::CorruptFrame("bucket before file header".into()))?;

        let tag = match self.next_tag().await {
            Ok(tag) => tag,
            Err(Error::UnexpectedEof) => return Ok(None),
            Err(e) => return Err(e),
        };
        if tag != TAG_BUCKET_HEADER {
            return Err(unknown_tag(tag));
        }

        let payload = self.read_payload().await?;
        let mut dec = SliceDecoder::new(&payload);
        let bh = BucketHeader {
            start: dec.i64_be()?,
            end: dec.i64_be()?,
        };
        dec.finish()?;
        check_bucket_width(&bh, header.shard_duration)?;
        Ok(Some(bh))
    }

    /// next_series returns the next series header within the current bucket,
    /// or None once the bucket footer is reached.  Point batches left
    /// undrained by the caller are skipped.
    pub async fn next_series(&mut self) -> Result<Option<SeriesHeader>> {
        loop {
            let tag = self.next_tag().await?;
            match tag {
                TAG_SERIES_HEADER => {
                    let payload = self.read_payload().await?;
                    let mut dec = SliceDecoder::new(&payload);
                    let field_type = FieldType::from_u8(dec.u8()?)?;
                    let series_key = dec.varint_blob()?.to_vec();
                    let field = dec.varint_blob()?.to_vec();
                    dec.finish()?;
                    return Ok(Some(SeriesHeader {
                        field_type,
                        series_key,
                        field,
                    }));
                }
                TAG_BUCKET_FOOTER => {
                    let payload = self.read_payload().await?;
                    if !payload.is_empty() {
                        return Err(Error::CorruptFrame("bucket footer carries data".into()));
                    }
                    return Ok(None);
                }
                tag if points_type(tag).is_some() => {
                    // Undrained points from the previous series.
                    let _ = self.read_payload().await?;
                }
                tag => return Err(unknown_tag(tag)),
            }
        }
    }

    /// points returns the batch iterator for the series just announced.
    pub fn points(&mut self, field_type: FieldType) -> PointsReader<'_, R> {
        PointsReader {
            r: self,
            field_type,
            done: false,
        }
    }

    async fn next_tag(&mut self) -> Result<u8> {
        if let Some(tag) = self.peeked.take() {
            return Ok(tag);
        }
        self.r.read_u8().await.map_err(map_eof)
    }

    fn unread_tag(&mut self, tag: u8) {
        self.peeked = Some(tag);
    }

    async fn read_payload(&mut self) -> Result<Vec<u8>> {
        let len = self.read_uvarint().await?;
        let mut payload = vec![0u8; len as usize];
        self.r.read_exact(&mut payload).await.map_err(map_eof)?;
        Ok(payload)
    }

    async fn read_frame(&mut self) -> Result<(u8, Vec<u8>)> {
        let tag = self.next_tag().await?;
        let payload = self.read_payload().await?;
        Ok((tag, payload))
    }

    async fn read_uvarint(&mut self) -> Result<u64> {
        let mut v = 0u64;
        let mut shift = 0u32;
        for i in 0.. {
            if i >= crate::engine::tsm1::varint::MAX_VARINT_LEN64 {
                return Err(Error::CorruptFrame("bad varint".into()));
            }
            let b = self.r.read_u8().await.map_err(map_eof)?;
            if b < 0x80 {
                if i == crate::engine::tsm1::varint::MAX_VARINT_LEN64 - 1 && b > 1 {
                    return Err(Error::CorruptFrame("bad varint".into()));
                }
                return Ok(v | (b as u64) << shift);
            }
            v |= ((b & 0x7f) as u64) << shift;
            shift += 7;
        }
        unreachable!()
    }
}

/// PointsReader drains the point batches of one series.
pub struct PointsReader<'a, R: AsyncRead + Unpin + Send> {
    r: &'a mut Reader<R>,
    field_type: FieldType,
    done: bool,
}

impl<R: AsyncRead + Unpin + Send> PointsReader<'_, R> {
    /// try_next decodes the next point batch, or returns None when the next
    /// frame belongs to the enclosing bucket.  A batch whose tag does not
    /// match the declared field type is fatal.
    pub async fn try_next(&mut self) -> Result<Option<Values>> {
        if self.done {
            return Ok(None);
        }

        let tag = self.r.next_tag().await?;
        let Some(typ) = points_type(tag) else {
            match tag {
                TAG_SERIES_HEADER | TAG_BUCKET_FOOTER => {
                    self.r.unread_tag(tag);
                    self.done = true;
                    return Ok(None);
                }
                tag => return Err(unknown_tag(tag)),
            }
        };

        if typ != self.field_type {
            return Err(Error::TypeMismatch {
                expected: self.field_type.name(),
                got: typ.name(),
            });
        }

        let payload = self.r.read_payload().await?;
        let mut dec = SliceDecoder::new(&payload);
        let count = dec.uvarint()? as usize;
        let values = decode_points(&mut dec, typ, count)?;
        dec.finish()?;
        Ok(Some(values))
    }
}
