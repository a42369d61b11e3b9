//! Binary wire format: a self-describing stream of length-delimited,
//! type-tagged frames.
//!
//! A stream is `Magic "IFLX" | FileHeader | Bucket* | EOF`, where a bucket
//! is `BucketHeader (SeriesHeader PointBatch*)* BucketFooter`.  Each frame
//! after the magic is `tag:u8 | len:uvarint | payload`.  Payload scalars are
//! fixed-width big-endian; byte strings are uvarint length-prefixed; point
//! batches use the shared delta codec.

pub mod reader;
pub mod writer;

use crate::engine::tsm1::value::FieldType;
use crate::error::{Error, Result};

/// MAGIC identifies a transfer stream.
pub const MAGIC: [u8; 4] = *b"IFLX";

/// VERSION is the stream version carried by the file header.
pub const VERSION: u32 = 1;

pub(crate) const TAG_FILE_HEADER: u8 = 1;
pub(crate) const TAG_BUCKET_HEADER: u8 = 2;
pub(crate) const TAG_SERIES_HEADER: u8 = 3;
pub(crate) const TAG_INTEGER_POINTS: u8 = 4;
pub(crate) const TAG_FLOAT_POINTS: u8 = 5;
pub(crate) const TAG_UNSIGNED_POINTS: u8 = 6;
pub(crate) const TAG_BOOLEAN_POINTS: u8 = 7;
pub(crate) const TAG_STRING_POINTS: u8 = 8;
pub(crate) const TAG_BUCKET_FOOTER: u8 = 9;

pub(crate) fn points_tag(typ: FieldType) -> u8 {
    match typ {
        FieldType::Integer => TAG_INTEGER_POINTS,
        FieldType::Float => TAG_FLOAT_POINTS,
        FieldType::Unsigned => TAG_UNSIGNED_POINTS,
        FieldType::Boolean => TAG_BOOLEAN_POINTS,
        FieldType::String => TAG_STRING_POINTS,
    }
}

pub(crate) fn points_type(tag: u8) -> Option<FieldType> {
    match tag {
        TAG_INTEGER_POINTS => Some(FieldType::Integer),
        TAG_FLOAT_POINTS => Some(FieldType::Float),
        TAG_UNSIGNED_POINTS => Some(FieldType::Unsigned),
        TAG_BOOLEAN_POINTS => Some(FieldType::Boolean),
        TAG_STRING_POINTS => Some(FieldType::String),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u32,
    pub database: String,
    pub retention_policy: String,
    /// Width of every bucket in the stream, nanoseconds.
    pub shard_duration: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketHeader {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesHeader {
    pub field_type: FieldType,
    pub series_key: Vec<u8>,
    pub field: Vec<u8>,
}

pub(crate) fn unknown_tag(tag: u8) -> Error {
    Error::CorruptFrame(format!("unknown frame tag {}", tag))
}

pub(crate) fn check_bucket_width(bh: &BucketHeader, shard_duration: i64) -> Result<()> {
    if bh.end - bh.start != shard_duration {
        return Err(Error::CorruptFrame(format!(
            "bucket [{}, {}) does not span the declared shard duration {}",
            bh.start, bh.end, shard_duration
        )));
    }
    Ok(())
}
