//! Point encodings shared by the TSM block codec and the binary wire format.
//!
//! Timestamps and integer values are zig-zag varint deltas against the
//! previous element; the first element is absolute.  Floats are IEEE-754
//! little-endian.  Booleans are one byte each.  Strings are uvarint
//! length-prefixed.

use crate::engine::tsm1::value::{FieldType, TypeValues, Value, Values};
use crate::engine::tsm1::varint::{append_uvarint, VarInt};
use crate::engine::tsm1::zigzag::{zig_zag_decode, zig_zag_encode};
use crate::error::{Error, Result};

/// SliceDecoder walks a fully-buffered payload.  Truncation inside a payload
/// is corrupt framing; the stream-level reader is responsible for turning a
/// short read into UnexpectedEof.
pub struct SliceDecoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(Error::CorruptFrame(format!(
                "{} trailing bytes after payload",
                self.remaining()
            )));
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| Error::CorruptFrame("short payload".into()))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::CorruptFrame("short payload".into()));
        }
        let b = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(b)
    }

    pub fn u32_be(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    pub fn u64_be(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    pub fn i64_be(&mut self) -> Result<i64> {
        Ok(self.u64_be()? as i64)
    }

    pub fn uvarint(&mut self) -> Result<u64> {
        let (v, n) = u64::decode_var(&self.buf[self.pos..])
            .ok_or_else(|| Error::CorruptFrame("bad varint".into()))?;
        self.pos += n;
        Ok(v)
    }

    /// varint_blob reads a uvarint length prefix followed by that many bytes.
    pub fn varint_blob(&mut self) -> Result<&'a [u8]> {
        let n = self.uvarint()? as usize;
        self.bytes(n)
    }
}

pub fn put_i64_deltas(dst: &mut Vec<u8>, vals: impl Iterator<Item = i64>) {
    let mut prev = 0i64;
    let mut first = true;
    for v in vals {
        let d = if first { v } else { v.wrapping_sub(prev) };
        append_uvarint(dst, zig_zag_encode(d));
        prev = v;
        first = false;
    }
}

pub fn read_i64_deltas(dec: &mut SliceDecoder<'_>, count: usize) -> Result<Vec<i64>> {
    let mut out = Vec::with_capacity(count);
    let mut prev = 0i64;
    for i in 0..count {
        let d = zig_zag_decode(dec.uvarint()?);
        prev = if i == 0 { d } else { prev.wrapping_add(d) };
        out.push(prev);
    }
    Ok(out)
}

/// encode_points appends count timestamps then count values for the batch.
/// The caller has already written any type tag and the count.
pub fn encode_points(dst: &mut Vec<u8>, values: &Values) {
    match values {
        Values::Integer(v) => {
            put_i64_deltas(dst, v.iter().map(|x| x.unix_nano));
            put_i64_deltas(dst, v.iter().map(|x| x.value));
        }
        Values::Float(v) => {
            put_i64_deltas(dst, v.iter().map(|x| x.unix_nano));
            for x in v {
                dst.extend_from_slice(&x.value.to_le_bytes());
            }
        }
        Values::Unsigned(v) => {
            put_i64_deltas(dst, v.iter().map(|x| x.unix_nano));
            put_i64_deltas(dst, v.iter().map(|x| x.value as i64));
        }
        Values::Boolean(v) => {
            put_i64_deltas(dst, v.iter().map(|x| x.unix_nano));
            for x in v {
                dst.push(x.value as u8);
            }
        }
        Values::String(v) => {
            put_i64_deltas(dst, v.iter().map(|x| x.unix_nano));
            for x in v {
                append_uvarint(dst, x.value.len() as u64);
                dst.extend_from_slice(&x.value);
            }
        }
    }
}

/// decode_points reads count points of the given type.
pub fn decode_points(dec: &mut SliceDecoder<'_>, typ: FieldType, count: usize) -> Result<Values> {
    let ts = read_i64_deltas(dec, count)?;

    fn zip<T>(ts: Vec<i64>, vs: Vec<T>) -> TypeValues<T> {
        ts.into_iter()
            .zip(vs)
            .map(|(t, v)| Value::new(t, v))
            .collect()
    }

    match typ {
        FieldType::Integer => {
            let vs = read_i64_deltas(dec, count)?;
            Ok(Values::Integer(zip(ts, vs)))
        }
        FieldType::Float => {
            let mut vs = Vec::with_capacity(count);
            for _ in 0..count {
                vs.push(f64::from_le_bytes(dec.bytes(8)?.try_into().unwrap()));
            }
            Ok(Values::Float(zip(ts, vs)))
        }
        FieldType::Unsigned => {
            let vs = read_i64_deltas(dec, count)?;
            Ok(Values::Unsigned(zip(ts, vs.into_iter().map(|v| v as u64).collect())))
        }
        FieldType::Boolean => {
            let mut vs = Vec::with_capacity(count);
            for _ in 0..count {
                vs.push(dec.u8()? != 0);
            }
            Ok(Values::Boolean(zip(ts, vs)))
        }
        FieldType::String => {
            let mut vs = Vec::with_capacity(count);
            for _ in 0..count {
                vs.push(dec.varint_blob()?.to_vec());
            }
            Ok(Values::String(zip(ts, vs)))
        }
    }
}
