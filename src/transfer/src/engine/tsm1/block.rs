//! TSM block codec.  A block is `blockType:u8 | count:uvarint | points`,
//! with the point sections encoded by the shared codec.  The per-block CRC
//! lives outside the block, written by the file writer.

use crate::engine::tsm1::codec::{decode_points, encode_points, SliceDecoder};
use crate::engine::tsm1::value::{FieldType, Values};
use crate::engine::tsm1::varint::append_uvarint;
use crate::error::{Error, Result};

/// encode_block appends the encoded form of values to dst.  Empty batches
/// are the caller's bug; the writer skips them before this point.
pub fn encode_block(dst: &mut Vec<u8>, values: &Values) {
    dst.push(values.field_type().as_u8());
    append_uvarint(dst, values.len() as u64);
    encode_points(dst, values);
}

/// block_type returns the field type tag of an encoded block.
pub fn block_type(block: &[u8]) -> Result<FieldType> {
    match block.first() {
        Some(&b) => FieldType::from_u8(b),
        None => Err(Error::CorruptFrame("empty block".into())),
    }
}

/// decode_block decodes a full block, verifying the payload is fully
/// consumed.
pub fn decode_block(block: &[u8]) -> Result<Values> {
    let mut dec = SliceDecoder::new(block);
    let typ = FieldType::from_u8(dec.u8()?)?;
    let count = dec.uvarint()? as usize;
    let values = decode_points(&mut dec, typ, count)?;
    dec.finish()?;
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::{block_type, decode_block, encode_block};
    use crate::engine::tsm1::value::{FieldType, Value, Values};

    #[test]
    fn test_block_round_trip() {
        let values = Values::Float(vec![Value::new(1, 1.5), Value::new(9, -2.0)]);
        let mut block = Vec::new();
        encode_block(&mut block, &values);

        assert_eq!(block_type(&block).unwrap(), FieldType::Float);
        let got = decode_block(&block).unwrap();
        assert_eq!(got, values, "unexpected values: got {:?}", got);
    }

    #[test]
    fn test_block_trailing_garbage() {
        let values = Values::Boolean(vec![Value::new(1, true)]);
        let mut block = Vec::new();
        encode_block(&mut block, &values);
        block.push(0);
        assert!(decode_block(&block).is_err());
    }
}
