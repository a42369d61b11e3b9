//! Read path: per-shard cursor iterators, the typed multi-shard batch
//! cursors that concatenate them, and the result set that walks a bucket in
//! canonical series order.

pub mod cursor;
pub mod resultset;
pub mod shard;

use tokio_util::sync::CancellationToken;

use crate::engine::tsm1::value::{FieldType, TypeValues, Values};
use crate::error::Result;

/// ReadRequest scopes one bucket read: the half-open time interval, an
/// optional point limit (0 is unlimited) and the cancellation token checked
/// between batches.
#[derive(Clone)]
pub struct ReadRequest {
    pub ctx: CancellationToken,
    pub start: i64,
    pub end: i64,
    pub limit: u64,
}

/// CursorRequest asks a shard for the points of one (series, field) pair
/// inside a time interval.
#[derive(Debug, Clone)]
pub struct CursorRequest {
    pub key: Vec<u8>,
    pub start: i64,
    pub end: i64,
}

/// CursorIterator produces the cursor for one series from one shard, or None
/// when the shard holds no data for it.
#[async_trait]
pub trait CursorIterator: Send + Sync {
    async fn cursor(&mut self, req: &CursorRequest) -> Result<Option<Cursor>>;
}

/// BatchCursor yields ordered, non-empty point batches for one series and
/// one primitive type.
#[async_trait]
pub trait BatchCursor<T>: Send + Sync {
    async fn try_next(&mut self) -> Result<Option<TypeValues<T>>>;
}

/// Cursor is the tagged variant over the five monomorphized batch cursors.
/// Format writers match on it; type dispatch happens exactly once per
/// series.
pub enum Cursor {
    Integer(Box<dyn BatchCursor<i64>>),
    Float(Box<dyn BatchCursor<f64>>),
    Unsigned(Box<dyn BatchCursor<u64>>),
    Boolean(Box<dyn BatchCursor<bool>>),
    String(Box<dyn BatchCursor<Vec<u8>>>),
}

impl Cursor {
    pub fn field_type(&self) -> FieldType {
        match self {
            Cursor::Integer(_) => FieldType::Integer,
            Cursor::Float(_) => FieldType::Float,
            Cursor::Unsigned(_) => FieldType::Unsigned,
            Cursor::Boolean(_) => FieldType::Boolean,
            Cursor::String(_) => FieldType::String,
        }
    }
}

/// ValueType ties a primitive point type to its Values and Cursor variants so
/// the cursor machinery can be written once and monomorphized five times.
pub trait ValueType: Sized + Send + Sync + 'static {
    const TYPE: FieldType;

    fn from_values(v: Values) -> std::result::Result<TypeValues<Self>, FieldType>;
    fn into_values(v: TypeValues<Self>) -> Values;
    fn into_cursor(c: Box<dyn BatchCursor<Self>>) -> Cursor;
    fn from_cursor(c: Cursor) -> std::result::Result<Box<dyn BatchCursor<Self>>, FieldType>;
}

macro_rules! impl_value_type {
    ($t:ty, $variant:ident) => {
        impl ValueType for $t {
            const TYPE: FieldType = FieldType::$variant;

            fn from_values(v: Values) -> std::result::Result<TypeValues<Self>, FieldType> {
                match v {
                    Values::$variant(v) => Ok(v),
                    other => Err(other.field_type()),
                }
            }

            fn into_values(v: TypeValues<Self>) -> Values {
                Values::$variant(v)
            }

            fn into_cursor(c: Box<dyn BatchCursor<Self>>) -> Cursor {
                Cursor::$variant(c)
            }

            fn from_cursor(c: Cursor) -> std::result::Result<Box<dyn BatchCursor<Self>>, FieldType>
            {
                match c {
                    Cursor::$variant(c) => Ok(c),
                    other => Err(other.field_type()),
                }
            }
        }
    };
}

impl_value_type!(i64, Integer);
impl_value_type!(f64, Float);
impl_value_type!(u64, Unsigned);
impl_value_type!(bool, Boolean);
impl_value_type!(Vec<u8>, String);
