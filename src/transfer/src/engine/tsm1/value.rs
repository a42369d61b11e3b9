use std::fmt::Debug;

use crate::error::{Error, Result};

/// FieldType identifies the fixed primitive type of a (series, field) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Integer,
    Float,
    Unsigned,
    Boolean,
    String,
}

impl FieldType {
    /// from_u8 decodes the wire representation used by the SeriesHeader
    /// frame and the TSM index.
    pub fn from_u8(b: u8) -> Result<FieldType> {
        match b {
            0 => Ok(FieldType::Integer),
            1 => Ok(FieldType::Float),
            2 => Ok(FieldType::Unsigned),
            3 => Ok(FieldType::Boolean),
            4 => Ok(FieldType::String),
            _ => Err(Error::CorruptFrame(format!("unknown field type {}", b))),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            FieldType::Integer => 0,
            FieldType::Float => 1,
            FieldType::Unsigned => 2,
            FieldType::Boolean => 3,
            FieldType::String => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Unsigned => "unsigned",
            FieldType::Boolean => "boolean",
            FieldType::String => "string",
        }
    }
}

/// Value is a single timestamped point.
#[derive(Debug, Clone, PartialEq)]
pub struct Value<T> {
    pub unix_nano: i64,
    pub value: T,
}

impl<T> Value<T> {
    pub fn new(unix_nano: i64, value: T) -> Self {
        Self { unix_nano, value }
    }
}

pub type TypeValues<T> = Vec<Value<T>>;

/// Values describes the various types of point data that flow between the
/// wire codec, the cursors and the shard writer.  Batches are ordered by
/// time ascending.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    Integer(TypeValues<i64>),
    Float(TypeValues<f64>),
    Unsigned(TypeValues<u64>),
    Boolean(TypeValues<bool>),
    String(TypeValues<Vec<u8>>),
}

impl Values {
    pub fn field_type(&self) -> FieldType {
        match self {
            Values::Integer(_) => FieldType::Integer,
            Values::Float(_) => FieldType::Float,
            Values::Unsigned(_) => FieldType::Unsigned,
            Values::Boolean(_) => FieldType::Boolean,
            Values::String(_) => FieldType::String,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Values::Integer(v) => v.len(),
            Values::Float(v) => v.len(),
            Values::Unsigned(v) => v.len(),
            Values::Boolean(v) => v.len(),
            Values::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// min_time returns the timestamp of the first point.  Panics on an
    /// empty batch; callers check is_empty first.
    pub fn min_time(&self) -> i64 {
        match self {
            Values::Integer(v) => v[0].unix_nano,
            Values::Float(v) => v[0].unix_nano,
            Values::Unsigned(v) => v[0].unix_nano,
            Values::Boolean(v) => v[0].unix_nano,
            Values::String(v) => v[0].unix_nano,
        }
    }

    pub fn max_time(&self) -> i64 {
        match self {
            Values::Integer(v) => v[v.len() - 1].unix_nano,
            Values::Float(v) => v[v.len() - 1].unix_nano,
            Values::Unsigned(v) => v[v.len() - 1].unix_nano,
            Values::Boolean(v) => v[v.len() - 1].unix_nano,
            Values::String(v) => v[v.len() - 1].unix_nano,
        }
    }

    /// encode_size estimates the in-memory footprint used by the shard
    /// writer's flush threshold.
    pub fn encode_size(&self) -> usize {
        match self {
            Values::Integer(v) => v.len() * 16,
            Values::Float(v) => v.len() * 16,
            Values::Unsigned(v) => v.len() * 16,
            Values::Boolean(v) => v.len() * 9,
            Values::String(v) => v.iter().map(|x| x.value.len() + 8).sum(),
        }
    }

    pub fn empty(typ: FieldType) -> Values {
        match typ {
            FieldType::Integer => Values::Integer(Vec::new()),
            FieldType::Float => Values::Float(Vec::new()),
            FieldType::Unsigned => Values::Unsigned(Vec::new()),
            FieldType::Boolean => Values::Boolean(Vec::new()),
            FieldType::String => Values::String(Vec::new()),
        }
    }

    /// extend appends b, enforcing ascending order across the join.  A
    /// timestamp equal to the current maximum replaces the stored value, so
    /// the last writer wins.  A smaller timestamp is unordered input.
    pub fn extend(&mut self, b: Values) -> Result<()> {
        fn join<T: Debug>(a: &mut TypeValues<T>, b: TypeValues<T>) -> Result<()> {
            for v in b {
                match a.last_mut() {
                    Some(last) if v.unix_nano < last.unix_nano => {
                        return Err(Error::UnorderedInput {
                            key: String::new(),
                            ts: v.unix_nano,
                            last: last.unix_nano,
                        })
                    }
                    Some(last) if v.unix_nano == last.unix_nano => *last = v,
                    _ => a.push(v),
                }
            }
            Ok(())
        }

        match (self, b) {
            (Values::Integer(a), Values::Integer(b)) => join(a, b),
            (Values::Float(a), Values::Float(b)) => join(a, b),
            (Values::Unsigned(a), Values::Unsigned(b)) => join(a, b),
            (Values::Boolean(a), Values::Boolean(b)) => join(a, b),
            (Values::String(a), Values::String(b)) => join(a, b),
            (a, b) => Err(Error::TypeMismatch {
                expected: a.field_type().name(),
                got: b.field_type().name(),
            }),
        }
    }
}
