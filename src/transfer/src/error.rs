use thiserror::Error;

/// Error enumerates every failure the transfer core can surface.  Nothing is
/// retried inside the core; the first error aborts the stream and subsequent
/// calls on a latched writer return the same error text.
#[derive(Error, Debug)]
pub enum Error {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("database not found: {0}")]
    DatabaseMissing(String),

    #[error("database already exists: {0}")]
    DatabaseExists(String),

    #[error("retention policy conflicts with an existing policy: {0}")]
    DuplicateRetentionPolicy(String),

    #[error("shard already exists for start time {0}")]
    ShardExists(i64),

    #[error("out of order timestamp {ts} for key {key:?}, last was {last}")]
    UnorderedInput { key: String, ts: i64, last: i64 },

    #[error("cursor type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("corrupt frame: {0}")]
    CorruptFrame(String),

    #[error("unexpected EOF")]
    UnexpectedEof,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation canceled")]
    Canceled,

    #[error("meta: {0}")]
    Meta(String),
}

impl Error {
    /// clone_shallow reproduces the error for sticky-latch reporting.  The io
    /// variant loses the typed source but keeps the rendered message, which
    /// is all the latch needs.
    pub(crate) fn clone_shallow(&self) -> Error {
        match self {
            Error::ConfigInvalid(s) => Error::ConfigInvalid(s.clone()),
            Error::DatabaseMissing(s) => Error::DatabaseMissing(s.clone()),
            Error::DatabaseExists(s) => Error::DatabaseExists(s.clone()),
            Error::DuplicateRetentionPolicy(s) => Error::DuplicateRetentionPolicy(s.clone()),
            Error::ShardExists(t) => Error::ShardExists(*t),
            Error::UnorderedInput { key, ts, last } => Error::UnorderedInput {
                key: key.clone(),
                ts: *ts,
                last: *last,
            },
            Error::TypeMismatch { expected, got } => Error::TypeMismatch { expected, got },
            Error::CorruptFrame(s) => Error::CorruptFrame(s.clone()),
            Error::UnexpectedEof => Error::UnexpectedEof,
            Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
            Error::Canceled => Error::Canceled,
            Error::Meta(s) => Error::Meta(s.clone()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// map_eof converts the io::ErrorKind::UnexpectedEof raised by read_exact on
/// a truncated stream into the wire-level error kind.
pub(crate) fn map_eof(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::UnexpectedEof
    } else {
        Error::Io(e)
    }
}
