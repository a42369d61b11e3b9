/// ZERO_TIME is the Unix nanosecond timestamp for no time.
/// This time is not used by the query engine or the storage engine as a valid time.
pub const ZERO_TIME: i64 = i64::MIN;

/// MIN_TIME is the minimum time that can be represented.
///
/// 1677-09-21 00:12:43.145224194 +0000 UTC
///
/// The two lowest minimum integers are used as sentinel values.
pub const MIN_TIME: i64 = i64::MIN + 2;

/// MAX_TIME is the maximum time that can be represented.
///
/// 2262-04-11 23:47:16.854775806 +0000 UTC
///
/// The highest nanosecond needs to be usable in an exclusive range by the
/// shard group, so the maximum time is one less than i64::MAX.
pub const MAX_TIME: i64 = i64::MAX - 1;
