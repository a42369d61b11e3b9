//! Flag value parsers shared by the export and import commands.

use anyhow::{anyhow, bail};

/// parse_duration parses Go-style duration literals with an added day and
/// week unit: `168h`, `7d`, `1h30m`, `90s`.  The result is nanoseconds.
pub fn parse_duration(s: &str) -> anyhow::Result<i64> {
    if s.is_empty() {
        bail!("empty duration");
    }

    let mut total: i64 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            bail!("invalid duration '{}'", s);
        }
        let (num, tail) = rest.split_at(digits);
        let n: i64 = num.parse()?;

        let (unit_len, scale) = if tail.starts_with("ns") {
            (2, 1i64)
        } else if tail.starts_with("us") {
            (2, 1_000)
        } else if tail.starts_with("ms") {
            (2, 1_000_000)
        } else if tail.starts_with('s') {
            (1, 1_000_000_000)
        } else if tail.starts_with('m') {
            (1, 60 * 1_000_000_000)
        } else if tail.starts_with('h') {
            (1, 3_600 * 1_000_000_000)
        } else if tail.starts_with('d') {
            (1, 24 * 3_600 * 1_000_000_000)
        } else if tail.starts_with('w') {
            (1, 7 * 24 * 3_600 * 1_000_000_000)
        } else {
            bail!("invalid duration unit in '{}'", s);
        };

        total = total
            .checked_add(
                n.checked_mul(scale)
                    .ok_or_else(|| anyhow!("duration '{}' overflows", s))?,
            )
            .ok_or_else(|| anyhow!("duration '{}' overflows", s))?;
        rest = &tail[unit_len..];
    }

    if total <= 0 {
        bail!("duration '{}' must be positive", s);
    }
    Ok(total)
}

/// parse_range parses an inclusive shard-id range: `N`, `N-M` or `N-` with
/// an open maximum.
pub fn parse_range(s: &str) -> anyhow::Result<(u64, u64)> {
    let parts: Vec<&str> = s.split('-').collect();
    match parts.as_slice() {
        [v] => {
            let n: u64 = v
                .parse()
                .map_err(|_| anyhow!("range error: must be a positive number"))?;
            Ok((n, n))
        }
        [min, max] => {
            let lo: u64 = min
                .parse()
                .map_err(|_| anyhow!("range error: min must be a positive number"))?;
            let hi = if max.is_empty() {
                u64::MAX
            } else {
                max.parse()
                    .map_err(|_| anyhow!("range error: max must be empty or a positive number"))?
            };
            Ok((lo, hi))
        }
        _ => bail!("range error: {} is not a valid range", s),
    }
}

/// parse_time parses an RFC3339 timestamp into Unix nanoseconds.
pub fn parse_time(s: &str) -> anyhow::Result<i64> {
    let dt = chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| anyhow!("invalid time '{}': {}", s, e))?;
    dt.timestamp_nanos_opt()
        .ok_or_else(|| anyhow!("time '{}' is out of range", s))
}

#[cfg(test)]
mod tests {
    use super::{parse_duration, parse_range, parse_time};

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("168h").unwrap(), 604_800_000_000_000);
        assert_eq!(parse_duration("7d").unwrap(), 604_800_000_000_000);
        assert_eq!(parse_duration("1h30m").unwrap(), 5_400_000_000_000);
        assert_eq!(parse_duration("10ms").unwrap(), 10_000_000);
        assert!(parse_duration("").is_err());
        assert!(parse_duration("12").is_err());
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("1y").is_err());
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("3").unwrap(), (3, 3));
        assert_eq!(parse_range("2-5").unwrap(), (2, 5));
        assert_eq!(parse_range("2-").unwrap(), (2, u64::MAX));
        assert!(parse_range("a-5").is_err());
        assert!(parse_range("1-2-3").is_err());
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("1970-01-01T00:00:01Z").unwrap(), 1_000_000_000);
        assert!(parse_time("not a time").is_err());
    }
}
