//! Series-key model: measurement names, ordered tag sets and the canonical
//! byte encodings shared by the exporter, the wire codec and the importer.

pub mod escape;

use crate::error::{Error, Result};

/// KEY_FIELD_SEPARATOR joins a series key and a field name into the composite
/// key used by the shard writer.  The byte is forbidden in field names.
pub const KEY_FIELD_SEPARATOR: u8 = 0xff;

/// Tag is a key/value pair of raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tag {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Tag {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Tags is an ordered tag set.  The canonical form sorts tags by key
/// ascending and disallows duplicate keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tags(pub Vec<Tag>);

impl Tags {
    pub fn new(mut tags: Vec<Tag>) -> Self {
        tags.sort();
        Self(tags)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.0.iter()
    }
}

/// make_key appends the canonical series key for (name, tags) to dst and
/// returns it: the escaped measurement followed by `,key=value` pairs in tag
/// order.
pub fn make_key(name: &[u8], tags: &Tags) -> Vec<u8> {
    let mut dst = Vec::with_capacity(name.len() + 16 * tags.len());
    escape::append_measurement(&mut dst, name);
    for tag in tags.iter() {
        dst.push(b',');
        escape::append_tag(&mut dst, &tag.key);
        dst.push(b'=');
        escape::append_tag(&mut dst, &tag.value);
    }
    dst
}

/// parse_key splits a canonical series key back into (name, tags).  Duplicate
/// tag keys and malformed pairs are corrupt input.
pub fn parse_key(key: &[u8]) -> Result<(Vec<u8>, Tags)> {
    let mut parts = split_unescaped(key, b',');
    let name = match parts.next() {
        Some(p) if !p.is_empty() => escape::unescape(p),
        _ => return Err(Error::CorruptFrame("series key has no measurement".into())),
    };

    let mut tags = Vec::new();
    for part in parts {
        let mut kv = split_unescaped(part, b'=');
        let (k, v) = match (kv.next(), kv.next(), kv.next()) {
            (Some(k), Some(v), None) if !k.is_empty() => (k, v),
            _ => {
                return Err(Error::CorruptFrame(format!(
                    "malformed tag pair in series key {:?}",
                    String::from_utf8_lossy(key)
                )))
            }
        };
        tags.push(Tag::new(escape::unescape(k), escape::unescape(v)));
    }

    for w in tags.windows(2) {
        if w[0].key >= w[1].key {
            return Err(Error::CorruptFrame(format!(
                "tags out of order in series key {:?}",
                String::from_utf8_lossy(key)
            )));
        }
    }

    Ok((name, Tags(tags)))
}

/// composite_key encodes (series key, field) with the 0xff delimiter.
pub fn composite_key(series_key: &[u8], field: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(series_key.len() + 1 + field.len());
    key.extend_from_slice(series_key);
    key.push(KEY_FIELD_SEPARATOR);
    key.extend_from_slice(field);
    key
}

/// series_and_field_from_composite_key splits at the last delimiter byte; the
/// delimiter is forbidden in field names, so the last occurrence is the join
/// point.
pub fn series_and_field_from_composite_key(key: &[u8]) -> Result<(&[u8], &[u8])> {
    match key.iter().rposition(|&b| b == KEY_FIELD_SEPARATOR) {
        Some(i) => Ok((&key[..i], &key[i + 1..])),
        None => Err(Error::CorruptFrame(format!(
            "composite key {:?} has no field separator",
            String::from_utf8_lossy(key)
        ))),
    }
}

/// split_unescaped yields the sub-slices of b delimited by sep, honoring
/// backslash escapes.
fn split_unescaped(b: &[u8], sep: u8) -> impl Iterator<Item = &[u8]> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < b.len() {
        if b[i] == b'\\' && i + 1 < b.len() {
            i += 2;
            continue;
        }
        if b[i] == sep {
            parts.push(&b[start..i]);
            start = i + 1;
        }
        i += 1;
    }
    parts.push(&b[start..]);
    parts.into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_key_sorts_tags() {
        let tags = Tags::new(vec![Tag::new("region", "west"), Tag::new("host", "a")]);
        let key = make_key(b"cpu", &tags);
        assert_eq!(
            key.as_slice(),
            b"cpu,host=a,region=west",
            "unexpected key: got {:?}",
            String::from_utf8_lossy(&key)
        );
    }

    #[test]
    fn test_parse_key_round_trip() {
        let tags = Tags::new(vec![
            Tag::new("host", "a b"),
            Tag::new("path", "c,d=e"),
        ]);
        let key = make_key(b"disk io", &tags);
        let (name, parsed) = parse_key(&key).unwrap();
        assert_eq!(name.as_slice(), b"disk io");
        assert_eq!(parsed, tags, "unexpected tags: got {:?}", parsed);
    }

    #[test]
    fn test_parse_key_rejects_unordered_tags() {
        assert!(parse_key(b"cpu,b=1,a=2").is_err());
    }

    #[test]
    fn test_composite_key_split() {
        let key = composite_key(b"cpu,host=a", b"value");
        let (series, field) = series_and_field_from_composite_key(&key).unwrap();
        assert_eq!(series, b"cpu,host=a");
        assert_eq!(field, b"value");
    }

    #[test]
    fn test_composite_key_without_separator() {
        assert!(series_and_field_from_composite_key(b"cpu,host=a").is_err());
    }
}
