//! TSM file reader.  The index is parsed eagerly into memory; blocks are
//! read on demand with their CRC verified.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::engine::tsm1::block::decode_block;
use crate::engine::tsm1::value::{FieldType, Values};
use crate::engine::tsm1::writer::IndexEntry;
use crate::engine::tsm1::{HEADER, INDEX_ENTRY_SIZE, MAGIC_NUMBER, VERSION};
use crate::error::{Error, Result};

/// KeyIndex holds the index section for one key.
#[derive(Debug, Clone)]
pub struct KeyIndex {
    pub key: Vec<u8>,
    pub typ: FieldType,
    pub entries: Vec<IndexEntry>,
}

pub struct TsmReader {
    fd: File,
    path: PathBuf,
    keys: Vec<KeyIndex>,
}

impl TsmReader {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut fd = File::open(&path).await?;

        let mut header = [0u8; HEADER.len()];
        fd.read_exact(&mut header).await.map_err(corrupt_eof)?;
        let magic = u32::from_be_bytes(header[..4].try_into().unwrap());
        if magic != MAGIC_NUMBER || header[4] != VERSION {
            return Err(Error::CorruptFrame(format!(
                "{} is not a tsm1 file",
                path.display()
            )));
        }

        let file_len = fd.metadata().await?.len();
        if file_len < (HEADER.len() + 8) as u64 {
            return Err(Error::CorruptFrame(format!(
                "{} is truncated",
                path.display()
            )));
        }

        fd.seek(SeekFrom::End(-8)).await?;
        let index_pos = fd.read_u64().await.map_err(corrupt_eof)?;
        if index_pos < HEADER.len() as u64 || index_pos > file_len - 8 {
            return Err(Error::CorruptFrame(format!(
                "{} has an invalid index offset",
                path.display()
            )));
        }

        fd.seek(SeekFrom::Start(index_pos)).await?;
        let mut index = vec![0u8; (file_len - 8 - index_pos) as usize];
        fd.read_exact(&mut index).await.map_err(corrupt_eof)?;

        let keys = parse_index(&index)?;
        Ok(Self { fd, path, keys })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// keys returns the key index in ascending key order.
    pub fn keys(&self) -> &[KeyIndex] {
        &self.keys
    }

    /// key_index locates the index section for key, if present.
    pub fn key_index(&self, key: &[u8]) -> Option<&KeyIndex> {
        self.keys
            .binary_search_by(|ki| ki.key.as_slice().cmp(key))
            .ok()
            .map(|i| &self.keys[i])
    }

    /// read_block reads and decodes the block described by entry.
    pub async fn read_block(&mut self, entry: &IndexEntry) -> Result<Values> {
        if entry.size < 4 {
            return Err(Error::CorruptFrame("block shorter than checksum".into()));
        }

        self.fd.seek(SeekFrom::Start(entry.offset)).await?;
        let mut buf = vec![0u8; entry.size as usize];
        self.fd.read_exact(&mut buf).await.map_err(corrupt_eof)?;

        let checksum = u32::from_be_bytes(buf[..4].try_into().unwrap());
        let block = &buf[4..];
        if crc32fast::hash(block) != checksum {
            return Err(Error::CorruptFrame(format!(
                "block checksum mismatch at offset {}",
                entry.offset
            )));
        }

        decode_block(block)
    }
}

fn parse_index(b: &[u8]) -> Result<Vec<KeyIndex>> {
    let mut keys: Vec<KeyIndex> = Vec::new();
    let mut i = 0usize;
    while i < b.len() {
        if b.len() - i < 2 {
            return Err(Error::CorruptFrame("short index key length".into()));
        }
        let key_len = u16::from_be_bytes(b[i..i + 2].try_into().unwrap()) as usize;
        i += 2;
        if b.len() - i < key_len + 3 {
            return Err(Error::CorruptFrame("short index key".into()));
        }
        let key = b[i..i + key_len].to_vec();
        i += key_len;

        let typ = FieldType::from_u8(b[i])?;
        let count = u16::from_be_bytes(b[i + 1..i + 3].try_into().unwrap()) as usize;
        i += 3;

        if b.len() - i < count * INDEX_ENTRY_SIZE {
            return Err(Error::CorruptFrame("short index entries".into()));
        }
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(IndexEntry::unmarshal_binary(&b[i..i + INDEX_ENTRY_SIZE])?);
            i += INDEX_ENTRY_SIZE;
        }

        if let Some(last) = keys.last() {
            if last.key >= key {
                return Err(Error::CorruptFrame("index keys out of order".into()));
            }
        }
        keys.push(KeyIndex { key, typ, entries });
    }
    Ok(keys)
}

fn corrupt_eof(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::CorruptFrame("tsm file truncated".into())
    } else {
        Error::Io(e)
    }
}
