//! TSM file writer.  Blocks are appended in key order with a CRC32 prefix;
//! the in-memory direct index is written at the end, followed by a fixed
//! footer holding the index offset.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::BufMut;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::engine::tsm1::block::encode_block;
use crate::engine::tsm1::value::{FieldType, Values};
use crate::engine::tsm1::{FSYNC_EVERY, HEADER, INDEX_ENTRY_SIZE, MAX_KEY_LENGTH};
use crate::error::{Error, Result};

/// IndexEntry is the index information for a given block in a TSM file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// The min and max time of all points stored in the block.
    pub min_time: i64,
    pub max_time: i64,

    /// The absolute position in the file where this block is located.
    pub offset: u64,

    /// The size in bytes of the block in the file, CRC included.
    pub size: u32,
}

impl IndexEntry {
    pub fn append_to(&self, b: &mut Vec<u8>) {
        b.put_u64(self.min_time as u64);
        b.put_u64(self.max_time as u64);
        b.put_u64(self.offset);
        b.put_u32(self.size);
    }

    pub fn unmarshal_binary(b: &[u8]) -> Result<Self> {
        if b.len() < INDEX_ENTRY_SIZE {
            return Err(Error::CorruptFrame(format!(
                "short index entry: {} < {}",
                b.len(),
                INDEX_ENTRY_SIZE
            )));
        }
        Ok(Self {
            min_time: u64::from_be_bytes(b[..8].try_into().unwrap()) as i64,
            max_time: u64::from_be_bytes(b[8..16].try_into().unwrap()) as i64,
            offset: u64::from_be_bytes(b[16..24].try_into().unwrap()),
            size: u32::from_be_bytes(b[24..28].try_into().unwrap()),
        })
    }

    /// overlaps returns true if the entry's time bounds intersect [min, max].
    pub fn overlaps(&self, min: i64, max: i64) -> bool {
        self.min_time <= max && self.max_time >= min
    }
}

struct KeyEntries {
    key: Vec<u8>,
    typ: FieldType,
    entries: Vec<IndexEntry>,
}

/// DirectIndex is a simple in-memory index for a TSM file being written.
/// Keys arrive in ascending order, so the index is a flat sorted list.
#[derive(Default)]
struct DirectIndex {
    keys: Vec<KeyEntries>,
    size: u32,
}

impl DirectIndex {
    fn add(&mut self, key: &[u8], typ: FieldType, entry: IndexEntry) -> Result<()> {
        match self.keys.last_mut() {
            Some(last) if last.key.as_slice() == key => {
                if last.typ != typ {
                    return Err(Error::TypeMismatch {
                        expected: last.typ.name(),
                        got: typ.name(),
                    });
                }
                last.entries.push(entry);
            }
            Some(last) if last.key.as_slice() > key => {
                return Err(Error::Io(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    "keys must be added in sorted order",
                )))
            }
            _ => {
                self.size += (2 + key.len() + 1 + 2) as u32;
                self.keys.push(KeyEntries {
                    key: key.to_vec(),
                    typ,
                    entries: vec![entry],
                });
            }
        }
        self.size += INDEX_ENTRY_SIZE as u32;
        Ok(())
    }

    fn marshal_binary(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size as usize);
        for ke in &self.keys {
            buf.put_u16(ke.key.len() as u16);
            buf.extend_from_slice(&ke.key);
            buf.push(ke.typ.as_u8());
            buf.put_u16(ke.entries.len() as u16);
            for entry in &ke.entries {
                entry.append_to(&mut buf);
            }
        }
        buf
    }
}

/// TsmWriter writes TSM formatted keys and values.  The caller is
/// responsible for writing keys in sorted order and values in time order.
pub struct TsmWriter {
    fd: File,
    path: PathBuf,
    index: DirectIndex,
    n: u64,

    // The bytes written count of when we last fsync'd.
    last_sync: u64,
}

impl TsmWriter {
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let fd = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path.as_ref())
            .await?;
        Ok(Self {
            fd,
            path: path.as_ref().to_path_buf(),
            index: DirectIndex::default(),
            n: 0,
            last_sync: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// size returns the current size in bytes of the data section plus the
    /// pending index.
    pub fn size(&self) -> u64 {
        self.n + self.index.size as u64
    }

    /// write encodes values as a single block for key.  The first and last
    /// timestamps become the index entry bounds.
    pub async fn write(&mut self, key: &[u8], values: &Values) -> Result<()> {
        if key.len() > MAX_KEY_LENGTH {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                "max key length exceeded",
            )));
        }
        if values.is_empty() {
            return Ok(());
        }

        // Write the file header only once there is data to write.
        if self.n == 0 {
            self.fd.write_all(&HEADER).await?;
            self.n = HEADER.len() as u64;
        }

        let mut block = Vec::with_capacity(values.encode_size());
        encode_block(&mut block, values);

        let checksum = crc32fast::hash(&block);
        self.fd.write_u32(checksum).await?;
        self.fd.write_all(&block).await?;

        let entry = IndexEntry {
            min_time: values.min_time(),
            max_time: values.max_time(),
            offset: self.n,
            size: (4 + block.len()) as u32,
        };
        self.index.add(key, values.field_type(), entry)?;
        self.n += (4 + block.len()) as u64;

        // fsync periodically to avoid one long pause with very big files.
        if self.n - self.last_sync > FSYNC_EVERY {
            self.fd.flush().await?;
            self.fd.sync_data().await?;
            self.last_sync = self.n;
        }

        Ok(())
    }

    /// write_index finishes the data section and appends the index and the
    /// footer.
    pub async fn write_index(&mut self) -> Result<()> {
        if self.index.keys.is_empty() {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                "no values written",
            )));
        }

        let index_pos = self.n;
        let buf = self.index.marshal_binary();
        self.fd.write_all(&buf).await?;
        self.fd.write_u64(index_pos).await?;
        Ok(())
    }

    pub async fn close(mut self) -> Result<()> {
        self.fd.flush().await?;
        self.fd.sync_all().await?;
        Ok(())
    }

    /// remove abandons the file, deleting anything already written.
    pub async fn remove(self) -> Result<()> {
        let Self { fd, path, .. } = self;
        drop(fd);
        tokio::fs::remove_file(&path).await?;
        Ok(())
    }
}
