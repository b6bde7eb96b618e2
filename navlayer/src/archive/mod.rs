//! Packed offline map archives.
//!
//! An archive is an immutable single-file bundle of container payloads:
//!
//! ```text
//! +--------+=================+=======+--------------------------------+
//! | header |  entry payloads | index |            footer              |
//! | magic  |  (append order) |       | offset, len, sha256, magic     |
//! +--------+=================+=======+--------------------------------+
//! ```
//!
//! [`ArchiveWriter`] appends entry payloads as they arrive and keeps only
//! the index records in memory, so archives of any size can be created
//! streaming. [`ArchiveReader`] loads the index fully into memory on open
//! and verifies a per-entry SHA-256 checksum on retrieval; a mismatch
//! reports only that entry as corrupt, the rest of the archive stays
//! usable.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

/// File magic, at the start of the header and the end of the footer.
const MAGIC: &[u8; 4] = b"NLAR";
/// Current format version.
const VERSION: u16 = 1;
/// Header: magic + version + reserved flags.
const HEADER_LEN: u64 = 8;
/// Footer: index offset + index length + index checksum + magic.
const FOOTER_LEN: u64 = 8 + 8 + 32 + 4;

/// Errors from archive creation and retrieval.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not an archive, or its header/index/footer is damaged.
    /// The whole archive is unusable.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// One entry's payload does not match its recorded checksum. Other
    /// entries remain readable.
    #[error("checksum mismatch for entry {key}")]
    ChecksumMismatch { key: String },

    /// The requested key is not in the archive.
    #[error("entry {0} not found in archive")]
    EntryNotFound(String),

    /// The same key was appended twice while writing.
    #[error("duplicate entry key {0}")]
    DuplicateKey(String),
}

/// One index record: where an entry's payload lives and its checksum.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRecord {
    key: String,
    offset: u64,
    len: u64,
    checksum: [u8; 32],
}

/// Streaming archive builder.
pub struct ArchiveWriter {
    file: File,
    records: Vec<IndexRecord>,
    keys: HashMap<String, ()>,
    offset: u64,
}

impl ArchiveWriter {
    /// Creates a new archive at `path`, truncating any existing file.
    pub fn create(path: &Path) -> Result<Self, ArchiveError> {
        let mut file = File::create(path)?;
        file.write_all(MAGIC)?;
        file.write_all(&VERSION.to_le_bytes())?;
        file.write_all(&[0u8; 2])?; // reserved flags
        Ok(Self {
            file,
            records: Vec::new(),
            keys: HashMap::new(),
            offset: HEADER_LEN,
        })
    }

    /// Appends one entry. Payloads land in the file in call order.
    pub fn append(&mut self, key: &str, payload: &[u8]) -> Result<(), ArchiveError> {
        if self.keys.insert(key.to_string(), ()).is_some() {
            return Err(ArchiveError::DuplicateKey(key.to_string()));
        }
        self.file.write_all(payload)?;
        self.records.push(IndexRecord {
            key: key.to_string(),
            offset: self.offset,
            len: payload.len() as u64,
            checksum: Sha256::digest(payload).into(),
        });
        self.offset += payload.len() as u64;
        Ok(())
    }

    /// Number of entries appended so far.
    pub fn entry_count(&self) -> usize {
        self.records.len()
    }

    /// Writes the index and footer and durably closes the archive.
    pub fn finish(mut self) -> Result<(), ArchiveError> {
        let index = bincode::serialize(&self.records)
            .map_err(|e| ArchiveError::CorruptArchive(format!("index encoding failed: {e}")))?;
        let checksum: [u8; 32] = Sha256::digest(&index).into();
        self.file.write_all(&index)?;
        self.file.write_all(&self.offset.to_le_bytes())?;
        self.file.write_all(&(index.len() as u64).to_le_bytes())?;
        self.file.write_all(&checksum)?;
        self.file.write_all(MAGIC)?;
        self.file.sync_all()?;
        debug!(entries = self.records.len(), "archive finished");
        Ok(())
    }
}

/// Read-only view of a packed archive.
pub struct ArchiveReader {
    file: Mutex<File>,
    index: HashMap<String, IndexRecord>,
}

impl ArchiveReader {
    /// Opens an archive and loads its index into memory.
    ///
    /// Any damage to the header, footer, or index makes the whole file
    /// report [`ArchiveError::CorruptArchive`]; per-entry damage is only
    /// detected (and isolated) at [`ArchiveReader::get`] time.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < HEADER_LEN + FOOTER_LEN {
            return Err(ArchiveError::CorruptArchive("file too short".into()));
        }

        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header)?;
        if &header[0..4] != MAGIC {
            return Err(ArchiveError::CorruptArchive("bad magic".into()));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(ArchiveError::CorruptArchive(format!(
                "unsupported version {version}"
            )));
        }

        file.seek(SeekFrom::End(-(FOOTER_LEN as i64)))?;
        let mut footer = [0u8; FOOTER_LEN as usize];
        file.read_exact(&mut footer)?;
        if &footer[48..52] != MAGIC {
            return Err(ArchiveError::CorruptArchive("bad footer magic".into()));
        }
        let index_offset = u64::from_le_bytes(footer[0..8].try_into().expect("slice len"));
        let index_len = u64::from_le_bytes(footer[8..16].try_into().expect("slice len"));
        let index_checksum: [u8; 32] = footer[16..48].try_into().expect("slice len");
        if index_offset < HEADER_LEN || index_offset + index_len + FOOTER_LEN != file_len {
            return Err(ArchiveError::CorruptArchive("index out of bounds".into()));
        }

        file.seek(SeekFrom::Start(index_offset))?;
        let mut index_bytes = vec![0u8; index_len as usize];
        file.read_exact(&mut index_bytes)?;
        let actual: [u8; 32] = Sha256::digest(&index_bytes).into();
        if actual != index_checksum {
            return Err(ArchiveError::CorruptArchive("index checksum mismatch".into()));
        }
        let records: Vec<IndexRecord> = bincode::deserialize(&index_bytes)
            .map_err(|e| ArchiveError::CorruptArchive(format!("index decoding failed: {e}")))?;

        let mut index = HashMap::with_capacity(records.len());
        for record in records {
            if record.offset + record.len > index_offset {
                return Err(ArchiveError::CorruptArchive(format!(
                    "entry {} extends past data section",
                    record.key
                )));
            }
            index.insert(record.key.clone(), record);
        }
        debug!(entries = index.len(), "archive opened");
        Ok(Self {
            file: Mutex::new(file),
            index,
        })
    }

    /// Number of entries in the archive.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if the archive holds no entries.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns true if the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Iterates over all entry keys, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    /// Reads and verifies one entry.
    pub fn get(&self, key: &str) -> Result<Bytes, ArchiveError> {
        let record = self
            .index
            .get(key)
            .ok_or_else(|| ArchiveError::EntryNotFound(key.to_string()))?;
        let mut payload = vec![0u8; record.len as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(record.offset))?;
            file.read_exact(&mut payload)?;
        }
        let actual: [u8; 32] = Sha256::digest(&payload).into();
        if actual != record.checksum {
            return Err(ArchiveError::ChecksumMismatch {
                key: key.to_string(),
            });
        }
        Ok(Bytes::from(payload))
    }
}
