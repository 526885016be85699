//! Append-only persistence for cache shards.
//!
//! Mutations are framed as fixed-header records and appended to a single
//! data file per group. An in-memory index maps each live key to the
//! absolute offset of its latest PUT record; replaying the file from the
//! start reconstructs that index exactly. Compaction rewrites the file to
//! live records only via a rename-based rotation, and backups are
//! timestamped copies of the active file.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use bytes::{Buf, BufMut};
use chrono::Utc;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Encoded record header: key_size (u32) | value_size (u32) | mark (u32) |
/// timestamp_ms (u64), all big-endian.
pub const HEADER_SIZE: usize = 20;

pub const DATA_FILE_NAME: &str = "append.data";
const MERGE_FILE_NAME: &str = "append.data.merge";
const BACKUP_FILE_NAME: &str = "append.data.bak";

const LOCK_MSG: &str = "write sequence lock poisoned";

/// Whether a record stores a value or tombstones one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Put,
    Del,
}

impl Mark {
    fn to_wire(self) -> u32 {
        match self {
            Mark::Put => 0,
            Mark::Del => 1,
        }
    }

    fn from_wire(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(Mark::Put),
            1 => Ok(Mark::Del),
            other => Err(Error::Decode(format!("unknown record mark {other}"))),
        }
    }
}

/// A single log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Vec<u8>,
    pub mark: Mark,
    pub timestamp: u64,
}

impl Entry {
    pub fn put(key: &str, value: &[u8]) -> Self {
        Self {
            key: key.to_owned(),
            value: value.to_vec(),
            mark: Mark::Put,
            timestamp: Utc::now().timestamp_millis() as u64,
        }
    }

    /// Tombstones carry no value bytes.
    pub fn del(key: &str) -> Self {
        Self {
            key: key.to_owned(),
            value: Vec::new(),
            mark: Mark::Del,
            timestamp: Utc::now().timestamp_millis() as u64,
        }
    }

    /// Encoded size, header included.
    pub fn size(&self) -> u64 {
        (HEADER_SIZE + self.key.len() + self.value.len()) as u64
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size() as usize);
        buf.put_u32(self.key.len() as u32);
        buf.put_u32(self.value.len() as u32);
        buf.put_u32(self.mark.to_wire());
        buf.put_u64(self.timestamp);
        buf.put_slice(self.key.as_bytes());
        buf.put_slice(&self.value);
        buf
    }
}

/// Decoded record header; payloads are read separately at known offsets.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub key_size: u32,
    pub value_size: u32,
    pub mark: Mark,
    pub timestamp: u64,
}

impl Header {
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::Decode(format!(
                "header needs {HEADER_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        Ok(Self {
            key_size: buf.get_u32(),
            value_size: buf.get_u32(),
            mark: Mark::from_wire(buf.get_u32())?,
            timestamp: buf.get_u64(),
        })
    }
}

/// The active data file plus its logical append offset.
///
/// Appends go through the write half of the lock and bump `offset` by the
/// record size; reads are positional and leave it alone. The lock also
/// keeps positional reads from racing a rename-based rotation.
pub struct LogFile {
    path: PathBuf,
    file: RwLock<File>,
    offset: AtomicU64,
}

impl LogFile {
    pub fn open(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;
        let size = file.metadata().map_err(|e| Error::io(&path, e))?.len();
        Ok(Self {
            path,
            file: RwLock::new(file),
            offset: AtomicU64::new(size),
        })
    }

    /// Append a record, returning the offset it was written at.
    pub fn append(&self, entry: &Entry) -> Result<u64> {
        let data = entry.encode();
        let file = self.file.write().expect("log file lock poisoned");
        let offset = self.offset.load(Ordering::Acquire);
        file.write_all_at(&data, offset)
            .map_err(|e| Error::io(&self.path, e))?;
        self.offset.fetch_add(entry.size(), Ordering::AcqRel);
        Ok(offset)
    }

    /// Read the record starting at `offset`.
    pub fn read(&self, offset: u64) -> Result<Entry> {
        self.read_entry(offset)?
            .ok_or_else(|| Error::Decode(format!("unexpected end of log at offset {offset}")))
    }

    /// Read the record at `offset`; `Ok(None)` is a clean end of log
    /// (no header bytes there). Running out of bytes inside a record is a
    /// decode error.
    pub fn read_entry(&self, offset: u64) -> Result<Option<Entry>> {
        let file = self.file.read().expect("log file lock poisoned");
        let mut header = [0u8; HEADER_SIZE];
        match file.read_exact_at(&mut header, offset) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(Error::io(&self.path, e)),
        }
        let header = Header::decode(&header)?;

        let mut key = vec![0u8; header.key_size as usize];
        file.read_exact_at(&mut key, offset + HEADER_SIZE as u64)
            .map_err(|e| mid_record(&self.path, e))?;
        let mut value = vec![0u8; header.value_size as usize];
        file.read_exact_at(
            &mut value,
            offset + HEADER_SIZE as u64 + u64::from(header.key_size),
        )
        .map_err(|e| mid_record(&self.path, e))?;

        let key =
            String::from_utf8(key).map_err(|_| Error::Decode("record key is not UTF-8".into()))?;
        Ok(Some(Entry {
            key,
            value,
            mark: header.mark,
            timestamp: header.timestamp,
        }))
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn mid_record(path: &Path, e: io::Error) -> Error {
    if e.kind() == ErrorKind::UnexpectedEof {
        Error::Decode("record truncated mid-payload".into())
    } else {
        Error::io(path, e)
    }
}

struct SequenceInner {
    file: LogFile,
    index: BTreeMap<String, u64>,
}

/// Sequential writer over one group's data file.
///
/// Holds the active [`LogFile`] and the key → offset index of live PUT
/// records. All operations take the sequence lock; the file's own lock
/// nests inside it and never the other way around.
pub struct WriteSequence {
    dir: PathBuf,
    inner: RwLock<SequenceInner>,
}

impl WriteSequence {
    /// Open (creating if needed) the data file under `dir` and rebuild the
    /// index from it.
    ///
    /// When `seed` names a file other than the canonical data file, the
    /// canonical file is first moved aside to `append.data.temp.<ms>` (if
    /// present) and the seed copied into its place before replay.
    pub fn open(dir: impl Into<PathBuf>, seed: Option<&Path>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        let dir = dir.canonicalize().map_err(|e| Error::io(&dir, e))?;
        let data_path = dir.join(DATA_FILE_NAME);

        if let Some(seed) = seed {
            let seed = seed.canonicalize().map_err(|e| Error::io(seed, e))?;
            if seed != data_path {
                if data_path.exists() {
                    let displaced = dir.join(format!(
                        "{DATA_FILE_NAME}.temp.{}",
                        Utc::now().timestamp_millis()
                    ));
                    fs::rename(&data_path, &displaced).map_err(|e| Error::io(&data_path, e))?;
                }
                fs::copy(&seed, &data_path).map_err(|e| Error::io(&seed, e))?;
                info!(seed = %seed.display(), "seeded data file");
            }
        }

        let file = LogFile::open(data_path)?;
        let index = Self::replay(&file)?;
        debug!(dir = %dir.display(), keys = index.len(), "loaded log index");
        Ok(Self {
            dir,
            inner: RwLock::new(SequenceInner { file, index }),
        })
    }

    /// Rebuild the live index by scanning the file front to back: PUT
    /// stores the record offset (last write wins), DEL drops the key.
    fn replay(file: &LogFile) -> Result<BTreeMap<String, u64>> {
        let mut index = BTreeMap::new();
        let end = file.offset();
        let mut offset = 0u64;
        while offset < end {
            match file.read_entry(offset)? {
                None => break,
                Some(entry) => {
                    let size = entry.size();
                    match entry.mark {
                        Mark::Put => {
                            index.insert(entry.key, offset);
                        }
                        Mark::Del => {
                            index.remove(&entry.key);
                        }
                    }
                    offset += size;
                }
            }
        }
        Ok(index)
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let entry = Entry::put(key, value);
        let mut inner = self.inner.write().expect(LOCK_MSG);
        let offset = inner.file.append(&entry)?;
        inner.index.insert(key.to_owned(), offset);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        let inner = self.inner.read().expect(LOCK_MSG);
        let offset = *inner
            .index
            .get(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_owned()))?;
        let entry = inner.file.read(offset)?;
        Ok(entry.value)
    }

    /// Append a tombstone and drop the key from the index. Absent keys are
    /// a no-op. The tombstone's own offset is never indexed.
    pub fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.write().expect(LOCK_MSG);
        if !inner.index.contains_key(key) {
            return Ok(());
        }
        inner.file.append(&Entry::del(key))?;
        inner.index.remove(key);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().expect(LOCK_MSG).index.contains_key(key)
    }

    /// Every key currently live in the index.
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .read()
            .expect(LOCK_MSG)
            .index
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect(LOCK_MSG).index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compact the log down to live records.
    ///
    /// Live records are copied into `append.data.merge` with a fresh
    /// index; the active file is then rotated out through
    /// `append.data.bak` and the merged file renamed into its place. The
    /// canonical name always points at either the old or the new file; if
    /// reopening the new file fails the backup is renamed back.
    pub fn merge(&self) -> Result<()> {
        let mut inner = self.inner.write().expect(LOCK_MSG);
        if inner.file.offset() == 0 {
            return Ok(());
        }

        let merge_path = self.dir.join(MERGE_FILE_NAME);
        let merge_file = LogFile::open(merge_path.clone())?;
        let mut new_index = BTreeMap::new();
        let copied: Result<()> = inner.index.iter().try_for_each(|(key, &offset)| {
            let entry = inner.file.read(offset)?;
            let new_offset = merge_file.append(&entry)?;
            new_index.insert(key.clone(), new_offset);
            Ok(())
        });
        if let Err(e) = copied {
            drop(merge_file);
            let _ = fs::remove_file(&merge_path);
            return Err(e);
        }
        drop(merge_file);

        let data_path = self.dir.join(DATA_FILE_NAME);
        let backup_path = self.dir.join(BACKUP_FILE_NAME);
        // The merge file must not outlive a failed rotation: a leftover
        // would be reopened at its stale size by the next merge and its
        // dead records would survive the rewrite.
        if let Err(e) = fs::rename(&data_path, &backup_path) {
            let _ = fs::remove_file(&merge_path);
            return Err(Error::io(&data_path, e));
        }
        if let Err(e) = fs::rename(&merge_path, &data_path) {
            let _ = fs::rename(&backup_path, &data_path);
            let _ = fs::remove_file(&merge_path);
            return Err(Error::io(&merge_path, e));
        }
        match LogFile::open(data_path.clone()) {
            Ok(file) => {
                inner.file = file;
                inner.index = new_index;
                let _ = fs::remove_file(&backup_path);
                info!(file = %data_path.display(), keys = inner.index.len(), "log merged");
                Ok(())
            }
            Err(e) => {
                let _ = fs::rename(&backup_path, &data_path);
                Err(e)
            }
        }
    }

    /// Copy the active file to `path`, defaulting to a timestamped
    /// `append.data.<epoch_ms>` next to it. Returns the path written.
    pub fn backup(&self, path: Option<&Path>) -> Result<PathBuf> {
        let inner = self.inner.write().expect(LOCK_MSG);
        let dest = match path {
            Some(p) => p.to_path_buf(),
            None => self.dir.join(format!(
                "{DATA_FILE_NAME}.{}",
                Utc::now().timestamp_millis()
            )),
        };
        let mut src = File::open(inner.file.path()).map_err(|e| Error::io(inner.file.path(), e))?;
        let mut out = File::create(&dest).map_err(|e| Error::io(&dest, e))?;
        let bytes = io::copy(&mut src, &mut out).map_err(|e| Error::io(&dest, e))?;
        info!(file = %dest.display(), bytes, "backup written");
        Ok(dest)
    }
}
