//! File-based key-value store for persistent storage.
//!
//! The store is an append-only log of length-prefixed CBOR entries:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ len: u32 LE  │ CBOR { key, value | null }   │  ... repeated
//! └──────────────┴──────────────────────────────┘
//! ```
//!
//! On open the log is replayed into an in-memory index. A removal is an entry
//! whose value is `null`. A torn entry at the tail (a crash mid-write) is
//! truncated away. Stale entries are reclaimed by [`FileStore::compact`].

use crate::backend::KeyValueStore;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Size of the length prefix in front of every entry.
const FRAME_HEADER: usize = 4;

/// Stale entries tolerated before `set`/`remove` compact automatically.
const AUTO_COMPACT_MIN_STALE: usize = 1024;

#[derive(Debug, Serialize, Deserialize)]
struct LogEntry {
    key: String,
    value: Option<Vec<u8>>,
}

impl LogEntry {
    fn encode_frame(&self) -> StorageResult<Vec<u8>> {
        let mut payload = Vec::new();
        ciborium::into_writer(self, &mut payload)
            .map_err(|e| StorageError::Codec(e.to_string()))?;
        let len = u32::try_from(payload.len())
            .map_err(|_| StorageError::Codec(format!("entry too large: {} bytes", payload.len())))?;

        let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }
}

#[derive(Debug)]
struct FileInner {
    file: File,
    index: BTreeMap<String, Vec<u8>>,
    size: u64,
    stale_entries: usize,
}

impl FileInner {
    fn write_frame(&mut self, frame: &[u8]) -> StorageResult<()> {
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(frame)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Cuts the log back to the last fully indexed entry.
    fn discard_unindexed_tail(&mut self) -> StorageResult<()> {
        self.file.set_len(self.size)?;
        self.file.seek(SeekFrom::Start(self.size))?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// A crash-durable key-value store backed by a single log file.
///
/// # Durability
///
/// Every `set` and `remove` appends one entry and calls `File::sync_data()`
/// before returning, so an acknowledged write survives process termination.
///
/// # Locking
///
/// An advisory lock on `<path>.lock` is held for the lifetime of the store.
/// Opening the same path twice fails with [`StorageError::Locked`].
///
/// # Example
///
/// ```no_run
/// use pourlog_storage::{FileStore, KeyValueStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("visits.log")).unwrap();
/// store.set("visit/1", b"payload").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: Mutex<FileInner>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store at the given path, replaying its log.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, another process holds
    /// the lock, or a non-tail entry fails to decode.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let lock_path = lock_path_for(path);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.display().to_string()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let (index, valid_len, stale_entries) = replay(&mut file)?;
        let on_disk = file.metadata()?.len();
        if valid_len < on_disk {
            warn!(
                path = %path.display(),
                valid_len,
                on_disk,
                "truncating torn entry at end of store"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        debug!(path = %path.display(), keys = index.len(), "opened file store");

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(FileInner {
                file,
                index,
                size: valid_len,
                stale_entries,
            }),
            _lock_file: lock_file,
        })
    }

    /// Opens or creates a store, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the store cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current size of the log in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    /// Rewrites the log so it holds exactly one entry per live key.
    ///
    /// The new log is written to a temporary file, synced, and renamed over
    /// the old one, so a crash during compaction leaves the old log intact.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be written or renamed.
    pub fn compact(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        self.compact_locked(&mut inner)
    }

    fn compact_locked(&self, inner: &mut FileInner) -> StorageResult<()> {
        let tmp_path = self.path.with_extension("compact");
        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        let mut size = 0u64;
        for (key, value) in &inner.index {
            let frame = LogEntry {
                key: key.clone(),
                value: Some(value.clone()),
            }
            .encode_frame()?;
            tmp.write_all(&frame)?;
            size += frame.len() as u64;
        }
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)?;
        inner.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        inner.size = size;
        inner.stale_entries = 0;

        debug!(path = %self.path.display(), size, "compacted file store");
        Ok(())
    }

    fn append(&self, entry: LogEntry) -> StorageResult<()> {
        let frame = entry.encode_frame()?;
        let mut inner = self.inner.lock();

        if let Err(e) = inner.write_frame(&frame) {
            // A short write must not stay in front of the next entry
            if let Err(truncate_err) = inner.discard_unindexed_tail() {
                warn!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "failed to discard partial entry"
                );
            }
            return Err(e);
        }
        inner.size += frame.len() as u64;

        let replaced = match entry.value {
            Some(value) => inner.index.insert(entry.key, value).is_some(),
            None => inner.index.remove(&entry.key).is_some(),
        };
        if replaced {
            inner.stale_entries += 1;
        }

        if inner.stale_entries >= AUTO_COMPACT_MIN_STALE && inner.stale_entries > inner.index.len()
        {
            self.compact_locked(&mut inner)?;
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.inner.lock().index.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.append(LogEntry {
            key: key.to_string(),
            value: Some(value.to_vec()),
        })
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        if !self.inner.lock().index.contains_key(key) {
            return Ok(false);
        }
        self.append(LogEntry {
            key: key.to_string(),
            value: None,
        })?;
        Ok(true)
    }

    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .index
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn flush(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner.file.flush()?;
        inner.file.sync_all()?;
        Ok(())
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Replays the log. Returns the index, the length of the valid prefix, and
/// the number of entries shadowed by later ones.
fn replay(file: &mut File) -> StorageResult<(BTreeMap<String, Vec<u8>>, u64, usize)> {
    let mut bytes = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut bytes)?;

    let mut index = BTreeMap::new();
    let mut stale = 0usize;
    let mut offset = 0usize;

    while offset < bytes.len() {
        let header_end = offset + FRAME_HEADER;
        if header_end > bytes.len() {
            break;
        }
        let mut len_bytes = [0u8; FRAME_HEADER];
        len_bytes.copy_from_slice(&bytes[offset..header_end]);
        let len = u32::from_le_bytes(len_bytes) as usize;

        let end = header_end + len;
        if end > bytes.len() {
            break;
        }

        let entry: LogEntry = match ciborium::from_reader(&bytes[header_end..end]) {
            Ok(entry) => entry,
            // A complete frame that fails to decode at the tail is a torn write
            Err(_) if end == bytes.len() => break,
            Err(e) => {
                return Err(StorageError::Corrupted(format!(
                    "undecodable entry at offset {offset}: {e}"
                )))
            }
        };

        let shadowed = match entry.value {
            Some(value) => index.insert(entry.key, value).is_some(),
            None => index.remove(&entry.key).is_some(),
        };
        if shadowed {
            stale += 1;
        }
        offset = end;
    }

    Ok((index, offset as u64, stale))
}
