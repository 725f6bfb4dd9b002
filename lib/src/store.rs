//! Durable key-value accumulation stores.
//!
//! [`LogStore`] is an append-only log behind a small versioned header:
//!
//! ```text
//! header: "ADKV" | u16 version | u16 reserved
//! entry:  op u8 | uvarint key_len | key | uvarint value_len | value | u32 crc
//! ```
//!
//! `op` is 1 for a set and 2 for a delete (with an empty value). The CRC covers
//! every byte of the entry before it. On open the log is replayed into an
//! in-memory key → offset index; a torn entry at the tail (from a crash
//! mid-write) is cut off, while a damaged entry followed by further entries
//! fails the open. Overwritten and deleted entries are dead bytes, and
//! the log is rewritten with only live entries once they outweigh the live
//! bytes by the configured ratio. The file is exclusively locked while open.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::prelude::*;
use fs2::FileExt;
use log::{debug, info, warn};
use runsort::codec::{push_uvarint, read_uvarint_from, Crc32};
use runsort::SortError;
use serde::{Deserialize, Serialize};

use crate::deprecation::DeprecatedNodeSet;
use crate::errors::{FileError, StoreLockedError};
use crate::record::StoredRecord;

const MAGIC: &[u8; 4] = b"ADKV";
const VERSION: u16 = 1;
const HEADER_LEN: u64 = 8;
const OP_SET: u8 = 1;
const OP_DELETE: u8 = 2;

/// Keys starting with NUL are reserved for store bookkeeping.
pub const CHECKPOINT_KEY: &[u8] = b"\0checkpoint";

pub const DEFAULT_COMPACT_RATIO: f64 = 1.0;

/// The store interface the streaming and bucketed strategies write through.
pub trait KvStore: Send {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()>;
    /// Returns whether the key was present.
    fn delete(&mut self, key: &[u8]) -> Result<bool>;
    /// All keys in ascending byte order, reserved keys included.
    fn keys(&self) -> Vec<Vec<u8>>;
    fn len(&self) -> usize;
    fn flush(&mut self) -> Result<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of accumulated records, skipping bookkeeping entries.
    fn record_keys(&self) -> Vec<Vec<u8>> {
        self.keys()
            .into_iter()
            .filter(|k| k.first() != Some(&0))
            .collect()
    }

    fn checkpoint(&mut self) -> Result<Option<StoreCheckpoint>> {
        match self.get(CHECKPOINT_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_checkpoint(&mut self, source_offset: u64) -> Result<()> {
        let checkpoint = StoreCheckpoint {
            source_offset,
            updated_at: Utc::now(),
        };
        self.set(CHECKPOINT_KEY, &serde_json::to_vec(&checkpoint)?)
    }
}

/// Progress marker persisted alongside the accumulated records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreCheckpoint {
    /// Input lines fully accumulated into the store.
    pub source_offset: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    fn keys(&self) -> Vec<Vec<u8>> {
        self.entries.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    entry_len: u64,
    value_offset: u64,
    value_len: usize,
}

/// Byte accounting of a [`LogStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub entries: usize,
    pub live_bytes: u64,
    pub dead_bytes: u64,
}

pub struct LogStore {
    path: PathBuf,
    file: File,
    index: BTreeMap<Vec<u8>, Slot>,
    end: u64,
    live_bytes: u64,
    dead_bytes: u64,
    compact_ratio: f64,
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("path", &self.path)
            .field("entries", &self.index.len())
            .field("end", &self.end)
            .finish()
    }
}

fn uvarint_len(mut v: u64) -> u64 {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

fn encode_entry(op: u8, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key.len() + value.len() + 16);
    buf.push(op);
    push_uvarint(key.len() as u64, &mut buf);
    buf.extend_from_slice(key);
    push_uvarint(value.len() as u64, &mut buf);
    buf.extend_from_slice(value);
    let mut crc = Crc32::new();
    crc.update(&buf);
    buf.extend_from_slice(&crc.finalize().to_le_bytes());
    buf
}

struct ScannedEntry {
    op: u8,
    key: Vec<u8>,
    value_len: usize,
    entry_len: u64,
}

/// Length prefixes of a torn entry can be garbage, so never preallocate them.
fn read_bytes<R: Read>(r: &mut R, len: u64) -> std::result::Result<Vec<u8>, SortError> {
    let mut buf = Vec::new();
    r.by_ref().take(len).read_to_end(&mut buf)?;
    if (buf.len() as u64) < len {
        return Err(SortError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "entry extends past end of log",
        )));
    }
    Ok(buf)
}

fn is_eof(err: &SortError) -> bool {
    matches!(err, SortError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
}

enum Scan {
    Entry(ScannedEntry),
    End,
    /// The last entry stops short of its own length or fails its checksum
    /// while reaching exactly to the end of the file.
    Torn,
}

macro_rules! or_torn {
    ($read:expr) => {
        match $read {
            Ok(value) => value,
            Err(e) if is_eof(&e) => return Ok(Scan::Torn),
            Err(e) => return Err(e),
        }
    };
}

/// Read and verify one entry; `remaining` is the number of bytes from the
/// entry's start to the end of the log.
fn scan_entry<R: Read>(r: &mut R, remaining: u64) -> std::result::Result<Scan, SortError> {
    let mut op = [0u8; 1];
    if r.read(&mut op)? == 0 {
        return Ok(Scan::End);
    }
    if op[0] != OP_SET && op[0] != OP_DELETE {
        return Err(SortError::Corrupt(format!("unknown op {}", op[0])));
    }
    let mut crc = Crc32::new();
    crc.update(&op);
    let key_len = or_torn!(read_uvarint_from(r, &mut crc));
    let key = or_torn!(read_bytes(r, key_len));
    crc.update(&key);
    let value_len = or_torn!(read_uvarint_from(r, &mut crc));
    let value = or_torn!(read_bytes(r, value_len));
    crc.update(&value);
    let mut stored = [0u8; 4];
    or_torn!(r.read_exact(&mut stored).map_err(SortError::from));
    let entry_len =
        1 + uvarint_len(key_len) + key_len + uvarint_len(value_len) + value_len + 4;
    if u32::from_le_bytes(stored) != crc.finalize() {
        if entry_len == remaining {
            return Ok(Scan::Torn);
        }
        return Err(SortError::Corrupt(
            "entry checksum mismatch with intact entries after it".into(),
        ));
    }
    Ok(Scan::Entry(ScannedEntry {
        op: op[0],
        key,
        value_len: value_len as usize,
        entry_len,
    }))
}

impl LogStore {
    /// Open (or create) the log at `path` and take an exclusive lock on it.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| FileError {
                path: path.to_path_buf(),
                op: "open store",
            })?;
        file.try_lock_exclusive().map_err(|_| StoreLockedError {
            path: path.to_path_buf(),
        })?;
        let mut store = LogStore {
            path: path.to_path_buf(),
            file,
            index: BTreeMap::new(),
            end: HEADER_LEN,
            live_bytes: 0,
            dead_bytes: 0,
            compact_ratio: DEFAULT_COMPACT_RATIO,
        };
        store
            .load()
            .with_context(|| format!("Failed to load store {}", path.display()))?;
        Ok(store)
    }

    pub fn with_compact_ratio(mut self, ratio: f64) -> Self {
        self.compact_ratio = ratio;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entries: self.index.len(),
            live_bytes: self.live_bytes,
            dead_bytes: self.dead_bytes,
        }
    }

    fn load(&mut self) -> Result<()> {
        let len = self.file.metadata()?.len();
        if len == 0 {
            let mut header = Vec::with_capacity(HEADER_LEN as usize);
            header.extend_from_slice(MAGIC);
            header.extend_from_slice(&VERSION.to_le_bytes());
            header.extend_from_slice(&0u16.to_le_bytes());
            self.file.write_all(&header)?;
            self.file.sync_data()?;
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&self.file);
        let mut header = [0u8; HEADER_LEN as usize];
        reader
            .read_exact(&mut header)
            .map_err(|_| SortError::Invalid("short or invalid store header"))?;
        if &header[0..4] != MAGIC {
            return Err(SortError::Invalid("bad store magic").into());
        }
        if u16::from_le_bytes([header[4], header[5]]) != VERSION {
            return Err(SortError::Invalid("unsupported store version").into());
        }

        let mut offset = HEADER_LEN;
        let mut index: BTreeMap<Vec<u8>, Slot> = BTreeMap::new();
        let (mut live, mut dead) = (0u64, 0u64);
        loop {
            let scanned = scan_entry(&mut reader, len - offset)
                .with_context(|| format!("Corrupt store entry at offset {}", offset))?;
            let entry = match scanned {
                Scan::Entry(entry) => entry,
                Scan::End => break,
                Scan::Torn => {
                    warn!(
                        "Truncating torn tail of {} at offset {} ({} bytes)",
                        self.path.display(),
                        offset,
                        len - offset
                    );
                    break;
                }
            };
            if let Some(old) = index.remove(&entry.key) {
                live -= old.entry_len;
                dead += old.entry_len;
            }
            match entry.op {
                OP_SET => {
                    let value_offset = offset + entry.entry_len - 4 - entry.value_len as u64;
                    live += entry.entry_len;
                    index.insert(
                        entry.key,
                        Slot {
                            entry_len: entry.entry_len,
                            value_offset,
                            value_len: entry.value_len,
                        },
                    );
                }
                _ => dead += entry.entry_len,
            }
            offset += entry.entry_len;
        }
        drop(reader);

        if offset < len {
            self.file.set_len(offset)?;
            self.file.sync_data()?;
        }
        self.index = index;
        self.end = offset;
        self.live_bytes = live;
        self.dead_bytes = dead;
        debug!(
            "Loaded store {} with {} entries ({} live / {} dead bytes)",
            self.path.display(),
            self.index.len(),
            live,
            dead
        );
        Ok(())
    }

    fn append(&mut self, entry: &[u8]) -> Result<u64> {
        let at = self.end;
        self.file.seek(SeekFrom::Start(at))?;
        self.file.write_all(entry).with_context(|| FileError {
            path: self.path.clone(),
            op: "append to store",
        })?;
        self.end += entry.len() as u64;
        Ok(at)
    }

    fn read_slot(&mut self, slot: Slot) -> Result<Vec<u8>> {
        let mut value = vec![0u8; slot.value_len];
        self.file.seek(SeekFrom::Start(slot.value_offset))?;
        self.file.read_exact(&mut value)?;
        Ok(value)
    }

    fn should_compact(&self) -> bool {
        self.dead_bytes > 0 && self.dead_bytes as f64 > self.compact_ratio * self.live_bytes as f64
    }

    /// Rewrite the log with live entries only, in key order.
    pub fn compact(&mut self) -> Result<StoreStats> {
        let before = self.stats();
        let tmp_path = self.path.with_extension("compacting");
        let mut out = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .with_context(|| FileError {
                path: tmp_path.clone(),
                op: "create",
            })?;
        out.try_lock_exclusive().map_err(|_| StoreLockedError {
            path: tmp_path.clone(),
        })?;

        let mut buf = Vec::with_capacity(HEADER_LEN as usize);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        let mut index = BTreeMap::new();
        let mut offset = HEADER_LEN;
        let slots: Vec<(Vec<u8>, Slot)> =
            self.index.iter().map(|(k, s)| (k.clone(), *s)).collect();
        for (key, slot) in slots {
            let value = self.read_slot(slot)?;
            let entry = encode_entry(OP_SET, &key, &value);
            let entry_len = entry.len() as u64;
            index.insert(
                key,
                Slot {
                    entry_len,
                    value_offset: offset + entry_len - 4 - value.len() as u64,
                    value_len: value.len(),
                },
            );
            buf.extend_from_slice(&entry);
            offset += entry_len;
            if buf.len() >= 1 << 20 {
                out.write_all(&buf)?;
                buf.clear();
            }
        }
        out.write_all(&buf)?;
        out.sync_all()?;
        fs::rename(&tmp_path, &self.path).with_context(|| FileError {
            path: self.path.clone(),
            op: "replace",
        })?;

        self.file = out;
        self.index = index;
        self.end = offset;
        self.live_bytes = offset - HEADER_LEN;
        self.dead_bytes = 0;
        info!(
            "Compacted store {}: {} -> {} bytes",
            self.path.display(),
            HEADER_LEN + before.live_bytes + before.dead_bytes,
            offset
        );
        Ok(self.stats())
    }
}

impl KvStore for LogStore {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.index.get(key).copied() {
            Some(slot) => self.read_slot(slot).map(Some),
            None => Ok(None),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let entry = encode_entry(OP_SET, key, value);
        let entry_len = entry.len() as u64;
        let at = self.append(&entry)?;
        let slot = Slot {
            entry_len,
            value_offset: at + entry_len - 4 - value.len() as u64,
            value_len: value.len(),
        };
        if let Some(old) = self.index.insert(key.to_vec(), slot) {
            self.live_bytes -= old.entry_len;
            self.dead_bytes += old.entry_len;
        }
        self.live_bytes += entry_len;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let Some(old) = self.index.remove(key) else {
            return Ok(false);
        };
        let entry = encode_entry(OP_DELETE, key, &[]);
        self.append(&entry)?;
        self.live_bytes -= old.entry_len;
        self.dead_bytes += old.entry_len + entry.len() as u64;
        Ok(true)
    }

    fn keys(&self) -> Vec<Vec<u8>> {
        self.index.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn flush(&mut self) -> Result<()> {
        self.file.sync_data().with_context(|| FileError {
            path: self.path.clone(),
            op: "sync",
        })?;
        if self.should_compact() {
            self.compact()?;
        }
        Ok(())
    }
}

/// Delete every record whose admin-metadata target is deprecated.
/// Returns the number of records removed.
pub fn prune_deprecated(store: &mut dyn KvStore) -> Result<usize> {
    let keys = store.record_keys();
    let mut records = Vec::with_capacity(keys.len());
    let mut deprecated = DeprecatedNodeSet::new();
    for key in keys {
        let Some(bytes) = store.get(&key)? else {
            continue;
        };
        let record = StoredRecord::decode(&bytes)?;
        deprecated.observe_record(&record);
        records.push((key, record));
    }
    let mut removed = 0;
    for (key, record) in records {
        if deprecated.is_deprecated(&record) && store.delete(&key)? {
            removed += 1;
        }
    }
    store.flush()?;
    info!(
        "Pruned {} records linked to {} deprecated nodes",
        removed,
        deprecated.len()
    );
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Predicate, SubjectRecord};

    #[test]
    fn memory_store_basics() {
        let mut store = MemoryStore::new();
        store.set(b"b", b"2").unwrap();
        store.set(b"a", b"1").unwrap();
        store.save_checkpoint(7).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.record_keys(), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(store.checkpoint().unwrap().unwrap().source_offset, 7);
        assert!(store.delete(b"a").unwrap());
        assert!(!store.delete(b"a").unwrap());
    }

    #[test]
    fn log_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acc.log");
        {
            let mut store = LogStore::open(&path).unwrap();
            store.set(b"k1", b"v1").unwrap();
            store.set(b"k2", b"v2").unwrap();
            store.set(b"k1", b"v1-new").unwrap();
            store.delete(b"k2").unwrap();
            store.flush().unwrap();
        }
        let mut store = LogStore::open(&path).unwrap();
        assert_eq!(store.get(b"k1").unwrap(), Some(b"v1-new".to_vec()));
        assert_eq!(store.get(b"k2").unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn log_store_is_locked_while_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acc.log");
        let _held = LogStore::open(&path).unwrap();
        let err = LogStore::open(&path).unwrap_err();
        assert!(err.downcast_ref::<StoreLockedError>().is_some());
    }

    #[test]
    fn torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acc.log");
        {
            let mut store = LogStore::open(&path).unwrap();
            store.set(b"good", b"value").unwrap();
            store.flush().unwrap();
        }
        let intact = fs::metadata(&path).unwrap().len();
        // half of a second entry
        let partial = encode_entry(OP_SET, b"torn", b"partial value");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&partial[..partial.len() / 2]).unwrap();
        drop(file);

        let mut store = LogStore::open(&path).unwrap();
        assert_eq!(store.get(b"good").unwrap(), Some(b"value".to_vec()));
        assert_eq!(store.get(b"torn").unwrap(), None);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact);
        store.set(b"after", b"ok").unwrap();
        drop(store);
        assert_eq!(LogStore::open(&path).unwrap().len(), 2);
    }

    #[test]
    fn damaged_entry_before_the_tail_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acc.log");
        {
            let mut store = LogStore::open(&path).unwrap();
            store.set(b"k1", b"v1").unwrap();
            store.set(b"k2", b"v2").unwrap();
            store.set(b"k3", b"v3").unwrap();
            store.flush().unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        let before = bytes.len() as u64;
        // first byte of the value of k1
        let at = HEADER_LEN as usize + 1 + 1 + 2 + 1;
        assert_eq!(bytes[at], b'v');
        bytes[at] = b'x';
        fs::write(&path, &bytes).unwrap();

        let err = LogStore::open(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SortError>(),
            Some(SortError::Corrupt(_))
        ));
        assert_eq!(fs::metadata(&path).unwrap().len(), before);
    }

    #[test]
    fn damaged_final_entry_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acc.log");
        {
            let mut store = LogStore::open(&path).unwrap();
            store.set(b"k1", b"v1").unwrap();
            store.set(b"k2", b"v2").unwrap();
            store.flush().unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 5;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let store = LogStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(fs::metadata(&path).unwrap().len(), bytes.len() as u64 - 11);
    }

    #[test]
    fn compaction_drops_dead_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acc.log");
        let mut store = LogStore::open(&path).unwrap().with_compact_ratio(0.5);
        for i in 0..20 {
            store.set(b"hot", format!("value {i}").as_bytes()).unwrap();
        }
        store.set(b"cold", b"kept").unwrap();
        assert!(store.stats().dead_bytes > 0);
        store.flush().unwrap();
        let stats = store.stats();
        assert_eq!(stats.dead_bytes, 0);
        assert_eq!(stats.entries, 2);
        assert_eq!(fs::metadata(&path).unwrap().len(), HEADER_LEN + stats.live_bytes);
        assert_eq!(store.get(b"hot").unwrap(), Some(b"value 19".to_vec()));
        drop(store);

        let mut reopened = LogStore::open(&path).unwrap();
        assert_eq!(reopened.get(b"cold").unwrap(), Some(b"kept".to_vec()));
        assert!(!dir.path().join("acc.compacting").exists());
    }

    #[test]
    fn bad_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acc.log");
        fs::write(&path, b"NOTASTORE").unwrap();
        assert!(LogStore::open(&path).is_err());
    }

    #[test]
    fn prune_removes_linked_records() {
        let mut store = MemoryStore::new();
        let mut node = SubjectRecord::new("_:m1");
        node.insert(Predicate::RecordStatus, "deprecated".into());
        let mut stale = SubjectRecord::new("http://id.loc.gov/authorities/subjects/sh1");
        stale.insert(Predicate::AdminMetadata, "_:m1".into());
        let fresh = SubjectRecord::new("http://id.loc.gov/authorities/subjects/sh2");
        for record in [&node, &stale, &fresh] {
            store
                .set(record.subject().as_bytes(), &StoredRecord::encode(record).unwrap())
                .unwrap();
        }
        store.save_checkpoint(3).unwrap();

        assert_eq!(prune_deprecated(&mut store).unwrap(), 1);
        assert_eq!(store.get(stale.subject().as_bytes()).unwrap(), None);
        assert!(store.get(fresh.subject().as_bytes()).unwrap().is_some());
        assert!(store.checkpoint().unwrap().is_some());
    }
}
