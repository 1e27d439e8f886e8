//! Append-only log backend.
//!
//! Every mutation is one frame:
//!
//! ```text
//! | len:u32 | crc32(len):u32 | bincode LogEntry (len bytes) | crc32(entry):u32 |
//! ```
//!
//! All integers are little-endian. Opening replays all frames into an
//! in-memory map; reads never touch the file. A crash mid-append leaves a
//! prefix of the last frame, which is cut off at open. Any frame that fails
//! its checksum or decode and is not the last one in the file is
//! [`StoreError::Corrupted`] and the file is left untouched. Compaction
//! rewrites one `Put` per live key into a temporary file and renames it over
//! the log.

use super::memory::scan_map;
use super::{KvStore, StoreResult};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crc::{Crc, CRC_32_ISCSI};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const FRAME_HEADER_LEN: u64 = 8;
const FRAME_TRAILER_LEN: u64 = 4;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[derive(Debug, Clone, Serialize, Deserialize)]
enum LogEntry {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

struct Writer {
    file: File,
    /// Frames appended since open or the last compaction.
    appended: u64,
}

pub struct LogStore {
    path: PathBuf,
    writer: Mutex<Writer>,
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    sync_writes: bool,
    compact_after: Option<u64>,
}

impl LogStore {
    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;

        let (entries, frames) = replay(&path, &mut file)?;
        tracing::debug!(
            path = %path.display(),
            keys = entries.len(),
            frames,
            "replayed key-value log"
        );

        Ok(Self {
            path,
            writer: Mutex::new(Writer { file, appended: 0 }),
            entries: RwLock::new(entries),
            sync_writes: config.sync_writes,
            compact_after: config.compact_after,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn append(&self, writer: &mut Writer, entry: &LogEntry) -> StoreResult<()> {
        let frame = encode_entry(entry)?;
        writer
            .file
            .write_all(&frame)
            .map_err(|e| StoreError::io(&self.path, e))?;
        if self.sync_writes {
            writer
                .file
                .sync_data()
                .map_err(|e| StoreError::io(&self.path, e))?;
        }
        writer.appended += 1;
        Ok(())
    }

    fn maybe_compact(&self, writer: &mut Writer) -> StoreResult<()> {
        match self.compact_after {
            Some(threshold) if writer.appended >= threshold => self.compact_locked(writer),
            _ => Ok(()),
        }
    }

    /// Rewrite the log so it holds exactly one frame per live key.
    pub fn compact(&self) -> StoreResult<()> {
        let mut writer = self.writer.lock();
        self.compact_locked(&mut writer)
    }

    fn compact_locked(&self, writer: &mut Writer) -> StoreResult<()> {
        let tmp = self.path.with_extension("compact");
        let snapshot: Vec<(String, Vec<u8>)> = self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        {
            let file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
            let mut out = BufWriter::new(file);
            for (key, value) in snapshot.iter() {
                let frame = encode_entry(&LogEntry::Put {
                    key: key.clone(),
                    value: value.clone(),
                })?;
                out.write_all(&frame).map_err(|e| StoreError::io(&tmp, e))?;
            }
            let file = out
                .into_inner()
                .map_err(|e| StoreError::io(&tmp, e.into_error()))?;
            file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
        }

        fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e))?;
        writer.file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;
        writer.appended = 0;

        tracing::debug!(
            path = %self.path.display(),
            keys = snapshot.len(),
            "compacted key-value log"
        );
        Ok(())
    }
}

impl KvStore for LogStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        // The writer lock orders file frames and map updates identically.
        let mut writer = self.writer.lock();
        let entry = LogEntry::Put {
            key: key.to_string(),
            value,
        };
        self.append(&mut writer, &entry)?;
        if let LogEntry::Put { key, value } = entry {
            self.entries.write().insert(key, value);
        }
        self.maybe_compact(&mut writer)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut writer = self.writer.lock();
        if !self.entries.read().contains_key(key) {
            return Ok(false);
        }
        self.append(
            &mut writer,
            &LogEntry::Delete {
                key: key.to_string(),
            },
        )?;
        self.entries.write().remove(key);
        self.maybe_compact(&mut writer)?;
        Ok(true)
    }

    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        Ok(scan_map(&self.entries.read(), prefix))
    }
}

fn frame_len(len: usize) -> StoreResult<u32> {
    u32::try_from(len).map_err(|_| StoreError::Encode {
        what: "log entry",
        reason: format!("{len} bytes exceed the frame length limit of {}", u32::MAX),
    })
}

/// Wrap already-encoded bytes in a checksummed frame.
fn frame(data: &[u8]) -> StoreResult<Vec<u8>> {
    let len = frame_len(data.len())?.to_le_bytes();
    let mut out = Vec::with_capacity(data.len() + (FRAME_HEADER_LEN + FRAME_TRAILER_LEN) as usize);
    out.extend_from_slice(&len);
    out.extend_from_slice(&CRC32.checksum(&len).to_le_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(&CRC32.checksum(data).to_le_bytes());
    Ok(out)
}

fn encode_entry(entry: &LogEntry) -> StoreResult<Vec<u8>> {
    let data = bincode::serialize(entry).map_err(|e| StoreError::Encode {
        what: "log entry",
        reason: e.to_string(),
    })?;
    frame(&data)
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

/// Replay every complete frame. Only an incomplete or unverifiable last
/// frame, or a zero-filled tail, is truncated.
fn replay(path: &Path, file: &mut File) -> StoreResult<(BTreeMap<String, Vec<u8>>, u64)> {
    let mut entries = BTreeMap::new();
    let mut frames = 0u64;
    let mut offset = 0u64;

    file.seek(SeekFrom::Start(0))
        .map_err(|e| StoreError::io(path, e))?;
    let total = file
        .metadata()
        .map_err(|e| StoreError::io(path, e))?
        .len();
    let corrupted = |offset: u64, reason: String| StoreError::Corrupted {
        path: path.to_path_buf(),
        offset,
        reason,
    };

    while offset < total {
        if offset + FRAME_HEADER_LEN > total {
            break;
        }
        let mut header = [0u8; FRAME_HEADER_LEN as usize];
        file.read_exact(&mut header)
            .map_err(|e| StoreError::io(path, e))?;
        if header.iter().all(|b| *b == 0) && tail_is_zeroed(file, path)? {
            break;
        }
        if CRC32.checksum(&header[..4]) != le_u32(&header[4..]) {
            return Err(corrupted(offset, "frame header checksum mismatch".into()));
        }

        let len = u64::from(le_u32(&header));
        let frame_end = offset + FRAME_HEADER_LEN + len + FRAME_TRAILER_LEN;
        if frame_end > total {
            break;
        }

        let mut data = vec![0u8; len as usize];
        let mut trailer = [0u8; FRAME_TRAILER_LEN as usize];
        file.read_exact(&mut data)
            .and_then(|_| file.read_exact(&mut trailer))
            .map_err(|e| StoreError::io(path, e))?;
        if CRC32.checksum(&data) != u32::from_le_bytes(trailer) {
            if frame_end == total {
                break;
            }
            return Err(corrupted(offset, "frame checksum mismatch".into()));
        }

        let entry: LogEntry =
            bincode::deserialize(&data).map_err(|e| corrupted(offset, e.to_string()))?;
        match entry {
            LogEntry::Put { key, value } => {
                entries.insert(key, value);
            }
            LogEntry::Delete { key } => {
                entries.remove(&key);
            }
        }
        offset = frame_end;
        frames += 1;
    }

    if offset < total {
        tracing::warn!(
            path = %path.display(),
            offset,
            dropped_bytes = total - offset,
            "truncating torn frame at end of key-value log"
        );
        file.set_len(offset).map_err(|e| StoreError::io(path, e))?;
    }

    Ok((entries, frames))
}

/// Whether every byte from the current position to EOF is zero, as left by
/// a file extended before its data reached disk.
fn tail_is_zeroed(file: &mut File, path: &Path) -> StoreResult<bool> {
    let mut rest = Vec::new();
    file.read_to_end(&mut rest)
        .map_err(|e| StoreError::io(path, e))?;
    Ok(rest.iter().all(|b| *b == 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config() -> StoreConfig {
        StoreConfig::default().sync_writes(false).compact_after(None)
    }

    #[test]
    fn test_reopen_replays_puts_and_deletes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.log");
        {
            let store = LogStore::open(&path, &config()).unwrap();
            store.put("a", b"1".to_vec()).unwrap();
            store.put("b", b"2".to_vec()).unwrap();
            store.put("a", b"3".to_vec()).unwrap();
            assert!(store.delete("b").unwrap());
            assert!(!store.delete("missing").unwrap());
        }

        let store = LogStore::open(&path, &config()).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"3".to_vec()));
        assert_eq!(store.get("b").unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    fn write_puts(path: &Path, n: u32) -> Vec<u64> {
        let store = LogStore::open(path, &config()).unwrap();
        let mut ends = Vec::new();
        for i in 0..n {
            store.put(&format!("k{i}"), i.to_le_bytes().to_vec()).unwrap();
            ends.push(fs::metadata(path).unwrap().len());
        }
        ends
    }

    fn overwrite(path: &Path, offset: u64, bytes: &[u8]) {
        let mut file = OpenOptions::new().write(true).open(path).unwrap();
        file.seek(SeekFrom::Start(offset)).unwrap();
        file.write_all(bytes).unwrap();
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.log");
        let good_len = *write_puts(&path, 1).last().unwrap();
        let torn = encode_entry(&LogEntry::Put {
            key: "b".into(),
            value: vec![7; 64],
        })
        .unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&torn[..torn.len() / 2]).unwrap();
        }

        let store = LogStore::open(&path, &config()).unwrap();
        assert_eq!(store.get("k0").unwrap(), Some(0u32.to_le_bytes().to_vec()));
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);

        store.put("b", b"2".to_vec()).unwrap();
        drop(store);
        let store = LogStore::open(&path, &config()).unwrap();
        assert_eq!(store.get("b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_partial_header_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.log");
        let good_len = *write_puts(&path, 2).last().unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[1, 2, 3]).unwrap();
        }

        let store = LogStore::open(&path, &config()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
    }

    #[test]
    fn test_bad_checksum_on_last_frame_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.log");
        let ends = write_puts(&path, 3);
        let last = *ends.last().unwrap();
        overwrite(&path, last - 1, &[0xff]);

        let store = LogStore::open(&path, &config()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("k2").unwrap(), None);
        assert_eq!(fs::metadata(&path).unwrap().len(), ends[1]);
    }

    #[test]
    fn test_zero_filled_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.log");
        let good_len = *write_puts(&path, 2).last().unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0u8; 64]).unwrap();
        }

        let store = LogStore::open(&path, &config()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
    }

    #[test]
    fn test_corrupted_first_header_keeps_the_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.log");
        let len = *write_puts(&path, 4).last().unwrap();
        overwrite(&path, 0, &u32::MAX.to_le_bytes());

        let err = LogStore::open(&path, &config()).err().unwrap();
        assert!(matches!(err, StoreError::Corrupted { offset: 0, .. }));
        assert_eq!(fs::metadata(&path).unwrap().len(), len);
    }

    #[test]
    fn test_corrupted_middle_frame_keeps_the_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.log");
        let ends = write_puts(&path, 4);
        // Last payload byte of the second frame, just before its checksum.
        overwrite(&path, ends[1] - FRAME_TRAILER_LEN - 1, &[0xaa]);

        let err = LogStore::open(&path, &config()).err().unwrap();
        assert!(matches!(err, StoreError::Corrupted { offset, .. } if offset == ends[0]));
        assert_eq!(fs::metadata(&path).unwrap().len(), ends[3]);
    }

    #[test]
    fn test_undecodable_frame_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.log");
        {
            let mut file = File::create(&path).unwrap();
            file.write_all(&frame(&[9, 9, 9, 9]).unwrap()).unwrap();
        }
        let err = LogStore::open(&path, &config()).err().unwrap();
        assert!(matches!(err, StoreError::Corrupted { offset: 0, .. }));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_oversized_frame_is_rejected() {
        let err = frame_len(u32::MAX as usize + 1).unwrap_err();
        assert!(matches!(err, StoreError::Encode { .. }));
        assert_eq!(frame_len(16).unwrap(), 16);
    }

    #[test]
    fn test_compaction_shrinks_log_and_keeps_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.log");
        let store = LogStore::open(&path, &config()).unwrap();
        for i in 0..50u32 {
            store.put("hot", i.to_le_bytes().to_vec()).unwrap();
        }
        store.put("cold", b"x".to_vec()).unwrap();
        let before = fs::metadata(&path).unwrap().len();

        store.compact().unwrap();
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before);

        store.put("new", b"y".to_vec()).unwrap();
        drop(store);
        let store = LogStore::open(&path, &config()).unwrap();
        assert_eq!(store.get("hot").unwrap(), Some(49u32.to_le_bytes().to_vec()));
        assert_eq!(store.get("cold").unwrap(), Some(b"x".to_vec()));
        assert_eq!(store.get("new").unwrap(), Some(b"y".to_vec()));
    }

    #[test]
    fn test_auto_compaction_threshold() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.log");
        let config = StoreConfig::default()
            .sync_writes(false)
            .compact_after(Some(10));
        let store = LogStore::open(&path, &config).unwrap();
        for i in 0..25u32 {
            store.put("k", i.to_le_bytes().to_vec()).unwrap();
        }
        assert_eq!(store.writer.lock().appended, 5);
        drop(store);
        let store = LogStore::open(&path, &config).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(24u32.to_le_bytes().to_vec()));
    }
}
