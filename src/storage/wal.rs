use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::kv::Command;
use crate::raft::types::LogEntry;
use crate::util::errors::{Result, StoreError};

/// Trait for the durable replicated log
pub trait LogStorage: Send {
    /// Buffer entries for writing. Nothing is durable until `sync`.
    fn append(&mut self, entries: Vec<LogEntry>) -> Result<()>;
    /// Flush buffered records and fsync the file.
    fn sync(&mut self) -> Result<()>;
    fn get(&self, index: u64) -> Result<Option<LogEntry>>;
    /// Entries in `[start, end]`, both 1-based and inclusive.
    fn get_range(&self, start: u64, end: u64) -> Result<Vec<LogEntry>>;
    fn last_index(&self) -> u64;
    fn last_term(&self) -> u64;
    fn term_at(&self, index: u64) -> u64;
    /// Remove the suffix starting at `from_index`. Fsyncs before returning.
    fn truncate(&mut self, from_index: u64) -> Result<()>;
    fn iter_from(&self, index: u64) -> Box<dyn Iterator<Item = &LogEntry> + '_>;
}

/// Fixed part of a record before the payload: term (8) + index (8) + tag (1).
const RECORD_HEADER: usize = 17;
/// Sanity cap on a single record's length field.
const MAX_RECORD_LEN: u32 = 64 * 1024 * 1024;

/// Payload body serialized into each record. The command tag is stored
/// separately in the record header and cross-checked on read.
#[derive(Serialize, Deserialize)]
struct EntryBody {
    command: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seq: Option<u64>,
}

/// Append-only write-ahead log of log entries, one file per node.
///
/// Record format, all integers little-endian:
///
/// ```text
/// u32 length | u64 term | u64 index | u8 cmd_tag | payload | u32 crc32
/// ```
///
/// `length` counts the term..payload bytes; the CRC covers everything before
/// it, including the length field. Appends are buffered; `sync` is the group
/// commit point. Replay drops a torn trailing record and truncates the file
/// back to the last intact one; a bad record that is *not* trailing is
/// corruption and fails the open.
pub struct WalLog {
    path: PathBuf,
    file: BufWriter<File>,
    entries: Vec<LogEntry>,
    /// Byte offset of each record, parallel to `entries`.
    offsets: Vec<u64>,
    end_offset: u64,
    dirty: bool,
}

fn encode_record(entry: &LogEntry) -> Result<Vec<u8>> {
    let body = EntryBody {
        command: entry.command.clone(),
        client_id: entry.client_id.clone(),
        seq: entry.seq,
    };
    let payload = serde_json::to_vec(&body)?;
    let length = (RECORD_HEADER + payload.len()) as u32;

    let mut buf = Vec::with_capacity(4 + length as usize + 4);
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&entry.term.to_le_bytes());
    buf.extend_from_slice(&entry.index.to_le_bytes());
    buf.push(entry.command.tag());
    buf.extend_from_slice(&payload);
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Outcome of decoding one record at `offset` within `data`.
enum RecordRead {
    Entry { entry: LogEntry, next_offset: u64 },
    /// Incomplete or zeroed trailing bytes; valid data ends at `offset`.
    Torn,
    /// CRC or payload failure on a record with more data after it.
    Corrupt(String),
}

fn decode_record(data: &[u8], offset: usize) -> RecordRead {
    let remaining = &data[offset..];
    if remaining.len() < 4 {
        return RecordRead::Torn;
    }
    let length = u32::from_le_bytes(remaining[..4].try_into().unwrap());
    if length == 0 {
        return RecordRead::Torn;
    }
    if length < RECORD_HEADER as u32 || length > MAX_RECORD_LEN {
        // A nonsense length field cannot be distinguished from a torn header
        // unless intact data follows; treat it like a checksum failure.
        return classify_failure(data, offset, format!("bad record length {}", length));
    }
    let total = 4 + length as usize + 4;
    if remaining.len() < total {
        return RecordRead::Torn;
    }

    let crc_stored = u32::from_le_bytes(remaining[total - 4..total].try_into().unwrap());
    let crc_actual = crc32fast::hash(&remaining[..total - 4]);
    if crc_stored != crc_actual {
        return classify_failure(data, offset, format!("crc mismatch at offset {}", offset));
    }

    let term = u64::from_le_bytes(remaining[4..12].try_into().unwrap());
    let index = u64::from_le_bytes(remaining[12..20].try_into().unwrap());
    let tag = remaining[20];
    let payload = &remaining[21..total - 4];

    let body: EntryBody = match serde_json::from_slice(payload) {
        Ok(body) => body,
        Err(e) => {
            return RecordRead::Corrupt(format!("undecodable payload at offset {}: {}", offset, e))
        }
    };
    if body.command.tag() != tag {
        return RecordRead::Corrupt(format!("command tag mismatch at offset {}", offset));
    }

    RecordRead::Entry {
        entry: LogEntry {
            term,
            index,
            command: body.command,
            client_id: body.client_id,
            seq: body.seq,
        },
        next_offset: (offset + total) as u64,
    }
}

/// A checksum failure on the trailing record is a torn write; the same
/// failure with further bytes beyond the record is mid-log corruption.
fn classify_failure(data: &[u8], offset: usize, reason: String) -> RecordRead {
    let remaining = &data[offset..];
    let length = u32::from_le_bytes(remaining[..4].try_into().unwrap());
    let claimed_total = 4usize.saturating_add(length as usize).saturating_add(4);
    if offset + claimed_total >= data.len() || length > MAX_RECORD_LEN {
        RecordRead::Torn
    } else {
        RecordRead::Corrupt(reason)
    }
}

impl WalLog {
    /// Open the log at `path`, replaying every intact record. A torn tail is
    /// discarded and the file truncated back to the last durable record.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            std::fs::read(&path)?
        } else {
            Vec::new()
        };

        let mut entries = Vec::new();
        let mut offsets = Vec::new();
        let mut offset = 0u64;
        let mut torn = false;
        while (offset as usize) < data.len() {
            match decode_record(&data, offset as usize) {
                RecordRead::Entry { entry, next_offset } => {
                    let expected = entries.last().map(|e: &LogEntry| e.index + 1).unwrap_or(1);
                    if entry.index != expected {
                        return Err(StoreError::Corruption(format!(
                            "non-dense log index {} (expected {})",
                            entry.index, expected
                        )));
                    }
                    offsets.push(offset);
                    entries.push(entry);
                    offset = next_offset;
                }
                RecordRead::Torn => {
                    torn = true;
                    break;
                }
                RecordRead::Corrupt(reason) => {
                    return Err(StoreError::Corruption(reason));
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        if torn {
            tracing::warn!(
                "Dropping torn WAL tail in {:?} ({} -> {} bytes)",
                path,
                data.len(),
                offset
            );
            file.set_len(offset)?;
            file.sync_all()?;
        }
        let mut file = BufWriter::new(file);
        file.seek(SeekFrom::Start(offset))?;

        if !entries.is_empty() {
            tracing::info!("Replayed {} log entries from {:?}", entries.len(), path);
        }

        Ok(Self {
            path,
            file,
            entries,
            offsets,
            end_offset: offset,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogStorage for WalLog {
    fn append(&mut self, entries: Vec<LogEntry>) -> Result<()> {
        for entry in entries {
            let expected = self.last_index() + 1;
            if entry.index != expected {
                return Err(StoreError::LogInconsistency);
            }

            let record = encode_record(&entry)?;
            self.file.write_all(&record)?;
            self.offsets.push(self.end_offset);
            self.end_offset += record.len() as u64;
            self.entries.push(entry);
            self.dirty = true;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        self.dirty = false;
        Ok(())
    }

    fn get(&self, index: u64) -> Result<Option<LogEntry>> {
        if index == 0 {
            return Ok(None);
        }
        Ok(self.entries.get((index - 1) as usize).cloned())
    }

    fn get_range(&self, start: u64, end: u64) -> Result<Vec<LogEntry>> {
        if start == 0 || start > end || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        let start_idx = (start - 1) as usize;
        if start_idx >= self.entries.len() {
            return Ok(Vec::new());
        }
        let end_idx = std::cmp::min(end as usize, self.entries.len());
        Ok(self.entries[start_idx..end_idx].to_vec())
    }

    fn last_index(&self) -> u64 {
        self.entries.last().map(|e| e.index).unwrap_or(0)
    }

    fn last_term(&self) -> u64 {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    fn term_at(&self, index: u64) -> u64 {
        if index == 0 {
            return 0;
        }
        self.entries
            .get((index - 1) as usize)
            .map(|e| e.term)
            .unwrap_or(0)
    }

    fn truncate(&mut self, from_index: u64) -> Result<()> {
        if from_index == 0 || from_index > self.last_index() {
            return Ok(());
        }
        let pos = (from_index - 1) as usize;
        let cut = self.offsets[pos];

        self.file.flush()?;
        let file = self.file.get_mut();
        file.set_len(cut)?;
        file.seek(SeekFrom::Start(cut))?;
        file.sync_all()?;

        self.entries.truncate(pos);
        self.offsets.truncate(pos);
        self.end_offset = cut;
        self.dirty = false;
        tracing::info!("Truncated log from index {}", from_index);
        Ok(())
    }

    fn iter_from(&self, index: u64) -> Box<dyn Iterator<Item = &LogEntry> + '_> {
        let start = index.saturating_sub(1) as usize;
        Box::new(self.entries.iter().skip(start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Value;
    use tempfile::TempDir;

    fn set_entry(term: u64, index: u64, key: &str, value: &str) -> LogEntry {
        LogEntry::new(
            term,
            index,
            Command::Set {
                key: key.to_string(),
                value: Value::from(value),
            },
        )
    }

    #[test]
    fn test_append_and_get() {
        let dir = TempDir::new().unwrap();
        let mut wal = WalLog::open(dir.path().join("wal.log")).unwrap();

        let entries = vec![set_entry(1, 1, "a", "1"), set_entry(1, 2, "b", "2")];
        wal.append(entries.clone()).unwrap();
        wal.sync().unwrap();

        assert_eq!(wal.last_index(), 2);
        assert_eq!(wal.last_term(), 1);
        assert_eq!(wal.get(1).unwrap().unwrap(), entries[0]);
        assert_eq!(wal.get(2).unwrap().unwrap(), entries[1]);
        assert_eq!(wal.get(3).unwrap(), None);
    }

    #[test]
    fn test_append_rejects_non_dense_index() {
        let dir = TempDir::new().unwrap();
        let mut wal = WalLog::open(dir.path().join("wal.log")).unwrap();
        assert!(wal.append(vec![set_entry(1, 2, "a", "1")]).is_err());
    }

    #[test]
    fn test_replay_after_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");

        {
            let mut wal = WalLog::open(&path).unwrap();
            wal.append(vec![set_entry(1, 1, "a", "1"), set_entry(2, 2, "b", "2")])
                .unwrap();
            wal.sync().unwrap();
        }

        let wal = WalLog::open(&path).unwrap();
        assert_eq!(wal.last_index(), 2);
        assert_eq!(wal.term_at(1), 1);
        assert_eq!(wal.term_at(2), 2);
    }

    #[test]
    fn test_torn_trailing_record_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");

        {
            let mut wal = WalLog::open(&path).unwrap();
            wal.append(vec![set_entry(1, 1, "a", "1"), set_entry(1, 2, "b", "2")])
                .unwrap();
            wal.sync().unwrap();
        }

        // Chop bytes off the last record to simulate a crash mid-write.
        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 5]).unwrap();

        let wal = WalLog::open(&path).unwrap();
        assert_eq!(wal.last_index(), 1);
        // The file itself was truncated back to the intact prefix.
        let len = std::fs::metadata(&path).unwrap().len();
        assert!(len < data.len() as u64);
    }

    #[test]
    fn test_trailing_crc_damage_is_torn_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");

        {
            let mut wal = WalLog::open(&path).unwrap();
            wal.append(vec![set_entry(1, 1, "a", "1"), set_entry(1, 2, "b", "2")])
                .unwrap();
            wal.sync().unwrap();
        }

        // Flip a payload byte in the final record.
        let mut data = std::fs::read(&path).unwrap();
        let last = data.len() - 10;
        data[last] ^= 0xff;
        std::fs::write(&path, &data).unwrap();

        let wal = WalLog::open(&path).unwrap();
        assert_eq!(wal.last_index(), 1);
    }

    #[test]
    fn test_mid_log_corruption_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");

        {
            let mut wal = WalLog::open(&path).unwrap();
            wal.append(vec![
                set_entry(1, 1, "a", "1"),
                set_entry(1, 2, "b", "2"),
                set_entry(1, 3, "c", "3"),
            ])
            .unwrap();
            wal.sync().unwrap();
        }

        // Flip a byte inside the first record; intact records follow it.
        let mut data = std::fs::read(&path).unwrap();
        data[10] ^= 0xff;
        std::fs::write(&path, &data).unwrap();

        match WalLog::open(&path) {
            Err(StoreError::Corruption(_)) => {}
            other => panic!("expected corruption error, got {:?}", other.map(|w| w.last_index())),
        }
    }

    #[test]
    fn test_truncate_suffix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");

        let mut wal = WalLog::open(&path).unwrap();
        wal.append(vec![
            set_entry(1, 1, "a", "1"),
            set_entry(1, 2, "b", "2"),
            set_entry(2, 3, "c", "3"),
        ])
        .unwrap();
        wal.sync().unwrap();

        wal.truncate(2).unwrap();
        assert_eq!(wal.last_index(), 1);

        // Truncation survives reopen and the log accepts fresh appends.
        wal.append(vec![set_entry(3, 2, "d", "4")]).unwrap();
        wal.sync().unwrap();
        drop(wal);

        let wal = WalLog::open(&path).unwrap();
        assert_eq!(wal.last_index(), 2);
        assert_eq!(wal.term_at(2), 3);
    }

    #[test]
    fn test_unsynced_appends_are_not_durable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");

        {
            let mut wal = WalLog::open(&path).unwrap();
            wal.append(vec![set_entry(1, 1, "a", "1")]).unwrap();
            wal.sync().unwrap();
            // Buffered but never synced; a crash here must lose it.
            wal.append(vec![set_entry(1, 2, "b", "2")]).unwrap();
            std::mem::forget(wal);
        }

        let wal = WalLog::open(&path).unwrap();
        assert_eq!(wal.last_index(), 1);
    }

    #[test]
    fn test_iter_from() {
        let dir = TempDir::new().unwrap();
        let mut wal = WalLog::open(dir.path().join("wal.log")).unwrap();
        wal.append(vec![
            set_entry(1, 1, "a", "1"),
            set_entry(1, 2, "b", "2"),
            set_entry(1, 3, "c", "3"),
        ])
        .unwrap();

        let indexes: Vec<u64> = wal.iter_from(2).map(|e| e.index).collect();
        assert_eq!(indexes, vec![2, 3]);
    }

    #[test]
    fn test_get_range_is_inclusive() {
        let dir = TempDir::new().unwrap();
        let mut wal = WalLog::open(dir.path().join("wal.log")).unwrap();
        wal.append(vec![
            set_entry(1, 1, "a", "1"),
            set_entry(1, 2, "b", "2"),
            set_entry(1, 3, "c", "3"),
        ])
        .unwrap();

        let range = wal.get_range(2, 3).unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].index, 2);
        assert_eq!(range[1].index, 3);
        assert!(wal.get_range(4, 9).unwrap().is_empty());
    }
}
