//! One append-only log file, plus the handful of special single-purpose
//! files the engine reads and writes around a merge and a clean shutdown.

use super::log_record::{decode_log_record_header, log_record_crc, LogRecord, LogRecordType, MAX_LOG_RECORD_HEADER_SIZE};
use crate::data::log_record::Position;
use crate::error::{Error, Result};
use crate::io::{self, IOManager, IoKind};
use std::path::{Path, PathBuf};

pub const DATA_FILE_SUFFIX: &str = ".data";
pub const HINT_FILE_NAME: &str = "hint-index";
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
pub const SEQ_NO_FILE_NAME: &str = "seq-no";
pub const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";

/// The key the seq-no file's single record carries the counter under.
pub const SEQ_NO_KEY: &[u8] = b"seq.no";
/// The key the merge-finished file's single record carries the boundary
/// file id under.
pub const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

pub fn data_file_path(dir_path: &Path, file_id: u32) -> PathBuf {
    dir_path.join(format!("{file_id:09}{DATA_FILE_SUFFIX}"))
}

/// One log file: an append target (if it's the active file, or a merge
/// shadow file still being written), or a sealed older file read back on
/// lookups and recovery.
pub struct DataFile {
    file_id: u32,
    write_off: u64,
    io: Box<dyn IOManager>,
}

impl DataFile {
    fn with_io(file_id: u32, io: Box<dyn IOManager>) -> Self {
        Self { file_id, write_off: 0, io }
    }

    /// Opens (creating if needed) the numbered data file in `dir_path`.
    pub fn open(dir_path: &Path, file_id: u32, kind: IoKind) -> Result<Self> {
        let io = io::open(&data_file_path(dir_path, file_id), kind)?;
        Ok(Self::with_io(file_id, io))
    }

    pub fn open_hint_file(dir_path: &Path) -> Result<Self> {
        let io = io::open(&dir_path.join(HINT_FILE_NAME), IoKind::Standard)?;
        Ok(Self::with_io(0, io))
    }

    pub fn open_merge_finished_file(dir_path: &Path) -> Result<Self> {
        let io = io::open(&dir_path.join(MERGE_FINISHED_FILE_NAME), IoKind::Standard)?;
        Ok(Self::with_io(0, io))
    }

    pub fn open_seq_no_file(dir_path: &Path) -> Result<Self> {
        let io = io::open(&dir_path.join(SEQ_NO_FILE_NAME), IoKind::Standard)?;
        Ok(Self::with_io(0, io))
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn write_off(&self) -> u64 {
        self.write_off
    }

    /// Used when reopening an existing, non-empty file: the in-memory write
    /// offset otherwise starts at zero regardless of what's already on disk.
    pub fn set_write_off(&mut self, off: u64) {
        self.write_off = off;
    }

    pub fn size(&self) -> Result<u64> {
        self.io.size()
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        let n = self.io.write(buf)?;
        self.write_off += n as u64;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    /// Appends a hint record: the real user key, and the encoded [`Position`]
    /// of the live record it points at, as the value.
    pub fn write_hint_record(&mut self, key: &[u8], pos: Position) -> Result<()> {
        let record = LogRecord { key: key.to_vec(), value: pos.encode(), rec_type: LogRecordType::Normal };
        let (buf, _) = record.encode();
        self.write(&buf)
    }

    /// Reads the record at `offset`, returning it along with its on-disk
    /// length, or `None` at end-of-file (including the all-zero sentinel
    /// left by a pre-allocated or torn tail).
    pub fn read_log_record(&self, offset: u64) -> Result<Option<(LogRecord, u64)>> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Ok(None);
        }

        let header_bytes = MAX_LOG_RECORD_HEADER_SIZE.min((file_size - offset) as usize);
        let mut header_buf = vec![0u8; header_bytes];
        self.io.read(&mut header_buf, offset)?;

        let Some((header, header_len)) = decode_log_record_header(&header_buf) else {
            return Ok(None);
        };
        if header.crc == 0 && header.key_len == 0 && header.value_len == 0 {
            return Ok(None);
        }

        let kv_len = header.key_len + header.value_len;
        let mut kv_buf = vec![0u8; kv_len];
        if kv_len > 0 {
            self.io.read(&mut kv_buf, offset + header_len as u64)?;
        }
        let key = kv_buf[..header.key_len].to_vec();
        let value = kv_buf[header.key_len..].to_vec();

        let crc = log_record_crc(&header_buf[4..header_len], &key, &value);
        if crc != header.crc {
            return Err(Error::CorruptRecord { file_id: self.file_id, offset });
        }

        let record = LogRecord { key, value, rec_type: header.rec_type };
        let record_size = (header_len + kv_len) as u64;
        Ok(Some((record, record_size)))
    }
}

/// Parses the `fid` out of a `<09-digit fid>.data` filename.
pub fn parse_data_file_id(file_name: &str) -> Option<u32> {
    file_name.strip_suffix(DATA_FILE_SUFFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::log_record::LogRecordType;

    #[test]
    fn write_and_read_back_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = DataFile::open(dir.path(), 0, IoKind::Standard).unwrap();

        let record =
            LogRecord { key: b"k".to_vec(), value: b"v".to_vec(), rec_type: LogRecordType::Normal };
        let (buf, size) = record.encode();
        let offset = file.write_off();
        file.write(&buf).unwrap();

        let (decoded, decoded_size) = file.read_log_record(offset).unwrap().unwrap();
        assert_eq!(decoded_size, size as u64);
        assert_eq!(decoded.key, b"k");
        assert_eq!(decoded.value, b"v");
    }

    #[test]
    fn read_past_end_of_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let file = DataFile::open(dir.path(), 0, IoKind::Standard).unwrap();
        assert!(file.read_log_record(0).unwrap().is_none());
    }

    #[test]
    fn filename_round_trips_file_id() {
        let path = data_file_path(Path::new("/tmp/db"), 42);
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "000000042.data");
        assert_eq!(parse_data_file_id("000000042.data"), Some(42));
        assert_eq!(parse_data_file_id("hint-index"), None);
    }
}
