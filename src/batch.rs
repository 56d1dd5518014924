//! Atomic multi-key writes: buffer puts and deletes, then commit them all
//! under one sequence number and a terminal finalizer record.

use crate::data::log_record::{LogRecord, LogRecordType};
use crate::data::varint::{get_uvarint, put_uvarint};
use crate::db::DB;
use crate::error::{Error, Result};
use crate::options::WriteBatchOptions;
use parking_lot::Mutex;
use std::collections::HashMap;

/// The literal key a batch's terminal marker is recorded under, scoped by
/// its sequence number like every other key in a commit.
const TXN_FINALIZER_KEY: &[u8] = b"txn-fin";

/// Prefixes `key` with `seq` as an unsigned varint. A sequence of `0` marks
/// a record outside any batch.
pub(crate) fn encode_key_with_seq(seq: u64, key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10 + key.len());
    put_uvarint(&mut buf, seq);
    buf.extend_from_slice(key);
    buf
}

/// Splits an on-disk key back into its sequence number and the real user
/// key.
pub(crate) fn parse_key_with_seq(encoded: &[u8]) -> Result<(u64, Vec<u8>)> {
    let (seq, n) = get_uvarint(encoded).ok_or(Error::IndexUpdateFailed)?;
    Ok((seq, encoded[n..].to_vec()))
}

/// A buffered group of puts and deletes, committed atomically.
///
/// Borrows the [`DB`] it was created from; a batch has no independent
/// lifetime past its owning handle.
pub struct WriteBatch<'a> {
    db: &'a DB,
    options: WriteBatchOptions,
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
}

impl std::fmt::Debug for WriteBatch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatch").field("options", &self.options).finish_non_exhaustive()
    }
}

impl<'a> WriteBatch<'a> {
    pub(crate) fn new(db: &'a DB, options: WriteBatchOptions) -> Self {
        Self { db, options, pending: Mutex::new(HashMap::new()) }
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        self.pending.lock().insert(
            key.to_vec(),
            LogRecord { key: key.to_vec(), value: value.to_vec(), rec_type: LogRecordType::Normal },
        );
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let mut pending = self.pending.lock();
        if self.db.index.get(key).is_none() && !pending.contains_key(key) {
            // No live entry and nothing staged for this key: dropping the
            // delete is a no-op, not a failure.
            return Ok(());
        }
        pending.insert(
            key.to_vec(),
            LogRecord { key: key.to_vec(), value: Vec::new(), rec_type: LogRecordType::Tombstone },
        );
        Ok(())
    }

    /// Appends every staged operation plus a terminal finalizer record, then
    /// applies them to the keydir. Either the whole batch becomes visible or
    /// none of it does.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() as u64 > self.options.max_batch_num {
            return Err(Error::ExceedMaxBatchNum { max: self.options.max_batch_num });
        }

        let mut applied = Vec::with_capacity(pending.len());
        {
            // Engine write lock held for the whole commit: this is the
            // two-phase-locking step that serializes concurrent commits and
            // makes the sequence number assignment below race-free.
            let mut inner = self.db.inner.write();
            let seq = self.db.next_seq();

            for record in pending.values() {
                let on_disk = LogRecord {
                    key: encode_key_with_seq(seq, &record.key),
                    value: record.value.clone(),
                    rec_type: record.rec_type,
                };
                let pos = self.db.append_log_record(&mut inner, &on_disk)?;
                applied.push((record.key.clone(), record.rec_type, pos));
            }

            let finalizer = LogRecord {
                key: encode_key_with_seq(seq, TXN_FINALIZER_KEY),
                value: Vec::new(),
                rec_type: LogRecordType::BatchFinalizer,
            };
            self.db.append_log_record(&mut inner, &finalizer)?;

            if self.options.sync_write {
                inner.active_file.sync()?;
            }
        }

        for (key, rec_type, pos) in applied {
            match rec_type {
                LogRecordType::Normal => {
                    self.db.index.put(key, pos)?;
                }
                LogRecordType::Tombstone => {
                    self.db.index.delete(&key)?;
                }
                LogRecordType::BatchFinalizer => unreachable!("finalizer is never staged"),
            }
        }

        pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::options::Options;

    fn opts(dir: &std::path::Path) -> Options {
        Options { dir_path: dir.to_path_buf(), data_file_size: 1024 * 1024, ..Options::default() }
    }

    #[test]
    fn pending_writes_are_invisible_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::open(opts(dir.path())).unwrap();
        let batch = db.new_write_batch(WriteBatchOptions::default()).unwrap();
        batch.put(b"k1", b"v10").unwrap();
        batch.delete(b"k2").unwrap();

        assert_eq!(db.get(b"k1").unwrap_err(), Error::KeyNotFound);
        batch.commit().unwrap();
        assert_eq!(db.get(b"k1").unwrap(), b"v10");
    }

    #[test]
    fn key_with_seq_round_trips() {
        let encoded = encode_key_with_seq(42, b"hello");
        let (seq, key) = parse_key_with_seq(&encoded).unwrap();
        assert_eq!(seq, 42);
        assert_eq!(key, b"hello");
    }

    #[test]
    fn exceeding_max_batch_num_fails_commit() {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::open(opts(dir.path())).unwrap();
        let batch = db
            .new_write_batch(WriteBatchOptions { max_batch_num: 1, sync_write: false })
            .unwrap();
        batch.put(b"a", b"1").unwrap();
        batch.put(b"b", b"2").unwrap();
        assert_eq!(batch.commit().unwrap_err(), Error::ExceedMaxBatchNum { max: 1 });
    }
}
