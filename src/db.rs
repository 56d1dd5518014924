//! The engine: active file, rotated older files, keydir, and the put/get/
//! delete/iterate/merge operations built on top of them.

use crate::batch::{self, WriteBatch};
use crate::data::data_file::{self, DataFile};
use crate::data::log_record::{LogRecord, LogRecordType, Position};
use crate::error::{Error, Result};
use crate::index::{self, Indexer};
use crate::io::IoKind;
use crate::iterator::Iterator;
use crate::options::{IteratorOptions, Options, WriteBatchOptions};
use fs4::fs_std::FileExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) const LOCK_FILE_NAME: &str = ".barrelkv-lock";

/// Everything about the active/older files that the engine write lock
/// guards together. Older files are kept behind an `Arc` so a merge can
/// clone out the handles it needs and release the lock before doing any
/// slow I/O, rather than holding the lock for the whole rewrite.
pub(crate) struct EngineState {
    pub(crate) active_file: DataFile,
    pub(crate) older_files: HashMap<u32, Arc<DataFile>>,
}

impl EngineState {
    fn data_file_for(&self, file_id: u32) -> Option<&DataFile> {
        if file_id == self.active_file.file_id() {
            Some(&self.active_file)
        } else {
            self.older_files.get(&file_id).map(|f| f.as_ref())
        }
    }
}

/// An open key-value store.
///
/// Cheaply `Clone`-free by design: wrap in an `Arc` at the call site if you
/// need to share one handle across threads, the same way a single
/// `std::fs::File` would be shared.
pub struct DB {
    pub(crate) options: Options,
    pub(crate) inner: RwLock<EngineState>,
    pub(crate) index: Box<dyn Indexer>,
    pub(crate) seq_no: AtomicU64,
    merging: AtomicBool,
    batch_enabled: bool,
    _lock_file: File,
}

impl DB {
    /// Opens (and if necessary creates) a database at `options.dir_path`.
    pub fn open(options: Options) -> Result<Self> {
        options.validate()?;

        let is_initial = !options.dir_path.exists()
            || fs::read_dir(&options.dir_path)?.next().is_none();
        if !options.dir_path.exists() {
            fs::create_dir_all(&options.dir_path)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(options.dir_path.join(LOCK_FILE_NAME))?;
        lock_file.try_lock_exclusive().map_err(|_| {
            Error::AlreadyLocked(options.dir_path.display().to_string())
        })?;

        let fold_boundary = crate::merge::fold_in_merge_dir(&options.dir_path)?;

        let mut file_ids = data_file_ids(&options.dir_path)?;
        file_ids.sort_unstable();

        let mut older_files = HashMap::new();
        let active_file = match file_ids.pop() {
            Some(active_id) => {
                for id in &file_ids {
                    older_files.insert(*id, Arc::new(DataFile::open(&options.dir_path, *id, IoKind::Mmap)?));
                }
                let mut f = DataFile::open(&options.dir_path, active_id, IoKind::Standard)?;
                let size = f.size()?;
                f.set_write_off(size);
                f
            }
            None => DataFile::open(&options.dir_path, 0, IoKind::Standard)?,
        };

        let index = index::new_indexer(options.index_type, &options.dir_path)?;

        let mut state = EngineState { active_file, older_files };

        let mut max_seq = 0u64;
        let mut batch_enabled = true;

        if options.index_type != crate::options::IndexType::BPlusTree {
            crate::merge::load_index_from_hint_file(&options.dir_path, index.as_ref())?;
            max_seq = load_index_from_data_files(&options.dir_path, &mut state, index.as_ref())?;
        } else {
            if let Some(boundary) = fold_boundary {
                crate::merge::rebuild_persistent_index_after_fold(
                    &options.dir_path,
                    index.as_ref(),
                    boundary,
                )?;
            }
            match load_seq_no_file(&options.dir_path)? {
                Some(seq) => max_seq = seq,
                None => {
                    if !is_initial {
                        batch_enabled = false;
                    }
                }
            }
            let size = state.active_file.size()?;
            state.active_file.set_write_off(size);
        }

        log::info!(
            "opened database at {} ({} live keys, active file {})",
            options.dir_path.display(),
            index.size(),
            state.active_file.file_id()
        );

        Ok(Self {
            options,
            inner: RwLock::new(state),
            index,
            seq_no: AtomicU64::new(max_seq),
            merging: AtomicBool::new(false),
            batch_enabled,
            _lock_file: lock_file,
        })
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let record = LogRecord {
            key: batch::encode_key_with_seq(0, key),
            value: value.to_vec(),
            rec_type: LogRecordType::Normal,
        };
        let pos = {
            let mut inner = self.inner.write();
            self.append_log_record(&mut inner, &record)?
        };
        self.index.put(key.to_vec(), pos)?;
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let pos = self.index.get(key).ok_or(Error::KeyNotFound)?;
        self.read_value_at(pos)
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        if self.index.get(key).is_none() {
            return Ok(());
        }
        let record = LogRecord {
            key: batch::encode_key_with_seq(0, key),
            value: Vec::new(),
            rec_type: LogRecordType::Tombstone,
        };
        {
            let mut inner = self.inner.write();
            self.append_log_record(&mut inner, &record)?;
        }
        self.index.delete(key)?;
        Ok(())
    }

    /// Snapshots every live key, in ascending order.
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        let mut it = self.index.iterator(false);
        it.rewind();
        let mut keys = Vec::with_capacity(self.index.size());
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        keys
    }

    /// Invokes `f(key, value)` for every live key in ascending order, until
    /// `f` returns `false`.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let _guard = self.inner.read();
        let mut it = self.index.iterator(false);
        it.rewind();
        while it.valid() {
            let value = self.read_value_at(it.value())?;
            if !f(it.key(), &value) {
                break;
            }
            it.next();
        }
        Ok(())
    }

    /// Returns a forward or reverse, optionally prefix-filtered, iterator.
    pub fn iter(&self, options: IteratorOptions) -> Iterator<'_> {
        Iterator::new(self, options)
    }

    /// Creates a new batch of buffered writes. Fails if the persistent
    /// B+-tree backend lost track of its sequence counter on the last
    /// unclean shutdown.
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> Result<WriteBatch<'_>> {
        if !self.batch_enabled {
            return Err(Error::BatchDisabled);
        }
        Ok(WriteBatch::new(self, options))
    }

    pub fn sync(&self) -> Result<()> {
        self.inner.read().active_file.sync()
    }

    /// Flushes the active file, and — for the persistent B+-tree backend —
    /// persists the sequence counter so the next `open` can recover it
    /// without a full log scan.
    pub fn close(&self) -> Result<()> {
        if self.options.index_type == crate::options::IndexType::BPlusTree {
            write_seq_no_file(&self.options.dir_path, self.seq_no.load(Ordering::SeqCst))?;
        }
        self.index.close()?;
        self.inner.read().active_file.sync()?;
        Ok(())
    }

    /// Rewrites live records into a fresh file sequence, discarding
    /// superseded and tombstoned ones. See [`crate::merge`].
    pub fn merge(&self) -> Result<()> {
        crate::merge::merge(self)
    }

    pub(crate) fn dir_path(&self) -> &Path {
        &self.options.dir_path
    }

    pub(crate) fn is_merging(&self) -> bool {
        self.merging.load(Ordering::SeqCst)
    }

    pub(crate) fn try_begin_merge(&self) -> Result<()> {
        self.merging
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| Error::MergeInProgress)
    }

    pub(crate) fn end_merge(&self) {
        self.merging.store(false, Ordering::SeqCst);
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.seq_no.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn read_value_at(&self, pos: Position) -> Result<Vec<u8>> {
        let inner = self.inner.read();
        let file = inner.data_file_for(pos.file_id).ok_or(Error::DataFileNotFound(pos.file_id))?;
        let (record, _) = file.read_log_record(pos.offset)?.ok_or(Error::KeyNotFound)?;
        Ok(record.value)
    }

    /// Appends one already-encoded record under the engine write lock,
    /// rotating the active file first if it would overflow.
    pub(crate) fn append_log_record(&self, inner: &mut EngineState, record: &LogRecord) -> Result<Position> {
        let (buf, size) = record.encode();
        let size = size as u64;

        if inner.active_file.write_off() + size > self.options.data_file_size {
            inner.active_file.sync()?;
            let sealed_id = inner.active_file.file_id();
            let sealed = DataFile::open(&self.options.dir_path, sealed_id, IoKind::Mmap)?;
            let new_active = DataFile::open(&self.options.dir_path, sealed_id + 1, IoKind::Standard)?;
            let old_active = std::mem::replace(&mut inner.active_file, new_active);
            drop(old_active);
            inner.older_files.insert(sealed_id, Arc::new(sealed));
            log::info!("rotated to new active file {}", inner.active_file.file_id());
        }

        let offset = inner.active_file.write_off();
        let file_id = inner.active_file.file_id();
        inner.active_file.write(&buf)?;
        if self.options.sync_write {
            inner.active_file.sync()?;
        }
        Ok(Position { file_id, offset, size })
    }
}

impl Drop for DB {
    /// Best-effort flush only. Unlike [`DB::close`], this does not persist
    /// the B+-tree backend's sequence counter — a handle dropped without an
    /// explicit `close` is exactly the "unclean shutdown" case the seq-no
    /// file's absence is meant to signal to the next `open`.
    fn drop(&mut self) {
        if let Err(e) = self.inner.read().active_file.sync() {
            log::error!("error syncing active file on drop: {e}");
        }
    }
}

fn data_file_ids(dir_path: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir_path)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(id) = data_file::parse_data_file_id(name) {
                ids.push(id);
            }
        }
    }
    Ok(ids)
}

/// Walks every data file in fid order, replaying records into `index` and
/// fixing up the active file's write offset to the last byte of the final
/// valid record (a torn tail is silently dropped, same as at crash time).
fn load_index_from_data_files(
    dir_path: &Path,
    state: &mut EngineState,
    index: &dyn Indexer,
) -> Result<u64> {
    let mut file_ids: Vec<u32> = state.older_files.keys().copied().collect();
    file_ids.push(state.active_file.file_id());
    file_ids.sort_unstable();

    let mut pending: HashMap<u64, Vec<(LogRecord, Position)>> = HashMap::new();
    let mut current_seq = 0u64;
    let active_id = state.active_file.file_id();
    let mut active_write_off = 0u64;

    for file_id in file_ids {
        let mut offset = 0u64;
        loop {
            let read = if file_id == active_id {
                state.active_file.read_log_record(offset)?
            } else {
                state.older_files.get(&file_id).unwrap().read_log_record(offset)?
            };
            let Some((record, size)) = read else { break };
            let pos = Position { file_id, offset, size };

            let (seq, real_key) = batch::parse_key_with_seq(&record.key)?;
            if seq == 0 {
                apply_record(index, &real_key, record.rec_type, pos)?;
            } else if record.rec_type == LogRecordType::BatchFinalizer {
                if let Some(ops) = pending.remove(&seq) {
                    for (op_record, op_pos) in ops {
                        apply_record(index, &op_record.key, op_record.rec_type, op_pos)?;
                    }
                }
            } else {
                pending.entry(seq).or_default().push((
                    LogRecord { key: real_key, value: record.value, rec_type: record.rec_type },
                    pos,
                ));
            }
            current_seq = current_seq.max(seq);

            offset += size;
            if file_id == active_id {
                active_write_off = offset;
            }
        }
    }

    state.active_file.set_write_off(active_write_off);
    Ok(current_seq)
}

fn apply_record(index: &dyn Indexer, key: &[u8], rec_type: LogRecordType, pos: Position) -> Result<()> {
    match rec_type {
        LogRecordType::Normal => {
            index.put(key.to_vec(), pos)?;
        }
        LogRecordType::Tombstone => {
            index.delete(key)?;
        }
        LogRecordType::BatchFinalizer => {}
    }
    Ok(())
}

fn load_seq_no_file(dir_path: &Path) -> Result<Option<u64>> {
    let path = dir_path.join(data_file::SEQ_NO_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let file = DataFile::open_seq_no_file(dir_path)?;
    let (record, _) = file.read_log_record(0)?.ok_or(Error::RecoveryInvariantViolation {
        key: data_file::SEQ_NO_KEY.to_vec(),
    })?;
    let seq: u64 = std::str::from_utf8(&record.value)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(Error::RecoveryInvariantViolation { key: data_file::SEQ_NO_KEY.to_vec() })?;
    drop(file);
    fs::remove_file(&path)?;
    Ok(Some(seq))
}

fn write_seq_no_file(dir_path: &Path, seq_no: u64) -> Result<()> {
    let path = dir_path.join(data_file::SEQ_NO_FILE_NAME);
    let _ = fs::remove_file(&path);
    let mut file = DataFile::open_seq_no_file(dir_path)?;
    let record = LogRecord {
        key: data_file::SEQ_NO_KEY.to_vec(),
        value: seq_no.to_string().into_bytes(),
        rec_type: LogRecordType::Normal,
    };
    let (buf, _) = record.encode();
    file.write(&buf)?;
    file.sync()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;

    fn opts(dir: &std::path::Path) -> Options {
        Options { dir_path: dir.to_path_buf(), data_file_size: 1024 * 1024, ..Options::default() }
    }

    #[test]
    fn put_then_get_returns_latest_value() {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::open(opts(dir.path())).unwrap();
        db.put(b"name", b"enophan").unwrap();
        assert_eq!(db.get(b"name").unwrap(), b"enophan");
    }

    #[test]
    fn delete_then_get_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::open(opts(dir.path())).unwrap();
        db.put(b"name", b"enophan").unwrap();
        db.delete(b"name").unwrap();
        assert_eq!(db.get(b"name").unwrap_err(), Error::KeyNotFound);
        db.put(b"name", b"again").unwrap();
        assert_eq!(db.get(b"name").unwrap(), b"again");
    }

    #[test]
    fn empty_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::open(opts(dir.path())).unwrap();
        assert_eq!(db.put(b"", b"v").unwrap_err(), Error::KeyIsEmpty);
        assert_eq!(db.get(b"").unwrap_err(), Error::KeyIsEmpty);
    }

    #[test]
    fn reopen_preserves_key_value_mapping() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = DB::open(opts(dir.path())).unwrap();
            db.put(b"a", b"1").unwrap();
            db.put(b"b", b"2").unwrap();
        }
        let db = DB::open(opts(dir.path())).unwrap();
        assert_eq!(db.get(b"a").unwrap(), b"1");
        assert_eq!(db.get(b"b").unwrap(), b"2");
    }

    #[test]
    fn writing_past_data_file_size_rotates_files() {
        let dir = tempfile::tempdir().unwrap();
        let options = Options { dir_path: dir.path().to_path_buf(), data_file_size: 128, ..Options::default() };
        let db = DB::open(options).unwrap();
        for i in 0..200u32 {
            db.put(format!("key-{i}").as_bytes(), b"0123456789").unwrap();
        }
        drop(db);
        let mut ids = data_file_ids(dir.path()).unwrap();
        ids.sort_unstable();
        assert!(ids.len() >= 3);
        assert_eq!(ids[0], 0);
    }

    #[test]
    fn second_handle_on_same_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let _db = DB::open(opts(dir.path())).unwrap();
        let err = DB::open(opts(dir.path())).unwrap_err();
        assert!(matches!(err, Error::AlreadyLocked(_)));
    }
}
