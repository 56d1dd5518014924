//! Compaction: rewrite live records from the frozen older files into a
//! fresh file sequence in a sibling `<dir>-merge` directory, then fold that
//! directory into place on the next open.

use crate::batch;
use crate::data::data_file::{self, DataFile};
use crate::data::log_record::{LogRecord, LogRecordType, Position};
use crate::db::DB;
use crate::error::{Error, Result};
use crate::index::Indexer;
use crate::io::IoKind;
use crate::options::Options;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn merge_dir_path(dir_path: &Path) -> PathBuf {
    let name = dir_path.file_name().and_then(|n| n.to_str()).unwrap_or("db");
    dir_path.with_file_name(format!("{name}-merge"))
}

/// Runs a full compaction pass. Only one may run at a time; concurrent
/// callers get [`Error::MergeInProgress`].
pub(crate) fn merge(db: &DB) -> Result<()> {
    db.try_begin_merge()?;
    let result = run(db);
    db.end_merge();
    result
}

fn run(db: &DB) -> Result<()> {
    // Step 1: seal the active file, snapshot the now-frozen older files as
    // `Arc` clones, then release the engine write lock — the rewrite loop
    // below runs off that snapshot while concurrent writers proceed against
    // the fresh active file.
    let (snapshot, non_merge_file_id) = {
        let mut inner = db.inner.write();
        inner.active_file.sync()?;
        let sealed_id = inner.active_file.file_id();
        let non_merge_file_id = sealed_id + 1;

        let sealed = DataFile::open(db.dir_path(), sealed_id, IoKind::Mmap)?;
        let new_active = DataFile::open(db.dir_path(), non_merge_file_id, IoKind::Standard)?;
        inner.active_file = new_active;
        inner.older_files.insert(sealed_id, Arc::new(sealed));

        let mut snapshot: Vec<(u32, Arc<DataFile>)> =
            inner.older_files.iter().map(|(id, f)| (*id, f.clone())).collect();
        snapshot.sort_unstable_by_key(|(id, _)| *id);
        (snapshot, non_merge_file_id)
    };

    let merge_dir = merge_dir_path(db.dir_path());
    if merge_dir.exists() {
        fs::remove_dir_all(&merge_dir)?;
    }
    fs::create_dir_all(&merge_dir)?;

    let shadow = DB::open(Options {
        dir_path: merge_dir.clone(),
        data_file_size: db.options.data_file_size,
        sync_write: false,
        index_type: crate::options::IndexType::Btree,
    })?;

    let mut hint_file = DataFile::open_hint_file(&merge_dir)?;

    // No engine lock held here: `snapshot` holds its own `Arc<DataFile>`
    // handles, and liveness checks go through `db.index`, which has its own
    // internal locking — concurrent puts/deletes/batch commits proceed
    // against the fresh active file while this runs.
    for (file_id, file) in snapshot {
        let mut offset = 0u64;
        while let Some((record, size)) = file.read_log_record(offset)? {
            let (_, real_key) = batch::parse_key_with_seq(&record.key)?;
            let live = matches!(
                db.index.get(&real_key),
                Some(pos) if pos.file_id == file_id && pos.offset == offset
            );
            if live {
                let normal = LogRecord {
                    key: batch::encode_key_with_seq(0, &real_key),
                    value: record.value,
                    rec_type: LogRecordType::Normal,
                };
                let pos = {
                    let mut shadow_inner = shadow.inner.write();
                    shadow.append_log_record(&mut shadow_inner, &normal)?
                };
                hint_file.write_hint_record(&real_key, pos)?;
            }
            offset += size;
        }
    }

    hint_file.sync()?;
    shadow.sync()?;
    drop(shadow);

    let mut finished_file = DataFile::open_merge_finished_file(&merge_dir)?;
    let marker = LogRecord {
        key: data_file::MERGE_FINISHED_KEY.to_vec(),
        value: non_merge_file_id.to_string().into_bytes(),
        rec_type: LogRecordType::Normal,
    };
    let (buf, _) = marker.encode();
    finished_file.write(&buf)?;
    finished_file.sync()?;

    log::info!("merge finished, non-merge file id {non_merge_file_id}");
    Ok(())
}

/// Atomically adopts a completed merge's output on the next `open`: deletes
/// superseded data files and moves the merge directory's contents into
/// place. If the merge directory exists but has no finished marker, the
/// prior merge attempt is incomplete and its output is discarded.
pub(crate) fn fold_in_merge_dir(dir_path: &Path) -> Result<Option<u32>> {
    let merge_dir = merge_dir_path(dir_path);
    if !merge_dir.exists() {
        return Ok(None);
    }

    let finished_path = merge_dir.join(data_file::MERGE_FINISHED_FILE_NAME);
    if !finished_path.exists() {
        fs::remove_dir_all(&merge_dir)?;
        return Ok(None);
    }

    let non_merge_file_id = {
        let finished_file = DataFile::open_merge_finished_file(&merge_dir)?;
        let (record, _) = finished_file.read_log_record(0)?.ok_or(Error::RecoveryInvariantViolation {
            key: data_file::MERGE_FINISHED_KEY.to_vec(),
        })?;
        std::str::from_utf8(&record.value)
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or(Error::RecoveryInvariantViolation { key: data_file::MERGE_FINISHED_KEY.to_vec() })?
    };

    for entry in fs::read_dir(dir_path)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(id) = data_file::parse_data_file_id(name) {
                if id < non_merge_file_id {
                    fs::remove_file(entry.path())?;
                }
            }
        }
    }

    for entry in fs::read_dir(&merge_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == data_file::MERGE_FINISHED_FILE_NAME || name == crate::db::LOCK_FILE_NAME {
            continue;
        }
        fs::rename(entry.path(), dir_path.join(&name))?;
    }

    fs::remove_dir_all(&merge_dir)?;
    Ok(Some(non_merge_file_id))
}

/// Brings a persistent keydir back in sync after [`fold_in_merge_dir`]
/// renumbered the data files below `boundary_file_id`: any index entry still
/// pointing at one of those file ids refers to content that no longer has
/// anything to do with the key that entry belongs to. Entries pointing at
/// `boundary_file_id` or above were written after the merge's snapshot and
/// are untouched by fold-in, so they're left alone.
pub(crate) fn rebuild_persistent_index_after_fold(
    dir_path: &Path,
    index: &dyn Indexer,
    boundary_file_id: u32,
) -> Result<()> {
    let stale: Vec<Vec<u8>> = {
        let mut it = index.iterator(false);
        it.rewind();
        let mut keys = Vec::new();
        while it.valid() {
            if it.value().file_id < boundary_file_id {
                keys.push(it.key().to_vec());
            }
            it.next();
        }
        keys
    };
    for key in stale {
        index.delete(&key)?;
    }
    load_index_from_hint_file(dir_path, index)
}

/// Primes `index` from a hint file left by a prior merge, if one is present.
/// Used both during the in-memory backends' full recovery scan and, for the
/// B+-tree backend, by [`rebuild_persistent_index_after_fold`] to reinsert
/// positions for keys whose stale entries were just deleted.
pub(crate) fn load_index_from_hint_file(dir_path: &Path, index: &dyn Indexer) -> Result<()> {
    let hint_path = dir_path.join(data_file::HINT_FILE_NAME);
    if !hint_path.exists() {
        return Ok(());
    }
    let file = DataFile::open_hint_file(dir_path)?;
    let mut offset = 0u64;
    while let Some((record, size)) = file.read_log_record(offset)? {
        let pos = Position::decode(&record.value)?;
        index.put(record.key, pos)?;
        offset += size;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn opts(dir: &Path, data_file_size: u64) -> Options {
        Options { dir_path: dir.to_path_buf(), data_file_size, ..Options::default() }
    }

    #[test_case(1; "merging once")]
    #[test_case(2; "merging twice in a row")]
    fn merge_preserves_the_live_key_set(times: u32) {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::open(opts(dir.path(), 256)).unwrap();
        for i in 0..100u32 {
            db.put(format!("key-{i}").as_bytes(), b"0123456789").unwrap();
        }
        for i in 0..50u32 {
            db.delete(format!("key-{i}").as_bytes()).unwrap();
        }

        for _ in 0..times {
            db.merge().unwrap();
        }

        let mut keys = db.list_keys();
        keys.sort();
        drop(db);

        let db = DB::open(opts(dir.path(), 256)).unwrap();
        let mut reopened_keys = db.list_keys();
        reopened_keys.sort();
        assert_eq!(keys, reopened_keys);
        assert_eq!(reopened_keys.len(), 50);
    }

    #[test]
    fn merge_preserves_the_live_key_set_for_bplustree_backend() {
        let dir = tempfile::tempdir().unwrap();
        let opts = Options {
            index_type: crate::options::IndexType::BPlusTree,
            ..opts(dir.path(), 256)
        };
        let db = DB::open(opts.clone()).unwrap();
        for i in 0..100u32 {
            db.put(format!("key-{i}").as_bytes(), b"0123456789").unwrap();
        }
        for i in 0..50u32 {
            db.delete(format!("key-{i}").as_bytes()).unwrap();
        }

        db.merge().unwrap();
        let mut keys = db.list_keys();
        keys.sort();
        db.close().unwrap();

        let db = DB::open(opts).unwrap();
        let mut reopened_keys = db.list_keys();
        reopened_keys.sort();
        assert_eq!(keys, reopened_keys);
        assert_eq!(reopened_keys.len(), 50);
        for i in 50..100u32 {
            assert_eq!(db.get(format!("key-{i}").as_bytes()).unwrap(), b"0123456789");
        }
    }

    #[test]
    fn should_fail_concurrent_merge() {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::open(opts(dir.path(), 1024 * 1024)).unwrap();
        db.put(b"a", b"1").unwrap();
        db.try_begin_merge().unwrap();
        assert_eq!(db.merge().unwrap_err(), Error::MergeInProgress);
        db.end_merge();
    }
}
