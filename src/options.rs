//! User-facing configuration for [`crate::DB`], its iterators, and its write
//! batches.

use crate::error::{Error, Result};
use std::path::PathBuf;

/// Which keydir backend a [`crate::DB`] indexes its live keys with.
///
/// All four wrap an external ordered-map implementation behind the
/// [`crate::index::Indexer`] contract; see that module for the provenance of
/// each one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexType {
    /// An in-memory `BTreeMap`, guarded by an external read-write lock.
    #[default]
    Btree,
    /// A byte-ordered trie, guarded by an external read-write lock.
    Art,
    /// An on-disk B+-tree; the keydir itself survives a restart without a
    /// full log scan, at the cost of a transaction per index operation.
    BPlusTree,
    /// A concurrent skip list requiring no external lock.
    SkipList,
}

/// Options controlling a [`crate::DB::open`] call.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory the database's files live in. Created if missing.
    pub dir_path: PathBuf,
    /// Maximum size in bytes of one data file before the engine rotates to a
    /// new active file.
    pub data_file_size: u64,
    /// If set, every appended record is followed by an fsync.
    pub sync_write: bool,
    /// Which keydir backend to use.
    pub index_type: IndexType,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::new(),
            data_file_size: 256 * 1024 * 1024,
            sync_write: false,
            index_type: IndexType::default(),
        }
    }
}

impl Options {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(Error::InvalidOptions("dir_path must not be empty"));
        }
        if self.data_file_size == 0 {
            return Err(Error::InvalidOptions("data_file_size must be greater than zero"));
        }
        Ok(())
    }
}

/// Options for [`crate::DB::iter`].
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only keys starting with this prefix are visited.
    pub prefix: Vec<u8>,
    /// Iterate from largest to smallest key.
    pub reverse: bool,
}

/// Options for [`crate::DB::new_write_batch`].
#[derive(Debug, Clone, Copy)]
pub struct WriteBatchOptions {
    /// A commit with more than this many pending writes fails with
    /// [`Error::ExceedMaxBatchNum`].
    pub max_batch_num: u64,
    /// Fsync the active file once, after the whole batch has been appended.
    pub sync_write: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self { max_batch_num: 10_000, sync_write: false }
    }
}
