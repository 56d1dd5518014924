//! Error types returned by this crate.

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while operating the store.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("key is empty")]
    KeyIsEmpty,

    #[error("key not found")]
    KeyNotFound,

    #[error("data file for id {0} not found")]
    DataFileNotFound(u32),

    #[error("failed to update in-memory index")]
    IndexUpdateFailed,

    #[error("batch commit exceeds the configured maximum of {max} pending writes")]
    ExceedMaxBatchNum { max: u64 },

    #[error("a merge is already in progress")]
    MergeInProgress,

    #[error("log record at offset {offset} in file {file_id} failed its CRC check")]
    CorruptRecord { file_id: u32, offset: u64 },

    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),

    #[error(
        "write batches are disabled: the persistent B+-tree index has no seq-no file to \
         recover its sequence counter from"
    )]
    BatchDisabled,

    #[error("directory {0} is already locked by another instance")]
    AlreadyLocked(String),

    #[error("keydir update failed while replaying the log at startup: key {key:?}")]
    RecoveryInvariantViolation { key: Vec<u8> },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("persistent index error: {0}")]
    Index(#[from] jammdb::Error),
}

impl PartialEq for Error {
    /// Structural equality ignoring the wrapped `io::Error`/`jammdb::Error`
    /// payloads, which don't implement `PartialEq` themselves. Tests use
    /// this to assert on the error *kind* returned by an operation.
    fn eq(&self, other: &Self) -> bool {
        use Error::*;
        match (self, other) {
            (KeyIsEmpty, KeyIsEmpty) => true,
            (KeyNotFound, KeyNotFound) => true,
            (DataFileNotFound(a), DataFileNotFound(b)) => a == b,
            (IndexUpdateFailed, IndexUpdateFailed) => true,
            (ExceedMaxBatchNum { max: a }, ExceedMaxBatchNum { max: b }) => a == b,
            (MergeInProgress, MergeInProgress) => true,
            (CorruptRecord { file_id: af, offset: ao }, CorruptRecord { file_id: bf, offset: bo }) => {
                af == bf && ao == bo
            }
            (InvalidOptions(a), InvalidOptions(b)) => a == b,
            (BatchDisabled, BatchDisabled) => true,
            (AlreadyLocked(a), AlreadyLocked(b)) => a == b,
            (RecoveryInvariantViolation { key: a }, RecoveryInvariantViolation { key: b }) => a == b,
            (Io(_), Io(_)) => true,
            (Index(_), Index(_)) => true,
            _ => false,
        }
    }
}
