#![warn(clippy::all)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_long_first_doc_paragraph)]

//! A single-node, embedded key-value store using an append-only log, in the
//! style of [Bitcask](https://riak.com/assets/bitcask-intro.pdf).
//!
//! Keys are mapped in memory to the exact file and offset of their most
//! recent record (the "keydir"); values are read from disk on demand. Puts
//! and deletes are appended to a log file that rotates once it crosses
//! [`options::Options::data_file_size`], and [`DB::merge`] reclaims space
//! held by superseded and tombstoned records.

pub mod batch;
pub mod data;
pub mod db;
pub mod error;
pub mod index;
pub mod io;
pub mod iterator;
pub mod merge;
pub mod options;

pub use batch::WriteBatch;
pub use db::DB;
pub use error::{Error, Result};
pub use iterator::Iterator;
pub use options::{IndexType, IteratorOptions, Options, WriteBatchOptions};
