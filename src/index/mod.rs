//! The in-memory (or, for the persistent backend, on-disk) keydir: a map
//! from user key to the [`Position`] of its most recent live record.

mod art;
mod btree;
mod bplustree;
mod skiplist;

use crate::data::log_record::Position;
use crate::error::Result;
use crate::options::IndexType;
use std::path::Path;

/// A keydir backend. Implementations differ in storage strategy but all
/// present the same put/get/delete/iterate surface.
pub trait Indexer: Send + Sync {
    /// Inserts or overwrites `key`'s position. Returns the position it
    /// replaced, if any.
    fn put(&self, key: Vec<u8>, pos: Position) -> Result<Option<Position>>;
    fn get(&self, key: &[u8]) -> Option<Position>;
    /// Removes `key`. Returns the position it held, if any.
    fn delete(&self, key: &[u8]) -> Result<Option<Position>>;
    fn size(&self) -> usize;
    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator + '_>;
    /// Releases any resources the backend itself holds (distinct from an
    /// iterator's own `close`). Most backends have nothing to do here.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A bidirectional cursor over a keydir snapshot or live transaction.
pub trait IndexIterator {
    fn rewind(&mut self);
    /// Positions at the first key `>= key` (or `<= key` when iterating in
    /// reverse).
    fn seek(&mut self, key: &[u8]);
    fn next(&mut self);
    fn valid(&self) -> bool;
    fn key(&self) -> &[u8];
    fn value(&self) -> Position;
}

/// Builds the configured backend. `dir_path` is only consulted by backends
/// that persist themselves to disk (currently the B+-tree).
pub fn new_indexer(index_type: IndexType, dir_path: &Path) -> Result<Box<dyn Indexer>> {
    Ok(match index_type {
        IndexType::Btree => Box::new(btree::BTreeIndexer::new()),
        IndexType::Art => Box::new(art::ArtIndexer::new()),
        IndexType::BPlusTree => Box::new(bplustree::BPlusTreeIndexer::open(dir_path)?),
        IndexType::SkipList => Box::new(skiplist::SkipListIndexer::new()),
    })
}

pub use bplustree::BPLUS_TREE_INDEX_FILE_NAME;
