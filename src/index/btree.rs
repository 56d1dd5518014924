//! Ordered-tree keydir backend: a `BTreeMap` behind an external lock, since
//! the map itself has no notion of concurrent access.

use super::{IndexIterator, Indexer};
use crate::data::log_record::Position;
use crate::error::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;

pub struct BTreeIndexer {
    tree: RwLock<BTreeMap<Vec<u8>, Position>>,
}

impl BTreeIndexer {
    pub fn new() -> Self {
        Self { tree: RwLock::new(BTreeMap::new()) }
    }
}

impl Indexer for BTreeIndexer {
    fn put(&self, key: Vec<u8>, pos: Position) -> Result<Option<Position>> {
        Ok(self.tree.write().insert(key, pos))
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        self.tree.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> Result<Option<Position>> {
        Ok(self.tree.write().remove(key))
    }

    fn size(&self) -> usize {
        self.tree.read().len()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator + '_> {
        let tree = self.tree.read();
        let mut items: Vec<(Vec<u8>, Position)> =
            tree.iter().map(|(k, v)| (k.clone(), *v)).collect();
        if reverse {
            items.reverse();
        }
        Box::new(BTreeIterator { items, reverse, cursor: 0 })
    }
}

struct BTreeIterator {
    items: Vec<(Vec<u8>, Position)>,
    reverse: bool,
    cursor: usize,
}

impl IndexIterator for BTreeIterator {
    fn rewind(&mut self) {
        self.cursor = 0;
    }

    fn seek(&mut self, key: &[u8]) {
        self.cursor = if self.reverse {
            match self.items.binary_search_by(|(k, _)| key.cmp(k)) {
                Ok(i) => i,
                Err(i) => i,
            }
        } else {
            match self.items.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
                Ok(i) => i,
                Err(i) => i,
            }
        };
    }

    fn next(&mut self) {
        self.cursor += 1;
    }

    fn valid(&self) -> bool {
        self.cursor < self.items.len()
    }

    fn key(&self) -> &[u8] {
        &self.items[self.cursor].0
    }

    fn value(&self) -> Position {
        self.items[self.cursor].1
    }
}
