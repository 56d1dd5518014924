//! Skip-list keydir backend: a concurrent ordered map requiring no external
//! lock, unlike the tree and trie backends.

use super::{IndexIterator, Indexer};
use crate::data::log_record::Position;
use crate::error::Result;
use crossbeam_skiplist::SkipMap;

pub struct SkipListIndexer {
    map: SkipMap<Vec<u8>, Position>,
}

impl SkipListIndexer {
    pub fn new() -> Self {
        Self { map: SkipMap::new() }
    }
}

impl Indexer for SkipListIndexer {
    fn put(&self, key: Vec<u8>, pos: Position) -> Result<Option<Position>> {
        let prev = self.map.get(&key).map(|e| *e.value());
        self.map.insert(key, pos);
        Ok(prev)
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        self.map.get(key).map(|e| *e.value())
    }

    fn delete(&self, key: &[u8]) -> Result<Option<Position>> {
        Ok(self.map.remove(key).map(|e| *e.value()))
    }

    fn size(&self) -> usize {
        self.map.len()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator + '_> {
        let items: Vec<(Vec<u8>, Position)> =
            self.map.iter().map(|e| (e.key().clone(), *e.value())).collect();
        let items = if reverse { items.into_iter().rev().collect() } else { items };
        Box::new(SkipListIterator { items, reverse, cursor: 0 })
    }
}

struct SkipListIterator {
    items: Vec<(Vec<u8>, Position)>,
    reverse: bool,
    cursor: usize,
}

impl IndexIterator for SkipListIterator {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(fid: u32) -> Position {
        Position { file_id: fid, offset: 0, size: 0 }
    }

    #[test]
    fn put_get_delete() {
        let idx = SkipListIndexer::new();
        assert!(idx.put(b"a".to_vec(), pos(1)).unwrap().is_none());
        assert_eq!(idx.get(b"a"), Some(pos(1)));
        assert_eq!(idx.delete(b"a").unwrap(), Some(pos(1)));
        assert_eq!(idx.get(b"a"), None);
    }

    #[test]
    fn iteration_is_ascending_by_default() {
        let idx = SkipListIndexer::new();
        idx.put(b"b".to_vec(), pos(1)).unwrap();
        idx.put(b"a".to_vec(), pos(2)).unwrap();

        let mut it = idx.iterator(false);
        it.rewind();
        assert_eq!(it.key(), b"a");
        it.next();
        assert_eq!(it.key(), b"b");
    }
}
