//! Byte-trie keydir backend. The corpus has no crate implementing an actual
//! adaptive radix tree; `qp-trie` is a real, maintained byte-ordered trie
//! that satisfies the same contract (ordered by key bytes, prefix-friendly)
//! and is used here in its place.

use super::{IndexIterator, Indexer};
use crate::data::log_record::Position;
use crate::error::Result;
use parking_lot::RwLock;
use qp_trie::Trie;

pub struct ArtIndexer {
    trie: RwLock<Trie<Vec<u8>, Position>>,
}

impl ArtIndexer {
    pub fn new() -> Self {
        Self { trie: RwLock::new(Trie::new()) }
    }
}

impl Indexer for ArtIndexer {
    fn put(&self, key: Vec<u8>, pos: Position) -> Result<Option<Position>> {
        Ok(self.trie.write().insert(key, pos))
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        self.trie.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> Result<Option<Position>> {
        Ok(self.trie.write().remove(key))
    }

    fn size(&self) -> usize {
        self.trie.read().count()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator + '_> {
        let trie = self.trie.read();
        let mut items: Vec<(Vec<u8>, Position)> =
            trie.iter().map(|(k, v)| (k.as_slice().to_vec(), *v)).collect();
        if reverse {
            items.reverse();
        }
        Box::new(ArtIterator { items, reverse, cursor: 0 })
    }
}

struct ArtIterator {
    items: Vec<(Vec<u8>, Position)>,
    reverse: bool,
    cursor: usize,
}

impl IndexIterator for ArtIterator {
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
        let idx = ArtIndexer::new();
        assert!(idx.put(b"a".to_vec(), pos(1)).unwrap().is_none());
        assert_eq!(idx.get(b"a"), Some(pos(1)));
        assert_eq!(idx.delete(b"a").unwrap(), Some(pos(1)));
        assert_eq!(idx.get(b"a"), None);
    }

    #[test]
    fn forward_iteration_is_lexicographic() {
        let idx = ArtIndexer::new();
        idx.put(b"banana".to_vec(), pos(1)).unwrap();
        idx.put(b"apple".to_vec(), pos(2)).unwrap();
        idx.put(b"cherry".to_vec(), pos(3)).unwrap();

        let mut it = idx.iterator(false);
        it.rewind();
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"apple".to_vec(), b"banana".to_vec(), b"cherry".to_vec()]);
    }
}
