//! Persistent B+-tree keydir backend: the keydir survives a restart on its
//! own, without a full log scan, at the cost of a transaction per operation.

use super::{IndexIterator, Indexer};
use crate::data::log_record::Position;
use crate::error::Result;
use jammdb::{Data, DB};
use std::path::Path;
use std::sync::Arc;

pub const BPLUS_TREE_INDEX_FILE_NAME: &str = "bptree-index";

const BUCKET_NAME: &str = "barrelkv-keydir";

pub struct BPlusTreeIndexer {
    db: Arc<DB>,
}

impl BPlusTreeIndexer {
    pub fn open(dir_path: &Path) -> Result<Self> {
        let db = DB::open(dir_path.join(BPLUS_TREE_INDEX_FILE_NAME))?;
        {
            let tx = db.tx(true)?;
            tx.get_or_create_bucket(BUCKET_NAME)?;
            tx.commit()?;
        }
        Ok(Self { db: Arc::new(db) })
    }
}

impl Indexer for BPlusTreeIndexer {
    fn put(&self, key: Vec<u8>, pos: Position) -> Result<Option<Position>> {
        let tx = self.db.tx(true)?;
        let bucket = tx.get_or_create_bucket(BUCKET_NAME)?;
        let prev = bucket.get(&key).and_then(|d| d.kv_opt().map(|kv| kv.value().to_vec()));
        bucket.put(key, pos.encode())?;
        tx.commit()?;
        prev.map(|bytes| Position::decode(&bytes)).transpose()
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        let tx = self.db.tx(false).ok()?;
        let bucket = tx.get_bucket(BUCKET_NAME).ok()?;
        let bytes = bucket.get(key)?.kv_opt()?.value().to_vec();
        Position::decode(&bytes).ok()
    }

    fn delete(&self, key: &[u8]) -> Result<Option<Position>> {
        let tx = self.db.tx(true)?;
        let bucket = tx.get_or_create_bucket(BUCKET_NAME)?;
        let prev = match bucket.delete(key) {
            Ok(kv) => Some(kv.value().to_vec()),
            Err(jammdb::Error::KeyValueMissing) => None,
            Err(e) => return Err(e.into()),
        };
        tx.commit()?;
        prev.map(|bytes| Position::decode(&bytes)).transpose()
    }

    fn size(&self) -> usize {
        let Ok(tx) = self.db.tx(false) else { return 0 };
        let Ok(bucket) = tx.get_bucket(BUCKET_NAME) else { return 0 };
        bucket.kv_pairs().count()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator + '_> {
        let tx = self.db.tx(false).expect("open read transaction for iteration");
        let mut items: Vec<(Vec<u8>, Position)> = Vec::new();
        if let Ok(bucket) = tx.get_bucket(BUCKET_NAME) {
            for kv in bucket.kv_pairs() {
                if let Ok(pos) = Position::decode(kv.value()) {
                    items.push((kv.key().to_vec(), pos));
                }
            }
        }
        items.sort_by(|a, b| a.0.cmp(&b.0));
        if reverse {
            items.reverse();
        }
        Box::new(BPlusTreeIterator { _tx: tx, items, reverse, cursor: 0 })
    }
}

/// Holds the read transaction open for the iterator's lifetime, giving it a
/// stable snapshot even if writers commit in the meantime.
struct BPlusTreeIterator<'tx> {
    _tx: jammdb::Tx<'tx>,
    items: Vec<(Vec<u8>, Position)>,
    reverse: bool,
    cursor: usize,
}

impl<'tx> IndexIterator for BPlusTreeIterator<'tx> {
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

trait DataExt {
    fn kv_opt(&self) -> Option<&jammdb::KVPair>;
}

impl DataExt for Data<'_, '_> {
    fn kv_opt(&self) -> Option<&jammdb::KVPair> {
        match self {
            Data::KeyValue(kv) => Some(kv),
            Data::Bucket(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(fid: u32) -> Position {
        Position { file_id: fid, offset: 0, size: 0 }
    }

    #[test]
    fn put_get_delete_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let idx = BPlusTreeIndexer::open(dir.path()).unwrap();
            idx.put(b"a".to_vec(), pos(1)).unwrap();
            assert_eq!(idx.get(b"a"), Some(pos(1)));
        }
        let idx = BPlusTreeIndexer::open(dir.path()).unwrap();
        assert_eq!(idx.get(b"a"), Some(pos(1)));
        assert_eq!(idx.delete(b"a").unwrap(), Some(pos(1)));
        assert_eq!(idx.get(b"a"), None);
    }
}
