//! A bidirectional, optionally prefix-filtered cursor over a database's live
//! keys, built on top of the keydir's own [`crate::index::IndexIterator`].

use crate::db::DB;
use crate::error::Result;
use crate::index::IndexIterator;
use crate::options::IteratorOptions;

pub struct Iterator<'a> {
    db: &'a DB,
    inner: Box<dyn IndexIterator + 'a>,
    prefix: Vec<u8>,
}

impl<'a> Iterator<'a> {
    pub(crate) fn new(db: &'a DB, options: IteratorOptions) -> Self {
        let inner = db.index.iterator(options.reverse);
        let mut it = Self { db, inner, prefix: options.prefix };
        it.rewind();
        it
    }

    pub fn rewind(&mut self) {
        self.inner.rewind();
        self.skip_prefix_mismatches();
    }

    /// Positions at the first key `>= key` (or `<= key` in reverse), then
    /// applies the prefix filter.
    pub fn seek(&mut self, key: &[u8]) {
        self.inner.seek(key);
        self.skip_prefix_mismatches();
    }

    pub fn next(&mut self) {
        self.inner.next();
        self.skip_prefix_mismatches();
    }

    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    pub fn key(&self) -> &[u8] {
        self.inner.key()
    }

    pub fn value(&self) -> Result<Vec<u8>> {
        self.db.read_value_at(self.inner.value())
    }

    fn skip_prefix_mismatches(&mut self) {
        if self.prefix.is_empty() {
            return;
        }
        while self.inner.valid() && !self.inner.key().starts_with(self.prefix.as_slice()) {
            self.inner.next();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::db::DB;
    use crate::options::{IteratorOptions, Options};

    fn opts(dir: &std::path::Path) -> Options {
        Options { dir_path: dir.to_path_buf(), data_file_size: 1024 * 1024, ..Options::default() }
    }

    #[test]
    fn forward_iteration_is_ascending() {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::open(opts(dir.path())).unwrap();
        db.put(b"b", b"2").unwrap();
        db.put(b"a", b"1").unwrap();
        db.put(b"c", b"3").unwrap();

        let mut it = db.iter(IteratorOptions::default());
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn reverse_iteration_is_descending() {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::open(opts(dir.path())).unwrap();
        db.put(b"a", b"1").unwrap();
        db.put(b"b", b"2").unwrap();

        let mut it = db.iter(IteratorOptions { prefix: Vec::new(), reverse: true });
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn prefix_filter_keeps_only_matching_keys() {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::open(opts(dir.path())).unwrap();
        db.put(b"user:1", b"a").unwrap();
        db.put(b"user:2", b"b").unwrap();
        db.put(b"order:1", b"c").unwrap();

        let mut it = db.iter(IteratorOptions { prefix: b"user:".to_vec(), reverse: false });
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"user:1".to_vec(), b"user:2".to_vec()]);
    }
}
