//! Standard file I/O: a plain `std::fs::File`, opened for append writes and
//! positional reads.

use super::IOManager;
use crate::error::Result;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::path::Path;

pub struct FileIO {
    /// Used for reads: positional reads via `read_at`/`seek_read` don't move
    /// a shared cursor, so concurrent readers can share this handle freely.
    reader: File,
    /// Used for writes: append-mode writes always land at the current end
    /// of file, but the underlying fd position still has to be serialized
    /// across concurrent writers.
    writer: Mutex<File>,
}

impl FileIO {
    pub fn open(path: &Path) -> Result<Self> {
        let writer = OpenOptions::new().create(true).append(true).read(true).open(path)?;
        let reader = writer.try_clone()?;
        Ok(Self { reader, writer: Mutex::new(writer) })
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

impl IOManager for FileIO {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        Ok(read_at(&self.reader, buf, offset)?)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        use std::io::Write;
        let mut writer = self.writer.lock();
        writer.write_all(buf)?;
        Ok(buf.len())
    }

    fn sync(&self) -> Result<()> {
        Ok(self.writer.lock().sync_all()?)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.reader.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_at_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.data");
        let io = FileIO::open(&path).unwrap();

        io.write(b"hello").unwrap();
        io.write(b"world").unwrap();
        assert_eq!(io.size().unwrap(), 10);

        let mut buf = [0u8; 5];
        io.read(&mut buf, 5).unwrap();
        assert_eq!(&buf, b"world");
    }
}
