//! Read-only memory-mapped I/O, for data files that have been sealed and
//! will never be appended to again.

use super::IOManager;
use crate::error::{Error, Result};
use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::path::Path;

pub struct MmapIO {
    mmap: Mmap,
}

impl MmapIO {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the mapped file is a sealed data file this process owns
        // exclusively for the lifetime of the mapping; nothing else
        // truncates or rewrites it concurrently.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap })
    }
}

impl IOManager for MmapIO {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let offset = offset as usize;
        if offset >= self.mmap.len() {
            return Ok(0);
        }
        let end = (offset + buf.len()).min(self.mmap.len());
        let n = end - offset;
        buf[..n].copy_from_slice(&self.mmap[offset..end]);
        Ok(n)
    }

    fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(Error::Io(io::Error::new(io::ErrorKind::Unsupported, "mmap io is read-only")))
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.mmap.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::file_io::FileIO;

    #[test]
    fn reads_back_what_was_written_before_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sealed.data");
        {
            let io = FileIO::open(&path).unwrap();
            io.write(b"sealed contents").unwrap();
            io.sync().unwrap();
        }

        let io = MmapIO::open(&path).unwrap();
        assert_eq!(io.size().unwrap(), 15);
        let mut buf = [0u8; 6];
        io.read(&mut buf, 7).unwrap();
        assert_eq!(&buf, b"conten");
    }
}
