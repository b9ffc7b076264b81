use std::fs::File;

use crate::Result;

/// Sequential sink a table is built into. Durability (`sync`) is the
/// caller's concern; the builder only appends and flushes.
pub trait WritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    fn sync(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Positioned reads over an immutable file. Readers share one handle
/// across concurrently constructed iterators.
pub trait RandomAccessFile: Send + Sync {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

impl RandomAccessFile for File {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        use std::os::unix::fs::FileExt;
        FileExt::read_exact_at(self, buf, offset)?;
        Ok(())
    }
}
