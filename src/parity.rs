//! Parity-file abstraction (`parity_create/chsize/read/write/sync/close`):
//! one file per RAID level, exposing sized random-access block I/O.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// One parity level's backing file.
pub struct ParityFile {
    file: File,
    block_size: usize,
}

/// `parity_create`: opens (creating if absent) in read/write mode.
pub fn parity_create(path: &Path, block_size: usize) -> std::io::Result<ParityFile>
{
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)?;

    Ok(ParityFile { file, block_size })
}

impl ParityFile {
    /// `parity_allocated_size`: current block count of the file on disk.
    pub fn allocated_size(&self) -> std::io::Result<u64>
    {
        let len = self.file.metadata()?.len();
        Ok(len / self.block_size as u64)
    }

    /// `parity_chsize(size)`: truncate or extend to `blocks` blocks.
    /// `fallocate`s the new region unless `skip_fallocate` is set, on a
    /// best-effort basis; failure to preallocate is not fatal, the
    /// subsequent `set_len` still defines the logical size.
    pub fn chsize(&mut self, blocks: u64, skip_fallocate: bool) -> std::io::Result<()>
    {
        let new_len = blocks * self.block_size as u64;
        let old_len = self.file.metadata()?.len();

        if !skip_fallocate && new_len > old_len {
            let _ = nix::fcntl::fallocate(
                std::os::unix::io::AsRawFd::as_raw_fd(&self.file),
                nix::fcntl::FallocateFlags::empty(),
                old_len as i64,
                (new_len - old_len) as i64,
            );
        }

        self.file.set_len(new_len)
    }

    /// `parity_read(level, i, buf)`.
    pub fn read(&mut self, index: u64, buf: &mut [u8]) -> std::io::Result<()>
    {
        debug_assert!(buf.len() == self.block_size);
        self.file.seek(SeekFrom::Start(index * self.block_size as u64))?;
        self.file.read_exact(buf)
    }

    /// `parity_write(level, i, buf)`.
    pub fn write(&mut self, index: u64, buf: &[u8]) -> std::io::Result<()>
    {
        debug_assert!(buf.len() == self.block_size);
        self.file.seek(SeekFrom::Start(index * self.block_size as u64))?;
        self.file.write_all(buf)
    }

    /// `parity_sync`.
    pub fn sync(&self) -> std::io::Result<()>
    {
        self.file.sync_all()
    }

    /// `parity_close`.
    pub fn close(self) -> std::io::Result<()>
    {
        drop(self.file);
        Ok(())
    }
}

/// `parity_overflow(state, size)`: whether `size` blocks would exceed the
/// configured maximum parity size (0 = unbounded).
pub fn parity_overflow(max_blocks: u64, size: u64) -> bool
{
    max_blocks != 0 && size > max_blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn chsize_then_read_write_roundtrip()
    {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parity.p");
        let mut p = parity_create(&path, 4).unwrap();

        p.chsize(3, true).unwrap();
        assert_eq!(p.allocated_size().unwrap(), 3);

        p.write(1, &[9, 9, 9, 9]).unwrap();
        let mut buf = [0u8; 4];
        p.read(1, &mut buf).unwrap();
        assert_eq!(buf, [9, 9, 9, 9]);

        p.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 0]);
    }

    #[test]
    fn overflow_detection()
    {
        assert!(!parity_overflow(0, 1_000_000));
        assert!(!parity_overflow(100, 100));
        assert!(parity_overflow(100, 101));
    }
}
