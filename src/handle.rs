//! Data file handle abstraction (`handle_open/close/read`): the one piece
//! of surface that touches data-disk files. Sync only ever opens these
//! read-only — it never rewrites a data disk.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// `stat(2)` fields compared against a [`crate::disk::FileEntry`] to detect
/// concurrent modification.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Stat {
    pub size: u64,
    pub mtime_sec: i64,
    pub mtime_nsec: i64,
    pub ino: u64,
}

impl Stat {
    /// Compares against the stored entity; any differing field is a
    /// "file modified during sync" condition.
    pub fn matches(&self, size: u64, mtime_sec: i64, mtime_nsec: i64, ino: u64) -> bool
    {
        self.size == size
            && self.mtime_sec == mtime_sec
            && self.mtime_nsec == mtime_nsec
            && self.ino == ino
    }
}

/// `handle_open/close/read(handle, file, mode, logger)`.
pub struct DataHandle {
    file: File,
}

/// `handle_open`. Read-only, matching the contract: sync never writes data
/// disks.
pub fn handle_open(path: &Path) -> std::io::Result<DataHandle>
{
    let file = File::open(path)?;
    Ok(DataHandle { file })
}

impl DataHandle {
    pub fn stat(&self) -> std::io::Result<Stat>
    {
        let meta = self.file.metadata()?;
        Ok(Stat {
            size: meta.len(),
            mtime_sec: meta.mtime(),
            mtime_nsec: meta.mtime_nsec(),
            ino: meta.ino(),
        })
    }

    /// Reads one block at `file_pos` (in block units) into `buf`, zero-padding
    /// anything past EOF of the last block. Returns the number of bytes
    /// actually read before the pad.
    pub fn read_block(&mut self, file_pos: u64, block_size: usize, buf: &mut [u8]) -> std::io::Result<usize>
    {
        debug_assert!(buf.len() >= block_size);

        self.file.seek(SeekFrom::Start(file_pos * block_size as u64))?;

        let mut total = 0;
        while total < block_size {
            let n = self.file.read(&mut buf[total..block_size])?;
            if n == 0 {
                break;
            }
            total += n;
        }

        for b in &mut buf[total..block_size] {
            *b = 0;
        }

        Ok(total)
    }

    /// `handle_close`. Surfaces close-time errors; a
    /// close failure on a read-only handle is "should be impossible" and is
    /// treated as fatal by the caller.
    pub fn close(self) -> std::io::Result<()>
    {
        drop(self.file);
        Ok(())
    }
}

/// `ErrorKind`-level classification used throughout the sync/hash passes to
/// decide fatal vs. per-block disposition.
pub fn is_eio(err: &std::io::Error) -> bool
{
    err.raw_os_error() == Some(libc::EIO)
}

pub fn is_benign_open_error(err: &std::io::Error) -> bool
{
    matches!(
        err.raw_os_error(),
        Some(code) if code == libc::ENOENT || code == libc::EACCES
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn read_block_short_at_eof_is_zero_padded()
    {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"hi").unwrap();
        f.flush().unwrap();

        let mut handle = handle_open(f.path()).unwrap();
        let mut buf = vec![0xffu8; 8];
        let n = handle.read_block(0, 8, &mut buf).unwrap();

        assert_eq!(n, 2);
        assert_eq!(&buf, &[b'h', b'i', 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn stat_matches_detects_any_field_change()
    {
        let s = Stat { size: 10, mtime_sec: 1, mtime_nsec: 2, ino: 3 };
        assert!(s.matches(10, 1, 2, 3));
        assert!(!s.matches(11, 1, 2, 3));
        assert!(!s.matches(10, 2, 2, 3));
        assert!(!s.matches(10, 1, 3, 3));
        assert!(!s.matches(10, 1, 2, 4));
    }

    #[test]
    fn open_missing_file_is_enoent()
    {
        let err = handle_open(Path::new("/nonexistent/does-not-exist")).unwrap_err();
        assert!(is_benign_open_error(&err));
        assert!(!is_eio(&err));
    }
}
