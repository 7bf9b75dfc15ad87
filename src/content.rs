//! The content-file checkpoint store (C12). The engine only ever calls
//! [`state_write`], leaving the byte-for-byte on-disk format as a detail of
//! this module: `serde` + `bincode`, the same pairing used elsewhere for
//! on-disk structures.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::disk::Disk;
use crate::info::InfoArray;

/// The persisted model: every disk's block/file arena plus the info array.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Content {
    pub disks: Vec<Disk>,
    pub infoarr: InfoArray,
    pub used_paritymax: u64,
}

/// `state_write(state)`: serialises the checkpoint to a temp file next to
/// `path` and renames it into place, so a crash mid-write never corrupts
/// the previous, still-valid checkpoint.
pub fn state_write(content: &Content, path: &Path) -> std::io::Result<()>
{
    let tmp_path = tmp_path_for(path);

    {
        let mut tmp = std::fs::File::create(&tmp_path)?;
        let bytes = bincode::serialize(content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
    }

    std::fs::rename(&tmp_path, path)
}

/// Loads a previously written checkpoint, if any.
pub fn state_read(path: &Path) -> std::io::Result<Content>
{
    let bytes = std::fs::read(path)?;
    bincode::deserialize(&bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

fn tmp_path_for(path: &Path) -> PathBuf
{
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_through_disk()
    {
        let dir = tempdir().unwrap();
        let path = dir.path().join("content.bin");

        let content = Content {
            disks: vec![Disk::new("d0", PathBuf::from("/mnt/d0"), 3)],
            infoarr: InfoArray::new(3),
            used_paritymax: 3,
        };

        state_write(&content, &path).unwrap();
        assert!(path.exists());
        assert!(!tmp_path_for(&path).exists());

        let read_back = state_read(&path).unwrap();
        assert_eq!(read_back.disks.len(), 1);
        assert_eq!(read_back.disks[0].blockmax(), 3);
        assert_eq!(read_back.used_paritymax, 3);
    }

    #[test]
    fn second_write_replaces_first_atomically()
    {
        let dir = tempdir().unwrap();
        let path = dir.path().join("content.bin");

        let mut content = Content {
            disks: vec![Disk::new("d0", PathBuf::from("/mnt/d0"), 1)],
            infoarr: InfoArray::new(1),
            used_paritymax: 0,
        };
        state_write(&content, &path).unwrap();

        content.used_paritymax = 9;
        state_write(&content, &path).unwrap();

        assert_eq!(state_read(&path).unwrap().used_paritymax, 9);
    }
}
