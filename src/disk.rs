//! Disk/handle map (C3): the ordered collection of data-disk slots backing
//! one sync run, plus the file-entity arena each disk's blocks reference.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockOff, FileRef};
use crate::handle::DataHandle;

/// One tracked file on a disk: size, mtime, inode, and sub-path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub sub_path: String,
    pub size: u64,
    pub mtime_sec: i64,
    pub mtime_nsec: i64,
    pub inode: u64,
    /// File was deduplicated against another by metadata match.
    pub is_copy: bool,
}

/// A named collection of blocks indexed `0..blockmax`, plus its directory
/// path and file arena.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Disk {
    pub name: String,
    pub mount_point: PathBuf,
    blocks: Vec<Block>,
    files: Vec<FileEntry>,
}

impl Disk {
    pub fn new(name: impl Into<String>, mount_point: PathBuf, blockmax: usize) -> Self
    {
        Self {
            name: name.into(),
            mount_point,
            blocks: vec![Block::empty(); blockmax],
            files: Vec::new(),
        }
    }

    pub fn blockmax(&self) -> BlockOff
    {
        self.blocks.len() as BlockOff
    }

    pub fn resize(&mut self, blockmax: usize)
    {
        self.blocks.resize(blockmax, Block::empty());
    }

    /// `disk_block_get(disk, i)`.
    pub fn get(&self, i: BlockOff) -> &Block
    {
        &self.blocks[i as usize]
    }

    pub fn get_mut(&mut self, i: BlockOff) -> &mut Block
    {
        &mut self.blocks[i as usize]
    }

    /// `blockarr.set(i, block)`.
    pub fn set(&mut self, i: BlockOff, block: Block)
    {
        self.blocks[i as usize] = block;
    }

    pub fn add_file(&mut self, file: FileEntry) -> FileRef
    {
        self.files.push(file);
        (self.files.len() - 1) as FileRef
    }

    /// `block_file_get(b)`.
    pub fn file(&self, r: FileRef) -> &FileEntry
    {
        &self.files[r as usize]
    }

    pub fn full_path(&self, r: FileRef) -> PathBuf
    {
        self.mount_point.join(&self.file(r).sub_path)
    }
}

/// Per-run bookkeeping for one disk slot: its [`Disk`] plus the lazily
/// opened handle on whichever file is currently active (C3's "handle map").
pub struct DiskSlot {
    pub disk: Disk,
    pub handle: Option<DataHandle>,
    /// File currently open on `handle`, if any.
    pub open_file: Option<FileRef>,
}

impl DiskSlot {
    pub fn new(disk: Disk) -> Self
    {
        Self { disk, handle: None, open_file: None }
    }

    /// Closes whatever is open. An error closing a read-only handle should
    /// be impossible; the caller propagates it as fatal rather than
    /// silently dropping it here.
    pub fn close(&mut self) -> std::io::Result<()>
    {
        self.open_file = None;
        match self.handle.take() {
            Some(h) => h.close(),
            None => Ok(()),
        }
    }
}

/// `handle_map(state) -> (handle[], diskmax)`: materialises the ordered
/// list of data-disk slots for one sync run.
pub fn handle_map(disks: Vec<Disk>) -> Vec<DiskSlot>
{
    disks.into_iter().map(DiskSlot::new).collect()
}
