//! Configuration (C13): the `SyncState` the engine operates on, and the
//! flags a sync run takes as inputs alongside it.

use std::path::PathBuf;

use crate::block::BlockOff;
use crate::disk::DiskSlot;
use crate::hash::HashEngine;
use crate::info::InfoArray;
use crate::parity::ParityFile;

/// The flags a sync run takes alongside its `state`.
#[derive(Clone, Debug)]
pub struct SyncFlags {
    /// Skip the disk the content file itself lives on (not meaningfully
    /// actionable here since content-file placement is out of scope; kept
    /// for CLI/contract fidelity).
    pub skip_self: bool,
    pub skip_fallocate: bool,
    pub force_full: bool,
    pub force_nocopy: bool,
    pub prehash: bool,
    /// Inverts the success/failure sense of `state_sync`'s return, for
    /// tests that expect a recoverable-error exit.
    pub expect_recoverable: bool,
    /// Force an autosave checkpoint exactly when this index is committed.
    pub force_autosave_at: Option<BlockOff>,
    pub io_error_limit: u32,
}

impl Default for SyncFlags {
    fn default() -> Self
    {
        Self {
            skip_self: false,
            skip_fallocate: false,
            force_full: false,
            force_nocopy: false,
            prehash: false,
            expect_recoverable: false,
            force_autosave_at: None,
            io_error_limit: 100,
        }
    }
}

/// Everything the sync engine needs: parity geometry, disks, info array,
/// hash engines, autosave threshold, and flags.
pub struct SyncState {
    pub block_size: usize,
    /// Number of parity levels in use, 1..=6 (P..U).
    pub level: usize,
    pub hash_current: HashEngine,
    pub hash_previous: HashEngine,

    pub disks: Vec<DiskSlot>,
    pub parity: Vec<ParityFile>,
    pub parity_paths: Vec<PathBuf>,
    pub infoarr: InfoArray,

    pub autosave_bytes: u64,
    pub flags: SyncFlags,

    /// Content-file dirty marker (`need_write`).
    pub need_write: bool,
    /// Cap on how many blocks any disk may occupy (0 = unbounded).
    pub blockcount_limit: BlockOff,

    /// Unix mode bits new files would be created with; sync itself never
    /// creates data-disk files, kept only so the CLI can thread the
    /// contract value through unchanged.
    pub file_mode: u32,

    /// Highest block index any parity file has ever actually held valid
    /// data for (`parity_used_size`).
    pub used_paritymax: u64,
}

impl SyncState {
    /// `blockmax = parity_allocated_size(state)`, clamped by `blockcount` if
    /// nonzero.
    pub fn blockmax(&self) -> BlockOff
    {
        let disk_max = self.disks.iter().map(|d| d.disk.blockmax()).max().unwrap_or(0);

        if self.blockcount_limit != 0 {
            disk_max.min(self.blockcount_limit)
        } else {
            disk_max
        }
    }

    /// `autosavelimit = autosave_bytes / (diskmax * block_size)`.
    pub fn autosave_limit(&self) -> u64
    {
        let diskmax = self.disks.len() as u64;
        if diskmax == 0 || self.block_size == 0 {
            return 0;
        }
        self.autosave_bytes / (diskmax * self.block_size as u64)
    }
}
