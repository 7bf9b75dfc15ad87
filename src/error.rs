//! Error taxonomy (C15). Fatal conditions propagate as [`SyncError`]; every
//! other condition is a per-block outcome recorded on [`BlockOutcome`] and
//! never aborts the pass.

use thiserror::Error;

use crate::block::BlockOff;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("data disk I/O error on disk {disk} at index {index}: {source}")]
    DataDiskIo { disk: usize, index: BlockOff, #[source] source: std::io::Error },

    #[error("parity I/O error on level {level} at index {index}: {source}")]
    ParityIo { level: usize, index: BlockOff, #[source] source: std::io::Error },

    #[error("parity_sync failed on level {level}: {source}")]
    ParitySync { level: usize, #[source] source: std::io::Error },

    #[error("state_write failed: {source}")]
    StateWrite { #[source] source: std::io::Error },

    #[error("blockstart ({blockstart}) > blockmax ({blockmax})")]
    RangeOutOfBounds { blockstart: BlockOff, blockmax: BlockOff },

    #[error("parity disks not mounted (smallest allocated size {smallest} < used size {used})")]
    ParityNotMounted { smallest: u64, used: u64 },

    #[error("new parity level added (smallest allocated size {smallest} < used size {used}); rerun with force_full")]
    NewParityLevel { smallest: u64, used: u64 },

    #[error("RAID codec error: {0}")]
    Raid(#[from] crate::raid::RaidError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Per-index bookkeeping for the sync pass. Not an error type: these are
/// expected, recoverable outcomes that the pass must remember in order to
/// decide commit/skip/recovery, not conditions that unwind the call stack.
#[derive(Default, Debug)]
pub struct BlockOutcome {
    pub error_on_this_block: bool,
    pub io_error_on_this_block: bool,
    pub silent_error_on_this_block: bool,
    pub fixed_error_on_this_block: bool,
    pub parity_needs_to_be_updated: bool,
}

impl BlockOutcome {
    /// Whether the index can proceed to parity generate & commit.
    pub fn can_commit(&self) -> bool
    {
        !self.error_on_this_block
            && !self.io_error_on_this_block
            && (!self.silent_error_on_this_block || self.fixed_error_on_this_block)
    }

    /// Whether the index saw a silent or IO error: drives the `bad` flag
    /// and suppresses the `info.timestamp` refresh.
    pub fn saw_silent_or_io_error(&self) -> bool
    {
        self.silent_error_on_this_block || self.io_error_on_this_block
    }
}

/// Run-wide counters returned to the caller (materialised as a value instead of a process exit code).
#[derive(Default, Debug, Clone, Copy)]
pub struct SyncReport {
    pub error: u64,
    pub io_error: u64,
    pub silent_error: u64,
    pub indices_committed: u64,
    pub indices_skipped: u64,
}

impl SyncReport {
    pub fn had_any_error(&self) -> bool
    {
        self.error > 0 || self.io_error > 0 || self.silent_error > 0
    }
}
