//! Progress reporting (`state_progress_{begin,end,stop,restart}`,
//! `state_progress`). The only suspension point `hash_process`/
//! `sync_process` expose to callers: a progress report that can ask for
//! early, cooperative termination.

use crate::block::BlockOff;

/// A snapshot handed to [`ProgressReporter::report`].
#[derive(Copy, Clone, Debug)]
pub struct ProgressState {
    pub position: BlockOff,
    pub blockmax: BlockOff,
    pub error: u64,
    pub io_error: u64,
    pub silent_error: u64,
}

/// `state_progress_*` and `state_progress`.
pub trait ProgressReporter {
    fn begin(&mut self, _blockstart: BlockOff, _blockmax: BlockOff) {}

    /// Returns `true` to request early termination (cooperative abort).
    fn report(&mut self, _state: &ProgressState) -> bool
    {
        false
    }

    fn end(&mut self) {}
    fn stop(&mut self) {}
    fn restart(&mut self) {}
}

/// Used by tests and by the CLI when progress output is not requested.
#[derive(Default)]
pub struct NullProgress;

impl ProgressReporter for NullProgress {}
