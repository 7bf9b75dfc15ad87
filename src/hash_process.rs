//! The hash pass (C4): for every CHG block in range, read its data and fill
//! `block.hash`, without touching parity. Runs only when `prehash` is set.

use crate::block::{block_has_updated_hash, BlockOff, BlockState};
use crate::config::SyncState;
use crate::error::SyncError;
use crate::handle::{handle_open, is_benign_open_error, is_eio};
use crate::logger::Logger;
use crate::progress::{ProgressReporter, ProgressState};

/// Runs the hash pass over `[blockstart, blockmax)`. Returns `true` if the
/// progress callback requested early termination (`skip_sync`), in which
/// case the caller must not run the sync pass afterward.
pub fn hash_process(
    state: &mut SyncState,
    blockstart: BlockOff,
    blockmax: BlockOff,
    logger: &mut Logger,
    progress: &mut dyn ProgressReporter,
) -> Result<bool, SyncError>
{
    let mut error_count: u64 = 0;
    let mut skip_sync = false;
    let diskmax = state.disks.len();

    'outer: for j in 0..diskmax {
        for i in blockstart..blockmax {
            if i >= state.disks[j].disk.blockmax() {
                continue;
            }

            let b = *state.disks[j].disk.get(i);
            if b.state != BlockState::Chg {
                continue;
            }
            // CHG never already has an updated hash; kept as a documented
            // invariant rather than a runtime branch.
            debug_assert!(!block_has_updated_hash(&b));

            let file_ref = b.file.expect("CHG block always has a file");

            if state.disks[j].open_file != Some(file_ref) {
                if let Err(e) = state.disks[j].close() {
                    return Err(SyncError::DataDiskIo { disk: j, index: i, source: e });
                }
            }

            if state.disks[j].handle.is_none() {
                let path = state.disks[j].disk.full_path(file_ref);
                match handle_open(&path) {
                    Ok(h) => {
                        state.disks[j].handle = Some(h);
                        state.disks[j].open_file = Some(file_ref);
                    }
                    Err(e) if is_eio(&e) => {
                        return Err(SyncError::DataDiskIo { disk: j, index: i, source: e });
                    }
                    Err(e) if is_benign_open_error(&e) => {
                        logger.msg_warning(&format!("{}: file modified during sync (open failed)", path.display()));
                        error_count += 1;
                        continue;
                    }
                    Err(e) => return Err(SyncError::DataDiskIo { disk: j, index: i, source: e }),
                }
            }

            let file_entry = state.disks[j].disk.file(file_ref).clone();
            let handle = state.disks[j].handle.as_mut().unwrap();

            let stat = handle.stat().map_err(|e| SyncError::DataDiskIo { disk: j, index: i, source: e })?;

            if !stat.matches(file_entry.size, file_entry.mtime_sec, file_entry.mtime_nsec, file_entry.inode) {
                logger.msg_warning(&format!("{}: file modified during sync", state.disks[j].disk.full_path(file_ref).display()));
                error_count += 1;
                continue;
            }

            let mut buf = vec![0u8; state.block_size];
            handle
                .read_block(b.file_pos as u64, state.block_size, &mut buf)
                .map_err(|e| SyncError::DataDiskIo { disk: j, index: i, source: e })?;

            let rehash = state.infoarr.get_rehash(i);
            let hash = if rehash { state.hash_previous.hash(&buf) } else { state.hash_current.hash(&buf) };

            let disk = &mut state.disks[j].disk;
            let nb = disk.get_mut(i);
            nb.hash = hash;
            nb.state = BlockState::Rep;
            state.need_write = true;

            let pstate = ProgressState { position: i, blockmax, error: error_count, io_error: 0, silent_error: 0 };
            if progress.report(&pstate) {
                skip_sync = true;
                break 'outer;
            }
        }
    }

    Ok(skip_sync)
}
