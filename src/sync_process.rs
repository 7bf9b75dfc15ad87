//! The sync pass (C5) and its autosave checkpointer (C6): the central loop
//! of a sync run. Per index: read every disk, verify hashes, attempt
//! RAID recovery of silently corrupted BLK blocks, regenerate parity when
//! needed, and commit block-state transitions — or leave the index
//! untouched and mark it `bad` if anything went wrong.

use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::block::{block_has_file, block_has_invalid_parity, block_has_updated_hash, commit_transition, Block, BlockOff, BlockState};
use crate::config::SyncState;
use crate::content::{state_write, Content};
use crate::error::{BlockOutcome, SyncError, SyncReport};
use crate::handle::{handle_open, is_benign_open_error, is_eio};
use crate::hash::{hash_is_zero, Hash};
use crate::info::info_make;
use crate::logger::Logger;
use crate::progress::{ProgressReporter, ProgressState};
use crate::raid::{raid_gen, raid_rec, raid_zero};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum FailedKind {
    /// CHG block whose previously stored hash was zero: its old-parity-era
    /// contribution is definitively zero, not today's buffer content.
    ChgZeroHash,
    /// REP / DELETED / non-zero-hash CHG: old-parity-era content is
    /// unknown and must be solved for, consuming recovery budget.
    NeedsUnknown,
    /// BLK whose stored hash no longer matches freshly read data.
    BlkSilent,
}

struct FailedEntry {
    disk_index: usize,
    size: usize,
    kind: FailedKind,
}

fn effective_size(file_size: Option<u64>, file_pos: u32, block_size: usize) -> usize
{
    match file_size {
        None => block_size,
        Some(size) => {
            let start = file_pos as u64 * block_size as u64;
            if start >= size {
                0
            } else {
                std::cmp::min(block_size as u64, size - start) as usize
            }
        }
    }
}

fn now_seconds() -> u64
{
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// `sync_process`: runs the main loop over `[blockstart, blockmax)`.
/// `content_path`, if given, is where autosave/final checkpoints are
/// written via [`state_write`].
pub fn sync_process(
    state: &mut SyncState,
    blockstart: BlockOff,
    blockmax: BlockOff,
    content_path: Option<&Path>,
    logger: &mut Logger,
    progress: &mut dyn ProgressReporter,
) -> Result<SyncReport, SyncError>
{
    let diskmax = state.disks.len();
    let level = state.level;
    let mut buffers: Vec<Vec<u8>> = vec![vec![0u8; state.block_size]; diskmax + level];

    if blockstart > blockmax {
        return Err(SyncError::RangeOutOfBounds { blockstart, blockmax });
    }

    let mut report = SyncReport::default();
    let autosave_limit = state.autosave_limit();
    let mut autosave_done: u64 = 0;
    // Count of indices left to process in this run; only a periodic
    // checkpoint can legitimately fire once this drops below `limit`, so it
    // must count down over the whole range, not reset alongside `autosave_done`.
    let mut autosave_missing: u64 = (blockmax - blockstart) as u64;

    let mut aborted = false;

    for i in blockstart..blockmax {
        if !index_enabled(state, i) {
            continue;
        }

        match sync_one_index(state, i, &mut buffers, &mut report, logger) {
            Ok(()) => {}
            Err(e) => {
                close_all_handles(state, logger);
                return Err(e);
            }
        }

        autosave_missing = autosave_missing.saturating_sub(1);
        if autosave_limit > 0 {
            autosave_done += 1;
        }

        let force_here = state.flags.force_autosave_at == Some(i);
        let periodic = state.autosave_bytes != 0 && autosave_limit > 0 && autosave_done >= autosave_limit && autosave_missing >= autosave_limit;

        if force_here || periodic {
            autosave_done = 0;
            if let Err(e) = checkpoint(state, content_path, logger) {
                close_all_handles(state, logger);
                return Err(e);
            }
        }

        let pstate = ProgressState {
            position: i,
            blockmax,
            error: report.error,
            io_error: report.io_error,
            silent_error: report.silent_error,
        };
        if progress.report(&pstate) {
            aborted = true;
            break;
        }
    }

    // Final checkpoint: one more `parity_sync` on every level, then the
    // content file, so the last batch of in-memory state/hash transitions
    // (computed but not yet durable if autosave never fired) isn't
    // silently dropped on a normal exit. Ordered parity-sync-then-write per
    // the "no state_write without a preceding parity_sync" invariant.
    if let Err(e) = checkpoint(state, content_path, logger) {
        close_all_handles(state, logger);
        return Err(e);
    }

    close_all_handles(state, logger);

    let _ = aborted;
    Ok(report)
}

/// An index is visited if some disk has a live file there and either the
/// parity at that index is known stale, or the index is flagged `bad`/
/// `rehash` from a previous run and needs another look. The latter two are
/// not raw block states, so they cannot fall out of `block_has_invalid_parity`
/// alone: without them a `bad` index of all-BLK blocks could never be
/// re-examined and cleared, and a pending rehash over all-BLK blocks could
/// never be carried out.
fn index_enabled(state: &SyncState, i: BlockOff) -> bool
{
    let mut any_file = false;
    let mut any_invalid = false;

    for slot in &state.disks {
        if i >= slot.disk.blockmax() {
            continue;
        }
        let b = slot.disk.get(i);
        any_file |= block_has_file(b);
        any_invalid |= block_has_invalid_parity(b);
    }

    any_file && (any_invalid || state.infoarr.get_bad(i) || state.infoarr.get_rehash(i))
}

fn sync_one_index(
    state: &mut SyncState,
    i: BlockOff,
    buffers: &mut [Vec<u8>],
    report: &mut SyncReport,
    logger: &mut Logger,
) -> Result<(), SyncError>
{
    let diskmax = state.disks.len();
    let level = state.level;
    let block_size = state.block_size;
    let rehash = state.infoarr.get_rehash(i);

    // A pending rehash must force a parity rewrite too: rewriting with the
    // same bytes is how the clean-commit path (which alone flushes the
    // stashed new-algorithm hashes and clears `info.rehash`) gets reached
    // for an index whose blocks are otherwise all BLK and unchanged.
    let mut outcome = BlockOutcome { parity_needs_to_be_updated: state.infoarr.get_bad(i) || rehash, ..Default::default() };
    let mut failed: Vec<FailedEntry> = Vec::new();
    let mut pending_rehash: HashMap<usize, Hash> = HashMap::new();

    for j in 0..diskmax {
        if i >= state.disks[j].disk.blockmax() {
            raid_zero(&mut buffers[j]);
            continue;
        }

        let b = *state.disks[j].disk.get(i);

        if block_has_invalid_parity(&b) {
            let file_size = b.file.map(|fr| state.disks[j].disk.file(fr).size);
            let size = effective_size(file_size, b.file_pos, block_size);
            let kind = if b.state == BlockState::Chg && hash_is_zero(&b.hash) {
                FailedKind::ChgZeroHash
            } else {
                FailedKind::NeedsUnknown
            };
            failed.push(FailedEntry { disk_index: j, size, kind });

            if b.state != BlockState::Chg {
                outcome.parity_needs_to_be_updated = true;
            }
        }

        if !block_has_file(&b) {
            raid_zero(&mut buffers[j]);
            continue;
        }

        let file_ref = b.file.expect("has_file implies a file reference");

        if state.disks[j].open_file != Some(file_ref) {
            state.disks[j].close().map_err(|e| SyncError::DataDiskIo { disk: j, index: i, source: e })?;
        }

        if state.disks[j].handle.is_none() {
            let path = state.disks[j].disk.full_path(file_ref);
            match handle_open(&path) {
                Ok(h) => {
                    state.disks[j].handle = Some(h);
                    state.disks[j].open_file = Some(file_ref);
                }
                Err(e) if is_eio(&e) => return Err(SyncError::DataDiskIo { disk: j, index: i, source: e }),
                Err(e) if is_benign_open_error(&e) => {
                    logger.msg_warning(&format!("{}: file inaccessible during sync", path.display()));
                    report.error += 1;
                    outcome.error_on_this_block = true;
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
            report.error += 1;
            outcome.error_on_this_block = true;
            continue;
        }

        match handle.read_block(b.file_pos as u64, block_size, &mut buffers[j]) {
            Ok(_) => {}
            Err(e) if is_eio(&e) => {
                report.io_error += 1;
                if report.io_error < state.flags.io_error_limit as u64 {
                    outcome.io_error_on_this_block = true;
                    continue;
                }
                return Err(SyncError::DataDiskIo { disk: j, index: i, source: e });
            }
            Err(e) => return Err(SyncError::DataDiskIo { disk: j, index: i, source: e }),
        }

        let active = if rehash { &state.hash_previous } else { &state.hash_current };
        let fresh_hash = active.hash(&buffers[j]);

        if rehash {
            let new_hash = state.hash_current.hash(&buffers[j]);
            pending_rehash.insert(j, new_hash);
        }

        if block_has_updated_hash(&b) {
            if fresh_hash != b.hash {
                if block_has_invalid_parity(&b) {
                    logger.msg_warning(&format!("{}: data change on replacement block", state.disks[j].disk.full_path(file_ref).display()));
                    report.error += 1;
                    outcome.error_on_this_block = true;
                } else {
                    let file_size = Some(file_entry.size);
                    let size = effective_size(file_size, b.file_pos, block_size);
                    failed.push(FailedEntry { disk_index: j, size, kind: FailedKind::BlkSilent });
                    report.silent_error += 1;
                    outcome.silent_error_on_this_block = true;
                }
            }
        } else {
            if !outcome.parity_needs_to_be_updated && (hash_is_zero(&b.hash) || fresh_hash != b.hash) {
                outcome.parity_needs_to_be_updated = true;
            }
            state.disks[j].disk.get_mut(i).hash = fresh_hash;
        }
    }

    if outcome.silent_error_on_this_block && !outcome.error_on_this_block && !outcome.io_error_on_this_block {
        attempt_recovery(state, i, buffers, &failed, report, &mut outcome)?;
    }

    if outcome.can_commit() {
        let mut parity_written = false;

        if outcome.parity_needs_to_be_updated {
            raid_gen(diskmax, level, buffers)?;

            for l in 0..level {
                match state.parity[l].write(i as u64, &buffers[diskmax + l]) {
                    Ok(()) => {}
                    Err(e) if is_eio(&e) => {
                        report.io_error += 1;
                        if report.io_error < state.flags.io_error_limit as u64 {
                            outcome.io_error_on_this_block = true;
                        } else {
                            return Err(SyncError::ParityIo { level: l, index: i, source: e });
                        }
                    }
                    Err(e) => return Err(SyncError::ParityIo { level: l, index: i, source: e }),
                }
            }

            parity_written = !outcome.io_error_on_this_block;
        }

        if !outcome.io_error_on_this_block {
            for j in 0..diskmax {
                if i >= state.disks[j].disk.blockmax() {
                    continue;
                }
                let b = *state.disks[j].disk.get(i);
                let new_state = commit_transition(b.state);
                if new_state != b.state {
                    let nb = if new_state == BlockState::Empty { Block::empty() } else { Block { state: new_state, ..b } };
                    state.disks[j].disk.set(i, nb);
                }
            }
            state.need_write = true;
            report.indices_committed += 1;

            if parity_written && !outcome.saw_silent_or_io_error() {
                for (j, new_hash) in pending_rehash.drain() {
                    if i < state.disks[j].disk.blockmax() {
                        let blk = state.disks[j].disk.get_mut(i);
                        if blk.state == BlockState::Blk {
                            blk.hash = new_hash;
                        }
                    }
                }
                state.infoarr.set(i, info_make(now_seconds(), false, false));
            }
        }
    } else {
        report.indices_skipped += 1;
    }

    if outcome.saw_silent_or_io_error() {
        let info = state.infoarr.get(i);
        state.infoarr.set(i, crate::info::info_set_bad(info));
    }

    Ok(())
}

fn attempt_recovery(
    state: &mut SyncState,
    i: BlockOff,
    buffers: &mut [Vec<u8>],
    failed: &[FailedEntry],
    report: &mut SyncReport,
    outcome: &mut BlockOutcome,
) -> Result<(), SyncError>
{
    let diskmax = state.disks.len();
    let level = state.level;

    let mut failed_map: Vec<usize> = Vec::new();
    let mut scratch: HashMap<usize, Vec<u8>> = HashMap::new();
    let mut any_blk = false;
    let mut too_many = false;

    for fe in failed {
        match fe.kind {
            FailedKind::ChgZeroHash => {
                raid_zero(&mut buffers[fe.disk_index]);
            }
            FailedKind::NeedsUnknown => {
                if failed_map.len() == level {
                    too_many = true;
                    break;
                }
                scratch.insert(fe.disk_index, buffers[fe.disk_index].clone());
                failed_map.push(fe.disk_index);
            }
            FailedKind::BlkSilent => {
                any_blk = true;
                if failed_map.len() == level {
                    too_many = true;
                    break;
                }
                failed_map.push(fe.disk_index);
            }
        }
    }

    if too_many || !any_blk {
        return Ok(());
    }

    for l in 0..level {
        match state.parity[l].read(i as u64, &mut buffers[diskmax + l]) {
            Ok(()) => {}
            Err(e) if is_eio(&e) => {
                report.io_error += 1;
                if report.io_error < state.flags.io_error_limit as u64 {
                    outcome.io_error_on_this_block = true;
                    return Ok(());
                }
                return Err(SyncError::ParityIo { level: l, index: i, source: e });
            }
            Err(e) => return Err(SyncError::ParityIo { level: l, index: i, source: e }),
        }
    }

    if raid_rec(&failed_map, diskmax, level, buffers).is_err() {
        // Recovery exhausts failed_mac > level, or matrix singular: leave
        // `bad` set, don't touch parity for this index.
        return Ok(());
    }

    let mut all_match = true;
    for fe in failed.iter().filter(|f| f.kind == FailedKind::BlkSilent) {
        for b in &mut buffers[fe.disk_index][fe.size..] {
            *b = 0;
        }

        let stored = fetch_stored_hash(state, fe.disk_index, i);
        let rehash = state.infoarr.get_rehash(i);
        let engine = if rehash { &state.hash_previous } else { &state.hash_current };
        let recomputed = engine.hash(&buffers[fe.disk_index]);

        if recomputed != stored {
            all_match = false;
            break;
        }
    }

    if all_match {
        outcome.fixed_error_on_this_block = true;
    }

    for (disk_index, orig) in scratch {
        buffers[disk_index] = orig;
    }

    Ok(())
}

fn fetch_stored_hash(state: &SyncState, disk_index: usize, i: BlockOff) -> Hash
{
    state.disks[disk_index].disk.get(i).hash
}

fn checkpoint(state: &mut SyncState, content_path: Option<&Path>, logger: &mut Logger) -> Result<(), SyncError>
{
    for (l, p) in state.parity.iter().enumerate() {
        p.sync().map_err(|source| SyncError::ParitySync { level: l, source })?;
    }

    if let Some(path) = content_path {
        let content = Content {
            disks: state.disks.iter().map(|s| s.disk.clone()).collect(),
            infoarr: state.infoarr.clone(),
            used_paritymax: state.used_paritymax,
        };
        state_write(&content, path).map_err(|source| SyncError::StateWrite { source })?;
        state.need_write = false;
    }

    logger.msg_flush();
    Ok(())
}

fn close_all_handles(state: &mut SyncState, logger: &mut Logger)
{
    for slot in &mut state.disks {
        if let Err(e) = slot.close() {
            logger.msg_warning(&format!("error closing handle during bail: {e}"));
        }
    }
}
