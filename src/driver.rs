//! `state_sync` wires together parity open/resize, the hash pass, the sync
//! pass, and final close. This is the one entry point a collaborator (the
//! CLI, or a test) calls to run a full sync.

use std::path::Path;

use crate::block::BlockOff;
use crate::config::SyncState;
use crate::content::{state_write, Content};
use crate::error::{SyncError, SyncReport};
use crate::hash_process::hash_process;
use crate::logger::Logger;
use crate::parity::parity_create;
use crate::progress::ProgressReporter;
use crate::sync_process::sync_process;

/// Runs one full sync: opens/resizes parity to match the disks' current
/// block range, optionally prehashes CHG blocks, runs the sync pass over
/// `[blockstart, blockstart + effective blockcount)`, and closes every
/// parity handle before returning.
///
/// `blockcount == 0` means "to the end": the disks' own block range is
/// used unclamped. A nonzero `blockcount` caps it, mirroring
/// `state.blockcount_limit`.
pub fn state_sync(
    state: &mut SyncState,
    blockstart: BlockOff,
    blockcount: BlockOff,
    content_path: Option<&Path>,
    logger: &mut Logger,
    progress: &mut dyn ProgressReporter,
) -> Result<SyncReport, SyncError>
{
    if blockcount != 0 {
        state.blockcount_limit = blockcount;
    }

    let blockmax = state.blockmax();

    if blockstart > blockmax {
        return Err(SyncError::RangeOutOfBounds { blockstart, blockmax });
    }

    if blockstart == blockmax {
        logger.msg_status("nothing to do");
        return Ok(SyncReport::default());
    }

    open_and_resize_parity(state, blockmax, logger)?;
    refresh_free_space(state, logger);

    if state.flags.prehash {
        logger.msg_tag("sync", "prehashing");
        let skip_sync = hash_process(state, blockstart, blockmax, logger, progress)?;

        if skip_sync {
            close_parity(state, logger);
            return Ok(SyncReport::default());
        }

        if state.need_write {
            if let Some(path) = content_path {
                write_checkpoint(state, path)?;
            }
        }
    }

    logger.msg_tag("sync", "syncing");
    let result = sync_process(state, blockstart, blockmax, content_path, logger, progress);

    close_parity(state, logger);

    result
}

/// Step 2-4: create/open each parity level, track the smallest allocated
/// size across levels, bail (unless `force_full`) when that size indicates
/// an unmounted parity disk or a freshly added level, then `chsize` every
/// level up to `blockmax`.
fn open_and_resize_parity(state: &mut SyncState, blockmax: BlockOff, logger: &mut Logger) -> Result<(), SyncError>
{
    state.parity.clear();
    let mut smallest: Option<u64> = None;

    for path in &state.parity_paths {
        let p = parity_create(path, state.block_size)?;
        let size = p.allocated_size()?;
        smallest = Some(match smallest {
            None => size,
            Some(s) => s.min(size),
        });
        state.parity.push(p);
    }

    if let Some(smallest) = smallest {
        if !state.flags.force_full && smallest < state.used_paritymax {
            let err = if smallest == 0 {
                SyncError::ParityNotMounted { smallest, used: state.used_paritymax }
            } else {
                SyncError::NewParityLevel { smallest, used: state.used_paritymax }
            };
            logger.msg_error(&err.to_string());
            return Err(err);
        }
    }

    let skip_fallocate = state.flags.skip_fallocate || state.flags.force_full;
    for p in state.parity.iter_mut() {
        p.chsize(blockmax as u64, skip_fallocate)?;
    }

    state.used_paritymax = state.used_paritymax.max(blockmax as u64);

    Ok(())
}

/// Free-space accounting is an external collaborator contract referenced
/// by name only; it has no bearing on parity/hash correctness, so it's
/// represented here as a status line rather than a real disk-usage probe.
fn refresh_free_space(state: &SyncState, logger: &mut Logger)
{
    logger.msg_status(&format!(
        "blockmax {}, {} disks, {} parity level(s)",
        state.blockmax(),
        state.disks.len(),
        state.level
    ));
}

fn write_checkpoint(state: &mut SyncState, path: &Path) -> Result<(), SyncError>
{
    let content = Content {
        disks: state.disks.iter().map(|s| s.disk.clone()).collect(),
        infoarr: state.infoarr.clone(),
        used_paritymax: state.used_paritymax,
    };
    state_write(&content, path).map_err(|source| SyncError::StateWrite { source })?;
    state.need_write = false;
    Ok(())
}

fn close_parity(state: &mut SyncState, logger: &mut Logger)
{
    for (l, p) in std::mem::take(&mut state.parity).into_iter().enumerate() {
        if let Err(e) = p.close() {
            logger.msg_warning(&format!("error closing parity level {l}: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array;
    use crate::block::{Block, BlockState};
    use crate::config::SyncFlags;
    use crate::content::state_read;
    use crate::disk::{handle_map, Disk, FileEntry};
    use crate::hash::{HashAlgo, HashEngine};
    use crate::info::InfoArray;
    use crate::progress::NullProgress;
    use std::fs;
    use std::os::unix::fs::MetadataExt;
    use tempfile::tempdir;

    const BLOCK_SIZE: usize = 8;

    fn write_file(dir: &std::path::Path, name: &str, content: &[u8]) -> FileEntry
    {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        let meta = fs::metadata(&path).unwrap();
        FileEntry {
            sub_path: name.into(),
            size: meta.len(),
            mtime_sec: meta.mtime(),
            mtime_nsec: meta.mtime_nsec(),
            inode: meta.ino(),
            is_copy: false,
        }
    }

    fn base_state(dir: &std::path::Path, disks: Vec<Disk>, level: usize) -> SyncState
    {
        let parity_paths = (0..level).map(|l| dir.join(format!("parity{l}"))).collect();
        let infoarr_len = disks.iter().map(|d| d.blockmax() as usize).max().unwrap_or(0);

        SyncState {
            block_size: BLOCK_SIZE,
            level,
            hash_current: HashEngine::new(HashAlgo::Crc32c, [1; 16]),
            hash_previous: HashEngine::new(HashAlgo::Crc32c, [2; 16]),
            disks: handle_map(disks),
            parity: Vec::new(),
            parity_paths,
            infoarr: InfoArray::new(infoarr_len),
            autosave_bytes: 0,
            flags: SyncFlags::default(),
            need_write: false,
            blockcount_limit: 0,
            file_mode: 0o644,
            used_paritymax: 0,
        }
    }

    #[test]
    fn opens_parity_syncs_and_closes_handles()
    {
        let dir = tempdir().unwrap();
        let d0 = dir.path().join("d0");
        fs::create_dir_all(&d0).unwrap();

        let mut disk0 = Disk::new("d0", d0.clone(), 1);
        let fe = write_file(&d0, "a.bin", b"AAAAAAAA");
        let fr = disk0.add_file(fe);
        disk0.set(0, Block::new(BlockState::Chg, fr, 0, Array::default()));

        let mut state = base_state(dir.path(), vec![disk0], 1);
        let mut logger = Logger::new(0, None);
        let mut progress = NullProgress;

        let report = state_sync(&mut state, 0, 0, None, &mut logger, &mut progress).unwrap();

        assert_eq!(report.indices_committed, 1);
        assert!(state.parity.is_empty(), "parity handles closed after the run");
        assert!(dir.path().join("parity0").exists());
    }

    #[test]
    fn blockstart_equal_blockmax_is_a_noop()
    {
        let dir = tempdir().unwrap();
        let disk0 = Disk::new("d0", dir.path().join("d0"), 0);
        let mut state = base_state(dir.path(), vec![disk0], 1);
        let mut logger = Logger::new(0, None);
        let mut progress = NullProgress;

        let report = state_sync(&mut state, 0, 0, None, &mut logger, &mut progress).unwrap();
        assert_eq!(report.indices_committed, 0);
    }

    #[test]
    fn blockstart_past_blockmax_is_fatal()
    {
        let dir = tempdir().unwrap();
        let disk0 = Disk::new("d0", dir.path().join("d0"), 2);
        let mut state = base_state(dir.path(), vec![disk0], 1);
        let mut logger = Logger::new(0, None);
        let mut progress = NullProgress;

        let err = state_sync(&mut state, 5, 0, None, &mut logger, &mut progress).unwrap_err();
        assert!(matches!(err, SyncError::RangeOutOfBounds { .. }));
    }

    #[test]
    fn prehash_fills_hashes_before_sync_pass_runs()
    {
        let dir = tempdir().unwrap();
        let d0 = dir.path().join("d0");
        fs::create_dir_all(&d0).unwrap();

        let mut disk0 = Disk::new("d0", d0.clone(), 1);
        let fe = write_file(&d0, "a.bin", b"AAAAAAAA");
        let fr = disk0.add_file(fe);
        disk0.set(0, Block::new(BlockState::Chg, fr, 0, Array::default()));

        let mut state = base_state(dir.path(), vec![disk0], 1);
        state.flags.prehash = true;

        let content_path = dir.path().join("content.bin");
        let mut logger = Logger::new(0, None);
        let mut progress = NullProgress;

        let report = state_sync(&mut state, 0, 0, Some(&content_path), &mut logger, &mut progress).unwrap();

        assert_eq!(report.indices_committed, 1);
        assert_eq!(state.disks[0].disk.get(0).state, BlockState::Blk);
        assert!(content_path.exists());
        let content = state_read(&content_path).unwrap();
        assert_eq!(content.disks.len(), 1);
    }

    #[test]
    fn shrunken_parity_aborts_unless_force_full()
    {
        let dir = tempdir().unwrap();
        let d0 = dir.path().join("d0");
        fs::create_dir_all(&d0).unwrap();

        let mut disk0 = Disk::new("d0", d0.clone(), 2);
        let fe = write_file(&d0, "a.bin", b"AAAAAAAA");
        let fr = disk0.add_file(fe);
        disk0.set(0, Block::new(BlockState::Chg, fr, 0, Array::default()));
        disk0.set(1, Block::new(BlockState::Chg, fr, 1, Array::default()));

        let mut state = base_state(dir.path(), vec![disk0], 1);
        // Simulate a previous run that had already committed parity up to
        // block 5, but the parity file visible now is smaller (disk not
        // mounted, or truncated).
        state.used_paritymax = 5;

        let mut logger = Logger::new(0, None);
        let mut progress = NullProgress;

        let err = state_sync(&mut state, 0, 0, None, &mut logger, &mut progress).unwrap_err();
        assert!(matches!(err, SyncError::ParityNotMounted { .. }));
    }
}
