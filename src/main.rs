use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use raidsync::block::BlockOff;
use raidsync::config::{SyncFlags, SyncState};
use raidsync::content::state_read;
use raidsync::disk::handle_map;
use raidsync::hash::{HashAlgo, HashEngine};
use raidsync::logger::Logger;
use raidsync::progress::{ProgressReporter, ProgressState};
use raidsync::state_sync;

/// Brings one or more parity files back into agreement with the data disks
/// described by a content-file checkpoint.
#[derive(Debug, Parser)]
#[clap(name = "raidsync", version)]
struct Args {
    /// Content-file checkpoint to read disk/block state from and write back to.
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    content: PathBuf,

    /// Override a disk's mount point: NAME:PATH. Repeatable.
    #[clap(short, long = "disk", value_name = "NAME:PATH")]
    disk: Vec<String>,

    /// Parity file path, one per level in order P, Q, R, S, T, U. Repeatable.
    #[clap(short, long = "parity", parse(from_os_str), value_name = "FILE")]
    parity: Vec<PathBuf>,

    /// Block size in bytes.
    #[clap(long, default_value_t = 262_144)]
    block_size: usize,

    /// Hash algorithm backing the current hash seed.
    #[clap(long, arg_enum, default_value = "blake2b")]
    hash: HashAlgo,

    /// Compute CHG hashes before touching parity.
    #[clap(long)]
    prehash: bool,

    /// Force parity open/resize even when the parity disks look smaller
    /// than the last known used size.
    #[clap(long)]
    force_full: bool,

    /// Accepted for CLI contract fidelity; content-file population is out
    /// of scope for this engine.
    #[clap(long)]
    force_nocopy: bool,

    /// Skip fallocate when extending parity files.
    #[clap(long)]
    skip_fallocate: bool,

    /// How many per-block EIOs to tolerate before a hard bail.
    #[clap(long, default_value_t = 100)]
    io_error_limit: u32,

    /// Autosave threshold in bytes (0 disables periodic checkpointing).
    #[clap(long, default_value_t = 0)]
    autosave: u64,

    /// First block index to process.
    #[clap(long, default_value_t = 0)]
    block_start: BlockOff,

    /// Number of blocks to process; 0 means "to the end".
    #[clap(long, default_value_t = 0)]
    block_count: BlockOff,

    /// Invert the success/failure sense of the run, for scripts that
    /// expect a recoverable-error exit.
    #[clap(long)]
    expect_recoverable: bool,

    /// Increase verbosity (can be used multiple times).
    #[clap(short, long, parse(from_occurrences))]
    verbose: u32,

    /// Log file, in addition to stderr.
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    log_file: Option<PathBuf>,
}

fn main() -> ExitCode
{
    let args = Args::parse();

    let log_file = match &args.log_file {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!("error: {}: {}", path.display(), e);
                None
            }
        },
        None => None,
    };
    let mut logger = Logger::new(args.verbose, log_file);

    let content = match state_read(&args.content) {
        Ok(c) => c,
        Err(e) => {
            logger.msg_error(&format!(
                "{}: {} (this engine only checkpoints an existing content file; it does not scan disks to build one)",
                args.content.display(),
                e
            ));
            return ExitCode::FAILURE;
        }
    };

    let mut disks = content.disks;
    for spec in &args.disk {
        let Some((name, path)) = spec.split_once(':') else {
            logger.msg_error(&format!("--disk {spec}: expected NAME:PATH"));
            return ExitCode::FAILURE;
        };
        match disks.iter_mut().find(|d| d.name == name) {
            Some(d) => d.mount_point = PathBuf::from(path),
            None => {
                logger.msg_error(&format!("--disk {spec}: no such disk in content file"));
                return ExitCode::FAILURE;
            }
        }
    }

    let level = args.parity.len();
    if level == 0 || level > raidsync::raid::MAX_LEVEL {
        logger.msg_error(&format!("--parity must be given 1..={} times", raidsync::raid::MAX_LEVEL));
        return ExitCode::FAILURE;
    }

    let mut state = SyncState {
        block_size: args.block_size,
        level,
        hash_current: HashEngine::new(args.hash, [0; raidsync::hash::HASH_SIZE]),
        hash_previous: HashEngine::new(args.hash, [0; raidsync::hash::HASH_SIZE]),
        disks: handle_map(disks),
        parity: Vec::new(),
        parity_paths: args.parity,
        infoarr: content.infoarr,
        autosave_bytes: args.autosave,
        flags: SyncFlags {
            skip_self: false,
            skip_fallocate: args.skip_fallocate,
            force_full: args.force_full,
            force_nocopy: args.force_nocopy,
            prehash: args.prehash,
            expect_recoverable: args.expect_recoverable,
            force_autosave_at: None,
            io_error_limit: args.io_error_limit,
        },
        need_write: false,
        blockcount_limit: args.block_count,
        file_mode: 0o644,
        used_paritymax: content.used_paritymax,
    };

    let mut progress = CliProgress { verbosity: args.verbose };

    let result = state_sync(&mut state, args.block_start, args.block_count, Some(&args.content), &mut logger, &mut progress);

    match result {
        Ok(report) => {
            logger.msg_tag(
                "sync",
                &format!(
                    "{} committed, {} skipped, {} error(s), {} io error(s), {} silent error(s)",
                    report.indices_committed, report.indices_skipped, report.error, report.io_error, report.silent_error
                ),
            );

            let had_error = report.had_any_error();
            let success = if state.flags.expect_recoverable { had_error } else { !had_error };
            if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            logger.msg_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

/// Prints one status line per index at `-vv`, and nothing otherwise; never
/// requests early termination (the CLI has no interactive abort keystroke).
struct CliProgress {
    verbosity: u32,
}

impl ProgressReporter for CliProgress {
    fn report(&mut self, state: &ProgressState) -> bool
    {
        if self.verbosity >= 2 {
            eprintln!(
                "{}/{} (error {}, io_error {}, silent_error {})",
                state.position, state.blockmax, state.error, state.io_error, state.silent_error
            );
        }
        false
    }
}
