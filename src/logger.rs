use std::io::Write;
use std::fs::File;

/// A simple logger.
#[derive(Debug)]
pub struct Logger {
    verbosity: u32,
    log_file: Option<File>
}

impl Logger {
    /// Create a new logger.
    pub fn new(verbosity: u32, log_file: Option<File>) -> Self
    {
        Self {
            verbosity,
            log_file,
        }
    }

    /// Log a message, with a specified level.
    /// Logs also into the log file, if present.
    pub fn log(&mut self, level: u32, msg: &str)
    {
        if self.verbosity >= level {
            eprintln!("{}", msg);

            if let Some(log_file) = &mut self.log_file {
                writeln!(log_file, "{}", msg).unwrap_or_else(|_| {
                    eprintln!("error: couldn't write into the log file")
                });
            }
        }
    }

    /// `msg_tag`: a structured, always-shown status line (e.g. "sync",
    /// "scrub"), at verbosity 0.
    pub fn msg_tag(&mut self, tag: &str, msg: &str)
    {
        self.log(0, &format!("{}: {}", tag, msg));
    }

    /// `msg_status`: routine progress/status output, shown at `-v`.
    pub fn msg_status(&mut self, msg: &str)
    {
        self.log(1, msg);
    }

    /// `msg_warning`: a per-block condition that does not abort the run
    /// (benign open error, stat mismatch, silent error, ...).
    pub fn msg_warning(&mut self, msg: &str)
    {
        self.log(0, &format!("WARNING! {}", msg));
    }

    /// `msg_error`: a fatal condition about to unwind the pass.
    pub fn msg_error(&mut self, msg: &str)
    {
        self.log(0, &format!("ERROR! {}", msg));
    }

    /// `msg_progress`: verbose per-index progress, shown at `-vv`.
    pub fn msg_progress(&mut self, msg: &str)
    {
        self.log(2, msg);
    }

    /// `msg_flush`: flushes the log file, called around autosave
    /// checkpoints so a crash mid-run leaves a readable log.
    pub fn msg_flush(&mut self)
    {
        if let Some(log_file) = &mut self.log_file {
            let _ = log_file.flush();
        }
    }
}
