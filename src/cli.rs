//! Command-line interface for Confab
//!
//! Handles argument parsing and logging configuration.

use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;

/// Confab - Conference recording and transcription assistant
#[derive(Parser, Debug)]
#[command(name = "confab")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase logging verbosity
    /// -v = info, -vv = debug, -vvv = trace, -vvvv = all deps
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Record from the microphone until Enter is pressed
    Record {
        /// Stop automatically after this many seconds
        #[arg(short, long)]
        seconds: Option<u64>,

        /// Upload the finished recording for transcription
        #[arg(short, long)]
        transcribe: bool,
    },
    /// Play a recording
    Play {
        /// Recording file (path, or a file name inside the store)
        file: PathBuf,

        /// Start position in seconds, requested before the session opens
        #[arg(short = 'S', long)]
        seek: Option<f64>,
    },
    /// Upload an audio file for transcription and summarization
    Transcribe {
        /// Audio file to upload (.wav, .mp3, .m4a, .flac)
        file: PathBuf,
    },
    /// List conference records
    Records {
        /// Fetch the latest records from the backend first
        #[arg(short, long)]
        sync: bool,
    },
    /// Show a record's transcript and summary
    Show {
        /// Record index as printed by `records` (newest first, 1-based)
        #[arg(default_value_t = 1)]
        index: usize,

        /// Fetch transcript/summary bodies from the backend if linked
        #[arg(short, long)]
        fetch: bool,
    },
    /// Print the peak envelope of a recording
    Waveform {
        /// WAV file to scan
        file: PathBuf,
    },
    /// List audio input/output devices
    Devices,
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Base level for all modules - keep at warn to suppress noisy deps
    builder.filter_level(LevelFilter::Warn);

    // Set confab modules to requested verbosity level
    builder.filter_module("confab", args.log_level());

    // HTTP stack only at -vvvv (very verbose)
    if args.verbose >= 4 {
        builder.filter_module("reqwest", args.log_level());
        builder.filter_module("hyper", args.log_level());
    }

    builder.format_timestamp_millis().init();
}
