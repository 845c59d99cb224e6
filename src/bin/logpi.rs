//! CLI surface for the indexer (spec §1 "out of scope: command-line
//! surface"; SPEC_FULL.md §10.1 "still must exist to drive the library").
//!
//! Mirrors the teacher's `bin/paraglob.rs` shape: a `clap` derive parser,
//! thin `cmd_*` functions that build a [`logpi::Config`] and drive the
//! library, `anyhow::Result` + `.context()` for user-facing error chains.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use logpi::{Config, Pipeline};

/// Recognized options mirror spec §6's CLI surface table
/// (`debug-level`, `greedy`, `write-auto`, `serial`) plus thread-count and
/// chunk-size overrides the core's `Config` already supports.
#[derive(Parser)]
#[command(name = "logpi")]
#[command(
    about = "Index IPv4/IPv6/MAC occurrences in plain-text log files",
    long_about = "logpi - streaming inverted index over network addresses in log files\n\n\
    Scans one or more log files for IPv4, IPv6, and MAC address literals and \n\
    writes a sorted index mapping each canonical address to every line/field \n\
    it occurred at. Without -w/-o, the index is printed to stdout; with -w, \n\
    each input gets its own `<source>.lpi` file alongside it.\n\n\
    Examples:\n\
      logpi access.log                     # prints the index to stdout\n\
      logpi -w *.log                       # index every file, writing alongside each\n\
      logpi -d 2 -g access.log.gz          # debug verbosity 2, quote-insensitive fields\n\
      logpi -s huge_file.log               # force serial mode for debugging"
)]
#[command(version)]
struct Cli {
    /// Log files to index, or "-" for stdin (spec §6 "Input").
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,

    /// Verbosity of the observability sink (0-9); no semantic effect (spec §6).
    #[arg(short = 'd', long = "debug-level", default_value = "0")]
    debug_level: u8,

    /// Ignore quote characters when splitting fields (spec §4.5 step 1, §6).
    #[arg(short = 'g', long)]
    greedy: bool,

    /// Write `<source>.lpi` next to each input file (forbidden with stdin).
    #[arg(short = 'w', long = "write-auto")]
    write_auto: bool,

    /// Force a single worker thread and disable parallel dispatch (spec §6).
    #[arg(short = 's', long)]
    serial: bool,

    /// Override the auto-detected worker thread count.
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Override the Reader's buffer size, in bytes (default 128 MiB).
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Write the merged index to this path instead of `<source>.lpi`.
    /// Only valid with a single input file.
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.output.is_some() && cli.inputs.len() > 1 {
        anyhow::bail!("-o/--output can only be used with a single input file");
    }
    // spec §6: "write-auto | Emitter writes <source>.lpi per input file;
    // forbidden when input is stdin" — stdin has no source path to name the
    // index file after, so -w with a "-" input is a hard error regardless
    // of whether -o is also present.
    if cli.write_auto && cli.inputs.iter().any(|p| p.as_os_str() == "-") {
        anyhow::bail!("-w/--write-auto cannot be used with stdin input (\"-\"); there is no source path to name the index file after");
    }

    let mut builder = Config::builder()
        .debug_level(cli.debug_level)
        .greedy(cli.greedy)
        .write_auto(cli.write_auto)
        .serial(cli.serial);
    if let Some(threads) = cli.threads {
        builder = builder.worker_count(threads);
    }
    if let Some(chunk_size) = cli.chunk_size {
        builder = builder.chunk_size(chunk_size);
    }
    let config = builder.build();

    let quit = install_quit_handler();

    for input in &cli.inputs {
        if let Err(err) = index_one_file(input, cli.output.as_deref(), &config, quit.clone()) {
            eprintln!("[ERROR] {input}: {err:#}", input = input.display());
            // spec §7: input open/read failures abort this file, continue
            // with the next; output failures and cap overruns are fatal to
            // the whole run.
            if is_fatal(&err) {
                return Err(err);
            }
        }
        if quit.load(std::sync::atomic::Ordering::Relaxed) {
            break;
        }
    }

    Ok(())
}

/// Where a single input's index ends up, per spec §4.4/§6: an explicit
/// `-o` path wins, then per-file write-auto, then the shared stdout stream.
enum OutputTarget {
    Explicit(PathBuf),
    WriteAuto(PathBuf),
    Stdout,
}

fn index_one_file(
    input: &Path,
    explicit_output: Option<&Path>,
    config: &Config,
    quit: Arc<AtomicBool>,
) -> Result<()> {
    let target = match explicit_output {
        Some(path) => OutputTarget::Explicit(path.to_path_buf()),
        None if config.write_auto => OutputTarget::WriteAuto(default_index_path(input)),
        None => OutputTarget::Stdout,
    };

    let (mut sink, display_name): (Box<dyn Write>, String) = match &target {
        OutputTarget::Explicit(path) | OutputTarget::WriteAuto(path) => {
            let file = File::create(path)
                .map_err(|e| logpi::IndexError::OutputFailed(e.to_string()))
                .with_context(|| format!("failed to open output file: {}", path.display()))?;
            (Box::new(file), path.display().to_string())
        }
        OutputTarget::Stdout => (Box::new(io::stdout()), "stdout".to_string()),
    };

    let pipeline = Pipeline::new(config.clone());
    let stats = pipeline
        .run_file(input, &mut sink, quit)
        .with_context(|| format!("failed to index {}", input.display()))?;

    if config.debug_level > 0 {
        eprintln!(
            "[INFO] {}: {} lines, {} addresses, {} unique -> {}",
            input.display(),
            stats.lines_processed,
            stats.addresses_extracted,
            stats.unique_addresses,
            display_name,
        );
    }

    Ok(())
}

/// `<source-path>.lpi` next to the source (spec §6 "Default filename").
fn default_index_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".lpi");
    PathBuf::from(name)
}

/// Register a Ctrl-C handler that flips the pipeline's cooperative "quit"
/// flag (spec §5 "Cancellation"). The handler itself is the only place a
/// signal is ever consumed; everything downstream just polls the flag.
fn install_quit_handler() -> Arc<AtomicBool> {
    let quit = Arc::new(AtomicBool::new(false));
    let handler_flag = quit.clone();
    let _ = ctrlc::set_handler(move || {
        handler_flag.store(true, std::sync::atomic::Ordering::Relaxed);
    });
    quit
}

/// Output failures and resource-cap overruns abort the whole run (spec §7);
/// everything else is scoped to the one file that failed.
fn is_fatal(err: &anyhow::Error) -> bool {
    if let Some(ioe) = err.downcast_ref::<logpi::IndexError>() {
        matches!(
            ioe,
            logpi::IndexError::OutputFailed(_)
                | logpi::IndexError::ResourceLimitExceeded(_)
                | logpi::IndexError::AllocationFailed(_)
        )
    } else {
        false
    }
}
