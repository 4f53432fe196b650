mod checksum;
mod cli;
mod commands;
mod container;
mod diff;
mod filter;
mod fs_tree;
mod memory_tree;
mod node;
mod persistent_tree;
mod preferences;
mod progress;
mod report;
mod session;
mod tree;

use cli::{Cli, Command};
use commands::{accept_changes, check_directory, find_by_checksum, seal_directory};
use std::fmt as stdfmt;
use std::io::{IsTerminal, stderr};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{Event, Level, Subscriber, error, info};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

struct SealExitCode;

impl SealExitCode {
    /// Exit code used when the tree no longer matches the store.
    fn drift_detected() -> ExitCode {
        ExitCode::from(1)
    }

    /// Exit code used for other errors (I/O errors, invalid arguments, etc.).
    fn any_error() -> ExitCode {
        ExitCode::from(255)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    if let Some(directory) = cli.directory
        && let Err(e) = std::env::set_current_dir(&directory)
    {
        error!(
            "Failed to change directory to {}: {}",
            directory.display(),
            e
        );
        return SealExitCode::any_error();
    }

    let root = PathBuf::from(".");

    let result: anyhow::Result<ExitCode> = match cli.command {
        Command::Init { force } => handle_init(&root, force),
        Command::Status { all, diff } => handle_status(&root, all, diff),
        Command::Verify {} => handle_verify(&root),
        Command::Accept { fingerprint, paths } => {
            handle_accept(&root, &paths, fingerprint.as_deref())
        }
        Command::Find { checksum } => handle_find(&root, &checksum),
    };

    match result {
        Ok(exit_code) => exit_code,
        Err(err) => {
            error!("{err}");
            SealExitCode::any_error()
        }
    }
}

fn handle_init(root: &Path, force: bool) -> anyhow::Result<ExitCode> {
    let result = seal_directory(root, force)?;
    info!(
        "Sealed {} files ({})",
        result.statistics.file_count(),
        node::size_to_string(result.statistics.total_size())
    );
    Ok(ExitCode::SUCCESS)
}

fn handle_status(root: &Path, all: bool, diff: bool) -> anyhow::Result<ExitCode> {
    let result = check_directory(root, all)?;

    report::print_entries(&result.entries, diff);

    if result.is_clean() {
        return Ok(ExitCode::SUCCESS);
    }

    println!();
    println!("Fingerprint: {}", result.fingerprint);
    info!(
        "Run 'treeseal accept --fingerprint {}' to accept these changes.",
        result.fingerprint
    );

    Ok(SealExitCode::drift_detected())
}

fn handle_verify(root: &Path) -> anyhow::Result<ExitCode> {
    let result = check_directory(root, false)?;

    if result.is_clean() {
        info!("Verification successful: No changes or corruption detected");
        return Ok(ExitCode::SUCCESS);
    }

    report::print_entries(&result.entries, false);

    error!(
        "Verification failed: {} change(s) detected",
        result.entries.len()
    );
    Ok(SealExitCode::drift_detected())
}

fn handle_accept(
    root: &Path,
    paths: &[String],
    fingerprint: Option<&str>,
) -> anyhow::Result<ExitCode> {
    let result = accept_changes(root, paths, fingerprint)?;
    if result.accepted == 0 {
        info!("Nothing to accept");
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_find(root: &Path, checksum: &str) -> anyhow::Result<ExitCode> {
    let paths = find_by_checksum(root, checksum)?;
    if paths.is_empty() {
        info!("No stored file has checksum {checksum}");
    }
    for path in paths {
        println!("{path}");
    }
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(verbose: u8) {
    let stderr_is_terminal = stderr().is_terminal();
    let formatter = EmojiFormatter { stderr_is_terminal };

    // -v/-vv win over RUST_LOG; without them RUST_LOG applies, then warn.
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };

    let fmt_layer = tracing_fmt::layer()
        .event_format(formatter)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

struct EmojiFormatter {
    stderr_is_terminal: bool,
}

impl<S, N> FormatEvent<S, N> for EmojiFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        if self.stderr_is_terminal {
            match *event.metadata().level() {
                Level::DEBUG => write!(writer, "🔍 ")?,
                Level::INFO => write!(writer, "ℹ️ ")?,
                Level::WARN => write!(writer, "⚠️  ")?,
                Level::ERROR => write!(writer, "❌️ ")?,
                _ => {}
            }
        } else {
            match *event.metadata().level() {
                Level::DEBUG => writer.write_str("DEBUG: ")?,
                Level::INFO => writer.write_str("INFO: ")?,
                Level::WARN => writer.write_str("WARN: ")?,
                Level::ERROR => writer.write_str("ERROR: ")?,
                _ => {}
            }
        }

        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
