//! # sqlog
//!
//! Command-line front-end for the SQL log sink:
//!
//! - `sqlog pipe` logs each line of stdin through the sink
//! - `sqlog tail` prints the newest stored entries

#![deny(unsafe_code)]

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use sqlog_core::LogLevel;
use sqlog_logging::{LogQuery, LogReader, SqlLogger, SqliteRepository, StoredEntry};
use sqlog_settings::{OptionsMonitor, SinkOptions};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// SQL log sink tool.
#[derive(Parser, Debug)]
#[command(name = "sqlog", about = "Batched SQL log sink")]
struct Cli {
    /// Filter for the tool's own diagnostics (`RUST_LOG` wins).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log every line read from stdin.
    Pipe(PipeArgs),
    /// Print stored entries, oldest of the selection first.
    Tail(TailArgs),
}

#[derive(Args, Debug)]
struct PipeArgs {
    /// Settings file (defaults to `SQLOG_SETTINGS` or `~/.sqlog/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Override the connection string from settings.
    #[arg(long)]
    connection_string: Option<String>,

    /// Override the log name from settings.
    #[arg(long)]
    log_name: Option<String>,

    /// Category recorded with each line.
    #[arg(long, default_value = "stdin")]
    category: String,

    /// Level recorded with each line.
    #[arg(long, default_value = "info", value_parser = parse_level)]
    level: LogLevel,

    /// Trace id recorded with each line.
    #[arg(long)]
    trace_id: Option<String>,

    /// Reload the settings file when it changes.
    #[arg(long, conflicts_with_all = ["connection_string", "log_name"])]
    watch: bool,
}

#[derive(Args, Debug)]
struct TailArgs {
    /// Database to read.
    #[arg(long)]
    connection_string: String,

    /// Only this log stream.
    #[arg(long)]
    log_name: Option<String>,

    /// Only entries with this trace id.
    #[arg(long)]
    trace_id: Option<String>,

    /// Only entries at or above this level.
    #[arg(long, value_parser = parse_level)]
    min_level: Option<LogLevel>,

    /// Number of entries to print.
    #[arg(long, default_value = "50")]
    limit: usize,

    /// One JSON object per line.
    #[arg(long)]
    json: bool,
}

fn parse_level(s: &str) -> std::result::Result<LogLevel, String> {
    let level = LogLevel::from_str_lossy(s);
    if level == LogLevel::Info && !s.eq_ignore_ascii_case("info") {
        return Err(format!(
            "unknown level '{s}' (expected trace, debug, info, warn, error or critical)"
        ));
    }
    Ok(level)
}

impl PipeArgs {
    fn settings_path(&self) -> PathBuf {
        self.settings
            .clone()
            .unwrap_or_else(sqlog_settings::settings_path)
    }

    /// Settings file, then environment, then command-line overrides.
    fn resolve_options(&self) -> Result<SinkOptions> {
        let path = self.settings_path();
        let mut options = sqlog_settings::load_options_from_path(&path)
            .with_context(|| format!("Failed to load settings: {}", path.display()))?;
        if let Some(cs) = &self.connection_string {
            options.connection_string.clone_from(cs);
        }
        if let Some(name) = &self.log_name {
            options.log_name.clone_from(name);
        }
        Ok(options)
    }
}

/// Log each non-empty line from `input` until EOF or `shutdown` resolves.
/// Returns the number of lines logged.
async fn pipe_lines<R, F>(input: R, logger: &SqlLogger, level: LogLevel, shutdown: F) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    F: Future,
{
    let mut lines = input.lines();
    let mut count = 0;
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read input")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        logger.message(level, line);
                        count += 1;
                    }
                    None => break,
                }
            }
            _ = &mut shutdown => {
                tracing::info!("interrupted, stopping input");
                break;
            }
        }
    }
    Ok(count)
}

async fn run_pipe(args: PipeArgs, log_level: &str) -> Result<()> {
    let options = args.resolve_options()?;
    if options.connection_string.is_empty() {
        bail!("no connection string configured (use --connection-string or settings)");
    }

    let monitor = OptionsMonitor::new(options);
    let _watcher = if args.watch {
        Some(sqlog_settings::watch_file(monitor.clone(), &args.settings_path())?)
    } else {
        None
    };

    let provider =
        sqlog_logging::init_subscriber_with_sink(log_level, monitor.subscribe(), SqliteRepository::new())
            .context("Failed to start log sink")?;

    let mut logger = provider.create_logger(args.category.as_str());
    if let Some(trace_id) = &args.trace_id {
        logger = logger.with_trace_id(trace_id.as_str());
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let count = pipe_lines(stdin, &logger, args.level, tokio::signal::ctrl_c()).await?;
    tracing::debug!(count, "input finished, disposing sink");

    // Disposal waits on the flush worker; keep it off the runtime threads.
    tokio::task::spawn_blocking(move || provider.dispose())
        .await
        .context("Sink disposal panicked")?;
    Ok(())
}

fn format_entry(entry: &StoredEntry) -> String {
    let mut line = format!(
        "{} {:<8} [{}] {}",
        entry.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        entry.level.to_string(),
        entry.category,
        entry.message
    );
    if let Some(trace_id) = &entry.trace_id {
        line.push_str(" trace=");
        line.push_str(trace_id);
    }
    line
}

fn run_tail(args: &TailArgs, out: &mut impl Write) -> Result<()> {
    let conn = sqlog_logging::open_read_only(&args.connection_string)
        .with_context(|| format!("Failed to open database: {}", args.connection_string))?;
    let query = LogQuery {
        log_name: args.log_name.clone(),
        trace_id: args.trace_id.clone(),
        min_level: args.min_level,
        limit: Some(args.limit),
    };
    let entries = LogReader::new(&conn).query(&query)?;

    for entry in entries.iter().rev() {
        if args.json {
            writeln!(out, "{}", serde_json::to_string(entry)?)?;
        } else {
            writeln!(out, "{}", format_entry(entry))?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Pipe(args) => run_pipe(args, &cli.log_level).await,
        Command::Tail(args) => {
            sqlog_logging::init_subscriber(&cli.log_level);
            let stdout = std::io::stdout();
            run_tail(&args, &mut stdout.lock())
        }
    }
}
