use std::backtrace::BacktraceStatus;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fmsearch::catalog::Catalog;
use fmsearch::config::{Config, ConfigArgs, ConfigError};
use fmsearch::index::stats::{data_files, show_stats};
use fmsearch::output;
use fmsearch::utils::progress::ScanProgress;
use fmsearch::server::protocol::{Query, QueryMode, parse_count, unescape};
use fmsearch::server::{
    DirectoryPoller, FileEvents, IndexServer, Lifecycle, SearchClient, TaskTracker, socket_path,
};

#[derive(Parser)]
#[command(name = "fmsearch", version)]
#[command(about = "Compressed full-text search over append-only files")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build indices for every data file, then keep them current
    Index {
        /// Directory holding the data files
        dir: PathBuf,

        /// Exit after one pass instead of watching for changes
        #[arg(long)]
        oneshot: bool,
    },
    /// Index the directory and answer queries on the socket
    Serve {
        /// Directory holding the data files
        dir: PathBuf,
    },
    /// Send a query to a running server
    Query {
        /// Pattern to look for; C escapes such as \x00 and \n are decoded
        pattern: String,

        /// Complete the pattern instead of listing matches
        #[arg(short, long, conflicts_with = "skip")]
        autocomplete: bool,

        /// Matches to pass over before listing (decimal, 0x hex or 0 octal)
        #[arg(long, value_parser = parse_skip, default_value = "0")]
        skip: u32,

        /// Smallest file name to search
        #[arg(long)]
        begin: Option<String>,

        /// Largest file name to search
        #[arg(long)]
        end: Option<String>,

        /// Group results under a file name heading
        #[arg(long)]
        heading: bool,

        /// Only print how many listed matches each file has
        #[arg(short, long)]
        count: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },
    /// Show index state for every data file
    Stats {
        /// Directory holding the data files
        dir: PathBuf,
    },
}

fn parse_skip(value: &str) -> Result<u32, String> {
    parse_count(value).ok_or_else(|| format!("{value:?} is not a non-negative count"))
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(err),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fmsearch=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// sysexits(3) codes; `libc` only exports these on BSD-family targets
const EX_USAGE: i32 = 64;
const EX_OSERR: i32 = 71;

/// Print the error chain, plus a backtrace when one was captured, and pick
/// the sysexits code
fn report(err: anyhow::Error) -> ExitCode {
    eprintln!("fmsearch: {err:#}");
    let backtrace = err.backtrace();
    if backtrace.status() == BacktraceStatus::Captured {
        eprintln!("{backtrace}");
    }
    let code = if err.downcast_ref::<ConfigError>().is_some() {
        EX_USAGE
    } else {
        EX_OSERR
    };
    ExitCode::from(code as u8)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Index { dir, oneshot } => {
            let config = Arc::new(Config::from_args(&cli.config, Some(dir.clone()))?);
            run_index(config, dir, oneshot)
        }
        Commands::Serve { dir } => {
            let config = Config::from_args(&cli.config, Some(dir.clone()))?;
            let socket = socket_path(config.socket.as_deref());
            IndexServer::new(Arc::new(config), dir, socket).run()
        }
        Commands::Query {
            pattern,
            autocomplete,
            skip,
            begin,
            end,
            heading,
            count,
            no_color,
        } => {
            let config = Config::from_args(&cli.config, None)?;
            let query = Query {
                mode: if autocomplete {
                    QueryMode::Autocomplete
                } else {
                    QueryMode::Search { skip }
                },
                begin,
                end,
                pattern: unescape(pattern.as_bytes()),
            };
            let client = SearchClient::new(socket_path(config.socket.as_deref()));
            let response = client.query(&query)?;

            let color = !no_color && std::io::stdout().is_terminal();
            if count {
                output::print_counts(&response, color)?;
            } else {
                output::print_response(&response, query.pattern.len(), color, heading)?;
            }
            Ok(())
        }
        Commands::Stats { dir } => {
            let config = Config::from_args(&cli.config, Some(dir.clone()))?;
            show_stats(&dir, &config.data_suffix, &config.index_suffix)
        }
    }
}

fn run_index(config: Arc<Config>, dir: PathBuf, oneshot: bool) -> Result<()> {
    let lifecycle = Arc::new(Lifecycle::new(
        dir.clone(),
        Arc::clone(&config),
        Arc::new(Catalog::new()),
        TaskTracker::new(),
        false,
    ));

    let mut poller = DirectoryPoller::new(&dir, config.data_suffix.clone());
    if !oneshot {
        // changes made during the first pass are picked up by the poller
        poller.prime()?;
    }

    let files = data_files(&dir, &config.data_suffix)?.len() as u64;
    let progress = ScanProgress::new(files);
    let summary = lifecycle.scan(&progress)?;
    progress.finish();
    println!(
        "Indexed {} of {} data files ({} skipped, {} failed)",
        summary.indexed, summary.files, summary.skipped, summary.failed
    );

    if oneshot {
        if summary.failed > 0 {
            bail!("{} data files could not be indexed", summary.failed);
        }
        return Ok(());
    }

    let events: Arc<dyn FileEvents> = Arc::new(Arc::clone(&lifecycle));
    let _watcher = poller.spawn(events, config.poll_interval())?;
    loop {
        std::thread::park();
    }
}
