// LogQuest - main.rs
//
// Command-line entry point. Handles:
// 1. CLI argument parsing
// 2. config.toml loading and logging initialisation (debug mode support)
// 3. Dispatching a search against the local engine and following its
//    progress through store events
// 4. Printing and exporting the final results

use logquest::app::dispatcher::{DispatchRequest, SearchOutcome, SessionDispatcher};
use logquest::app::store::TransitionKind;
use logquest::core::{export, query};
use logquest::core::model::{ResultSnapshot, Session, Span};
use logquest::platform::config::{self, AppConfig, PlatformPaths};
use logquest::platform::local_engine::LocalEngine;
use logquest::util::{self, error::LogQuestError};

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

/// Session name used for the single search a CLI invocation runs.
const CLI_SESSION: &str = "cli";

/// How often the CLI wakes to check on a running search.
const POLL_INTERVAL_MS: u64 = 200;

/// LogQuest - search directories of log files with streaming results.
///
/// Each subdirectory of the spaces directory is a searchable space.
#[derive(Parser, Debug)]
#[command(name = "LogQuest", version, about)]
struct Cli {
    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug", global = true)]
    debug: bool,

    /// Read configuration from this file instead of the platform default.
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Override the directory that holds the spaces.
    #[arg(long = "spaces-dir", global = true)]
    spaces_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Full-text search over a time span.
    Search {
        /// Search expression, e.g. `error host=db1 or /timeout \d+/`.
        query: String,

        /// Space to search.
        #[arg(short = 's', long = "space")]
        space: String,

        /// Start of the span (RFC 3339). Defaults to the configured span before `--to`.
        #[arg(long = "from", value_parser = parse_time)]
        from: Option<DateTime<Utc>>,

        /// End of the span (RFC 3339, exclusive). Defaults to now.
        #[arg(long = "to", value_parser = parse_time)]
        to: Option<DateTime<Utc>>,

        /// Grouping label recorded on the session.
        #[arg(short = 't', long = "tag")]
        tag: Option<String>,

        /// Write results to a .csv or .json file.
        #[arg(short = 'e', long = "export")]
        export: Option<PathBuf>,
    },

    /// Find lines containing a pattern, at any time.
    Index {
        /// Literal pattern, matched case-insensitively.
        pattern: String,

        #[arg(short = 's', long = "space")]
        space: String,

        /// Write results to a .csv or .json file.
        #[arg(short = 'e', long = "export")]
        export: Option<PathBuf>,
    },

    /// Compile a search expression and show how it is interpreted.
    Inspect {
        query: String,

        #[arg(short = 's', long = "space", default_value = "default")]
        space: String,
    },

    /// List the available spaces.
    Spaces,
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

fn main() {
    let cli = Cli::parse();

    // Config first so its log level can take part in logging setup; the
    // warnings are reported once the subscriber exists.
    let paths = PlatformPaths::resolve();
    let (mut app_config, warnings) = match cli.config.as_deref() {
        Some(path) => match config::load_config_file(path) {
            Ok(loaded) => loaded,
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },
        None => config::load_config(&paths.config_dir),
    };
    if let Some(ref dir) = cli.spaces_dir {
        app_config.spaces_dir = Some(dir.clone());
    }

    util::logging::init(cli.debug, app_config.log_level.as_deref());
    for warning in &warnings {
        tracing::warn!(warning = %warning, "Config warning");
    }

    tracing::info!(
        version = util::constants::APP_VERSION,
        debug = cli.debug,
        "LogQuest starting"
    );

    if let Err(e) = run(cli.command, &app_config, &paths) {
        tracing::error!(error = %e, "Command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(
    command: Command,
    app_config: &AppConfig,
    paths: &PlatformPaths,
) -> Result<(), LogQuestError> {
    let engine = LocalEngine::new(app_config.engine_config(paths));

    match command {
        Command::Search {
            query,
            space,
            from,
            to,
            tag,
            export,
        } => {
            let to = to.unwrap_or_else(Utc::now);
            let from = from.unwrap_or(to - Duration::hours(app_config.default_span_hours));
            let span = Span::new(from, to);
            let mut request = DispatchRequest::events(CLI_SESSION, query, span, space);
            if let Some(tag) = tag {
                request = request.with_tag(tag);
            }
            run_search(engine, request, export)
        }
        Command::Index {
            pattern,
            space,
            export,
        } => {
            let request = DispatchRequest::index(CLI_SESSION, pattern, space);
            run_search(engine, request, export)
        }
        Command::Inspect { query, space } => {
            let to = Utc::now();
            let span = Span::new(to - Duration::hours(app_config.default_span_hours), to);
            let inspection = query::inspect(&query, span, &space);
            let rendered = serde_json::to_string_pretty(&inspection)
                .unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"));
            println!("{rendered}");
            if !inspection.is_valid() {
                query::compile(&query)?;
            }
            Ok(())
        }
        Command::Spaces => {
            for name in engine.list_spaces()? {
                println!("{name}");
            }
            Ok(())
        }
    }
}

/// Dispatch one search, report progress until it finishes, then print and
/// optionally export its results.
fn run_search(
    engine: LocalEngine,
    request: DispatchRequest,
    export_path: Option<PathBuf>,
) -> Result<(), LogQuestError> {
    let dispatcher = SessionDispatcher::with_client(Arc::new(engine));
    let events = dispatcher.store().subscribe();

    let task = dispatcher.dispatch(request)?;

    while !task.is_finished() {
        match events.recv_timeout(std::time::Duration::from_millis(POLL_INTERVAL_MS)) {
            Ok(event) if event.kind == TransitionKind::Stats => {
                if let Some(session) = dispatcher.store().get(CLI_SESSION) {
                    report_progress(&session);
                }
            }
            Ok(_) | Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    let outcome = task.wait();
    let session = dispatcher.store().get(CLI_SESSION);

    match outcome {
        SearchOutcome::Completed { .. } | SearchOutcome::Cancelled => {}
        SearchOutcome::Failed(e) => return Err(e.into()),
        SearchOutcome::Orphaned(e) => return Err(e.into()),
    }

    let Some(session) = session else {
        return Ok(());
    };
    print_results(&session.results);
    eprintln!(
        "{} result(s), status {}",
        session.results.tuple_count(),
        session.status
    );

    if let Some(path) = export_path {
        let count = export::export_to_file(&session.results, &path)?;
        eprintln!("Exported {count} result(s) to {}", path.display());
    }
    Ok(())
}

fn report_progress(session: &Session) {
    let stats = &session.stats;
    eprintln!(
        "scanned {}/{} files, {} matches",
        stats["files_scanned"], stats["files_total"], stats["records_matched"]
    );
}

/// Print every tuple as tab-separated cells, grouped in key order.
fn print_results(results: &ResultSnapshot) {
    for rows in results.tuples.values() {
        for row in rows {
            let cells: Vec<String> = row
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => "-".to_string(),
                    other => other.to_string(),
                })
                .collect();
            println!("{}", cells.join("\t"));
        }
    }
}
