pub mod app;
pub mod backend;
pub mod config;
pub mod lifecycle;
pub mod mapping;
pub mod probe;
pub mod registry;
pub mod search;
pub mod source;
pub mod stats;
pub mod sync;
pub mod ui;
pub mod warm;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use once_cell::sync::Lazy;

use app::App;
use config::Config;
use lifecycle::{LifecycleError, LifecycleReport};
use search::{SearchError, SearchQuery};
use stats::StatsError;
use warm::{WarmError, WarmRequest};

/// Exit status when failures were recorded.
pub const EXIT_FAILURES: u8 = 1;

/// Exit status when the search backend could not be reached.
pub const EXIT_UNAVAILABLE: u8 = 2;

static LONG_VERSION: Lazy<String> = Lazy::new(|| {
    format!(
        "{}\nbuilt:  {}\ntarget: {}\nprofile: {}",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown"),
        option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown"),
        if option_env!("VERGEN_CARGO_DEBUG") == Some("true") {
            "debug"
        } else {
            "release"
        },
    )
});

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "search-sync",
    version,
    long_version = LONG_VERSION.as_str(),
    about = "Keep search indices in step with relational records",
    after_help = "destroy and reset assume exclusive access to the targeted indices: \
                  pause writers first, concurrent writes can race the delete/create window."
)]
pub struct Cli {
    /// Configuration file (defaults to SEARCH_SYNC_CONFIG, then the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Delete indexes and ingest pipelines (all discovered ones by default)
    Destroy {
        /// Only this index (repeatable)
        #[arg(long = "index", value_name = "NAME")]
        indexes: Vec<String>,

        /// Only this pipeline (repeatable)
        #[arg(long = "pipeline", value_name = "ID")]
        pipelines: Vec<String>,

        /// Skip the production confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Destroy, then recreate every discovered index and pipeline
    Reset {
        /// Skip the production confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Create indexes and put pipelines (all discovered ones by default)
    Create {
        #[arg(long = "index", value_name = "NAME")]
        indexes: Vec<String>,

        #[arg(long = "pipeline", value_name = "ID")]
        pipelines: Vec<String>,
    },
    /// Re-populate indexes from their row sources
    Warm {
        /// Only this index (repeatable)
        #[arg(long = "index", value_name = "NAME")]
        indexes: Vec<String>,

        /// Rows to skip per index, in key order
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Rows to attempt per index; 0 means no limit
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },
    /// Report whether the search backend is reachable
    Status,
    /// Show cluster statistics
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Run a search
    Search {
        /// Free text, or a JSON request body starting with `{`
        query: Option<String>,

        #[arg(long = "index", value_name = "NAME")]
        indexes: Vec<String>,

        #[arg(long)]
        size: Option<usize>,

        /// Zero-based page; negative values are treated as 0
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        page: i64,

        #[arg(long)]
        json: bool,
    },
    /// Print a configuration stanza for a new index
    MakeIndex { name: String },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

fn scope(items: Vec<String>) -> Option<Vec<String>> {
    (!items.is_empty()).then_some(items)
}

fn unavailable() -> ExitCode {
    eprintln!("search backend is not available");
    ExitCode::from(EXIT_UNAVAILABLE)
}

fn report_exit(report: &LifecycleReport) -> ExitCode {
    ui::print_lifecycle_report(report);
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILURES)
    }
}

fn parse_query(query: Option<String>) -> Result<SearchQuery> {
    match query {
        Some(text) if text.trim_start().starts_with('{') => {
            let body = serde_json::from_str(&text).context("query looks like JSON but does not parse")?;
            Ok(SearchQuery::Structured(body))
        }
        Some(text) => Ok(SearchQuery::text(text)),
        None => Ok(SearchQuery::MatchAll),
    }
}

/// Production environments need an explicit yes.
fn confirmed(app: &App, action: &str, yes: bool) -> Result<bool> {
    if yes || !app.config().is_production() {
        return Ok(true);
    }
    ui::confirm_destructive(action, &app.config().environment)
}

fn make_index(name: &str) -> Result<()> {
    registry::validate_index_name(name)?;
    println!("[[index]]");
    println!("name = \"{name}\"");
    println!("settings = {{}}");
    println!("mappings = {{}}");
    println!("# [index.source]");
    println!("# table = \"{name}\"");
    Ok(())
}

pub fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "search-sync", &mut std::io::stdout());
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Man => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::MakeIndex { ref name } => {
            make_index(name)?;
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let config = Config::load(cli.config.as_deref())?;
    let app = App::from_config(config)?;

    match cli.command {
        Commands::Destroy {
            indexes,
            pipelines,
            yes,
        } => {
            if !confirmed(&app, "destroy", yes)? {
                eprintln!("Aborted.");
                return Ok(ExitCode::from(EXIT_FAILURES));
            }
            let (indexes, pipelines) = match (scope(indexes), scope(pipelines)) {
                (None, None) => (None, None),
                (i, p) => (Some(i.unwrap_or_default()), Some(p.unwrap_or_default())),
            };
            match app.lifecycle().destroy(indexes.as_deref(), pipelines.as_deref()) {
                Ok(report) => Ok(report_exit(&report)),
                Err(LifecycleError::Unavailable) => Ok(unavailable()),
            }
        }
        Commands::Reset { yes } => {
            if !confirmed(&app, "reset", yes)? {
                eprintln!("Aborted.");
                return Ok(ExitCode::from(EXIT_FAILURES));
            }
            match app.lifecycle().reset() {
                Ok(report) => Ok(report_exit(&report)),
                Err(LifecycleError::Unavailable) => Ok(unavailable()),
            }
        }
        Commands::Create { indexes, pipelines } => {
            let (indexes, pipelines) = match (scope(indexes), scope(pipelines)) {
                (None, None) => (None, None),
                (i, p) => (Some(i.unwrap_or_default()), Some(p.unwrap_or_default())),
            };
            match app.lifecycle().create(indexes.as_deref(), pipelines.as_deref()) {
                Ok(report) => Ok(report_exit(&report)),
                Err(LifecycleError::Unavailable) => Ok(unavailable()),
            }
        }
        Commands::Warm {
            indexes,
            offset,
            limit,
        } => {
            let mut request = WarmRequest::all().window(offset, (limit > 0).then_some(limit));
            if let Some(indexes) = scope(indexes) {
                request = request.indexes(indexes);
            }
            let mut progress = ui::WarmProgressBar::new();
            match app.warmer().warm(&request, &mut progress) {
                Ok(report) => {
                    ui::print_warm_footer(&report);
                    Ok(if report.is_success() {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::from(EXIT_FAILURES)
                    })
                }
                Err(WarmError::Unavailable) => Ok(unavailable()),
                Err(e @ WarmError::UnknownIndex(_)) => Err(e.into()),
            }
        }
        Commands::Status => {
            if app.service().connection_status().is_available {
                println!("available");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("unavailable");
                Ok(ExitCode::from(EXIT_UNAVAILABLE))
            }
        }
        Commands::Stats { json } => match app.service().stats() {
            Ok(stats) => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                } else {
                    ui::print_stats(&stats);
                }
                Ok(ExitCode::SUCCESS)
            }
            Err(StatsError::Unavailable) => Ok(unavailable()),
            Err(e) => Err(e.into()),
        },
        Commands::Search {
            query,
            indexes,
            size,
            page,
            json,
        } => {
            let query = parse_query(query)?;
            let search = search::Search::new(query, scope(indexes));
            match search.execute(app.backend().as_ref(), size, page) {
                Ok(envelope) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&envelope)?);
                    } else {
                        ui::print_search(&envelope);
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(SearchError::Backend(e)) if e.is_no_nodes() => Ok(unavailable()),
                Err(e) => Err(e.into()),
            }
        }
        Commands::Completions { .. } | Commands::Man | Commands::MakeIndex { .. } => Ok(ExitCode::SUCCESS),
    }
}
