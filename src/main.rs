//! # Wiki Batch CLI (`wbatch`)
//!
//! The `wbatch` binary loads a dataset into a persistent session and walks it
//! item by item against the wiki API.
//!
//! ## Usage
//!
//! ```bash
//! wbatch --config ./config/wbatch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wbatch load <csv>` | Parse a dataset and make it the session's dataset |
//! | `wbatch select [columns...]` | Restrict which columns are applied |
//! | `wbatch run` | Start or resume the batch run |
//! | `wbatch status` | Show position, counters and recent results |
//! | `wbatch reset` | Start the dataset over from the first row |
//! | `wbatch log export` | Export the result log as text |
//! | `wbatch log clear` | Clear the result log |
//! | `wbatch message lock <text>` | Use one commit message for every item |
//! | `wbatch message unlock` | Go back to generated messages |
//! | `wbatch completions <shell>` | Print a shell completion script |
//!
//! ## Environment
//!
//! | Variable | Purpose |
//! |----------|---------|
//! | `WBATCH_TOKEN` | API bearer token (name configurable via `api.token_env`) |
//! | `WBATCH_LOG` | `tracing` filter, default `wiki_batch=info,warn` |
//! | `WBATCH_LOG_FORMAT` | `compact` (default) or `json` |

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wiki_batch::config::{self, TransportStrategy};
use wiki_batch::models::ExecutionMode;
use wiki_batch::progress::ProgressMode;
use wiki_batch::{batch_cmd, dataset, export, status};

/// Wiki Batch CLI: resumable, reviewable batch edits of wiki item metadata.
///
/// All commands except `completions` accept a `--config` flag pointing to a
/// TOML configuration file. See `config/wbatch.example.toml` for a full
/// example.
#[derive(Parser)]
#[command(
    name = "wbatch",
    about = "Wiki Batch: resumable, reviewable batch edits of wiki item metadata",
    version,
    long_about = "Wiki Batch walks a CSV dataset row by row, fetches each item's live state, \
    derives the minimal field, tag and flag changes, shows them as a diff for review, and \
    submits them through the structured API or the legacy edit form. Progress is persisted \
    after every item so a run can be resumed at any time."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/wbatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a dataset.
    ///
    /// The first non-empty line is the header and must contain an `id`
    /// column. Loading replaces the previous dataset and resets progress and
    /// the result log.
    Load {
        /// CSV file to load.
        path: PathBuf,

        /// Only apply these columns (default: all).
        #[arg(long, num_args = 1..)]
        select: Vec<String>,
    },

    /// Restrict which columns are applied. No arguments selects all.
    Select { columns: Vec<String> },

    /// Start or resume the batch run from the saved position.
    Run {
        /// Override `batch.mode` for this run.
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Override `transport.strategy` for this run.
        #[arg(long, value_enum)]
        transport: Option<TransportArg>,

        /// Progress output on stderr (default: human when stderr is a TTY).
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Show the session status.
    Status,

    /// Start the dataset over: position, result log and previous item.
    Reset,

    /// Result log commands.
    Log {
        #[command(subcommand)]
        action: LogAction,
    },

    /// Commit-message lock.
    Message {
        #[command(subcommand)]
        action: MessageAction,
    },

    /// Generate a shell completion script on stdout.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum LogAction {
    /// Write the log as text, one line per entry.
    Export {
        /// Output file (default: stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Remove every log entry. The position is kept.
    Clear,
}

#[derive(Subcommand)]
enum MessageAction {
    /// Use `text` as the commit message for every item.
    Lock { text: String },
    /// Go back to generated change summaries.
    Unlock,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Interactive,
    Unattended,
}

impl From<ModeArg> for ExecutionMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Interactive => ExecutionMode::Interactive,
            ModeArg::Unattended => ExecutionMode::Unattended,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TransportArg {
    Patch,
    Legacy,
}

impl From<TransportArg> for TransportStrategy {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Patch => TransportStrategy::Patch,
            TransportArg::Legacy => TransportStrategy::Legacy,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("WBATCH_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "wiki_batch=debug,info"
        } else {
            "wiki_batch=info,warn"
        })
    });

    let format = env::var("WBATCH_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(*shell, &mut command, "wbatch", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Load { path, select } => {
            dataset::run_load(&cfg, &path, select).await?;
        }
        Commands::Select { columns } => {
            dataset::run_select(&cfg, columns).await?;
        }
        Commands::Run {
            mode,
            transport,
            progress,
        } => {
            let progress = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            batch_cmd::run_batch(
                &cfg,
                mode.map(Into::into),
                transport.map(Into::into),
                progress,
            )
            .await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::Reset => {
            dataset::run_reset(&cfg).await?;
        }
        Commands::Log { action } => match action {
            LogAction::Export { output } => {
                export::run_export(&cfg, output.as_deref()).await?;
            }
            LogAction::Clear => {
                dataset::run_clear_log(&cfg).await?;
            }
        },
        Commands::Message { action } => match action {
            MessageAction::Lock { text } => {
                dataset::run_lock_message(&cfg, text).await?;
            }
            MessageAction::Unlock => {
                dataset::run_unlock_message(&cfg).await?;
            }
        },
        Commands::Completions { .. } => {}
    }

    Ok(())
}
