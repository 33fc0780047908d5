use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;

use commands::{CommandError, Stores, parse_since};
use vigil::{LogFormat, Runtime, VigilConfig, init_tracing};
use vigil_bus::EventQuery;
use vigil_memory::NewKnowledge;

#[derive(Parser, Debug)]
#[command(name = "vigil", version)]
#[command(about = "Vigil - durable event bus, cycle scheduler and agent memory")]
struct Cli {
    /// TOML configuration file; VIGIL_* environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the runtime and run until SIGINT or SIGTERM
    Run,
    /// Inspect or prune the event log
    Events {
        #[command(subcommand)]
        command: EventCommands,
    },
    /// Inspect or repair the memory write-ahead log
    Wal {
        #[command(subcommand)]
        command: WalCommands,
    },
    /// Manage the knowledge store
    Knowledge {
        #[command(subcommand)]
        command: KnowledgeCommands,
    },
    /// Write one memory snapshot
    Snapshot {
        /// Target directory (default: configured snapshot dir)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum EventCommands {
    /// Print the most recent events, oldest first
    Tail {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print events matching a filter
    Query {
        /// Event type tag, e.g. user_input
        #[arg(long = "type")]
        event_type: Option<String>,
        /// Only events at or after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Delete events older than the given number of days
    Retention {
        #[arg(long)]
        days: u32,
    },
}

#[derive(Subcommand, Debug)]
enum WalCommands {
    /// Report valid and corrupt records; exits 1 if any are corrupt
    Verify,
    /// Drop corrupt records, keeping the valid ones in order
    Repair,
}

#[derive(Subcommand, Debug)]
enum KnowledgeCommands {
    /// Add or refresh a fact
    Add {
        #[arg(long)]
        category: String,
        #[arg(long)]
        content: String,
        #[arg(long, default_value = "cli")]
        source: String,
        #[arg(long, default_value_t = 0.5)]
        confidence: f64,
    },
    /// List facts, optionally in one category
    List {
        #[arg(long)]
        category: Option<String>,
    },
    /// Remove a fact by content hash
    Purge { hash: String },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Runtime(#[from] vigil::RuntimeError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("failed to start async runtime: {0}")]
    AsyncRuntime(io::Error),

    #[error("write-ahead log has corrupt records")]
    CorruptWal,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match VigilConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(LogFormat::default());
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.telemetry.format);

    match execute(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Commands, config: &VigilConfig) -> Result<(), CliError> {
    if let Commands::Run = command {
        return run(config.clone());
    }

    let stores = Stores::new(config);
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        // Handled above, before stdout is locked
        Commands::Run => {}
        Commands::Events { command } => match command {
            EventCommands::Tail { limit } => {
                commands::events_tail(&stores, limit, &mut out)?;
            }
            EventCommands::Query {
                event_type,
                since,
                limit,
                offset,
            } => {
                let mut query = EventQuery::new().limit(limit).offset(offset);
                if let Some(event_type) = event_type {
                    query = query.of_type(event_type);
                }
                if let Some(since) = since {
                    query = query.since(parse_since(&since)?);
                }
                commands::events_query(&stores, &query, &mut out)?;
            }
            EventCommands::Retention { days } => {
                commands::events_retention(&stores, days, &mut out)?;
            }
        },
        Commands::Wal { command } => match command {
            WalCommands::Verify => {
                if !commands::wal_verify(&stores, &mut out)? {
                    return Err(CliError::CorruptWal);
                }
            }
            WalCommands::Repair => {
                commands::wal_repair(&stores, &mut out)?;
            }
        },
        Commands::Knowledge { command } => match command {
            KnowledgeCommands::Add {
                category,
                content,
                source,
                confidence,
            } => {
                let knowledge = NewKnowledge::new(content, category, source, confidence);
                commands::knowledge_add(&stores, &knowledge, &mut out)?;
            }
            KnowledgeCommands::List { category } => {
                commands::knowledge_list(&stores, category.as_deref(), &mut out)?;
            }
            KnowledgeCommands::Purge { hash } => {
                commands::knowledge_purge(&stores, &hash, &mut out)?;
            }
        },
        Commands::Snapshot { dir } => {
            commands::snapshot(&stores, dir.as_deref(), &mut out)?;
        }
    }

    out.flush().map_err(CommandError::from)?;
    Ok(())
}

fn run(config: VigilConfig) -> Result<(), CliError> {
    let async_runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("vigil-worker")
        .build()
        .map_err(CliError::AsyncRuntime)?;

    async_runtime.block_on(async move {
        let runtime = Runtime::start(config)?;
        runtime.run_until_signal().await?;
        Ok::<(), CliError>(())
    })
}
