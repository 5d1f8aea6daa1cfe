//! `mweave` -- CLI binary for the mathweave problem-solving pipeline.
//!
//! Provides the following subcommands:
//!
//! - `mweave solve` -- Solve a problem, answering escalations on the terminal.
//! - `mweave resume` -- Answer the pending escalation of a suspended run.
//! - `mweave feedback` -- Confirm or reject a completed run's answer.
//! - `mweave pending` -- List runs waiting on a human.
//! - `mweave kb` -- Seed, search and inspect the knowledge store.
//! - `mweave audit` -- Show a run's audit trail.
//! - `mweave config` -- Show the resolved configuration.

use clap::{Parser, Subcommand};

mod commands;

/// mathweave problem-solving CLI.
#[derive(Parser)]
#[command(name = "mweave", about = "mathweave problem-solving CLI", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path (defaults to ~/.mathweave/config.toml).
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Reasoner model as `provider/model`; overrides the config file.
    #[arg(short, long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Solve a problem statement.
    Solve(commands::solve::SolveArgs),

    /// Answer the pending escalation of a suspended run.
    Resume(commands::resume::ResumeArgs),

    /// Give feedback on a completed run.
    Feedback(commands::feedback::FeedbackArgs),

    /// List runs waiting on a human response.
    Pending,

    /// Manage the knowledge store.
    Kb {
        #[command(subcommand)]
        action: KbCmd,
    },

    /// Inspect run audit trails.
    Audit {
        #[command(subcommand)]
        action: AuditCmd,
    },

    /// Show resolved configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },
}

/// Subcommands for `mweave kb`.
#[derive(Subcommand)]
enum KbCmd {
    /// Add the curated seed entries.
    Seed,

    /// Search the knowledge store.
    Search {
        /// Search query.
        query: String,

        /// Maximum number of results.
        #[arg(long, default_value = "5")]
        limit: usize,
    },

    /// Show entry counts by provenance and category.
    Stats,
}

/// Subcommands for `mweave audit`.
#[derive(Subcommand)]
enum AuditCmd {
    /// Print the stage-by-stage trail of a run.
    Show {
        /// Run id.
        run_id: String,

        /// Print raw JSON lines instead of a table.
        #[arg(long)]
        json: bool,
    },
}

/// Subcommands for `mweave config`.
#[derive(Subcommand)]
enum ConfigCmd {
    /// Show the full resolved configuration as TOML.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let opts = commands::GlobalOpts {
        config: cli.config,
        model: cli.model,
    };

    match cli.command {
        Commands::Solve(args) => commands::solve::run(&opts, args).await?,
        Commands::Resume(args) => commands::resume::run(&opts, args).await?,
        Commands::Feedback(args) => commands::feedback::run(&opts, args).await?,
        Commands::Pending => commands::resume::pending(&opts).await?,
        Commands::Kb { action } => match action {
            KbCmd::Seed => commands::kb::kb_seed(&opts).await?,
            KbCmd::Search { query, limit } => commands::kb::kb_search(&opts, &query, limit).await?,
            KbCmd::Stats => commands::kb::kb_stats(&opts).await?,
        },
        Commands::Audit { action } => match action {
            AuditCmd::Show { run_id, json } => commands::audit_cmd::audit_show(&opts, &run_id, json).await?,
        },
        Commands::Config { action } => match action {
            ConfigCmd::Show => commands::config_cmd::config_show(&opts)?,
        },
    }

    Ok(())
}
