use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proctor::config::{Config, Role};

mod commands;

#[derive(Parser)]
#[command(
    name = "proctor",
    version,
    about = "Three-node exam proctoring with clock sync, mutual exclusion and load-balanced admission",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to the config file's value
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node
    Node {
        /// Which node to run
        #[arg(short, long, value_enum)]
        role: Role,
    },

    /// Drive the cluster as the agent
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },

    /// Show admission statistics and mutual-exclusion state
    Stats,

    /// Print the authority's marksheet
    Marksheet,

    /// Run a Berkeley sync round on the coordinator
    Sync,

    /// Start or stop the coordinator's backup lane
    Backup {
        #[arg(value_enum)]
        state: Switch,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    /// Sit an exam and submit it manually
    Exam {
        /// Student roll number
        #[arg(short, long)]
        student: String,

        /// Answers in order, comma separated (random when omitted)
        #[arg(short, long, value_delimiter = ',')]
        answers: Vec<String>,
    },

    /// Send a burst of concurrent admissions
    LoadTest {
        /// Number of requests (random 15-25 when omitted)
        #[arg(short = 'n', long)]
        requests: Option<usize>,
    },

    /// Report a student for copying under mutual exclusion
    Misconduct {
        /// Student roll number (random roster entry when omitted)
        #[arg(short, long)]
        student: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let log_format = cli
        .log_format
        .as_deref()
        .unwrap_or(&config.logging.format)
        .to_string();
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Node { role } => {
            tracing::info!(role = %role, "Starting node");
            commands::node(config, role).await?;
        }

        Commands::Agent { action } => match action {
            AgentAction::Exam { student, answers } => {
                tracing::info!(student = %student, "Starting exam run");
                commands::exam(&config, &student, answers).await?;
            }
            AgentAction::LoadTest { requests } => {
                tracing::info!(requests = ?requests, "Starting load test");
                commands::load_test(&config, requests).await?;
            }
            AgentAction::Misconduct { student } => {
                tracing::info!(student = ?student, "Starting misconduct report");
                commands::misconduct(&config, student).await?;
            }
        },

        Commands::Stats => commands::stats(&config).await?,

        Commands::Marksheet => commands::marksheet(&config).await?,

        Commands::Sync => commands::sync(&config).await?,

        Commands::Backup { state } => {
            commands::backup(&config, matches!(state, Switch::On)).await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("proctor=debug,tower_http=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_new(format!("proctor={level},warn"))?
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
