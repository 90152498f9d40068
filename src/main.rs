use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "logpull")]
#[command(about = "Time-windowed request log puller", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull logs on a fixed period until interrupted
    Run,
    /// Pull a single window and exit
    Once,
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Print the stored checkpoint
    Show,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a starter config file
    Init {
        #[arg(long)]
        stdout: bool,
    },
    /// Load and validate the config file
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logpull=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = logpull::config::resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run) | None => {
            logpull::cli::run::run(config_path, false).await?;
        }
        Some(Commands::Once) => {
            logpull::cli::run::run(config_path, true).await?;
        }
        Some(Commands::Checkpoint { action }) => match action {
            CheckpointAction::Show => {
                logpull::cli::checkpoint::show(config_path).await?;
            }
        },
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                logpull::cli::config::init(stdout)?;
            }
            ConfigAction::Validate => {
                logpull::cli::config::validate(config_path)?;
            }
        },
    }

    Ok(())
}
