use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "merge-agent")]
#[command(version, about = "Turns @mentions in repository events into agent-authored merge requests")]
pub struct Cli {
    /// Path to a TOML config file (defaults to ./merge-agent.toml when present)
    #[arg(long, global = true, env = "MERGE_AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the webhook server
    Serve {
        /// Port to listen on (overrides bind_addr's port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print the instruction parsed from a text as JSON
    Extract {
        /// Text to scan, e.g. "@claude[model=opus] add a LICENSE file"
        text: String,
    },
    /// Print the sha256=<hex> signature header for a payload file
    Sign {
        /// Shared webhook secret
        #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
        secret: String,
        /// Payload file
        file: PathBuf,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration with secrets redacted
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { port } => cmd::cmd_serve(cli.config.as_deref(), *port).await?,
        Commands::Extract { text } => cmd::cmd_extract(text)?,
        Commands::Sign { secret, file } => cmd::cmd_sign(secret, file)?,
        Commands::Config { command } => cmd::cmd_config(cli.config.as_deref(), command.clone())?,
    }

    Ok(())
}
