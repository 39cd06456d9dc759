use anyhow::Result;
use clap::{Parser, Subcommand};

mod config;
mod doctor;
mod mission;

use config::Config;

#[derive(Debug, Parser)]
#[command(name = "tagalong", version, about = "MAVLink follow-me relay for RCS location feeds")]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fly the full mission: discover, arm, take off, follow, land.
    Run {
        /// Connection URL, e.g. udp://:14540 (overrides the configured one).
        #[arg(long)]
        url: Option<String>,
    },
    /// Validate the configuration without touching the vehicle.
    Doctor,
    /// Connect, discover and log telemetry until interrupted.
    Monitor {
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => config::load(path)?,
        None => Config::default(),
    };

    match cli.cmd {
        Command::Run { url } => {
            if let Some(url) = url {
                cfg.link.url = Some(url);
            }
            doctor::check(&cfg)?;
            mission::fly(&cfg).await
        }
        Command::Doctor => doctor::check(&cfg),
        Command::Monitor { url } => {
            if let Some(url) = url {
                cfg.link.url = Some(url);
            }
            mission::monitor(&cfg).await
        }
    }
}
