//! Command-line entry point: initialize the data directory, hand off to the
//! dispatch loop, print store statistics, or force a single reflection or
//! consolidation cycle.

use std::path::PathBuf;
use std::process::Command;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agentmem::config::Config;
use agentmem::engine::Engine;
use agentmem::error::Result;

const DEFAULT_AGENT: &str = "default";

#[derive(Parser)]
#[command(name = "agentmem")]
#[command(about = "Agent memory engine CLI")]
#[command(version)]
struct Cli {
    /// Directory holding the relational and vector stores.
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    data_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and open the stores once, to validate configuration.
    Init,
    /// Run the dispatch loop over stdio (delegates to agentmem-server).
    Serve,
    /// Print relational store statistics.
    Status,
    /// Force one reflection cycle for the default agent.
    Reflect {
        /// Run even if the importance threshold hasn't been crossed.
        #[arg(long)]
        force: bool,
    },
    /// Force one consolidation cycle.
    Consolidate,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    config.data_dir = PathBuf::from(shellexpand::tilde(&cli.data_dir).to_string());

    match cli.command {
        Commands::Init => {
            std::fs::create_dir_all(&config.data_dir)?;
            let engine = Engine::open(config)?;
            let stats = engine.stats()?;
            println!(
                "Initialized {} ({} events on record).",
                engine.config.data_dir.display(),
                stats.event_count
            );
        }

        Commands::Serve => {
            let server_bin = std::env::current_exe()?
                .parent()
                .map(|dir| dir.join("agentmem-server"))
                .unwrap_or_else(|| PathBuf::from("agentmem-server"));
            let status = Command::new(server_bin)
                .env("DATA_DIR", &config.data_dir)
                .status()?;
            std::process::exit(status.code().unwrap_or(1));
        }

        Commands::Status => {
            let engine = Engine::open(config)?;
            let stats = engine.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            println!("vector_count: {}", engine.vector_count());
            println!("llm_available: {}", engine.llm_available());
        }

        Commands::Reflect { force } => {
            let engine = Engine::open(config)?;
            let produced = engine.reflection.reflect(DEFAULT_AGENT, force)?;
            println!("{}", serde_json::to_string_pretty(&produced)?);
        }

        Commands::Consolidate => {
            let engine = Engine::open(config)?;
            let result = engine.consolidation.consolidate(None)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
