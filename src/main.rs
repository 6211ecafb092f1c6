//! PC-DARTS - Main Entry Point

use clap::Parser;
use pc_darts::cli::{cmd_derive, cmd_info, cmd_init, cmd_search, cmd_test, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pc_darts=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Search { config, epochs, seed, resume } => {
            cmd_search(&config, epochs, seed, resume.as_deref())?;
        }
        Commands::Derive { checkpoint, edges_per_node, output } => {
            cmd_derive(&checkpoint, edges_per_node, output.as_deref())?;
        }
        Commands::Test { checkpoint, config } => {
            cmd_test(&checkpoint, config.as_deref())?;
        }
        Commands::Init { output, force } => {
            cmd_init(&output, force)?;
        }
        Commands::Info { config } => {
            cmd_info(&config)?;
        }
    }

    Ok(())
}
