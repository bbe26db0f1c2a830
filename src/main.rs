//! mathchat - graduate-exam math tutor
//!
//! Main entry point for the mathchat application.

use anyhow::Result;

use mathchat::cli::{Cli, Commands};
use mathchat::commands;
use mathchat::config::Config;
use mathchat::logging::{init_logging, with_bootstrap_logging, VERBOSE_LEVEL};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration; its warnings go to a temporary stderr subscriber
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = with_bootstrap_logging(cli.verbose, || Config::load(config_path, &cli))?;

    // Initialize logging
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = VERBOSE_LEVEL.to_string();
    }
    init_logging(&logging)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Serve { .. } => {
            tracing::info!("Starting chat API server");
            mathchat::server::serve(&config).await?;
            Ok(())
        }
        Commands::Chat { resume } => {
            tracing::info!("Starting interactive chat mode");
            if let Some(id) = &resume {
                tracing::debug!("Resuming conversation: {}", id);
            }
            commands::chat::run_chat(config, resume).await?;
            Ok(())
        }
        Commands::Ask { message } => {
            commands::ask::run_ask(&config, &message).await?;
            Ok(())
        }
        Commands::Check { timeout } => {
            commands::check::run_check(&config, timeout).await?;
            Ok(())
        }
        Commands::History { command } => {
            commands::history::handle_history(command, &config)?;
            Ok(())
        }
    }
}
