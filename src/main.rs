//! Service entry point.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use service_scaffold::config::{Settings, DEFAULT_ENV_FILE};
use service_scaffold::container::Container;
use service_scaffold::logger::{Logger, LoggerConfig};
use service_scaffold::server::Server;

/// HTTP service with a health check endpoint.
#[derive(Parser, Debug)]
#[command(name = "service-scaffold")]
#[command(about = "HTTP service with health check, structured logging, and dependency container")]
#[command(version)]
struct Args {
    /// Env file read before the process environment.
    #[arg(long, env = "ENV_FILE", default_value = DEFAULT_ENV_FILE, global = true)]
    env_file: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default).
    Serve,

    /// Load and validate configuration, then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(&args.env_file),
        Some(Command::Serve) | None => cmd_serve(&args.env_file).await,
    }
}

/// Load configuration and print a summary.
fn cmd_check_config(env_file: &Path) -> anyhow::Result<()> {
    println!("======================================================================");
    println!("CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let settings = match Settings::load_with_env_file(env_file) {
        Ok(s) => {
            println!("OK");
            s
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    };

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  App Name: {}", settings.app_name);
    println!("  Version: {}", settings.app_version);
    println!("  Debug: {}", settings.debug);
    println!("  Bind Address: {}", settings.bind_address());
    println!("  Log Level: {}", settings.log_level);
    println!("  Log Format: {}", settings.log_format);
    println!("  CORS Origins: {}", settings.cors_allow_origins.join(", "));
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Run the HTTP server until a shutdown signal arrives.
async fn cmd_serve(env_file: &Path) -> anyhow::Result<()> {
    let settings = Settings::load_with_env_file(env_file).map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    let logger = Logger::new(&LoggerConfig::from(&settings));
    logger
        .install()
        .context("failed to install global logger")?;

    info!(env_file = %env_file.display(), "configuration_loaded");

    let container = Arc::new(
        Container::new(settings, logger)
            .inspect_err(|e| error!(error = %e, "container_init_failed"))?,
    );

    Server::new(container).start().await?;
    Ok(())
}
