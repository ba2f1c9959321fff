//! sessionlock CLI
//!
//! Inspect and manage session records through the same provider contract a
//! web host uses.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sessionlock_provider::{ProviderConfig, SessionStateProvider};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt};

/// Inspect and manage locked sessions.
#[derive(Parser, Debug)]
#[command(name = "sessionlock", version, about)]
struct Cli {
    /// TOML file with a `[provider]` table.
    #[arg(long, env = "SESSIONLOCK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Store backend, overriding the configuration file.
    #[arg(long, env = "SESSIONLOCK_BACKEND", global = true)]
    backend: Option<String>,

    /// Full `redis://` or `rediss://` URL, overriding host and port.
    #[arg(long, env = "SESSIONLOCK_URL", global = true)]
    url: Option<String>,

    /// Application name the session keys are scoped to.
    #[arg(long, env = "SESSIONLOCK_APPLICATION", global = true)]
    application: Option<String>,

    /// Output format.
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show a session's lock state, timeout and fields.
    Inspect(commands::inspect::InspectArgs),
    /// Take the write lock and keep it until it expires or is unlocked.
    Lock(commands::lock::LockArgs),
    /// Release a write lock held under a given lock id.
    Unlock(commands::lock::UnlockArgs),
    /// Delete a session.
    Remove(commands::remove::RemoveArgs),
    /// Slide a session's idle timeout.
    Touch(commands::touch::TouchArgs),
    /// Create an empty session flagged for initialization.
    Create(commands::create::CreateArgs),
    /// Write or delete session fields under the write lock.
    Set(commands::set::SetArgs),
}

impl Cli {
    fn provider_config(&self) -> anyhow::Result<ProviderConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let source = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                ProviderConfig::from_toml_str(&source)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => ProviderConfig::default(),
        };
        if let Some(backend) = &self.backend {
            config.backend.clone_from(backend);
        }
        if let Some(url) = &self.url {
            config.connection_string = Some(url.clone());
        }
        if let Some(application) = &self.application {
            config.application_name.clone_from(application);
        }
        config.throw_on_error = true;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.provider_config()?;
    debug!(backend = %config.backend, application = %config.application_name, "loaded configuration");
    let provider = SessionStateProvider::from_config("sessionlock", config)?;

    match &cli.command {
        Command::Inspect(args) => commands::inspect::run(&provider, args, &cli.format).await,
        Command::Lock(args) => commands::lock::lock(&provider, args, &cli.format).await,
        Command::Unlock(args) => commands::lock::unlock(&provider, args).await,
        Command::Remove(args) => commands::remove::run(&provider, args).await,
        Command::Touch(args) => commands::touch::run(&provider, args).await,
        Command::Create(args) => commands::create::run(&provider, args).await,
        Command::Set(args) => commands::set::run(&provider, args).await,
    }
}
