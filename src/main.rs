//! MediaGate - sign in to a media server and keep the session alive
//!
//! # Usage
//!
//! ```bash
//! mediagate --server http://media.local:8096 login --provider google
//! mediagate pair
//! mediagate whoami --json
//! mediagate health
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mediagate::auth::{Handoff, NoopHandoff, SystemBrowser};
use mediagate::cli::{Cli, Command, ExitCode, Output};
use mediagate::commands;
use mediagate::session::{FileStorage, MemoryStorage, SecureStorage};
use mediagate::{App, Config};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let exit_code = run_cli(cli).await;
    std::process::exit(exit_code.into());
}

/// Logs go to stderr so stdout stays JSON-clean
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("mediagate=debug,warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Run CLI command and return exit code
async fn run_cli(cli: Cli) -> ExitCode {
    let output = Output::new(&cli);

    let app = match build_app(&cli) {
        Ok(app) => app,
        Err(e) => return output.error(format!("{:#}", e), ExitCode::Error),
    };

    if let Command::Get(cmd) = &cli.command {
        if let Err(e) = mediagate::cli::validate_api_path(&cmd.path) {
            return output.error(e, ExitCode::InvalidArgs);
        }
    }

    let code = match cli.command {
        Command::Login(cmd) => commands::login_cmd(cmd, &app, &output).await,

        Command::Pair => commands::pair_cmd(&app, &output).await,

        Command::Logout => commands::logout_cmd(&app, &output).await,

        Command::Whoami(cmd) => commands::whoami_cmd(cmd, &app, &output).await,

        Command::Health => commands::health_cmd(&app, &output).await,

        Command::Get(cmd) => commands::get_cmd(cmd, &app, &output).await,

        Command::ClientId => commands::client_id_cmd(&app, &output).await,
    };

    app.shutdown();
    code
}

/// Load config and wire the app for this invocation
fn build_app(cli: &Cli) -> Result<App> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let settings = config.settings(cli.server.as_deref());

    let storage: Arc<dyn SecureStorage> = if cli.ephemeral {
        Arc::new(MemoryStorage::new())
    } else {
        let path = config
            .credentials_path()
            .context("Could not determine credentials path")?;
        Arc::new(FileStorage::new(path))
    };

    // Pairing shows its URL itself; so does login with --no-browser
    let handoff: Arc<dyn Handoff> = match &cli.command {
        Command::Login(cmd) if !cmd.no_browser => Arc::new(SystemBrowser),
        _ => Arc::new(NoopHandoff),
    };

    Ok(App::new(settings, storage, handoff))
}
