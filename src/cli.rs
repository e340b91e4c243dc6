//! CLI - Command Line Interface for MediaGate
//!
//! Every session operation is scriptable. All output is JSON-parseable.
//!
//! # Examples
//!
//! ```bash
//! # Sign in through an identity provider
//! mediagate --server http://media.local:8096 login --provider google
//!
//! # Pair by QR code (prints the pairing URL, then waits)
//! mediagate pair
//!
//! # Inspect and use the session
//! mediagate whoami --json
//! mediagate get /api/library/items -Q limit=10
//! mediagate health
//! ```

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::api::ApiError;
use crate::models::User;

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit codes for CLI operations (semantic for scripting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// General error
    Error = 1,
    /// Invalid arguments
    InvalidArgs = 2,
    /// Network error
    NetworkError = 3,
    /// Not signed in, or the server rejected the credentials
    AuthRequired = 4,
    /// Server marked down or circuit open
    ServerDown = 5,
    /// Login session expired or timed out
    SessionExpired = 6,
}

impl ExitCode {
    /// Map a library error onto its exit code
    pub fn for_error(error: &ApiError) -> Self {
        match error {
            ApiError::Network(_) | ApiError::ServerError(_) => ExitCode::NetworkError,
            ApiError::Auth => ExitCode::AuthRequired,
            ApiError::CircuitOpen(_) => ExitCode::ServerDown,
            ApiError::SessionExpired => ExitCode::SessionExpired,
            ApiError::NoServer | ApiError::UnknownFlow(_) => ExitCode::InvalidArgs,
            ApiError::ClientError { .. }
            | ApiError::FlowCancelled
            | ApiError::InvalidResponse(_)
            | ApiError::Storage(_) => ExitCode::Error,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> std::process::ExitCode {
        std::process::ExitCode::from(code as u8)
    }
}

// =============================================================================
// Main CLI Structure
// =============================================================================

/// MediaGate - sign in to a media server and keep the session alive
#[derive(Parser, Debug)]
#[command(
    name = "mediagate",
    version,
    author = "Gorka & Hermes",
    about = "Resilient sign-in and session client for a self-hosted media server",
    long_about = "Signs in to a media server through an identity provider or by \
                  QR-code pairing, stores the credentials, refreshes them when \
                  they expire and tracks whether the server is reachable.",
    after_help = "EXAMPLES:\n\
                  mediagate login -p google            Sign in through a provider\n\
                  mediagate pair                       Pair this device by QR code\n\
                  mediagate whoami --json              Show the signed-in user\n\
                  mediagate get /api/library/items     Authenticated GET request"
)]
pub struct Cli {
    /// Output format as JSON (default for non-TTY)
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Debug logging on stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Media server base URL (overrides env and config)
    #[arg(long, short = 's', global = true)]
    pub server: Option<String>,

    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Keep credentials in memory only for this run
    #[arg(long, global = true)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Check if JSON output should be used
    pub fn should_json(&self) -> bool {
        self.json || !std::io::stdout().is_terminal()
    }
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in through an identity provider
    Login(LoginCmd),

    /// Sign in by pairing this device with a QR code
    #[command(visible_alias = "qr")]
    Pair,

    /// Sign out and forget stored credentials
    Logout,

    /// Show the signed-in user
    #[command(visible_alias = "me")]
    Whoami(WhoamiCmd),

    /// Probe the server's health
    Health,

    /// Authenticated GET request, printing the JSON response
    Get(GetCmd),

    /// Print this installation's client id
    ClientId,
}

/// Sign in through an identity provider
#[derive(Args, Debug)]
pub struct LoginCmd {
    /// Identity provider id (e.g. google, github)
    #[arg(long, short = 'p', required = true)]
    pub provider: String,

    /// Print the login URL instead of opening a browser
    #[arg(long)]
    pub no_browser: bool,
}

/// Show the signed-in user
#[derive(Args, Debug)]
pub struct WhoamiCmd {
    /// Re-read the profile from the server
    #[arg(long, short = 'r')]
    pub refresh: bool,
}

/// Authenticated GET request
#[derive(Args, Debug)]
pub struct GetCmd {
    /// Server path, e.g. /api/library/items
    #[arg(required = true)]
    pub path: String,

    /// Query parameters as key=value (repeatable)
    #[arg(long = "query", short = 'Q', value_parser = parse_query_pair)]
    pub query: Vec<(String, String)>,
}

/// Parse a `key=value` query argument
pub fn parse_query_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

// =============================================================================
// JSON Output Types
// =============================================================================

/// Generic JSON output wrapper with status
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonOutput<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub exit_code: i32,
}

fn is_zero(n: &i32) -> bool {
    *n == 0
}

impl<T: Serialize> JsonOutput<T> {
    /// Create success output with data
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            exit_code: 0,
        }
    }

    /// Create error output (no data)
    pub fn error_msg(msg: impl Into<String>, code: ExitCode) -> JsonOutput<()> {
        JsonOutput::<()> {
            data: None,
            error: Some(msg.into()),
            exit_code: code.into(),
        }
    }
}

/// Status OK response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusOk {
    pub status: &'static str,
}

impl Default for StatusOk {
    fn default() -> Self {
        Self { status: "ok" }
    }
}

/// Login / pairing result
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub status: &'static str,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

/// Signed-in identity
#[derive(Debug, Serialize)]
pub struct WhoamiResponse {
    pub signed_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

/// Health probe result
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Client id response
#[derive(Debug, Serialize)]
pub struct ClientIdResponse {
    pub client_id: String,
}

// =============================================================================
// Output Helpers
// =============================================================================

/// Output handler for consistent formatting
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    pub fn new(cli: &Cli) -> Self {
        Self {
            json: cli.should_json(),
            quiet: cli.quiet,
        }
    }

    /// Print success data
    pub fn print<T: Serialize>(&self, data: T) -> anyhow::Result<()> {
        if self.json {
            let output = JsonOutput::success(data);
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            // For non-JSON, caller should handle formatting
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Ok(())
    }

    /// Print error and return exit code
    pub fn error(&self, msg: impl Into<String>, code: ExitCode) -> ExitCode {
        let msg = msg.into();
        if self.json {
            let output = JsonOutput::<()>::error_msg(&msg, code);
            if let Ok(json) = serde_json::to_string_pretty(&output) {
                eprintln!("{}", json);
            }
        } else if !self.quiet {
            eprintln!("Error: {}", msg);
        }
        code
    }

    /// Print a library error with its semantic exit code
    pub fn api_error(&self, context: &str, error: &ApiError) -> ExitCode {
        self.error(format!("{}: {}", context, error), ExitCode::for_error(error))
    }

    /// Print info message (suppressed in quiet mode)
    pub fn info(&self, msg: impl std::fmt::Display) {
        if !self.quiet && !self.json {
            eprintln!("{}", msg);
        }
    }
}

// =============================================================================
// Path Validation
// =============================================================================

/// Validate a server-relative request path (leading slash, no scheme)
pub fn validate_api_path(path: &str) -> Result<&str, &'static str> {
    if !path.starts_with('/') {
        Err("Path must start with '/' (e.g. /api/library/items)")
    } else if path.contains("://") || path.starts_with("//") {
        Err("Path must be relative to the server, not a full URL")
    } else if path.contains('?') {
        Err("Pass query parameters with --query key=value")
    } else {
        Ok(path)
    }
}

// =============================================================================
// Tests
// =============================================================================
