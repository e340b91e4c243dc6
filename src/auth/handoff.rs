//! External login handoff
//!
//! Opens the identity provider's page outside the app. Fire-and-forget:
//! the orchestrator learns the outcome by polling the server, never from
//! the handoff itself.

use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

/// Errors from launching the handoff
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(#[from] std::io::Error),
}

/// Capability to send the user to an external login page
pub trait Handoff: Send + Sync {
    fn open_handoff(&self, url: &str);
}

/// Opens the URL in the desktop's default browser
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl SystemBrowser {
    /// Platform opener command and its arguments
    fn command(url: &str) -> (&'static str, Vec<String>) {
        if cfg!(target_os = "macos") {
            ("open", vec![url.to_string()])
        } else if cfg!(target_os = "windows") {
            (
                "cmd",
                vec!["/C".into(), "start".into(), String::new(), url.to_string()],
            )
        } else {
            ("xdg-open", vec![url.to_string()])
        }
    }

    fn launch(url: &str) -> Result<(), HandoffError> {
        let (program, args) = Self::command(url);
        Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(())
    }
}

impl Handoff for SystemBrowser {
    fn open_handoff(&self, url: &str) {
        match Self::launch(url) {
            Ok(()) => info!(url, "Opened login page in browser"),
            Err(e) => warn!(url, error = %e, "Could not open browser, open the URL manually"),
        }
    }
}

/// Does nothing; for headless use where the caller shows the URL itself
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandoff;

impl Handoff for NoopHandoff {
    fn open_handoff(&self, _url: &str) {}
}
