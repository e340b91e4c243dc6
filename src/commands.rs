//! CLI Command Handlers
//!
//! Implements all CLI commands on top of the `App` facade.
//! Each handler takes CLI args and Output, returns ExitCode.

use crate::api::{ApiError, ApiRequest};
use crate::app::App;
use crate::cli::{
    ClientIdResponse, ExitCode, GetCmd, HealthResponse, LoginCmd, LoginResponse, Output,
    StatusOk, WhoamiCmd, WhoamiResponse,
};
use crate::models::User;

// =============================================================================
// Login Commands
// =============================================================================

pub async fn login_cmd(cmd: LoginCmd, app: &App, output: &Output) -> ExitCode {
    output.info(format!("Registering login with {}...", cmd.provider));

    let session = match app.sign_in_with_provider(&cmd.provider).await {
        Ok(session) => session,
        Err(e) => return output.api_error("Login failed", &e),
    };

    if cmd.no_browser {
        output.info(format!("Open this URL to sign in:\n  {}", session.auth_url));
    } else {
        output.info(format!(
            "Complete sign-in in your browser (or open {})",
            session.auth_url
        ));
    }
    output.info("Waiting for approval... (Ctrl+C to cancel)");

    let result = wait_or_cancel(app, app.wait_for_login()).await;
    finish_login(result, session.session_id, Some(session.auth_url), session.expires_at, output)
}

pub async fn pair_cmd(app: &App, output: &Output) -> ExitCode {
    let session = match app.sign_in_with_qr_code().await {
        Ok(session) => session,
        Err(e) => return output.api_error("Pairing failed", &e),
    };

    match &session.pairing_url {
        Some(url) => output.info(format!("Scan or open to pair this device:\n  {}", url)),
        None => output.info(format!(
            "Enter this pairing code on a signed-in device: {}",
            session.qr_session_id
        )),
    }
    output.info("Waiting for approval... (Ctrl+C to cancel)");

    let result = wait_or_cancel(app, app.poll_qr_authentication(&session.qr_session_id)).await;
    finish_login(
        result,
        session.qr_session_id,
        session.pairing_url,
        session.expires_at,
        output,
    )
}

/// Await a login, cancelling the flow on Ctrl+C
async fn wait_or_cancel(
    app: &App,
    login: impl std::future::Future<Output = Result<User, ApiError>>,
) -> Result<User, ApiError> {
    tokio::select! {
        result = login => result,
        _ = tokio::signal::ctrl_c() => {
            app.auth().cancel();
            Err(ApiError::FlowCancelled)
        }
    }
}

fn finish_login(
    result: Result<User, ApiError>,
    session_id: String,
    url: Option<String>,
    expires_at: Option<u64>,
    output: &Output,
) -> ExitCode {
    match result {
        Ok(user) => {
            output.info(format!("Signed in as {}", user));
            let response = LoginResponse {
                status: "signed_in",
                session_id,
                url,
                expires_at,
                user: Some(user),
            };
            if let Err(e) = output.print(&response) {
                return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
            }
            ExitCode::Success
        }
        Err(e) => output.api_error("Login did not complete", &e),
    }
}

// =============================================================================
// Session Commands
// =============================================================================

pub async fn logout_cmd(app: &App, output: &Output) -> ExitCode {
    let was_signed_in = app.is_authenticated();
    if let Err(e) = app.sign_out() {
        return output.api_error("Sign-out failed", &e);
    }
    if was_signed_in {
        output.info("Signed out");
    } else {
        output.info("Not signed in");
    }
    if let Err(e) = output.print(StatusOk::default()) {
        return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
    }
    ExitCode::Success
}

pub async fn whoami_cmd(cmd: WhoamiCmd, app: &App, output: &Output) -> ExitCode {
    if !app.is_authenticated() {
        return output.error("Not signed in", ExitCode::AuthRequired);
    }

    let user = if cmd.refresh {
        match app.refresh_user_status().await {
            Ok(Some(user)) => Some(user),
            Ok(None) => return output.error("Not signed in", ExitCode::AuthRequired),
            Err(e) => return output.api_error("Could not refresh profile", &e),
        }
    } else {
        app.current_user()
    };

    let response = WhoamiResponse {
        signed_in: user.is_some(),
        server_url: app.server_url(),
        user,
    };
    if let Err(e) = output.print(&response) {
        return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
    }
    ExitCode::Success
}

pub async fn client_id_cmd(app: &App, output: &Output) -> ExitCode {
    match app.client_id() {
        Ok(client_id) => {
            if let Err(e) = output.print(ClientIdResponse { client_id }) {
                return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
            }
            ExitCode::Success
        }
        Err(e) => output.api_error("Could not read client id", &e),
    }
}

// =============================================================================
// Server Commands
// =============================================================================

pub async fn health_cmd(app: &App, output: &Output) -> ExitCode {
    let Some(server_url) = app.server_url() else {
        return output.api_error("Health check failed", &ApiError::NoServer);
    };
    output.info(format!("Probing {}...", server_url));

    let health = app.check_health().await;
    let status = if health.is_down {
        "down"
    } else if health.message.is_some() {
        "degraded"
    } else {
        "up"
    };
    let response = HealthResponse {
        status,
        server_url: Some(server_url),
        message: health.message.clone(),
    };
    if let Err(e) = output.print(&response) {
        return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
    }

    if health.is_down {
        ExitCode::ServerDown
    } else {
        ExitCode::Success
    }
}

pub async fn get_cmd(cmd: GetCmd, app: &App, output: &Output) -> ExitCode {
    let request = cmd
        .query
        .into_iter()
        .fold(ApiRequest::get(cmd.path.as_str()), |req, (key, value)| {
            req.query(key, value)
        });

    let response = match app.client().request(request).await {
        Ok(response) => response,
        Err(e) => return output.api_error(&format!("GET {} failed", cmd.path), &e),
    };

    // Non-JSON bodies are passed through as a string
    let body = serde_json::from_str::<serde_json::Value>(&response.body)
        .unwrap_or(serde_json::Value::String(response.body));
    if let Err(e) = output.print(&body) {
        return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
    }
    ExitCode::Success
}
