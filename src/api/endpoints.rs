//! Media server endpoint paths

pub const REGISTER_SESSION: &str = "/api/auth/register-session";
pub const REGISTER_QR_SESSION: &str = "/api/auth/register-qr-session";
pub const USER_STATUS: &str = "/api/auth/user-status";
pub const REFRESH_TOKEN: &str = "/api/auth/refresh-token";
pub const SYSTEM_STATUS: &str = "/api/system/status";

pub fn check_token(session_id: &str) -> String {
    format!("/api/auth/check-token/{}", urlencoding::encode(session_id))
}

pub fn check_qr_token(qr_session_id: &str) -> String {
    format!("/api/auth/check-qr-token/{}", urlencoding::encode(qr_session_id))
}
