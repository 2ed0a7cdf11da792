//! Boundary validation shared by the HTTP routes and the socket transport.
//!
//! Nothing that fails here reaches the session registry.

use protocol::StartRequest;

use super::error::ApiError;
use crate::session::ConnectParams;

/// Longest accepted host name (RFC 1035 limit).
const MAX_HOST_LEN: usize = 253;

/// Longest accepted login name.
const MAX_USERNAME_LEN: usize = 256;

/// Checks a start request and fills in the default port.
pub fn connect_params(request: StartRequest, default_port: u16) -> Result<ConnectParams, ApiError> {
    let host = request.host.trim();
    let username = request.username.trim();

    if host.is_empty() || username.is_empty() {
        return Err(ApiError::validation("host and username are required"));
    }
    if host.len() > MAX_HOST_LEN || !is_argument_safe(host) {
        return Err(ApiError::validation(format!("invalid host: {host:?}")));
    }
    if username.len() > MAX_USERNAME_LEN || !is_argument_safe(username) || username.contains('@')
    {
        return Err(ApiError::validation(format!("invalid username: {username:?}")));
    }

    let port = request.port.unwrap_or(default_port);
    if port == 0 {
        return Err(ApiError::validation("port must be between 1 and 65535"));
    }

    let params = ConnectParams::new(host, port, username);
    Ok(match request.password {
        Some(password) => params.with_password(password),
        None => params,
    })
}

/// Checks a terminal size.
pub fn dimensions(cols: Option<i64>, rows: Option<i64>) -> Result<(u16, u16), ApiError> {
    let (Some(cols), Some(rows)) = (cols, rows) else {
        return Err(ApiError::validation("cols and rows are required"));
    };
    match (u16::try_from(cols), u16::try_from(rows)) {
        (Ok(c), Ok(r)) if c > 0 && r > 0 => Ok((c, r)),
        _ => Err(ApiError::validation(format!(
            "cols and rows must be between 1 and {}, got {cols}x{rows}",
            u16::MAX
        ))),
    }
}

/// Checks a session id.
pub fn session_id(id: &str) -> Result<&str, ApiError> {
    if id.is_empty() {
        return Err(ApiError::validation("id is required"));
    }
    Ok(id)
}

/// Rejects values ssh would parse as an option or split on.
fn is_argument_safe(value: &str) -> bool {
    !value.starts_with('-') && !value.chars().any(|c| c.is_whitespace() || c.is_control())
}
