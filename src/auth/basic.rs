use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::auth::session::constant_time_eq;
use crate::config::ApiConfig;
use crate::state::AppState;

/// Middleware that requires the shared route credential on every request
pub async fn require_basic_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| credentials_match(value, &state.config.api));

    if !authorized {
        tracing::warn!("Rejected {} {} without route credentials", req.method(), req.uri().path());
        return auth_required();
    }

    next.run(req).await
}

fn credentials_match(header_value: &str, api: &ApiConfig) -> bool {
    let Some(encoded) = header_value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((username, password)) = decoded.split_once(':') else {
        return false;
    };

    // both halves are always compared
    let user_ok = constant_time_eq(username, &api.route_username);
    let pass_ok = constant_time_eq(password, &api.route_password);
    user_ok && pass_ok
}

fn auth_required() -> Response {
    let mut response = (StatusCode::UNAUTHORIZED, "Auth required").into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"Secure Area\""),
    );
    response
}

/// `Authorization` header value for the given credential
pub fn basic_header(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}
