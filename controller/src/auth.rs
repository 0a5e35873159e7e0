//! Single shared login guarding the dashboard, WebSocket and API.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use garden_common::LoginConfig;
use sha2::{Digest, Sha256};

use crate::host::{error_response, AppState};

pub const SESSION_COOKIE: &str = "garden_session";

#[derive(Clone)]
pub struct SessionAuth {
    login: Arc<LoginConfig>,
    token: Arc<str>,
}

impl SessionAuth {
    /// `nonce` makes session tokens from a previous boot invalid.
    pub fn new(login: LoginConfig, nonce: u128) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(nonce.to_le_bytes());
        hasher.update(login.username.as_bytes());
        hasher.update([0]);
        hasher.update(login.password.as_bytes());
        let token: String = hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect();

        Self {
            login: Arc::new(login),
            token: token.into(),
        }
    }

    pub fn check_credentials(&self, username: &str, password: &str) -> bool {
        username == self.login.username && password == self.login.password
    }

    pub fn session_cookie(&self) -> String {
        format!(
            "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Strict",
            self.token
        )
    }

    pub fn cleared_cookie() -> String {
        format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0")
    }

    pub fn is_authenticated(&self, headers: &HeaderMap) -> bool {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .any(|(name, value)| name == SESSION_COOKIE && value == &*self.token)
    }
}

pub async fn require_session(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.auth.is_authenticated(request.headers()) {
        return next.run(request).await;
    }

    let path = request.uri().path();
    if path.starts_with("/api/") || path == "/ws" {
        error_response(StatusCode::UNAUTHORIZED, "Login required")
    } else {
        Redirect::to("/login").into_response()
    }
}
