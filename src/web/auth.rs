use axum::{
    extract::{Request, State},
    http::{StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use crate::web::AppState;
use crate::web::api::ApiResponse;

/// Shared-secret check on the `Authorization` header.
#[derive(Debug, Clone, Default)]
pub struct AuthGate {
    token: Option<String>,
}

impl AuthGate {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn is_required(&self) -> bool {
        self.token.is_some()
    }

    pub fn is_valid(&self, header: &str) -> bool {
        match &self.token {
            Some(token) => token == header,
            None => true,
        }
    }
}

/// Rejects requests that fail the [`AuthGate`] and logs every request.
pub async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .map(|v| v.to_str().unwrap_or_default().to_string());

    match header {
        None if state.auth.is_required() => {
            warn!("{} {} rejected: missing authorization", method, uri);
            (
                StatusCode::UNAUTHORIZED,
                ApiResponse::failed(
                    "No authorization header supplied. Please try again using a valid authorization header.",
                ),
            )
                .into_response()
        }
        Some(header) if !state.auth.is_valid(&header) => {
            warn!("{} {} rejected: invalid authorization", method, uri);
            (
                StatusCode::FORBIDDEN,
                ApiResponse::failed(
                    "The authorization header is incorrect. Please try again using a valid authorization header.",
                ),
            )
                .into_response()
        }
        _ => {
            info!("{} {}", method, uri);
            next.run(request).await
        }
    }
}
