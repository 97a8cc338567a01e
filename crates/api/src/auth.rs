//! Shared-token authentication middleware.
//!
//! The token may arrive as an `x-mcp-token` header, an
//! `Authorization: Bearer` header, or a `token` query parameter (for
//! EventSource clients that cannot set headers). Liveness routes are exempt.

use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

pub const TOKEN_HEADER: &str = "x-mcp-token";

const PUBLIC_PATHS: &[&str] = &["/ping", "/version", "/healthz"];

/// The expected token, held as bytes for constant-time comparison.
#[derive(Clone)]
pub struct ApiToken {
    bytes: Vec<u8>,
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiToken(..)")
    }
}

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            bytes: token.into().into_bytes(),
        }
    }

    /// Constant time regardless of where a mismatch occurs.
    pub fn verify(&self, provided: &[u8]) -> bool {
        if self.bytes.len() != provided.len() {
            return false;
        }
        let mut diff: u8 = 0;
        for (a, b) in self.bytes.iter().zip(provided) {
            diff |= a ^ b;
        }
        diff == 0
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// First token found: `x-mcp-token`, then bearer, then `?token=`.
fn extract_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(token) = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(token.to_string());
    }
    if let Some(token) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(token.to_string());
    }
    Query::<TokenQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(q)| q.token)
}

pub async fn require_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.token else {
        return next.run(request).await;
    };
    if PUBLIC_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    match extract_token(request.headers(), request.uri()) {
        Some(token) if expected.verify(token.as_bytes()) => next.run(request).await,
        provided => {
            warn!(
                path = %request.uri().path(),
                token_present = provided.is_some(),
                "Rejected request with invalid or missing token"
            );
            ApiError::from(beebo_common::BeeboError::Auth).into_response()
        }
    }
}
