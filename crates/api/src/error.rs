//! HTTP mapping for domain errors.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use beebo_common::BeeboError;
use serde::Serialize;
use tracing::error;

/// `{ok: false, error}` body shared by every failure response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError(pub BeeboError);

impl From<BeeboError> for ApiError {
    fn from(err: BeeboError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(BeeboError::validation(format!(
            "invalid JSON body: {}",
            rejection.body_text()
        )))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(BeeboError::validation(rejection.body_text()))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BeeboError::Validation(_) => StatusCode::BAD_REQUEST,
            BeeboError::Auth => StatusCode::UNAUTHORIZED,
            BeeboError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client errors carry their message; server errors are logged and redacted.
    fn public_message(&self) -> String {
        if !self.0.is_client_error() {
            error!(error = %self.0, "Request failed");
            return "internal error".into();
        }
        match &self.0 {
            BeeboError::Validation(msg) => msg.clone(),
            BeeboError::NotFound(_) => "not found".into(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            ok: false,
            error: self.public_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}
