//! Error responses
//!
//! Every failure is reported as `{"errors":[{title, details, status}]}` with
//! the HTTP status of the first entry. Internal errors always come first.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{CarrierError, Issues};

/// One reported problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub title: String,
    pub details: String,
    pub status: u16,
}

impl From<&CarrierError> for ErrorEntry {
    fn from(error: &CarrierError) -> Self {
        Self {
            title: error.title(),
            details: error.details(),
            status: error.status(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub errors: Vec<ErrorEntry>,
}

/// Error half of every handler result
#[derive(Debug)]
pub struct ApiError(Issues);

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(CarrierError::bad_request(message).into())
    }
}

impl From<CarrierError> for ApiError {
    fn from(error: CarrierError) -> Self {
        Self(error.into())
    }
}

impl From<Issues> for ApiError {
    fn from(issues: Issues) -> Self {
        Self(issues)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self
            .0
            .first()
            .and_then(|e| StatusCode::from_u16(e.status()).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match self.0.first() {
            Some(first) if first.is_internal() => {
                error!(kind = first.kind(), count = self.0.len(), "Request failed: {}", self.0)
            }
            Some(first) => {
                warn!(kind = first.kind(), count = self.0.len(), "Request rejected: {}", self.0)
            }
            None => error!("Request failed without an error entry"),
        }

        let errors: Vec<ErrorEntry> = self.0.iter().map(ErrorEntry::from).collect();

        (status, Json(ErrorBody { errors })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
