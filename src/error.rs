use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

pub const MSG_MISSING_PARAMS: &str = "缺少必要参数";

/// Failures talking to the dashboard that never produced an HTTP response.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid request header: {0}")]
    InvalidHeader(String),
    #[error("dashboard unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Outcome of a relay call that did not yield a usable body.
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    /// The far side answered with a non-2xx status.
    #[error("request failed with status {status}: {body}")]
    Rejected { status: u16, body: Value },
    #[error("{0}")]
    Transport(String),
}

impl RelayError {
    /// What goes into a failed result record: the body when there is one.
    pub fn into_payload(self) -> Value {
        match self {
            RelayError::Rejected { body, .. } => body,
            RelayError::Transport(message) => Value::String(message),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    MissingParams,
    BadRequest(String),
    Upstream { status: StatusCode, body: Value },
    Internal(String),
}

impl From<ForwardError> for ApiError {
    fn from(err: ForwardError) -> Self {
        match err {
            ForwardError::InvalidHeader(message) => ApiError::BadRequest(message),
            ForwardError::Transport(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::MissingParams => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": MSG_MISSING_PARAMS })),
            )
                .into_response(),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": message })),
            )
                .into_response(),
            ApiError::Upstream { status, body } => (status, Json(body)).into_response(),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": message })),
            )
                .into_response(),
        }
    }
}
