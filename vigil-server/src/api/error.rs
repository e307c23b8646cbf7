use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
    /// The rejected payload, echoed back for diagnosis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl ErrorResponse {
    fn plain(message: String) -> Self {
        Self {
            success: false,
            message,
            error: None,
            value: None,
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// A sensor value that could not be accepted.
    Rejected {
        error: String,
        value: serde_json::Value,
    },
    NotFound(String),
    Conflict(String),
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorResponse::plain(msg)),
            ApiError::Rejected { error, value } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    success: false,
                    message: "Sensor value rejected".to_owned(),
                    error: Some(error),
                    value: Some(value),
                },
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorResponse::plain(msg)),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, ErrorResponse::plain(msg)),
            ApiError::InternalServerError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::plain(msg))
            }
        };

        (status, Json(error_response)).into_response()
    }
}
