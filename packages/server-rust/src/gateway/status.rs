//! Canonical status to HTTP translation.

use axum::http::StatusCode;
use catalog_core::{Code, Status};
use serde::Serialize;

/// Maps a canonical code to its HTTP status, as grpc-gateway does.
#[must_use]
pub fn http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unknown | Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// JSON error body: `{"code": 5, "error": "NotFound", "message": "..."}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub code: u16,
    pub error: &'static str,
    pub message: &'a str,
}

impl<'a> From<&'a Status> for ErrorBody<'a> {
    fn from(status: &'a Status) -> Self {
        Self {
            code: status.code.as_u16(),
            error: status.code.name(),
            message: &status.message,
        }
    }
}

/// Serialized error body for `status`.
#[must_use]
pub fn error_body(status: &Status) -> Vec<u8> {
    serde_json::to_vec(&ErrorBody::from(status)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_mapping() {
        assert_eq!(http_status(Code::InvalidArgument), StatusCode::BAD_REQUEST);
        assert_eq!(http_status(Code::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(http_status(Code::Internal), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(http_status(Code::DeadlineExceeded), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(http_status(Code::Unavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(http_status(Code::Unimplemented), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(http_status(Code::Cancelled).as_u16(), 499);
    }

    #[test]
    fn error_body_names_the_code() {
        let body = error_body(&Status::not_found("comic 9 not found"));
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["code"], 5);
        assert_eq!(value["error"], "NotFound");
        assert_eq!(value["message"], "comic 9 not found");
    }
}
