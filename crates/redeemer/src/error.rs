use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RedeemerError>;

#[derive(Error, Debug)]
pub enum RedeemerError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Terminal for the caller: retrying with the same secret cannot
    /// succeed (already redeemed / pending / refunded). Surfaces as
    /// HTTP 409, not 400; callers should branch on the conflict
    /// status, not the message text.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for RedeemerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            RedeemerError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            RedeemerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            RedeemerError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            RedeemerError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            RedeemerError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            RedeemerError::Upstream(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            RedeemerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({
            "success": false,
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                RedeemerError::Validation("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (RedeemerError::NotFound("gone".into()), StatusCode::NOT_FOUND),
            // Terminal rejections are 409, distinct from malformed input
            (
                RedeemerError::Conflict("redeemed".into()),
                StatusCode::CONFLICT,
            ),
            (RedeemerError::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                RedeemerError::RateLimited("limit".into()),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                RedeemerError::Upstream("rpc".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                RedeemerError::Internal("oops".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
