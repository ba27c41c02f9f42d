// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::auth::AuthError;

/// Request-level error for handlers that validate input on top of the
/// auth layer.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<&'static str>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

/// Renders exactly as the [`AuthError`] itself would.
impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let (message, code) = err.wire_message();
        Self {
            status: err.status_code(),
            message,
            code: Some(code),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            error_code: self.code,
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn constructors_set_status_and_message() {
        let bad = ApiError::bad_request("bad");
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
        assert_eq!(bad.message, "bad");
        assert!(bad.code.is_none());
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::bad_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, r#"{"error":"bad data"}"#);
    }

    #[tokio::test]
    async fn auth_errors_keep_their_wire_shape() {
        let via_api = ApiError::from(AuthError::SessionExpired).into_response();
        let direct = AuthError::SessionExpired.into_response();
        assert_eq!(via_api.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(direct.status(), StatusCode::UNAUTHORIZED);

        let via_api = body_string(via_api).await;
        assert_eq!(via_api, body_string(direct).await);
        assert_eq!(
            via_api,
            r#"{"error":"authentication failed","error_code":"unauthenticated"}"#
        );
    }
}
