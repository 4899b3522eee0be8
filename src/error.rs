//! HTTP-facing error taxonomy.
//!
//! Every handler failure ends up as an [`ApiError`], rendered as
//! `{"error": "<message>", "code": "<machine_code>"}`. Internal details are logged at
//! the call site and never placed in the message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::otp::OtpError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Wrong password or rejected provider credential. Never says which one.
    #[error("{0}")]
    InvalidCredentials(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Expired(String),
    #[error(transparent)]
    Otp(#[from] OtpError),
    #[error("{0}")]
    UpstreamUnavailable(String),
    /// A capability this request needs was not configured at startup.
    #[error("{0}")]
    NotConfigured(String),
    #[error("{0}")]
    Configuration(String),
    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize, ToSchema, Debug)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials(_) | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) | Self::Expired(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Otp(err) => match err {
                OtpError::NotFound | OtpError::Mismatch | OtpError::Expired => {
                    StatusCode::BAD_REQUEST
                }
                OtpError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Configuration(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials(_) => "invalid_credentials",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Expired(_) => "expired",
            Self::Otp(err) => match err {
                OtpError::NotFound => "otp_not_found",
                OtpError::Mismatch => "otp_mismatch",
                OtpError::Expired => "expired",
                OtpError::Storage(_) => "internal",
            },
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::NotConfigured(_) | Self::Configuration(_) => "configuration",
            Self::Internal(_) => "internal",
        }
    }

    fn public_message(&self) -> String {
        match self {
            // Storage detail stays in the logs.
            Self::Otp(OtpError::Storage(_)) => "Failed to verify OTP".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.public_message(),
            code: self.code().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use http_body_util::BodyExt;

    #[test]
    fn status_mapping_follows_taxonomy() {
        let cases = [
            (
                ApiError::InvalidCredentials("x".into()),
                StatusCode::UNAUTHORIZED,
            ),
            (ApiError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (ApiError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::Otp(OtpError::Mismatch), StatusCode::BAD_REQUEST),
            (ApiError::Otp(OtpError::Expired), StatusCode::BAD_REQUEST),
            (
                ApiError::UpstreamUnavailable("x".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ApiError::NotConfigured("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{err:?}");
        }
    }

    #[tokio::test]
    async fn otp_storage_error_hides_detail() -> Result<()> {
        let err = ApiError::Otp(OtpError::Storage(anyhow!("connection refused at 10.0.0.7")));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = response.into_body().collect().await?.to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes)?;
        assert_eq!(body["error"], "Failed to verify OTP");
        assert_eq!(body["code"], "internal");
        Ok(())
    }

    #[tokio::test]
    async fn body_carries_message_and_code() -> Result<()> {
        let response = ApiError::Otp(OtpError::NotFound).into_response();
        let bytes = response.into_body().collect().await?.to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes)?;
        assert_eq!(body["error"], "No OTP found for this email");
        assert_eq!(body["code"], "otp_not_found");
        Ok(())
    }
}
