//! Email verification codes.

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::error;

use super::{
    state::AuthState,
    types::{OtpSendRequest, OtpSendResponse, OtpVerifyRequest, OtpVerifyResponse},
};
use crate::error::{ApiError, ErrorBody};

#[utoipa::path(
    post,
    path = "/api/otp/send",
    request_body = OtpSendRequest,
    responses(
        (status = 200, description = "Code generated; `sent` tells whether it was mailed", body = OtpSendResponse),
        (status = 400, description = "Missing email or uid", body = ErrorBody),
        (status = 500, description = "Code could not be stored", body = ErrorBody)
    ),
    tag = "otp"
)]
pub async fn send_otp(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<OtpSendRequest>>,
) -> impl IntoResponse {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let email = request.email.trim();
    if email.is_empty() {
        return ApiError::BadRequest("Email is required".to_string()).into_response();
    }
    let uid = request.uid.trim();
    if uid.is_empty() {
        return ApiError::BadRequest("uid is required".to_string()).into_response();
    }

    match auth_state.otp().send_otp(email, uid).await {
        Ok(delivery) => {
            let message = if delivery.sent {
                "OTP sent successfully"
            } else {
                "OTP generated; email could not be sent (check server logs)"
            };
            (
                StatusCode::OK,
                Json(OtpSendResponse {
                    success: true,
                    message: message.to_string(),
                    sent: delivery.sent,
                }),
            )
                .into_response()
        }
        Err(err) => {
            error!("OTP send failed: {err:#}");
            ApiError::Internal("Failed to create OTP".to_string()).into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/otp/verify",
    request_body = OtpVerifyRequest,
    responses(
        (status = 200, description = "Email verified", body = OtpVerifyResponse),
        (status = 400, description = "Missing fields, unknown, wrong or expired code", body = ErrorBody),
        (status = 500, description = "Verification could not be stored", body = ErrorBody)
    ),
    tag = "otp"
)]
pub async fn verify_otp(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<OtpVerifyRequest>>,
) -> impl IntoResponse {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let email = request.email.trim();
    let otp = request.otp.trim();
    if email.is_empty() || otp.is_empty() {
        return ApiError::BadRequest("Email and OTP are required".to_string()).into_response();
    }

    match auth_state
        .otp()
        .verify_otp(email, otp, request.uid.trim())
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(OtpVerifyResponse {
                success: true,
                message: "Email verified successfully".to_string(),
            }),
        )
            .into_response(),
        Err(err) => {
            if let crate::otp::OtpError::Storage(inner) = &err {
                error!("OTP verify failed: {inner:#}");
            }
            ApiError::from(err).into_response()
        }
    }
}
