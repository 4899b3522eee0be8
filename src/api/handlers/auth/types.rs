//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::profile::Profile;

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    /// Credential-less development login; ignored in production.
    #[serde(default)]
    pub dev: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct TokenLoginRequest {
    #[serde(default)]
    pub id_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub token: String,
    pub user: Profile,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RefreshResponse {
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UserResponse {
    pub user: Profile,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "photoURL")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct OtpSendRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub uid: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OtpSendResponse {
    pub success: bool,
    pub message: String,
    pub sent: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct OtpVerifyRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub otp: String,
    #[serde(default)]
    pub uid: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OtpVerifyResponse {
    pub success: bool,
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct OAuthStartQuery {
    #[serde(default)]
    pub redirect: Option<String>,
    #[serde(default)]
    pub login_hint: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct OAuthCallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// Impersonation accepts either `{"user": {...}}` or the bare user object.
#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct ImpersonateRequest {
    #[serde(default)]
    pub user: Option<ImpersonatedUser>,
    #[serde(flatten)]
    pub bare: ImpersonatedUser,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ImpersonatedUser {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default, rename = "photoURL")]
    pub photo_url: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OkResponse {
    pub ok: bool,
}
