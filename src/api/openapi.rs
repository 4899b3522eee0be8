#![allow(clippy::needless_for_each)]

use utoipa::OpenApi;

use super::handlers::{auth, avatar, chat, config, health, root};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        root::root,
        auth::login::login,
        auth::login::login_token,
        auth::oauth::oauth_start,
        auth::oauth::oauth_callback,
        auth::profile::get_profile,
        auth::profile::update_profile,
        auth::session::refresh,
        auth::session::logout,
        auth::otp::send_otp,
        auth::otp::verify_otp,
        auth::dev::impersonate,
        config::get_config,
        config::put_config,
        avatar::avatar_file,
        avatar::abstract_avatar,
        avatar::abstract_health,
        chat::chat,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::profile::Profile,
            health::Health,
            auth::types::LoginRequest,
            auth::types::TokenLoginRequest,
            auth::types::TokenResponse,
            auth::types::RefreshResponse,
            auth::types::UserResponse,
            auth::types::ProfileUpdateRequest,
            auth::types::OtpSendRequest,
            auth::types::OtpSendResponse,
            auth::types::OtpVerifyRequest,
            auth::types::OtpVerifyResponse,
            auth::types::ImpersonateRequest,
            auth::types::ImpersonatedUser,
            auth::types::OkResponse,
            config::ConfigResponse,
            avatar::AvatarHealth,
            chat::ChatRequest,
            chat::ChatResponse,
            chat::ChatMessage,
        )
    ),
    tags(
        (name = "auth", description = "Login, refresh and logout"),
        (name = "oauth", description = "Server-side Google sign-in"),
        (name = "profile", description = "Profile read and update"),
        (name = "otp", description = "Email verification codes"),
        (name = "config", description = "Shared configuration documents"),
        (name = "avatar", description = "Avatar proxies"),
        (name = "chat", description = "Helpdesk assistant"),
        (name = "dev", description = "Development-only helpers, absent in production"),
        (name = "health", description = "Liveness and dependency status"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
