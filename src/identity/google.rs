//! Google OAuth 2.0 authorization-code client.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;
use url::Url;

use crate::profile::IdentityClaim;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct GoogleUserInfo {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub picture: Option<String>,
}

impl GoogleUserInfo {
    /// OAuth users are keyed `google:<sub>` so they never collide with provider-native ids.
    #[must_use]
    pub fn into_claim(self) -> IdentityClaim {
        IdentityClaim {
            uid: format!("google:{}", self.sub),
            email: self.email.unwrap_or_default(),
            display_name: self.name.unwrap_or_default(),
            email_verified: self.email_verified.unwrap_or(false),
            photo_url: self.picture.filter(|picture| !picture.is_empty()),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct GoogleOAuth {
    client: Client,
    client_id: String,
    client_secret: SecretString,
    redirect_uri: String,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
}

impl GoogleOAuth {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(client_id: String, client_secret: SecretString, redirect_uri: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build oauth client")?;
        Ok(Self {
            client,
            client_id,
            client_secret,
            redirect_uri,
            auth_url: AUTH_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            userinfo_url: USERINFO_URL.to_string(),
        })
    }

    #[must_use]
    pub fn with_endpoints(mut self, token_url: String, userinfo_url: String) -> Self {
        self.token_url = token_url;
        self.userinfo_url = userinfo_url;
        self
    }

    /// Consent-screen URL carrying the signed `state`.
    ///
    /// # Errors
    /// Returns an error if the authorization endpoint is not a valid URL.
    pub fn authorize_url(&self, state: &str, login_hint: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.auth_url).context("invalid authorization endpoint")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("scope", "openid email profile")
                .append_pair("access_type", "offline")
                .append_pair("include_granted_scopes", "true")
                .append_pair("prompt", "consent");
            if let Some(hint) = login_hint.filter(|hint| !hint.is_empty()) {
                query.append_pair("login_hint", hint);
            }
            query.append_pair("state", state);
        }
        Ok(url)
    }

    /// Exchange an authorization code and fetch the user's profile.
    ///
    /// # Errors
    /// Returns an error if either provider call fails.
    #[instrument(skip_all)]
    pub async fn exchange_code(&self, code: &str) -> Result<GoogleUserInfo> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .context("token exchange request failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("token exchange returned {status}: {detail}"));
        }
        let token: TokenResponse = response
            .json()
            .await
            .context("failed to decode token response")?;

        self.client
            .get(&self.userinfo_url)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .context("userinfo request failed")?
            .json::<GoogleUserInfo>()
            .await
            .context("failed to decode userinfo")
    }
}
