//! Refresh and OAuth-state cookies.

use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};

use super::state::AuthConfig;
use crate::session::REFRESH_TTL_MILLIS;

pub(crate) const REFRESH_COOKIE_NAME: &str = "refreshToken";
pub(crate) const OAUTH_STATE_COOKIE_NAME: &str = "oauth_state";
const OAUTH_STATE_TTL_SECONDS: i64 = 5 * 60;

fn build_cookie(
    config: &AuthConfig,
    name: &str,
    value: &str,
    max_age: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Carries the raw refresh token; the store only ever sees its hash.
pub(crate) fn refresh_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(config, REFRESH_COOKIE_NAME, token, REFRESH_TTL_MILLIS / 1000)
}

pub(crate) fn clear_refresh_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(config, REFRESH_COOKIE_NAME, "", 0)
}

pub(crate) fn oauth_state_cookie(
    config: &AuthConfig,
    nonce: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(config, OAUTH_STATE_COOKIE_NAME, nonce, OAUTH_STATE_TTL_SECONDS)
}

pub(crate) fn clear_oauth_state_cookie(
    config: &AuthConfig,
) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(config, OAUTH_STATE_COOKIE_NAME, "", 0)
}

/// First non-empty value of cookie `name` across all `Cookie` headers.
pub(crate) fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| key.trim() == name && !value.trim().is_empty())
        .map(|(_, value)| value.trim().to_string())
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use secrecy::SecretString;
    use url::Url;

    fn config(public_url: &str) -> Result<AuthConfig> {
        Ok(AuthConfig::new(
            SecretString::from("secret"),
            Url::parse(public_url)?,
        ))
    }

    #[test]
    fn refresh_cookie_attributes() -> Result<()> {
        let cookie = refresh_cookie(&config("http://localhost:4000")?, "abc")?;
        assert_eq!(
            cookie.to_str()?,
            "refreshToken=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=2592000"
        );

        let secure = refresh_cookie(&config("https://api.hck.edu")?, "abc")?;
        assert!(secure.to_str()?.ends_with("; Secure"));
        Ok(())
    }

    #[test]
    fn clearing_uses_zero_max_age() -> Result<()> {
        let cookie = clear_refresh_cookie(&config("http://localhost:4000")?)?;
        assert!(cookie.to_str()?.starts_with("refreshToken=; "));
        assert!(cookie.to_str()?.contains("Max-Age=0"));

        let state = oauth_state_cookie(&config("http://localhost:4000")?, "n1")?;
        assert!(state.to_str()?.contains("Max-Age=300"));
        Ok(())
    }

    #[test]
    fn reads_cookie_among_others() -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; refreshToken="));
        headers.append(COOKIE, HeaderValue::from_static("oauth_state=n1; refreshToken=r1"));
        assert_eq!(read_cookie(&headers, REFRESH_COOKIE_NAME).as_deref(), Some("r1"));
        assert_eq!(read_cookie(&headers, OAUTH_STATE_COOKIE_NAME).as_deref(), Some("n1"));
        assert_eq!(read_cookie(&headers, "missing"), None);
        Ok(())
    }

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(extract_bearer_token(&headers).as_deref(), Some("abc"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&headers), None);
    }
}
