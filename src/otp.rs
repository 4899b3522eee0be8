//! OTP verifier: six-digit email codes gating the application-level `isVerified` flag.

use anyhow::Context;
use rand::{rngs::OsRng, Rng};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::mail::{MailMessage, MailSender};
use crate::session::{MetaPatch, SessionStore};
use crate::store::{OtpRecord, OtpRepository, UserDirectory, UserDocument};

/// 10 minutes.
pub const OTP_TTL_MILLIS: i64 = 10 * 60 * 1000;
const OTP_SUBJECT: &str = "Your Verification Code";

#[derive(Debug, Error)]
pub enum OtpError {
    #[error("No OTP found for this email")]
    NotFound,
    #[error("Invalid OTP")]
    Mismatch,
    #[error("OTP expired")]
    Expired,
    #[error("OTP storage failure: {0:#}")]
    Storage(#[source] anyhow::Error),
}

/// Result of [`OtpVerifier::send_otp`]: the code exists either way, `sent` says whether it was mailed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OtpDelivery {
    pub sent: bool,
}

/// Trim + lowercase, so codes are keyed consistently.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn generate_code() -> String {
    OsRng.gen_range(100_000..=999_999).to_string()
}

fn otp_message(to: &str, otp: &str) -> MailMessage {
    MailMessage {
        to: to.to_string(),
        subject: OTP_SUBJECT.to_string(),
        text: format!("Your OTP is {otp}. It will expire in 10 minutes."),
        html: format!("<b>Your OTP is {otp}</b>. It will expire in 10 minutes."),
    }
}

pub struct OtpVerifier {
    otps: Arc<dyn OtpRepository>,
    users: Arc<dyn UserDirectory>,
    sessions: Arc<SessionStore>,
    mailer: Option<Arc<dyn MailSender>>,
}

impl OtpVerifier {
    pub fn new(
        otps: Arc<dyn OtpRepository>,
        users: Arc<dyn UserDirectory>,
        sessions: Arc<SessionStore>,
        mailer: Option<Arc<dyn MailSender>>,
    ) -> Self {
        Self {
            otps,
            users,
            sessions,
            mailer,
        }
    }

    /// Generate and store a fresh code for `email`, replacing any previous one, then try to mail it.
    ///
    /// # Errors
    /// Only when the code cannot be stored. Delivery failures are reported through [`OtpDelivery`].
    pub async fn send_otp(&self, email: &str, uid: &str) -> anyhow::Result<OtpDelivery> {
        let email = normalize_email(email);
        let otp = generate_code();
        let now = crate::now_millis();
        let record = OtpRecord {
            otp: otp.clone(),
            uid: uid.to_string(),
            expires_at: now + OTP_TTL_MILLIS,
            created_at: now,
        };

        self.otps
            .put_otp(&email, &record)
            .await
            .context("failed to store otp")?;

        let Some(mailer) = &self.mailer else {
            info!(email = %email, otp = %otp, "mail sender not configured, development OTP");
            return Ok(OtpDelivery { sent: false });
        };

        match mailer.send(&otp_message(&email, &otp)).await {
            Ok(()) => Ok(OtpDelivery { sent: true }),
            Err(err) => {
                error!(email = %email, "Failed to send OTP email: {err:#}");
                Ok(OtpDelivery { sent: false })
            }
        }
    }

    /// Check `otp` for `email` and, on success, mark `uid` verified everywhere.
    ///
    /// Checks run in order: missing record, wrong code, expiry. The record's own uid is
    /// authoritative; a caller-supplied uid that disagrees is treated as a wrong code.
    ///
    /// # Errors
    /// Returns the failed check, or [`OtpError::Storage`] when the store or the user document fails.
    pub async fn verify_otp(&self, email: &str, otp: &str, uid: &str) -> Result<(), OtpError> {
        let email = normalize_email(email);
        let record = self
            .otps
            .get_otp(&email)
            .await
            .map_err(OtpError::Storage)?
            .ok_or(OtpError::NotFound)?;

        if record.otp != otp.trim() {
            return Err(OtpError::Mismatch);
        }
        if !uid.is_empty() && !record.uid.is_empty() && uid != record.uid {
            warn!(email = %email, "OTP presented for a different uid");
            return Err(OtpError::Mismatch);
        }
        if crate::now_millis() > record.expires_at {
            return Err(OtpError::Expired);
        }

        let uid = if record.uid.is_empty() { uid } else { record.uid.as_str() };
        if uid.is_empty() {
            return Err(OtpError::Mismatch);
        }

        let verified = UserDocument {
            is_verified: Some(true),
            ..UserDocument::default()
        };
        self.users
            .merge_user(uid, &verified)
            .await
            .map_err(OtpError::Storage)?;

        // The user document is authoritative; stale sessions catch up at next login.
        match self
            .sessions
            .merge_meta_for_uid(uid, &MetaPatch::verified())
            .await
        {
            Ok(updated) => info!(uid, updated, "Propagated verification to sessions"),
            Err(err) => warn!(uid, "Failed to update sessions after OTP verification: {err:#}"),
        }

        if let Err(err) = self.otps.delete_otp(&email).await {
            error!(email = %email, "Failed to delete used OTP: {err:#}");
        }

        Ok(())
    }
}
