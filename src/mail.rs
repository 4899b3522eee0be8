//! Outbound mail abstraction.
//!
//! The OTP flow only needs "send this message or tell me it failed". `BrevoMailSender`
//! delivers through Brevo's transactional API. Without a sender the OTP flow logs the code
//! and reports it as not sent.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::info;

const BREVO_SEND_URL: &str = "https://api.brevo.com/v3/smtp/email";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[async_trait]
pub trait MailSender: Send + Sync {
    /// Deliver a message or return an error describing why it was not delivered.
    async fn send(&self, message: &MailMessage) -> Result<()>;
}

#[derive(Serialize)]
struct BrevoAddress<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoSendEmailBody<'a> {
    sender: BrevoAddress<'a>,
    to: Vec<BrevoAddress<'a>>,
    subject: &'a str,
    html_content: &'a str,
    text_content: &'a str,
}

pub struct BrevoMailSender {
    client: Client,
    api_key: SecretString,
    sender_email: String,
    sender_name: String,
    endpoint: String,
}

impl BrevoMailSender {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_key: SecretString, sender_email: String, sender_name: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build mail client")?;
        Ok(Self {
            client,
            api_key,
            sender_email,
            sender_name,
            endpoint: BREVO_SEND_URL.to_string(),
        })
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }
}

#[async_trait]
impl MailSender for BrevoMailSender {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        let body = BrevoSendEmailBody {
            sender: BrevoAddress {
                email: &self.sender_email,
                name: Some(&self.sender_name),
            },
            to: vec![BrevoAddress {
                email: &message.to,
                name: None,
            }],
            subject: &message.subject,
            html_content: &message.html,
            text_content: &message.text,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("api-key", self.api_key.expose_secret())
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await
            .context("mail provider request failed")?;

        let status = response.status();
        if status.is_success() {
            info!(to = %message.to, subject = %message.subject, "Mail delivered");
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        Err(anyhow!("mail provider returned {status}: {detail}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brevo_body_shape() -> Result<()> {
        let body = BrevoSendEmailBody {
            sender: BrevoAddress {
                email: "no-reply@hck.edu",
                name: Some("Helpdesk"),
            },
            to: vec![BrevoAddress {
                email: "a@x.com",
                name: None,
            }],
            subject: "Your Verification Code",
            html_content: "<b>1</b>",
            text_content: "1",
        };
        let value = serde_json::to_value(&body)?;
        assert_eq!(value["sender"]["name"], "Helpdesk");
        assert_eq!(value["to"][0]["email"], "a@x.com");
        assert!(value["to"][0].get("name").is_none());
        assert_eq!(value["htmlContent"], "<b>1</b>");
        assert_eq!(value["textContent"], "1");
        Ok(())
    }

    #[tokio::test]
    async fn brevo_sender_reports_unreachable_provider() -> Result<()> {
        let sender = BrevoMailSender::new(
            SecretString::from("key"),
            "no-reply@hck.edu".to_string(),
            "Helpdesk".to_string(),
        )?
        .with_endpoint("http://127.0.0.1:1/v3/smtp/email".to_string());
        let message = MailMessage {
            to: "a@x.com".to_string(),
            subject: "s".to_string(),
            text: "t".to_string(),
            html: "t".to_string(),
        };
        assert!(sender.send(&message).await.is_err());
        Ok(())
    }
}
