use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use crate::config::AppConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, email: OutgoingEmail) -> Result<()>;
}

/// Posts JSON `{from, to, subject, text}` to an HTTP mail relay.
pub struct HttpMailer {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    from: String,
}

impl HttpMailer {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, from: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key,
            from: from.into(),
        }
    }
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        let mut request = self.client.post(&self.endpoint).json(&RelayRequest {
            from: &self.from,
            to: &email.to,
            subject: &email.subject,
            text: &email.text,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("mail relay request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("mail relay returned {status}: {body}");
        }
        Ok(())
    }
}

/// Development fallback: logs the recipient and subject instead of sending.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        info!(to = %email.to, subject = %email.subject, "mail relay not configured; email logged only");
        Ok(())
    }
}

pub fn from_config(config: &AppConfig) -> Arc<dyn Mailer> {
    match &config.mail_api_url {
        Some(url) => Arc::new(HttpMailer::new(
            url.clone(),
            config.mail_api_key.clone(),
            config.mail_from.clone(),
        )),
        None => Arc::new(LogMailer),
    }
}

pub fn account_created_email(to: &str, first_name: &str, password: &str, login_link: &str) -> OutgoingEmail {
    OutgoingEmail {
        to: to.to_owned(),
        subject: "Your account has been created".to_owned(),
        text: format!(
            "Hello {first_name},\n\n\
             An account has been created for you.\n\
             Email: {to}\n\
             Temporary password: {password}\n\n\
             Sign in at {login_link} and change your password.\n"
        ),
    }
}

pub fn password_reset_email(to: &str, reset_link: &str, expiry_hours: i64) -> OutgoingEmail {
    OutgoingEmail {
        to: to.to_owned(),
        subject: "Password reset".to_owned(),
        text: format!(
            "A password reset was requested for your account.\n\n\
             Open {reset_link} to choose a new password. \
             The link expires in {expiry_hours} hours.\n\n\
             If you did not request this, ignore this email.\n"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_email_contains_link_and_expiry() {
        let email = password_reset_email(
            "a@example.com",
            "https://app/reset-password?token=abc",
            24,
        );
        assert_eq!(email.to, "a@example.com");
        assert!(email.text.contains("https://app/reset-password?token=abc"));
        assert!(email.text.contains("24 hours"));
    }

    #[test]
    fn account_email_contains_credentials() {
        let email = account_created_email("b@example.com", "Bea", "Xy7!abcdEFGH", "https://app/login");
        assert!(email.text.starts_with("Hello Bea"));
        assert!(email.text.contains("Xy7!abcdEFGH"));
        assert!(email.text.contains("https://app/login"));
    }
}
