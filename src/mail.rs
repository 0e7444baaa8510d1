//! Welcome email copy and delivery through Resend.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::validation::email_digest;

const SUBJECT_EN: &str = "Welcome to Purian";
const BODY_EN: &str = "Thank you for joining the Purian waitlist.\n\n\
Purian crafts natural soaps and anti-dandruff shampoo bars inspired by traditional \
Iranian formulations, handmade in Berlin. We'll let you know when we launch in 2026, \
together with your exclusive launch discount.\n\n\
No spam. Just a single email when we launch.\n\n\
Purian";

const SUBJECT_DE: &str = "Willkommen bei Purian";
const BODY_DE: &str = "Danke, dass du dich für die Purian-Warteliste eingetragen hast.\n\n\
Purian entwickelt natürliche Seifen und Anti-Schuppen-Shampoobars, inspiriert von \
traditionellen iranischen Rezepturen, handgefertigt in Berlin. Wir melden uns zum Launch \
2026 bei dir, zusammen mit deinem exklusiven Rabatt.\n\n\
Kein Spam. Nur eine E-Mail, wenn wir starten.\n\n\
Purian";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mail service answered {status}: {message}")]
    Rejected { status: u16, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WelcomeEmail {
    pub to: String,
    pub subject: &'static str,
    pub text: &'static str,
}

// "de" gets the German copy, every other language the English one
pub fn welcome_email(lang: &str, to: &str) -> WelcomeEmail {
    let (subject, text) = match lang {
        "de" => (SUBJECT_DE, BODY_DE),
        _ => (SUBJECT_EN, BODY_EN),
    };
    WelcomeEmail {
        to: to.to_string(),
        subject,
        text,
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &WelcomeEmail) -> Result<(), MailError>;
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

pub struct ResendMailer {
    client: reqwest::Client,
    url: String,
    api_key: String,
    from: String,
}

impl ResendMailer {
    pub fn new(client: reqwest::Client, url: String, api_key: String, from: String) -> Self {
        Self {
            client,
            url,
            api_key,
            from,
        }
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: &WelcomeEmail) -> Result<(), MailError> {
        let res = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&ResendRequest {
                from: &self.from,
                to: [email.to.as_str()],
                subject: email.subject,
                text: email.text,
            })
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let message = res.text().await.unwrap_or_default();
            return Err(MailError::Rejected { status, message });
        }
        Ok(())
    }
}

// Used when no Resend key is configured: the signup is only logged
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &WelcomeEmail) -> Result<(), MailError> {
        tracing::info!(
            email = %email_digest(&email.to),
            subject = email.subject,
            "welcome email not sent, no mail service configured"
        );
        Ok(())
    }
}
