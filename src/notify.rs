//! Best-effort notifications for new contacts.
//!
//! A stored contact is the durable artifact; email and WhatsApp messages are
//! advisory. Each channel runs independently, its failure is logged and
//! reported back in the response, and nothing is retried.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{Config, SmtpConfig, TwilioConfig};
use crate::models::Contact;

const TWILIO_API: &str = "https://api.twilio.com/2010-04-01";
const WHATSAPP_NOTE_CHARS: usize = 400;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Message build error: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider rejected message: {0}")]
    Rejected(String),
}

/// One outbound channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;

    async fn notify(&self, contact: &Contact) -> Result<(), NotifyError>;
}

/// Result of one channel as reported to the client.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct NotifyOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotifyOutcome {
    pub fn sent() -> Self {
        Self {
            ok: true,
            skipped: None,
            reason: None,
            error: None,
        }
    }

    pub fn skipped(reason: &str) -> Self {
        Self {
            ok: false,
            skipped: Some(true),
            reason: Some(reason.to_string()),
            error: None,
        }
    }

    pub fn failed(error: &str) -> Self {
        Self {
            ok: false,
            skipped: None,
            reason: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct NotifyReport {
    pub email: NotifyOutcome,
    pub whatsapp: NotifyOutcome,
}

/// The configured channels. A `None` channel is reported as skipped.
#[derive(Clone, Default)]
pub struct Notifications {
    pub email: Option<Arc<dyn Notifier>>,
    pub whatsapp: Option<Arc<dyn Notifier>>,
}

impl Notifications {
    pub fn from_config(config: &Config) -> Result<Self, NotifyError> {
        let email = match &config.smtp {
            Some(smtp) => Some(Arc::new(SmtpNotifier::new(smtp.clone())?) as Arc<dyn Notifier>),
            None => None,
        };
        let whatsapp = config
            .twilio
            .clone()
            .map(|twilio| Arc::new(WhatsAppNotifier::new(twilio)) as Arc<dyn Notifier>);

        tracing::info!(
            email = email.is_some(),
            whatsapp = whatsapp.is_some(),
            "notification channels"
        );
        Ok(Self { email, whatsapp })
    }

    /// Runs both channels concurrently. Never fails.
    pub async fn dispatch(&self, contact: &Contact) -> NotifyReport {
        let (email, whatsapp) = tokio::join!(
            run_channel(self.email.as_deref(), contact, "SMTP not configured", "Email send failed"),
            run_channel(
                self.whatsapp.as_deref(),
                contact,
                "Twilio not configured",
                "WhatsApp send failed"
            ),
        );
        NotifyReport { email, whatsapp }
    }
}

async fn run_channel(
    notifier: Option<&dyn Notifier>,
    contact: &Contact,
    skipped_reason: &str,
    failure: &str,
) -> NotifyOutcome {
    let Some(notifier) = notifier else {
        return NotifyOutcome::skipped(skipped_reason);
    };
    match notifier.notify(contact).await {
        Ok(()) => {
            tracing::info!(channel = notifier.channel(), contact_id = contact.id, "notification sent");
            NotifyOutcome::sent()
        }
        Err(e) => {
            tracing::warn!(channel = notifier.channel(), contact_id = contact.id, error = %e, "notification failed");
            NotifyOutcome::failed(failure)
        }
    }
}

fn or_dash(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("-")
}

pub fn email_subject(contact: &Contact) -> String {
    format!("Nuovo contatto dal sito (#{}) - {}", contact.id, contact.nome)
}

pub fn email_body(contact: &Contact) -> String {
    format!(
        "Nuovo contatto dal sito\n\n\
         ID: {}\n\
         Data: {}\n\n\
         Nome: {}\n\
         Azienda: {}\n\
         Telefono: {}\n\
         Email: {}\n\
         Indirizzo: {}\n\n\
         Note:\n{}",
        contact.id,
        contact.created_at,
        contact.nome,
        or_dash(&contact.azienda),
        contact.telefono,
        contact.email,
        or_dash(&contact.indirizzo),
        or_dash(&contact.note),
    )
}

pub fn whatsapp_body(contact: &Contact) -> String {
    let note: String = or_dash(&contact.note).chars().take(WHATSAPP_NOTE_CHARS).collect();
    format!(
        "Nuovo contatto dal sito (#{})\n\
         Nome: {}\n\
         Telefono: {}\n\
         Email: {}\n\
         Azienda: {}\n\
         Note: {}",
        contact.id,
        contact.nome,
        contact.telefono,
        contact.email,
        or_dash(&contact.azienda),
        note,
    )
}

/// Email over SMTP.
pub struct SmtpNotifier {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Result<Self, NotifyError> {
        let builder = if config.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        };
        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(config.user.clone(), config.pass.clone()))
            .build();
        Ok(Self { config, transport })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    fn channel(&self) -> &'static str {
        "email"
    }

    async fn notify(&self, contact: &Contact) -> Result<(), NotifyError> {
        let message = Message::builder()
            .from(self.config.from.parse()?)
            .to(self.config.to.parse()?)
            .subject(email_subject(contact))
            .header(ContentType::TEXT_PLAIN)
            .body(email_body(contact))?;
        self.transport.send(message).await?;
        Ok(())
    }
}

/// WhatsApp through the Twilio Messages REST API.
pub struct WhatsAppNotifier {
    config: TwilioConfig,
    client: reqwest::Client,
}

impl WhatsAppNotifier {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WhatsAppNotifier {
    fn channel(&self) -> &'static str {
        "whatsapp"
    }

    async fn notify(&self, contact: &Contact) -> Result<(), NotifyError> {
        let url = format!(
            "{TWILIO_API}/Accounts/{}/Messages.json",
            self.config.account_sid
        );
        let body = whatsapp_body(contact);
        let res = self
            .client
            .post(url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("From", self.config.from.as_str()),
                ("To", self.config.to.as_str()),
                ("Body", body.as_str()),
            ])
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let detail = res.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected(format!("{status}: {detail}")));
        }
        Ok(())
    }
}
