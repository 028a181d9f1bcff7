use std::time::Duration;

use async_trait::async_trait;
use lettre::address::AddressError;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::Message;

use super::templates::Template;
use crate::errors::{AppError, AppResult};

/// Outbound delivery (SMTP/HTTP mail gateway, push gateway).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_email(&self, to: &str, message: &Template) -> AppResult<()>;
    async fn send_push(&self, device_token: &str, message: &Template) -> AppResult<()>;
}

/// Writes deliveries to the log instead of a gateway. Bodies are never logged: they carry
/// invite tokens and reset codes.
#[derive(Debug, Clone, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn send_email(&self, to: &str, message: &Template) -> AppResult<()> {
        tracing::info!(
            to = %to,
            subject = message.subject.as_deref().unwrap_or_default(),
            "email delivered"
        );
        Ok(())
    }

    async fn send_push(&self, device_token: &str, message: &Template) -> AppResult<()> {
        tracing::info!(
            device = %device_token,
            title = message.title.as_deref().unwrap_or_default(),
            "push delivered"
        );
        Ok(())
    }
}

/// SMTP relay settings, present only when `SMTP_HOST` is set.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

impl SmtpSettings {
    pub const DEFAULT_PORT: u16 = 587;

    pub fn from_env() -> Result<Option<Self>, AppError> {
        let host = match std::env::var("SMTP_HOST") {
            Ok(host) if !host.trim().is_empty() => host.trim().to_string(),
            _ => return Ok(None),
        };

        let port = match std::env::var("SMTP_PORT") {
            Ok(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| AppError::configuration("SMTP_PORT must be a valid port"))?,
            Err(_) => Self::DEFAULT_PORT,
        };
        let from = std::env::var("SMTP_FROM").map_err(|_| AppError::configuration("SMTP_FROM must be set with SMTP_HOST"))?;

        Ok(Some(Self {
            host,
            port,
            username: std::env::var("SMTP_USERNAME").ok(),
            password: std::env::var("SMTP_PASSWORD").ok(),
            from,
        }))
    }
}

/// Sends email through an SMTP relay (STARTTLS). Push has no gateway here and is logged.
#[derive(Clone)]
pub struct SmtpTransport {
    mailer: lettre::SmtpTransport,
    from: Mailbox,
}

impl SmtpTransport {
    pub fn new(settings: &SmtpSettings) -> AppResult<Self> {
        let from: Mailbox = settings
            .from
            .parse()
            .map_err(|err: AddressError| AppError::configuration(format!("SMTP_FROM: {err}")))?;

        let mut builder = lettre::SmtpTransport::starttls_relay(&settings.host)
            .map_err(|err| AppError::configuration(format!("SMTP_HOST: {err}")))?
            .port(settings.port)
            .timeout(Some(Duration::from_secs(10)));
        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        tracing::info!(host = %settings.host, port = settings.port, "smtp transport configured");
        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }

    /// Plain text alone, or text plus html as alternatives when the template has html.
    pub fn build_message(&self, to: &str, message: &Template) -> AppResult<Message> {
        let to: Mailbox = to
            .parse()
            .map_err(|err: AddressError| AppError::bad_request(format!("invalid recipient: {err}")))?;

        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone().unwrap_or_default());

        let built = match message.html.as_deref() {
            Some(html) if !html.trim().is_empty() => {
                builder.multipart(MultiPart::alternative_plain_html(message.text.clone(), html.to_string()))
            }
            _ => builder.header(ContentType::TEXT_PLAIN).body(message.text.clone()),
        };
        built.map_err(|err| AppError::internal(format!("email build failed: {err}")))
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send_email(&self, to: &str, message: &Template) -> AppResult<()> {
        let email = self.build_message(to, message)?;

        // lettre's blocking transport; keep it off the async workers.
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || lettre::Transport::send(&mailer, &email))
            .await
            .map_err(|err| AppError::internal(format!("email task failed: {err}")))?;

        match result {
            Ok(_) => {
                tracing::info!(
                    to = %to,
                    subject = message.subject.as_deref().unwrap_or_default(),
                    "email sent"
                );
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, to = %to, "smtp delivery failed");
                Err(AppError::internal(format!("smtp delivery failed: {err}")))
            }
        }
    }

    async fn send_push(&self, device_token: &str, message: &Template) -> AppResult<()> {
        LogTransport.send_push(device_token, message).await
    }
}
