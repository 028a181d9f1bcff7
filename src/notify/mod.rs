//! Fire-and-forget outbound messaging.
//!
//! Request handlers hand a [`Dispatch`] to the [`Notifier`], which only enqueues it.
//! A background worker drains the queue, resolves the template for the locale,
//! renders it and passes the result to a [`Transport`]. Delivery failures are logged
//! and never reach the request that triggered them.

use std::sync::Arc;

use serde_json::{Map, Value};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::errors::AppResult;

pub mod inbox;
pub mod templates;
pub mod transport;

pub use templates::{Template, TemplateStore};
pub use transport::{LogTransport, SmtpSettings, SmtpTransport, Transport};

pub mod events {
    pub const INVITE: &str = "invite";
    pub const PASSWORD_RESET: &str = "password_reset";
    pub const PASSWORD_RESET_COMPLETE: &str = "password_reset_complete";
    pub const MISSION_ASSIGNED: &str = "mission_assigned";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Email,
    Push,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }
}

/// One queued message for one actor.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub recipient: Uuid,
    pub channel: Channel,
    pub event: String,
    pub locale: String,
    pub context: Map<String, Value>,
}

impl Dispatch {
    pub fn email(recipient: Uuid, event: &str, locale: &str, context: Map<String, Value>) -> Self {
        Self {
            recipient,
            channel: Channel::Email,
            event: event.to_string(),
            locale: locale.to_string(),
            context,
        }
    }

    pub fn push(recipient: Uuid, event: &str, locale: &str, context: Map<String, Value>) -> Self {
        Self {
            recipient,
            channel: Channel::Push,
            event: event.to_string(),
            locale: locale.to_string(),
            context,
        }
    }
}

/// Handle to the bounded delivery queue.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Dispatch>,
}

impl Notifier {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Dispatch>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueues without waiting. Returns false when the message was dropped.
    pub fn dispatch(&self, dispatch: Dispatch) -> bool {
        match self.tx.try_send(dispatch) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(d)) => {
                tracing::warn!(event = %d.event, recipient = %d.recipient, "notification queue full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(d)) => {
                tracing::warn!(event = %d.event, recipient = %d.recipient, "notification worker gone, message dropped");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Push with no device token; the inbox record is still written.
    Recorded,
    MissingTemplate,
    MissingRecipient,
}

pub async fn run_delivery_worker(mut rx: mpsc::Receiver<Dispatch>, pool: SqlitePool, transport: Arc<dyn Transport>) {
    tracing::info!("Notification worker started");
    let templates = TemplateStore::new(pool.clone());

    while let Some(dispatch) = rx.recv().await {
        match deliver(&pool, &templates, transport.as_ref(), &dispatch).await {
            Ok(Delivery::Sent) | Ok(Delivery::Recorded) => {}
            Ok(outcome) => {
                tracing::warn!(event = %dispatch.event, recipient = %dispatch.recipient, ?outcome, "notification skipped");
            }
            Err(e) => {
                tracing::error!(event = %dispatch.event, recipient = %dispatch.recipient, "notification delivery failed: {}", e);
            }
        }
    }
    tracing::info!("Notification worker stopped");
}

pub async fn deliver(
    pool: &SqlitePool,
    templates: &TemplateStore,
    transport: &dyn Transport,
    dispatch: &Dispatch,
) -> AppResult<Delivery> {
    let email: Option<String> = sqlx::query_scalar("SELECT email FROM actors WHERE id = ?")
        .bind(dispatch.recipient.to_string())
        .fetch_optional(pool)
        .await?;
    let Some(email) = email else {
        return Ok(Delivery::MissingRecipient);
    };

    let Some(template) = templates
        .lookup(dispatch.channel, &dispatch.event, &dispatch.locale)
        .await?
    else {
        return Ok(Delivery::MissingTemplate);
    };
    let message = template.render(&dispatch.context);

    match dispatch.channel {
        Channel::Email => {
            transport.send_email(&email, &message).await?;
            Ok(Delivery::Sent)
        }
        Channel::Push => {
            inbox::record(pool, dispatch.recipient, &dispatch.event, &message).await?;
            match inbox::device_token(pool, dispatch.recipient).await? {
                Some(token) => {
                    transport.send_push(&token, &message).await?;
                    Ok(Delivery::Sent)
                }
                None => Ok(Delivery::Recorded),
            }
        }
    }
}

/// Builds a template context from `key => value` pairs.
#[macro_export]
macro_rules! context {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = serde_json::Map::new();
        $( map.insert($key.to_string(), serde_json::Value::from($value)); )*
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (notifier, mut rx) = Notifier::channel(1);
        let id = Uuid::new_v4();

        assert!(notifier.dispatch(Dispatch::email(id, events::INVITE, "en", Map::new())));
        assert!(!notifier.dispatch(Dispatch::email(id, events::INVITE, "en", Map::new())));

        let queued = rx.recv().await;
        assert_eq!(queued.map(|d| d.event), Some(events::INVITE.to_string()));
    }

    #[tokio::test]
    async fn closed_queue_reports_drop() {
        let (notifier, rx) = Notifier::channel(4);
        drop(rx);
        assert!(!notifier.dispatch(Dispatch::push(Uuid::new_v4(), events::MISSION_ASSIGNED, "ru", Map::new())));
    }

    #[test]
    fn context_macro_builds_map() {
        let ctx = crate::context! { "user" => "Ada", "count" => 2 };
        assert_eq!(ctx.get("user"), Some(&Value::from("Ada")));
        assert_eq!(ctx.get("count"), Some(&Value::from(2)));
    }
}
