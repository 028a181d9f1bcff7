mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use field_users::authz::RoleKind;
use field_users::context;
use field_users::errors::AppResult;
use field_users::notify::{self, events, inbox, run_delivery_worker, Delivery, Dispatch, Notifier, Template, TemplateStore, Transport};

use common::{insert_actor, setup_db};

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Email { to: String, subject: String, text: String },
    Push { device: String, title: String },
}

#[derive(Default, Clone)]
struct RecordingTransport {
    sent: Arc<Mutex<Vec<Sent>>>,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_email(&self, to: &str, message: &Template) -> AppResult<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(Sent::Email {
                to: to.to_string(),
                subject: message.subject.clone().unwrap_or_default(),
                text: message.text.clone(),
            });
        }
        Ok(())
    }

    async fn send_push(&self, device_token: &str, message: &Template) -> AppResult<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(Sent::Push {
                device: device_token.to_string(),
                title: message.title.clone().unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[tokio::test]
async fn email_is_rendered_in_the_requested_locale() -> Result<()> {
    let db = setup_db().await?;
    let id = insert_actor(&db.pool, RoleKind::Coordinator, None, "coord@example.com", false).await?;
    let templates = TemplateStore::new(db.pool.clone());
    let transport = RecordingTransport::default();

    let dispatch = Dispatch::email(
        id,
        events::INVITE,
        "en",
        context! { "user" => "Ivanova Anna", "url_sign_up" => "tok-123" },
    );
    let outcome = notify::deliver(&db.pool, &templates, &transport, &dispatch).await?;
    assert_eq!(outcome, Delivery::Sent);
    assert_eq!(
        transport.sent(),
        vec![Sent::Email {
            to: "coord@example.com".to_string(),
            subject: "You are invited".to_string(),
            text: "Ivanova Anna invited you. Activation token: tok-123".to_string(),
        }]
    );
    Ok(())
}

#[tokio::test]
async fn missing_template_or_recipient_is_skipped() -> Result<()> {
    let db = setup_db().await?;
    let id = insert_actor(&db.pool, RoleKind::Coordinator, None, "coord@example.com", true).await?;
    let templates = TemplateStore::new(db.pool.clone());
    let transport = RecordingTransport::default();

    let unknown_lang = Dispatch::email(id, events::INVITE, "de", context! {});
    assert_eq!(
        notify::deliver(&db.pool, &templates, &transport, &unknown_lang).await?,
        Delivery::MissingTemplate
    );

    let nobody = Dispatch::email(Uuid::new_v4(), events::INVITE, "en", context! {});
    assert_eq!(
        notify::deliver(&db.pool, &templates, &transport, &nobody).await?,
        Delivery::MissingRecipient
    );
    assert!(transport.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn push_is_always_recorded_and_sent_with_a_device_token() -> Result<()> {
    let db = setup_db().await?;
    let id = insert_actor(&db.pool, RoleKind::BudgetOwner, None, "owner@example.com", true).await?;
    let templates = TemplateStore::new(db.pool.clone());
    let transport = RecordingTransport::default();

    let push = Dispatch::push(
        id,
        events::MISSION_ASSIGNED,
        "en",
        context! { "url" => "m-17", "datetime" => "2026-10-20 09:00" },
    );
    assert_eq!(
        notify::deliver(&db.pool, &templates, &transport, &push).await?,
        Delivery::Recorded
    );
    assert!(transport.sent().is_empty());

    inbox::set_device_token(&db.pool, id, "device-1").await?;
    assert_eq!(notify::deliver(&db.pool, &templates, &transport, &push).await?, Delivery::Sent);
    assert_eq!(
        transport.sent(),
        vec![Sent::Push {
            device: "device-1".to_string(),
            title: "New mission".to_string(),
        }]
    );

    let (count, items) = inbox::list(&db.pool, id, 10, 0).await?;
    assert_eq!(count, 2);
    assert_eq!(items[0].text, "Mission m-17 scheduled for 2026-10-20 09:00");
    assert_eq!(inbox::unseen(&db.pool, id).await?, 0);
    Ok(())
}

#[tokio::test]
async fn templates_can_be_replaced() -> Result<()> {
    let db = setup_db().await?;
    let templates = TemplateStore::new(db.pool.clone());

    templates
        .upsert(
            notify::Channel::Email,
            events::PASSWORD_RESET,
            "en",
            &Template {
                subject: Some("Reset".to_string()),
                title: None,
                text: "Code: {{ code }}".to_string(),
                html: Some("<b>{{ code }}</b>".to_string()),
            },
        )
        .await?;

    let found = templates
        .lookup(notify::Channel::Email, events::PASSWORD_RESET, "en")
        .await?
        .ok_or_else(|| anyhow::anyhow!("template stored"))?;
    assert_eq!(found.subject.as_deref(), Some("Reset"));
    assert_eq!(found.render(&context! { "code" => "12345678" }).text, "Code: 12345678");
    Ok(())
}

#[tokio::test]
async fn worker_drains_the_queue() -> Result<()> {
    let db = setup_db().await?;
    let id = insert_actor(&db.pool, RoleKind::Brigadier, None, "brig@example.com", true).await?;
    let transport = RecordingTransport::default();
    let (notifier, rx) = Notifier::channel(8);

    let worker = tokio::spawn(run_delivery_worker(rx, db.pool.clone(), Arc::new(transport.clone())));
    assert!(notifier.dispatch(Dispatch::email(
        id,
        events::PASSWORD_RESET,
        "ru",
        context! { "code" => "00001111" },
    )));
    drop(notifier);

    tokio::time::timeout(Duration::from_secs(5), worker).await??;
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(&sent[0], Sent::Email { text, .. } if text.contains("00001111")));
    Ok(())
}

#[tokio::test]
async fn templates_reload_from_a_directory_tree() -> Result<()> {
    let db = setup_db().await?;
    let dir = tempfile::tempdir()?;

    let push = dir.path().join("push").join("en").join(events::MISSION_ASSIGNED);
    std::fs::create_dir_all(&push)?;
    std::fs::write(push.join("title.txt"), "Mission ready\n")?;
    std::fs::write(push.join("text.txt"), "Go to {{ url }}")?;

    let email = dir.path().join("email").join("en").join(events::INVITE);
    std::fs::create_dir_all(&email)?;
    std::fs::write(email.join("subject.txt"), "Join us")?;
    std::fs::write(email.join("text.txt"), "Token {{ url_sign_up }}")?;
    std::fs::write(email.join("html.html"), "<p>Token {{ url_sign_up }}</p>")?;

    let templates = TemplateStore::new(db.pool.clone());
    assert_eq!(templates.reset_from_dir(dir.path()).await?, 2);

    let found = templates
        .lookup(notify::Channel::Push, events::MISSION_ASSIGNED, "en")
        .await?
        .ok_or_else(|| anyhow::anyhow!("push template loaded"))?;
    assert_eq!(found.title.as_deref(), Some("Mission ready"));

    let found = templates
        .lookup(notify::Channel::Email, events::INVITE, "en")
        .await?
        .ok_or_else(|| anyhow::anyhow!("email template loaded"))?;
    assert_eq!(found.subject.as_deref(), Some("Join us"));

    // Locales not present in the directory keep their seeded templates.
    assert!(templates
        .lookup(notify::Channel::Email, events::INVITE, "ru")
        .await?
        .is_some());
    Ok(())
}
