use std::path::Path;

use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};

use super::Channel;
use crate::errors::{AppError, AppResult};

/// Stored message template. Email templates carry subject and html, push templates a title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub subject: Option<String>,
    pub title: Option<String>,
    pub text: String,
    pub html: Option<String>,
}

impl Template {
    pub fn render(&self, context: &Map<String, Value>) -> Template {
        Template {
            subject: self.subject.as_deref().map(|s| render(s, context)),
            title: self.title.as_deref().map(|s| render(s, context)),
            text: render(&self.text, context),
            html: self.html.as_deref().map(|s| render_html(s, context)),
        }
    }
}

/// Substitutes `{{ key }}` placeholders. Unknown keys render empty, an unclosed
/// brace pair is kept verbatim.
pub fn render(template: &str, context: &Map<String, Value>) -> String {
    substitute(template, context, |value, out| out.push_str(value))
}

/// Like [`render`], but substituted values are HTML-escaped. The template markup itself is trusted.
pub fn render_html(template: &str, context: &Map<String, Value>) -> String {
    substitute(template, context, escape_html)
}

fn escape_html(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
}

fn substitute(template: &str, context: &Map<String, Value>, write: impl Fn(&str, &mut String)) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match context.get(key) {
                    Some(Value::String(s)) => write(s, &mut out),
                    Some(Value::Null) | None => {}
                    Some(other) => write(&other.to_string(), &mut out),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Key-value lookup of templates by (event, locale).
#[derive(Debug, Clone)]
pub struct TemplateStore {
    pool: SqlitePool,
}

impl TemplateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn lookup(&self, channel: Channel, event: &str, lang: &str) -> AppResult<Option<Template>> {
        match channel {
            Channel::Email => {
                let row = sqlx::query(
                    "SELECT subject, text, html FROM email_templates WHERE event = ? AND lang = ?",
                )
                .bind(event)
                .bind(lang)
                .fetch_optional(&self.pool)
                .await?;

                row.map(|r| -> AppResult<Template> {
                    Ok(Template {
                        subject: Some(r.try_get("subject")?),
                        title: None,
                        text: r.try_get("text")?,
                        html: Some(r.try_get("html")?),
                    })
                })
                .transpose()
            }
            Channel::Push => {
                let row = sqlx::query("SELECT title, text FROM push_templates WHERE event = ? AND lang = ?")
                    .bind(event)
                    .bind(lang)
                    .fetch_optional(&self.pool)
                    .await?;

                row.map(|r| -> AppResult<Template> {
                    Ok(Template {
                        subject: None,
                        title: Some(r.try_get("title")?),
                        text: r.try_get("text")?,
                        html: None,
                    })
                })
                .transpose()
            }
        }
    }

    pub async fn upsert(&self, channel: Channel, event: &str, lang: &str, template: &Template) -> AppResult<()> {
        match channel {
            Channel::Email => {
                sqlx::query(
                    "INSERT INTO email_templates (event, lang, subject, text, html) VALUES (?, ?, ?, ?, ?) \
                     ON CONFLICT(event, lang) DO UPDATE SET subject = excluded.subject, text = excluded.text, html = excluded.html",
                )
                .bind(event)
                .bind(lang)
                .bind(template.subject.as_deref().unwrap_or_default())
                .bind(&template.text)
                .bind(template.html.as_deref().unwrap_or_default())
                .execute(&self.pool)
                .await?;
            }
            Channel::Push => {
                sqlx::query(
                    "INSERT INTO push_templates (event, lang, title, text) VALUES (?, ?, ?, ?) \
                     ON CONFLICT(event, lang) DO UPDATE SET title = excluded.title, text = excluded.text",
                )
                .bind(event)
                .bind(lang)
                .bind(template.title.as_deref().unwrap_or_default())
                .bind(&template.text)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Reloads every template found under `<dir>/{email,push}/<lang>/<event>/`.
    /// Email directories hold `subject.txt`, `text.txt`, `html.html`; push ones `title.txt`, `text.txt`.
    pub async fn reset_from_dir(&self, dir: &Path) -> AppResult<usize> {
        let mut loaded = 0;

        for (channel, sub) in [(Channel::Email, "email"), (Channel::Push, "push")] {
            let root = dir.join(sub);
            if !root.is_dir() {
                continue;
            }

            for (lang, event, path) in template_dirs(&root)? {
                let template = match channel {
                    Channel::Email => Template {
                        subject: Some(read_trimmed(&path.join("subject.txt"), 255)?),
                        title: None,
                        text: read_file(&path.join("text.txt"))?,
                        html: Some(read_file(&path.join("html.html"))?),
                    },
                    Channel::Push => Template {
                        subject: None,
                        title: Some(read_trimmed(&path.join("title.txt"), 255)?),
                        text: read_file(&path.join("text.txt"))?,
                        html: None,
                    },
                };
                self.upsert(channel, &event, &lang, &template).await?;
                tracing::info!(channel = channel.as_str(), event = %event, lang = %lang, "template loaded");
                loaded += 1;
            }
        }

        Ok(loaded)
    }
}

fn template_dirs(root: &Path) -> AppResult<Vec<(String, String, std::path::PathBuf)>> {
    let mut found = Vec::new();
    for lang_entry in std::fs::read_dir(root).map_err(io_error)? {
        let lang_entry = lang_entry.map_err(io_error)?;
        if !lang_entry.path().is_dir() {
            continue;
        }
        let lang = lang_entry.file_name().to_string_lossy().to_string();
        for event_entry in std::fs::read_dir(lang_entry.path()).map_err(io_error)? {
            let event_entry = event_entry.map_err(io_error)?;
            if event_entry.path().is_dir() {
                let event = event_entry.file_name().to_string_lossy().to_string();
                found.push((lang.clone(), event, event_entry.path()));
            }
        }
    }
    found.sort();
    Ok(found)
}

fn read_file(path: &Path) -> AppResult<String> {
    std::fs::read_to_string(path).map_err(io_error)
}

fn read_trimmed(path: &Path, max_chars: usize) -> AppResult<String> {
    Ok(read_file(path)?.trim().chars().take(max_chars).collect())
}

fn io_error(err: std::io::Error) -> AppError {
    AppError::internal(format!("template io error: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn renders_placeholders() {
        let context = ctx(json!({"user": "Petrov Ivan", "url_sign_up": "abc", "count": 3}));
        assert_eq!(
            render("{{ user }} invited you: {{url_sign_up}} ({{ count }})", &context),
            "Petrov Ivan invited you: abc (3)"
        );
    }

    #[test]
    fn missing_keys_render_empty_and_unclosed_braces_stay() {
        let context = ctx(json!({}));
        assert_eq!(render("a{{ nope }}b", &context), "ab");
        assert_eq!(render("a {{ open", &context), "a {{ open");
    }

    #[test]
    fn template_renders_every_part() {
        let template = Template {
            subject: Some("Hi {{ user }}".into()),
            title: None,
            text: "code {{ code }}".into(),
            html: Some("<b>{{ code }}</b>".into()),
        };
        let rendered = template.render(&ctx(json!({"user": "Ada", "code": "12345678"})));
        assert_eq!(rendered.subject.as_deref(), Some("Hi Ada"));
        assert_eq!(rendered.text, "code 12345678");
        assert_eq!(rendered.html.as_deref(), Some("<b>12345678</b>"));
    }

    #[test]
    fn html_part_escapes_substituted_values() {
        let template = Template {
            subject: Some("{{ user }} invited you".into()),
            title: None,
            text: "{{ user }} invited you.".into(),
            html: Some("<p>{{ user }} invited you.</p>".into()),
        };
        let name = "<script>alert('x')</script> & \"Eve\"";
        let rendered = template.render(&ctx(json!({ "user": name })));

        assert_eq!(
            rendered.html.as_deref(),
            Some("<p>&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt; &amp; &quot;Eve&quot; invited you.</p>")
        );
        assert_eq!(rendered.text, format!("{name} invited you."));
        assert_eq!(rendered.subject, Some(format!("{name} invited you")));
    }
}
