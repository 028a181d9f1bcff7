use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::authz::RoleKind;
use crate::errors::AppError;
use crate::models::actor::DbActor;
use crate::models::notification::Notification;

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    // Try RFC3339 first (e.g. 2025-11-19T12:34:56Z)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Try SQLite default timestamp format: "YYYY-MM-DD HH:MM:SS" (with optional fractional seconds)
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    // Try date-only format: "YYYY-MM-DD"
    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date.and_hms_opt(0, 0, 0).ok_or_else(|| AppError::internal("invalid datetime: date out of range".to_string()))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

fn parse_opt_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, AppError> {
    match s {
        Some(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(parse_datetime(trimmed)?))
            }
        }
        None => Ok(None),
    }
}

pub fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(s.trim()).map_err(|e| AppError::internal(format!("invalid uuid: {}", e)))
}

pub fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>, AppError> {
    s.as_deref().map(parse_uuid).transpose()
}

pub fn parse_role(s: &str) -> Result<RoleKind, AppError> {
    RoleKind::parse(s).ok_or_else(|| AppError::internal(format!("unknown role kind: {}", s)))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, AppError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| AppError::internal(format!("missing {}: {}", name, e)))
}

pub fn db_actor_from_row(row: &SqliteRow) -> Result<DbActor, AppError> {
    let id_s: String = column(row, "id")?;
    let role_s: String = column(row, "role")?;
    let parent_id_s: Option<String> = column(row, "parent_id")?;
    let date_joined_s: String = column(row, "date_joined")?;
    let last_login_s: Option<String> = column(row, "last_login")?;

    Ok(DbActor {
        id: parse_uuid(&id_s)?,
        email: column(row, "email")?,
        first_name: column(row, "first_name")?,
        last_name: column(row, "last_name")?,
        phone_number: column(row, "phone_number")?,
        description: column(row, "description")?,
        role: parse_role(&role_s)?,
        parent_id: parse_opt_uuid(parent_id_s)?,
        is_active: column(row, "is_active")?,
        password_hash: column(row, "password_hash")?,
        date_joined: parse_datetime(&date_joined_s)?,
        last_login: parse_opt_datetime(last_login_s)?,
    })
}

pub fn notification_from_row(row: &SqliteRow) -> Result<Notification, AppError> {
    let id_s: String = column(row, "id")?;
    let actor_id_s: String = column(row, "actor_id")?;
    let created_at_s: String = column(row, "created_at")?;

    Ok(Notification {
        id: parse_uuid(&id_s)?,
        actor_id: parse_uuid(&actor_id_s)?,
        event: column(row, "event")?,
        title: column(row, "title")?,
        text: column(row, "text")?,
        created_at: parse_datetime(&created_at_s)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_and_sqlite_formats() -> Result<(), AppError> {
        let a = parse_datetime("2026-10-18T12:00:00.000000Z")?;
        let b = parse_datetime("2026-10-18 12:00:00")?;
        assert_eq!(a, b);
        assert_eq!(parse_datetime("2026-10-18")?.timestamp(), b.timestamp() - 12 * 3600);
        Ok(())
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_datetime("yesterday").is_err());
        assert!(parse_uuid("not-a-uuid").is_err());
        assert!(parse_role("admin").is_err());
    }

    #[test]
    fn empty_optional_datetime_is_none() -> Result<(), AppError> {
        assert_eq!(parse_opt_datetime(Some("  ".to_string()))?, None);
        assert_eq!(parse_opt_datetime(None)?, None);
        Ok(())
    }
}
