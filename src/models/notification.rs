use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Delivered push event; immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Notification {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub event: String,
    pub title: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NewNotificationsResponse {
    pub new_messages: i64,
}

#[derive(Debug, Clone, Copy, Deserialize, utoipa::IntoParams)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub size: Option<i64>,
}

impl PageQuery {
    pub const DEFAULT_SIZE: i64 = 20;
    pub const MAX_SIZE: i64 = 100;

    /// `(limit, offset)`; pages start at 1.
    pub fn limit_offset(&self) -> (i64, i64) {
        let size = self.size.unwrap_or(Self::DEFAULT_SIZE).clamp(1, Self::MAX_SIZE);
        let page = self.page.unwrap_or(1).max(1);
        (size, (page - 1).saturating_mul(size))
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NotificationPage {
    pub count: i64,
    pub results: Vec<Notification>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_query_clamps() {
        let q = PageQuery { page: None, size: None };
        assert_eq!(q.limit_offset(), (20, 0));
        let q = PageQuery { page: Some(3), size: Some(500) };
        assert_eq!(q.limit_offset(), (100, 200));
        let q = PageQuery { page: Some(0), size: Some(0) };
        assert_eq!(q.limit_offset(), (1, 0));
        let q = PageQuery { page: Some(i64::MAX), size: Some(100) };
        assert_eq!(q.limit_offset(), (100, i64::MAX));
        let q = PageQuery { page: Some(i64::MIN), size: None };
        assert_eq!(q.limit_offset(), (20, 0));
    }
}
