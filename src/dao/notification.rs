use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::dao::{
    backend::{Direction, Filter, Query, TableStore},
    models::{NewNotification, Notification, NotificationId},
    rows::{from_rows, patch, to_row},
    storage::StorageResult,
};

/// Remote table holding per-user notifications.
pub const NOTIFICATION_TABLE: &str = "notifications";

/// Data Access Object for notification rows.
#[derive(Clone)]
pub struct NotificationRepository {
    tables: Arc<dyn TableStore>,
}

impl NotificationRepository {
    /// Repository over `tables`.
    pub fn new(tables: Arc<dyn TableStore>) -> Self {
        Self { tables }
    }

    /// Most recent notifications of `user_id`, newest first.
    pub async fn latest(&self, user_id: Uuid, limit: usize) -> StorageResult<Vec<Notification>> {
        let rows = self
            .tables
            .select(
                NOTIFICATION_TABLE,
                Query::new()
                    .filter(Filter::eq("user_id", user_id.to_string()))
                    .order_by("created_at", Direction::Descending)
                    .limit(limit),
            )
            .await?;
        from_rows(NOTIFICATION_TABLE, rows)
    }

    /// Insert a notification; `None` when the store does not echo the row.
    pub async fn insert(&self, notification: &NewNotification) -> StorageResult<Option<Notification>> {
        let rows = self
            .tables
            .insert(
                NOTIFICATION_TABLE,
                vec![to_row(NOTIFICATION_TABLE, notification)?],
            )
            .await?;
        Ok(from_rows(NOTIFICATION_TABLE, rows)?.into_iter().next())
    }

    /// Flag the given notifications as read.
    pub async fn mark_read(&self, ids: &[NotificationId]) -> StorageResult<()> {
        let filter = match ids {
            [] => return Ok(()),
            [id] => Filter::eq("id", *id),
            many => Filter::any_of("id", many.iter().copied()),
        };
        self.tables
            .update(NOTIFICATION_TABLE, patch("read", Value::Bool(true)), vec![filter])
            .await
    }
}
