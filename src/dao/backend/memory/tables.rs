use std::cmp::Ordering;

use futures::future::BoxFuture;
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::dao::{
    backend::{ChangeEvent, ChangeKind, Direction, Filter, Query, Row, TableStore},
    comment::COMMENT_TABLE,
    game::GAME_TABLE,
    notification::NOTIFICATION_TABLE,
    profile::PROFILE_TABLE,
    review::{REVIEW_CONFLICT_COLUMNS, REVIEW_TABLE},
    storage::{StorageError, StorageResult},
};

use super::{MemoryBackend, Operation};

/// How a table assigns its primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Serial,
    Uuid,
    None,
}

fn key_kind(table: &str) -> KeyKind {
    match table {
        PROFILE_TABLE => KeyKind::Uuid,
        REVIEW_TABLE => KeyKind::None,
        GAME_TABLE | COMMENT_TABLE | NOTIFICATION_TABLE => KeyKind::Serial,
        _ => KeyKind::Serial,
    }
}

fn unique_columns(table: &str) -> &'static [&'static str] {
    match table {
        PROFILE_TABLE => &["auth_user_id"],
        REVIEW_TABLE => REVIEW_CONFLICT_COLUMNS,
        _ => &[],
    }
}

#[derive(Default)]
pub(super) struct TableData {
    rows: Vec<Row>,
    next_id: i64,
}

impl TableData {
    fn fill_defaults(&mut self, table: &str, row: &mut Row) {
        match key_kind(table) {
            KeyKind::Serial if !row.contains_key("id") => {
                self.next_id += 1;
                row.insert("id".into(), Value::from(self.next_id));
            }
            KeyKind::Serial => {
                if let Some(id) = row.get("id").and_then(Value::as_i64) {
                    self.next_id = self.next_id.max(id);
                }
            }
            KeyKind::Uuid if !row.contains_key("id") => {
                row.insert("id".into(), Value::from(Uuid::new_v4().to_string()));
            }
            KeyKind::Uuid | KeyKind::None => {}
        }

        let now = now_rfc3339();
        if !matches!(row.get("created_at"), Some(value) if !value.is_null()) {
            row.insert("created_at".into(), Value::from(now.clone()));
        }
        if table == PROFILE_TABLE {
            row.insert("updated_at".into(), Value::from(now));
        }
    }

    fn position_of_conflict(&self, row: &Row, columns: &[&str]) -> Option<usize> {
        if columns.is_empty() {
            return None;
        }
        self.rows.iter().position(|existing| {
            columns
                .iter()
                .all(|column| existing.get(*column).is_some() && existing.get(*column) == row.get(*column))
        })
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".into())
}

/// Total order over JSON scalars good enough for `order by`: nulls first,
/// then numbers, then strings (RFC 3339 timestamps sort lexically).
fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (left, right) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .unwrap_or_default()
            .total_cmp(&b.as_f64().unwrap_or_default()),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        _ => rank(left).cmp(&rank(right)),
    }
}

fn matches_all(filters: &[Filter], row: &Row) -> bool {
    filters.iter().all(|filter| filter.matches(row))
}

impl MemoryBackend {
    fn publish_row(&self, table: &'static str, kind: ChangeKind, record: Option<Row>, old: Option<Row>) {
        self.publish_change(ChangeEvent {
            table: table.to_string(),
            kind,
            record,
            old_record: old,
        });
    }

    async fn insert_rows(
        &self,
        table: &'static str,
        rows: Vec<Row>,
        on_conflict: Option<&'static [&'static str]>,
    ) -> StorageResult<Vec<Row>> {
        let mut events = Vec::with_capacity(rows.len());
        let stored = {
            let mut tables = self.inner.tables.lock().await;
            let data = tables.entry(table).or_default();
            let unique = unique_columns(table);
            let mut stored = Vec::with_capacity(rows.len());

            for mut row in rows {
                if let Some(columns) = on_conflict {
                    if let Some(index) = data.position_of_conflict(&row, columns) {
                        let old = data.rows[index].clone();
                        let existing = &mut data.rows[index];
                        for (column, value) in row {
                            existing.insert(column, value);
                        }
                        let merged = existing.clone();
                        events.push((ChangeKind::Update, merged.clone(), Some(old)));
                        stored.push(merged);
                        continue;
                    }
                }

                if data.position_of_conflict(&row, unique).is_some() {
                    return Err(StorageError::rejected(format!(
                        "duplicate key value violates unique constraint on {table} ({})",
                        unique.join(", ")
                    )));
                }

                data.fill_defaults(table, &mut row);
                data.rows.push(row.clone());
                events.push((ChangeKind::Insert, row.clone(), None));
                stored.push(row);
            }
            stored
        };

        for (kind, record, old) in events {
            self.publish_row(table, kind, Some(record), old);
        }
        Ok(stored)
    }
}

impl TableStore for MemoryBackend {
    fn select(&self, table: &'static str, query: Query) -> BoxFuture<'static, StorageResult<Vec<Row>>> {
        let backend = self.clone();
        Box::pin(async move {
            backend.enter_storage(Operation::Select, table).await?;
            let tables = backend.inner.tables.lock().await;
            let mut rows: Vec<Row> = tables
                .get(table)
                .map(|data| {
                    data.rows
                        .iter()
                        .filter(|row| matches_all(&query.filters, row))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            drop(tables);

            if let Some(order) = &query.order {
                rows.sort_by(|a, b| {
                    let ordering = compare_values(a.get(order.column), b.get(order.column));
                    match order.direction {
                        Direction::Ascending => ordering,
                        Direction::Descending => ordering.reverse(),
                    }
                });
            }
            if let Some(limit) = query.limit {
                rows.truncate(limit);
            }
            Ok(rows)
        })
    }

    fn insert(&self, table: &'static str, rows: Vec<Row>) -> BoxFuture<'static, StorageResult<Vec<Row>>> {
        let backend = self.clone();
        Box::pin(async move {
            backend.enter_storage(Operation::Insert, table).await?;
            backend.insert_rows(table, rows, None).await
        })
    }

    fn upsert(
        &self,
        table: &'static str,
        rows: Vec<Row>,
        on_conflict: &'static [&'static str],
    ) -> BoxFuture<'static, StorageResult<Vec<Row>>> {
        let backend = self.clone();
        Box::pin(async move {
            backend.enter_storage(Operation::Upsert, table).await?;
            backend.insert_rows(table, rows, Some(on_conflict)).await
        })
    }

    fn update(
        &self,
        table: &'static str,
        patch: Row,
        filters: Vec<Filter>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let backend = self.clone();
        Box::pin(async move {
            backend.enter_storage(Operation::Update, table).await?;
            let mut changed = Vec::new();
            {
                let mut tables = backend.inner.tables.lock().await;
                if let Some(data) = tables.get_mut(table) {
                    for row in data.rows.iter_mut().filter(|row| matches_all(&filters, row)) {
                        let old = row.clone();
                        for (column, value) in &patch {
                            row.insert(column.clone(), value.clone());
                        }
                        changed.push((row.clone(), old));
                    }
                }
            }
            for (record, old) in changed {
                backend.publish_row(table, ChangeKind::Update, Some(record), Some(old));
            }
            Ok(())
        })
    }

    fn delete(&self, table: &'static str, filters: Vec<Filter>) -> BoxFuture<'static, StorageResult<()>> {
        let backend = self.clone();
        Box::pin(async move {
            backend.enter_storage(Operation::Delete, table).await?;
            let removed = {
                let mut tables = backend.inner.tables.lock().await;
                match tables.get_mut(table) {
                    Some(data) => {
                        let (removed, kept) = std::mem::take(&mut data.rows)
                            .into_iter()
                            .partition::<Vec<_>, _>(|row| matches_all(&filters, row));
                        data.rows = kept;
                        removed
                    }
                    None => Vec::new(),
                }
            };
            for old in removed {
                backend.publish_row(table, ChangeKind::Delete, None, Some(old));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::dao::backend::ChangeFeed;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn serial_ids_and_ordering() {
        let backend = MemoryBackend::new();
        backend
            .insert(GAME_TABLE, vec![row(json!({ "name": "b" })), row(json!({ "name": "a" }))])
            .await
            .unwrap();

        let rows = backend
            .select(GAME_TABLE, Query::new().order_by("name", Direction::Ascending))
            .await
            .unwrap();
        assert_eq!(rows[0]["name"], json!("a"));
        assert_eq!(rows[0]["id"], json!(2));
        assert_eq!(rows[1]["id"], json!(1));

        let rows = backend
            .select(
                GAME_TABLE,
                Query::new().order_by("id", Direction::Descending).limit(1),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(2));
    }

    #[tokio::test]
    async fn upsert_replaces_on_conflict() {
        let backend = MemoryBackend::new();
        let first = row(json!({ "user_id": "u", "game_id": 1, "rating": 3 }));
        let second = row(json!({ "user_id": "u", "game_id": 1, "rating": 5, "comment": "great" }));

        backend.upsert(REVIEW_TABLE, vec![first], REVIEW_CONFLICT_COLUMNS).await.unwrap();
        backend.upsert(REVIEW_TABLE, vec![second], REVIEW_CONFLICT_COLUMNS).await.unwrap();

        let rows = backend.select(REVIEW_TABLE, Query::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["rating"], json!(5));
        assert_eq!(rows[0]["comment"], json!("great"));
    }

    #[tokio::test]
    async fn plain_insert_respects_unique_constraint() {
        let backend = MemoryBackend::new();
        let review = row(json!({ "user_id": "u", "game_id": 1, "rating": 3 }));
        backend.insert(REVIEW_TABLE, vec![review.clone()]).await.unwrap();
        let err = backend.insert(REVIEW_TABLE, vec![review]).await.unwrap_err();
        assert!(matches!(err, StorageError::Rejected { .. }));
    }

    #[tokio::test]
    async fn writes_publish_change_events() {
        let backend = MemoryBackend::new();
        let mut feed = ChangeFeed::subscribe(&backend, GAME_TABLE).await.unwrap();

        backend.insert(GAME_TABLE, vec![row(json!({ "name": "x" }))]).await.unwrap();
        backend
            .update(GAME_TABLE, row(json!({ "name": "y" })), vec![Filter::eq("id", 1)])
            .await
            .unwrap();
        backend.delete(GAME_TABLE, vec![Filter::eq("id", 1)]).await.unwrap();

        let insert = feed.next().await.unwrap();
        assert_eq!(insert.kind, ChangeKind::Insert);
        let update = feed.next().await.unwrap();
        assert_eq!(update.kind, ChangeKind::Update);
        assert_eq!(update.record.unwrap()["name"], json!("y"));
        let delete = feed.next().await.unwrap();
        assert_eq!(delete.kind, ChangeKind::Delete);
        assert_eq!(delete.old_record.unwrap()["id"], json!(1));
    }
}
