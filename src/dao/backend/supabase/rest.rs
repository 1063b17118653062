use futures::future::BoxFuture;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::dao::{
    backend::{Direction, Filter, Query, Row, TableStore},
    storage::StorageResult,
};

use super::client::SupabaseClient;

const REST_PREFIX: &str = "rest/v1";
const RETURN_REPRESENTATION: &str = "return=representation";
const MERGE_DUPLICATES: &str = "resolution=merge-duplicates,return=representation";

fn table_path(table: &str) -> String {
    format!("{REST_PREFIX}/{table}")
}

/// Literal of a scalar inside a filter expression.
fn literal(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Quoted literal inside an `in.(...)` list.
fn list_literal(value: &Value) -> String {
    match value {
        Value::String(text) => format!("\"{}\"", text.replace('"', "\\\"")),
        other => other.to_string(),
    }
}

/// Encode a filter as a `(column, operator.value)` query pair.
fn filter_param(filter: &Filter) -> (String, String) {
    match filter {
        Filter::Eq(column, Value::Null) => (column.to_string(), "is.null".to_string()),
        Filter::Eq(column, value) => (column.to_string(), format!("eq.{}", literal(value))),
        Filter::In(column, values) => {
            let items = values.iter().map(list_literal).collect::<Vec<_>>().join(",");
            (column.to_string(), format!("in.({items})"))
        }
    }
}

fn select_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    params.extend(query.filters.iter().map(filter_param));
    if let Some(order) = &query.order {
        let direction = match order.direction {
            Direction::Ascending => "asc",
            Direction::Descending => "desc",
        };
        params.push(("order".to_string(), format!("{}.{direction}", order.column)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

impl TableStore for SupabaseClient {
    fn select(&self, table: &'static str, query: Query) -> BoxFuture<'static, StorageResult<Vec<Row>>> {
        let client = self.clone();
        Box::pin(async move {
            let path = table_path(table);
            let builder = client
                .request(Method::GET, &path)
                .await
                .query(&select_params(&query));
            let rows: Vec<Row> = client.send_json(builder, &path).await?;
            debug!(table, count = rows.len(), "selected rows");
            Ok(rows)
        })
    }

    fn insert(&self, table: &'static str, rows: Vec<Row>) -> BoxFuture<'static, StorageResult<Vec<Row>>> {
        let client = self.clone();
        Box::pin(async move {
            let path = table_path(table);
            let builder = client
                .request(Method::POST, &path)
                .await
                .header("Prefer", RETURN_REPRESENTATION)
                .json(&rows);
            Ok(client.send_json(builder, &path).await?)
        })
    }

    fn upsert(
        &self,
        table: &'static str,
        rows: Vec<Row>,
        on_conflict: &'static [&'static str],
    ) -> BoxFuture<'static, StorageResult<Vec<Row>>> {
        let client = self.clone();
        Box::pin(async move {
            let path = table_path(table);
            let mut builder = client
                .request(Method::POST, &path)
                .await
                .header("Prefer", MERGE_DUPLICATES);
            if !on_conflict.is_empty() {
                builder = builder.query(&[("on_conflict", on_conflict.join(","))]);
            }
            Ok(client.send_json(builder.json(&rows), &path).await?)
        })
    }

    fn update(
        &self,
        table: &'static str,
        patch: Row,
        filters: Vec<Filter>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let client = self.clone();
        Box::pin(async move {
            let path = table_path(table);
            let params: Vec<_> = filters.iter().map(filter_param).collect();
            let builder = client
                .request(Method::PATCH, &path)
                .await
                .query(&params)
                .json(&patch);
            client.send(builder, &path).await?;
            Ok(())
        })
    }

    fn delete(&self, table: &'static str, filters: Vec<Filter>) -> BoxFuture<'static, StorageResult<()>> {
        let client = self.clone();
        Box::pin(async move {
            let path = table_path(table);
            let params: Vec<_> = filters.iter().map(filter_param).collect();
            let builder = client.request(Method::DELETE, &path).await.query(&params);
            client.send(builder, &path).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{backend::supabase::SupabaseConfig, storage::StorageError};
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, header, headers, method, path, query_param},
    };

    fn client_for(server: &MockServer) -> SupabaseClient {
        SupabaseClient::connect(SupabaseConfig::new(server.uri(), "anon-key").unwrap()).unwrap()
    }

    #[test]
    fn encodes_filters() {
        assert_eq!(
            filter_param(&Filter::eq("game_id", 7)),
            ("game_id".to_string(), "eq.7".to_string())
        );
        assert_eq!(
            filter_param(&Filter::any_of("auth_user_id", ["a", "b"])),
            ("auth_user_id".to_string(), "in.(\"a\",\"b\")".to_string())
        );
        assert_eq!(
            filter_param(&Filter::eq("parent_id", Value::Null)),
            ("parent_id".to_string(), "is.null".to_string())
        );
    }

    #[tokio::test]
    async fn select_sends_filters_order_and_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/notifications"))
            .and(query_param("select", "*"))
            .and(query_param("user_id", "eq.abc"))
            .and(query_param("order", "created_at.desc"))
            .and(query_param("limit", "20"))
            .and(header("apikey", "anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
            .mount(&server)
            .await;

        let rows = client_for(&server)
            .select(
                "notifications",
                Query::new()
                    .filter(Filter::eq("user_id", "abc"))
                    .order_by("created_at", Direction::Descending)
                    .limit(20),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn upsert_merges_on_conflict_columns() {
        let server = MockServer::start().await;
        let row = json!({ "user_id": "u", "game_id": 3, "rating": 4 });
        Mock::given(method("POST"))
            .and(path("/rest/v1/reviews"))
            .and(query_param("on_conflict", "user_id,game_id"))
            .and(headers(
                "Prefer",
                vec!["resolution=merge-duplicates", "return=representation"],
            ))
            .and(body_json(json!([row.clone()])))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([row.clone()])))
            .mount(&server)
            .await;

        let stored = client_for(&server)
            .upsert(
                "reviews",
                vec![row.as_object().cloned().unwrap()],
                &["user_id", "game_id"],
            )
            .await
            .unwrap();
        assert_eq!(stored[0]["rating"], 4);
    }

    #[tokio::test]
    async fn client_errors_become_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/games"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "message": "permission denied for table games"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .delete("games", vec![Filter::eq("id", 1)])
            .await
            .unwrap_err();
        assert!(
            matches!(err, StorageError::Rejected { message } if message.contains("permission denied"))
        );
    }
}
