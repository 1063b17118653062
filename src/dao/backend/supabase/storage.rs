use futures::future::BoxFuture;
use reqwest::{Method, header};
use tracing::debug;

use crate::dao::{
    backend::{ObjectStore, UploadOptions},
    storage::StorageResult,
};

use super::client::SupabaseClient;

const OBJECT_PREFIX: &str = "storage/v1/object";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

fn object_path(bucket: &str, path: &str) -> String {
    format!("{OBJECT_PREFIX}/{bucket}/{}", path.trim_start_matches('/'))
}

impl ObjectStore for SupabaseClient {
    fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        options: UploadOptions,
    ) -> BoxFuture<'static, StorageResult<String>> {
        let client = self.clone();
        let stored_path = path.trim_start_matches('/').to_string();
        let endpoint = object_path(bucket, &stored_path);
        Box::pin(async move {
            let content_type = options
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
            let size = bytes.len();
            let builder = client
                .request(Method::POST, &endpoint)
                .await
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CACHE_CONTROL, format!("max-age={}", options.cache_control))
                .header("x-upsert", options.upsert.to_string())
                .body(bytes);
            client.send(builder, &endpoint).await?;
            debug!(path = %stored_path, size, "uploaded object");
            Ok(stored_path)
        })
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.endpoint(&format!(
            "{OBJECT_PREFIX}/public/{bucket}/{}",
            path.trim_start_matches('/')
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{backend::supabase::SupabaseConfig, storage::StorageError};
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_bytes, header as header_is, method, path},
    };

    fn client_for(server: &MockServer) -> SupabaseClient {
        SupabaseClient::connect(SupabaseConfig::new(server.uri(), "anon-key").unwrap()).unwrap()
    }

    #[tokio::test]
    async fn upload_forwards_options() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/avatars/12/1700_cover.png"))
            .and(header_is("content-type", "image/png"))
            .and(header_is("cache-control", "max-age=3600"))
            .and(header_is("x-upsert", "false"))
            .and(body_bytes(vec![1u8, 2, 3]))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Key": "avatars/12/1700_cover.png"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let stored = client
            .upload(
                "avatars",
                "12/1700_cover.png",
                vec![1, 2, 3],
                UploadOptions {
                    content_type: Some("image/png".into()),
                    ..UploadOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(stored, "12/1700_cover.png");
        assert_eq!(
            client.public_url("avatars", &stored),
            format!("{}/storage/v1/object/public/avatars/12/1700_cover.png", server.uri())
        );
    }

    #[tokio::test]
    async fn duplicate_object_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "statusCode": "409",
                "error": "Duplicate",
                "message": "The resource already exists"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .upload("avatars", "a.png", vec![0], UploadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Rejected { message } if message == "The resource already exists"));
    }
}
