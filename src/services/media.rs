//! Object-store paths and uploads for game images.

use std::sync::Arc;

use tracing::debug;
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

use crate::dao::{
    backend::{ObjectStore, UploadOptions},
    models::GameId,
    storage::StorageResult,
};

const MAX_SEGMENT_LEN: usize = 240;

/// Make one path segment safe for the object store: diacritics stripped,
/// whitespace runs turned into `_`, anything outside `[A-Za-z0-9._-]` removed,
/// and the result capped at 240 characters.
pub fn sanitize_file_name(name: &str) -> String {
    let stripped: String = name.nfkd().filter(|c| !is_combining_mark(*c)).collect();

    let mut underscored = String::with_capacity(stripped.len());
    let mut in_whitespace = false;
    for c in stripped.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                underscored.push('_');
            }
            in_whitespace = true;
        } else {
            underscored.push(c);
            in_whitespace = false;
        }
    }

    underscored
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .take(MAX_SEGMENT_LEN)
        .collect()
}

/// Sanitize every `/`-separated segment of `path`.
pub fn sanitize_path(path: &str) -> String {
    path.split('/')
        .map(sanitize_file_name)
        .collect::<Vec<_>>()
        .join("/")
}

/// Collision-resistant object path for an image of `game_id`: `gameId/timestamp_filename`.
pub fn image_path(game_id: GameId, timestamp_millis: i128, file_name: &str) -> String {
    sanitize_path(&format!("{game_id}/{timestamp_millis}_{file_name}"))
}

/// Object store bound to the configured bucket.
#[derive(Clone)]
pub struct MediaStore {
    objects: Arc<dyn ObjectStore>,
    bucket: String,
}

impl MediaStore {
    /// Store writing to `bucket`.
    pub fn new(objects: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            objects,
            bucket: bucket.into(),
        }
    }

    /// Upload under the sanitized form of `path` and return the stored path.
    pub async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        options: UploadOptions,
    ) -> StorageResult<String> {
        let safe_path = sanitize_path(path);
        debug!(bucket = %self.bucket, path = %safe_path, size = bytes.len(), "uploading object");
        self.objects
            .upload(&self.bucket, &safe_path, bytes, options)
            .await
    }

    /// Public URL of a stored path.
    pub fn public_url(&self, path: &str) -> String {
        self.objects.public_url(&self.bucket, path)
    }
}
