use std::time::Duration;

use super::error::{SupabaseError, SupabaseResult};

const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(25);

/// Runtime configuration describing how to reach the hosted backend.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project URL without a trailing slash.
    pub url: String,
    /// Anonymous API key.
    pub api_key: String,
    /// Interval between realtime heartbeats.
    pub heartbeat: Duration,
}

impl SupabaseConfig {
    /// Construct a configuration from an explicit endpoint and API key.
    ///
    /// Both values are mandatory: an empty endpoint or key is rejected rather
    /// than replaced by a default.
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> SupabaseResult<Self> {
        let url = url.into().trim().trim_end_matches('/').to_string();
        let api_key = api_key.into().trim().to_string();

        if url.is_empty() {
            return Err(SupabaseError::InvalidConfig {
                reason: "backend URL is empty",
            });
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SupabaseError::InvalidConfig {
                reason: "backend URL must start with http:// or https://",
            });
        }
        if api_key.is_empty() {
            return Err(SupabaseError::InvalidConfig {
                reason: "backend API key is empty",
            });
        }

        Ok(Self {
            url,
            api_key,
            heartbeat: DEFAULT_HEARTBEAT,
        })
    }

    /// Override the realtime heartbeat interval.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Websocket endpoint of the realtime service.
    pub fn realtime_url(&self) -> String {
        let ws_base = if let Some(rest) = self.url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.url.clone()
        };
        format!(
            "{ws_base}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.api_key
        )
    }
}
