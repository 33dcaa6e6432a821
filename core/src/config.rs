use crate::types::Millis;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const BACKEND_URL_ENV: &str = "TAPCOIN_BACKEND_URL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub backend_url: String,
    /// Cadence of POST /player/sync, independent of the frame loop.
    pub sync_interval_ms: Millis,
    /// Cadence of the authoritative re-fetch that drives reconciliation.
    pub refresh_interval_ms: Millis,
    /// Window of the clicks-per-second meter.
    pub click_window_ms: Millis,
    /// How long a notice stays up. 0 keeps it until replaced.
    pub notice_ttl_ms: Millis,
    pub request_timeout_ms: u64,
    pub frame_interval_ms: u64,
    /// SQLite file for the event log and display cache. None = no cache.
    pub cache_path: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: "https://si-backend-2i9b.onrender.com".into(),
            sync_interval_ms: 5_000,
            refresh_interval_ms: 30_000,
            click_window_ms: 1_000,
            notice_ttl_ms: 4_000,
            request_timeout_ms: 10_000,
            frame_interval_ms: 16,
            cache_path: None,
        }
    }
}

impl ClientConfig {
    /// Load from a JSON file. Missing fields take their defaults;
    /// TAPCOIN_BACKEND_URL, when set, overrides `backend_url`.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: ClientConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config {path}: {e}"))?;
        Ok(config.with_env_overrides())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            if !url.trim().is_empty() {
                self.backend_url = url.trim().to_string();
            }
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}
