//! Engine configuration.
//!
//! Every field has a default, so a config file only needs to name what it
//! overrides:
//!
//! ```json
//! {
//!   "base_url": "https://manuals.example.com",
//!   "store_path": "/var/lib/manuals/cache",
//!   "router": { "static_assets": ["/", "/app.js", "/app.css"] }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::app_response::AppResponse;

/// Bundles stay usable for 24 hours after they are cached.
pub const DEFAULT_BUNDLE_TTL_SECS: i64 = 60 * 60 * 24;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_MAP_SIZE_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Server origin, e.g. `https://manuals.example.com`.
    pub base_url: String,
    /// Store name; the LMDB environment lives in `<store_path>.lmdb`.
    pub store_path: String,
    /// Upper bound for a single network request.
    pub request_timeout_ms: u64,
    pub bundle_ttl_secs: i64,
    pub map_size_bytes: usize,
    pub router: RouterConfig,
    pub sync: SyncConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            store_path: "offline_manuals".to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            bundle_ttl_secs: DEFAULT_BUNDLE_TTL_SECS,
            map_size_bytes: DEFAULT_MAP_SIZE_BYTES,
            router: RouterConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads a config from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppResponse> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppResponse::BadRequest(format!("Cannot read config {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, AppResponse> {
        let config: EngineConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppResponse> {
        if self.base_url.trim().is_empty() {
            return Err(AppResponse::ValidationError("base_url must not be empty".into()));
        }
        if self.store_path.trim().is_empty() {
            return Err(AppResponse::ValidationError("store_path must not be empty".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(AppResponse::ValidationError(
                "request_timeout_ms must be positive".into(),
            ));
        }
        if self.bundle_ttl_secs <= 0 {
            return Err(AppResponse::ValidationError(
                "bundle_ttl_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn bundle_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.bundle_ttl_secs)
    }
}

/// Request classification rules for the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub api_prefix: String,
    pub document_prefixes: Vec<String>,
    /// Exact paths served cache-first.
    pub static_assets: Vec<String>,
    /// Bound on how long a routed request may wait on the network.
    pub network_timeout_ms: u64,
    /// Request queue depth between UI surfaces and the router task.
    pub channel_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            api_prefix: "/api/".to_string(),
            document_prefixes: vec!["/manuals/".to_string(), "/reader/".to_string()],
            static_assets: vec![
                "/".to_string(),
                "/offline".to_string(),
                "/manifest.json".to_string(),
                "/favicon.ico".to_string(),
            ],
            network_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            channel_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval for the built-in scheduled trigger; `None` disables it.
    pub interval_secs: Option<u64>,
    /// Attempt count past which a still-failing action is logged loudly.
    pub attempts_warn_threshold: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: Some(300),
            attempts_warn_threshold: 10,
        }
    }
}
