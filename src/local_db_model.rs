//! Record types persisted by the local store.
//!
//! Field names on the wire and on disk (`synced`, `syncedAt`, `attempts`,
//! `expiresAt`, `checksum`, ...) are part of the client contract and must not be
//! renamed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Number of hex characters kept from the bundle digest.
const CHECKSUM_HEX_LEN: usize = 16;

/// A complete offline rendering of one manual version.
///
/// One record exists per `(manual_id, version)`. A refresh overwrites the whole
/// record; it is never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualBundle {
    pub manual_id: String,
    pub version: String,
    pub bundle_data: JsonValue,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub checksum: String,
}

impl ManualBundle {
    pub fn new(
        manual_id: impl Into<String>,
        version: impl Into<String>,
        bundle_data: JsonValue,
        cached_at: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        let checksum = bundle_checksum(&bundle_data);
        Self {
            manual_id: manual_id.into(),
            version: version.into(),
            bundle_data,
            cached_at,
            expires_at: cached_at + ttl,
            checksum,
        }
    }

    /// Usable only strictly before `expires_at`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Short, stable digest of a bundle payload.
///
/// `serde_json` writes object keys in sorted order, so equal payloads always
/// hash the same regardless of how they were built.
pub fn bundle_checksum(bundle_data: &JsonValue) -> String {
    let canonical = bundle_data.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(CHECKSUM_HEX_LEN);
    encoded
}

/// Which bundle version a lookup refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionSelector {
    /// The most recently cached version of the manual.
    Latest,
    Exact(String),
}

impl VersionSelector {
    pub fn parse(raw: &str) -> Self {
        if raw == "latest" {
            VersionSelector::Latest
        } else {
            VersionSelector::Exact(raw.to_string())
        }
    }
}

impl From<&str> for VersionSelector {
    fn from(raw: &str) -> Self {
        VersionSelector::parse(raw)
    }
}

/// A user-authored highlight, note or comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    /// Client-generated UUIDv7 (millisecond timestamp + random bits).
    pub id: String,
    pub manual_id: String,
    pub payload: JsonValue,
    pub synced: bool,
    pub synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Annotation {
    pub fn new(manual_id: impl Into<String>, payload: JsonValue, created_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            manual_id: manual_id.into(),
            payload,
            synced: false,
            synced_at: None,
            created_at,
        }
    }
}

/// Per-user, per-manual reading progress. Last write wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingSession {
    pub manual_id: String,
    pub user_id: String,
    pub payload: JsonValue,
    pub last_accessed_at: DateTime<Utc>,
    pub synced: bool,
    /// Local write counter; a sync only confirms the revision it uploaded.
    #[serde(default)]
    pub revision: u64,
}

/// Closed set of deferred side effects the server knows how to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    SuggestEdit,
    Annotation,
    Acknowledge,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SuggestEdit => "SUGGEST_EDIT",
            ActionType::Annotation => "ANNOTATION",
            ActionType::Acknowledge => "ACKNOWLEDGE",
        }
    }

    /// The one endpoint each action type is dispatched to.
    pub fn endpoint(&self) -> &'static str {
        match self {
            ActionType::SuggestEdit => "/suggestions",
            ActionType::Annotation => "/annotations",
            ActionType::Acknowledge => "/acknowledgements",
        }
    }
}

impl Display for ActionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "SUGGEST_EDIT" => Ok(ActionType::SuggestEdit),
            "ANNOTATION" => Ok(ActionType::Annotation),
            "ACKNOWLEDGE" => Ok(ActionType::Acknowledge),
            other => Err(other.to_string()),
        }
    }
}

/// A deferred operation waiting for connectivity.
///
/// `action_type` is kept as the raw discriminator so that records written by a
/// newer client still load; unknown values fail at dispatch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAction {
    pub id: u64,
    #[serde(rename = "type")]
    pub action_type: String,
    pub data: JsonValue,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
}

/// Collections that carry a `synced` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncCollection {
    Annotations,
    Sessions,
}

/// Key of a record in one of the synced collections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SyncKey {
    Annotation(String),
    /// `revision` is the session revision that was uploaded.
    Session {
        manual_id: String,
        user_id: String,
        revision: u64,
    },
}

impl SyncKey {
    pub fn collection(&self) -> SyncCollection {
        match self {
            SyncKey::Annotation(_) => SyncCollection::Annotations,
            SyncKey::Session { .. } => SyncCollection::Sessions,
        }
    }
}

/// An unsynced record returned by a generic collection listing.
#[derive(Debug, Clone, PartialEq)]
pub enum UnsyncedRecord {
    Annotation(Annotation),
    Session(ReadingSession),
}

/// Aggregate cache figures for UI surfaces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub cached_manuals: usize,
    pub total_cached_bytes: u64,
    pub annotation_count: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
}
