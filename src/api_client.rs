//! Typed calls against the manuals server.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{SaveError, SyncItemError, TransportError};
use crate::local_db_model::{ActionType, Annotation, QueuedAction, ReadingSession};
use crate::transport::{send_with_timeout, HttpRequest, HttpResponse, Transport};

/// Current content of a document section and its version token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSnapshot {
    pub content: String,
    pub etag: String,
}

#[derive(Debug, Deserialize)]
struct SaveAccepted {
    etag: String,
}

/// Body of a 409 response to a section save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictBody {
    pub current_etag: String,
    pub provided_etag: String,
}

/// Server answer to a conditional section save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveResponse {
    Saved { etag: String },
    Conflict(ConflictBody),
}

#[derive(Clone)]
pub struct ManualsApi {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl ManualsApi {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        send_with_timeout(self.transport.as_ref(), request, self.timeout).await
    }

    async fn post_for_sync(&self, path: String, body: JsonValue) -> Result<(), SyncItemError> {
        let response = self.send(HttpRequest::post(path, body)).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(SyncItemError::api(response.status, response.text()))
        }
    }

    /// `GET /bundles/{manualId}/{version}`
    pub async fn fetch_bundle(&self, manual_id: &str, version: &str) -> Result<JsonValue, SyncItemError> {
        let response = self
            .send(HttpRequest::get(format!("/bundles/{manual_id}/{version}")))
            .await?;
        if !response.is_success() {
            return Err(SyncItemError::api(response.status, response.text()));
        }
        response
            .json_body()
            .map_err(|e| SyncItemError::api(response.status, format!("Failed to parse bundle: {e}")))
    }

    /// `POST /manuals/{manualId}/annotations`
    ///
    /// The annotation id travels with the payload so the server can upsert.
    pub async fn upload_annotation(&self, annotation: &Annotation) -> Result<(), SyncItemError> {
        let body = with_field(annotation.payload.clone(), "id", json!(annotation.id));
        self.post_for_sync(format!("/manuals/{}/annotations", annotation.manual_id), body)
            .await
    }

    /// `POST /manuals/{manualId}/session`
    pub async fn upload_session(&self, session: &ReadingSession) -> Result<(), SyncItemError> {
        let body = with_field(session.payload.clone(), "userId", json!(session.user_id));
        let body = with_field(body, "lastAccessedAt", json!(session.last_accessed_at));
        self.post_for_sync(format!("/manuals/{}/session", session.manual_id), body)
            .await
    }

    /// Dispatches a queued action to its fixed endpoint.
    ///
    /// Unknown types fail before any request is made.
    pub async fn dispatch_action(&self, action: &QueuedAction) -> Result<(), SyncItemError> {
        let action_type: ActionType = action
            .action_type
            .parse()
            .map_err(SyncItemError::UnknownAction)?;
        self.post_for_sync(action_type.endpoint().to_string(), action.data.clone())
            .await
    }

    /// `GET /manuals/blocks/{blockId}/content`
    pub async fn read_section(&self, block_id: &str) -> Result<SectionSnapshot, SaveError> {
        let response = self
            .send(HttpRequest::get(format!("/manuals/blocks/{block_id}/content")))
            .await?;
        if !response.is_success() {
            return Err(SaveError::api(response.status, response.text()));
        }
        response
            .json_body()
            .map_err(|e| SaveError::Malformed(format!("section read: {e}")))
    }

    /// `PATCH /manuals/blocks/{blockId}/content` with `If-Match`.
    pub async fn save_section(
        &self,
        block_id: &str,
        content: &str,
        etag: &str,
    ) -> Result<SaveResponse, SaveError> {
        let request = HttpRequest::patch(
            format!("/manuals/blocks/{block_id}/content"),
            json!({ "content": content }),
        )
        .with_header("If-Match", etag);

        let response = self.send(request).await?;
        match response.status {
            200..=299 => {
                let accepted: SaveAccepted = response
                    .json_body()
                    .map_err(|e| SaveError::Malformed(format!("save response: {e}")))?;
                Ok(SaveResponse::Saved {
                    etag: accepted.etag,
                })
            }
            409 | 412 => {
                let conflict = response.json_body().unwrap_or_else(|_| ConflictBody {
                    current_etag: String::new(),
                    provided_etag: etag.to_string(),
                });
                Ok(SaveResponse::Conflict(conflict))
            }
            status => Err(SaveError::api(status, response.text())),
        }
    }
}

/// Adds `key` to an object payload unless already present; other payloads are
/// wrapped as `{ "data": payload, key: value }`.
fn with_field(payload: JsonValue, key: &str, value: JsonValue) -> JsonValue {
    match payload {
        JsonValue::Object(mut map) => {
            map.entry(key.to_string()).or_insert(value);
            JsonValue::Object(map)
        }
        other => {
            let mut map = serde_json::Map::new();
            map.insert("data".to_string(), other);
            map.insert(key.to_string(), value);
            JsonValue::Object(map)
        }
    }
}
