//! Optimistic concurrency for section edits.
//!
//! Every section read hands out a version token; saves carry it in `If-Match`
//! and the server rejects stale tokens with 409. A rejected save leaves the
//! session in [`EditState::Conflict`] until the caller reloads. Saves are
//! never queued offline and never retried or merged here.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;

use crate::api_client::{ManualsApi, SaveResponse, SectionSnapshot};
use crate::error::SaveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    Clean,
    Dirty,
    Saving,
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved {
        etag: String,
    },
    Conflict {
        current_etag: String,
        provided_etag: String,
    },
}

/// Notified after a save is accepted, e.g. to move a workflow forward.
#[async_trait]
pub trait ContentChangeObserver: Send + Sync {
    async fn content_saved(&self, block_id: &str, etag: &str);
}

/// Local editing state for one section.
#[derive(Debug, Clone)]
pub struct EditSession {
    block_id: String,
    token: String,
    content: String,
    pending: Option<String>,
    state: EditState,
}

impl EditSession {
    pub fn new(block_id: impl Into<String>, snapshot: SectionSnapshot) -> Self {
        Self {
            block_id: block_id.into(),
            token: snapshot.etag,
            content: snapshot.content,
            pending: None,
            state: EditState::Clean,
        }
    }

    pub fn block_id(&self) -> &str {
        &self.block_id
    }

    /// Version token the next save will send.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Content as last confirmed by the server.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    pub fn state(&self) -> EditState {
        self.state
    }

    /// Records a local change. A session in conflict keeps the text but stays
    /// in conflict.
    pub fn edit(&mut self, content: impl Into<String>) {
        self.pending = Some(content.into());
        if self.state != EditState::Conflict {
            self.state = EditState::Dirty;
        }
    }
}

pub struct ConcurrencyController {
    api: ManualsApi,
    observer: Option<Arc<dyn ContentChangeObserver>>,
}

impl ConcurrencyController {
    pub fn new(api: ManualsApi) -> Self {
        Self { api, observer: None }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ContentChangeObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Reads the section and starts a clean session on its current token.
    pub async fn open(&self, block_id: &str) -> Result<EditSession, SaveError> {
        let snapshot = self.api.read_section(block_id).await?;
        debug!("Opened section {} at {}", block_id, snapshot.etag);
        Ok(EditSession::new(block_id, snapshot))
    }

    /// Sends the pending change guarded by the session token.
    ///
    /// Conflicts are an `Ok` outcome; `Err` means the save did not reach a
    /// decision and the edit is kept as dirty.
    pub async fn save(&self, session: &mut EditSession) -> Result<SaveOutcome, SaveError> {
        if session.state == EditState::Conflict {
            return Err(SaveError::ConflictPending);
        }
        let Some(content) = session.pending.clone() else {
            return Err(SaveError::NotDirty);
        };

        session.state = EditState::Saving;
        let result = self
            .api
            .save_section(&session.block_id, &content, &session.token)
            .await;

        match result {
            Ok(SaveResponse::Saved { etag }) => {
                info!("Saved section {} ({} -> {})", session.block_id, session.token, etag);
                session.token = etag.clone();
                session.content = content;
                session.pending = None;
                session.state = EditState::Clean;
                if let Some(observer) = &self.observer {
                    observer.content_saved(&session.block_id, &etag).await;
                }
                Ok(SaveOutcome::Saved { etag })
            }
            Ok(SaveResponse::Conflict(body)) => {
                warn!(
                    "Section {} changed on the server: provided {}, current {}",
                    session.block_id, body.provided_etag, body.current_etag
                );
                session.state = EditState::Conflict;
                Ok(SaveOutcome::Conflict {
                    current_etag: body.current_etag,
                    provided_etag: body.provided_etag,
                })
            }
            Err(e) => {
                warn!("Save of section {} failed: {}", session.block_id, e);
                session.state = EditState::Dirty;
                Err(e)
            }
        }
    }

    /// Replaces the session with the server's current content and token.
    ///
    /// Returns the local change that was discarded, if any.
    pub async fn reload(&self, session: &mut EditSession) -> Result<Option<String>, SaveError> {
        let snapshot = self.api.read_section(&session.block_id).await?;
        session.token = snapshot.etag;
        session.content = snapshot.content;
        session.state = EditState::Clean;
        Ok(session.pending.take())
    }
}
