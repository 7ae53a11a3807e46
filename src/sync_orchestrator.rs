//! Drains locally queued records to the server.
//!
//! A pass pushes, in order, unsynced annotations, unsynced reading sessions and
//! queued actions. Items are independent: one failure never stops the rest of
//! the pass. Only one pass runs at a time and triggers that arrive meanwhile
//! are dropped; the next natural trigger catches up.

use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Interval;

use crate::api_client::ManualsApi;
use crate::config::SyncConfig;
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::error::RetryClass;
use crate::local_db_model::SyncKey;
use crate::local_db_state::LocalStore;

const TRIGGER_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    ConnectivityRestored,
    Scheduled,
    Manual,
}

/// Outcome of one pass. Returned even when nothing could be pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    /// True when the trigger was dropped because a pass was already running.
    pub skipped: bool,
    pub annotations_synced: usize,
    pub annotations_failed: usize,
    pub sessions_synced: usize,
    pub sessions_failed: usize,
    pub actions_dispatched: usize,
    pub actions_failed: usize,
    pub duration_ms: u64,
}

impl SyncReport {
    fn new(trigger: SyncTrigger) -> Self {
        Self {
            trigger,
            skipped: false,
            annotations_synced: 0,
            annotations_failed: 0,
            sessions_synced: 0,
            sessions_failed: 0,
            actions_dispatched: 0,
            actions_failed: 0,
            duration_ms: 0,
        }
    }

    fn skipped(trigger: SyncTrigger) -> Self {
        Self {
            skipped: true,
            ..Self::new(trigger)
        }
    }

    pub fn pushed(&self) -> usize {
        self.annotations_synced + self.sessions_synced + self.actions_dispatched
    }

    pub fn failed(&self) -> usize {
        self.annotations_failed + self.sessions_failed + self.actions_failed
    }
}

pub struct SyncOrchestrator {
    store: LocalStore,
    api: ManualsApi,
    config: SyncConfig,
    pass_lock: Mutex<()>,
}

impl SyncOrchestrator {
    pub fn new(store: LocalStore, api: ManualsApi, config: SyncConfig) -> Self {
        Self {
            store,
            api,
            config,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.pass_lock.try_lock().is_err()
    }

    /// Runs a pass now. Always resolves; failures only show up in the report.
    pub async fn force_sync(&self) -> SyncReport {
        self.run_pass(SyncTrigger::Manual).await
    }

    pub async fn run_pass(&self, trigger: SyncTrigger) -> SyncReport {
        let Ok(_guard) = self.pass_lock.try_lock() else {
            debug!("Sync pass already running; dropping {:?} trigger", trigger);
            return SyncReport::skipped(trigger);
        };

        let started_at = Instant::now();
        let mut report = SyncReport::new(trigger);

        self.push_annotations(&mut report).await;
        self.push_sessions(&mut report).await;
        self.push_actions(&mut report).await;

        report.duration_ms = started_at.elapsed().as_millis() as u64;

        if report.pushed() > 0 {
            if let Err(e) = self.store.record_sync_completed(self.store.now()).await {
                warn!("Failed to record sync time: {e}");
            }
        }

        info!(
            "Sync pass ({:?}) complete: pushed={} failed={} duration_ms={}",
            trigger,
            report.pushed(),
            report.failed(),
            report.duration_ms
        );
        report
    }

    async fn push_annotations(&self, report: &mut SyncReport) {
        let pending = match self.store.list_unsynced_annotations().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Could not list unsynced annotations: {e}");
                return;
            }
        };

        for annotation in pending {
            if let Err(e) = self.api.upload_annotation(&annotation).await {
                warn!("Annotation {} upload failed: {}", annotation.id, e);
                report.annotations_failed += 1;
                continue;
            }
            match self.store.mark_synced(SyncKey::Annotation(annotation.id.clone())).await {
                Ok(_) => report.annotations_synced += 1,
                Err(e) => {
                    warn!("Annotation {} uploaded but not marked synced: {}", annotation.id, e);
                    report.annotations_failed += 1;
                }
            }
        }
    }

    async fn push_sessions(&self, report: &mut SyncReport) {
        let pending = match self.store.list_unsynced_sessions().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Could not list unsynced reading sessions: {e}");
                return;
            }
        };

        for session in pending {
            let label = format!("{}/{}", session.manual_id, session.user_id);
            if let Err(e) = self.api.upload_session(&session).await {
                warn!("Reading session {} upload failed: {}", label, e);
                report.sessions_failed += 1;
                continue;
            }
            let key = SyncKey::Session {
                manual_id: session.manual_id,
                user_id: session.user_id,
                revision: session.revision,
            };
            match self.store.mark_synced(key).await {
                Ok(true) => report.sessions_synced += 1,
                Ok(false) => {
                    // Rewritten while uploading; the newer revision goes next pass.
                    debug!("Reading session {} changed during upload; left pending", label);
                    report.sessions_synced += 1;
                }
                Err(e) => {
                    warn!("Reading session {} uploaded but not marked synced: {}", label, e);
                    report.sessions_failed += 1;
                }
            }
        }
    }

    async fn push_actions(&self, report: &mut SyncReport) {
        let queued = match self.store.list_actions().await {
            Ok(queued) => queued,
            Err(e) => {
                warn!("Could not list queued actions: {e}");
                return;
            }
        };

        for action in queued {
            match self.api.dispatch_action(&action).await {
                Ok(()) => {
                    if let Err(e) = self.store.dequeue_action(action.id).await {
                        // Stays queued and will be sent again: delivery is at-least-once.
                        warn!("Action {} dispatched but not dequeued: {}", action.id, e);
                    }
                    report.actions_dispatched += 1;
                }
                Err(err) => {
                    report.actions_failed += 1;
                    let attempts = match self.store.bump_attempts(action.id).await {
                        Ok(attempts) => attempts.unwrap_or(action.attempts),
                        Err(e) => {
                            warn!("Could not record attempt for action {}: {}", action.id, e);
                            action.attempts
                        }
                    };
                    warn!(
                        "Action {} ({}) failed on attempt {}: {}",
                        action.id, action.action_type, attempts, err
                    );
                    // No dead-letter path exists yet; flag actions that look stuck.
                    if attempts >= self.config.attempts_warn_threshold
                        && err.retry_class() == RetryClass::Permanent
                    {
                        warn!(
                            "Action {} ({}) keeps failing permanently after {} attempts and will be retried forever",
                            action.id, action.action_type, attempts
                        );
                    }
                }
            }
        }
    }

    /// Starts the background trigger loop.
    ///
    /// Passes run on connectivity restore, on external triggers sent through
    /// the returned handle, and on the configured interval while online.
    pub fn spawn(self: Arc<Self>, connectivity: ConnectivityMonitor) -> SyncHandle {
        let (sender, receiver) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
        let interval = self
            .config
            .interval_secs
            .filter(|secs| *secs > 0)
            .map(|secs| {
                let period = Duration::from_secs(secs);
                tokio::time::interval_at(tokio::time::Instant::now() + period, period)
            });
        let watcher = connectivity.subscribe();
        let task = tokio::spawn(self.trigger_loop(connectivity, watcher, receiver, interval));
        SyncHandle { sender, task }
    }

    async fn trigger_loop(
        self: Arc<Self>,
        connectivity: ConnectivityMonitor,
        mut watcher: watch::Receiver<Connectivity>,
        mut triggers: mpsc::Receiver<SyncTrigger>,
        mut interval: Option<Interval>,
    ) {
        let mut triggers_open = true;

        loop {
            tokio::select! {
                changed = watcher.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *watcher.borrow_and_update() == Connectivity::Online {
                        self.start_pass(SyncTrigger::ConnectivityRestored);
                    }
                }
                trigger = triggers.recv(), if triggers_open => match trigger {
                    Some(trigger) => {
                        if trigger == SyncTrigger::Manual || connectivity.is_online() {
                            self.start_pass(trigger);
                        } else {
                            debug!("Offline; ignoring {:?} sync trigger", trigger);
                        }
                    }
                    None => triggers_open = false,
                },
                _ = next_tick(&mut interval) => {
                    if connectivity.is_online() {
                        self.start_pass(SyncTrigger::Scheduled);
                    }
                }
            }
        }
    }

    /// Runs the pass on its own task so the loop keeps receiving (and
    /// dropping) triggers while it is in progress.
    fn start_pass(self: &Arc<Self>, trigger: SyncTrigger) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.run_pass(trigger).await;
        });
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Handle to the background trigger loop.
pub struct SyncHandle {
    sender: mpsc::Sender<SyncTrigger>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Sends an external trigger. Returns `false` when it was dropped because
    /// the trigger queue is full or the loop has stopped.
    pub fn trigger(&self, trigger: SyncTrigger) -> bool {
        self.sender.try_send(trigger).is_ok()
    }

    pub fn stop(self) {
        self.task.abort();
    }
}
