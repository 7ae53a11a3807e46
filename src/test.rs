//! # Scenario Test Suite for Offline Manuals Core
//!
//! End-to-end scenarios across the store, router, sync orchestrator and edit
//! controller, driven by an in-process fake server and a manual clock so
//! nothing depends on a real network or wall-clock time.
//!
//! ## Test Categories
//!
//! ### 1. Local Store
//! - Round trip of bundles, annotations, sessions and queued actions
//! - Bundle TTL boundary (T+23h59m usable, T+24h00m01s gone)
//! - Checksum stability across refreshes and key order
//! - Store events surfacing as router notifications
//! - Empty collections and clearing a partly empty store
//!
//! ### 2. Sync Orchestrator
//! - Idempotent passes: a second pass with nothing new changes nothing
//! - Isolation: one failing item never blocks the rest
//! - Unknown action types fail without a network call
//! - Single-flight: overlapping triggers are dropped, not queued
//! - Connectivity restore and scheduled triggers
//! - A session rewritten mid-upload stays pending for the next pass
//!
//! ### 3. Optimistic Concurrency
//! - Stale token rejected with the server copy kept
//! - Reload recovers from a conflict
//! - Transient failures keep the edit dirty
//!
//! ### 4. Request Router
//! - Offline degradation within the configured bound
//! - Cached copies served per strategy
//! - Stale-while-revalidate refresh
//! - Clearing the store drops cached API responses
//!
//! ### 5. Engine and FFI
//! - `download_for_offline`, degraded store, C surface reads and writes
//!
//! ## Running the Tests
//!
//! ```bash
//! cargo test
//! cargo test test_sync_      # orchestrator scenarios
//! cargo test test_router_    # routing scenarios
//! cargo test test_ffi_       # C surface
//! ```

#[cfg(test)]
pub mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::{json, Value as JsonValue};
    use tempfile::TempDir;

    use crate::api_client::ManualsApi;
    use crate::clock::ManualClock;
    use crate::concurrency::{
        ConcurrencyController, ContentChangeObserver, EditState, SaveOutcome,
    };
    use crate::config::{EngineConfig, RouterConfig, SyncConfig};
    use crate::connectivity::{Connectivity, ConnectivityMonitor};
    use crate::engine::OfflineEngine;
    use crate::error::{SaveError, StoreError, SyncItemError, TransportError};
    use crate::local_db_model::{bundle_checksum, SyncCollection, SyncKey, UnsyncedRecord};
    use crate::local_db_state::LocalStore;
    use crate::request_router::{
        RequestRouter, ResponseSource, RouterHandle, RouterNotification, OFFLINE_HEADER,
    };
    use crate::sync_orchestrator::SyncOrchestrator;
    use crate::transport::{HttpRequest, HttpResponse, Method, Transport};

    // ─────────────────────────────────────────────────────────────────────
    // Fake server
    // ─────────────────────────────────────────────────────────────────────

    struct Section {
        content: String,
        version: u32,
    }

    impl Section {
        fn etag(&self) -> String {
            format!("t{}", self.version)
        }
    }

    /// Scripted stand-in for the manuals server.
    ///
    /// Every attempted request is recorded, including ones refused while
    /// offline. GETs are answered from `routes`, POSTs succeed with 201,
    /// section reads and saves follow `If-Match` semantics.
    #[derive(Default)]
    struct FakeServer {
        offline: AtomicBool,
        hang: AtomicBool,
        delay_ms: AtomicU64,
        requests: Mutex<Vec<HttpRequest>>,
        routes: Mutex<HashMap<String, HttpResponse>>,
        failing: Mutex<HashSet<String>>,
        sections: Mutex<HashMap<String, Section>>,
    }

    impl FakeServer {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        fn route(&self, path: &str, body: JsonValue) {
            self.routes
                .lock()
                .unwrap()
                .insert(path.to_string(), HttpResponse::json(200, &body));
        }

        fn fail(&self, path: &str) {
            self.failing.lock().unwrap().insert(path.to_string());
        }

        fn heal(&self, path: &str) {
            self.failing.lock().unwrap().remove(path);
        }

        fn section(&self, block_id: &str, content: &str) {
            self.sections.lock().unwrap().insert(
                block_id.to_string(),
                Section {
                    content: content.to_string(),
                    version: 1,
                },
            );
        }

        fn section_content(&self, block_id: &str) -> String {
            self.sections.lock().unwrap()[block_id].content.clone()
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }

        fn posts_to(&self, path: &str) -> usize {
            self.requests()
                .iter()
                .filter(|r| r.method == Method::Post && r.path == path)
                .count()
        }

        fn handle_section(&self, block_id: &str, request: &HttpRequest) -> HttpResponse {
            let mut sections = self.sections.lock().unwrap();
            let Some(section) = sections.get_mut(block_id) else {
                return HttpResponse::json(404, &json!({"error": "no such block"}));
            };
            match request.method {
                Method::Get => HttpResponse::json(
                    200,
                    &json!({"content": section.content, "etag": section.etag()}),
                ),
                _ => {
                    let provided = request.header("If-Match").unwrap_or_default().to_string();
                    if provided != section.etag() {
                        return HttpResponse::json(
                            409,
                            &json!({"currentEtag": section.etag(), "providedEtag": provided}),
                        );
                    }
                    let body = request.body.clone().unwrap_or_default();
                    section.content = body["content"].as_str().unwrap_or_default().to_string();
                    section.version += 1;
                    HttpResponse::json(200, &json!({"etag": section.etag()}))
                }
            }
        }
    }

    #[async_trait]
    impl Transport for FakeServer {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());

            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.offline.load(Ordering::SeqCst) {
                return Err(TransportError::connection("network unreachable"));
            }
            if self.failing.lock().unwrap().contains(&request.path) {
                return Ok(HttpResponse::json(500, &json!({"error": "internal"})));
            }

            if let Some(block_id) = request
                .path
                .strip_prefix("/manuals/blocks/")
                .and_then(|rest| rest.strip_suffix("/content"))
            {
                return Ok(self.handle_section(block_id, &request));
            }

            match request.method {
                Method::Get => Ok(self
                    .routes
                    .lock()
                    .unwrap()
                    .get(&request.path)
                    .cloned()
                    .unwrap_or_else(|| HttpResponse::new(404, "not found"))),
                _ => Ok(HttpResponse::json(201, &json!({"ok": true}))),
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Fixtures
    // ─────────────────────────────────────────────────────────────────────

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 6, 30, 0).unwrap()
    }

    struct Fixture {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        store: LocalStore,
        server: Arc<FakeServer>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(t0()));
        let store = LocalStore::open_with(
            dir.path().join("manuals").to_string_lossy(),
            16 * 1024 * 1024,
            chrono::Duration::hours(24),
            clock.clone(),
        )
        .unwrap();
        Fixture {
            _dir: dir,
            clock,
            store,
            server: FakeServer::new(),
        }
    }

    fn api(server: &Arc<FakeServer>) -> ManualsApi {
        ManualsApi::new(server.clone(), Duration::from_secs(2))
    }

    fn orchestrator(fx: &Fixture) -> SyncOrchestrator {
        SyncOrchestrator::new(fx.store.clone(), api(&fx.server), SyncConfig::default())
    }

    fn router(fx: &Fixture, network_timeout_ms: u64) -> RouterHandle {
        let config = RouterConfig {
            network_timeout_ms,
            ..RouterConfig::default()
        };
        let (handle, _task) = RequestRouter::new(
            fx.store.response_cache(),
            fx.server.clone(),
            config,
            fx.clock.clone(),
        )
        .spawn(fx.store.subscribe());
        handle
    }

    /// The store itself is injected, so only timeouts and triggers matter here.
    fn engine_config() -> EngineConfig {
        EngineConfig {
            request_timeout_ms: 2_000,
            sync: SyncConfig {
                interval_secs: None,
                ..SyncConfig::default()
            },
            ..EngineConfig::default()
        }
    }

    async fn eventually<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..40 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    // ─────────────────────────────────────────────────────────────────────
    // 1. Local store
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_store_round_trip() {
        let fx = fixture();
        let data = json!({"title": "Line maintenance", "blocks": [{"id": "b1"}]});

        let bundle = fx.store.put_bundle("mx-200", "4", data.clone()).await.unwrap();
        assert_eq!(bundle.cached_at, t0());
        assert_eq!(bundle.expires_at, t0() + chrono::Duration::hours(24));
        assert_eq!(fx.store.get_bundle("mx-200", "4").await.unwrap(), Some(data.clone()));
        assert_eq!(fx.store.get_bundle("mx-200", "latest").await.unwrap(), Some(data));
        assert!(fx.store.get_bundle("mx-200", "5").await.unwrap().is_none());

        let note = fx
            .store
            .put_annotation("mx-200", json!({"kind": "highlight", "block": "b1"}))
            .await
            .unwrap();
        let unsynced = fx.store.list_unsynced(SyncCollection::Annotations).await.unwrap();
        assert_eq!(unsynced, vec![UnsyncedRecord::Annotation(note.clone())]);

        assert!(fx.store.mark_synced(SyncKey::Annotation(note.id.clone())).await.unwrap());
        assert!(fx.store.mark_synced(SyncKey::Annotation(note.id.clone())).await.unwrap());
        assert!(!fx.store.mark_synced(SyncKey::Annotation("missing".into())).await.unwrap());
        let stored = fx.store.annotations_for_manual("mx-200").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].synced);
        assert_eq!(stored[0].synced_at, Some(t0()));

        fx.store.put_session("mx-200", "tech-7", json!({"page": 3})).await.unwrap();
        fx.clock.advance(chrono::Duration::minutes(2));
        fx.store.put_session("mx-200", "tech-7", json!({"page": 9})).await.unwrap();
        let session = fx.store.get_session("mx-200", "tech-7").await.unwrap().unwrap();
        assert_eq!(session.payload, json!({"page": 9}));
        assert_eq!(session.last_accessed_at, t0() + chrono::Duration::minutes(2));
        assert!(!session.synced);
        assert_eq!(fx.store.list_unsynced_sessions().await.unwrap().len(), 1);

        let first = fx.store.enqueue_action("SUGGEST_EDIT", json!({"n": 1})).await.unwrap();
        let second = fx.store.enqueue_action("ACKNOWLEDGE", json!({"n": 2})).await.unwrap();
        let queued = fx.store.list_actions().await.unwrap();
        assert_eq!(queued.iter().map(|a| a.id).collect::<Vec<_>>(), vec![first.id, second.id]);
        assert!(queued.iter().all(|a| a.attempts == 0));
    }

    #[tokio::test]
    async fn test_store_ttl_boundary() {
        let fx = fixture();
        fx.store.put_bundle("mx-200", "4", json!({"rev": 4})).await.unwrap();

        fx.clock.set(t0() + chrono::Duration::hours(23) + chrono::Duration::minutes(59));
        assert!(fx.store.get_bundle("mx-200", "4").await.unwrap().is_some());

        fx.clock.set(t0() + chrono::Duration::hours(24) + chrono::Duration::seconds(1));
        assert!(fx.store.get_bundle("mx-200", "4").await.unwrap().is_none());

        // Expired bundles stay on disk until cleared.
        assert!(fx.store.is_bundle_cached("mx-200", "4").await.unwrap());
        assert_eq!(fx.store.cache_info().await.unwrap().cached_manuals, 1);

        fx.store.put_bundle("mx-200", "4", json!({"rev": 4})).await.unwrap();
        assert!(fx.store.get_bundle("mx-200", "4").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_checksum_stability() {
        let fx = fixture();
        let mut built = serde_json::Map::new();
        built.insert("sections".into(), json!([{"id": "s1"}, {"id": "s2"}]));
        built.insert("title".into(), json!("Hydraulics"));
        let literal = json!({"title": "Hydraulics", "sections": [{"id": "s1"}, {"id": "s2"}]});

        let first = fx.store.put_bundle("hy-1", "2", JsonValue::Object(built)).await.unwrap();
        fx.clock.advance(chrono::Duration::hours(1));
        let refreshed = fx.store.put_bundle("hy-1", "2", literal.clone()).await.unwrap();

        assert_eq!(first.checksum, refreshed.checksum);
        assert_eq!(first.checksum, bundle_checksum(&literal));
        assert_ne!(first.cached_at, refreshed.cached_at);

        let changed = fx
            .store
            .put_bundle("hy-1", "2", json!({"title": "Hydraulics", "sections": []}))
            .await
            .unwrap();
        assert_ne!(changed.checksum, first.checksum);
    }

    #[tokio::test]
    async fn test_store_clear_all_and_cache_info() {
        let fx = fixture();
        fx.store.put_bundle("a", "1", json!({"x": 1})).await.unwrap();
        fx.store.put_bundle("a", "2", json!({"x": 2})).await.unwrap();
        fx.store.put_bundle("b", "1", json!({"x": 3})).await.unwrap();
        fx.store.put_annotation("a", json!({})).await.unwrap();
        fx.store.enqueue_action("ANNOTATION", json!({})).await.unwrap();

        let info = fx.store.cache_info().await.unwrap();
        assert_eq!(info.cached_manuals, 2);
        assert_eq!(info.annotation_count, 1);
        assert!(info.total_cached_bytes > 0);
        assert!(info.last_sync_at.is_none());

        fx.store.clear_all().await.unwrap();
        let info = fx.store.cache_info().await.unwrap();
        assert_eq!(info.cached_manuals, 0);
        assert_eq!(info.annotation_count, 0);
        assert!(fx.store.list_actions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_events_reach_router_subscribers() {
        let fx = fixture();
        let handle = router(&fx, 500);
        let mut notifications = handle.subscribe();

        fx.store.put_bundle("mx-200", "4", json!({})).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            RouterNotification::BundleCached {
                manual_id: "mx-200".into(),
                version: "4".into()
            }
        );

        fx.store.clear_all().await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, RouterNotification::CacheCleared);
    }

    // ─────────────────────────────────────────────────────────────────────
    // 2. Sync orchestrator
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_sync_second_pass_is_a_no_op() {
        let fx = fixture();
        let sync = orchestrator(&fx);
        let note = fx.store.put_annotation("mx-200", json!({"text": "torque check"})).await.unwrap();
        fx.store.put_session("mx-200", "tech-7", json!({"page": 4})).await.unwrap();
        fx.store.enqueue_action("SUGGEST_EDIT", json!({"blockId": "b1"})).await.unwrap();

        let first = sync.force_sync().await;
        assert!(!first.skipped);
        assert_eq!(first.annotations_synced, 1);
        assert_eq!(first.sessions_synced, 1);
        assert_eq!(first.actions_dispatched, 1);
        assert_eq!(first.failed(), 0);

        let upload = fx
            .server
            .requests()
            .into_iter()
            .find(|r| r.path == "/manuals/mx-200/annotations")
            .unwrap();
        assert_eq!(upload.body.unwrap()["id"], json!(note.id));

        let requests_after_first = fx.server.requests().len();
        let info_after_first = fx.store.cache_info().await.unwrap();
        assert_eq!(info_after_first.last_sync_at, Some(t0()));

        fx.clock.advance(chrono::Duration::minutes(10));
        let second = sync.force_sync().await;
        assert_eq!(second.pushed(), 0);
        assert_eq!(second.failed(), 0);
        assert_eq!(fx.server.requests().len(), requests_after_first);
        assert_eq!(fx.store.cache_info().await.unwrap(), info_after_first);
    }

    #[tokio::test]
    async fn test_sync_isolates_failing_action() {
        let fx = fixture();
        let sync = orchestrator(&fx);
        let first = fx.store.enqueue_action("SUGGEST_EDIT", json!({"n": 1})).await.unwrap();
        let second = fx.store.enqueue_action("ANNOTATION", json!({"n": 2})).await.unwrap();
        let third = fx.store.enqueue_action("ACKNOWLEDGE", json!({"n": 3})).await.unwrap();
        fx.server.fail("/annotations");

        let report = sync.force_sync().await;
        assert_eq!(report.actions_dispatched, 2);
        assert_eq!(report.actions_failed, 1);

        let remaining = fx.store.list_actions().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second.id);
        assert_eq!(remaining[0].attempts, 1);
        assert_eq!(fx.server.posts_to("/suggestions"), 1);
        assert_eq!(fx.server.posts_to("/acknowledgements"), 1);
        assert!(remaining.iter().all(|a| a.id != first.id && a.id != third.id));

        sync.force_sync().await;
        assert_eq!(fx.store.list_actions().await.unwrap()[0].attempts, 2);

        fx.server.heal("/annotations");
        let report = sync.force_sync().await;
        assert_eq!(report.actions_dispatched, 1);
        assert!(fx.store.list_actions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_failed_upload_stays_unsynced() {
        let fx = fixture();
        let sync = orchestrator(&fx);
        fx.store.put_annotation("broken", json!({"n": 1})).await.unwrap();
        fx.store.put_annotation("fine", json!({"n": 2})).await.unwrap();
        fx.store.put_session("broken", "tech-7", json!({})).await.unwrap();
        fx.server.fail("/manuals/broken/annotations");

        let report = sync.force_sync().await;
        assert_eq!(report.annotations_synced, 1);
        assert_eq!(report.annotations_failed, 1);
        assert_eq!(report.sessions_synced, 1);

        let pending = fx.store.list_unsynced_annotations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].manual_id, "broken");
        assert!(pending[0].synced_at.is_none());
    }

    #[tokio::test]
    async fn test_sync_unknown_action_makes_no_request() {
        let fx = fixture();
        let sync = orchestrator(&fx);
        let action = fx.store.enqueue_action("TELEPORT", json!({})).await.unwrap();

        let report = sync.force_sync().await;
        assert_eq!(report.actions_failed, 1);
        assert!(fx.server.requests().is_empty());
        assert_eq!(fx.store.list_actions().await.unwrap()[0].id, action.id);
        assert_eq!(fx.store.list_actions().await.unwrap()[0].attempts, 1);
        assert!(fx.store.cache_info().await.unwrap().last_sync_at.is_none());

        let api = api(&fx.server);
        let err = api.dispatch_action(&action).await.unwrap_err();
        assert!(matches!(err, SyncItemError::UnknownAction(kind) if kind == "TELEPORT"));
    }

    #[tokio::test]
    async fn test_sync_offline_pass_keeps_everything_queued() {
        let fx = fixture();
        let sync = orchestrator(&fx);
        fx.store.put_annotation("mx-200", json!({})).await.unwrap();
        fx.store.enqueue_action("SUGGEST_EDIT", json!({})).await.unwrap();
        fx.server.set_offline(true);

        let report = sync.force_sync().await;
        assert_eq!(report.pushed(), 0);
        assert_eq!(report.failed(), 2);
        assert_eq!(fx.store.list_unsynced_annotations().await.unwrap().len(), 1);
        assert_eq!(fx.store.list_actions().await.unwrap()[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_sync_overlapping_trigger_is_dropped() {
        let fx = fixture();
        let sync = Arc::new(orchestrator(&fx));
        fx.store.put_annotation("mx-200", json!({})).await.unwrap();
        fx.server.delay_ms.store(300, Ordering::SeqCst);

        let running = tokio::spawn({
            let sync = Arc::clone(&sync);
            async move { sync.force_sync().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sync.is_running());

        let dropped = sync.force_sync().await;
        assert!(dropped.skipped);
        assert_eq!(dropped.pushed(), 0);

        let completed = running.await.unwrap();
        assert!(!completed.skipped);
        assert_eq!(completed.annotations_synced, 1);
        assert_eq!(fx.server.posts_to("/manuals/mx-200/annotations"), 1);
    }

    #[tokio::test]
    async fn test_sync_runs_when_connectivity_returns() {
        let fx = fixture();
        let connectivity = ConnectivityMonitor::new(Connectivity::Offline);
        let engine = OfflineEngine::with_parts(
            engine_config(),
            fx.store.clone(),
            fx.server.clone(),
            fx.clock.clone(),
            connectivity,
        );
        fx.store.put_annotation("mx-200", json!({"text": "offline note"})).await.unwrap();

        // Scheduled triggers are ignored while offline.
        assert!(engine.trigger_sync());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(fx.server.requests().is_empty());

        engine.set_connectivity(Connectivity::Online);
        let store = fx.store.clone();
        let synced = eventually(|| {
            let store = store.clone();
            async move { store.list_unsynced_annotations().await.unwrap().is_empty() }
        })
        .await;
        assert!(synced);
        assert_eq!(fx.server.posts_to("/manuals/mx-200/annotations"), 1);

        engine.shutdown();
    }

    #[tokio::test]
    async fn test_sync_session_rewritten_during_upload_stays_pending() {
        let fx = fixture();
        let sync = Arc::new(orchestrator(&fx));
        fx.store.put_session("mx-200", "tech-7", json!({"page": 4})).await.unwrap();
        fx.server.delay_ms.store(200, Ordering::SeqCst);

        let running = tokio::spawn({
            let sync = Arc::clone(&sync);
            async move { sync.force_sync().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        fx.store.put_session("mx-200", "tech-7", json!({"page": 9})).await.unwrap();
        let first = running.await.unwrap();
        assert_eq!(first.sessions_synced, 1);

        let session = fx.store.get_session("mx-200", "tech-7").await.unwrap().unwrap();
        assert_eq!(session.payload, json!({"page": 9}));
        assert!(!session.synced);

        fx.server.delay_ms.store(0, Ordering::SeqCst);
        let second = sync.force_sync().await;
        assert_eq!(second.sessions_synced, 1);
        assert_eq!(fx.server.posts_to("/manuals/mx-200/session"), 2);
        let last_upload = fx
            .server
            .requests()
            .into_iter()
            .rev()
            .find(|r| r.path == "/manuals/mx-200/session")
            .unwrap();
        assert_eq!(last_upload.body.unwrap()["page"], json!(9));
        assert!(fx.store.list_unsynced_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_fresh_store_pass_is_clean() {
        let fx = fixture();
        let sync = orchestrator(&fx);

        let report = sync.force_sync().await;
        assert!(!report.skipped);
        assert_eq!(report.pushed(), 0);
        assert_eq!(report.failed(), 0);
        assert!(fx.server.requests().is_empty());
        assert!(fx.store.cache_info().await.unwrap().last_sync_at.is_none());
    }

    // ─────────────────────────────────────────────────────────────────────
    // 3. Optimistic concurrency
    // ─────────────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingObserver {
        saved: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ContentChangeObserver for RecordingObserver {
        async fn content_saved(&self, block_id: &str, etag: &str) {
            self.saved
                .lock()
                .unwrap()
                .push((block_id.to_string(), etag.to_string()));
        }
    }

    #[tokio::test]
    async fn test_concurrency_stale_token_is_rejected() {
        let server = FakeServer::new();
        server.section("b1", "Torque to 25 Nm.");
        let observer = Arc::new(RecordingObserver::default());
        let alice = ConcurrencyController::new(api(&server)).with_observer(observer.clone());
        let bob = ConcurrencyController::new(api(&server));

        let mut alice_session = alice.open("b1").await.unwrap();
        let mut bob_session = bob.open("b1").await.unwrap();
        assert_eq!(alice_session.token(), "t1");

        bob_session.edit("Torque to 30 Nm.");
        let outcome = bob.save(&mut bob_session).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Saved { etag: "t2".into() });
        assert_eq!(bob_session.state(), EditState::Clean);
        assert_eq!(bob_session.token(), "t2");

        alice_session.edit("Torque to 28 Nm.");
        let outcome = alice.save(&mut alice_session).await.unwrap();
        assert_eq!(
            outcome,
            SaveOutcome::Conflict {
                current_etag: "t2".into(),
                provided_etag: "t1".into()
            }
        );
        assert_eq!(alice_session.state(), EditState::Conflict);
        assert_eq!(server.section_content("b1"), "Torque to 30 Nm.");
        assert!(observer.saved.lock().unwrap().is_empty());

        assert!(matches!(
            alice.save(&mut alice_session).await,
            Err(SaveError::ConflictPending)
        ));

        let discarded = alice.reload(&mut alice_session).await.unwrap();
        assert_eq!(discarded.as_deref(), Some("Torque to 28 Nm."));
        assert_eq!(alice_session.state(), EditState::Clean);
        assert_eq!(alice_session.token(), "t2");
        assert_eq!(alice_session.content(), "Torque to 30 Nm.");

        alice_session.edit("Torque to 30 Nm, then safety wire.");
        let outcome = alice.save(&mut alice_session).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Saved { etag: "t3".into() });
        assert_eq!(
            observer.saved.lock().unwrap().as_slice(),
            &[("b1".to_string(), "t3".to_string())]
        );
    }

    #[tokio::test]
    async fn test_concurrency_transient_failure_keeps_edit() {
        let server = FakeServer::new();
        server.section("b1", "original");
        let controller = ConcurrencyController::new(api(&server));
        let mut session = controller.open("b1").await.unwrap();
        session.edit("changed");

        server.set_offline(true);
        let err = controller.save(&mut session).await.unwrap_err();
        assert!(matches!(err, SaveError::Transport(_)));
        assert!(err.is_transient());
        assert_eq!(session.state(), EditState::Dirty);
        assert_eq!(session.pending(), Some("changed"));

        server.set_offline(false);
        server.fail("/manuals/blocks/b1/content");
        let err = controller.save(&mut session).await.unwrap_err();
        assert!(matches!(err, SaveError::Api { status: 500, .. }));
        assert_eq!(session.state(), EditState::Dirty);

        server.heal("/manuals/blocks/b1/content");
        let outcome = controller.save(&mut session).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Saved { etag: "t2".into() });
        assert_eq!(server.section_content("b1"), "changed");
        assert!(session.pending().is_none());
    }

    // ─────────────────────────────────────────────────────────────────────
    // 4. Request router
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_router_offline_responses_are_bounded() {
        let fx = fixture();
        let handle = router(&fx, 100);
        fx.server.hang.store(true, Ordering::SeqCst);

        let api = tokio::time::timeout(Duration::from_secs(2), handle.get("/api/manuals"))
            .await
            .unwrap();
        assert!(api.is_offline());
        assert_eq!(api.status, 503);
        assert_eq!(api.header(OFFLINE_HEADER), Some("1"));
        assert!(api.text().contains("offline"));

        let page = tokio::time::timeout(Duration::from_secs(2), handle.get("/reader/mx-200/1"))
            .await
            .unwrap();
        assert!(page.is_offline());
        assert!(page.header("content-type").unwrap().starts_with("text/html"));

        let other = tokio::time::timeout(Duration::from_secs(2), handle.get("/images/pump.png"))
            .await
            .unwrap();
        assert_eq!(other.source, ResponseSource::Failed);
        assert_eq!(other.status, 0);
    }

    #[tokio::test]
    async fn test_router_serves_cached_api_response_offline() {
        let fx = fixture();
        let handle = router(&fx, 500);
        fx.server.route("/api/manuals", json!([{"id": "mx-200"}]));

        let online = handle.get("/api/manuals").await;
        assert_eq!(online.source, ResponseSource::Network);

        fx.server.set_offline(true);
        let offline = handle.get("/api/manuals").await;
        assert_eq!(offline.source, ResponseSource::Cache);
        assert_eq!(offline.status, 200);
        assert_eq!(offline.body, online.body);

        let never_seen = handle.get("/api/manuals/mx-200/revisions").await;
        assert!(never_seen.is_offline());
    }

    #[tokio::test]
    async fn test_router_forgets_responses_after_clear() {
        let fx = fixture();
        let handle = router(&fx, 500);
        fx.server.route("/api/manuals", json!([{"id": "mx-200"}]));
        assert_eq!(handle.get("/api/manuals").await.source, ResponseSource::Network);

        fx.store.clear_all().await.unwrap();
        fx.server.set_offline(true);

        let after_clear = handle.get("/api/manuals").await;
        assert!(after_clear.is_offline());
        assert_eq!(after_clear.status, 503);
    }

    #[tokio::test]
    async fn test_router_static_assets_are_cache_first() {
        let fx = fixture();
        let handle = router(&fx, 500);
        fx.server.route("/manifest.json", json!({"name": "Manuals"}));

        assert_eq!(handle.get("/manifest.json").await.source, ResponseSource::Network);
        let requests = fx.server.requests().len();
        assert_eq!(handle.get("/manifest.json").await.source, ResponseSource::Cache);
        assert_eq!(fx.server.requests().len(), requests);

        fx.server.set_offline(true);
        let missing = handle.get("/favicon.ico").await;
        assert_eq!(missing.source, ResponseSource::Failed);
    }

    #[tokio::test]
    async fn test_router_stale_while_revalidate() {
        let fx = fixture();
        let handle = router(&fx, 500);
        fx.server.route("/manuals/mx-200/3", json!({"page": 3, "rev": "A"}));

        let first = handle.get("/manuals/mx-200/3").await;
        assert_eq!(first.source, ResponseSource::Network);

        fx.server.route("/manuals/mx-200/3", json!({"page": 3, "rev": "B"}));
        let mut notifications = handle.subscribe();
        let stale = handle.get("/manuals/mx-200/3").await;
        assert_eq!(stale.source, ResponseSource::Cache);
        assert_eq!(stale.body, first.body);

        let event = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            RouterNotification::Revalidated {
                path: "/manuals/mx-200/3".into()
            }
        );

        fx.server.set_offline(true);
        let refreshed = handle.get("/manuals/mx-200/3").await;
        assert_eq!(refreshed.source, ResponseSource::Cache);
        assert!(refreshed.text().contains("\"rev\":\"B\""));
    }

    #[tokio::test]
    async fn test_router_passes_writes_through() {
        let fx = fixture();
        let handle = router(&fx, 500);

        let response = handle
            .fetch(HttpRequest::post("/api/feedback", json!({"ok": true})))
            .await;
        assert_eq!(response.status, 201);
        assert_eq!(response.source, ResponseSource::Network);
        assert!(fx.store.response_cache().get::<JsonValue>("POST /api/feedback").await.unwrap().is_none());
    }

    // ─────────────────────────────────────────────────────────────────────
    // 5. Engine and FFI
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_engine_download_for_offline() {
        let fx = fixture();
        let engine = OfflineEngine::with_parts(
            engine_config(),
            fx.store.clone(),
            fx.server.clone(),
            fx.clock.clone(),
            ConnectivityMonitor::default(),
        );
        fx.server.route("/bundles/mx-200/4", json!({"title": "MX-200", "blocks": []}));

        let bundle = engine.download_for_offline("mx-200", "4").await.unwrap();
        assert_eq!(bundle.expires_at, t0() + chrono::Duration::hours(24));
        assert!(engine.store().is_bundle_cached("mx-200", "latest").await.unwrap());
        assert_eq!(engine.cache_info().await.unwrap().cached_manuals, 1);

        let missing = engine.download_for_offline("mx-200", "5").await.unwrap_err();
        assert!(matches!(missing, SyncItemError::Api { status: 404, .. }));

        fx.server.set_offline(true);
        let offline = engine.download_for_offline("mx-200", "6").await.unwrap_err();
        assert!(matches!(offline, SyncItemError::Transport(TransportError::Connection(_))));

        engine.clear_cache().await.unwrap();
        assert!(!engine.store().is_bundle_cached("mx-200", "4").await.unwrap());
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_engine_runs_network_only_without_store() {
        let server = FakeServer::new();
        let clock = Arc::new(ManualClock::new(t0()));
        let store = LocalStore::unavailable(chrono::Duration::hours(24), clock.clone());
        let engine = OfflineEngine::with_parts(
            EngineConfig::default(),
            store,
            server.clone(),
            clock,
            ConnectivityMonitor::default(),
        );
        server.route("/api/manuals", json!([]));
        server.route("/bundles/mx-200/4", json!({}));

        let response = engine.router().get("/api/manuals").await;
        assert_eq!(response.source, ResponseSource::Network);
        server.set_offline(true);
        assert!(engine.router().get("/api/manuals").await.is_offline());
        server.set_offline(false);

        let err = engine.download_for_offline("mx-200", "4").await.unwrap_err();
        assert!(matches!(err, SyncItemError::Store(StoreError::Unavailable)));
        assert!(matches!(
            engine.store().put_annotation("mx-200", json!({})).await,
            Err(StoreError::Unavailable)
        ));

        let report = engine.force_sync().await;
        assert_eq!(report.pushed(), 0);
        assert_eq!(engine.cache_info().await.unwrap().cached_manuals, 0);
        engine.shutdown();
    }

    fn take_response(ptr: *const std::os::raw::c_char) -> crate::AppResponse {
        assert!(!ptr.is_null(), "Response should not be null");
        let json = unsafe { std::ffi::CStr::from_ptr(ptr) }
            .to_str()
            .unwrap()
            .to_string();
        crate::free_response(ptr);
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_ffi_create_store_null_and_invalid_utf8() {
        use crate::create_store;

        assert!(create_store(std::ptr::null()).is_null());

        let invalid_bytes = [0xFFu8, 0xFE, 0xFD, 0x00];
        assert!(create_store(invalid_bytes.as_ptr() as *const std::os::raw::c_char).is_null());
    }

    #[test]
    fn test_ffi_store_lifecycle() {
        use crate::{clear_cache, close_store, create_store, get_bundle, get_cache_info, is_bundle_cached};
        use crate::AppResponse;
        use std::ffi::CString;

        let dir = tempfile::tempdir().unwrap();
        let name = CString::new(dir.path().join("ffi").to_str().unwrap()).unwrap();
        let store = create_store(name.as_ptr());
        assert!(!store.is_null());
        assert!(dir.path().join("ffi.lmdb").exists());

        let manual = CString::new("mx-200").unwrap();
        let latest = CString::new("latest").unwrap();

        let cached = take_response(is_bundle_cached(store, manual.as_ptr(), latest.as_ptr()));
        assert!(matches!(cached, AppResponse::Ok(ref v) if v == "false"));

        let bundle = take_response(get_bundle(store, manual.as_ptr(), latest.as_ptr()));
        assert!(matches!(bundle, AppResponse::NotFound(_)));

        let info = take_response(get_cache_info(store));
        match info {
            AppResponse::Ok(json) => {
                let value: JsonValue = serde_json::from_str(&json).unwrap();
                assert_eq!(value["cachedManuals"], 0);
                assert_eq!(value["annotationCount"], 0);
                assert!(value["lastSyncAt"].is_null());
            }
            other => panic!("unexpected response: {other}"),
        }

        assert!(take_response(clear_cache(store)).is_ok());
        assert!(take_response(close_store(store)).is_ok());
    }

    #[test]
    fn test_ffi_records_offline_work() {
        use crate::{close_store, create_store, enqueue_action, get_cache_info, put_annotation};
        use crate::AppResponse;
        use std::ffi::CString;

        let dir = tempfile::tempdir().unwrap();
        let name = CString::new(dir.path().join("ffi_writes").to_str().unwrap()).unwrap();
        let store = create_store(name.as_ptr());
        assert!(!store.is_null());

        let manual = CString::new("mx-200").unwrap();
        let payload = CString::new(r#"{"kind":"highlight","block":"b1"}"#).unwrap();
        let annotation = match take_response(put_annotation(store, manual.as_ptr(), payload.as_ptr())) {
            AppResponse::Ok(json) => serde_json::from_str::<JsonValue>(&json).unwrap(),
            other => panic!("unexpected response: {other}"),
        };
        assert_eq!(annotation["manualId"], "mx-200");
        assert_eq!(annotation["synced"], false);
        assert!(annotation["id"].as_str().is_some_and(|id| !id.is_empty()));

        let kind = CString::new("ACKNOWLEDGE").unwrap();
        let data = CString::new(r#"{"blockId":"b1"}"#).unwrap();
        let first = take_response(enqueue_action(store, kind.as_ptr(), data.as_ptr()));
        let second = take_response(enqueue_action(store, kind.as_ptr(), data.as_ptr()));
        let ids: Vec<u64> = [first, second]
            .into_iter()
            .map(|response| match response {
                AppResponse::Ok(json) => {
                    let action: JsonValue = serde_json::from_str(&json).unwrap();
                    assert_eq!(action["attempts"], 0);
                    action["id"].as_u64().unwrap()
                }
                other => panic!("unexpected response: {other}"),
            })
            .collect();
        assert!(ids[1] > ids[0]);

        let broken = CString::new("{not json").unwrap();
        let rejected = take_response(put_annotation(store, manual.as_ptr(), broken.as_ptr()));
        assert!(matches!(rejected, AppResponse::BadRequest(ref m) if m.contains("payload_json")));
        let rejected = take_response(enqueue_action(store, kind.as_ptr(), broken.as_ptr()));
        assert!(matches!(rejected, AppResponse::BadRequest(ref m) if m.contains("data_json")));

        match take_response(get_cache_info(store)) {
            AppResponse::Ok(json) => {
                let value: JsonValue = serde_json::from_str(&json).unwrap();
                assert_eq!(value["annotationCount"], 1);
            }
            other => panic!("unexpected response: {other}"),
        }

        assert!(take_response(close_store(store)).is_ok());
    }

    #[test]
    fn test_ffi_null_arguments() {
        use crate::{close_store, create_store, get_cache_info, is_bundle_cached};
        use crate::AppResponse;
        use std::ffi::CString;

        let response = take_response(get_cache_info(std::ptr::null_mut()));
        assert!(matches!(response, AppResponse::BadRequest(_)));

        let dir = tempfile::tempdir().unwrap();
        let name = CString::new(dir.path().join("ffi_null").to_str().unwrap()).unwrap();
        let store = create_store(name.as_ptr());
        let latest = CString::new("latest").unwrap();

        let response = take_response(is_bundle_cached(store, std::ptr::null(), latest.as_ptr()));
        assert!(matches!(response, AppResponse::BadRequest(ref m) if m.contains("manual_id")));

        assert!(take_response(close_store(store)).is_ok());
        assert!(matches!(
            take_response(close_store(std::ptr::null_mut())),
            AppResponse::BadRequest(_)
        ));

        crate::free_response(std::ptr::null());
    }
}
