//! One-stop wiring of store, router, sync and edit-save for a client.

use log::info;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::api_client::ManualsApi;
use crate::app_response::AppResponse;
use crate::clock::{Clock, SystemClock};
use crate::concurrency::{ConcurrencyController, ContentChangeObserver};
use crate::config::EngineConfig;
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::error::{StoreResult, SyncItemError};
use crate::local_db_model::{CacheInfo, ManualBundle};
use crate::local_db_state::LocalStore;
use crate::request_router::{RequestRouter, RouterHandle, RouterNotification};
use crate::sync_orchestrator::{SyncHandle, SyncOrchestrator, SyncReport, SyncTrigger};
use crate::transport::{ReqwestTransport, Transport};

/// Everything a client needs, built from one [`EngineConfig`].
///
/// Must be started inside a tokio runtime: the router and the sync trigger
/// loop run as background tasks until [`OfflineEngine::shutdown`].
pub struct OfflineEngine {
    config: EngineConfig,
    store: LocalStore,
    api: ManualsApi,
    connectivity: ConnectivityMonitor,
    router: RouterHandle,
    router_task: JoinHandle<()>,
    orchestrator: Arc<SyncOrchestrator>,
    sync: SyncHandle,
    controller: ConcurrencyController,
}

impl OfflineEngine {
    /// Opens the store (degraded if LMDB fails) and talks HTTP via reqwest.
    pub fn start(config: EngineConfig) -> Result<Self, AppResponse> {
        config.validate()?;
        let transport = ReqwestTransport::new(&config.base_url, config.request_timeout())?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = LocalStore::open_or_degraded(&config, Arc::clone(&clock));
        Ok(Self::with_parts(
            config,
            store,
            Arc::new(transport),
            clock,
            ConnectivityMonitor::default(),
        ))
    }

    /// Wires the engine from pre-built parts.
    pub fn with_parts(
        config: EngineConfig,
        store: LocalStore,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        let api = ManualsApi::new(Arc::clone(&transport), config.request_timeout());

        let (router, router_task) = RequestRouter::new(
            store.response_cache(),
            transport,
            config.router.clone(),
            clock,
        )
        .spawn(store.subscribe());

        let orchestrator = Arc::new(SyncOrchestrator::new(
            store.clone(),
            api.clone(),
            config.sync.clone(),
        ));
        let sync = Arc::clone(&orchestrator).spawn(connectivity.clone());
        let controller = ConcurrencyController::new(api.clone());

        info!(
            "Offline engine started (server {}, store {})",
            config.base_url,
            if store.is_available() { "available" } else { "degraded" }
        );

        Self {
            config,
            store,
            api,
            connectivity,
            router,
            router_task,
            orchestrator,
            sync,
            controller,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ContentChangeObserver>) -> Self {
        self.controller = ConcurrencyController::new(self.api.clone()).with_observer(observer);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn router(&self) -> RouterHandle {
        self.router.clone()
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn set_connectivity(&self, state: Connectivity) {
        self.connectivity.set(state);
    }

    pub fn controller(&self) -> &ConcurrencyController {
        &self.controller
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterNotification> {
        self.router.subscribe()
    }

    /// Fetches a bundle and stores it for offline reading.
    pub async fn download_for_offline(
        &self,
        manual_id: &str,
        version: &str,
    ) -> Result<ManualBundle, SyncItemError> {
        let data = self.api.fetch_bundle(manual_id, version).await?;
        let bundle = self.store.put_bundle(manual_id, version, data).await?;
        info!(
            "Manual {}@{} available offline until {}",
            manual_id, version, bundle.expires_at
        );
        Ok(bundle)
    }

    pub async fn cache_info(&self) -> StoreResult<CacheInfo> {
        self.store.cache_info().await
    }

    pub async fn clear_cache(&self) -> StoreResult<()> {
        self.store.clear_all().await
    }

    pub async fn force_sync(&self) -> SyncReport {
        self.orchestrator.force_sync().await
    }

    /// Hands an external trigger to the background loop.
    pub fn trigger_sync(&self) -> bool {
        self.sync.trigger(SyncTrigger::Scheduled)
    }

    pub fn shutdown(self) {
        self.sync.stop();
        self.router_task.abort();
        info!("Offline engine stopped");
    }
}
