//! Background request router.
//!
//! A single long-lived task owns the response cache and serves every outbound
//! read for UI surfaces. Surfaces hold a cheap [`RouterHandle`]; dropping one
//! view's handle does not stop the router, only dropping the last one does.
//!
//! Classification, first match wins:
//!
//! | Resource                     | Strategy                   | Miss + network failure |
//! |------------------------------|----------------------------|------------------------|
//! | API paths                    | network-first              | synthetic offline JSON |
//! | Manual reader documents      | stale-while-revalidate     | synthetic offline page |
//! | Enumerated static assets     | cache-first                | bare failure           |
//! | Everything else              | network-first (runtime)    | bare failure           |
//!
//! Expected offline conditions never surface as errors: every request
//! resolves to a [`RouteResponse`].

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::RouterConfig;
use crate::local_db_state::{ResponseCache, StoreEvent};
use crate::transport::{send_with_timeout, HttpRequest, HttpResponse, Method, Transport};

const NOTIFICATION_CAPACITY: usize = 64;
pub const OFFLINE_STATUS: u16 = 503;
pub const OFFLINE_HEADER: &str = "x-offline";

const OFFLINE_PAGE: &str = "<!DOCTYPE html><html><head><title>Offline</title></head>\
<body><h1>You are offline</h1><p>This manual page has not been saved for offline reading.</p></body></html>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    NetworkFirst,
    StaleWhileRevalidate,
    CacheFirst,
    NetworkFirstRuntime,
}

/// Picks the caching strategy for a request path. Query strings are ignored.
pub fn classify(config: &RouterConfig, path: &str) -> Strategy {
    let route = path.split(&['?', '#'][..]).next().unwrap_or(path);

    if route.starts_with(&config.api_prefix) {
        Strategy::NetworkFirst
    } else if config
        .document_prefixes
        .iter()
        .any(|prefix| route.starts_with(prefix.as_str()))
    {
        Strategy::StaleWhileRevalidate
    } else if config.static_assets.iter().any(|asset| asset == route) {
        Strategy::CacheFirst
    } else {
        Strategy::NetworkFirstRuntime
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseSource {
    Network,
    Cache,
    /// Synthetic "offline, unavailable" response.
    Offline,
    /// Bare failure with no usable response.
    Failed,
}

/// What a UI surface gets back for every routed request.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

impl RouteResponse {
    fn from_http(response: HttpResponse, source: ResponseSource) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            source,
        }
    }

    pub fn offline_api() -> Self {
        let body = json!({
            "error": "offline",
            "message": "You are offline and this resource is not available offline."
        });
        Self {
            status: OFFLINE_STATUS,
            headers: vec![
                ("content-type".to_string(), "application/json".to_string()),
                (OFFLINE_HEADER.to_string(), "1".to_string()),
            ],
            body: body.to_string().into_bytes(),
            source: ResponseSource::Offline,
        }
    }

    pub fn offline_page() -> Self {
        Self {
            status: OFFLINE_STATUS,
            headers: vec![
                ("content-type".to_string(), "text/html; charset=utf-8".to_string()),
                (OFFLINE_HEADER.to_string(), "1".to_string()),
            ],
            body: OFFLINE_PAGE.as_bytes().to_vec(),
            source: ResponseSource::Offline,
        }
    }

    pub fn failure() -> Self {
        Self {
            status: 0,
            headers: Vec::new(),
            body: Vec::new(),
            source: ResponseSource::Failed,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.source == ResponseSource::Offline
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Broadcast to every subscribed UI surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterNotification {
    /// A manual bundle is now available offline.
    BundleCached { manual_id: String, version: String },
    /// A background refresh replaced a stale document in the cache.
    Revalidated { path: String },
    CacheCleared,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedResponse {
    response: HttpResponse,
    cached_at: DateTime<Utc>,
}

enum RouterMessage {
    Fetch {
        request: HttpRequest,
        reply: oneshot::Sender<RouteResponse>,
    },
}

/// Cheap, cloneable access to the router task.
#[derive(Clone)]
pub struct RouterHandle {
    requests: mpsc::Sender<RouterMessage>,
    notifications: broadcast::Sender<RouterNotification>,
}

impl RouterHandle {
    pub async fn fetch(&self, request: HttpRequest) -> RouteResponse {
        let (reply, response) = oneshot::channel();
        if self
            .requests
            .send(RouterMessage::Fetch { request, reply })
            .await
            .is_err()
        {
            warn!("Request router is not running");
            return RouteResponse::failure();
        }
        response.await.unwrap_or_else(|_| RouteResponse::failure())
    }

    pub async fn get(&self, path: &str) -> RouteResponse {
        self.fetch(HttpRequest::get(path)).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterNotification> {
        self.notifications.subscribe()
    }
}

pub struct RequestRouter {
    cache: ResponseCache,
    transport: Arc<dyn Transport>,
    config: RouterConfig,
    clock: Arc<dyn Clock>,
    notifications: broadcast::Sender<RouterNotification>,
}

impl RequestRouter {
    pub fn new(
        cache: ResponseCache,
        transport: Arc<dyn Transport>,
        config: RouterConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            cache,
            transport,
            config,
            clock,
            notifications,
        }
    }

    /// Starts the router task. It runs until every [`RouterHandle`] is dropped.
    pub fn spawn(self, store_events: broadcast::Receiver<StoreEvent>) -> (RouterHandle, JoinHandle<()>) {
        let (requests, inbox) = mpsc::channel(self.config.channel_capacity.max(1));
        let handle = RouterHandle {
            requests,
            notifications: self.notifications.clone(),
        };
        if !self.cache.is_available() {
            warn!("Response cache unavailable; router is network-only");
        }
        let task = tokio::spawn(Arc::new(self).run(inbox, store_events));
        (handle, task)
    }

    async fn run(
        self: Arc<Self>,
        mut inbox: mpsc::Receiver<RouterMessage>,
        mut store_events: broadcast::Receiver<StoreEvent>,
    ) {
        info!("Request router started");
        let mut store_events_open = true;

        loop {
            tokio::select! {
                message = inbox.recv() => match message {
                    Some(RouterMessage::Fetch { request, reply }) => {
                        let router = Arc::clone(&self);
                        tokio::spawn(async move {
                            let response = router.handle(request).await;
                            let _ = reply.send(response);
                        });
                    }
                    None => break,
                },
                event = store_events.recv(), if store_events_open => match event {
                    Ok(StoreEvent::BundleCached { manual_id, version }) => {
                        let _ = self
                            .notifications
                            .send(RouterNotification::BundleCached { manual_id, version });
                    }
                    Ok(StoreEvent::Cleared) => {
                        let _ = self.notifications.send(RouterNotification::CacheCleared);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Router missed {skipped} store events");
                    }
                    Err(RecvError::Closed) => store_events_open = false,
                },
            }
        }

        info!("Request router stopped");
    }

    /// Routes one request. Usable directly when no actor is needed.
    pub async fn handle(self: &Arc<Self>, request: HttpRequest) -> RouteResponse {
        if request.method != Method::Get {
            return match self.network(request).await {
                Ok(response) => RouteResponse::from_http(response, ResponseSource::Network),
                Err(_) => RouteResponse::failure(),
            };
        }

        let strategy = classify(&self.config, &request.path);
        debug!("{} -> {:?}", request.path, strategy);

        match strategy {
            Strategy::NetworkFirst => {
                self.network_first(request, RouteResponse::offline_api).await
            }
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::NetworkFirstRuntime => {
                self.network_first(request, RouteResponse::failure).await
            }
        }
    }

    fn cache_key(request: &HttpRequest) -> String {
        format!("{} {}", request.method.as_str(), request.path)
    }

    fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.config.network_timeout_ms)
    }

    async fn network(&self, request: HttpRequest) -> Result<HttpResponse, crate::error::TransportError> {
        let path = request.path.clone();
        let result = send_with_timeout(self.transport.as_ref(), request, self.network_timeout()).await;
        if let Err(e) = &result {
            debug!("Network request for {path} failed: {e}");
        }
        result
    }

    async fn cached(&self, key: &str) -> Option<HttpResponse> {
        match self.cache.get::<CachedResponse>(key).await {
            Ok(hit) => hit.map(|entry| entry.response),
            Err(e) => {
                warn!("Response cache read failed for {key}: {e}");
                None
            }
        }
    }

    /// Only successful responses are cached.
    async fn remember(&self, key: &str, response: &HttpResponse) {
        if !response.is_success() {
            return;
        }
        let entry = CachedResponse {
            response: response.clone(),
            cached_at: self.clock.now(),
        };
        if let Err(e) = self.cache.put(key, &entry).await {
            warn!("Response cache write failed for {key}: {e}");
        }
    }

    async fn network_first(
        &self,
        request: HttpRequest,
        fallback: fn() -> RouteResponse,
    ) -> RouteResponse {
        let key = Self::cache_key(&request);
        match self.network(request).await {
            Ok(response) => {
                self.remember(&key, &response).await;
                RouteResponse::from_http(response, ResponseSource::Network)
            }
            Err(_) => match self.cached(&key).await {
                Some(cached) => RouteResponse::from_http(cached, ResponseSource::Cache),
                None => fallback(),
            },
        }
    }

    async fn stale_while_revalidate(self: &Arc<Self>, request: HttpRequest) -> RouteResponse {
        let key = Self::cache_key(&request);
        if let Some(cached) = self.cached(&key).await {
            let router = Arc::clone(self);
            tokio::spawn(async move { router.revalidate(request).await });
            return RouteResponse::from_http(cached, ResponseSource::Cache);
        }

        match self.network(request).await {
            Ok(response) => {
                self.remember(&key, &response).await;
                RouteResponse::from_http(response, ResponseSource::Network)
            }
            Err(_) => RouteResponse::offline_page(),
        }
    }

    /// Background refresh; failures leave the stale copy in place.
    async fn revalidate(&self, request: HttpRequest) {
        let key = Self::cache_key(&request);
        let path = request.path.clone();
        if let Ok(response) = self.network(request).await {
            if response.is_success() {
                self.remember(&key, &response).await;
                let _ = self
                    .notifications
                    .send(RouterNotification::Revalidated { path });
            }
        }
    }

    async fn cache_first(&self, request: HttpRequest) -> RouteResponse {
        let key = Self::cache_key(&request);
        if let Some(cached) = self.cached(&key).await {
            return RouteResponse::from_http(cached, ResponseSource::Cache);
        }

        match self.network(request).await {
            Ok(response) => {
                self.remember(&key, &response).await;
                RouteResponse::from_http(response, ResponseSource::Network)
            }
            Err(_) => RouteResponse::failure(),
        }
    }
}
