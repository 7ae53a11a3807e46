//! LMDB-backed local store.
//!
//! The environment holds one named database per collection (`bundles`,
//! `annotations`, `sessions`, `actions`), an internal `meta` database for the
//! action sequence and last sync time, and the router-owned `responses`
//! database. Every operation runs one LMDB transaction on the blocking pool;
//! LMDB serializes write transactions, so a reader never sees a half-applied
//! read-modify-write.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lmdb::{
    Cursor, Database, DatabaseFlags, Environment, EnvironmentFlags, RwTransaction, Transaction,
    WriteFlags,
};
use lmdb_sys::{MDB_NEXT, MDB_SET_RANGE};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;

use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, DEFAULT_BUNDLE_TTL_SECS};
use crate::error::{StoreError, StoreResult};
use crate::local_db_model::{
    Annotation, CacheInfo, ManualBundle, QueuedAction, ReadingSession, SyncCollection, SyncKey,
    UnsyncedRecord, VersionSelector,
};

const DEFAULT_MAP_SIZE: usize = 256 * 1024 * 1024;
const MAX_DBS: u32 = 8;
const EVENT_CHANNEL_CAPACITY: usize = 64;
const KEY_SEPARATOR: char = '\u{0}';

const META_ACTION_SEQ: &str = "action_seq";
const META_LAST_SYNC_AT: &str = "last_sync_at";

/// Notifications emitted after a store transaction commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    BundleCached { manual_id: String, version: String },
    Cleared,
}

struct StoreEnv {
    env: Environment,
    bundles: Database,
    annotations: Database,
    sessions: Database,
    actions: Database,
    meta: Database,
    responses: Database,
}

impl StoreEnv {
    fn open(dir: &Path, map_size: usize) -> StoreResult<Self> {
        std::fs::create_dir_all(dir)?;

        let env = Environment::new()
            .set_flags(EnvironmentFlags::NO_TLS)
            .set_max_dbs(MAX_DBS)
            .set_map_size(map_size)
            .open(dir)?;

        let bundles = env.create_db(Some("bundles"), DatabaseFlags::empty())?;
        let annotations = env.create_db(Some("annotations"), DatabaseFlags::empty())?;
        let sessions = env.create_db(Some("sessions"), DatabaseFlags::empty())?;
        let actions = env.create_db(Some("actions"), DatabaseFlags::empty())?;
        let meta = env.create_db(Some("meta"), DatabaseFlags::empty())?;
        let responses = env.create_db(Some("responses"), DatabaseFlags::empty())?;

        Ok(Self {
            env,
            bundles,
            annotations,
            sessions,
            actions,
            meta,
            responses,
        })
    }
}

fn compound_key(first: &str, second: &str) -> String {
    format!("{first}{KEY_SEPARATOR}{second}")
}

fn read_json<T, Txn>(txn: &Txn, db: Database, key: &[u8]) -> StoreResult<Option<T>>
where
    T: DeserializeOwned,
    Txn: Transaction,
{
    match txn.get(db, &key) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_json<T: Serialize>(
    txn: &mut RwTransaction<'_>,
    db: Database,
    key: &[u8],
    value: &T,
) -> StoreResult<()> {
    let bytes = serde_json::to_vec(value)?;
    txn.put(db, &key, &bytes, WriteFlags::empty())?;
    Ok(())
}

/// Deserializes every value whose key starts with `prefix`, in key order.
///
/// An empty database or a prefix sorting after every key yields nothing.
fn scan_prefix<T, Txn>(txn: &Txn, db: Database, prefix: &[u8]) -> StoreResult<Vec<T>>
where
    T: DeserializeOwned,
    Txn: Transaction,
{
    if prefix.is_empty() {
        return scan_all(txn, db);
    }

    let cursor = txn.open_ro_cursor(db)?;
    let mut records = Vec::new();
    let mut entry = cursor_step(cursor.get(Some(prefix), None, MDB_SET_RANGE))?;
    while let Some((key, value)) = entry {
        if !key.starts_with(prefix) {
            break;
        }
        records.push(serde_json::from_slice(value)?);
        entry = cursor_step(cursor.get(None, None, MDB_NEXT))?;
    }
    Ok(records)
}

/// Maps a positioned cursor read to `Some((key, value))`, end of data to `None`.
fn cursor_step<'txn>(
    result: lmdb::Result<(Option<&'txn [u8]>, &'txn [u8])>,
) -> StoreResult<Option<(&'txn [u8], &'txn [u8])>> {
    match result {
        Ok((key, value)) => Ok(Some((key.unwrap_or_default(), value))),
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn scan_all<T, Txn>(txn: &Txn, db: Database) -> StoreResult<Vec<T>>
where
    T: DeserializeOwned,
    Txn: Transaction,
{
    let mut cursor = txn.open_ro_cursor(db)?;
    let mut records = Vec::new();
    // `iter` starts from an unpositioned cursor, so an empty db yields nothing.
    for (_, value) in cursor.iter() {
        records.push(serde_json::from_slice(value)?);
    }
    Ok(records)
}

fn delete_all(txn: &mut RwTransaction<'_>, db: Database) -> StoreResult<usize> {
    let keys: Vec<Vec<u8>> = {
        let mut cursor = txn.open_ro_cursor(db)?;
        cursor.iter().map(|(key, _)| key.to_vec()).collect()
    };

    for key in &keys {
        txn.del(db, key, None)?;
    }
    Ok(keys.len())
}

fn resolve_bundle<Txn: Transaction>(
    txn: &Txn,
    db: Database,
    manual_id: &str,
    version: &VersionSelector,
) -> StoreResult<Option<ManualBundle>> {
    match version {
        VersionSelector::Exact(version) => {
            read_json(txn, db, compound_key(manual_id, version).as_bytes())
        }
        VersionSelector::Latest => {
            let prefix = compound_key(manual_id, "");
            let candidates: Vec<ManualBundle> = scan_prefix(txn, db, prefix.as_bytes())?;
            Ok(candidates.into_iter().max_by_key(|bundle| bundle.cached_at))
        }
    }
}

/// Handle to the client's local store.
///
/// Cloning is cheap; every clone talks to the same LMDB environment. A store
/// that failed to open stays usable in degraded mode: reads report "not
/// cached" and writes return [`StoreError::Unavailable`].
#[derive(Clone)]
pub struct LocalStore {
    inner: Option<Arc<StoreEnv>>,
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    bundle_ttl: chrono::Duration,
    events: broadcast::Sender<StoreEvent>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("path", &self.path)
            .field("available", &self.is_available())
            .field("bundle_ttl", &self.bundle_ttl)
            .finish()
    }
}

impl LocalStore {
    /// Opens (or creates) the store in `<name>.lmdb` with default settings.
    pub fn init(name: impl AsRef<str>) -> StoreResult<Self> {
        Self::open_with(
            name,
            DEFAULT_MAP_SIZE,
            chrono::Duration::seconds(DEFAULT_BUNDLE_TTL_SECS),
            Arc::new(SystemClock),
        )
    }

    pub fn open_with(
        name: impl AsRef<str>,
        map_size: usize,
        bundle_ttl: chrono::Duration,
        clock: Arc<dyn Clock>,
    ) -> StoreResult<Self> {
        let dir = PathBuf::from(format!("{}.lmdb", name.as_ref()));
        info!("Opening local store at: {}", dir.display());

        let env = StoreEnv::open(&dir, map_size)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Some(Arc::new(env)),
            path: Some(dir),
            clock,
            bundle_ttl,
            events,
        })
    }

    pub fn from_config(config: &EngineConfig, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        Self::open_with(
            &config.store_path,
            config.map_size_bytes,
            config.bundle_ttl(),
            clock,
        )
    }

    /// Opens the store, falling back to degraded mode when LMDB cannot start.
    pub fn open_or_degraded(config: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        match Self::from_config(config, Arc::clone(&clock)) {
            Ok(store) => store,
            Err(e) => {
                warn!("Local store failed to initialize, running without cache: {e}");
                Self::unavailable(config.bundle_ttl(), clock)
            }
        }
    }

    /// A store with no backing environment.
    pub fn unavailable(bundle_ttl: chrono::Duration, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: None,
            path: None,
            clock,
            bundle_ttl,
            events,
        }
    }

    pub fn is_available(&self) -> bool {
        self.inner.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Handle to the router's response cache inside the same environment.
    pub fn response_cache(&self) -> ResponseCache {
        ResponseCache {
            inner: self.inner.clone(),
        }
    }

    async fn run<F, T>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&StoreEnv) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let env = self.inner.clone().ok_or(StoreError::Unavailable)?;
        run_blocking(env, op).await
    }

    /// Like [`run`](Self::run) but a missing environment yields `T::default()`.
    async fn read<F, T>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&StoreEnv) -> StoreResult<T> + Send + 'static,
        T: Default + Send + 'static,
    {
        match self.inner.clone() {
            Some(env) => run_blocking(env, op).await,
            None => Ok(T::default()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Bundles
    // ─────────────────────────────────────────────────────────────────────

    /// Existence check only; an expired bundle still counts as cached.
    pub async fn is_bundle_cached(
        &self,
        manual_id: &str,
        version: impl Into<VersionSelector>,
    ) -> StoreResult<bool> {
        let manual_id = manual_id.to_string();
        let version = version.into();
        self.read(move |s| {
            let txn = s.env.begin_ro_txn()?;
            Ok(resolve_bundle(&txn, s.bundles, &manual_id, &version)?.is_some())
        })
        .await
    }

    /// Upserts a bundle and notifies subscribers once the write is committed.
    pub async fn put_bundle(
        &self,
        manual_id: &str,
        version: &str,
        bundle_data: JsonValue,
    ) -> StoreResult<ManualBundle> {
        let bundle = ManualBundle::new(
            manual_id,
            version,
            bundle_data,
            self.clock.now(),
            self.bundle_ttl,
        );
        let record = bundle.clone();

        self.run(move |s| {
            let mut txn = s.env.begin_rw_txn()?;
            let key = compound_key(&record.manual_id, &record.version);
            write_json(&mut txn, s.bundles, key.as_bytes(), &record)?;
            txn.commit()?;
            Ok(())
        })
        .await?;

        debug!(
            "Cached bundle {}@{} checksum={}",
            bundle.manual_id, bundle.version, bundle.checksum
        );
        let _ = self.events.send(StoreEvent::BundleCached {
            manual_id: bundle.manual_id.clone(),
            version: bundle.version.clone(),
        });
        Ok(bundle)
    }

    /// Returns the bundle payload, or `None` when absent or expired.
    pub async fn get_bundle(
        &self,
        manual_id: &str,
        version: impl Into<VersionSelector>,
    ) -> StoreResult<Option<JsonValue>> {
        let now = self.clock.now();
        Ok(self
            .get_bundle_record(manual_id, version)
            .await?
            .filter(|bundle| bundle.is_fresh(now))
            .map(|bundle| bundle.bundle_data))
    }

    /// Raw record lookup without the freshness filter.
    pub async fn get_bundle_record(
        &self,
        manual_id: &str,
        version: impl Into<VersionSelector>,
    ) -> StoreResult<Option<ManualBundle>> {
        let manual_id = manual_id.to_string();
        let version = version.into();
        self.read(move |s| {
            let txn = s.env.begin_ro_txn()?;
            resolve_bundle(&txn, s.bundles, &manual_id, &version)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Annotations
    // ─────────────────────────────────────────────────────────────────────

    pub async fn put_annotation(
        &self,
        manual_id: &str,
        payload: JsonValue,
    ) -> StoreResult<Annotation> {
        let annotation = Annotation::new(manual_id, payload, self.clock.now());
        let record = annotation.clone();
        self.run(move |s| {
            let mut txn = s.env.begin_rw_txn()?;
            write_json(&mut txn, s.annotations, record.id.as_bytes(), &record)?;
            txn.commit()?;
            Ok(())
        })
        .await?;
        Ok(annotation)
    }

    pub async fn annotations_for_manual(&self, manual_id: &str) -> StoreResult<Vec<Annotation>> {
        let manual_id = manual_id.to_string();
        self.read(move |s| {
            let txn = s.env.begin_ro_txn()?;
            let all: Vec<Annotation> = scan_all(&txn, s.annotations)?;
            Ok(all.into_iter().filter(|a| a.manual_id == manual_id).collect())
        })
        .await
    }

    pub async fn list_unsynced_annotations(&self) -> StoreResult<Vec<Annotation>> {
        self.read(|s| {
            let txn = s.env.begin_ro_txn()?;
            let all: Vec<Annotation> = scan_all(&txn, s.annotations)?;
            Ok(all.into_iter().filter(|a| !a.synced).collect())
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reading sessions
    // ─────────────────────────────────────────────────────────────────────

    /// Replaces the session for `(manual_id, user_id)` and flags it unsynced.
    ///
    /// Every write bumps the session revision.
    pub async fn put_session(
        &self,
        manual_id: &str,
        user_id: &str,
        payload: JsonValue,
    ) -> StoreResult<ReadingSession> {
        let mut session = ReadingSession {
            manual_id: manual_id.to_string(),
            user_id: user_id.to_string(),
            payload,
            last_accessed_at: self.clock.now(),
            synced: false,
            revision: 1,
        };
        self.run(move |s| {
            let mut txn = s.env.begin_rw_txn()?;
            let key = compound_key(&session.manual_id, &session.user_id);
            let previous: Option<ReadingSession> = read_json(&txn, s.sessions, key.as_bytes())?;
            if let Some(previous) = previous {
                session.revision = previous.revision.saturating_add(1);
            }
            write_json(&mut txn, s.sessions, key.as_bytes(), &session)?;
            txn.commit()?;
            Ok(session)
        })
        .await
    }

    pub async fn get_session(
        &self,
        manual_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<ReadingSession>> {
        let key = compound_key(manual_id, user_id);
        self.read(move |s| {
            let txn = s.env.begin_ro_txn()?;
            read_json(&txn, s.sessions, key.as_bytes())
        })
        .await
    }

    pub async fn list_unsynced_sessions(&self) -> StoreResult<Vec<ReadingSession>> {
        self.read(|s| {
            let txn = s.env.begin_ro_txn()?;
            let all: Vec<ReadingSession> = scan_all(&txn, s.sessions)?;
            Ok(all.into_iter().filter(|session| !session.synced).collect())
        })
        .await
    }

    /// All records with `synced == false` in one collection.
    pub async fn list_unsynced(&self, collection: SyncCollection) -> StoreResult<Vec<UnsyncedRecord>> {
        Ok(match collection {
            SyncCollection::Annotations => self
                .list_unsynced_annotations()
                .await?
                .into_iter()
                .map(UnsyncedRecord::Annotation)
                .collect(),
            SyncCollection::Sessions => self
                .list_unsynced_sessions()
                .await?
                .into_iter()
                .map(UnsyncedRecord::Session)
                .collect(),
        })
    }

    /// Flags a record synced. Returns `false` when the record does not exist
    /// or, for a session, when it was rewritten after the uploaded revision.
    ///
    /// Marking an already-synced record is a no-op and does not rewrite it.
    pub async fn mark_synced(&self, key: SyncKey) -> StoreResult<bool> {
        let now = self.clock.now();
        self.run(move |s| {
            let mut txn = s.env.begin_rw_txn()?;
            let found = match &key {
                SyncKey::Annotation(id) => {
                    match read_json::<Annotation, _>(&txn, s.annotations, id.as_bytes())? {
                        None => false,
                        Some(annotation) if annotation.synced => true,
                        Some(mut annotation) => {
                            annotation.synced = true;
                            annotation.synced_at = Some(now);
                            write_json(&mut txn, s.annotations, id.as_bytes(), &annotation)?;
                            true
                        }
                    }
                }
                SyncKey::Session {
                    manual_id,
                    user_id,
                    revision,
                } => {
                    let db_key = compound_key(manual_id, user_id);
                    match read_json::<ReadingSession, _>(&txn, s.sessions, db_key.as_bytes())? {
                        None => false,
                        Some(session) if session.revision != *revision => false,
                        Some(session) if session.synced => true,
                        Some(mut session) => {
                            session.synced = true;
                            write_json(&mut txn, s.sessions, db_key.as_bytes(), &session)?;
                            true
                        }
                    }
                }
            };
            txn.commit()?;
            Ok(found)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Action queue
    // ─────────────────────────────────────────────────────────────────────

    /// Appends an action; ids increase monotonically across the store's life.
    pub async fn enqueue_action(
        &self,
        action_type: impl Into<String>,
        data: JsonValue,
    ) -> StoreResult<QueuedAction> {
        let action_type = action_type.into();
        let created_at = self.clock.now();
        self.run(move |s| {
            let mut txn = s.env.begin_rw_txn()?;
            let last = match txn.get(s.meta, &META_ACTION_SEQ) {
                Ok(bytes) => decode_seq(bytes)?,
                Err(lmdb::Error::NotFound) => 0,
                Err(e) => return Err(e.into()),
            };
            let id = last + 1;
            txn.put(s.meta, &META_ACTION_SEQ, &id.to_be_bytes(), WriteFlags::empty())?;

            let action = QueuedAction {
                id,
                action_type,
                data,
                created_at,
                attempts: 0,
            };
            write_json(&mut txn, s.actions, &id.to_be_bytes(), &action)?;
            txn.commit()?;
            Ok(action)
        })
        .await
    }

    /// Removes an action after confirmed success. Returns whether it existed.
    pub async fn dequeue_action(&self, id: u64) -> StoreResult<bool> {
        self.run(move |s| {
            let mut txn = s.env.begin_rw_txn()?;
            match txn.del(s.actions, &id.to_be_bytes(), None) {
                Ok(()) => {
                    txn.commit()?;
                    Ok(true)
                }
                Err(lmdb::Error::NotFound) => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    /// Increments `attempts`, returning the new count.
    pub async fn bump_attempts(&self, id: u64) -> StoreResult<Option<u32>> {
        self.run(move |s| {
            let mut txn = s.env.begin_rw_txn()?;
            let key = id.to_be_bytes();
            let attempts = match read_json::<QueuedAction, _>(&txn, s.actions, &key)? {
                Some(mut action) => {
                    action.attempts = action.attempts.saturating_add(1);
                    write_json(&mut txn, s.actions, &key, &action)?;
                    Some(action.attempts)
                }
                None => None,
            };
            txn.commit()?;
            Ok(attempts)
        })
        .await
    }

    /// Queued actions in insertion order.
    pub async fn list_actions(&self) -> StoreResult<Vec<QueuedAction>> {
        self.read(|s| {
            let txn = s.env.begin_ro_txn()?;
            scan_all(&txn, s.actions)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────

    /// Wipes bundles, annotations, sessions, queued actions and cached API
    /// responses in one transaction. The action sequence survives, so ids are
    /// never reused.
    pub async fn clear_all(&self) -> StoreResult<()> {
        let removed = self
            .run(|s| {
                let mut txn = s.env.begin_rw_txn()?;
                let mut removed = 0;
                for db in [s.bundles, s.annotations, s.sessions, s.actions, s.responses] {
                    removed += delete_all(&mut txn, db)?;
                }
                txn.commit()?;
                Ok(removed)
            })
            .await?;

        info!("Local store cleared ({removed} records removed)");
        let _ = self.events.send(StoreEvent::Cleared);
        Ok(())
    }

    pub async fn record_sync_completed(&self, at: DateTime<Utc>) -> StoreResult<()> {
        self.run(move |s| {
            let mut txn = s.env.begin_rw_txn()?;
            write_json(&mut txn, s.meta, META_LAST_SYNC_AT.as_bytes(), &at)?;
            txn.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn cache_info(&self) -> StoreResult<CacheInfo> {
        self.read(|s| {
            let txn = s.env.begin_ro_txn()?;

            let mut manuals = HashSet::new();
            let mut total_cached_bytes = 0u64;
            {
                let mut cursor = txn.open_ro_cursor(s.bundles)?;
                for (key, value) in cursor.iter() {
                    let manual_id = key
                        .split(|b| *b == KEY_SEPARATOR as u8)
                        .next()
                        .unwrap_or_default();
                    manuals.insert(manual_id.to_vec());
                    total_cached_bytes += value.len() as u64;
                }
            }

            let annotation_count = {
                let mut cursor = txn.open_ro_cursor(s.annotations)?;
                cursor.iter().count()
            };

            let last_sync_at = read_json(&txn, s.meta, META_LAST_SYNC_AT.as_bytes())?;

            Ok(CacheInfo {
                cached_manuals: manuals.len(),
                total_cached_bytes,
                annotation_count,
                last_sync_at,
            })
        })
        .await
    }
}

fn decode_seq(bytes: &[u8]) -> StoreResult<u64> {
    let buf: [u8; 8] = bytes.try_into().map_err(|_| {
        StoreError::Corrupt(format!(
            "action sequence is {} bytes, expected 8",
            bytes.len()
        ))
    })?;
    Ok(u64::from_be_bytes(buf))
}

async fn run_blocking<F, T>(env: Arc<StoreEnv>, op: F) -> StoreResult<T>
where
    F: FnOnce(&StoreEnv) -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || op(&env))
        .await
        .map_err(|e| StoreError::Blocking(format!("store task failed: {e}")))?
}

/// Persistent HTTP response cache owned by the request router.
///
/// Without a backing environment lookups miss and writes are dropped, which
/// leaves the router network-only.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Option<Arc<StoreEnv>>,
}

impl ResponseCache {
    pub fn is_available(&self) -> bool {
        self.inner.is_some()
    }

    pub async fn get<T>(&self, key: &str) -> StoreResult<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let Some(env) = self.inner.clone() else {
            return Ok(None);
        };
        let key = key.to_string();
        run_blocking(env, move |s| {
            let txn = s.env.begin_ro_txn()?;
            read_json(&txn, s.responses, key.as_bytes())
        })
        .await
    }

    pub async fn put<T>(&self, key: &str, value: &T) -> StoreResult<()>
    where
        T: Serialize,
    {
        let Some(env) = self.inner.clone() else {
            return Ok(());
        };
        let key = key.to_string();
        let bytes = serde_json::to_vec(value)?;
        run_blocking(env, move |s| {
            let mut txn = s.env.begin_rw_txn()?;
            txn.put(s.responses, &key, &bytes, WriteFlags::empty())?;
            txn.commit()?;
            Ok(())
        })
        .await
    }
}
