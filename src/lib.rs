//! # Offline Manuals Core
//!
//! Offline-first sync and optimistic-concurrency engine for regulated manuals.
//! Field technicians keep reading, annotating and queueing actions without a
//! connection; everything written locally is pushed to the server once
//! connectivity returns, and section edits are guarded by version tokens so
//! concurrent edits are detected instead of silently overwritten.
//!
//! ## Components
//!
//! - [`LocalStore`]: LMDB-backed collections for manual bundles, annotations,
//!   reading sessions and the action queue
//! - [`RequestRouter`]: background task serving reads with per-resource caching
//!   strategies and synthetic offline responses
//! - [`SyncOrchestrator`]: single-flight drain of unsynced records
//! - [`ConcurrencyController`]: `If-Match` guarded section saves
//! - [`OfflineEngine`]: wires all of the above from one [`EngineConfig`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use offline_manuals_core::{EngineConfig, OfflineEngine};
//!
//! # async fn run() -> Result<(), offline_manuals_core::AppResponse> {
//! let engine = OfflineEngine::start(EngineConfig::default())?;
//! engine.download_for_offline("mx-200", "latest").await?;
//! let report = engine.force_sync().await;
//! println!("pushed {} records", report.pushed());
//! # Ok(())
//! # }
//! ```
//!
//! ## FFI Functions
//!
//! UI hosts without a Rust runtime use the C surface to read the cache and
//! record offline work; every call returns an [`AppResponse`] serialized as
//! JSON. Syncing, routing and guarded section saves need the async
//! [`OfflineEngine`], which pushes whatever these calls wrote once it runs.
//!
//! - [`create_store`] - Open the local store
//! - [`get_cache_info`] - Cached manuals, bytes, annotations and last sync time
//! - [`is_bundle_cached`] - Existence check for a manual version
//! - [`get_bundle`] - Bundle payload while it is still fresh
//! - [`put_annotation`] - Record an annotation for the next sync
//! - [`enqueue_action`] - Queue an action for the next sync
//! - [`clear_cache`] - Wipe all local collections
//! - [`close_store`] - Release the store
//! - [`free_response`] - Release a returned string

pub mod api_client;
pub mod app_response;
pub mod clock;
pub mod concurrency;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod local_db_model;
pub mod local_db_state;
pub mod request_router;
pub mod sync_orchestrator;
pub mod transport;
mod test;

pub use crate::app_response::AppResponse;
pub use crate::concurrency::{ConcurrencyController, EditSession, EditState, SaveOutcome};
pub use crate::config::EngineConfig;
pub use crate::connectivity::{Connectivity, ConnectivityMonitor};
pub use crate::engine::OfflineEngine;
pub use crate::local_db_model::{CacheInfo, VersionSelector};
pub use crate::local_db_state::LocalStore;
pub use crate::request_router::{RequestRouter, RouteResponse, RouterHandle};
pub use crate::sync_orchestrator::{SyncOrchestrator, SyncReport};

use std::ffi::{CStr, CString};
use std::future::Future;
use std::os::raw::c_char;

use log::{info, warn};
use tokio::runtime::Runtime;

/// Store handle owned by an FFI host.
pub struct StoreHandle {
    store: LocalStore,
    runtime: Runtime,
}

impl StoreHandle {
    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

/// Opens (or creates) the local store named `name`.
///
/// # Parameters
///
/// * `name` - Store name; the LMDB environment lives in `<name>.lmdb`
///
/// # Returns
///
/// A pointer to the [`StoreHandle`], or null when the name is invalid or the
/// store cannot be opened. Release it with [`close_store`].
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use offline_manuals_core::create_store;
///
/// let name = CString::new("manuals_cache").unwrap();
/// let store = create_store(name.as_ptr());
/// assert!(!store.is_null());
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn create_store(name: *const c_char) -> *mut StoreHandle {
    if name.is_null() {
        warn!("Null name pointer passed to create_store");
        return std::ptr::null_mut();
    }

    let name_str = match unsafe { CStr::from_ptr(name).to_str() } {
        Ok(s) => s,
        Err(e) => {
            warn!("Invalid UTF-8 in name parameter: {e}");
            return std::ptr::null_mut();
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!("Failed to start runtime for store {name_str}: {e}");
            return std::ptr::null_mut();
        }
    };

    match LocalStore::init(name_str) {
        Ok(store) => {
            info!("Store {name_str} opened");
            Box::into_raw(Box::new(StoreHandle { store, runtime }))
        }
        Err(e) => {
            warn!("Failed to open store {name_str}: {e}");
            std::ptr::null_mut()
        }
    }
}

/// Reports what the store holds.
///
/// # Parameters
///
/// * `state` - Handle returned by [`create_store`]
///
/// # Returns
///
/// `Ok` with [`CacheInfo`] as camelCase JSON (`cachedManuals`,
/// `totalCachedBytes`, `annotationCount`, `lastSyncAt`), `BadRequest` for a
/// null handle or `DatabaseError` when LMDB fails.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::{CStr, CString};
/// use offline_manuals_core::{create_store, free_response, get_cache_info};
///
/// let name = CString::new("manuals_cache").unwrap();
/// let store = create_store(name.as_ptr());
/// let response = get_cache_info(store);
/// println!("{}", unsafe { CStr::from_ptr(response) }.to_str().unwrap());
/// free_response(response);
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_cache_info(state: *mut StoreHandle) -> *const c_char {
    let handle = match unsafe { state.as_ref() } {
        Some(h) => h,
        None => return response_to_c_string(&AppResponse::BadRequest("Null state pointer".to_string())),
    };

    let response = match handle.block_on(handle.store.cache_info()) {
        Ok(info) => json_response(&info),
        Err(e) => AppResponse::from(e),
    };
    response_to_c_string(&response)
}

/// Checks whether a manual version is on disk, expired or not.
///
/// # Parameters
///
/// * `state` - Handle returned by [`create_store`]
/// * `manual_id` - Manual identifier
/// * `version` - Exact version, or `"latest"` for the most recently cached one
///
/// # Returns
///
/// `Ok("true")` or `Ok("false")`; `BadRequest` for null or non UTF-8 arguments.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use offline_manuals_core::{create_store, free_response, is_bundle_cached};
///
/// let name = CString::new("manuals_cache").unwrap();
/// let store = create_store(name.as_ptr());
/// let manual = CString::new("mx-200").unwrap();
/// let latest = CString::new("latest").unwrap();
/// let response = is_bundle_cached(store, manual.as_ptr(), latest.as_ptr());
/// free_response(response);
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn is_bundle_cached(
    state: *mut StoreHandle,
    manual_id: *const c_char,
    version: *const c_char,
) -> *const c_char {
    let handle = match unsafe { state.as_ref() } {
        Some(h) => h,
        None => return response_to_c_string(&AppResponse::BadRequest("Null state pointer".to_string())),
    };
    let manual_id = match c_ptr_to_string(manual_id, "manual_id") {
        Ok(s) => s,
        Err(err) => return err,
    };
    let version = match c_ptr_to_string(version, "version") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let response = match handle.block_on(handle.store.is_bundle_cached(&manual_id, version.as_str())) {
        Ok(cached) => AppResponse::Ok(cached.to_string()),
        Err(e) => AppResponse::from(e),
    };
    response_to_c_string(&response)
}

/// Reads a cached bundle while it is still fresh.
///
/// # Parameters
///
/// * `state` - Handle returned by [`create_store`]
/// * `manual_id` - Manual identifier
/// * `version` - Exact version or `"latest"`
///
/// # Returns
///
/// `Ok` with the bundle JSON, or `NotFound` when it is absent or expired.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use offline_manuals_core::{create_store, free_response, get_bundle};
///
/// let name = CString::new("manuals_cache").unwrap();
/// let store = create_store(name.as_ptr());
/// let manual = CString::new("mx-200").unwrap();
/// let version = CString::new("4").unwrap();
/// let response = get_bundle(store, manual.as_ptr(), version.as_ptr());
/// free_response(response);
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_bundle(
    state: *mut StoreHandle,
    manual_id: *const c_char,
    version: *const c_char,
) -> *const c_char {
    let handle = match unsafe { state.as_ref() } {
        Some(h) => h,
        None => return response_to_c_string(&AppResponse::BadRequest("Null state pointer".to_string())),
    };
    let manual_id = match c_ptr_to_string(manual_id, "manual_id") {
        Ok(s) => s,
        Err(err) => return err,
    };
    let version = match c_ptr_to_string(version, "version") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let response = match handle.block_on(handle.store.get_bundle(&manual_id, version.as_str())) {
        Ok(Some(data)) => AppResponse::Ok(data.to_string()),
        Ok(None) => AppResponse::NotFound(format!("No fresh bundle for {manual_id}@{version}")),
        Err(e) => AppResponse::from(e),
    };
    response_to_c_string(&response)
}

/// Stores an annotation written while reading. It stays unsynced until an
/// [`OfflineEngine`] pass uploads it.
///
/// # Parameters
///
/// * `state` - Handle returned by [`create_store`]
/// * `manual_id` - Manual the annotation belongs to
/// * `payload_json` - Annotation body as a JSON document
///
/// # Returns
///
/// `Ok` with the stored annotation as JSON (including its generated `id`),
/// or `BadRequest` when `payload_json` is not valid JSON.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use offline_manuals_core::{create_store, free_response, put_annotation};
///
/// let name = CString::new("manuals_cache").unwrap();
/// let store = create_store(name.as_ptr());
/// let manual = CString::new("mx-200").unwrap();
/// let payload = CString::new(r#"{"kind":"highlight","block":"b1"}"#).unwrap();
/// let response = put_annotation(store, manual.as_ptr(), payload.as_ptr());
/// free_response(response);
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn put_annotation(
    state: *mut StoreHandle,
    manual_id: *const c_char,
    payload_json: *const c_char,
) -> *const c_char {
    let handle = match unsafe { state.as_ref() } {
        Some(h) => h,
        None => return response_to_c_string(&AppResponse::BadRequest("Null state pointer".to_string())),
    };
    let manual_id = match c_ptr_to_string(manual_id, "manual_id") {
        Ok(s) => s,
        Err(err) => return err,
    };
    let payload = match c_ptr_to_json(payload_json, "payload_json") {
        Ok(value) => value,
        Err(err) => return err,
    };

    let response = match handle.block_on(handle.store.put_annotation(&manual_id, payload)) {
        Ok(annotation) => json_response(&annotation),
        Err(e) => AppResponse::from(e),
    };
    response_to_c_string(&response)
}

/// Queues an action for the next sync pass.
///
/// # Parameters
///
/// * `state` - Handle returned by [`create_store`]
/// * `action_type` - `SUGGEST_EDIT`, `ANNOTATION` or `ACKNOWLEDGE`; other
///   types are accepted here and fail at dispatch time
/// * `data_json` - Action body as a JSON document
///
/// # Returns
///
/// `Ok` with the queued action as JSON (including its sequence `id`), or
/// `BadRequest` when `data_json` is not valid JSON.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use offline_manuals_core::{create_store, enqueue_action, free_response};
///
/// let name = CString::new("manuals_cache").unwrap();
/// let store = create_store(name.as_ptr());
/// let kind = CString::new("ACKNOWLEDGE").unwrap();
/// let data = CString::new(r#"{"blockId":"b1"}"#).unwrap();
/// let response = enqueue_action(store, kind.as_ptr(), data.as_ptr());
/// free_response(response);
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn enqueue_action(
    state: *mut StoreHandle,
    action_type: *const c_char,
    data_json: *const c_char,
) -> *const c_char {
    let handle = match unsafe { state.as_ref() } {
        Some(h) => h,
        None => return response_to_c_string(&AppResponse::BadRequest("Null state pointer".to_string())),
    };
    let action_type = match c_ptr_to_string(action_type, "action_type") {
        Ok(s) => s,
        Err(err) => return err,
    };
    let data = match c_ptr_to_json(data_json, "data_json") {
        Ok(value) => value,
        Err(err) => return err,
    };

    let response = match handle.block_on(handle.store.enqueue_action(action_type, data)) {
        Ok(action) => json_response(&action),
        Err(e) => AppResponse::from(e),
    };
    response_to_c_string(&response)
}

/// Wipes bundles, annotations, sessions, queued actions and cached API
/// responses.
///
/// # Parameters
///
/// * `state` - Handle returned by [`create_store`]
///
/// # Returns
///
/// `Ok("Cache cleared")`, or `DatabaseError` when the transaction fails.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use offline_manuals_core::{clear_cache, create_store, free_response};
///
/// let name = CString::new("manuals_cache").unwrap();
/// let store = create_store(name.as_ptr());
/// free_response(clear_cache(store));
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn clear_cache(state: *mut StoreHandle) -> *const c_char {
    let handle = match unsafe { state.as_ref() } {
        Some(h) => h,
        None => return response_to_c_string(&AppResponse::BadRequest("Null state pointer".to_string())),
    };

    let response = match handle.block_on(handle.store.clear_all()) {
        Ok(()) => AppResponse::success("Cache cleared"),
        Err(e) => AppResponse::from(e),
    };
    response_to_c_string(&response)
}

/// Releases a handle returned by [`create_store`].
///
/// # Parameters
///
/// * `state` - Handle to release; it must not be used afterwards
///
/// # Returns
///
/// `Ok("Store closed")`, or `BadRequest` for a null handle.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use offline_manuals_core::{close_store, create_store, free_response};
///
/// let name = CString::new("manuals_cache").unwrap();
/// let store = create_store(name.as_ptr());
/// free_response(close_store(store));
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn close_store(state: *mut StoreHandle) -> *const c_char {
    if state.is_null() {
        return response_to_c_string(&AppResponse::BadRequest("Null state pointer".to_string()));
    }

    let handle = unsafe { Box::from_raw(state) };
    let path = handle
        .store
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    drop(handle);
    info!("Store {path} closed");
    response_to_c_string(&AppResponse::success("Store closed"))
}

/// Releases a string returned by any function in this module.
///
/// # Parameters
///
/// * `ptr` - String returned by this library; null is ignored
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use offline_manuals_core::{create_store, free_response, get_cache_info};
///
/// let name = CString::new("manuals_cache").unwrap();
/// let store = create_store(name.as_ptr());
/// free_response(get_cache_info(store));
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn free_response(ptr: *const c_char) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(ptr as *mut c_char));
    }
}

fn json_response<T: serde::Serialize>(value: &T) -> AppResponse {
    match serde_json::to_string(value) {
        Ok(json) => AppResponse::Ok(json),
        Err(e) => AppResponse::from(e),
    }
}

/// Serializes `response` into a C string owned by the caller.
///
/// Returns null if serialization or C string creation fails.
fn response_to_c_string(response: &AppResponse) -> *const c_char {
    let json = match serde_json::to_string(response) {
        Ok(j) => j,
        Err(e) => {
            warn!("Error serializing response: {e}");
            return std::ptr::null();
        }
    };

    match CString::new(json) {
        Ok(c_str) => c_str.into_raw(),
        Err(e) => {
            warn!("Error creating CString: {e}");
            std::ptr::null()
        }
    }
}

/// Converts a C string argument, or returns the error response to hand back.
fn c_ptr_to_string(ptr: *const c_char, field_name: &str) -> Result<String, *const c_char> {
    if ptr.is_null() {
        let error = AppResponse::BadRequest(format!("Null {field_name} pointer"));
        return Err(response_to_c_string(&error));
    }

    match unsafe { CStr::from_ptr(ptr).to_str() } {
        Ok(s) => Ok(s.to_string()),
        Err(e) => {
            let error = AppResponse::BadRequest(format!("Invalid UTF-8 in {field_name}: {e}"));
            Err(response_to_c_string(&error))
        }
    }
}

/// Parses a JSON C string argument, or returns the error response to hand back.
fn c_ptr_to_json(ptr: *const c_char, field_name: &str) -> Result<serde_json::Value, *const c_char> {
    let raw = c_ptr_to_string(ptr, field_name)?;
    serde_json::from_str(&raw).map_err(|e| {
        let error = AppResponse::BadRequest(format!("Invalid JSON in {field_name}: {e}"));
        response_to_c_string(&error)
    })
}
