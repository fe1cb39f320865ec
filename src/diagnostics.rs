//! Session diagnostics.
//!
//! Two observability surfaces live here: the startup source snapshot
//! (which data source won each collection, taken once by the resolver) and
//! a bounded ring buffer of remote sync failures. Neither feeds back into
//! behavior; both exist so a support call can answer "why is this terminal
//! showing stale data" without attaching a debugger.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::registry::EntityKind;
use crate::resolver::DataSource;
use crate::types::now_rfc3339;

/// Failures kept before the oldest is dropped.
const SYNC_LOG_CAPACITY: usize = 50;

// ---------------------------------------------------------------------------
// Source snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceInfo {
    /// Collection cache key to winning source, one entry per collection.
    pub sources: Vec<(&'static str, DataSource)>,
    pub remote_connected: bool,
    pub loaded_at: String,
}

impl DataSourceInfo {
    pub fn new(remote_connected: bool) -> DataSourceInfo {
        DataSourceInfo {
            sources: Vec::with_capacity(EntityKind::ALL.len()),
            remote_connected,
            loaded_at: now_rfc3339(),
        }
    }

    pub fn record(&mut self, kind: EntityKind, source: DataSource) {
        self.sources.push((kind.cache_key(), source));
    }

    pub fn source_for(&self, kind: EntityKind) -> Option<DataSource> {
        self.sources
            .iter()
            .find(|(key, _)| *key == kind.cache_key())
            .map(|(_, source)| *source)
    }
}

// ---------------------------------------------------------------------------
// Sync failure log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    pub table: &'static str,
    /// Which push failed: "insert", "update" or "delete".
    pub operation: &'static str,
    pub entity_id: String,
    pub error: String,
    pub at: String,
}

/// Bounded, newest-last log of remote push failures. Failures land here
/// and nowhere else; the optimistic local write they belong to has already
/// been applied and is never rolled back.
pub struct SyncLog {
    entries: Mutex<VecDeque<SyncFailure>>,
}

impl Default for SyncLog {
    fn default() -> SyncLog {
        SyncLog {
            entries: Mutex::new(VecDeque::with_capacity(SYNC_LOG_CAPACITY)),
        }
    }
}

impl SyncLog {
    pub fn push(&self, table: &'static str, operation: &'static str, entity_id: &str, error: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == SYNC_LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(SyncFailure {
            table,
            operation,
            entity_id: entity_id.to_string(),
            error: error.to_string(),
            at: now_rfc3339(),
        });
    }

    pub fn recent(&self) -> Vec<SyncFailure> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One JSON blob with everything a support ticket needs.
pub fn health_snapshot(info: &DataSourceInfo, sync_log: &SyncLog) -> Value {
    let sources: Vec<Value> = info
        .sources
        .iter()
        .map(|(key, source)| json!({ "collection": key, "source": source }))
        .collect();
    json!({
        "remoteConnected": info.remote_connected,
        "loadedAt": info.loaded_at,
        "sources": sources,
        "recentSyncFailures": sync_log.recent(),
    })
}

// ===========================================================================
// Tests
// ===========================================================================
