//! Optimistic sync engine.
//!
//! Generic create/update/delete over every registered collection. A call
//! applies the mutation to the in-memory state synchronously, persists the
//! whole collection to the cache, and only then pushes the equivalent
//! remote call from a background task. The caller never waits on the
//! network and never sees a remote failure; a failed push lands in the
//! diagnostics sync log and the optimistic local state is kept as-is.
//!
//! When the remote assigns its own primary key on insert, the local record
//! is patched to the server id once the push completes, so later updates
//! address the row the backend actually stored.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::registry::{self, Entity};
use crate::store::PosStore;

/// Insert a row at the front of its collection and push it to the remote.
pub fn create<T: Entity>(store: &Arc<PosStore>, row: T) -> T {
    {
        let mut state = store.state();
        T::rows_mut(&mut state).insert(0, row.clone());
        store.persist_collection::<T>(&state);
    }
    debug!(table = T::KIND.remote_table(), id = row.id(), "created");
    push_insert(store, row.clone());
    row
}

/// Apply `patch` to the row with the given id. Returns `false` when no
/// such row exists; nothing is pushed in that case.
pub fn update<T: Entity>(store: &Arc<PosStore>, id: &str, patch: impl FnOnce(&mut T)) -> bool {
    let updated = {
        let mut state = store.state();
        let row = T::rows_mut(&mut state).iter_mut().find(|r| r.id() == id);
        match row {
            Some(row) => {
                patch(row);
                let snapshot = row.clone();
                store.persist_collection::<T>(&state);
                Some(snapshot)
            }
            None => None,
        }
    };
    match updated {
        Some(row) => {
            push_update(store, row);
            true
        }
        None => false,
    }
}

/// Remove the row with the given id. Returns `false` when absent.
pub fn delete<T: Entity>(store: &Arc<PosStore>, id: &str) -> bool {
    let removed = {
        let mut state = store.state();
        let rows = T::rows_mut(&mut state);
        let before = rows.len();
        rows.retain(|r| r.id() != id);
        let removed = rows.len() != before;
        if removed {
            store.persist_collection::<T>(&state);
        }
        removed
    };
    if removed {
        push_delete::<T>(store, id.to_string());
    }
    removed
}

// ---------------------------------------------------------------------------
// Background pushes
// ---------------------------------------------------------------------------

pub(crate) fn push_insert<T: Entity>(store: &Arc<PosStore>, row: T) {
    if !store.remote.is_enabled() {
        return;
    }
    let store = Arc::clone(store);
    tokio::spawn(async move {
        let table = T::KIND.remote_table();
        let payload = registry::to_remote_row(&row);
        match store.remote.insert_row(table, payload).await {
            Ok(stored) => {
                if let Some(server_id) = stored.get("id").and_then(Value::as_str) {
                    if server_id != row.id() {
                        adopt_server_id::<T>(&store, row.id(), server_id);
                    }
                }
            }
            Err(e) => store.sync_log.push(table, "insert", row.id(), &e),
        }
    });
}

/// Push the full row as the patch. The remote treats the row as
/// last-write-wins, so a superset patch is equivalent to the minimal one.
pub(crate) fn push_update<T: Entity>(store: &Arc<PosStore>, row: T) {
    if !store.remote.is_enabled() {
        return;
    }
    let store = Arc::clone(store);
    tokio::spawn(async move {
        let table = T::KIND.remote_table();
        let payload = registry::to_remote_row(&row);
        if let Err(e) = store.remote.update_row(table, row.id(), payload).await {
            store.sync_log.push(table, "update", row.id(), &e);
        }
    });
}

pub(crate) fn push_delete<T: Entity>(store: &Arc<PosStore>, id: String) {
    if !store.remote.is_enabled() {
        return;
    }
    let store = Arc::clone(store);
    tokio::spawn(async move {
        let table = T::KIND.remote_table();
        if let Err(e) = store.remote.delete_row(table, &id).await {
            store.sync_log.push(table, "delete", &id, &e);
        }
    });
}

fn adopt_server_id<T: Entity>(store: &PosStore, local_id: &str, server_id: &str) {
    let mut state = store.state();
    if let Some(row) = T::rows_mut(&mut state)
        .iter_mut()
        .find(|r| r.id() == local_id)
    {
        row.set_id(server_id.to_string());
        store.persist_collection::<T>(&state);
        info!(
            table = T::KIND.remote_table(),
            local_id,
            server_id,
            "adopted server-assigned id"
        );
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{open_empty, seed_stock};
    use crate::types::StockItem;

    #[test]
    fn create_prepends_and_persists() {
        let store = open_empty();
        sync_create_two(&store);

        let rows = store.snapshot::<StockItem>();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "s2");

        // The cache holds the same collection.
        let cached = store.cache.read_collection("pos_inventory").unwrap();
        let cached: Vec<StockItem> = serde_json::from_str(&cached).unwrap();
        assert_eq!(cached, rows);
    }

    #[test]
    fn update_patches_in_place() {
        let store = open_empty();
        sync_create_two(&store);

        let found = update::<StockItem>(&store, "s1", |item| item.current_quantity = 42.0);
        assert!(found);
        let rows = store.snapshot::<StockItem>();
        assert_eq!(
            rows.iter().find(|r| r.id == "s1").map(|r| r.current_quantity),
            Some(42.0)
        );

        assert!(!update::<StockItem>(&store, "missing", |item| {
            item.current_quantity = 0.0
        }));
    }

    #[test]
    fn delete_removes_and_reports_absence() {
        let store = open_empty();
        sync_create_two(&store);

        assert!(delete::<StockItem>(&store, "s1"));
        assert!(!delete::<StockItem>(&store, "s1"));
        assert_eq!(store.snapshot::<StockItem>().len(), 1);
    }

    #[test]
    fn offline_mutations_log_no_failures() {
        let store = open_empty();
        sync_create_two(&store);
        assert!(store.sync_log.is_empty());
    }

    fn sync_create_two(store: &std::sync::Arc<crate::store::PosStore>) {
        create(store, seed_stock("s1", "Rice", 1000.0, 100.0));
        create(store, seed_stock("s2", "Chicken", 50.0, 10.0));
    }
}
