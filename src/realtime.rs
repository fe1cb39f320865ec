//! Realtime reconciler.
//!
//! One background task per collection long-polls the remote change feed
//! and merges row-level events into the in-memory state in receipt order.
//! The merge is deliberately simple last-write-wins at row granularity:
//! an insert is ignored when the primary key already exists locally (the
//! optimistic create of this terminal echoing back), an update replaces
//! the whole row, a delete removes it. Feed cursors are persisted so a
//! restart resumes where the previous session stopped.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::registry::{self, Entity};
use crate::remote::{ChangeEvent, ChangeKind};
use crate::store::PosStore;
use crate::types::*;

/// Delay before re-polling after an empty batch.
const POLL_IDLE: Duration = Duration::from_secs(2);

/// Backoff after a failed poll.
const POLL_BACKOFF: Duration = Duration::from_secs(10);

const CURSOR_CATEGORY: &str = "realtime";

/// Merge one change event into its collection.
pub fn apply_change<T: Entity>(store: &Arc<PosStore>, event: &ChangeEvent) {
    let Some(row) = registry::from_remote_row::<T>(&event.row) else {
        return;
    };

    let mut state = store.state();
    let rows = T::rows_mut(&mut state);
    match event.kind {
        ChangeKind::Insert => {
            if rows.iter().any(|r| r.id() == row.id()) {
                debug!(
                    table = T::KIND.remote_table(),
                    id = row.id(),
                    "insert echo ignored"
                );
                return;
            }
            rows.insert(0, row);
        }
        ChangeKind::Update => {
            let Some(slot) = rows.iter_mut().find(|r| r.id() == row.id()) else {
                debug!(
                    table = T::KIND.remote_table(),
                    id = row.id(),
                    "update for unknown row ignored"
                );
                return;
            };
            *slot = row;
        }
        ChangeKind::Delete => {
            let before = rows.len();
            rows.retain(|r| r.id() != row.id());
            if rows.len() == before {
                return;
            }
        }
    }
    store.persist_collection::<T>(&state);
}

/// Start one feed task per collection. Called once after init when the
/// backend is reachable.
pub fn spawn_feeds(store: &Arc<PosStore>) {
    spawn_feed::<StockItem>(store);
    spawn_feed::<InventoryLog>(store);
    spawn_feed::<Order>(store);
    spawn_feed::<OrderHistoryItem>(store);
    spawn_feed::<VoidRefundRequest>(store);
    spawn_feed::<Recipe>(store);
    spawn_feed::<ModifierOption>(store);
    spawn_feed::<MenuItem>(store);
    spawn_feed::<Customer>(store);
    spawn_feed::<CashRegister>(store);
    spawn_feed::<DailyCashFlow>(store);
    spawn_feed::<StaffProfile>(store);
    spawn_feed::<StaffKpi>(store);
    spawn_feed::<Supplier>(store);
    spawn_feed::<PurchaseOrder>(store);
    spawn_feed::<Expense>(store);
}

fn spawn_feed<T: Entity>(store: &Arc<PosStore>) {
    let store = Arc::clone(store);
    tokio::spawn(async move {
        let table = T::KIND.remote_table();
        let cursor_key = T::KIND.cache_key();
        let mut cursor = store
            .cache
            .get_setting(CURSOR_CATEGORY, cursor_key)
            .unwrap_or_default();

        loop {
            match store.remote.poll_changes(table, &cursor).await {
                Ok(batch) => {
                    for event in &batch.events {
                        apply_change::<T>(&store, event);
                    }
                    if batch.cursor != cursor {
                        cursor = batch.cursor;
                        if let Err(e) = store.cache.set_setting(CURSOR_CATEGORY, cursor_key, &cursor)
                        {
                            warn!(table, error = %e, "failed to persist feed cursor");
                        }
                    }
                    if batch.events.is_empty() {
                        tokio::time::sleep(POLL_IDLE).await;
                    }
                }
                Err(e) => {
                    warn!(table, error = %e, "change feed poll failed");
                    tokio::time::sleep(POLL_BACKOFF).await;
                }
            }
        }
    });
}

// ===========================================================================
// Tests
// ===========================================================================
