//! The in-memory store that owns every collection for the session.
//!
//! A [`PosStore`] is built once at startup: the source resolver fills each
//! collection from remote, cache or seed data, and from then on the
//! in-memory state is the single source of truth. Every mutation goes
//! through the engines layered on top (sync, orders, inventory, ...), which
//! persist the touched collections back to the cache wholesale and push
//! the change to the remote backend in the background.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use crate::cache::CacheState;
use crate::diagnostics::{self, DataSourceInfo, SyncFailure, SyncLog};
use crate::notify::Notifier;
use crate::realtime;
use crate::registry::Entity;
use crate::remote::RemoteClient;
use crate::resolver;
use crate::types::*;

/// Everything the store keeps in memory. Collections are ordered
/// newest-first; engines insert at the front.
#[derive(Debug, Default)]
pub struct StoreState {
    pub inventory: Vec<StockItem>,
    pub inventory_logs: Vec<InventoryLog>,
    pub orders: Vec<Order>,
    pub order_history: Vec<OrderHistoryItem>,
    pub void_refund_requests: Vec<VoidRefundRequest>,
    pub recipes: Vec<Recipe>,
    pub modifier_options: Vec<ModifierOption>,
    pub menu_items: Vec<MenuItem>,
    pub customers: Vec<Customer>,
    pub cash_registers: Vec<CashRegister>,
    pub cash_flows: Vec<DailyCashFlow>,
    pub staff: Vec<StaffProfile>,
    pub staff_kpi: Vec<StaffKpi>,
    pub suppliers: Vec<Supplier>,
    pub purchase_orders: Vec<PurchaseOrder>,
    pub expenses: Vec<Expense>,
}

/// First-run fixtures, applied per collection only when neither the remote
/// nor the cache has ever held that collection.
#[derive(Debug, Default)]
pub struct SeedData {
    pub inventory: Vec<StockItem>,
    pub inventory_logs: Vec<InventoryLog>,
    pub orders: Vec<Order>,
    pub order_history: Vec<OrderHistoryItem>,
    pub void_refund_requests: Vec<VoidRefundRequest>,
    pub recipes: Vec<Recipe>,
    pub modifier_options: Vec<ModifierOption>,
    pub menu_items: Vec<MenuItem>,
    pub customers: Vec<Customer>,
    pub cash_registers: Vec<CashRegister>,
    pub cash_flows: Vec<DailyCashFlow>,
    pub staff: Vec<StaffProfile>,
    pub staff_kpi: Vec<StaffKpi>,
    pub suppliers: Vec<Supplier>,
    pub purchase_orders: Vec<PurchaseOrder>,
    pub expenses: Vec<Expense>,
}

pub struct PosStore {
    pub(crate) state: Mutex<StoreState>,
    pub(crate) cache: CacheState,
    pub(crate) remote: RemoteClient,
    pub(crate) notifier: Notifier,
    pub(crate) sync_log: SyncLog,
    diagnostics: DataSourceInfo,
}

impl PosStore {
    /// Full startup: probe the backend, resolve every collection, then
    /// start the realtime feeds when the backend is reachable.
    pub async fn init(
        cache: CacheState,
        remote: RemoteClient,
        notifier: Notifier,
        seeds: SeedData,
    ) -> Arc<PosStore> {
        let connected = if remote.is_enabled() {
            let probe = remote.check_connectivity().await;
            if let Some(err) = &probe.error {
                warn!(error = %err, "connectivity probe failed, starting offline");
            }
            probe.success
        } else {
            false
        };

        let mut state = StoreState::default();
        let mut info = DataSourceInfo::new(connected);

        load::<StockItem>(&cache, &remote, connected, seeds.inventory, &mut state, &mut info).await;
        load::<InventoryLog>(&cache, &remote, connected, seeds.inventory_logs, &mut state, &mut info).await;
        load::<Order>(&cache, &remote, connected, seeds.orders, &mut state, &mut info).await;
        load::<OrderHistoryItem>(&cache, &remote, connected, seeds.order_history, &mut state, &mut info).await;
        load::<VoidRefundRequest>(&cache, &remote, connected, seeds.void_refund_requests, &mut state, &mut info).await;
        load::<Recipe>(&cache, &remote, connected, seeds.recipes, &mut state, &mut info).await;
        load::<ModifierOption>(&cache, &remote, connected, seeds.modifier_options, &mut state, &mut info).await;
        load::<MenuItem>(&cache, &remote, connected, seeds.menu_items, &mut state, &mut info).await;
        load::<Customer>(&cache, &remote, connected, seeds.customers, &mut state, &mut info).await;
        load::<CashRegister>(&cache, &remote, connected, seeds.cash_registers, &mut state, &mut info).await;
        load::<DailyCashFlow>(&cache, &remote, connected, seeds.cash_flows, &mut state, &mut info).await;
        load::<StaffProfile>(&cache, &remote, connected, seeds.staff, &mut state, &mut info).await;
        load::<StaffKpi>(&cache, &remote, connected, seeds.staff_kpi, &mut state, &mut info).await;
        load::<Supplier>(&cache, &remote, connected, seeds.suppliers, &mut state, &mut info).await;
        load::<PurchaseOrder>(&cache, &remote, connected, seeds.purchase_orders, &mut state, &mut info).await;
        load::<Expense>(&cache, &remote, connected, seeds.expenses, &mut state, &mut info).await;

        info!(
            remote_connected = connected,
            collections = info.sources.len(),
            "store initialized"
        );

        let store = Arc::new(PosStore {
            state: Mutex::new(state),
            cache,
            remote,
            notifier,
            sync_log: SyncLog::default(),
            diagnostics: info,
        });

        if connected {
            realtime::spawn_feeds(&store);
        }

        store
    }

    /// Synchronous local-only startup for terminals without a backend and
    /// for tests. No probe, no pushes, no realtime feeds.
    pub fn open_offline(cache: CacheState, seeds: SeedData) -> Arc<PosStore> {
        let mut state = StoreState::default();
        let mut info = DataSourceInfo::new(false);

        load_local::<StockItem>(&cache, seeds.inventory, &mut state, &mut info);
        load_local::<InventoryLog>(&cache, seeds.inventory_logs, &mut state, &mut info);
        load_local::<Order>(&cache, seeds.orders, &mut state, &mut info);
        load_local::<OrderHistoryItem>(&cache, seeds.order_history, &mut state, &mut info);
        load_local::<VoidRefundRequest>(&cache, seeds.void_refund_requests, &mut state, &mut info);
        load_local::<Recipe>(&cache, seeds.recipes, &mut state, &mut info);
        load_local::<ModifierOption>(&cache, seeds.modifier_options, &mut state, &mut info);
        load_local::<MenuItem>(&cache, seeds.menu_items, &mut state, &mut info);
        load_local::<Customer>(&cache, seeds.customers, &mut state, &mut info);
        load_local::<CashRegister>(&cache, seeds.cash_registers, &mut state, &mut info);
        load_local::<DailyCashFlow>(&cache, seeds.cash_flows, &mut state, &mut info);
        load_local::<StaffProfile>(&cache, seeds.staff, &mut state, &mut info);
        load_local::<StaffKpi>(&cache, seeds.staff_kpi, &mut state, &mut info);
        load_local::<Supplier>(&cache, seeds.suppliers, &mut state, &mut info);
        load_local::<PurchaseOrder>(&cache, seeds.purchase_orders, &mut state, &mut info);
        load_local::<Expense>(&cache, seeds.expenses, &mut state, &mut info);

        info!("store initialized offline");

        Arc::new(PosStore {
            state: Mutex::new(state),
            cache,
            remote: RemoteClient::disabled(),
            notifier: Notifier::disabled(),
            sync_log: SyncLog::default(),
            diagnostics: info,
        })
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serialize one collection back to the cache. A cache write failure is
    /// logged and swallowed; the in-memory state stays authoritative.
    pub(crate) fn persist_collection<T: Entity>(&self, state: &StoreState) {
        let key = T::KIND.cache_key();
        match serde_json::to_string(T::rows(state)) {
            Ok(json) => {
                if let Err(e) = self.cache.write_collection(key, &json) {
                    warn!(collection = key, error = %e, "cache persist failed");
                }
            }
            Err(e) => warn!(collection = key, error = %e, "collection serialization failed"),
        }
    }

    /// Clone of a whole collection, for read-only consumers.
    pub fn snapshot<T: Entity>(&self) -> Vec<T> {
        T::rows(&self.state()).clone()
    }

    pub fn data_sources(&self) -> DataSourceInfo {
        self.diagnostics.clone()
    }

    pub fn recent_sync_failures(&self) -> Vec<SyncFailure> {
        self.sync_log.recent()
    }

    pub fn health_snapshot(&self) -> serde_json::Value {
        let counts = {
            let state = self.state();
            serde_json::json!({
                "pos_inventory": state.inventory.len(),
                "pos_inventory_logs": state.inventory_logs.len(),
                "pos_orders": state.orders.len(),
                "pos_order_history": state.order_history.len(),
                "pos_void_refund_requests": state.void_refund_requests.len(),
                "pos_recipes": state.recipes.len(),
                "pos_modifier_options": state.modifier_options.len(),
                "pos_menu_items": state.menu_items.len(),
                "pos_customers": state.customers.len(),
                "pos_cash_registers": state.cash_registers.len(),
                "pos_cash_flows": state.cash_flows.len(),
                "pos_staff": state.staff.len(),
                "pos_staff_kpi": state.staff_kpi.len(),
                "pos_suppliers": state.suppliers.len(),
                "pos_purchase_orders": state.purchase_orders.len(),
                "pos_expenses": state.expenses.len(),
            })
        };
        let mut snapshot = diagnostics::health_snapshot(&self.diagnostics, &self.sync_log);
        if let Some(map) = snapshot.as_object_mut() {
            map.insert("rowCounts".to_string(), counts);
        }
        snapshot
    }

    // ---------------------------------------------------------------------
    // Terminal settings
    // ---------------------------------------------------------------------

    pub fn order_number_prefix(&self) -> String {
        self.cache
            .get_setting("pos", "order_number_prefix")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "ORD".to_string())
    }

    pub fn set_order_number_prefix(&self, prefix: &str) {
        if let Err(e) = self
            .cache
            .set_setting("pos", "order_number_prefix", prefix.trim())
        {
            warn!(error = %e, "failed to persist order number prefix");
        }
    }
}

// ---------------------------------------------------------------------------
// Collection loading
// ---------------------------------------------------------------------------

fn cached_rows<T: Entity>(cache: &CacheState) -> Option<Vec<T>> {
    let raw = cache.read_collection(T::KIND.cache_key())?;
    match serde_json::from_str(&raw) {
        Ok(rows) => Some(rows),
        Err(e) => {
            warn!(collection = T::KIND.cache_key(), error = %e, "discarding unreadable cached collection");
            // Treat as written-but-empty so seeds still do not resurrect.
            Some(Vec::new())
        }
    }
}

async fn load<T: Entity>(
    cache: &CacheState,
    remote: &RemoteClient,
    connected: bool,
    seed: Vec<T>,
    state: &mut StoreState,
    info: &mut DataSourceInfo,
) {
    let remote_rows = if connected {
        match remote.fetch_rows(T::KIND.remote_table()).await {
            Ok(rows) => Some(
                rows.iter()
                    .filter_map(crate::registry::from_remote_row)
                    .collect::<Vec<T>>(),
            ),
            Err(e) => {
                warn!(table = T::KIND.remote_table(), error = %e, "remote fetch failed");
                None
            }
        }
    } else {
        None
    };

    let (rows, source) = resolver::resolve(remote_rows, cached_rows::<T>(cache), seed);
    info!(
        collection = T::KIND.cache_key(),
        source = ?source,
        rows = rows.len(),
        "collection resolved"
    );
    info.record(T::KIND, source);
    *T::rows_mut(state) = rows;
}

fn load_local<T: Entity>(
    cache: &CacheState,
    seed: Vec<T>,
    state: &mut StoreState,
    info: &mut DataSourceInfo,
) {
    let (rows, source) = resolver::resolve(None, cached_rows::<T>(cache), seed);
    info.record(T::KIND, source);
    *T::rows_mut(state) = rows;
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache;
    use crate::registry::EntityKind;
    use crate::resolver::DataSource;

    pub(crate) fn seed_stock(id: &str, name: &str, qty: f64, min: f64) -> StockItem {
        StockItem {
            id: id.to_string(),
            name: name.to_string(),
            category: "ingredients".to_string(),
            current_quantity: qty,
            min_quantity: min,
            unit: "g".to_string(),
            cost: 0.01,
            supplier: None,
            last_restock_date: None,
            updated_at: None,
        }
    }

    pub(crate) fn open_empty() -> Arc<PosStore> {
        PosStore::open_offline(cache::open_in_memory().unwrap(), SeedData::default())
    }

    #[test]
    fn first_run_uses_seeds() {
        let seeds = SeedData {
            inventory: vec![seed_stock("s1", "Rice", 1000.0, 100.0)],
            ..SeedData::default()
        };
        let store = PosStore::open_offline(cache::open_in_memory().unwrap(), seeds);

        assert_eq!(store.snapshot::<StockItem>().len(), 1);
        assert_eq!(
            store.data_sources().source_for(EntityKind::Inventory),
            Some(DataSource::Seed)
        );
        assert_eq!(
            store.data_sources().source_for(EntityKind::Orders),
            Some(DataSource::Empty)
        );
    }

    #[test]
    #[serial_test::serial]
    fn written_cache_beats_seeds_on_restart() {
        let dir = std::env::temp_dir().join(format!("pos-core-test-{}", uuid::Uuid::new_v4()));
        let seeds = || SeedData {
            inventory: vec![seed_stock("seed", "Rice", 1000.0, 100.0)],
            ..SeedData::default()
        };

        {
            let store = PosStore::open_offline(cache::init(&dir).unwrap(), seeds());
            let mut state = store.state();
            state.inventory.clear();
            store.persist_collection::<StockItem>(&state);
        }

        // Cache now holds a written empty array; the seed row must not
        // come back.
        let store = PosStore::open_offline(cache::init(&dir).unwrap(), seeds());
        assert!(store.snapshot::<StockItem>().is_empty());
        assert_eq!(
            store.data_sources().source_for(EntityKind::Inventory),
            Some(DataSource::Local)
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn health_snapshot_reports_row_counts() {
        let seeds = SeedData {
            inventory: vec![
                seed_stock("s1", "Rice", 1000.0, 100.0),
                seed_stock("s2", "Sugar", 500.0, 50.0),
            ],
            ..SeedData::default()
        };
        let store = PosStore::open_offline(cache::open_in_memory().unwrap(), seeds);

        let snapshot = store.health_snapshot();
        assert_eq!(snapshot["remoteConnected"], false);
        assert_eq!(snapshot["rowCounts"]["pos_inventory"], 2);
        assert_eq!(snapshot["rowCounts"]["pos_orders"], 0);
    }

    #[test]
    fn order_number_prefix_defaults_and_persists() {
        let store = open_empty();
        assert_eq!(store.order_number_prefix(), "ORD");
        store.set_order_number_prefix("KCH");
        assert_eq!(store.order_number_prefix(), "KCH");
    }
}
