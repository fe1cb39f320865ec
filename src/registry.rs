//! Compile-time registry of the synced collections.
//!
//! Every collection the store manages is listed in [`EntityKind`] and tied
//! to a record type through the [`Entity`] trait. The sync engine, realtime
//! reconciler and cache layer are all generic over `Entity`, so adding a
//! collection means one enum variant, one trait impl and one field on
//! `StoreState`; forgetting any of them fails to compile instead of
//! silently not syncing.
//!
//! Records serialize with camelCase keys locally. The remote schema uses
//! snake_case column names, so rows are re-keyed at the wire boundary by
//! [`to_remote_row`] / [`from_remote_row`]. Only top-level keys are
//! renamed; nested JSON (cart items, recipe ingredients) is stored in jsonb
//! columns remotely and kept verbatim.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::store::StoreState;
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Inventory,
    InventoryLogs,
    Orders,
    OrderHistory,
    VoidRefundRequests,
    Recipes,
    ModifierOptions,
    MenuItems,
    Customers,
    CashRegisters,
    CashFlows,
    Staff,
    StaffKpi,
    Suppliers,
    PurchaseOrders,
    Expenses,
}

impl EntityKind {
    pub const ALL: [EntityKind; 16] = [
        EntityKind::Inventory,
        EntityKind::InventoryLogs,
        EntityKind::Orders,
        EntityKind::OrderHistory,
        EntityKind::VoidRefundRequests,
        EntityKind::Recipes,
        EntityKind::ModifierOptions,
        EntityKind::MenuItems,
        EntityKind::Customers,
        EntityKind::CashRegisters,
        EntityKind::CashFlows,
        EntityKind::Staff,
        EntityKind::StaffKpi,
        EntityKind::Suppliers,
        EntityKind::PurchaseOrders,
        EntityKind::Expenses,
    ];

    /// Key of the collection in the local cache database.
    pub fn cache_key(self) -> &'static str {
        match self {
            EntityKind::Inventory => "pos_inventory",
            EntityKind::InventoryLogs => "pos_inventory_logs",
            EntityKind::Orders => "pos_orders",
            EntityKind::OrderHistory => "pos_order_history",
            EntityKind::VoidRefundRequests => "pos_void_refund_requests",
            EntityKind::Recipes => "pos_recipes",
            EntityKind::ModifierOptions => "pos_modifier_options",
            EntityKind::MenuItems => "pos_menu_items",
            EntityKind::Customers => "pos_customers",
            EntityKind::CashRegisters => "pos_cash_registers",
            EntityKind::CashFlows => "pos_cash_flows",
            EntityKind::Staff => "pos_staff",
            EntityKind::StaffKpi => "pos_staff_kpi",
            EntityKind::Suppliers => "pos_suppliers",
            EntityKind::PurchaseOrders => "pos_purchase_orders",
            EntityKind::Expenses => "pos_expenses",
        }
    }

    /// Table name on the remote backend.
    pub fn remote_table(self) -> &'static str {
        match self {
            EntityKind::Inventory => "inventory",
            EntityKind::InventoryLogs => "inventory_logs",
            EntityKind::Orders => "orders",
            EntityKind::OrderHistory => "order_history",
            EntityKind::VoidRefundRequests => "void_refund_requests",
            EntityKind::Recipes => "recipes",
            EntityKind::ModifierOptions => "modifier_options",
            EntityKind::MenuItems => "menu_items",
            EntityKind::Customers => "customers",
            EntityKind::CashRegisters => "cash_registers",
            EntityKind::CashFlows => "daily_cash_flows",
            EntityKind::Staff => "staff",
            EntityKind::StaffKpi => "staff_kpi",
            EntityKind::Suppliers => "suppliers",
            EntityKind::PurchaseOrders => "purchase_orders",
            EntityKind::Expenses => "expenses",
        }
    }
}

/// A record type that lives in one of the synced collections.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    /// Adopt a server-assigned primary key after a successful insert push.
    fn set_id(&mut self, id: String);

    fn rows(state: &StoreState) -> &Vec<Self>;
    fn rows_mut(state: &mut StoreState) -> &mut Vec<Self>;
}

macro_rules! impl_entity {
    ($ty:ty, $kind:expr, $field:ident) => {
        impl Entity for $ty {
            const KIND: EntityKind = $kind;

            fn id(&self) -> &str {
                &self.id
            }

            fn set_id(&mut self, id: String) {
                self.id = id;
            }

            fn rows(state: &StoreState) -> &Vec<Self> {
                &state.$field
            }

            fn rows_mut(state: &mut StoreState) -> &mut Vec<Self> {
                &mut state.$field
            }
        }
    };
}

impl_entity!(StockItem, EntityKind::Inventory, inventory);
impl_entity!(InventoryLog, EntityKind::InventoryLogs, inventory_logs);
impl_entity!(Order, EntityKind::Orders, orders);
impl_entity!(
    VoidRefundRequest,
    EntityKind::VoidRefundRequests,
    void_refund_requests
);
impl_entity!(Recipe, EntityKind::Recipes, recipes);
impl_entity!(ModifierOption, EntityKind::ModifierOptions, modifier_options);
impl_entity!(MenuItem, EntityKind::MenuItems, menu_items);
impl_entity!(Customer, EntityKind::Customers, customers);
impl_entity!(CashRegister, EntityKind::CashRegisters, cash_registers);
impl_entity!(DailyCashFlow, EntityKind::CashFlows, cash_flows);
impl_entity!(StaffProfile, EntityKind::Staff, staff);
impl_entity!(StaffKpi, EntityKind::StaffKpi, staff_kpi);
impl_entity!(Supplier, EntityKind::Suppliers, suppliers);
impl_entity!(PurchaseOrder, EntityKind::PurchaseOrders, purchase_orders);
impl_entity!(Expense, EntityKind::Expenses, expenses);

// History rows flatten the underlying order, so the primary key lives one
// level down.
impl Entity for OrderHistoryItem {
    const KIND: EntityKind = EntityKind::OrderHistory;

    fn id(&self) -> &str {
        &self.order.id
    }

    fn set_id(&mut self, id: String) {
        self.order.id = id;
    }

    fn rows(state: &StoreState) -> &Vec<Self> {
        &state.order_history
    }

    fn rows_mut(state: &mut StoreState) -> &mut Vec<Self> {
        &mut state.order_history
    }
}

// ---------------------------------------------------------------------------
// Wire-format key codecs
// ---------------------------------------------------------------------------

fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for ch in key.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

fn rekey_top_level(value: Value, rename: fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(rename(&k), v);
            }
            Value::Object(out)
        }
        other => other,
    }
}

/// Serialize a record into the snake_case row shape the remote expects.
pub fn to_remote_row<T: Entity>(row: &T) -> Value {
    match serde_json::to_value(row) {
        Ok(value) => rekey_top_level(value, camel_to_snake),
        Err(e) => {
            warn!(table = T::KIND.remote_table(), error = %e, "row serialization failed");
            Value::Null
        }
    }
}

/// Decode a snake_case remote row into a record. Returns `None` (with a
/// warning) for rows that do not match the local schema, so one bad row
/// never poisons a whole collection load.
pub fn from_remote_row<T: Entity>(row: &Value) -> Option<T> {
    let rekeyed = rekey_top_level(row.clone(), snake_to_camel);
    match serde_json::from_value(rekeyed) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(table = T::KIND.remote_table(), error = %e, "skipping undecodable remote row");
            None
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
