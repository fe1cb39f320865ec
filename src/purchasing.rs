//! Suppliers and purchase orders.
//!
//! Receiving a purchase order is the bulk restock path: every line's
//! quantity lands on its stock item with an `in` audit log, the same shape
//! a manual adjustment writes.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::PosStore;
use crate::sync;
use crate::types::*;

pub struct NewSupplier {
    pub name: String,
    pub contact: Option<String>,
    pub phone: Option<String>,
}

pub fn add_supplier(store: &Arc<PosStore>, input: NewSupplier) -> Supplier {
    sync::create(
        store,
        Supplier {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            contact: input.contact,
            phone: input.phone,
            rating: 0.0,
            created_at: now_rfc3339(),
        },
    )
}

pub fn create_purchase_order(
    store: &Arc<PosStore>,
    supplier_id: &str,
    items: Vec<PurchaseOrderItem>,
) -> Result<PurchaseOrder, StoreError> {
    if items.is_empty() {
        return Err(StoreError::InvalidAmount);
    }
    let total: f64 = items.iter().map(|i| i.quantity * i.unit_cost).sum();
    let ms = Utc::now().timestamp_millis().to_string();
    let po = PurchaseOrder {
        id: Uuid::new_v4().to_string(),
        po_number: format!("PO-{}", &ms[ms.len().saturating_sub(6)..]),
        supplier_id: supplier_id.to_string(),
        items,
        total,
        status: PurchaseOrderStatus::Pending,
        created_at: now_rfc3339(),
        received_at: None,
    };
    Ok(sync::create(store, po))
}

pub fn mark_ordered(store: &Arc<PosStore>, po_id: &str) -> Result<(), StoreError> {
    transition(store, po_id, PurchaseOrderStatus::Pending, PurchaseOrderStatus::Ordered)
}

pub fn cancel_purchase_order(store: &Arc<PosStore>, po_id: &str) -> Result<(), StoreError> {
    let found = sync::update::<PurchaseOrder>(store, po_id, |po| {
        po.status = PurchaseOrderStatus::Cancelled;
    });
    if found {
        Ok(())
    } else {
        Err(StoreError::OrderNotFound(po_id.to_string()))
    }
}

/// Mark a purchase order received and put every line's quantity into
/// stock. Lines whose stock item no longer exists are skipped.
pub fn receive_purchase_order(
    store: &Arc<PosStore>,
    po_id: &str,
    received_by: Option<&str>,
) -> Result<PurchaseOrder, StoreError> {
    let (po, changed_items, logs) = {
        let mut state = store.state();
        let po = state
            .purchase_orders
            .iter()
            .find(|p| p.id == po_id)
            .cloned()
            .ok_or_else(|| StoreError::OrderNotFound(po_id.to_string()))?;
        if !matches!(
            po.status,
            PurchaseOrderStatus::Pending | PurchaseOrderStatus::Ordered
        ) {
            return Err(StoreError::InvalidTransition {
                from: format!("{:?}", po.status).to_lowercase(),
                to: "received".to_string(),
            });
        }

        let now = now_rfc3339();
        let mut changed_items = Vec::new();
        let mut logs = Vec::new();
        for line in &po.items {
            let Some(item) = state
                .inventory
                .iter_mut()
                .find(|i| i.id == line.stock_item_id)
            else {
                continue;
            };
            let previous = item.current_quantity;
            item.current_quantity += line.quantity;
            item.last_restock_date = Some(now.clone());
            item.updated_at = Some(now.clone());
            logs.push(InventoryLog {
                id: Uuid::new_v4().to_string(),
                stock_item_id: item.id.clone(),
                stock_item_name: item.name.clone(),
                movement: StockMovement::In,
                quantity: line.quantity,
                previous_quantity: previous,
                new_quantity: item.current_quantity,
                reason: "Purchase order receipt".to_string(),
                created_at: now.clone(),
                created_by: received_by.map(str::to_string),
            });
            changed_items.push(item.clone());
        }
        for log in &logs {
            state.inventory_logs.insert(0, log.clone());
        }

        let po = {
            let stored = state
                .purchase_orders
                .iter_mut()
                .find(|p| p.id == po_id)
                .ok_or_else(|| StoreError::OrderNotFound(po_id.to_string()))?;
            stored.status = PurchaseOrderStatus::Received;
            stored.received_at = Some(now);
            stored.clone()
        };

        store.persist_collection::<PurchaseOrder>(&state);
        store.persist_collection::<StockItem>(&state);
        store.persist_collection::<InventoryLog>(&state);
        (po, changed_items, logs)
    };

    info!(po_number = po.po_number, lines = po.items.len(), "purchase order received");
    sync::push_update(store, po.clone());
    for item in changed_items {
        sync::push_update(store, item);
    }
    for log in logs {
        sync::push_insert(store, log);
    }
    Ok(po)
}

fn transition(
    store: &Arc<PosStore>,
    po_id: &str,
    from: PurchaseOrderStatus,
    to: PurchaseOrderStatus,
) -> Result<(), StoreError> {
    let current = store
        .state()
        .purchase_orders
        .iter()
        .find(|p| p.id == po_id)
        .map(|p| p.status)
        .ok_or_else(|| StoreError::OrderNotFound(po_id.to_string()))?;
    if current != from {
        return Err(StoreError::InvalidTransition {
            from: format!("{current:?}").to_lowercase(),
            to: format!("{to:?}").to_lowercase(),
        });
    }
    sync::update::<PurchaseOrder>(store, po_id, |po| po.status = to);
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::verify_stock_audit;
    use crate::store::tests::{open_empty, seed_stock};
    use crate::store::{PosStore, SeedData};
    use crate::cache;

    fn store_with_stock() -> Arc<PosStore> {
        PosStore::open_offline(
            cache::open_in_memory().unwrap(),
            SeedData {
                inventory: vec![seed_stock("rice", "Rice", 100.0, 50.0)],
                ..SeedData::default()
            },
        )
    }

    fn rice_line(qty: f64) -> PurchaseOrderItem {
        PurchaseOrderItem {
            stock_item_id: "rice".to_string(),
            stock_item_name: "Rice".to_string(),
            quantity: qty,
            unit_cost: 0.01,
        }
    }

    #[test]
    fn receiving_restocks_with_audit_logs() {
        let store = store_with_stock();
        let po = create_purchase_order(&store, "sup1", vec![rice_line(900.0)]).unwrap();
        assert_eq!(po.total, 9.0);
        assert!(po.po_number.starts_with("PO-"));

        mark_ordered(&store, &po.id).unwrap();
        let received = receive_purchase_order(&store, &po.id, Some("manager1")).unwrap();
        assert_eq!(received.status, PurchaseOrderStatus::Received);
        assert!(received.received_at.is_some());

        let rice = &store.snapshot::<StockItem>()[0];
        assert_eq!(rice.current_quantity, 1000.0);
        assert!(rice.last_restock_date.is_some());

        let logs = store.snapshot::<InventoryLog>();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].reason, "Purchase order receipt");
        assert!(verify_stock_audit(&store).is_empty());
    }

    #[test]
    fn received_orders_cannot_be_received_again() {
        let store = store_with_stock();
        let po = create_purchase_order(&store, "sup1", vec![rice_line(10.0)]).unwrap();
        receive_purchase_order(&store, &po.id, None).unwrap();

        assert!(receive_purchase_order(&store, &po.id, None).is_err());
        assert_eq!(store.snapshot::<StockItem>()[0].current_quantity, 110.0);
    }

    #[test]
    fn lines_for_deleted_stock_are_skipped() {
        let store = store_with_stock();
        let po = create_purchase_order(
            &store,
            "sup1",
            vec![rice_line(10.0), PurchaseOrderItem {
                stock_item_id: "ghost".to_string(),
                stock_item_name: "Ghost".to_string(),
                quantity: 5.0,
                unit_cost: 1.0,
            }],
        )
        .unwrap();
        receive_purchase_order(&store, &po.id, None).unwrap();
        assert_eq!(store.snapshot::<InventoryLog>().len(), 1);
    }

    #[test]
    fn cancelled_orders_stay_cancelled() {
        let store = open_empty();
        let supplier = add_supplier(
            &store,
            NewSupplier {
                name: "Borneo Grains".to_string(),
                contact: None,
                phone: None,
            },
        );
        let po = create_purchase_order(&store, &supplier.id, vec![rice_line(10.0)]).unwrap();

        cancel_purchase_order(&store, &po.id).unwrap();
        assert!(receive_purchase_order(&store, &po.id, None).is_err());
        assert!(mark_ordered(&store, &po.id).is_err());
    }

    #[test]
    fn empty_purchase_order_is_rejected() {
        let store = store_with_stock();
        assert_eq!(
            create_purchase_order(&store, "sup1", vec![]).unwrap_err(),
            StoreError::InvalidAmount
        );
    }
}
