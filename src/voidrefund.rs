//! Void/refund approval workflow.
//!
//! A cashier files a request against an order; a manager approves or
//! rejects it. An order carries at most one open request at a time.
//! Approval is the single point that reverses everything: the request is
//! stamped with a reversal snapshot, the history row moves to its terminal
//! void/refund status, the day's cash-flow bucket gives the money back,
//! and the reversed line items restock their recipe ingredients.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::finance;
use crate::inventory;
use crate::store::PosStore;
use crate::sync;
use crate::types::*;

pub struct RequestActor {
    pub id: String,
    pub name: String,
}

fn submit_request(
    store: &Arc<PosStore>,
    order_id: &str,
    kind: VoidRefundType,
    reason: &str,
    amount: Option<f64>,
    items: Option<Vec<RefundItem>>,
    requested_by: RequestActor,
) -> Result<VoidRefundRequest, StoreError> {
    let (request, history) = {
        let mut state = store.state();
        let history = state
            .order_history
            .iter_mut()
            .find(|h| h.order.id == order_id)
            .ok_or_else(|| StoreError::OrderNotFound(order_id.to_string()))?;

        if history.void_refund_status != OrderVoidRefundStatus::None {
            return Err(StoreError::RequestAlreadyOpen);
        }

        history.void_refund_status = match kind {
            VoidRefundType::Void => OrderVoidRefundStatus::PendingVoid,
            VoidRefundType::Refund | VoidRefundType::PartialRefund => {
                OrderVoidRefundStatus::PendingRefund
            }
        };

        let now = now_rfc3339();
        let request = VoidRefundRequest {
            id: Uuid::new_v4().to_string(),
            order_id: history.order.id.clone(),
            order_number: history.order.order_number.clone(),
            kind,
            reason: reason.to_string(),
            amount,
            items_to_refund: items,
            requested_by: requested_by.id,
            requested_by_name: requested_by.name,
            requested_at: now.clone(),
            status: RequestStatus::Pending,
            approved_by: None,
            approved_by_name: None,
            approved_at: None,
            rejection_reason: None,
            sales_reversed: false,
            inventory_reversed: false,
            reversal_details: None,
            created_at: now,
            updated_at: None,
        };
        let history = history.clone();
        state.void_refund_requests.insert(0, request.clone());
        store.persist_collection::<VoidRefundRequest>(&state);
        store.persist_collection::<OrderHistoryItem>(&state);
        (request, history)
    };

    info!(
        order_number = request.order_number,
        kind = ?request.kind,
        "void/refund requested"
    );
    sync::push_insert(store, request.clone());
    sync::push_update(store, history);
    store.notifier.request_submitted(&request);
    Ok(request)
}

pub fn request_void(
    store: &Arc<PosStore>,
    order_id: &str,
    reason: &str,
    requested_by: RequestActor,
) -> Result<VoidRefundRequest, StoreError> {
    submit_request(
        store,
        order_id,
        VoidRefundType::Void,
        reason,
        None,
        None,
        requested_by,
    )
}

/// File a refund request. Classified `partial_refund` when explicit line
/// items are supplied and the amount is below the order total, otherwise
/// a full `refund`.
pub fn request_refund(
    store: &Arc<PosStore>,
    order_id: &str,
    reason: &str,
    amount: f64,
    items: Option<Vec<RefundItem>>,
    requested_by: RequestActor,
) -> Result<VoidRefundRequest, StoreError> {
    if !(amount > 0.0) {
        return Err(StoreError::InvalidAmount);
    }

    let total = store
        .state()
        .order_history
        .iter()
        .find(|h| h.order.id == order_id)
        .map(|h| h.order.total)
        .ok_or_else(|| StoreError::OrderNotFound(order_id.to_string()))?;

    let kind = match &items {
        Some(items) if !items.is_empty() && amount < total => VoidRefundType::PartialRefund,
        _ => VoidRefundType::Refund,
    };

    submit_request(
        store,
        order_id,
        kind,
        reason,
        Some(amount),
        items,
        requested_by,
    )
}

/// Approve a pending request and apply the full reversal.
pub fn approve(
    store: &Arc<PosStore>,
    request_id: &str,
    approver: RequestActor,
) -> Result<VoidRefundRequest, StoreError> {
    let (request, history, flow, changed_items, logs) = {
        let mut state = store.state();
        let request = state
            .void_refund_requests
            .iter()
            .find(|r| r.id == request_id)
            .cloned()
            .ok_or_else(|| StoreError::RequestNotFound(request_id.to_string()))?;
        if request.status != RequestStatus::Pending {
            return Err(StoreError::RequestNotPending);
        }

        let order = state
            .order_history
            .iter()
            .find(|h| h.order.id == request.order_id)
            .map(|h| h.order.clone())
            .ok_or_else(|| StoreError::OrderNotFound(request.order_id.clone()))?;

        let reversed_amount = request.amount.unwrap_or(order.total);
        let reversal_items: Vec<ReversalItem> = match &request.items_to_refund {
            Some(items) if !items.is_empty() => items
                .iter()
                .map(|i| ReversalItem {
                    item_id: i.item_id.clone(),
                    item_name: i.item_name.clone(),
                    quantity: i.quantity,
                })
                .collect(),
            _ => order
                .items
                .iter()
                .map(|line| ReversalItem {
                    item_id: line.id.clone(),
                    item_name: line.name.clone(),
                    quantity: line.quantity,
                })
                .collect(),
        };

        // Give the stock back before stamping the flags it reports.
        let (changed_items, logs) =
            inventory::restock_for_reversal(&mut state, &order, &reversal_items, Some(&approver.id));

        let method = order.payment_method.unwrap_or(PaymentMethod::Cash);
        let flow = finance::deduct_sales_bucket(&mut state, method, reversed_amount);

        let now = now_rfc3339();
        let terminal_status = match request.kind {
            VoidRefundType::Void => OrderVoidRefundStatus::Voided,
            VoidRefundType::Refund => OrderVoidRefundStatus::Refunded,
            VoidRefundType::PartialRefund => OrderVoidRefundStatus::PartialRefund,
        };

        let history = state
            .order_history
            .iter_mut()
            .find(|h| h.order.id == request.order_id)
            .ok_or_else(|| StoreError::OrderNotFound(request.order_id.clone()))?;
        history.void_refund_status = terminal_status;
        history.refund_amount = reversed_amount;
        history.refund_reason = Some(request.reason.clone());
        match request.kind {
            VoidRefundType::Void => history.voided_at = Some(now.clone()),
            _ => history.refunded_at = Some(now.clone()),
        }
        let history = history.clone();

        let stored = state
            .void_refund_requests
            .iter_mut()
            .find(|r| r.id == request_id)
            .ok_or_else(|| StoreError::RequestNotFound(request_id.to_string()))?;
        stored.status = RequestStatus::Approved;
        stored.approved_by = Some(approver.id.clone());
        stored.approved_by_name = Some(approver.name.clone());
        stored.approved_at = Some(now.clone());
        stored.sales_reversed = true;
        stored.inventory_reversed = true;
        stored.reversal_details = Some(ReversalDetails {
            sales_deducted: reversed_amount,
            inventory_items: reversal_items,
        });
        stored.updated_at = Some(now);
        let request = stored.clone();

        store.persist_collection::<VoidRefundRequest>(&state);
        store.persist_collection::<OrderHistoryItem>(&state);
        store.persist_collection::<StockItem>(&state);
        store.persist_collection::<InventoryLog>(&state);
        if flow.is_some() {
            store.persist_collection::<DailyCashFlow>(&state);
        }
        (request, history, flow, changed_items, logs)
    };

    info!(
        order_number = request.order_number,
        amount = request.reversal_details.as_ref().map(|d| d.sales_deducted),
        "void/refund approved"
    );
    sync::push_update(store, request.clone());
    sync::push_update(store, history);
    if let Some(flow) = flow {
        finance::push_flow(store, flow);
    }
    for item in changed_items {
        sync::push_update(store, item);
    }
    for log in logs {
        sync::push_insert(store, log);
    }
    store.notifier.request_resolved(&request, RequestStatus::Approved);
    Ok(request)
}

/// Reject a pending request. The order returns to `none` so a corrected
/// request can be filed.
pub fn reject(
    store: &Arc<PosStore>,
    request_id: &str,
    approver: RequestActor,
    reason: &str,
) -> Result<VoidRefundRequest, StoreError> {
    let (request, history) = {
        let mut state = store.state();
        let stored = state
            .void_refund_requests
            .iter_mut()
            .find(|r| r.id == request_id)
            .ok_or_else(|| StoreError::RequestNotFound(request_id.to_string()))?;
        if stored.status != RequestStatus::Pending {
            return Err(StoreError::RequestNotPending);
        }

        let now = now_rfc3339();
        stored.status = RequestStatus::Rejected;
        stored.approved_by = Some(approver.id.clone());
        stored.approved_by_name = Some(approver.name.clone());
        stored.approved_at = Some(now.clone());
        stored.rejection_reason = Some(reason.to_string());
        stored.updated_at = Some(now);
        let request = stored.clone();

        let history = state
            .order_history
            .iter_mut()
            .find(|h| h.order.id == request.order_id);
        let history = match history {
            Some(history) => {
                history.void_refund_status = OrderVoidRefundStatus::None;
                Some(history.clone())
            }
            None => None,
        };

        store.persist_collection::<VoidRefundRequest>(&state);
        store.persist_collection::<OrderHistoryItem>(&state);
        (request, history)
    };

    info!(order_number = request.order_number, "void/refund rejected");
    sync::push_update(store, request.clone());
    if let Some(history) = history {
        sync::push_update(store, history);
    }
    store.notifier.request_resolved(&request, RequestStatus::Rejected);
    Ok(request)
}

pub fn pending_requests(store: &Arc<PosStore>) -> Vec<VoidRefundRequest> {
    store
        .state()
        .void_refund_requests
        .iter()
        .filter(|r| r.status == RequestStatus::Pending)
        .cloned()
        .collect()
}

pub fn requests_for_order(store: &Arc<PosStore>, order_id: &str) -> Vec<VoidRefundRequest> {
    store
        .state()
        .void_refund_requests
        .iter()
        .filter(|r| r.order_id == order_id)
        .cloned()
        .collect()
}

pub fn requests_by_staff(store: &Arc<PosStore>, staff_id: &str) -> Vec<VoidRefundRequest> {
    store
        .state()
        .void_refund_requests
        .iter()
        .filter(|r| r.requested_by == staff_id)
        .cloned()
        .collect()
}

pub fn pending_count(store: &Arc<PosStore>) -> usize {
    store
        .state()
        .void_refund_requests
        .iter()
        .filter(|r| r.status == RequestStatus::Pending)
        .count()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{self, tests::cart_line};
    use crate::store::tests::seed_stock;
    use crate::store::SeedData;
    use crate::{cache, store::PosStore};

    fn actor(id: &str) -> RequestActor {
        RequestActor {
            id: id.to_string(),
            name: id.to_uppercase(),
        }
    }

    /// Store with a recipe-backed menu item and one completed cash order
    /// of 2x Nasi Lemak Ayam at 9.00 each.
    fn store_with_completed_order() -> (Arc<PosStore>, Order) {
        let seeds = SeedData {
            inventory: vec![
                seed_stock("rice", "Rice", 5000.0, 500.0),
                seed_stock("chicken", "Chicken Piece", 40.0, 5.0),
            ],
            recipes: vec![Recipe {
                id: "r1".to_string(),
                menu_item_id: "m1".to_string(),
                menu_item_name: "Nasi Lemak Ayam".to_string(),
                ingredients: vec![
                    RecipeIngredient {
                        stock_item_id: "rice".to_string(),
                        stock_item_name: "Rice".to_string(),
                        quantity: 150.0,
                        unit: "g".to_string(),
                        cost_per_unit: 0.005,
                    },
                    RecipeIngredient {
                        stock_item_id: "chicken".to_string(),
                        stock_item_name: "Chicken Piece".to_string(),
                        quantity: 1.0,
                        unit: "pc".to_string(),
                        cost_per_unit: 2.5,
                    },
                ],
                total_cost: 3.25,
                updated_at: None,
            }],
            ..SeedData::default()
        };
        let store = PosStore::open_offline(cache::open_in_memory().unwrap(), seeds);

        let order = orders::create_order(
            &store,
            orders::NewOrder {
                items: vec![cart_line("m1", "Nasi Lemak Ayam", 9.0, 2)],
                subtotal: Some(18.0),
                tax: None,
                total: 18.0,
                order_type: OrderType::DineIn,
                payment_method: Some(PaymentMethod::Cash),
                customer_id: None,
                redeemed_points: None,
                redemption_amount: None,
                staff_id: Some("cashier1".to_string()),
                staff_name: Some("Ben".to_string()),
            },
        )
        .unwrap();
        let order = orders::update_order_status(&store, &order.id, OrderStatus::Completed, None).unwrap();
        (store, order)
    }

    #[test]
    fn at_most_one_open_request_per_order() {
        let (store, order) = store_with_completed_order();
        request_void(&store, &order.id, "wrong order", actor("cashier1")).unwrap();

        let err = request_refund(&store, &order.id, "changed mind", 18.0, None, actor("cashier1"))
            .unwrap_err();
        assert_eq!(err, StoreError::RequestAlreadyOpen);
        assert_eq!(store.snapshot::<VoidRefundRequest>().len(), 1);
        assert_eq!(pending_count(&store), 1);
        assert_eq!(requests_by_staff(&store, "cashier1").len(), 1);
        assert!(requests_by_staff(&store, "cashier2").is_empty());
    }

    #[test]
    fn refund_classification() {
        let (store, order) = store_with_completed_order();

        let partial = request_refund(
            &store,
            &order.id,
            "cold food",
            5.0,
            Some(vec![RefundItem {
                item_id: "m1".to_string(),
                item_name: "Nasi Lemak Ayam".to_string(),
                quantity: 1,
                amount: 5.0,
            }]),
            actor("cashier1"),
        )
        .unwrap();
        assert_eq!(partial.kind, VoidRefundType::PartialRefund);
        reject(&store, &partial.id, actor("manager1"), "resubmit").unwrap();

        let full =
            request_refund(&store, &order.id, "cold food", 18.0, None, actor("cashier1")).unwrap();
        assert_eq!(full.kind, VoidRefundType::Refund);
    }

    #[test]
    fn approval_reverses_sales_and_inventory() {
        let (store, order) = store_with_completed_order();
        assert_eq!(store.snapshot::<DailyCashFlow>()[0].sales_cash, 18.0);

        let request = request_void(&store, &order.id, "wrong order", actor("cashier1")).unwrap();
        let approved = approve(&store, &request.id, actor("manager1")).unwrap();

        assert_eq!(approved.status, RequestStatus::Approved);
        assert!(approved.sales_reversed && approved.inventory_reversed);
        let details = approved.reversal_details.unwrap();
        assert_eq!(details.sales_deducted, 18.0);
        assert_eq!(details.inventory_items.len(), 1);
        assert_eq!(details.inventory_items[0].quantity, 2);

        // Stock is back to its seeded levels and the reversal is logged.
        let inventory = store.snapshot::<StockItem>();
        assert_eq!(
            inventory.iter().find(|i| i.id == "rice").map(|i| i.current_quantity),
            Some(5000.0)
        );
        assert_eq!(
            inventory.iter().find(|i| i.id == "chicken").map(|i| i.current_quantity),
            Some(40.0)
        );
        let logs = store.snapshot::<InventoryLog>();
        assert_eq!(
            logs.iter().filter(|l| l.reason == "Void/refund reversal").count(),
            2
        );
        assert!(crate::inventory::verify_stock_audit(&store).is_empty());

        // Money came back out of the cash bucket.
        assert_eq!(store.snapshot::<DailyCashFlow>()[0].sales_cash, 0.0);

        let history = store.snapshot::<OrderHistoryItem>();
        assert_eq!(history[0].void_refund_status, OrderVoidRefundStatus::Voided);
        assert!(history[0].voided_at.is_some());
        assert_eq!(history[0].refund_amount, 18.0);
    }

    #[test]
    fn second_approval_is_rejected_and_does_not_double_deduct() {
        let (store, order) = store_with_completed_order();
        // Pad the bucket so a double deduction would be visible.
        let other = orders::create_order(
            &store,
            orders::tests::basic_order(30.0, PaymentMethod::Cash),
        )
        .unwrap();
        orders::update_order_status(&store, &other.id, OrderStatus::Completed, None).unwrap();

        let request = request_void(&store, &order.id, "wrong order", actor("cashier1")).unwrap();
        approve(&store, &request.id, actor("manager1")).unwrap();
        assert_eq!(store.snapshot::<DailyCashFlow>()[0].sales_cash, 30.0);

        assert_eq!(
            approve(&store, &request.id, actor("manager1")).unwrap_err(),
            StoreError::RequestNotPending
        );
        assert_eq!(store.snapshot::<DailyCashFlow>()[0].sales_cash, 30.0);
    }

    #[test]
    fn partial_refund_restocks_only_listed_items() {
        let (store, order) = store_with_completed_order();
        let request = request_refund(
            &store,
            &order.id,
            "one plate cold",
            5.0,
            Some(vec![RefundItem {
                item_id: "m1".to_string(),
                item_name: "Nasi Lemak Ayam".to_string(),
                quantity: 1,
                amount: 5.0,
            }]),
            actor("cashier1"),
        )
        .unwrap();
        approve(&store, &request.id, actor("manager1")).unwrap();

        // Two plates were deducted, one came back.
        let inventory = store.snapshot::<StockItem>();
        assert_eq!(
            inventory.iter().find(|i| i.id == "rice").map(|i| i.current_quantity),
            Some(4850.0)
        );
        let history = store.snapshot::<OrderHistoryItem>();
        assert_eq!(
            history[0].void_refund_status,
            OrderVoidRefundStatus::PartialRefund
        );
        assert_eq!(history[0].refund_amount, 5.0);
        assert_eq!(store.snapshot::<DailyCashFlow>()[0].sales_cash, 13.0);
    }

    #[test]
    fn reject_reopens_the_order_for_requests() {
        let (store, order) = store_with_completed_order();
        let request = request_void(&store, &order.id, "wrong order", actor("cashier1")).unwrap();
        let rejected = reject(&store, &request.id, actor("manager1"), "talk to me first").unwrap();

        assert_eq!(rejected.status, RequestStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("talk to me first"));
        assert_eq!(rejected.approved_by.as_deref(), Some("manager1"));
        assert!(rejected.approved_at.is_some());
        assert_eq!(
            store.snapshot::<OrderHistoryItem>()[0].void_refund_status,
            OrderVoidRefundStatus::None
        );

        // Resubmission allowed, with nothing left pending from before.
        request_void(&store, &order.id, "still wrong", actor("cashier1")).unwrap();
        assert_eq!(pending_requests(&store).len(), 1);
        assert_eq!(requests_for_order(&store, &order.id).len(), 2);
    }

    #[test]
    fn unknown_targets_error() {
        let (store, _order) = store_with_completed_order();
        assert_eq!(
            request_void(&store, "ghost", "x", actor("c")).unwrap_err(),
            StoreError::OrderNotFound("ghost".to_string())
        );
        assert_eq!(
            approve(&store, "ghost", actor("m")).unwrap_err(),
            StoreError::RequestNotFound("ghost".to_string())
        );
    }
}
