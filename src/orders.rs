//! Order lifecycle: creation with inventory deduction and loyalty, the
//! forward-only status machine, and day-scoped reads.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::finance;
use crate::inventory;
use crate::loyalty;
use crate::store::PosStore;
use crate::sync;
use crate::types::*;

pub struct NewOrder {
    pub items: Vec<CartItem>,
    pub subtotal: Option<f64>,
    pub tax: Option<f64>,
    /// Amount actually charged, net of any redemption.
    pub total: f64,
    pub order_type: OrderType,
    pub payment_method: Option<PaymentMethod>,
    pub customer_id: Option<String>,
    pub redeemed_points: Option<i64>,
    pub redemption_amount: Option<f64>,
    pub staff_id: Option<String>,
    pub staff_name: Option<String>,
}

/// `<prefix>-<last 6 digits of the millisecond timestamp>`.
fn next_order_number(prefix: &str) -> String {
    let ms = Utc::now().timestamp_millis().to_string();
    let suffix = &ms[ms.len().saturating_sub(6)..];
    format!("{prefix}-{suffix}")
}

/// Ring up an order.
///
/// Applies, in one locked pass: redemption validation, the order row, its
/// reporting-history shadow, recipe-driven inventory deduction, and the
/// customer's loyalty ledger. Pushes for every touched row go out after
/// the lock is released.
pub fn create_order(store: &Arc<PosStore>, input: NewOrder) -> Result<Order, StoreError> {
    let now = now_rfc3339();
    let mut order = Order {
        id: Uuid::new_v4().to_string(),
        order_number: next_order_number(&store.order_number_prefix()),
        items: input.items,
        total: input.total,
        subtotal: input.subtotal,
        tax: input.tax,
        order_type: input.order_type,
        status: OrderStatus::Pending,
        payment_method: input.payment_method,
        customer_id: input.customer_id,
        customer_name: None,
        redeemed_points: input.redeemed_points,
        redemption_amount: input.redemption_amount,
        loyalty_points_earned: None,
        staff_id: input.staff_id,
        staff_name: input.staff_name,
        prepared_by: None,
        created_at: now,
        preparing_started_at: None,
        ready_at: None,
        completed_at: None,
    };

    let (order, history, changed_items, logs, customer) = {
        let mut state = store.state();

        let customer = loyalty::apply_order_loyalty(&mut state, &mut order)?;
        let (changed_items, logs) = inventory::deduct_for_order(&mut state, &order);

        let history = OrderHistoryItem {
            order: order.clone(),
            void_refund_status: OrderVoidRefundStatus::None,
            refund_amount: 0.0,
            refund_reason: None,
            refunded_at: None,
            voided_at: None,
        };

        state.orders.insert(0, order.clone());
        state.order_history.insert(0, history.clone());
        store.persist_collection::<Order>(&state);
        store.persist_collection::<OrderHistoryItem>(&state);
        store.persist_collection::<StockItem>(&state);
        store.persist_collection::<InventoryLog>(&state);
        if customer.is_some() {
            store.persist_collection::<Customer>(&state);
        }
        (order, history, changed_items, logs, customer)
    };

    info!(
        order_number = order.order_number,
        total = order.total,
        items = order.items.len(),
        "order created"
    );

    sync::push_insert(store, order.clone());
    sync::push_insert(store, history);
    for item in changed_items {
        sync::push_update(store, item);
    }
    for log in logs {
        sync::push_insert(store, log);
    }
    if let Some(customer) = customer {
        sync::push_update(store, customer);
    }

    Ok(order)
}

/// Advance an order through the status machine.
///
/// Transitions only move forward (`pending → preparing → ready →
/// completed`); any non-terminal order may instead jump to `cancelled`.
/// Moving to `preparing` stamps the kitchen staff member when given.
/// Completing a paid order also records the sale in today's cash-flow row.
pub fn update_order_status(
    store: &Arc<PosStore>,
    order_id: &str,
    new_status: OrderStatus,
    staff: Option<&str>,
) -> Result<Order, StoreError> {
    let (order, flow) = {
        let mut state = store.state();
        let order = state
            .orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| StoreError::OrderNotFound(order_id.to_string()))?;

        let current = order.status;
        let terminal = matches!(current, OrderStatus::Completed | OrderStatus::Cancelled);
        let allowed = if new_status == OrderStatus::Cancelled {
            !terminal
        } else {
            !terminal && new_status.rank() > current.rank()
        };
        if !allowed {
            return Err(StoreError::InvalidTransition {
                from: current.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }

        let now = now_rfc3339();
        order.status = new_status;
        match new_status {
            OrderStatus::Preparing => {
                order.preparing_started_at = Some(now);
                if staff.is_some() {
                    order.prepared_by = staff.map(str::to_string);
                }
            }
            OrderStatus::Ready => order.ready_at = Some(now),
            OrderStatus::Completed => order.completed_at = Some(now),
            _ => {}
        }
        let order = order.clone();

        if let Some(history) = state
            .order_history
            .iter_mut()
            .find(|h| h.order.id == order_id)
        {
            history.order = order.clone();
        }

        let flow = if new_status == OrderStatus::Completed {
            finance::record_sale(&mut state, &order)
        } else {
            None
        };

        store.persist_collection::<Order>(&state);
        store.persist_collection::<OrderHistoryItem>(&state);
        if flow.is_some() {
            store.persist_collection::<DailyCashFlow>(&state);
        }
        (order, flow)
    };

    sync::push_update(store, order.clone());
    if let Some(history) = find_history(store, order_id) {
        sync::push_update(store, history);
    }
    if let Some(flow) = flow {
        finance::push_flow(store, flow);
    }
    Ok(order)
}

fn find_history(store: &Arc<PosStore>, order_id: &str) -> Option<OrderHistoryItem> {
    store
        .state()
        .order_history
        .iter()
        .find(|h| h.order.id == order_id)
        .cloned()
}

/// Orders created on the current calendar day, newest first.
pub fn today_orders(store: &Arc<PosStore>) -> Vec<Order> {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    store
        .state()
        .orders
        .iter()
        .filter(|o| o.created_at.starts_with(&today))
        .cloned()
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::tests::{open_empty, seed_stock};
    use crate::cache;
    use crate::store::{PosStore, SeedData};

    pub(crate) fn cart_line(menu_id: &str, name: &str, price: f64, qty: u32) -> CartItem {
        CartItem {
            id: menu_id.to_string(),
            name: name.to_string(),
            price,
            quantity: qty,
            selected_modifiers: vec![],
            item_total: price * qty as f64,
        }
    }

    pub(crate) fn basic_order(total: f64, payment: PaymentMethod) -> NewOrder {
        NewOrder {
            items: vec![cart_line("m1", "Nasi Lemak Ayam", total, 1)],
            subtotal: Some(total),
            tax: None,
            total,
            order_type: OrderType::Takeaway,
            payment_method: Some(payment),
            customer_id: None,
            redeemed_points: None,
            redemption_amount: None,
            staff_id: None,
            staff_name: None,
        }
    }

    fn nasi_lemak_store() -> std::sync::Arc<PosStore> {
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
        PosStore::open_offline(cache::open_in_memory().unwrap(), seeds)
    }

    #[test]
    fn order_number_uses_prefix_and_six_digits() {
        let store = open_empty();
        store.set_order_number_prefix("KCH");
        let order = create_order(&store, basic_order(10.0, PaymentMethod::Cash)).unwrap();

        let (prefix, suffix) = order.order_number.split_once('-').unwrap();
        assert_eq!(prefix, "KCH");
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn create_order_deducts_recipe_ingredients() {
        let store = nasi_lemak_store();
        let mut input = basic_order(18.0, PaymentMethod::Cash);
        input.items = vec![cart_line("m1", "Nasi Lemak Ayam", 9.0, 2)];
        create_order(&store, input).unwrap();

        let inventory = store.snapshot::<StockItem>();
        let rice = inventory.iter().find(|i| i.id == "rice").unwrap();
        let chicken = inventory.iter().find(|i| i.id == "chicken").unwrap();
        assert_eq!(rice.current_quantity, 4700.0);
        assert_eq!(chicken.current_quantity, 38.0);

        // Exactly one `out` log per affected item.
        let logs = store.snapshot::<InventoryLog>();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.movement == StockMovement::Out));
        assert!(logs.iter().all(|l| l.reason == "Order deduction"));
        assert_eq!(
            logs.iter().find(|l| l.stock_item_id == "rice").map(|l| l.quantity),
            Some(300.0)
        );
    }

    #[test]
    fn unrecipe_items_skip_deduction_and_stock_can_go_negative() {
        let store = nasi_lemak_store();

        // No recipe for m9: no logs, no stock change.
        let mut input = basic_order(5.0, PaymentMethod::Card);
        input.items = vec![cart_line("m9", "Teh Tarik", 2.5, 2)];
        create_order(&store, input).unwrap();
        assert!(store.snapshot::<InventoryLog>().is_empty());

        // 50 chicken pieces against 40 on hand is not blocked.
        let mut input = basic_order(450.0, PaymentMethod::Cash);
        input.items = vec![cart_line("m1", "Nasi Lemak Ayam", 9.0, 50)];
        create_order(&store, input).unwrap();
        let inventory = store.snapshot::<StockItem>();
        let chicken = inventory.iter().find(|i| i.id == "chicken").unwrap();
        assert_eq!(chicken.current_quantity, -10.0);
    }

    #[test]
    fn order_creates_history_shadow() {
        let store = open_empty();
        let order = create_order(&store, basic_order(12.0, PaymentMethod::Card)).unwrap();

        let history = store.snapshot::<OrderHistoryItem>();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].order.id, order.id);
        assert_eq!(history[0].void_refund_status, OrderVoidRefundStatus::None);
    }

    #[test]
    fn status_machine_moves_forward_only() {
        let store = open_empty();
        let order = create_order(&store, basic_order(10.0, PaymentMethod::Cash)).unwrap();

        update_order_status(&store, &order.id, OrderStatus::Preparing, None).unwrap();
        let err = update_order_status(&store, &order.id, OrderStatus::Pending, None).unwrap_err();
        assert_eq!(
            err,
            StoreError::InvalidTransition {
                from: "preparing".to_string(),
                to: "pending".to_string()
            }
        );

        let ready = update_order_status(&store, &order.id, OrderStatus::Ready, None).unwrap();
        assert!(ready.ready_at.is_some());
        let done = update_order_status(&store, &order.id, OrderStatus::Completed, None).unwrap();
        assert!(done.completed_at.is_some());

        // Terminal: nothing moves a completed order, not even cancel.
        assert!(update_order_status(&store, &order.id, OrderStatus::Cancelled, None).is_err());
    }

    #[test]
    fn preparing_stamps_staff_and_start_time() {
        let store = open_empty();
        let order = create_order(&store, basic_order(10.0, PaymentMethod::Cash)).unwrap();
        let prep =
            update_order_status(&store, &order.id, OrderStatus::Preparing, Some("Aminah")).unwrap();
        assert!(prep.preparing_started_at.is_some());
        assert_eq!(prep.prepared_by.as_deref(), Some("Aminah"));
    }

    #[test]
    fn cancel_allowed_from_any_open_state() {
        let store = open_empty();
        let order = create_order(&store, basic_order(10.0, PaymentMethod::Cash)).unwrap();
        update_order_status(&store, &order.id, OrderStatus::Preparing, None).unwrap();
        let cancelled = update_order_status(&store, &order.id, OrderStatus::Cancelled, None).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(update_order_status(&store, &order.id, OrderStatus::Ready, None).is_err());
    }

    #[test]
    fn completion_records_sale_in_cash_flow() {
        let store = open_empty();
        let order = create_order(&store, basic_order(25.0, PaymentMethod::Cash)).unwrap();
        update_order_status(&store, &order.id, OrderStatus::Completed, None).unwrap();

        let flows = store.snapshot::<DailyCashFlow>();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].sales_cash, 25.0);
        assert_eq!(flows[0].sales_card, 0.0);
    }

    #[test]
    fn missing_order_errors() {
        let store = open_empty();
        assert_eq!(
            update_order_status(&store, "ghost", OrderStatus::Ready, None).unwrap_err(),
            StoreError::OrderNotFound("ghost".to_string())
        );
    }

    #[test]
    fn today_orders_filters_by_date() {
        let store = nasi_lemak_store();
        create_order(&store, basic_order(9.0, PaymentMethod::Cash)).unwrap();
        {
            let mut state = store.state();
            state.orders[0].created_at = "2020-01-01T08:00:00+00:00".to_string();
        }
        create_order(&store, basic_order(9.0, PaymentMethod::Cash)).unwrap();
        assert_eq!(today_orders(&store).len(), 1);
    }
}
