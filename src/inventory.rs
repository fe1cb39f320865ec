//! Inventory engine: stock CRUD, manual adjustments, recipe-driven order
//! deduction, refund reversal restock, the audit-log replay check, and
//! restock suggestions.
//!
//! Every quantity change writes exactly one [`InventoryLog`] row recording
//! the effective delta and the before/after quantities, so replaying an
//! item's logs from its initial entry always reproduces the current
//! quantity.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{PosStore, StoreState};
use crate::sync;
use crate::types::*;

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

pub struct NewStockItem {
    pub name: String,
    pub category: String,
    pub current_quantity: f64,
    pub min_quantity: f64,
    pub unit: String,
    pub cost: f64,
    pub supplier: Option<String>,
}

/// Add a stock item together with its `initial` audit log entry.
pub fn add_stock_item(store: &Arc<PosStore>, input: NewStockItem) -> StockItem {
    let now = now_rfc3339();
    let item = StockItem {
        id: Uuid::new_v4().to_string(),
        name: input.name,
        category: input.category,
        current_quantity: input.current_quantity,
        min_quantity: input.min_quantity,
        unit: input.unit,
        cost: input.cost,
        supplier: input.supplier,
        last_restock_date: None,
        updated_at: Some(now.clone()),
    };
    let log = InventoryLog {
        id: Uuid::new_v4().to_string(),
        stock_item_id: item.id.clone(),
        stock_item_name: item.name.clone(),
        movement: StockMovement::Initial,
        quantity: item.current_quantity,
        previous_quantity: 0.0,
        new_quantity: item.current_quantity,
        reason: "Initial stock".to_string(),
        created_at: now,
        created_by: None,
    };
    let item = sync::create(store, item);
    sync::create(store, log);
    item
}

/// Import many stock rows at once (CSV import). Rows matching an existing
/// item by case-insensitive name add their quantity as an `in` movement;
/// unknown names become new items with an `initial` log.
pub fn bulk_upsert_stock(store: &Arc<PosStore>, inputs: Vec<NewStockItem>) -> Vec<StockItem> {
    let mut out = Vec::with_capacity(inputs.len());
    for input in inputs {
        let existing = store
            .state()
            .inventory
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(&input.name))
            .map(|i| i.id.clone());
        match existing {
            Some(id) if input.current_quantity > 0.0 => {
                if let Ok(item) = adjust_stock(
                    store,
                    &id,
                    StockMovement::In,
                    input.current_quantity,
                    "Bulk import",
                    None,
                ) {
                    out.push(item);
                }
            }
            Some(id) => {
                if let Some(item) = store.state().inventory.iter().find(|i| i.id == id).cloned() {
                    out.push(item);
                }
            }
            None => out.push(add_stock_item(store, input)),
        }
    }
    info!(count = out.len(), "bulk stock import applied");
    out
}

/// Edit descriptive fields. Quantity is deliberately not touched here;
/// quantity changes must go through [`adjust_stock`] so the audit log
/// stays complete.
pub fn update_stock_item(
    store: &Arc<PosStore>,
    id: &str,
    patch: impl FnOnce(&mut StockItem),
) -> Result<(), StoreError> {
    let found = sync::update::<StockItem>(store, id, |item| {
        patch(item);
        item.updated_at = Some(now_rfc3339());
    });
    if found {
        Ok(())
    } else {
        Err(StoreError::StockItemNotFound(id.to_string()))
    }
}

pub fn delete_stock_item(store: &Arc<PosStore>, id: &str) -> Result<(), StoreError> {
    if sync::delete::<StockItem>(store, id) {
        Ok(())
    } else {
        Err(StoreError::StockItemNotFound(id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Manual adjustments
// ---------------------------------------------------------------------------

/// Record a manual stock movement.
///
/// `In` adds the full quantity. `Out` removes at most the on-hand amount;
/// a request past zero is clamped and the log records the clamped
/// effective delta, not the requested one. Order deduction is the only
/// path allowed to drive quantities negative.
pub fn adjust_stock(
    store: &Arc<PosStore>,
    id: &str,
    movement: StockMovement,
    quantity: f64,
    reason: &str,
    created_by: Option<&str>,
) -> Result<StockItem, StoreError> {
    if !(quantity > 0.0) {
        return Err(StoreError::InvalidAmount);
    }

    let (item, log) = {
        let mut state = store.state();
        let item = state
            .inventory
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| StoreError::StockItemNotFound(id.to_string()))?;

        let previous = item.current_quantity;
        let new_quantity = match movement {
            StockMovement::In => previous + quantity,
            StockMovement::Out => (previous - quantity).max(0.0),
            StockMovement::Initial | StockMovement::Adjustment => {
                return Err(StoreError::InvalidAmount)
            }
        };

        let now = now_rfc3339();
        item.current_quantity = new_quantity;
        item.updated_at = Some(now.clone());
        if movement == StockMovement::In {
            item.last_restock_date = Some(now.clone());
        }
        let item = item.clone();

        let log = InventoryLog {
            id: Uuid::new_v4().to_string(),
            stock_item_id: item.id.clone(),
            stock_item_name: item.name.clone(),
            movement,
            quantity: (new_quantity - previous).abs(),
            previous_quantity: previous,
            new_quantity,
            reason: reason.to_string(),
            created_at: now,
            created_by: created_by.map(str::to_string),
        };
        state.inventory_logs.insert(0, log.clone());
        store.persist_collection::<StockItem>(&state);
        store.persist_collection::<InventoryLog>(&state);
        (item, log)
    };

    sync::push_update(store, item.clone());
    sync::push_insert(store, log);
    Ok(item)
}

// ---------------------------------------------------------------------------
// Order deduction
// ---------------------------------------------------------------------------

/// Deduct ingredients for a newly created order. Operates on an already
/// locked state; the caller persists and pushes the returned rows.
///
/// Each line item contributes its recipe's ingredients scaled by line
/// quantity, plus the ingredient lists of any selected modifiers. Items
/// without a recipe are skipped. Quantities may go negative; a sale is
/// never blocked on stock.
pub(crate) fn deduct_for_order(
    state: &mut StoreState,
    order: &Order,
) -> (Vec<StockItem>, Vec<InventoryLog>) {
    let mut deductions: HashMap<String, f64> = HashMap::new();

    for line in &order.items {
        let per_unit = line.quantity as f64;
        if let Some(recipe) = state.recipes.iter().find(|r| r.menu_item_id == line.id) {
            for ingredient in &recipe.ingredients {
                *deductions.entry(ingredient.stock_item_id.clone()).or_default() +=
                    ingredient.quantity * per_unit;
            }
        }
        for modifier in &line.selected_modifiers {
            let Some(option) = state
                .modifier_options
                .iter()
                .find(|o| o.id == modifier.option_id)
            else {
                continue;
            };
            for ingredient in &option.ingredients {
                *deductions.entry(ingredient.stock_item_id.clone()).or_default() +=
                    ingredient.quantity * per_unit;
            }
        }
    }

    apply_quantity_deltas(
        state,
        deductions.into_iter().map(|(id, qty)| (id, -qty)),
        "Order deduction",
        order.staff_id.as_deref(),
    )
}

/// Restock ingredients for a reversed (voided/refunded) set of line items.
/// Same recipe and modifier walk as deduction, with the sign flipped.
pub(crate) fn restock_for_reversal(
    state: &mut StoreState,
    order: &Order,
    items: &[ReversalItem],
    reversed_by: Option<&str>,
) -> (Vec<StockItem>, Vec<InventoryLog>) {
    let mut increments: HashMap<String, f64> = HashMap::new();

    for reversal in items {
        let quantity = reversal.quantity as f64;
        if let Some(recipe) = state
            .recipes
            .iter()
            .find(|r| r.menu_item_id == reversal.item_id)
        {
            for ingredient in &recipe.ingredients {
                *increments.entry(ingredient.stock_item_id.clone()).or_default() +=
                    ingredient.quantity * quantity;
            }
        }
        if let Some(line) = order.items.iter().find(|l| l.id == reversal.item_id) {
            for modifier in &line.selected_modifiers {
                let Some(option) = state
                    .modifier_options
                    .iter()
                    .find(|o| o.id == modifier.option_id)
                else {
                    continue;
                };
                for ingredient in &option.ingredients {
                    *increments.entry(ingredient.stock_item_id.clone()).or_default() +=
                        ingredient.quantity * quantity;
                }
            }
        }
    }

    apply_quantity_deltas(
        state,
        increments.into_iter(),
        "Void/refund reversal",
        reversed_by,
    )
}

/// Apply signed quantity deltas as a batch, one log row per touched item.
fn apply_quantity_deltas(
    state: &mut StoreState,
    deltas: impl Iterator<Item = (String, f64)>,
    reason: &str,
    created_by: Option<&str>,
) -> (Vec<StockItem>, Vec<InventoryLog>) {
    let now = now_rfc3339();
    let mut changed_items = Vec::new();
    let mut logs = Vec::new();

    for (stock_id, delta) in deltas {
        if delta == 0.0 {
            continue;
        }
        let Some(item) = state.inventory.iter_mut().find(|i| i.id == stock_id) else {
            continue;
        };
        let previous = item.current_quantity;
        item.current_quantity = previous + delta;
        item.updated_at = Some(now.clone());

        logs.push(InventoryLog {
            id: Uuid::new_v4().to_string(),
            stock_item_id: item.id.clone(),
            stock_item_name: item.name.clone(),
            movement: if delta < 0.0 {
                StockMovement::Out
            } else {
                StockMovement::In
            },
            quantity: delta.abs(),
            previous_quantity: previous,
            new_quantity: item.current_quantity,
            reason: reason.to_string(),
            created_at: now.clone(),
            created_by: created_by.map(str::to_string),
        });
        changed_items.push(item.clone());
    }

    for log in &logs {
        state.inventory_logs.insert(0, log.clone());
    }
    (changed_items, logs)
}

// ---------------------------------------------------------------------------
// Audit replay
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AuditDiscrepancy {
    pub stock_item_id: String,
    pub stock_item_name: String,
    pub replayed_quantity: f64,
    pub current_quantity: f64,
}

/// Replay every item's logs oldest-first and compare the result against
/// the live quantity. A non-empty result means some mutation bypassed the
/// logging paths.
pub fn verify_stock_audit(store: &Arc<PosStore>) -> Vec<AuditDiscrepancy> {
    let state = store.state();
    let mut discrepancies = Vec::new();

    for item in &state.inventory {
        let mut logs: Vec<&InventoryLog> = state
            .inventory_logs
            .iter()
            .filter(|l| l.stock_item_id == item.id)
            .collect();
        if logs.is_empty() {
            continue;
        }
        logs.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        // Seeded items carry no `initial` log; anchor the replay at the
        // quantity the oldest log observed.
        let mut replayed = logs[0].previous_quantity;
        for log in logs {
            replayed = match log.movement {
                StockMovement::Initial | StockMovement::Adjustment => log.new_quantity,
                StockMovement::In => replayed + log.quantity,
                StockMovement::Out => replayed - log.quantity,
            };
        }

        if (replayed - item.current_quantity).abs() > 1e-6 {
            discrepancies.push(AuditDiscrepancy {
                stock_item_id: item.id.clone(),
                stock_item_name: item.name.clone(),
                replayed_quantity: replayed,
                current_quantity: item.current_quantity,
            });
        }
    }

    discrepancies
}

// ---------------------------------------------------------------------------
// Restock suggestions
// ---------------------------------------------------------------------------

/// Days of `out` history considered for the usage average.
const USAGE_WINDOW_DAYS: f64 = 30.0;

/// Suggest reorders from recent consumption.
///
/// Average daily usage is total `out` quantity over the last 30 days
/// divided by 30. The suggested reorder point is three days of usage on
/// top of the minimum quantity (or two extra days of usage when no minimum
/// is set). An item is flagged when on-hand is at or below either the
/// reorder point or its minimum. Suggested order quantity tops the item up
/// to the larger of three times the reorder point and four times the
/// minimum, never less than 10 units.
pub fn restock_suggestions(store: &Arc<PosStore>) -> Vec<StockSuggestion> {
    let state = store.state();
    let cutoff = chrono::Utc::now() - chrono::Duration::days(USAGE_WINDOW_DAYS as i64);
    let cutoff = cutoff.to_rfc3339();

    let mut suggestions = Vec::new();
    for item in &state.inventory {
        let used: f64 = state
            .inventory_logs
            .iter()
            .filter(|l| {
                l.stock_item_id == item.id
                    && l.movement == StockMovement::Out
                    && l.created_at >= cutoff
            })
            .map(|l| l.quantity)
            .sum();
        let daily_usage = used / USAGE_WINDOW_DAYS;

        let reorder_point = if item.min_quantity > 0.0 {
            daily_usage * 3.0 + item.min_quantity
        } else {
            daily_usage * 3.0 + daily_usage * 2.0
        };

        let needs_restock =
            item.current_quantity <= reorder_point || item.current_quantity <= item.min_quantity;
        if !needs_restock {
            continue;
        }

        let target = (reorder_point * 3.0).max(item.min_quantity * 4.0);
        let order_quantity = (target - item.current_quantity).max(10.0).ceil();

        suggestions.push(StockSuggestion {
            stock_item_id: item.id.clone(),
            stock_item_name: item.name.clone(),
            current_quantity: item.current_quantity,
            average_daily_usage: daily_usage,
            suggested_reorder_point: reorder_point,
            suggested_order_quantity: order_quantity,
            estimated_cost: order_quantity * item.cost,
            supplier: item.supplier.clone(),
        });
    }

    suggestions
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::open_empty;

    fn new_item(name: &str, qty: f64, min: f64) -> NewStockItem {
        NewStockItem {
            name: name.to_string(),
            category: "ingredients".to_string(),
            current_quantity: qty,
            min_quantity: min,
            unit: "g".to_string(),
            cost: 0.02,
            supplier: None,
        }
    }

    #[test]
    fn add_writes_initial_log() {
        let store = open_empty();
        let item = add_stock_item(&store, new_item("Rice", 1000.0, 100.0));

        let logs = store.snapshot::<InventoryLog>();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].movement, StockMovement::Initial);
        assert_eq!(logs[0].stock_item_id, item.id);
        assert_eq!(logs[0].new_quantity, 1000.0);
        assert!(verify_stock_audit(&store).is_empty());
    }

    #[test]
    fn adjust_out_clamps_at_zero_and_logs_effective_delta() {
        let store = open_empty();
        let item = add_stock_item(&store, new_item("Chicken", 5.0, 2.0));

        let updated =
            adjust_stock(&store, &item.id, StockMovement::Out, 8.0, "Spoilage", None).unwrap();
        assert_eq!(updated.current_quantity, 0.0);

        let logs = store.snapshot::<InventoryLog>();
        let out = logs.iter().find(|l| l.movement == StockMovement::Out).unwrap();
        assert_eq!(out.quantity, 5.0);
        assert_eq!(out.previous_quantity, 5.0);
        assert_eq!(out.new_quantity, 0.0);
        assert!(verify_stock_audit(&store).is_empty());
    }

    #[test]
    fn adjust_rejects_bad_input() {
        let store = open_empty();
        let item = add_stock_item(&store, new_item("Rice", 10.0, 1.0));

        assert_eq!(
            adjust_stock(&store, &item.id, StockMovement::Out, 0.0, "x", None),
            Err(StoreError::InvalidAmount)
        );
        assert_eq!(
            adjust_stock(&store, "ghost", StockMovement::In, 1.0, "x", None),
            Err(StoreError::StockItemNotFound("ghost".to_string()))
        );
    }

    #[test]
    fn bulk_import_matches_names_case_insensitively() {
        let store = open_empty();
        add_stock_item(&store, new_item("Rice", 100.0, 10.0));

        let imported = bulk_upsert_stock(
            &store,
            vec![new_item("RICE", 400.0, 10.0), new_item("Sugar", 50.0, 5.0)],
        );
        assert_eq!(imported.len(), 2);

        let inventory = store.snapshot::<StockItem>();
        assert_eq!(inventory.len(), 2);
        let rice = inventory.iter().find(|i| i.name == "Rice").unwrap();
        assert_eq!(rice.current_quantity, 500.0);

        let logs = store.snapshot::<InventoryLog>();
        assert!(logs.iter().any(|l| l.reason == "Bulk import"));
        assert!(verify_stock_audit(&store).is_empty());
    }

    #[test]
    fn audit_detects_unlogged_mutation() {
        let store = open_empty();
        let item = add_stock_item(&store, new_item("Rice", 100.0, 10.0));

        {
            let mut state = store.state();
            state.inventory[0].current_quantity = 60.0;
        }

        let discrepancies = verify_stock_audit(&store);
        assert_eq!(discrepancies.len(), 1);
        assert_eq!(discrepancies[0].stock_item_id, item.id);
        assert_eq!(discrepancies[0].replayed_quantity, 100.0);
        assert_eq!(discrepancies[0].current_quantity, 60.0);
    }

    #[test]
    fn low_stock_triggers_suggestion() {
        let store = open_empty();
        let low = add_stock_item(&store, new_item("Chicken", 3.0, 20.0));
        let _high = add_stock_item(&store, new_item("Rice", 100000.0, 10.0));

        let suggestions = restock_suggestions(&store);
        assert_eq!(suggestions.len(), 1);
        let s = &suggestions[0];
        assert_eq!(s.stock_item_id, low.id);
        // No usage yet: reorder point is the minimum, target is min * 4.
        assert_eq!(s.suggested_reorder_point, 20.0);
        assert_eq!(s.suggested_order_quantity, 77.0);
        assert_eq!(s.estimated_cost, 77.0 * 0.02);
    }

    #[test]
    fn suggestion_floors_small_orders_at_ten() {
        let store = open_empty();
        add_stock_item(&store, new_item("Saffron", 1.0, 1.0));

        let suggestions = restock_suggestions(&store);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].suggested_order_quantity, 10.0);
    }
}
