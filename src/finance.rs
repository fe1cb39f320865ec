//! Daily cash-flow rows, expenses, and month-level rollups.
//!
//! One [`DailyCashFlow`] row exists per calendar day, created lazily the
//! first time anything touches it. Sales land in the bucket of their
//! payment method; void/refund approvals deduct from the same buckets,
//! floored at zero.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{PosStore, StoreState};
use crate::sync;
use crate::types::*;

fn today_key() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// A touched flow row plus whether it was created by this mutation, so
/// the caller can pick the matching remote push.
pub(crate) struct FlowUpdate {
    pub flow: DailyCashFlow,
    pub created: bool,
}

pub(crate) fn push_flow(store: &Arc<PosStore>, update: FlowUpdate) {
    if update.created {
        sync::push_insert(store, update.flow);
    } else {
        sync::push_update(store, update.flow);
    }
}

fn with_today_flow(
    state: &mut StoreState,
    mutate: impl FnOnce(&mut DailyCashFlow),
) -> FlowUpdate {
    let today = today_key();
    if let Some(flow) = state.cash_flows.iter_mut().find(|f| f.date == today) {
        mutate(flow);
        return FlowUpdate {
            flow: flow.clone(),
            created: false,
        };
    }

    let mut flow = DailyCashFlow {
        id: Uuid::new_v4().to_string(),
        date: today,
        opening_cash: 0.0,
        sales_cash: 0.0,
        sales_card: 0.0,
        sales_ewallet: 0.0,
        expenses_cash: 0.0,
        closing_cash: None,
        notes: None,
    };
    mutate(&mut flow);
    state.cash_flows.insert(0, flow.clone());
    FlowUpdate {
        flow,
        created: true,
    }
}

/// Add a completed order's total to today's bucket for its payment
/// method. Unpaid orders contribute nothing.
pub(crate) fn record_sale(state: &mut StoreState, order: &Order) -> Option<FlowUpdate> {
    let method = order.payment_method?;
    Some(with_today_flow(state, |flow| match method {
        PaymentMethod::Cash => flow.sales_cash += order.total,
        PaymentMethod::Card => flow.sales_card += order.total,
        PaymentMethod::Ewallet => flow.sales_ewallet += order.total,
    }))
}

pub(crate) fn record_opening_cash(state: &mut StoreState, cash: f64) -> Option<FlowUpdate> {
    Some(with_today_flow(state, |flow| flow.opening_cash = cash))
}

pub(crate) fn record_closing_cash(state: &mut StoreState, cash: f64) -> Option<FlowUpdate> {
    Some(with_today_flow(state, |flow| flow.closing_cash = Some(cash)))
}

/// Deduct a reversed amount from today's bucket, floored at zero. Returns
/// `None` when no flow row exists today (nothing was ever recorded, so
/// there is nothing to deduct from).
pub(crate) fn deduct_sales_bucket(
    state: &mut StoreState,
    method: PaymentMethod,
    amount: f64,
) -> Option<FlowUpdate> {
    let today = today_key();
    let flow = state.cash_flows.iter_mut().find(|f| f.date == today)?;
    let bucket = match method {
        PaymentMethod::Cash => &mut flow.sales_cash,
        PaymentMethod::Card => &mut flow.sales_card,
        PaymentMethod::Ewallet => &mut flow.sales_ewallet,
    };
    *bucket = (*bucket - amount).max(0.0);
    Some(FlowUpdate {
        flow: flow.clone(),
        created: false,
    })
}

// ---------------------------------------------------------------------------
// Expenses
// ---------------------------------------------------------------------------

pub struct NewExpense {
    pub category: String,
    pub amount: f64,
    pub description: Option<String>,
    /// Defaults to today.
    pub date: Option<String>,
}

pub fn add_expense(store: &Arc<PosStore>, input: NewExpense) -> Result<Expense, StoreError> {
    if !(input.amount > 0.0) {
        return Err(StoreError::InvalidAmount);
    }

    let date = input.date.unwrap_or_else(today_key);
    let expense = Expense {
        id: Uuid::new_v4().to_string(),
        category: input.category,
        amount: input.amount,
        description: input.description,
        date: date.clone(),
        created_at: now_rfc3339(),
    };

    let flow = {
        let mut state = store.state();
        state.expenses.insert(0, expense.clone());
        let flow = if date == today_key() {
            Some(with_today_flow(&mut state, |flow| {
                flow.expenses_cash += expense.amount
            }))
        } else {
            None
        };
        store.persist_collection::<Expense>(&state);
        if flow.is_some() {
            store.persist_collection::<DailyCashFlow>(&state);
        }
        flow
    };

    info!(category = expense.category, amount = expense.amount, "expense recorded");
    sync::push_insert(store, expense.clone());
    if let Some(flow) = flow {
        push_flow(store, flow);
    }
    Ok(expense)
}

pub fn delete_expense(store: &Arc<PosStore>, id: &str) -> bool {
    sync::delete::<Expense>(store, id)
}

// ---------------------------------------------------------------------------
// Rollups
// ---------------------------------------------------------------------------

pub fn daily_flow(store: &Arc<PosStore>, date: &str) -> Option<DailyCashFlow> {
    store
        .state()
        .cash_flows
        .iter()
        .find(|f| f.date == date)
        .cloned()
}

/// Revenue from completed orders in a `YYYY-MM` month.
pub fn monthly_revenue(store: &Arc<PosStore>, month: &str) -> f64 {
    store
        .state()
        .orders
        .iter()
        .filter(|o| o.status == OrderStatus::Completed && o.created_at.starts_with(month))
        .map(|o| o.total)
        .sum()
}

/// Expense total for a `YYYY-MM` month.
pub fn monthly_expenses(store: &Arc<PosStore>, month: &str) -> f64 {
    store
        .state()
        .expenses
        .iter()
        .filter(|e| e.date.starts_with(month))
        .map(|e| e.amount)
        .sum()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{self, tests::basic_order};
    use crate::store::tests::open_empty;

    #[test]
    fn sales_land_in_their_buckets() {
        let store = open_empty();
        for (total, method) in [
            (10.0, PaymentMethod::Cash),
            (20.0, PaymentMethod::Card),
            (5.0, PaymentMethod::Ewallet),
            (2.5, PaymentMethod::Cash),
        ] {
            let order = orders::create_order(&store, basic_order(total, method)).unwrap();
            orders::update_order_status(&store, &order.id, OrderStatus::Completed, None).unwrap();
        }

        let flows = store.snapshot::<DailyCashFlow>();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].sales_cash, 12.5);
        assert_eq!(flows[0].sales_card, 20.0);
        assert_eq!(flows[0].sales_ewallet, 5.0);
    }

    #[test]
    fn bucket_deduction_floors_at_zero() {
        let store = open_empty();
        let order = orders::create_order(&store, basic_order(15.0, PaymentMethod::Cash)).unwrap();
        orders::update_order_status(&store, &order.id, OrderStatus::Completed, None).unwrap();

        {
            let mut state = store.state();
            let update = deduct_sales_bucket(&mut state, PaymentMethod::Cash, 40.0).unwrap();
            assert_eq!(update.flow.sales_cash, 0.0);
            // A day with no flow row has nothing to deduct from.
            state.cash_flows.clear();
            assert!(deduct_sales_bucket(&mut state, PaymentMethod::Cash, 1.0).is_none());
        }
    }

    #[test]
    fn expenses_validate_and_hit_todays_flow() {
        let store = open_empty();
        assert_eq!(
            add_expense(
                &store,
                NewExpense {
                    category: "utilities".to_string(),
                    amount: 0.0,
                    description: None,
                    date: None,
                }
            )
            .unwrap_err(),
            StoreError::InvalidAmount
        );

        add_expense(
            &store,
            NewExpense {
                category: "utilities".to_string(),
                amount: 80.0,
                description: Some("electricity".to_string()),
                date: None,
            },
        )
        .unwrap();

        let flows = store.snapshot::<DailyCashFlow>();
        assert_eq!(flows[0].expenses_cash, 80.0);

        // Backdated expenses skip today's flow.
        add_expense(
            &store,
            NewExpense {
                category: "repairs".to_string(),
                amount: 30.0,
                description: None,
                date: Some("2020-01-15".to_string()),
            },
        )
        .unwrap();
        assert_eq!(store.snapshot::<DailyCashFlow>()[0].expenses_cash, 80.0);
        assert_eq!(monthly_expenses(&store, "2020-01"), 30.0);
    }

    #[test]
    fn monthly_revenue_counts_completed_orders_only() {
        let store = open_empty();
        let done = orders::create_order(&store, basic_order(100.0, PaymentMethod::Cash)).unwrap();
        orders::update_order_status(&store, &done.id, OrderStatus::Completed, None).unwrap();
        orders::create_order(&store, basic_order(50.0, PaymentMethod::Cash)).unwrap();

        let month = Utc::now().format("%Y-%m").to_string();
        assert_eq!(monthly_revenue(&store, &month), 100.0);
    }
}
