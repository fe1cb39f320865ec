//! Cash register sessions.
//!
//! At most one session is open at a time. Closing reconciles the drawer:
//! expected cash is the opening float plus every cash-paid completed order
//! since the session opened, and the committed record stores that full
//! expectation alongside the counted amount and the signed variance.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::finance;
use crate::store::{PosStore, StoreState};
use crate::sync;
use crate::types::*;

/// The open session, if any.
pub fn open_register_session(store: &Arc<PosStore>) -> Option<CashRegister> {
    store
        .state()
        .cash_registers
        .iter()
        .find(|r| r.status == RegisterStatus::Open)
        .cloned()
}

fn expected_cash(state: &StoreState, register: &CashRegister) -> f64 {
    let cash_sales: f64 = state
        .orders
        .iter()
        .filter(|o| {
            o.status == OrderStatus::Completed
                && o.payment_method == Some(PaymentMethod::Cash)
                && o.created_at.as_str() >= register.opened_at.as_str()
        })
        .map(|o| o.total)
        .sum();
    register.start_cash + cash_sales
}

/// What the drawer should hold right now, for operator display before
/// committing a close.
pub fn expected_cash_preview(store: &Arc<PosStore>) -> Result<f64, StoreError> {
    let state = store.state();
    let register = state
        .cash_registers
        .iter()
        .find(|r| r.status == RegisterStatus::Open)
        .ok_or(StoreError::NoOpenRegister)?;
    Ok(expected_cash(&state, register))
}

pub fn open_register(
    store: &Arc<PosStore>,
    opened_by: &str,
    start_cash: f64,
) -> Result<CashRegister, StoreError> {
    if start_cash < 0.0 {
        return Err(StoreError::InvalidAmount);
    }

    let (register, flow) = {
        let mut state = store.state();
        if state
            .cash_registers
            .iter()
            .any(|r| r.status == RegisterStatus::Open)
        {
            return Err(StoreError::RegisterAlreadyOpen);
        }

        let now = now_rfc3339();
        let register = CashRegister {
            id: Uuid::new_v4().to_string(),
            status: RegisterStatus::Open,
            opened_at: now.clone(),
            opened_by: opened_by.to_string(),
            start_cash,
            closed_at: None,
            closed_by: None,
            expected_cash: None,
            actual_cash: None,
            variance: None,
            notes: None,
            created_at: now,
        };
        state.cash_registers.insert(0, register.clone());
        let flow = finance::record_opening_cash(&mut state, start_cash);

        store.persist_collection::<CashRegister>(&state);
        if flow.is_some() {
            store.persist_collection::<DailyCashFlow>(&state);
        }
        (register, flow)
    };

    info!(opened_by, start_cash, "register opened");
    sync::push_insert(store, register.clone());
    if let Some(flow) = flow {
        finance::push_flow(store, flow);
    }
    Ok(register)
}

pub fn close_register(
    store: &Arc<PosStore>,
    closed_by: &str,
    actual_cash: f64,
    notes: Option<&str>,
) -> Result<CashRegister, StoreError> {
    if actual_cash < 0.0 {
        return Err(StoreError::InvalidAmount);
    }

    let (register, flow) = {
        let mut state = store.state();
        let Some(index) = state
            .cash_registers
            .iter()
            .position(|r| r.status == RegisterStatus::Open)
        else {
            return Err(StoreError::NoOpenRegister);
        };

        let expected = expected_cash(&state, &state.cash_registers[index]);
        let register = &mut state.cash_registers[index];
        register.status = RegisterStatus::Closed;
        register.closed_at = Some(now_rfc3339());
        register.closed_by = Some(closed_by.to_string());
        register.expected_cash = Some(expected);
        register.actual_cash = Some(actual_cash);
        register.variance = Some(actual_cash - expected);
        register.notes = notes.map(str::to_string);
        let register = register.clone();

        let flow = finance::record_closing_cash(&mut state, actual_cash);

        store.persist_collection::<CashRegister>(&state);
        if flow.is_some() {
            store.persist_collection::<DailyCashFlow>(&state);
        }
        (register, flow)
    };

    info!(
        closed_by,
        expected = register.expected_cash,
        actual = actual_cash,
        variance = register.variance,
        "register closed"
    );
    sync::push_update(store, register.clone());
    if let Some(flow) = flow {
        finance::push_flow(store, flow);
    }
    Ok(register)
}

// ===========================================================================
// Tests
// ===========================================================================
