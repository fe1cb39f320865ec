//! Customer loyalty ledger.
//!
//! Points are awarded one per whole currency unit actually paid, redeemed
//! ahead of the award within the same order, and drive the customer's
//! segment (`new` under 100 points, `regular` from 100, `vip` from 500).

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{PosStore, StoreState};
use crate::sync;
use crate::types::*;

pub struct NewCustomer {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
}

pub fn add_customer(store: &Arc<PosStore>, input: NewCustomer) -> Customer {
    let customer = Customer {
        id: Uuid::new_v4().to_string(),
        name: input.name,
        phone: input.phone,
        email: input.email,
        loyalty_points: 0,
        total_spent: 0.0,
        total_orders: 0,
        segment: CustomerSegment::New,
        created_at: now_rfc3339(),
        last_order_at: None,
    };
    sync::create(store, customer)
}

pub fn update_customer(
    store: &Arc<PosStore>,
    id: &str,
    patch: impl FnOnce(&mut Customer),
) -> Result<(), StoreError> {
    if sync::update::<Customer>(store, id, patch) {
        Ok(())
    } else {
        Err(StoreError::CustomerNotFound(id.to_string()))
    }
}

pub fn delete_customer(store: &Arc<PosStore>, id: &str) -> Result<(), StoreError> {
    if sync::delete::<Customer>(store, id) {
        Ok(())
    } else {
        Err(StoreError::CustomerNotFound(id.to_string()))
    }
}

/// Manual point grant (goodwill, promotions). Re-derives the segment.
pub fn award_points(
    store: &Arc<PosStore>,
    customer_id: &str,
    points: i64,
) -> Result<Customer, StoreError> {
    if points <= 0 {
        return Err(StoreError::InvalidAmount);
    }
    adjust_points(store, customer_id, points)
}

/// Manual redemption outside an order. Never drives the balance negative.
pub fn redeem_points(
    store: &Arc<PosStore>,
    customer_id: &str,
    points: i64,
) -> Result<Customer, StoreError> {
    if points <= 0 {
        return Err(StoreError::InvalidAmount);
    }
    let balance = store
        .state()
        .customers
        .iter()
        .find(|c| c.id == customer_id)
        .map(|c| c.loyalty_points)
        .ok_or_else(|| StoreError::CustomerNotFound(customer_id.to_string()))?;
    if points > balance {
        return Err(StoreError::InsufficientPoints);
    }
    adjust_points(store, customer_id, -points)
}

fn adjust_points(
    store: &Arc<PosStore>,
    customer_id: &str,
    delta: i64,
) -> Result<Customer, StoreError> {
    let found = sync::update::<Customer>(store, customer_id, |c| {
        c.loyalty_points += delta;
        c.segment = CustomerSegment::for_points(c.loyalty_points);
    });
    if !found {
        return Err(StoreError::CustomerNotFound(customer_id.to_string()));
    }
    store
        .state()
        .customers
        .iter()
        .find(|c| c.id == customer_id)
        .cloned()
        .ok_or_else(|| StoreError::CustomerNotFound(customer_id.to_string()))
}

pub fn find_by_phone(store: &Arc<PosStore>, phone: &str) -> Option<Customer> {
    store
        .state()
        .customers
        .iter()
        .find(|c| c.phone == phone)
        .cloned()
}

/// Settle an order against its customer's ledger: validate and subtract
/// the redemption, award points on the amount paid, refresh lifetime
/// spend, order count and segment, and annotate the order with the
/// customer name and earned points.
///
/// Walk-in orders (no customer id) are a no-op. Returns the updated
/// customer for the caller to persist and push.
pub(crate) fn apply_order_loyalty(
    state: &mut StoreState,
    order: &mut Order,
) -> Result<Option<Customer>, StoreError> {
    let Some(customer_id) = order.customer_id.clone() else {
        return Ok(None);
    };
    let customer = state
        .customers
        .iter_mut()
        .find(|c| c.id == customer_id)
        .ok_or(StoreError::CustomerNotFound(customer_id))?;

    let redeemed = order.redeemed_points.unwrap_or(0);
    if redeemed < 0 {
        return Err(StoreError::InvalidAmount);
    }
    if redeemed > customer.loyalty_points {
        return Err(StoreError::InsufficientPoints);
    }

    let earned = order.total.max(0.0).floor() as i64;
    customer.loyalty_points = customer.loyalty_points - redeemed + earned;
    customer.total_spent += order.total;
    customer.total_orders += 1;
    customer.last_order_at = Some(order.created_at.clone());
    customer.segment = CustomerSegment::for_points(customer.loyalty_points);

    order.customer_name = Some(customer.name.clone());
    order.loyalty_points_earned = Some(earned);

    info!(
        customer = customer.name,
        redeemed,
        earned,
        balance = customer.loyalty_points,
        "loyalty applied"
    );
    Ok(Some(customer.clone()))
}

// ===========================================================================
// Tests
// ===========================================================================
