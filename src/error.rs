//! Validation-error taxonomy for store operations.
//!
//! Only *validation* failures live here, conditions the calling UI must
//! check and show to the operator ("register already open", "order not
//! found"). Remote sync failures never appear in this enum: an optimistic
//! local write is kept regardless of whether the push succeeded, and the
//! failure is only observable through the diagnostics sync log.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Void/refund request not found: {0}")]
    RequestNotFound(String),

    #[error("Request is not pending")]
    RequestNotPending,

    #[error("Order already has a pending or completed void/refund request")]
    RequestAlreadyOpen,

    #[error("Register already open")]
    RegisterAlreadyOpen,

    #[error("No open register to close")]
    NoOpenRegister,

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Insufficient loyalty points")]
    InsufficientPoints,

    #[error("Stock item not found: {0}")]
    StockItemNotFound(String),

    #[error("Invalid order status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Amount must be positive")]
    InvalidAmount,
}
