//! Domain records shared across every engine in the crate.
//!
//! All records serialize with camelCase keys. That is the shape stored in
//! the local collection cache and handed to callers; the remote wire format
//! is derived from it in `registry` by renaming top-level keys to
//! snake_case. Timestamps are RFC 3339 strings throughout so rows survive
//! JSON round-trips without losing precision.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current wall-clock time as an RFC 3339 string, the only timestamp
/// format persisted anywhere in the store.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockItem {
    pub id: String,
    pub name: String,
    pub category: String,
    /// On-hand quantity. May legitimately go negative when orders are rung
    /// up faster than deliveries are recorded.
    pub current_quantity: f64,
    pub min_quantity: f64,
    pub unit: String,
    /// Cost per unit, used by restock suggestions to estimate order cost.
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_restock_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockMovement {
    Initial,
    In,
    Out,
    Adjustment,
}

/// Append-only audit record for every stock quantity change. Replaying all
/// logs for an item from its initial entry must reproduce the current
/// quantity exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryLog {
    pub id: String,
    pub stock_item_id: String,
    pub stock_item_name: String,
    #[serde(rename = "type")]
    pub movement: StockMovement,
    /// Effective delta applied, always the difference between
    /// `new_quantity` and `previous_quantity` in absolute terms.
    pub quantity: f64,
    pub previous_quantity: f64,
    pub new_quantity: f64,
    pub reason: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

// ---------------------------------------------------------------------------
// Menu, recipes, modifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    pub category: String,
    pub price: f64,
    #[serde(default = "default_true")]
    pub is_available: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeIngredient {
    pub stock_item_id: String,
    pub stock_item_name: String,
    /// Amount of the ingredient consumed per single unit of the menu item.
    pub quantity: f64,
    pub unit: String,
    #[serde(default)]
    pub cost_per_unit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: String,
    pub menu_item_id: String,
    pub menu_item_name: String,
    pub ingredients: Vec<RecipeIngredient>,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifierIngredient {
    pub stock_item_id: String,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifierOption {
    pub id: String,
    pub group_id: String,
    pub name: String,
    #[serde(default)]
    pub extra_price: f64,
    #[serde(default = "default_true")]
    pub is_available: bool,
    /// Extra ingredients consumed when this option is selected, on top of
    /// the base recipe.
    #[serde(default)]
    pub ingredients: Vec<ModifierIngredient>,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedModifier {
    pub group_id: String,
    pub group_name: String,
    pub option_id: String,
    pub option_name: String,
    #[serde(default)]
    pub extra_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Menu item id, used to look up the recipe for deduction.
    pub id: String,
    pub name: String,
    pub price: f64,
    pub quantity: u32,
    #[serde(default)]
    pub selected_modifiers: Vec<SelectedModifier>,
    pub item_total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderType {
    Takeaway,
    DineIn,
    Delivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Preparing,
    Ready,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Position in the lifecycle. Transitions must move forward, except
    /// that any non-completed order may jump to `Cancelled`.
    pub fn rank(self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Preparing => 1,
            OrderStatus::Ready => 2,
            OrderStatus::Completed => 3,
            OrderStatus::Cancelled => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Ewallet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub order_number: String,
    pub items: Vec<CartItem>,
    pub total: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax: Option<f64>,
    pub order_type: OrderType,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeemed_points: Option<i64>,
    /// Currency value of the redeemed points, already subtracted from
    /// `total` by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redemption_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loyalty_points_earned: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staff_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staff_name: Option<String>,
    /// Kitchen staff member who took the order into preparation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepared_by: Option<String>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preparing_started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Order history and void/refund
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderVoidRefundStatus {
    None,
    PendingVoid,
    PendingRefund,
    Voided,
    Refunded,
    PartialRefund,
}

/// Reporting shadow of an order. Created alongside the order and kept in a
/// separate collection so void/refund annotations never mutate the live
/// order queue shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderHistoryItem {
    #[serde(flatten)]
    pub order: Order,
    #[serde(default = "default_vr_status")]
    pub void_refund_status: OrderVoidRefundStatus,
    #[serde(default)]
    pub refund_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voided_at: Option<String>,
}

fn default_vr_status() -> OrderVoidRefundStatus {
    OrderVoidRefundStatus::None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoidRefundType {
    Void,
    Refund,
    PartialRefund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundItem {
    pub item_id: String,
    pub item_name: String,
    pub quantity: u32,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReversalItem {
    pub item_id: String,
    pub item_name: String,
    pub quantity: u32,
}

/// Snapshot of what an approval actually reversed, written at approval
/// time so later edits to the order cannot change the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReversalDetails {
    pub sales_deducted: f64,
    pub inventory_items: Vec<ReversalItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoidRefundRequest {
    pub id: String,
    pub order_id: String,
    pub order_number: String,
    #[serde(rename = "type")]
    pub kind: VoidRefundType,
    pub reason: String,
    /// Refund amount. `None` for voids, where the full order total applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_to_refund: Option<Vec<RefundItem>>,
    pub requested_by: String,
    pub requested_by_name: String,
    pub requested_at: String,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub sales_reversed: bool,
    #[serde(default)]
    pub inventory_reversed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversal_details: Option<ReversalDetails>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Customers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerSegment {
    New,
    Regular,
    Vip,
}

impl CustomerSegment {
    /// Segment derived from the current points balance. Recomputed after
    /// every award and redemption, so spending points can demote a
    /// customer back below a threshold.
    pub fn for_points(points: i64) -> CustomerSegment {
        if points >= 500 {
            CustomerSegment::Vip
        } else if points >= 100 {
            CustomerSegment::Regular
        } else {
            CustomerSegment::New
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub loyalty_points: i64,
    #[serde(default)]
    pub total_spent: f64,
    #[serde(default)]
    pub total_orders: i64,
    pub segment: CustomerSegment,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_order_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Cash register and finance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashRegister {
    pub id: String,
    pub status: RegisterStatus,
    pub opened_at: String,
    pub opened_by: String,
    pub start_cash: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_by: Option<String>,
    /// start_cash plus cash-paid completed orders since opening, computed
    /// at close time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_cash: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_cash: Option<f64>,
    /// actual_cash minus expected_cash. Negative means the drawer is short.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: String,
}

/// One row per calendar day aggregating takings by payment method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCashFlow {
    pub id: String,
    /// Calendar date, `YYYY-MM-DD`.
    pub date: String,
    #[serde(default)]
    pub opening_cash: f64,
    #[serde(default)]
    pub sales_cash: f64,
    #[serde(default)]
    pub sales_card: f64,
    #[serde(default)]
    pub sales_ewallet: f64,
    #[serde(default)]
    pub expenses_cash: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closing_cash: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub category: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Calendar date, `YYYY-MM-DD`.
    pub date: String,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Staff and KPI
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffProfile {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Raw KPI metrics, each scored 0 to 100 before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct KpiMetrics {
    pub meal_prep_time: f64,
    pub attendance: f64,
    pub emergency_leave: f64,
    pub upselling: f64,
    pub customer_rating: f64,
    pub waste_reduction: f64,
    pub training_complete: f64,
    pub ot_willingness: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffKpi {
    pub id: String,
    pub staff_id: String,
    pub staff_name: String,
    /// Evaluation period, `YYYY-MM`.
    pub period: String,
    pub metrics: KpiMetrics,
    /// Weighted score rounded to the nearest integer.
    pub overall_score: i64,
    pub bonus_amount: f64,
    /// 1-based rank within the period, recomputed whenever any score in
    /// the period changes.
    #[serde(default)]
    pub rank: u32,
    pub updated_at: String,
}

// ---------------------------------------------------------------------------
// Suppliers and purchasing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Supplier {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub rating: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseOrderStatus {
    Pending,
    Ordered,
    Received,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderItem {
    pub stock_item_id: String,
    pub stock_item_name: String,
    pub quantity: f64,
    pub unit_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrder {
    pub id: String,
    pub po_number: String,
    pub supplier_id: String,
    pub items: Vec<PurchaseOrderItem>,
    pub total: f64,
    pub status: PurchaseOrderStatus,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Restock suggestions (derived, never persisted)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockSuggestion {
    pub stock_item_id: String,
    pub stock_item_name: String,
    pub current_quantity: f64,
    pub average_daily_usage: f64,
    pub suggested_reorder_point: f64,
    pub suggested_order_quantity: f64,
    pub estimated_cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier: Option<String>,
}
