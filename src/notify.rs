//! Fire-and-forget webhook notifications for approval events.
//!
//! Managers may not be at the terminal when a cashier files a void or
//! refund request, so the store posts a small JSON payload to a configured
//! webhook on submission and resolution. Delivery is best effort: failures
//! are logged and never affect the workflow itself.

use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

use crate::types::{RequestStatus, VoidRefundRequest};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Notifier {
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn new(webhook_url: &str) -> Notifier {
        let url = webhook_url.trim();
        Notifier {
            webhook_url: (!url.is_empty()).then(|| url.to_string()),
        }
    }

    pub fn disabled() -> Notifier {
        Notifier { webhook_url: None }
    }

    /// A new request needs a manager's attention.
    pub fn request_submitted(&self, request: &VoidRefundRequest) {
        self.post(json!({
            "event": "void_refund_requested",
            "requestId": request.id,
            "orderNumber": request.order_number,
            "type": request.kind,
            "reason": request.reason,
            "requestedByName": request.requested_by_name,
            "requestedAt": request.requested_at,
        }));
    }

    /// A pending request was approved or rejected.
    pub fn request_resolved(&self, request: &VoidRefundRequest, status: RequestStatus) {
        self.post(json!({
            "event": "void_refund_resolved",
            "requestId": request.id,
            "orderNumber": request.order_number,
            "status": status,
            "approvedByName": request.approved_by_name,
        }));
    }

    fn post(&self, payload: Value) {
        let Some(url) = self.webhook_url.clone() else {
            return;
        };
        tokio::spawn(async move {
            let client = match Client::builder().timeout(NOTIFY_TIMEOUT).build() {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "notification client build failed");
                    return;
                }
            };
            match client.post(&url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(event = payload["event"].as_str(), "notification delivered");
                }
                Ok(resp) => {
                    warn!(status = %resp.status(), "notification rejected");
                }
                Err(e) => warn!(error = %e, "notification delivery failed"),
            }
        });
    }
}
