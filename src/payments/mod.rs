mod stripe;

pub use stripe::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CheckoutMode {
    Payment,
    Subscription,
}

/// One priced line on a checkout session. Prices are inline (price_data)
/// so the plan catalog stays in our database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLineItem {
    pub name: String,
    pub unit_amount: i64,
    pub currency: String,
    /// Recurring interval ("month" / "year") for subscription mode
    pub interval: Option<String>,
    pub product_id: Option<String>,
}

/// Provider-agnostic description of a hosted checkout page.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub mode: CheckoutMode,
    pub line_item: CheckoutLineItem,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    /// Coupon ids applied to the session
    pub discounts: Vec<String>,
    /// Copied onto the session (and subscription) metadata
    pub metadata: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedCheckout {
    pub id: String,
    pub url: String,
    pub customer_id: Option<String>,
}

/// Outbound payment-provider operations. Injected into the app state so
/// handlers and the task runner never reach for a global client.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CreatedCheckout>;

    /// Refund a payment in full. Returns the provider's refund id.
    async fn create_refund(&self, payment_intent_id: &str, reason: &str) -> Result<String>;
}

/// Gateway used when no Stripe secret key is configured.
pub struct UnconfiguredGateway;

#[async_trait]
impl PaymentGateway for UnconfiguredGateway {
    async fn create_checkout_session(&self, _request: &CheckoutRequest) -> Result<CreatedCheckout> {
        Err(AppError::Internal("Stripe is not configured".into()))
    }

    async fn create_refund(&self, _payment_intent_id: &str, _reason: &str) -> Result<String> {
        Err(AppError::Internal("Stripe is not configured".into()))
    }
}
