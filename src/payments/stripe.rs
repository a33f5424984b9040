use std::collections::HashMap;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{CheckoutRequest, CreatedCheckout, PaymentGateway};
use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Signatures older than this are rejected as replays.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionResponse {
    id: String,
    url: Option<String>,
    customer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
}

impl StripeClient {
    pub fn new(secret_key: &str) -> Self {
        Self {
            client: Client::new(),
            secret_key: secret_key.to_string(),
            api_base: STRIPE_API_BASE.to_string(),
        }
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T> {
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Stripe API error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = body["error"]["message"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("Stripe request failed with status {}", status));
            return Err(AppError::Stripe {
                message,
                data: body["error"].clone(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse Stripe response: {}", e)))
    }
}

/// Flatten a checkout request into Stripe's bracketed form encoding.
pub fn checkout_form(request: &CheckoutRequest) -> Vec<(String, String)> {
    let mut form: Vec<(String, String)> = vec![
        ("mode".into(), request.mode.as_ref().to_string()),
        ("success_url".into(), request.success_url.clone()),
        ("cancel_url".into(), request.cancel_url.clone()),
        ("line_items[0][quantity]".into(), "1".into()),
        (
            "line_items[0][price_data][currency]".into(),
            request.line_item.currency.clone(),
        ),
        (
            "line_items[0][price_data][unit_amount]".into(),
            request.line_item.unit_amount.to_string(),
        ),
    ];

    match &request.line_item.product_id {
        Some(product) => form.push(("line_items[0][price_data][product]".into(), product.clone())),
        None => form.push((
            "line_items[0][price_data][product_data][name]".into(),
            request.line_item.name.clone(),
        )),
    }

    if let Some(interval) = &request.line_item.interval {
        form.push((
            "line_items[0][price_data][recurring][interval]".into(),
            interval.clone(),
        ));
    }

    match (&request.customer_id, &request.customer_email) {
        (Some(customer), _) => form.push(("customer".into(), customer.clone())),
        (None, Some(email)) => form.push(("customer_email".into(), email.clone())),
        (None, None) => {}
    }

    if request.discounts.is_empty() {
        form.push(("allow_promotion_codes".into(), "true".into()));
    } else {
        for (i, coupon) in request.discounts.iter().enumerate() {
            form.push((format!("discounts[{}][coupon]", i), coupon.clone()));
        }
    }

    for (key, value) in &request.metadata {
        form.push((format!("metadata[{}]", key), value.clone()));
        if request.mode == super::CheckoutMode::Subscription {
            form.push((format!("subscription_data[metadata][{}]", key), value.clone()));
        } else {
            form.push((format!("payment_intent_data[metadata][{}]", key), value.clone()));
        }
    }

    form
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CreatedCheckout> {
        let session: CheckoutSessionResponse =
            self.post_form("/checkout/sessions", &checkout_form(request)).await?;

        let url = session
            .url
            .ok_or_else(|| AppError::Internal("Stripe returned a session without a URL".into()))?;

        Ok(CreatedCheckout {
            id: session.id,
            url,
            customer_id: session.customer,
        })
    }

    async fn create_refund(&self, payment_intent_id: &str, reason: &str) -> Result<String> {
        let form = vec![
            ("payment_intent".to_string(), payment_intent_id.to_string()),
            ("reason".to_string(), "requested_by_customer".to_string()),
            ("metadata[reason]".to_string(), reason.to_string()),
        ];
        let refund: RefundResponse = self.post_form("/refunds", &form).await?;
        Ok(refund.id)
    }
}

/// Verify a `stripe-signature` header (`t=<ts>,v1=<hex>[,v1=<hex>...]`).
///
/// Returns `Ok(false)` for a wrong signature or a timestamp outside the
/// tolerance window, and an error when the header is malformed.
pub fn verify_webhook_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: i64,
) -> Result<bool> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = Some(v),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| AppError::BadRequest("Missing timestamp in signature header".into()))?;
    if signatures.is_empty() {
        return Err(AppError::BadRequest("Missing v1 signature in signature header".into()));
    }

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid timestamp in signature header".into()))?;
    let within_tolerance = now
        .checked_sub(ts)
        .map(|age| age.unsigned_abs() <= WEBHOOK_TOLERANCE_SECS.unsigned_abs())
        .unwrap_or(false);
    if !within_tolerance {
        return Ok(false);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("Invalid webhook secret".into()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    Ok(signatures
        .iter()
        .any(|sig| expected.as_bytes().ct_eq(sig.as_bytes()).into()))
}

// ============ Event payloads ============

#[derive(Debug, Clone, Deserialize)]
pub struct StripeWebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub livemode: bool,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: Value,
    #[serde(default)]
    pub previous_attributes: Option<Value>,
}

/// A field Stripe returns either as a bare id or as an expanded object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StripeRef {
    Id(String),
    Object { id: String },
}

impl StripeRef {
    pub fn id(&self) -> &str {
        match self {
            StripeRef::Id(id) => id,
            StripeRef::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> Default for StripeList<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StripeCustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSessionDiscount {
    #[serde(default)]
    pub coupon: Option<StripeRef>,
    #[serde(default)]
    pub promotion_code: Option<StripeRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_details: Option<StripeCustomerDetails>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub amount_subtotal: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub discounts: Vec<StripeSessionDiscount>,
}

impl StripeCheckoutSession {
    pub fn email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.email.as_deref())
            .or(self.customer_email.as_deref())
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn coupon_ids(&self) -> impl Iterator<Item = &str> {
        self.discounts
            .iter()
            .filter_map(|d| d.coupon.as_ref().map(StripeRef::id))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeRecurring {
    pub interval: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub unit_amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub recurring: Option<StripeRecurring>,
    #[serde(default)]
    pub product: Option<StripeRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionItem {
    pub price: StripePrice,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCoupon {
    pub id: String,
    #[serde(default)]
    pub percent_off: Option<f64>,
    #[serde(default)]
    pub amount_off: Option<i64>,
    #[serde(default)]
    pub duration: Option<String>,
}

/// Discount object, embedded in subscriptions and sent by `customer.discount.*`.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeDiscount {
    pub coupon: StripeCoupon,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StripeCancellationDetails {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    pub status: String,
    #[serde(default)]
    pub items: StripeList<StripeSubscriptionItem>,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub canceled_at: Option<i64>,
    #[serde(default)]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub cancellation_details: Option<StripeCancellationDetails>,
    #[serde(default)]
    pub discount: Option<StripeDiscount>,
    #[serde(default)]
    pub trial_end: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl StripeSubscription {
    pub fn first_item(&self) -> Option<&StripeSubscriptionItem> {
        self.items.data.first()
    }

    /// Billing period, read from the subscription or (newer API versions) its first item.
    pub fn period(&self) -> (Option<i64>, Option<i64>) {
        let item = self.first_item();
        (
            self.current_period_start
                .or_else(|| item.and_then(|i| i.current_period_start)),
            self.current_period_end
                .or_else(|| item.and_then(|i| i.current_period_end)),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePeriod {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeInvoiceLine {
    #[serde(default)]
    pub period: Option<StripePeriod>,
    #[serde(default)]
    pub price: Option<StripePrice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorInfo {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub billing_reason: Option<String>,
    #[serde(default)]
    pub amount_paid: Option<i64>,
    #[serde(default)]
    pub amount_due: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub attempt_count: Option<i64>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub lines: StripeList<StripeInvoiceLine>,
    #[serde(default)]
    pub last_finalization_error: Option<StripeErrorInfo>,
}

impl StripeInvoice {
    pub fn line_period(&self) -> Option<&StripePeriod> {
        self.lines.data.iter().find_map(|l| l.period.as_ref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCharge {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub amount_refunded: i64,
    #[serde(default)]
    pub refunded: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEarlyFraudWarning {
    pub id: String,
    #[serde(default)]
    pub charge: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::{CheckoutLineItem, CheckoutMode};

    fn sign(secret: &str, ts: i64, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.", ts).as_bytes());
        mac.update(payload);
        format!("t={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_signature_accepts_valid_and_rejects_tampered() {
        let payload = br#"{"type":"invoice.paid"}"#;
        let header = sign("whsec_abc", 1_700_000_000, payload);

        assert!(verify_webhook_signature("whsec_abc", payload, &header, 1_700_000_010).unwrap());
        assert!(!verify_webhook_signature("whsec_other", payload, &header, 1_700_000_010).unwrap());
        assert!(
            !verify_webhook_signature("whsec_abc", b"{}", &header, 1_700_000_010).unwrap()
        );
    }

    #[test]
    fn test_signature_outside_tolerance_is_rejected() {
        let payload = b"{}";
        let header = sign("whsec_abc", 1_700_000_000, payload);
        let late = 1_700_000_000 + WEBHOOK_TOLERANCE_SECS + 1;
        assert!(!verify_webhook_signature("whsec_abc", payload, &header, late).unwrap());
    }

    #[test]
    fn test_signature_extreme_timestamp_is_rejected() {
        assert!(
            !verify_webhook_signature("s", b"{}", "t=-9223372036854775808,v1=00", 1_700_000_000)
                .unwrap()
        );
        assert!(
            !verify_webhook_signature("s", b"{}", "t=9223372036854775807,v1=00", -1_700_000_000)
                .unwrap()
        );
    }

    #[test]
    fn test_signature_malformed_header_errors() {
        assert!(verify_webhook_signature("s", b"{}", "garbage", 0).is_err());
        assert!(verify_webhook_signature("s", b"{}", "v1=abc", 0).is_err());
        assert!(verify_webhook_signature("s", b"{}", "t=123", 0).is_err());
    }

    #[test]
    fn test_checkout_form_subscription_with_coupon() {
        let request = CheckoutRequest {
            mode: CheckoutMode::Subscription,
            line_item: CheckoutLineItem {
                name: "Banana".into(),
                unit_amount: 300,
                currency: "usd".into(),
                interval: Some("month".into()),
                product_id: None,
            },
            customer_id: Some("cus_1".into()),
            customer_email: Some("a@example.com".into()),
            success_url: "https://x/s".into(),
            cancel_url: "https://x/c".into(),
            discounts: vec!["FREECALL".into()],
            metadata: vec![("plan_key".into(), "banana".into())],
        };

        let form = checkout_form(&request);
        let has = |k: &str, v: &str| form.iter().any(|(a, b)| a == k && b == v);

        assert!(has("mode", "subscription"));
        assert!(has("customer", "cus_1"));
        assert!(!form.iter().any(|(k, _)| k == "customer_email"));
        assert!(has("line_items[0][price_data][recurring][interval]", "month"));
        assert!(has("discounts[0][coupon]", "FREECALL"));
        assert!(!form.iter().any(|(k, _)| k == "allow_promotion_codes"));
        assert!(has("subscription_data[metadata][plan_key]", "banana"));
    }

    #[test]
    fn test_session_coupon_ids_handle_expanded_and_bare() {
        let session: StripeCheckoutSession = serde_json::from_value(serde_json::json!({
            "id": "cs_1",
            "discounts": [
                {"coupon": "FREECALL"},
                {"coupon": {"id": "SPRING", "percent_off": 10.0}},
                {"promotion_code": "promo_1"}
            ]
        }))
        .unwrap();

        let ids: Vec<&str> = session.coupon_ids().collect();
        assert_eq!(ids, vec!["FREECALL", "SPRING"]);
    }
}
