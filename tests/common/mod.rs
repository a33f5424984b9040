//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use hmac::{Hmac, Mac};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde_json::{Value, json};
use sha2::Sha256;
use tower::ServiceExt;

pub use artlist::billing::WebhookSettings;
pub use artlist::db::{AppState, DbPool, queries};
pub use artlist::error::AppError;
pub use artlist::models::*;
pub use artlist::payments::{CheckoutMode, CheckoutRequest, CreatedCheckout, PaymentGateway};

pub const TEST_FRONTEND_URL: &str = "https://thestreetartlist.test";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const FREE_CALL_COUPON: &str = "FREECALL";

// ============ Database ============

/// Single-connection in-memory pool; every checkout sees the same database.
pub fn create_test_pool() -> DbPool {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        artlist::db::init_db(&conn).unwrap();
    }
    pool
}

// ============ Payment gateway ============

/// Records every call instead of talking to Stripe.
#[derive(Default)]
pub struct MockGateway {
    pub checkouts: Mutex<Vec<CheckoutRequest>>,
    pub refunds: Mutex<Vec<(String, String)>>,
    /// Make `create_refund` fail
    pub fail_refunds: bool,
    /// Make `create_checkout_session` fail with a provider error
    pub fail_checkouts: bool,
}

impl MockGateway {
    pub fn failing_refunds() -> Self {
        Self {
            fail_refunds: true,
            ..Default::default()
        }
    }

    pub fn failing_checkouts() -> Self {
        Self {
            fail_checkouts: true,
            ..Default::default()
        }
    }

    pub fn last_checkout(&self) -> Option<CheckoutRequest> {
        self.checkouts.lock().unwrap().last().cloned()
    }

    pub fn refund_count(&self) -> usize {
        self.refunds.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CreatedCheckout, AppError> {
        if self.fail_checkouts {
            return Err(AppError::Stripe {
                message: "No such coupon: 'BOGUS'".into(),
                data: json!({"code": "resource_missing", "param": "discounts[0][coupon]"}),
            });
        }
        let mut checkouts = self.checkouts.lock().unwrap();
        checkouts.push(request.clone());
        let n = checkouts.len();
        Ok(CreatedCheckout {
            id: format!("cs_test_{}", n),
            url: format!("https://checkout.stripe.test/c/pay/cs_test_{}", n),
            customer_id: Some("cus_from_checkout".into()),
        })
    }

    async fn create_refund(&self, payment_intent_id: &str, reason: &str) -> Result<String, AppError> {
        if self.fail_refunds {
            return Err(AppError::Stripe {
                message: "Refund failed".into(),
                data: json!({"code": "charge_disputed"}),
            });
        }
        let mut refunds = self.refunds.lock().unwrap();
        refunds.push((payment_intent_id.to_string(), reason.to_string()));
        Ok(format!("re_test_{}", refunds.len()))
    }
}

// ============ App state ============

pub fn test_settings() -> WebhookSettings {
    WebhookSettings {
        signing_secret: None,
        free_call_coupon: Some(FREE_CALL_COUPON.to_string()),
        dedupe: true,
    }
}

pub fn create_test_app_state_with(settings: WebhookSettings, gateway: Arc<MockGateway>) -> AppState {
    AppState {
        db: create_test_pool(),
        frontend_url: TEST_FRONTEND_URL.to_string(),
        gateway,
        webhooks: settings,
    }
}

pub fn create_test_app_state() -> AppState {
    create_test_app_state_with(test_settings(), Arc::new(MockGateway::default()))
}

pub fn test_app(state: AppState) -> Router {
    artlist::handlers::app(state)
}

// ============ Fixtures ============

pub fn create_test_user(conn: &Connection, email: &str, account_type: AccountType) -> User {
    queries::create_user(
        conn,
        &CreateUser {
            email: email.to_string(),
            name: email.split('@').next().unwrap_or("user").to_string(),
            account_type,
        },
    )
    .unwrap()
}

pub fn create_test_org(conn: &Connection, owner_id: &str, name: &str) -> Organization {
    queries::create_organization(
        conn,
        &CreateOrganization {
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            slug: name.to_lowercase().replace(' ', "-"),
        },
    )
    .unwrap()
}

/// Valid for an hour; returns the bearer token.
pub fn create_test_session(conn: &Connection, user_id: &str) -> String {
    let token = format!("sess_{}", uuid::Uuid::new_v4());
    let expires_at = chrono::Utc::now().timestamp() + 3600;
    queries::create_auth_session(conn, &token, user_id, expires_at).unwrap();
    token
}

pub fn create_test_plan(
    conn: &Connection,
    key: &str,
    account_type: AccountType,
    plan_number: i64,
    product_id: &str,
) -> Plan {
    queries::upsert_plan(
        conn,
        &UpsertPlan {
            key: key.to_string(),
            name: format!("{} plan", key),
            account_type,
            plan_number,
            stripe_product_id: Some(product_id.to_string()),
            monthly_price: Some(plan_number * 300),
            yearly_price: Some(plan_number * 3000),
            one_time_price: Some(5000),
            features: vec![],
        },
    )
    .unwrap()
}

pub fn create_test_open_call(conn: &Connection, organization_id: &str, title: &str) -> OpenCall {
    queries::create_open_call(
        conn,
        &CreateOpenCall {
            organization_id: organization_id.to_string(),
            title: title.to_string(),
        },
    )
    .unwrap()
}

pub fn create_test_online_event(conn: &Connection, name: &str, capacity_max: i64) -> OnlineEvent {
    queries::create_online_event(
        conn,
        &CreateOnlineEvent {
            organization_id: None,
            name: name.to_string(),
            price: 2500,
            currency: "usd".to_string(),
            capacity_max,
            starts_at: None,
        },
    )
    .unwrap()
}

pub fn create_test_newsletter(conn: &Connection, user: &User, frequency: NewsletterFrequency) -> NewsletterSubscription {
    queries::create_newsletter_subscription(
        conn,
        &CreateNewsletterSubscription {
            user_id: Some(user.id.clone()),
            email: user.email.clone(),
            frequency,
            types: vec!["openCall".into()],
        },
    )
    .unwrap()
}

/// An active artist subscription already linked to Stripe.
pub fn create_active_subscription(
    conn: &Connection,
    kind: SubscriptionKind,
    owner_id: &str,
    stripe_id: &str,
    plan: &Plan,
    amount: i64,
) -> Subscription {
    let sub = queries::create_subscription(
        conn,
        &CreateSubscription {
            kind,
            owner_id: owner_id.to_string(),
            customer_id: Some("cus_test".into()),
            status: "active".into(),
            paid_status: true,
        },
    )
    .unwrap();
    queries::update_subscription(
        conn,
        kind,
        &sub.id,
        &SubscriptionPatch {
            stripe_subscription_id: Some(stripe_id.to_string()),
            plan: Some(plan.plan_number),
            plan_key: Some(plan.key.clone()),
            amount: Some(amount),
            currency: Some("usd".into()),
            interval: Some("month".into()),
            ..Default::default()
        },
    )
    .unwrap();
    queries::get_subscription_by_id(conn, kind, &sub.id).unwrap().unwrap()
}

// ============ Stripe events ============

pub fn stripe_event(id: &str, event_type: &str, object: Value) -> Value {
    json!({
        "id": id,
        "object": "event",
        "type": event_type,
        "created": 1_700_000_000,
        "livemode": false,
        "data": { "object": object }
    })
}

pub fn stripe_update_event(id: &str, object: Value, previous_attributes: Value) -> Value {
    json!({
        "id": id,
        "object": "event",
        "type": "customer.subscription.updated",
        "created": 1_700_000_000,
        "livemode": false,
        "data": { "object": object, "previous_attributes": previous_attributes }
    })
}

/// Subscription object with one item priced at `amount` for `product`.
pub fn stripe_subscription(id: &str, status: &str, product: &str, amount: i64) -> Value {
    json!({
        "id": id,
        "object": "subscription",
        "customer": "cus_test",
        "status": status,
        "cancel_at_period_end": false,
        "current_period_start": 1_700_000_000,
        "current_period_end": 1_702_592_000,
        "items": { "data": [{
            "price": {
                "id": format!("price_{}", product),
                "unit_amount": amount,
                "currency": "usd",
                "recurring": { "interval": "month" },
                "product": product
            }
        }]}
    })
}

pub fn sign_payload(secret: &str, timestamp: i64, payload: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

pub async fn post_webhook(app: Router, body: String, signature: Option<String>) -> Response<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri("/webhooks/stripe")
        .header("content-type", "application/json");
    if let Some(sig) = signature {
        request = request.header("stripe-signature", sig);
    }
    app.oneshot(request.body(Body::from(body)).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, token: Option<&str>, body: Value) -> Response<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        request = request.header("Authorization", format!("Bearer {}", token));
    }
    app.oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}
