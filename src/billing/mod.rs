//! Stripe event reconciliation.
//!
//! `process_event` maps an already-logged webhook event onto the subscription,
//! user, organization, newsletter and open-call tables. Each branch looks up
//! its rows by secondary index and issues independent patch statements; there
//! is no transaction spanning the branch.

mod checkout;
mod customer;
pub mod derived;
mod invoice;
pub mod newsletter;
mod plan_state;
mod subscription;

pub use plan_state::sync_owner_plan;

use rusqlite::Connection;
use serde::de::DeserializeOwned;
use strum::EnumString;

use crate::config::Config;
use crate::error::Result;
use crate::payments::StripeWebhookEvent;

/// Metadata value that marks a checkout as a one-time payment.
pub const ONE_TIME_PAYMENT: &str = "One-time";
pub const RECURRING_PAYMENT: &str = "Recurring";

#[derive(Debug, Clone, Default)]
pub struct WebhookSettings {
    /// Stripe endpoint secret; `None` disables signature checks
    pub signing_secret: Option<String>,
    pub free_call_coupon: Option<String>,
    /// Skip dispatch for event ids that already have a log row
    pub dedupe: bool,
}

impl WebhookSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            signing_secret: config.stripe_webhook_secret.clone(),
            free_call_coupon: config.free_call_coupon_id.clone(),
            dedupe: config.dedupe_webhook_events,
        }
    }
}

/// Stripe event types this service reacts to.
#[derive(Debug, Clone, PartialEq, Eq, EnumString)]
pub enum StripeEventKind {
    #[strum(serialize = "checkout.session.completed")]
    CheckoutSessionCompleted,
    #[strum(serialize = "checkout.session.async_payment_succeeded")]
    CheckoutAsyncPaymentSucceeded,
    #[strum(serialize = "checkout.session.async_payment_failed")]
    CheckoutAsyncPaymentFailed,
    #[strum(serialize = "checkout.session.expired")]
    CheckoutSessionExpired,
    #[strum(serialize = "customer.subscription.created")]
    SubscriptionCreated,
    #[strum(serialize = "customer.subscription.updated")]
    SubscriptionUpdated,
    #[strum(serialize = "customer.subscription.deleted")]
    SubscriptionDeleted,
    #[strum(serialize = "customer.subscription.paused")]
    SubscriptionPaused,
    #[strum(serialize = "customer.subscription.resumed")]
    SubscriptionResumed,
    #[strum(serialize = "customer.subscription.trial_will_end")]
    SubscriptionTrialWillEnd,
    #[strum(serialize = "invoice.paid", serialize = "invoice.payment_succeeded")]
    InvoicePaid,
    #[strum(serialize = "invoice.payment_failed")]
    InvoicePaymentFailed,
    #[strum(
        serialize = "invoice.upcoming",
        serialize = "invoice.created",
        serialize = "invoice.finalized"
    )]
    InvoiceLifecycle,
    #[strum(serialize = "customer.updated")]
    CustomerUpdated,
    #[strum(serialize = "customer.deleted")]
    CustomerDeleted,
    #[strum(serialize = "customer.discount.created", serialize = "customer.discount.updated")]
    DiscountApplied,
    #[strum(serialize = "customer.discount.deleted")]
    DiscountRemoved,
    #[strum(serialize = "charge.refunded")]
    ChargeRefunded,
    #[strum(serialize = "radar.early_fraud_warning.created")]
    EarlyFraudWarning,
    #[strum(
        serialize = "payment_intent.succeeded",
        serialize = "payment_intent.payment_failed"
    )]
    PaymentIntentLifecycle,
    #[strum(default)]
    Unknown(String),
}

impl StripeEventKind {
    pub fn parse(event_type: &str) -> Self {
        event_type
            .parse()
            .unwrap_or_else(|_| StripeEventKind::Unknown(event_type.to_string()))
    }
}

/// What a branch did with an event. The message is for logs only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Applied(&'static str),
    Skipped(&'static str),
    Ignored,
}

/// Deserialize the event's `data.object` into a typed payload.
fn parse_object<T: DeserializeOwned>(event: &StripeWebhookEvent) -> Result<T> {
    Ok(serde_json::from_value(event.data.object.clone())?)
}

pub fn process_event(
    conn: &Connection,
    settings: &WebhookSettings,
    event: &StripeWebhookEvent,
) -> Result<EventOutcome> {
    use StripeEventKind::*;

    match StripeEventKind::parse(&event.event_type) {
        CheckoutSessionCompleted | CheckoutAsyncPaymentSucceeded => {
            checkout::handle_completed(conn, settings, event)
        }
        CheckoutAsyncPaymentFailed => checkout::handle_async_payment_failed(conn, event),
        CheckoutSessionExpired => checkout::handle_expired(conn, event),
        SubscriptionCreated => subscription::handle_created(conn, event),
        SubscriptionUpdated => subscription::handle_updated(conn, event),
        SubscriptionDeleted => subscription::handle_deleted(conn, event),
        SubscriptionPaused => subscription::handle_paused(conn, event),
        SubscriptionResumed => subscription::handle_resumed(conn, event),
        SubscriptionTrialWillEnd => subscription::handle_trial_will_end(conn, event),
        InvoicePaid => invoice::handle_paid(conn, event),
        InvoicePaymentFailed => invoice::handle_payment_failed(conn, event),
        InvoiceLifecycle | PaymentIntentLifecycle => {
            tracing::debug!("Stripe event {} acknowledged", event.event_type);
            Ok(EventOutcome::Ignored)
        }
        CustomerUpdated => customer::handle_customer_updated(conn, event),
        CustomerDeleted => customer::handle_customer_deleted(conn, event),
        DiscountApplied => customer::handle_discount(conn, event, true),
        DiscountRemoved => customer::handle_discount(conn, event, false),
        ChargeRefunded => customer::handle_charge_refunded(conn, event),
        EarlyFraudWarning => customer::handle_early_fraud_warning(conn, event),
        Unknown(event_type) => {
            tracing::info!("Unhandled Stripe event type: {}", event_type);
            Ok(EventOutcome::Ignored)
        }
    }
}
