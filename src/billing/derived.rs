//! Field derivations shared by the webhook branches. Nothing here touches
//! the database.

use serde_json::Value;

use crate::models::{Discount, Subscription, SubscriptionPatch};
use crate::payments::{StripeCancellationDetails, StripeDiscount, StripeSubscription};

/// Stripe statuses that end access to the paid tier.
const PLAN_REVOKING_STATUSES: [&str; 3] = ["canceled", "unpaid", "incomplete_expired"];

/// Denormalized label stored on users and organizations, e.g. "monthly-banana".
pub fn subscription_label(interval: &str, plan_key: &str) -> String {
    format!("{}ly-{}", interval, plan_key)
}

/// Whether the configured free-call coupon is among `coupons`.
/// Compared as raw strings; an unset coupon never matches.
pub fn is_free_call<'a>(mut coupons: impl Iterator<Item = &'a str>, free_call_coupon: Option<&str>) -> bool {
    match free_call_coupon {
        Some(free) => coupons.any(|c| c == free),
        None => false,
    }
}

pub fn revokes_plan(status: &str) -> bool {
    PLAN_REVOKING_STATUSES.contains(&status)
}

/// Whether an update event's `previous_attributes` says the priced items changed.
pub fn items_changed(previous_attributes: Option<&Value>) -> bool {
    previous_attributes
        .and_then(Value::as_object)
        .map(|prev| prev.contains_key("items") || prev.contains_key("plan"))
        .unwrap_or(false)
}

pub fn discount_from(discount: Option<&StripeDiscount>) -> Option<Discount> {
    discount.map(|d| Discount {
        coupon: Some(d.coupon.id.clone()),
        percent: d.coupon.percent_off,
        amount: d.coupon.amount_off,
        duration: d.coupon.duration.clone(),
    })
}

/// Price facts read from a subscription's first item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSnapshot {
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub interval: Option<String>,
    pub plan: Option<i64>,
    pub plan_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanChange {
    /// Current fields take the new values now
    Immediate,
    /// New values wait in next_* until the next paid invoice
    Deferred,
}

/// Downgrades (a changed item priced below what is stored) are deferred to
/// the next period; everything else applies immediately.
pub fn classify_change(stored_amount: Option<i64>, incoming: &PriceSnapshot, items_changed: bool) -> PlanChange {
    match (items_changed, stored_amount, incoming.amount) {
        (true, Some(current), Some(next)) if next < current => PlanChange::Deferred,
        _ => PlanChange::Immediate,
    }
}

/// Fill the amount / interval / plan fields of `patch` for a price change.
pub fn apply_price(patch: &mut SubscriptionPatch, incoming: &PriceSnapshot, change: PlanChange) {
    patch.currency = incoming.currency.clone();
    match change {
        PlanChange::Immediate => {
            patch.amount = incoming.amount;
            patch.interval = incoming.interval.clone();
            patch.plan = incoming.plan;
            patch.plan_key = incoming.plan_key.clone();
            patch.next_amount = Some(None);
            patch.next_interval = Some(None);
            patch.next_plan = Some(None);
        }
        PlanChange::Deferred => {
            patch.next_amount = Some(incoming.amount);
            patch.next_interval = Some(incoming.interval.clone());
            patch.next_plan = Some(incoming.plan);
        }
    }
}

/// Copy Stripe's cancellation metadata verbatim.
pub fn apply_cancellation(patch: &mut SubscriptionPatch, sub: &StripeSubscription) {
    let details = sub
        .cancellation_details
        .clone()
        .unwrap_or_else(StripeCancellationDetails::default);
    patch.cancel_at_period_end = Some(sub.cancel_at_period_end);
    patch.canceled_at = Some(sub.canceled_at);
    patch.cancellation_reason = Some(details.reason);
    patch.cancellation_comment = Some(details.comment);
    patch.cancellation_feedback = Some(details.feedback);
}

/// Promote pending next_* values once a renewal has been paid.
/// Returns whether anything was pending.
pub fn promote_next(patch: &mut SubscriptionPatch, stored: &Subscription) -> bool {
    if stored.next_amount.is_none() && stored.next_interval.is_none() && stored.next_plan.is_none() {
        return false;
    }
    if let Some(amount) = stored.next_amount {
        patch.amount = Some(amount);
    }
    if let Some(interval) = &stored.next_interval {
        patch.interval = Some(interval.clone());
    }
    if let Some(plan) = stored.next_plan {
        patch.plan = Some(plan);
    }
    patch.next_amount = Some(None);
    patch.next_interval = Some(None);
    patch.next_plan = Some(None);
    true
}
