use rusqlite::Connection;

use super::derived::discount_from;
use super::{EventOutcome, parse_object};
use crate::db::queries;
use crate::error::Result;
use crate::models::{Subscription, SubscriptionKind, SubscriptionPatch};
use crate::payments::{
    StripeCharge, StripeCustomer, StripeDiscount, StripeEarlyFraudWarning, StripeWebhookEvent,
};

/// Link a Stripe customer to the user with the same email when the user has
/// no customer yet, and fill the customer id on that user's subscription rows.
pub(super) fn handle_customer_updated(
    conn: &Connection,
    event: &StripeWebhookEvent,
) -> Result<EventOutcome> {
    let customer: StripeCustomer = parse_object(event)?;

    if queries::get_user_by_customer_id(conn, &customer.id)?.is_some() {
        return Ok(EventOutcome::Skipped("Customer already linked"));
    }

    let Some(email) = customer.email.as_deref() else {
        return Ok(EventOutcome::Skipped("Customer has no email"));
    };

    let Some(user) = queries::get_user_by_email(conn, email)? else {
        tracing::debug!("No user with email for Stripe customer {}", customer.id);
        return Ok(EventOutcome::Skipped("User not found"));
    };

    if user.stripe_customer_id.is_some() {
        return Ok(EventOutcome::Skipped("User has another customer"));
    }

    queries::set_user_customer_id(conn, &user.id, &customer.id)?;

    let kind: SubscriptionKind = user.account_type.into();
    if let Some(sub) = queries::get_subscription_by_owner(conn, kind, &user.id)? {
        if sub.customer_id.is_none() {
            queries::update_subscription(
                conn,
                kind,
                &sub.id,
                &SubscriptionPatch {
                    customer_id: Some(customer.id.clone()),
                    ..Default::default()
                },
            )?;
        }
    }

    tracing::info!("Linked Stripe customer {} to user {}", customer.id, user.id);
    Ok(EventOutcome::Applied("Customer linked"))
}

pub(super) fn handle_customer_deleted(
    conn: &Connection,
    event: &StripeWebhookEvent,
) -> Result<EventOutcome> {
    let customer: StripeCustomer = parse_object(event)?;
    let cleared = queries::clear_customer_id(conn, &customer.id)?;
    tracing::info!(
        "Stripe customer {} deleted; cleared on {} subscription(s)",
        customer.id,
        cleared
    );
    Ok(EventOutcome::Applied("Customer cleared"))
}

fn discount_targets(conn: &Connection, discount: &StripeDiscount) -> Result<Vec<Subscription>> {
    if let Some(stripe_id) = &discount.subscription {
        if let Some(found) = queries::find_subscription_by_stripe_id(conn, stripe_id)? {
            return Ok(vec![found]);
        }
    }
    match &discount.customer {
        Some(customer) => queries::find_subscriptions_by_customer(conn, customer),
        None => Ok(Vec::new()),
    }
}

/// `applied` is false for `customer.discount.deleted`.
pub(super) fn handle_discount(
    conn: &Connection,
    event: &StripeWebhookEvent,
    applied: bool,
) -> Result<EventOutcome> {
    let discount: StripeDiscount = parse_object(event)?;
    let targets = discount_targets(conn, &discount)?;
    if targets.is_empty() {
        return Ok(EventOutcome::Skipped("Subscription not found"));
    }

    let value = if applied {
        discount_from(Some(&discount))
    } else {
        None
    };

    for sub in &targets {
        queries::update_subscription(
            conn,
            sub.kind,
            &sub.id,
            &SubscriptionPatch {
                discount: Some(value.clone()),
                ..Default::default()
            },
        )?;
    }

    tracing::info!(
        "Discount {} {} on {} subscription(s)",
        discount.coupon.id,
        if applied { "applied" } else { "removed" },
        targets.len()
    );
    Ok(EventOutcome::Applied(if applied { "Discount applied" } else { "Discount removed" }))
}

/// Full refunds flip the matching open call and add-on registrations.
pub(super) fn handle_charge_refunded(
    conn: &Connection,
    event: &StripeWebhookEvent,
) -> Result<EventOutcome> {
    let charge: StripeCharge = parse_object(event)?;

    if !charge.refunded {
        tracing::info!(
            "Partial refund of {} on charge {}; no state change",
            charge.amount_refunded,
            charge.id
        );
        return Ok(EventOutcome::Skipped("Partial refund"));
    }

    let Some(payment_intent) = charge.payment_intent.as_deref() else {
        return Ok(EventOutcome::Skipped("Charge has no payment intent"));
    };

    let mut touched = false;
    if let Some(open_call) = queries::get_open_call_by_payment_intent(conn, payment_intent)? {
        queries::mark_open_call_refunded(conn, &open_call.id, Some(&charge.id))?;
        tracing::info!("Open call {} refunded (charge {})", open_call.id, charge.id);
        touched = true;
    }

    let registrations = queries::mark_registrations_refunded(conn, payment_intent)?;
    if registrations > 0 {
        tracing::info!(
            "{} registration(s) refunded for payment intent {}",
            registrations,
            payment_intent
        );
        touched = true;
    }

    if touched {
        Ok(EventOutcome::Applied("Refund recorded"))
    } else {
        Ok(EventOutcome::Skipped("Nothing paid with this charge"))
    }
}

/// Ban whoever paid with a charge Stripe flagged as likely fraud.
pub(super) fn handle_early_fraud_warning(
    conn: &Connection,
    event: &StripeWebhookEvent,
) -> Result<EventOutcome> {
    let warning: StripeEarlyFraudWarning = parse_object(event)?;

    let Some(payment_intent) = warning.payment_intent.as_deref() else {
        tracing::warn!(
            "Early fraud warning {} on charge {:?} without payment intent",
            warning.id,
            warning.charge
        );
        return Ok(EventOutcome::Skipped("No payment intent"));
    };

    let mut users: Vec<String> = queries::get_registrations_by_payment_intent(conn, payment_intent)?
        .into_iter()
        .filter_map(|r| r.user_id)
        .collect();

    if let Some(open_call) = queries::get_open_call_by_payment_intent(conn, payment_intent)? {
        if let Some(org) = queries::get_organization_by_id(conn, &open_call.organization_id)? {
            users.push(org.owner_id);
        }
    }

    users.sort();
    users.dedup();
    if users.is_empty() {
        return Ok(EventOutcome::Skipped("No user for payment intent"));
    }

    for user_id in &users {
        queries::set_user_banned(conn, user_id, true)?;
        tracing::warn!(
            "User {} banned after early fraud warning {} (payment intent {})",
            user_id,
            warning.id,
            payment_intent
        );
    }
    Ok(EventOutcome::Applied("User banned"))
}
