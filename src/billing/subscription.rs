use chrono::Utc;
use rusqlite::Connection;

use super::derived::{
    PlanChange, PriceSnapshot, apply_cancellation, apply_price, classify_change, discount_from,
    items_changed, revokes_plan, subscription_label,
};
use super::plan_state::{sync_owner_plan, sync_owner_plan_number};
use super::{EventOutcome, parse_object};
use crate::db::queries;
use crate::error::Result;
use crate::models::{AccountType, Subscription, SubscriptionKind, SubscriptionPatch};
use crate::payments::{StripeSubscription, StripeWebhookEvent};

/// Find our row for a Stripe subscription: by Stripe id, then by customer in
/// the table named by the subscription's `account_type` metadata, then by
/// customer in either table.
fn resolve(conn: &Connection, sub: &StripeSubscription) -> Result<Option<Subscription>> {
    if let Some(found) = queries::find_subscription_by_stripe_id(conn, &sub.id)? {
        return Ok(Some(found));
    }

    let Some(customer) = &sub.customer else {
        return Ok(None);
    };

    if let Some(kind) = sub
        .metadata
        .get("account_type")
        .and_then(|a| a.parse::<AccountType>().ok())
        .map(SubscriptionKind::from)
    {
        if let Some(found) = queries::get_subscription_by_customer(conn, kind, customer)? {
            return Ok(Some(found));
        }
    }

    Ok(queries::find_subscriptions_by_customer(conn, customer)?
        .into_iter()
        .next())
}

/// Read price facts off the first item, mapping its product to a plan.
fn price_snapshot(conn: &Connection, sub: &StripeSubscription) -> Result<PriceSnapshot> {
    let Some(item) = sub.first_item() else {
        return Ok(PriceSnapshot::default());
    };

    let lookup = match &item.price.product {
        Some(product) => queries::get_plan_number_by_product(conn, product.id())?,
        None => Default::default(),
    };

    Ok(PriceSnapshot {
        amount: item.price.unit_amount,
        currency: item.price.currency.clone(),
        interval: item.price.recurring.as_ref().map(|r| r.interval.clone()),
        plan: lookup.plan,
        plan_key: lookup.key,
    })
}

fn not_found(sub: &StripeSubscription) -> EventOutcome {
    tracing::warn!(
        "No subscription row for Stripe subscription {} (customer {:?})",
        sub.id,
        sub.customer
    );
    EventOutcome::Skipped("Subscription not found")
}

pub(super) fn handle_created(conn: &Connection, event: &StripeWebhookEvent) -> Result<EventOutcome> {
    let sub: StripeSubscription = parse_object(event)?;
    let Some(stored) = resolve(conn, &sub)? else {
        return Ok(not_found(&sub));
    };

    let snapshot = price_snapshot(conn, &sub)?;
    let (period_start, period_end) = sub.period();

    let mut patch = SubscriptionPatch {
        stripe_subscription_id: Some(sub.id.clone()),
        customer_id: sub.customer.clone(),
        status: Some(sub.status.clone()),
        current_period_start: period_start,
        current_period_end: period_end,
        trial_ends_at: sub.trial_end.map(Some),
        ..Default::default()
    };
    apply_price(&mut patch, &snapshot, PlanChange::Immediate);
    if sub.discount.is_some() {
        patch.discount = Some(discount_from(sub.discount.as_ref()));
    }

    queries::update_subscription(conn, stored.kind, &stored.id, &patch)?;
    tracing::info!(
        "Attached Stripe subscription {} to {} subscription {} (plan {:?})",
        sub.id,
        stored.kind.as_ref(),
        stored.id,
        snapshot.plan
    );
    Ok(EventOutcome::Applied("Subscription created"))
}

pub(super) fn handle_updated(conn: &Connection, event: &StripeWebhookEvent) -> Result<EventOutcome> {
    let sub: StripeSubscription = parse_object(event)?;
    let Some(stored) = resolve(conn, &sub)? else {
        return Ok(not_found(&sub));
    };

    let snapshot = price_snapshot(conn, &sub)?;
    let change = classify_change(
        stored.amount,
        &snapshot,
        items_changed(event.data.previous_attributes.as_ref()),
    );
    let (period_start, period_end) = sub.period();

    let mut patch = SubscriptionPatch {
        stripe_subscription_id: Some(sub.id.clone()),
        status: Some(sub.status.clone()),
        current_period_start: period_start,
        current_period_end: period_end,
        discount: Some(discount_from(sub.discount.as_ref())),
        ..Default::default()
    };
    apply_price(&mut patch, &snapshot, change);
    apply_cancellation(&mut patch, &sub);

    let revoked = revokes_plan(&sub.status);
    if revoked {
        patch.plan = Some(0);
        patch.next_amount = Some(None);
        patch.next_interval = Some(None);
        patch.next_plan = Some(None);
    }

    queries::update_subscription(conn, stored.kind, &stored.id, &patch)?;

    if revoked {
        sync_owner_plan(conn, stored.kind, &stored.owner_id, 0, None)?;
        tracing::info!(
            "Subscription {} is {}; {} {} plan revoked",
            stored.id,
            sub.status,
            stored.kind.as_ref(),
            stored.owner_id
        );
        return Ok(EventOutcome::Applied("Plan revoked"));
    }

    if change == PlanChange::Deferred {
        tracing::info!(
            "Downgrade of subscription {} deferred: next_amount={:?}, next_plan={:?}",
            stored.id,
            snapshot.amount,
            snapshot.plan
        );
        return Ok(EventOutcome::Applied("Downgrade deferred"));
    }

    if let (Some(plan), Some(key)) = (snapshot.plan, &snapshot.plan_key) {
        let interval = snapshot
            .interval
            .clone()
            .or_else(|| stored.interval.clone())
            .unwrap_or_else(|| "month".to_string());
        let label = subscription_label(&interval, key);
        sync_owner_plan(conn, stored.kind, &stored.owner_id, plan, Some(&label))?;
    }

    Ok(EventOutcome::Applied("Subscription updated"))
}

pub(super) fn handle_deleted(conn: &Connection, event: &StripeWebhookEvent) -> Result<EventOutcome> {
    let sub: StripeSubscription = parse_object(event)?;
    let Some(stored) = resolve(conn, &sub)? else {
        return Ok(not_found(&sub));
    };

    let mut patch = SubscriptionPatch {
        plan: Some(0),
        status: Some("canceled".to_string()),
        paid_status: Some(false),
        ended_at: Some(sub.ended_at.unwrap_or_else(|| Utc::now().timestamp())),
        next_amount: Some(None),
        next_interval: Some(None),
        next_plan: Some(None),
        ..Default::default()
    };
    apply_cancellation(&mut patch, &sub);

    queries::update_subscription(conn, stored.kind, &stored.id, &patch)?;
    sync_owner_plan(conn, stored.kind, &stored.owner_id, 0, None)?;

    tracing::info!(
        "Subscription {} canceled; {} {} back to plan 0",
        stored.id,
        stored.kind.as_ref(),
        stored.owner_id
    );
    Ok(EventOutcome::Applied("Subscription deleted"))
}

pub(super) fn handle_paused(conn: &Connection, event: &StripeWebhookEvent) -> Result<EventOutcome> {
    let sub: StripeSubscription = parse_object(event)?;
    let Some(stored) = resolve(conn, &sub)? else {
        return Ok(not_found(&sub));
    };

    queries::update_subscription(
        conn,
        stored.kind,
        &stored.id,
        &SubscriptionPatch {
            status: Some("paused".to_string()),
            ..Default::default()
        },
    )?;
    sync_owner_plan_number(conn, stored.kind, &stored.owner_id, 0)?;
    Ok(EventOutcome::Applied("Subscription paused"))
}

pub(super) fn handle_resumed(conn: &Connection, event: &StripeWebhookEvent) -> Result<EventOutcome> {
    let sub: StripeSubscription = parse_object(event)?;
    let Some(stored) = resolve(conn, &sub)? else {
        return Ok(not_found(&sub));
    };

    let (period_start, period_end) = sub.period();
    queries::update_subscription(
        conn,
        stored.kind,
        &stored.id,
        &SubscriptionPatch {
            status: Some("active".to_string()),
            current_period_start: period_start,
            current_period_end: period_end,
            ..Default::default()
        },
    )?;
    sync_owner_plan_number(conn, stored.kind, &stored.owner_id, stored.plan)?;
    Ok(EventOutcome::Applied("Subscription resumed"))
}

pub(super) fn handle_trial_will_end(
    conn: &Connection,
    event: &StripeWebhookEvent,
) -> Result<EventOutcome> {
    let sub: StripeSubscription = parse_object(event)?;
    let Some(stored) = resolve(conn, &sub)? else {
        return Ok(not_found(&sub));
    };

    queries::update_subscription(
        conn,
        stored.kind,
        &stored.id,
        &SubscriptionPatch {
            trial_ends_at: Some(sub.trial_end),
            ..Default::default()
        },
    )?;
    tracing::info!("Trial for subscription {} ends at {:?}", stored.id, sub.trial_end);
    Ok(EventOutcome::Applied("Trial end recorded"))
}
