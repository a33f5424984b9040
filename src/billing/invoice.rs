use rusqlite::Connection;

use super::derived::{promote_next, subscription_label};
use super::plan_state::sync_owner_plan;
use super::{EventOutcome, parse_object};
use crate::db::queries;
use crate::error::Result;
use crate::models::{PlanLookup, Subscription, SubscriptionPatch};
use crate::payments::{StripeInvoice, StripeWebhookEvent};

fn resolve(conn: &Connection, invoice: &StripeInvoice) -> Result<Option<Subscription>> {
    if let Some(stripe_id) = &invoice.subscription {
        if let Some(found) = queries::find_subscription_by_stripe_id(conn, stripe_id)? {
            return Ok(Some(found));
        }
    }
    match &invoice.customer {
        Some(customer) => Ok(queries::find_subscriptions_by_customer(conn, customer)?
            .into_iter()
            .next()),
        None => Ok(None),
    }
}

/// Plan of the first invoice line whose price names a product.
fn line_plan(conn: &Connection, invoice: &StripeInvoice) -> Result<PlanLookup> {
    let product = invoice
        .lines
        .data
        .iter()
        .filter_map(|l| l.price.as_ref())
        .find_map(|p| p.product.as_ref());
    match product {
        Some(product) => queries::get_plan_number_by_product(conn, product.id()),
        None => Ok(PlanLookup::default()),
    }
}

pub(super) fn handle_paid(conn: &Connection, event: &StripeWebhookEvent) -> Result<EventOutcome> {
    let invoice: StripeInvoice = parse_object(event)?;

    let Some(stored) = resolve(conn, &invoice)? else {
        tracing::debug!(
            "Invoice {} paid for unknown subscription {:?}",
            invoice.id,
            invoice.subscription
        );
        return Ok(EventOutcome::Skipped("Subscription not found"));
    };

    // A late payment on a canceled subscription settles the invoice only
    let canceled = stored.status == "canceled";
    let mut patch = SubscriptionPatch {
        paid_status: Some(true),
        status: (!canceled).then(|| "active".to_string()),
        last_payment_error: Some(None),
        ..Default::default()
    };
    if let Some(period) = invoice.line_period() {
        patch.current_period_start = Some(period.start);
        patch.current_period_end = Some(period.end);
    }
    let promoted = !canceled && promote_next(&mut patch, &stored);

    let plan = patch.plan.unwrap_or(stored.plan);
    let lookup = line_plan(conn, &invoice)?;
    if lookup.plan == Some(plan) {
        patch.plan_key = lookup.key.clone();
    }

    queries::update_subscription(conn, stored.kind, &stored.id, &patch)?;

    let key = patch.plan_key.as_ref().or(stored.plan_key.as_ref());
    let interval = patch.interval.as_ref().or(stored.interval.as_ref());
    if let (true, Some(key), Some(interval)) = (plan > 0, key, interval) {
        let label = subscription_label(interval, key);
        sync_owner_plan(conn, stored.kind, &stored.owner_id, plan, Some(&label))?;
    }

    if promoted {
        tracing::info!(
            "Invoice {} paid; subscription {} moved to pending plan {}",
            invoice.id,
            stored.id,
            plan
        );
        return Ok(EventOutcome::Applied("Pending plan promoted"));
    }
    Ok(EventOutcome::Applied("Invoice paid"))
}

pub(super) fn handle_payment_failed(
    conn: &Connection,
    event: &StripeWebhookEvent,
) -> Result<EventOutcome> {
    let invoice: StripeInvoice = parse_object(event)?;

    let Some(stored) = resolve(conn, &invoice)? else {
        return Ok(EventOutcome::Skipped("Subscription not found"));
    };

    let error = invoice
        .last_finalization_error
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| {
            format!(
                "Invoice {} payment failed (attempt {})",
                invoice.id,
                invoice.attempt_count.unwrap_or(1)
            )
        });

    queries::update_subscription(
        conn,
        stored.kind,
        &stored.id,
        &SubscriptionPatch {
            paid_status: Some(false),
            status: Some("past_due".to_string()),
            last_payment_error: Some(Some(error.clone())),
            ..Default::default()
        },
    )?;

    tracing::warn!("Payment failed for subscription {}: {}", stored.id, error);
    Ok(EventOutcome::Applied("Invoice payment failed"))
}
