use rusqlite::Connection;

use super::derived::{is_free_call, subscription_label};
use super::plan_state::sync_owner_plan;
use super::{EventOutcome, ONE_TIME_PAYMENT, WebhookSettings, parse_object};
use crate::db::queries;
use crate::error::Result;
use crate::models::{
    AccountType, CreateSubscription, Discount, OpenCallPayment, RefundPayload, Subscription,
    SubscriptionKind, SubscriptionPatch,
};
use crate::payments::{StripeCheckoutSession, StripeWebhookEvent};
use crate::scheduler;

fn is_paid(session: &StripeCheckoutSession) -> bool {
    matches!(
        session.payment_status.as_deref(),
        Some("paid") | Some("no_payment_required")
    )
}

fn account_type_of(session: &StripeCheckoutSession) -> AccountType {
    session
        .meta("account_type")
        .and_then(|a| a.parse().ok())
        .unwrap_or(AccountType::Artist)
}

/// Find the owner id for a checkout: metadata first, then the Stripe customer.
fn resolve_owner(
    conn: &Connection,
    kind: SubscriptionKind,
    session: &StripeCheckoutSession,
) -> Result<Option<String>> {
    match kind {
        SubscriptionKind::Artist => {
            if let Some(user_id) = session.meta("user_id") {
                if let Some(user) = queries::get_user_by_id(conn, user_id)? {
                    return Ok(Some(user.id));
                }
            }
            if let Some(customer) = &session.customer {
                if let Some(user) = queries::get_user_by_customer_id(conn, customer)? {
                    return Ok(Some(user.id));
                }
            }
            match session.email() {
                Some(email) => Ok(queries::get_user_by_email(conn, email)?.map(|u| u.id)),
                None => Ok(None),
            }
        }
        SubscriptionKind::Organizer => match session.meta("organization_id") {
            Some(org_id) => Ok(queries::get_organization_by_id(conn, org_id)?.map(|o| o.id)),
            None => Ok(None),
        },
    }
}

fn find_or_create_subscription(
    conn: &Connection,
    kind: SubscriptionKind,
    owner_id: &str,
    customer_id: Option<&str>,
) -> Result<Subscription> {
    if let Some(existing) = queries::get_subscription_by_owner(conn, kind, owner_id)? {
        return Ok(existing);
    }
    if let Some(customer) = customer_id {
        if let Some(existing) = queries::get_subscription_by_customer(conn, kind, customer)? {
            return Ok(existing);
        }
    }
    queries::create_subscription(
        conn,
        &CreateSubscription {
            kind,
            owner_id: owner_id.to_string(),
            customer_id: customer_id.map(str::to_string),
            status: "incomplete".to_string(),
            paid_status: false,
        },
    )
}

pub(super) fn handle_completed(
    conn: &Connection,
    settings: &WebhookSettings,
    event: &StripeWebhookEvent,
) -> Result<EventOutcome> {
    let session: StripeCheckoutSession = parse_object(event)?;

    if session.meta("is_add_on") == Some("true") {
        return complete_add_on(conn, &session);
    }

    let account_type = account_type_of(&session);
    if account_type == AccountType::Organizer && session.meta("payment_type") == Some(ONE_TIME_PAYMENT) {
        return complete_open_call(conn, settings, &session);
    }

    complete_subscription(conn, &session, account_type.into())
}

/// Add-on registration: one paid seat on an online event.
fn complete_add_on(conn: &Connection, session: &StripeCheckoutSession) -> Result<EventOutcome> {
    if !is_paid(session) {
        return Ok(EventOutcome::Skipped("Payment not completed"));
    }

    let Some(event_id) = session.meta("event_id") else {
        tracing::warn!("Add-on checkout {} has no event_id", session.id);
        return Ok(EventOutcome::Skipped("No event id"));
    };

    let Some(online_event) = queries::get_online_event_by_id(conn, event_id)? else {
        tracing::warn!("Add-on checkout {} references unknown event {}", session.id, event_id);
        return Ok(EventOutcome::Skipped("Event not found"));
    };

    queries::create_event_registration(
        conn,
        &online_event.id,
        session.meta("user_id"),
        session.payment_intent.as_deref(),
    )?;
    queries::increment_event_capacity(conn, &online_event.id)?;

    tracing::info!(
        "Add-on registration: event={}, user={:?}, session={}",
        online_event.id,
        session.meta("user_id"),
        session.id
    );
    Ok(EventOutcome::Applied("Add-on registered"))
}

/// One-time organizer listing fee for an open call.
fn complete_open_call(
    conn: &Connection,
    settings: &WebhookSettings,
    session: &StripeCheckoutSession,
) -> Result<EventOutcome> {
    if !is_paid(session) {
        return Ok(EventOutcome::Skipped("Payment not completed"));
    }

    let free_call = is_free_call(session.coupon_ids(), settings.free_call_coupon.as_deref());
    let amount = session.amount_total.unwrap_or(0);

    let open_call = match session.meta("open_call_id") {
        Some(id) => queries::get_open_call_by_id(conn, id)?,
        None => None,
    };

    let Some(open_call) = open_call else {
        // Money was taken for a listing that does not exist: compensate later
        if amount > 0 && !free_call {
            if let Some(payment_intent) = &session.payment_intent {
                let task = scheduler::schedule_refund(
                    conn,
                    &RefundPayload {
                        payment_intent_id: payment_intent.clone(),
                        open_call_id: session.meta("open_call_id").map(str::to_string),
                        reason: "open_call_not_found".to_string(),
                    },
                )?;
                tracing::warn!(
                    "Open call missing for paid checkout {}; refund task {} scheduled",
                    session.id,
                    task.id
                );
                return Ok(EventOutcome::Applied("Refund scheduled"));
            }
        }
        tracing::warn!("Open call missing for checkout {}", session.id);
        return Ok(EventOutcome::Skipped("Open call not found"));
    };

    queries::mark_open_call_paid(
        conn,
        &open_call.id,
        &OpenCallPayment {
            payment_intent_id: session.payment_intent.clone(),
            amount_paid: amount,
            free_call,
        },
    )?;

    tracing::info!(
        "Open call {} paid: amount={}, free_call={}",
        open_call.id,
        amount,
        free_call
    );
    Ok(EventOutcome::Applied("Open call paid"))
}

/// Recurring artist or organizer subscription.
fn complete_subscription(
    conn: &Connection,
    session: &StripeCheckoutSession,
    kind: SubscriptionKind,
) -> Result<EventOutcome> {
    let Some(owner_id) = resolve_owner(conn, kind, session)? else {
        tracing::warn!("No {} owner for checkout {}", kind.as_ref(), session.id);
        return Ok(EventOutcome::Skipped("Owner not found"));
    };

    let existing = find_or_create_subscription(conn, kind, &owner_id, session.customer.as_deref())?;

    if kind == SubscriptionKind::Artist {
        if let Some(customer) = &session.customer {
            queries::set_user_customer_id(conn, &owner_id, customer)?;
        }
    }

    if !is_paid(session) {
        queries::update_subscription(
            conn,
            kind,
            &existing.id,
            &SubscriptionPatch {
                customer_id: session.customer.clone(),
                stripe_subscription_id: session.subscription.clone(),
                paid_status: Some(false),
                status: Some("incomplete".to_string()),
                ..Default::default()
            },
        )?;
        return Ok(EventOutcome::Skipped("Payment not completed"));
    }

    let interval = session.meta("interval").unwrap_or("month").to_string();
    let plan = match session.meta("plan_key") {
        Some(key) => queries::get_plan_by_key(conn, key)?,
        None => None,
    };

    let discount = session.coupon_ids().next().map(|coupon| Discount {
        coupon: Some(coupon.to_string()),
        ..Default::default()
    });

    let mut patch = SubscriptionPatch {
        customer_id: session.customer.clone(),
        stripe_subscription_id: session.subscription.clone(),
        amount: session.amount_total,
        currency: session.currency.clone(),
        interval: Some(interval.clone()),
        status: Some("active".to_string()),
        paid_status: Some(true),
        next_amount: Some(None),
        next_interval: Some(None),
        next_plan: Some(None),
        cancel_at_period_end: Some(false),
        canceled_at: Some(None),
        cancellation_reason: Some(None),
        cancellation_comment: Some(None),
        cancellation_feedback: Some(None),
        discount: Some(discount),
        last_payment_error: Some(None),
        ..Default::default()
    };

    let Some(plan) = plan else {
        queries::update_subscription(conn, kind, &existing.id, &patch)?;
        tracing::warn!(
            "Checkout {} completed with unknown plan key {:?}",
            session.id,
            session.meta("plan_key")
        );
        return Ok(EventOutcome::Skipped("Plan not found"));
    };

    patch.plan = Some(plan.plan_number);
    patch.plan_key = Some(plan.key.clone());
    queries::update_subscription(conn, kind, &existing.id, &patch)?;

    let label = subscription_label(&interval, &plan.key);
    sync_owner_plan(conn, kind, &owner_id, plan.plan_number, Some(&label))?;

    tracing::info!(
        "Checkout completed: {} {} now on plan {} ({})",
        kind.as_ref(),
        owner_id,
        plan.plan_number,
        label
    );
    Ok(EventOutcome::Applied("Subscription activated"))
}

/// Locate the subscription a checkout session belongs to, if any.
fn subscription_for_session(
    conn: &Connection,
    session: &StripeCheckoutSession,
) -> Result<Option<Subscription>> {
    let kind: SubscriptionKind = account_type_of(session).into();
    if let Some(owner_id) = resolve_owner(conn, kind, session)? {
        if let Some(sub) = queries::get_subscription_by_owner(conn, kind, &owner_id)? {
            return Ok(Some(sub));
        }
    }
    match &session.customer {
        Some(customer) => queries::get_subscription_by_customer(conn, kind, customer),
        None => Ok(None),
    }
}

pub(super) fn handle_async_payment_failed(
    conn: &Connection,
    event: &StripeWebhookEvent,
) -> Result<EventOutcome> {
    let session: StripeCheckoutSession = parse_object(event)?;

    if session.meta("payment_type") == Some(ONE_TIME_PAYMENT) || session.meta("is_add_on").is_some() {
        tracing::info!("One-time payment failed for checkout {}", session.id);
        return Ok(EventOutcome::Skipped("One-time payment failed"));
    }

    let Some(sub) = subscription_for_session(conn, &session)? else {
        return Ok(EventOutcome::Skipped("Subscription not found"));
    };

    queries::update_subscription(
        conn,
        sub.kind,
        &sub.id,
        &SubscriptionPatch {
            paid_status: Some(false),
            status: Some("payment_failed".to_string()),
            ..Default::default()
        },
    )?;
    Ok(EventOutcome::Applied("Subscription payment failed"))
}

/// Abandoned checkout: drop the pending row it left behind, if it never got paid.
pub(super) fn handle_expired(conn: &Connection, event: &StripeWebhookEvent) -> Result<EventOutcome> {
    let session: StripeCheckoutSession = parse_object(event)?;

    let Some(sub) = subscription_for_session(conn, &session)? else {
        return Ok(EventOutcome::Skipped("Subscription not found"));
    };

    if sub.paid_status || sub.stripe_subscription_id.is_some() || sub.plan > 0 {
        return Ok(EventOutcome::Skipped("Subscription in use"));
    }

    queries::delete_subscription(conn, sub.kind, &sub.id)?;
    tracing::info!(
        "Deleted abandoned {} subscription {} after checkout {} expired",
        sub.kind.as_ref(),
        sub.id,
        session.id
    );
    Ok(EventOutcome::Applied("Abandoned subscription deleted"))
}
