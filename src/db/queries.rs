use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params, types::Value};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

use super::from_row::{
    NEWSLETTER_COLS, ONLINE_EVENT_COLS, OPEN_CALL_COLS, ORGANIZATION_COLS, PLAN_COLS,
    REGISTRATION_COLS, SCHEDULED_TASK_COLS, USER_COLS, WEBHOOK_EVENT_COLS, query_all, query_one,
    subscription_cols,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Builder for dynamic UPDATE statements with optional fields.
/// Combines multiple field updates into a single query.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    touch_column: Option<&'static str>,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            touch_column: None,
        }
    }

    /// Stamp `column` with the current time whenever anything else changes.
    fn touching(mut self, column: &'static str) -> Self {
        self.touch_column = Some(column);
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Outer `None` leaves the column alone, `Some(None)` writes NULL.
    fn set_nullable<V: Into<Value>>(mut self, column: &'static str, value: Option<Option<V>>) -> Self {
        match value {
            Some(Some(v)) => self.fields.push((column, v.into())),
            Some(None) => self.fields.push((column, Value::Null)),
            None => {}
        }
        self
    }

    fn execute(mut self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        if let Some(column) = self.touch_column {
            self.fields.push((column, now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

// ============ Users ============

pub fn create_user(conn: &Connection, input: &CreateUser) -> Result<User> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO users (id, email, name, account_type, plan, banned, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, ?6)",
        params![&id, &input.email, &input.name, input.account_type.as_ref(), now, now],
    )?;

    Ok(User {
        id,
        email: input.email.clone(),
        name: input.name.clone(),
        account_type: input.account_type,
        plan: 0,
        subscription: None,
        stripe_customer_id: None,
        banned: false,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        params![id],
    )
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE lower(email) = lower(?1)", USER_COLS),
        params![email],
    )
}

pub fn get_user_by_customer_id(conn: &Connection, customer_id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM users WHERE stripe_customer_id = ?1 ORDER BY updated_at DESC LIMIT 1",
            USER_COLS
        ),
        params![customer_id],
    )
}

pub fn set_user_customer_id(conn: &Connection, id: &str, customer_id: &str) -> Result<bool> {
    UpdateBuilder::new("users", id)
        .touching("updated_at")
        .set("stripe_customer_id", customer_id.to_string())
        .execute(conn)
}

pub fn set_user_banned(conn: &Connection, id: &str, banned: bool) -> Result<bool> {
    UpdateBuilder::new("users", id)
        .touching("updated_at")
        .set("banned", banned)
        .execute(conn)
}

// ============ Auth Sessions ============

/// Sessions are issued by the external auth provider; this only exists so
/// fixtures and the provider bridge can write them.
pub fn create_auth_session(conn: &Connection, token: &str, user_id: &str, expires_at: i64) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO auth_sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
        params![token, user_id, expires_at],
    )?;
    Ok(())
}

/// Resolve a bearer token to its user, ignoring expired sessions.
pub fn get_user_by_session_token(conn: &Connection, token: &str) -> Result<Option<User>> {
    let cols = USER_COLS
        .split(", ")
        .map(|c| format!("u.{}", c))
        .collect::<Vec<_>>()
        .join(", ");
    query_one(
        conn,
        &format!(
            "SELECT {} FROM auth_sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token = ?1 AND s.expires_at > ?2",
            cols
        ),
        params![token, now()],
    )
}

// ============ Organizations ============

pub fn create_organization(conn: &Connection, input: &CreateOrganization) -> Result<Organization> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO organizations (id, owner_id, name, slug, plan, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
        params![&id, &input.owner_id, &input.name, &input.slug, now, now],
    )?;

    Ok(Organization {
        id,
        owner_id: input.owner_id.clone(),
        name: input.name.clone(),
        slug: input.slug.clone(),
        plan: 0,
        subscription: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_organization_by_id(conn: &Connection, id: &str) -> Result<Option<Organization>> {
    query_one(
        conn,
        &format!("SELECT {} FROM organizations WHERE id = ?1", ORGANIZATION_COLS),
        params![id],
    )
}

pub fn list_organizations_for_owner(conn: &Connection, owner_id: &str) -> Result<Vec<Organization>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM organizations WHERE owner_id = ?1 ORDER BY created_at",
            ORGANIZATION_COLS
        ),
        params![owner_id],
    )
}

// ============ Denormalized Plan State ============

/// Write the denormalized plan rank and label onto a subscription owner
/// (the user for artists, the organization for organizers).
pub fn set_owner_plan(
    conn: &Connection,
    kind: SubscriptionKind,
    owner_id: &str,
    plan: i64,
    subscription_label: Option<&str>,
) -> Result<bool> {
    UpdateBuilder::new(kind.owner_table(), owner_id)
        .touching("updated_at")
        .set("plan", plan)
        .set_nullable("subscription", Some(subscription_label.map(str::to_string)))
        .execute(conn)
}

/// Plan rank only; the label is left as is.
pub fn set_owner_plan_number(
    conn: &Connection,
    kind: SubscriptionKind,
    owner_id: &str,
    plan: i64,
) -> Result<bool> {
    UpdateBuilder::new(kind.owner_table(), owner_id)
        .touching("updated_at")
        .set("plan", plan)
        .execute(conn)
}

// ============ Plans ============

pub fn upsert_plan(conn: &Connection, input: &UpsertPlan) -> Result<Plan> {
    let features = serde_json::to_string(&input.features)?;
    conn.execute(
        "INSERT INTO plans (id, key, name, account_type, plan_number, stripe_product_id,
                            monthly_price, yearly_price, one_time_price, features)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(key) DO UPDATE SET
            name = excluded.name,
            account_type = excluded.account_type,
            plan_number = excluded.plan_number,
            stripe_product_id = excluded.stripe_product_id,
            monthly_price = excluded.monthly_price,
            yearly_price = excluded.yearly_price,
            one_time_price = excluded.one_time_price,
            features = excluded.features",
        params![
            gen_id(),
            &input.key,
            &input.name,
            input.account_type.as_ref(),
            input.plan_number,
            &input.stripe_product_id,
            input.monthly_price,
            input.yearly_price,
            input.one_time_price,
            features,
        ],
    )?;

    get_plan_by_key(conn, &input.key)?.ok_or_else(|| {
        crate::error::AppError::Internal(format!("Plan {} missing after upsert", input.key))
    })
}

pub fn get_plan_by_key(conn: &Connection, key: &str) -> Result<Option<Plan>> {
    query_one(
        conn,
        &format!("SELECT {} FROM plans WHERE key = ?1", PLAN_COLS),
        params![key],
    )
}

pub fn get_plan_by_product_id(conn: &Connection, product_id: &str) -> Result<Option<Plan>> {
    query_one(
        conn,
        &format!("SELECT {} FROM plans WHERE stripe_product_id = ?1", PLAN_COLS),
        params![product_id],
    )
}

/// Map a Stripe product id to the internal plan rank and key.
/// Unknown products yield a lookup with both fields `None`.
pub fn get_plan_number_by_product(conn: &Connection, product_id: &str) -> Result<PlanLookup> {
    Ok(match get_plan_by_product_id(conn, product_id)? {
        Some(plan) => PlanLookup {
            plan: Some(plan.plan_number),
            key: Some(plan.key),
        },
        None => PlanLookup::default(),
    })
}

pub fn list_plans(conn: &Connection) -> Result<Vec<Plan>> {
    query_all(
        conn,
        &format!("SELECT {} FROM plans ORDER BY account_type, plan_number", PLAN_COLS),
        [],
    )
}

// ============ Subscriptions ============

pub fn create_subscription(conn: &Connection, input: &CreateSubscription) -> Result<Subscription> {
    let id = gen_id();
    let now = now();
    let sql = format!(
        "INSERT INTO {} (id, {}, customer_id, plan, status, paid_status, cancel_at_period_end, created_at, last_edited_at)
         VALUES (?1, ?2, ?3, 0, ?4, ?5, 0, ?6, ?7)",
        input.kind.table(),
        input.kind.owner_column()
    );
    conn.execute(
        &sql,
        params![&id, &input.owner_id, &input.customer_id, &input.status, input.paid_status, now, now],
    )?;

    get_subscription_by_id(conn, input.kind, &id)?.ok_or_else(|| {
        crate::error::AppError::Internal("Subscription missing after insert".into())
    })
}

pub fn get_subscription_by_id(
    conn: &Connection,
    kind: SubscriptionKind,
    id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!("SELECT {} FROM {} WHERE id = ?1", subscription_cols(kind), kind.table()),
        params![id],
    )
}

/// Most recently edited subscription for an owner.
pub fn get_subscription_by_owner(
    conn: &Connection,
    kind: SubscriptionKind,
    owner_id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM {} WHERE {} = ?1 ORDER BY last_edited_at DESC LIMIT 1",
            subscription_cols(kind),
            kind.table(),
            kind.owner_column()
        ),
        params![owner_id],
    )
}

pub fn get_subscription_by_stripe_id(
    conn: &Connection,
    kind: SubscriptionKind,
    stripe_subscription_id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM {} WHERE stripe_subscription_id = ?1 ORDER BY last_edited_at DESC LIMIT 1",
            subscription_cols(kind),
            kind.table()
        ),
        params![stripe_subscription_id],
    )
}

pub fn get_subscription_by_customer(
    conn: &Connection,
    kind: SubscriptionKind,
    customer_id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM {} WHERE customer_id = ?1 ORDER BY last_edited_at DESC LIMIT 1",
            subscription_cols(kind),
            kind.table()
        ),
        params![customer_id],
    )
}

/// Search both subscription tables by Stripe subscription id.
pub fn find_subscription_by_stripe_id(
    conn: &Connection,
    stripe_subscription_id: &str,
) -> Result<Option<Subscription>> {
    for kind in SubscriptionKind::ALL {
        if let Some(sub) = get_subscription_by_stripe_id(conn, kind, stripe_subscription_id)? {
            return Ok(Some(sub));
        }
    }
    Ok(None)
}

/// All subscriptions (either table) billed to a Stripe customer.
pub fn find_subscriptions_by_customer(conn: &Connection, customer_id: &str) -> Result<Vec<Subscription>> {
    let mut found = Vec::new();
    for kind in SubscriptionKind::ALL {
        let mut rows: Vec<Subscription> = query_all(
            conn,
            &format!(
                "SELECT {} FROM {} WHERE customer_id = ?1 ORDER BY last_edited_at DESC",
                subscription_cols(kind),
                kind.table()
            ),
            params![customer_id],
        )?;
        found.append(&mut rows);
    }
    Ok(found)
}

pub fn update_subscription(
    conn: &Connection,
    kind: SubscriptionKind,
    id: &str,
    patch: &SubscriptionPatch,
) -> Result<bool> {
    let (coupon, percent, amount, duration) = match &patch.discount {
        Some(Some(d)) => (
            Some(d.coupon.clone()),
            Some(d.percent),
            Some(d.amount),
            Some(d.duration.clone()),
        ),
        Some(None) => (Some(None), Some(None), Some(None), Some(None)),
        None => (None, None, None, None),
    };

    UpdateBuilder::new(kind.table(), id)
        .touching("last_edited_at")
        .set_opt("customer_id", patch.customer_id.clone())
        .set_opt("stripe_subscription_id", patch.stripe_subscription_id.clone())
        .set_opt("plan", patch.plan)
        .set_opt("plan_key", patch.plan_key.clone())
        .set_nullable("next_plan", patch.next_plan)
        .set_opt("amount", patch.amount)
        .set_nullable("next_amount", patch.next_amount)
        .set_opt("currency", patch.currency.clone())
        .set_opt("interval", patch.interval.clone())
        .set_nullable("next_interval", patch.next_interval.clone())
        .set_opt("status", patch.status.clone())
        .set_opt("paid_status", patch.paid_status)
        .set_opt("current_period_start", patch.current_period_start)
        .set_opt("current_period_end", patch.current_period_end)
        .set_opt("cancel_at_period_end", patch.cancel_at_period_end)
        .set_nullable("canceled_at", patch.canceled_at)
        .set_opt("ended_at", patch.ended_at)
        .set_nullable("cancellation_reason", patch.cancellation_reason.clone())
        .set_nullable("cancellation_comment", patch.cancellation_comment.clone())
        .set_nullable("cancellation_feedback", patch.cancellation_feedback.clone())
        .set_nullable("discount_coupon", coupon)
        .set_nullable("discount_percent", percent)
        .set_nullable("discount_amount", amount)
        .set_nullable("discount_duration", duration)
        .set_nullable("trial_ends_at", patch.trial_ends_at)
        .set_nullable("last_payment_error", patch.last_payment_error.clone())
        .execute(conn)
}

pub fn delete_subscription(conn: &Connection, kind: SubscriptionKind, id: &str) -> Result<bool> {
    let deleted = conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", kind.table()),
        params![id],
    )?;
    Ok(deleted > 0)
}

/// Detach a deleted Stripe customer from every subscription row and user.
/// Returns the number of subscription rows touched.
pub fn clear_customer_id(conn: &Connection, customer_id: &str) -> Result<usize> {
    let now = now();
    let mut cleared = 0;
    for kind in SubscriptionKind::ALL {
        cleared += conn.execute(
            &format!(
                "UPDATE {} SET customer_id = NULL, last_edited_at = ?1 WHERE customer_id = ?2",
                kind.table()
            ),
            params![now, customer_id],
        )?;
    }
    conn.execute(
        "UPDATE users SET stripe_customer_id = NULL, updated_at = ?1 WHERE stripe_customer_id = ?2",
        params![now, customer_id],
    )?;
    Ok(cleared)
}

// ============ Webhook Event Log ============

/// Append one raw event. Every delivery gets its own row, redeliveries included.
pub fn record_webhook_event(conn: &Connection, input: &CreateWebhookEvent) -> Result<WebhookEventLog> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO stripe_webhook_events (id, event_id, event_type, livemode, payload, stripe_created_at, received_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &id,
            &input.event_id,
            &input.event_type,
            input.livemode,
            &input.payload,
            input.stripe_created_at,
            now
        ],
    )?;

    Ok(WebhookEventLog {
        id,
        event_id: input.event_id.clone(),
        event_type: input.event_type.clone(),
        livemode: input.livemode,
        payload: input.payload.clone(),
        stripe_created_at: input.stripe_created_at,
        received_at: now,
    })
}

/// Whether a log row inserted before `log_id` already carries `event_id`.
/// Later rows are ignored, so of two racing deliveries the first still dispatches.
pub fn webhook_event_seen_before(conn: &Connection, event_id: &str, log_id: &str) -> Result<bool> {
    let seen: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM stripe_webhook_events
             WHERE event_id = ?1
               AND rowid < (SELECT rowid FROM stripe_webhook_events WHERE id = ?2)
             LIMIT 1",
            params![event_id, log_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(seen.is_some())
}

pub fn count_webhook_events(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM stripe_webhook_events", [], |row| row.get(0))?)
}

pub fn list_webhook_events(conn: &Connection, limit: i64) -> Result<Vec<WebhookEventLog>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM stripe_webhook_events ORDER BY received_at DESC, rowid DESC LIMIT ?1",
            WEBHOOK_EVENT_COLS
        ),
        params![limit],
    )
}

// ============ Newsletter ============

pub fn create_newsletter_subscription(
    conn: &Connection,
    input: &CreateNewsletterSubscription,
) -> Result<NewsletterSubscription> {
    let id = gen_id();
    let now = now();
    let types = serde_json::to_string(&input.types)?;

    conn.execute(
        "INSERT INTO newsletter_subscriptions (id, user_id, email, active, frequency, plan, types, created_at, updated_at)
         VALUES (?1, ?2, ?3, 1, ?4, 0, ?5, ?6, ?7)",
        params![&id, &input.user_id, &input.email, input.frequency.as_ref(), types, now, now],
    )?;

    Ok(NewsletterSubscription {
        id,
        user_id: input.user_id.clone(),
        email: input.email.clone(),
        active: true,
        frequency: input.frequency,
        plan: 0,
        types: input.types.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_newsletter_by_user_id(conn: &Connection, user_id: &str) -> Result<Option<NewsletterSubscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM newsletter_subscriptions WHERE user_id = ?1 LIMIT 1",
            NEWSLETTER_COLS
        ),
        params![user_id],
    )
}

pub fn get_newsletter_by_email(conn: &Connection, email: &str) -> Result<Option<NewsletterSubscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM newsletter_subscriptions WHERE lower(email) = lower(?1)",
            NEWSLETTER_COLS
        ),
        params![email],
    )
}

pub fn update_newsletter_plan(
    conn: &Connection,
    id: &str,
    user_id: Option<&str>,
    plan: i64,
    frequency: Option<NewsletterFrequency>,
) -> Result<bool> {
    UpdateBuilder::new("newsletter_subscriptions", id)
        .touching("updated_at")
        .set("plan", plan)
        .set_opt("user_id", user_id.map(str::to_string))
        .set_opt("frequency", frequency.map(|f| f.as_ref().to_string()))
        .execute(conn)
}

// ============ Open Calls ============

pub fn create_open_call(conn: &Connection, input: &CreateOpenCall) -> Result<OpenCall> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO open_calls (id, organization_id, title, state, paid, free_call, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, ?6)",
        params![&id, &input.organization_id, &input.title, OpenCallState::Draft.as_ref(), now, now],
    )?;

    Ok(OpenCall {
        id,
        organization_id: input.organization_id.clone(),
        title: input.title.clone(),
        state: OpenCallState::Draft,
        paid: false,
        free_call: false,
        payment_intent_id: None,
        charge_id: None,
        amount_paid: None,
        paid_at: None,
        refunded_at: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_open_call_by_id(conn: &Connection, id: &str) -> Result<Option<OpenCall>> {
    query_one(
        conn,
        &format!("SELECT {} FROM open_calls WHERE id = ?1", OPEN_CALL_COLS),
        params![id],
    )
}

pub fn get_open_call_by_payment_intent(conn: &Connection, payment_intent_id: &str) -> Result<Option<OpenCall>> {
    query_one(
        conn,
        &format!("SELECT {} FROM open_calls WHERE payment_intent_id = ?1", OPEN_CALL_COLS),
        params![payment_intent_id],
    )
}

pub fn mark_open_call_paid(conn: &Connection, id: &str, payment: &OpenCallPayment) -> Result<bool> {
    UpdateBuilder::new("open_calls", id)
        .touching("updated_at")
        .set("paid", true)
        .set("free_call", payment.free_call)
        .set("state", OpenCallState::Submitted.as_ref().to_string())
        .set("amount_paid", payment.amount_paid)
        .set("paid_at", now())
        .set_opt("payment_intent_id", payment.payment_intent_id.clone())
        .execute(conn)
}

pub fn mark_open_call_refunded(conn: &Connection, id: &str, charge_id: Option<&str>) -> Result<bool> {
    UpdateBuilder::new("open_calls", id)
        .touching("updated_at")
        .set("paid", false)
        .set("state", OpenCallState::Refunded.as_ref().to_string())
        .set("refunded_at", now())
        .set_opt("charge_id", charge_id.map(str::to_string))
        .execute(conn)
}

/// Whether the organization has ever paid (or been granted) a listing.
pub fn organization_has_paid_open_call(conn: &Connection, organization_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM open_calls WHERE organization_id = ?1 AND (paid = 1 OR free_call = 1)",
        params![organization_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

// ============ Online Events ============

pub fn create_online_event(conn: &Connection, input: &CreateOnlineEvent) -> Result<OnlineEvent> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO online_events (id, organization_id, name, price, currency, capacity_max, capacity_current, starts_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)",
        params![
            &id,
            &input.organization_id,
            &input.name,
            input.price,
            &input.currency,
            input.capacity_max,
            input.starts_at,
            now
        ],
    )?;

    Ok(OnlineEvent {
        id,
        organization_id: input.organization_id.clone(),
        name: input.name.clone(),
        price: input.price,
        currency: input.currency.clone(),
        capacity_max: input.capacity_max,
        capacity_current: 0,
        starts_at: input.starts_at,
        created_at: now,
    })
}

pub fn get_online_event_by_id(conn: &Connection, id: &str) -> Result<Option<OnlineEvent>> {
    query_one(
        conn,
        &format!("SELECT {} FROM online_events WHERE id = ?1", ONLINE_EVENT_COLS),
        params![id],
    )
}

/// Add one seat to the event's current capacity. Not idempotent.
pub fn increment_event_capacity(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE online_events SET capacity_current = capacity_current + 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(affected > 0)
}

pub fn create_event_registration(
    conn: &Connection,
    event_id: &str,
    user_id: Option<&str>,
    payment_intent_id: Option<&str>,
) -> Result<EventRegistration> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO event_registrations (id, event_id, user_id, paid, payment_intent_id, refunded, created_at)
         VALUES (?1, ?2, ?3, 1, ?4, 0, ?5)",
        params![&id, event_id, user_id, payment_intent_id, now],
    )?;

    Ok(EventRegistration {
        id,
        event_id: event_id.to_string(),
        user_id: user_id.map(str::to_string),
        paid: true,
        payment_intent_id: payment_intent_id.map(str::to_string),
        refunded: false,
        created_at: now,
    })
}

pub fn list_registrations_for_event(conn: &Connection, event_id: &str) -> Result<Vec<EventRegistration>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM event_registrations WHERE event_id = ?1 ORDER BY created_at",
            REGISTRATION_COLS
        ),
        params![event_id],
    )
}

pub fn get_registrations_by_payment_intent(
    conn: &Connection,
    payment_intent_id: &str,
) -> Result<Vec<EventRegistration>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM event_registrations WHERE payment_intent_id = ?1 ORDER BY created_at",
            REGISTRATION_COLS
        ),
        params![payment_intent_id],
    )
}

pub fn mark_registrations_refunded(conn: &Connection, payment_intent_id: &str) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE event_registrations SET refunded = 1, paid = 0 WHERE payment_intent_id = ?1 AND refunded = 0",
        params![payment_intent_id],
    )?;
    Ok(affected)
}

// ============ Scheduled Tasks ============

pub fn create_scheduled_task(
    conn: &Connection,
    kind: TaskKind,
    payload: &str,
    run_at: i64,
) -> Result<ScheduledTask> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO scheduled_tasks (id, kind, payload, run_at, status, attempts, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
        params![&id, kind.as_ref(), payload, run_at, TaskStatus::Pending.as_ref(), now, now],
    )?;

    Ok(ScheduledTask {
        id,
        kind,
        payload: payload.to_string(),
        run_at,
        status: TaskStatus::Pending,
        attempts: 0,
        last_error: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_scheduled_task(conn: &Connection, id: &str) -> Result<Option<ScheduledTask>> {
    query_one(
        conn,
        &format!("SELECT {} FROM scheduled_tasks WHERE id = ?1", SCHEDULED_TASK_COLS),
        params![id],
    )
}

pub fn list_tasks_by_status(conn: &Connection, status: TaskStatus) -> Result<Vec<ScheduledTask>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM scheduled_tasks WHERE status = ?1 ORDER BY run_at",
            SCHEDULED_TASK_COLS
        ),
        params![status.as_ref()],
    )
}

/// Claim up to `limit` due tasks for execution.
///
/// Due means a pending task whose `run_at` has passed, or a running task whose
/// lease (`run_at` while running) has expired because its runner died. A claim
/// flips the row to running, bumps `attempts`, and moves `run_at` to
/// `now_ts + lease_secs`. The update is a compare-and-swap on the observed
/// status and `run_at`, so a task claimed by another runner in the meantime is
/// skipped.
pub fn claim_due_tasks(
    conn: &Connection,
    now_ts: i64,
    lease_secs: i64,
    limit: i64,
) -> Result<Vec<ScheduledTask>> {
    let candidates: Vec<ScheduledTask> = query_all(
        conn,
        &format!(
            "SELECT {} FROM scheduled_tasks
             WHERE status IN (?1, ?2) AND run_at <= ?3
             ORDER BY run_at LIMIT ?4",
            SCHEDULED_TASK_COLS
        ),
        params![
            TaskStatus::Pending.as_ref(),
            TaskStatus::Running.as_ref(),
            now_ts,
            limit
        ],
    )?;

    let lease_until = now_ts + lease_secs;
    let mut claimed = Vec::with_capacity(candidates.len());
    for mut task in candidates {
        let affected = conn.execute(
            "UPDATE scheduled_tasks
             SET status = ?1, attempts = attempts + 1, run_at = ?2, updated_at = ?3
             WHERE id = ?4 AND status = ?5 AND run_at = ?6",
            params![
                TaskStatus::Running.as_ref(),
                lease_until,
                now(),
                &task.id,
                task.status.as_ref(),
                task.run_at
            ],
        )?;
        if affected > 0 {
            task.status = TaskStatus::Running;
            task.attempts += 1;
            task.run_at = lease_until;
            claimed.push(task);
        }
    }
    Ok(claimed)
}

pub fn complete_task(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE scheduled_tasks SET status = ?1, last_error = NULL, updated_at = ?2 WHERE id = ?3",
        params![TaskStatus::Done.as_ref(), now(), id],
    )?;
    Ok(())
}

/// Put a failed task back in the queue to run again at `run_at`.
pub fn reschedule_task(conn: &Connection, id: &str, error: &str, run_at: i64) -> Result<()> {
    conn.execute(
        "UPDATE scheduled_tasks SET status = ?1, last_error = ?2, run_at = ?3, updated_at = ?4 WHERE id = ?5",
        params![TaskStatus::Pending.as_ref(), error, run_at, now(), id],
    )?;
    Ok(())
}

pub fn fail_task(conn: &Connection, id: &str, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE scheduled_tasks SET status = ?1, last_error = ?2, updated_at = ?3 WHERE id = ?4",
        params![TaskStatus::Failed.as_ref(), error, now(), id],
    )?;
    Ok(())
}
