//! Row mapping for the query helpers.
//!
//! Each model has a column list constant and a `FromRow` impl that reads
//! columns positionally in the same order.

use rusqlite::{Connection, Params, Row};

use crate::error::Result;
use crate::models::*;

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

pub fn query_one<T: FromRow>(conn: &Connection, sql: &str, params: impl Params) -> Result<Option<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(T::from_row(row)?)),
        None => Ok(None),
    }
}

pub fn query_all<T: FromRow>(conn: &Connection, sql: &str, params: impl Params) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| T::from_row(row))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Parse a TEXT column holding a strum-backed enum.
fn parse_enum<T: std::str::FromStr>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unexpected enum value: {}", raw).into(),
        )
    })
}

/// Parse a TEXT column holding a JSON string array; malformed data reads as empty.
fn parse_string_list(row: &Row, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    Ok(serde_json::from_str(&raw).unwrap_or_default())
}

pub const USER_COLS: &str = "id, email, name, account_type, plan, subscription, stripe_customer_id, banned, created_at, updated_at";

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            account_type: parse_enum(row, 3)?,
            plan: row.get(4)?,
            subscription: row.get(5)?,
            stripe_customer_id: row.get(6)?,
            banned: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

pub const ORGANIZATION_COLS: &str =
    "id, owner_id, name, slug, plan, subscription, created_at, updated_at";

impl FromRow for Organization {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Organization {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            slug: row.get(3)?,
            plan: row.get(4)?,
            subscription: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

pub const PLAN_COLS: &str = "id, key, name, account_type, plan_number, stripe_product_id, monthly_price, yearly_price, one_time_price, features";

impl FromRow for Plan {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Plan {
            id: row.get(0)?,
            key: row.get(1)?,
            name: row.get(2)?,
            account_type: parse_enum(row, 3)?,
            plan_number: row.get(4)?,
            stripe_product_id: row.get(5)?,
            monthly_price: row.get(6)?,
            yearly_price: row.get(7)?,
            one_time_price: row.get(8)?,
            features: parse_string_list(row, 9)?,
        })
    }
}

/// Subscription columns for `kind`, with the owner column aliased so both
/// tables map onto one struct.
pub fn subscription_cols(kind: SubscriptionKind) -> String {
    format!(
        "id, '{}' AS kind, {} AS owner_id, customer_id, stripe_subscription_id, plan, plan_key, \
         next_plan, amount, next_amount, currency, interval, next_interval, status, paid_status, \
         current_period_start, current_period_end, cancel_at_period_end, canceled_at, ended_at, \
         cancellation_reason, cancellation_comment, cancellation_feedback, discount_coupon, \
         discount_percent, discount_amount, discount_duration, trial_ends_at, last_payment_error, \
         created_at, last_edited_at",
        kind.as_ref(),
        kind.owner_column()
    )
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let discount_coupon: Option<String> = row.get(23)?;
        let discount_percent: Option<f64> = row.get(24)?;
        let discount_amount: Option<i64> = row.get(25)?;
        let discount_duration: Option<String> = row.get(26)?;
        let discount = if discount_coupon.is_some()
            || discount_percent.is_some()
            || discount_amount.is_some()
        {
            Some(Discount {
                coupon: discount_coupon,
                percent: discount_percent,
                amount: discount_amount,
                duration: discount_duration,
            })
        } else {
            None
        };

        Ok(Subscription {
            id: row.get(0)?,
            kind: parse_enum(row, 1)?,
            owner_id: row.get(2)?,
            customer_id: row.get(3)?,
            stripe_subscription_id: row.get(4)?,
            plan: row.get(5)?,
            plan_key: row.get(6)?,
            next_plan: row.get(7)?,
            amount: row.get(8)?,
            next_amount: row.get(9)?,
            currency: row.get(10)?,
            interval: row.get(11)?,
            next_interval: row.get(12)?,
            status: row.get(13)?,
            paid_status: row.get(14)?,
            current_period_start: row.get(15)?,
            current_period_end: row.get(16)?,
            cancel_at_period_end: row.get(17)?,
            canceled_at: row.get(18)?,
            ended_at: row.get(19)?,
            cancellation_reason: row.get(20)?,
            cancellation_comment: row.get(21)?,
            cancellation_feedback: row.get(22)?,
            discount,
            trial_ends_at: row.get(27)?,
            last_payment_error: row.get(28)?,
            created_at: row.get(29)?,
            last_edited_at: row.get(30)?,
        })
    }
}

pub const WEBHOOK_EVENT_COLS: &str =
    "id, event_id, event_type, livemode, payload, stripe_created_at, received_at";

impl FromRow for WebhookEventLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WebhookEventLog {
            id: row.get(0)?,
            event_id: row.get(1)?,
            event_type: row.get(2)?,
            livemode: row.get(3)?,
            payload: row.get(4)?,
            stripe_created_at: row.get(5)?,
            received_at: row.get(6)?,
        })
    }
}

pub const NEWSLETTER_COLS: &str =
    "id, user_id, email, active, frequency, plan, types, created_at, updated_at";

impl FromRow for NewsletterSubscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(NewsletterSubscription {
            id: row.get(0)?,
            user_id: row.get(1)?,
            email: row.get(2)?,
            active: row.get(3)?,
            frequency: parse_enum(row, 4)?,
            plan: row.get(5)?,
            types: parse_string_list(row, 6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

pub const OPEN_CALL_COLS: &str = "id, organization_id, title, state, paid, free_call, payment_intent_id, charge_id, amount_paid, paid_at, refunded_at, created_at, updated_at";

impl FromRow for OpenCall {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(OpenCall {
            id: row.get(0)?,
            organization_id: row.get(1)?,
            title: row.get(2)?,
            state: parse_enum(row, 3)?,
            paid: row.get(4)?,
            free_call: row.get(5)?,
            payment_intent_id: row.get(6)?,
            charge_id: row.get(7)?,
            amount_paid: row.get(8)?,
            paid_at: row.get(9)?,
            refunded_at: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}

pub const ONLINE_EVENT_COLS: &str = "id, organization_id, name, price, currency, capacity_max, capacity_current, starts_at, created_at";

impl FromRow for OnlineEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(OnlineEvent {
            id: row.get(0)?,
            organization_id: row.get(1)?,
            name: row.get(2)?,
            price: row.get(3)?,
            currency: row.get(4)?,
            capacity_max: row.get(5)?,
            capacity_current: row.get(6)?,
            starts_at: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

pub const REGISTRATION_COLS: &str =
    "id, event_id, user_id, paid, payment_intent_id, refunded, created_at";

impl FromRow for EventRegistration {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(EventRegistration {
            id: row.get(0)?,
            event_id: row.get(1)?,
            user_id: row.get(2)?,
            paid: row.get(3)?,
            payment_intent_id: row.get(4)?,
            refunded: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

pub const SCHEDULED_TASK_COLS: &str =
    "id, kind, payload, run_at, status, attempts, last_error, created_at, updated_at";

impl FromRow for ScheduledTask {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ScheduledTask {
            id: row.get(0)?,
            kind: parse_enum(row, 1)?,
            payload: row.get(2)?,
            run_at: row.get(3)?,
            status: parse_enum(row, 4)?,
            attempts: row.get(5)?,
            last_error: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}
