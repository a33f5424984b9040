use rusqlite::Connection;

use crate::error::Result;

/// The two subscription tables share one column layout; only the owner
/// column differs.
macro_rules! subscription_table {
    ($table:literal, $owner:literal, $owner_table:literal) => {
        concat!(
            "CREATE TABLE IF NOT EXISTS ", $table, " (
                id TEXT PRIMARY KEY,
                ", $owner, " TEXT NOT NULL REFERENCES ", $owner_table, "(id) ON DELETE CASCADE,
                customer_id TEXT,
                stripe_subscription_id TEXT,
                plan INTEGER NOT NULL DEFAULT 0,
                plan_key TEXT,
                next_plan INTEGER,
                amount INTEGER,
                next_amount INTEGER,
                currency TEXT,
                interval TEXT,
                next_interval TEXT,
                status TEXT NOT NULL,
                paid_status INTEGER NOT NULL DEFAULT 0,
                current_period_start INTEGER,
                current_period_end INTEGER,
                cancel_at_period_end INTEGER NOT NULL DEFAULT 0,
                canceled_at INTEGER,
                ended_at INTEGER,
                cancellation_reason TEXT,
                cancellation_comment TEXT,
                cancellation_feedback TEXT,
                discount_coupon TEXT,
                discount_percent REAL,
                discount_amount INTEGER,
                discount_duration TEXT,
                trial_ends_at INTEGER,
                last_payment_error TEXT,
                created_at INTEGER NOT NULL,
                last_edited_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_", $table, "_owner ON ", $table, "(", $owner, ");
            CREATE INDEX IF NOT EXISTS idx_", $table, "_customer ON ", $table, "(customer_id);
            CREATE INDEX IF NOT EXISTS idx_", $table, "_stripe ON ", $table, "(stripe_subscription_id);"
        )
    };
}

const CORE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    account_type TEXT NOT NULL,
    plan INTEGER NOT NULL DEFAULT 0,
    subscription TEXT,
    stripe_customer_id TEXT,
    banned INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_users_customer ON users(stripe_customer_id);

CREATE TABLE IF NOT EXISTS auth_sessions (
    token TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    expires_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS organizations (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL REFERENCES users(id),
    name TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    plan INTEGER NOT NULL DEFAULT 0,
    subscription TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_organizations_owner ON organizations(owner_id);

CREATE TABLE IF NOT EXISTS plans (
    id TEXT PRIMARY KEY,
    key TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    account_type TEXT NOT NULL,
    plan_number INTEGER NOT NULL,
    stripe_product_id TEXT,
    monthly_price INTEGER,
    yearly_price INTEGER,
    one_time_price INTEGER,
    features TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_plans_product ON plans(stripe_product_id);

CREATE TABLE IF NOT EXISTS stripe_webhook_events (
    id TEXT PRIMARY KEY,
    event_id TEXT,
    event_type TEXT NOT NULL,
    livemode INTEGER NOT NULL DEFAULT 0,
    payload TEXT NOT NULL,
    stripe_created_at INTEGER,
    received_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_webhook_events_event_id ON stripe_webhook_events(event_id);

CREATE TABLE IF NOT EXISTS newsletter_subscriptions (
    id TEXT PRIMARY KEY,
    user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
    email TEXT NOT NULL UNIQUE,
    active INTEGER NOT NULL DEFAULT 1,
    frequency TEXT NOT NULL,
    plan INTEGER NOT NULL DEFAULT 0,
    types TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_newsletter_user ON newsletter_subscriptions(user_id);

CREATE TABLE IF NOT EXISTS open_calls (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    state TEXT NOT NULL,
    paid INTEGER NOT NULL DEFAULT 0,
    free_call INTEGER NOT NULL DEFAULT 0,
    payment_intent_id TEXT,
    charge_id TEXT,
    amount_paid INTEGER,
    paid_at INTEGER,
    refunded_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_open_calls_org ON open_calls(organization_id);
CREATE INDEX IF NOT EXISTS idx_open_calls_payment_intent ON open_calls(payment_intent_id);

CREATE TABLE IF NOT EXISTS online_events (
    id TEXT PRIMARY KEY,
    organization_id TEXT REFERENCES organizations(id) ON DELETE SET NULL,
    name TEXT NOT NULL,
    price INTEGER NOT NULL,
    currency TEXT NOT NULL,
    capacity_max INTEGER NOT NULL,
    capacity_current INTEGER NOT NULL DEFAULT 0,
    starts_at INTEGER,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS event_registrations (
    id TEXT PRIMARY KEY,
    event_id TEXT NOT NULL REFERENCES online_events(id) ON DELETE CASCADE,
    user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
    paid INTEGER NOT NULL DEFAULT 0,
    payment_intent_id TEXT,
    refunded INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_registrations_event ON event_registrations(event_id);
CREATE INDEX IF NOT EXISTS idx_registrations_payment_intent ON event_registrations(payment_intent_id);

CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    run_at INTEGER NOT NULL,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_due ON scheduled_tasks(status, run_at);
";

/// Create all tables and indexes. Safe to run on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(CORE_SCHEMA)?;
    conn.execute_batch(subscription_table!("user_subscriptions", "user_id", "users"))?;
    conn.execute_batch(subscription_table!(
        "org_subscriptions",
        "organization_id",
        "organizations"
    ))?;
    Ok(())
}
