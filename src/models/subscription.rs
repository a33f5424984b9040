use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::AccountType;

/// Which subscription table a record lives in. Artists subscribe as users,
/// organizers subscribe on behalf of their organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubscriptionKind {
    Artist,
    Organizer,
}

impl SubscriptionKind {
    pub fn table(&self) -> &'static str {
        match self {
            SubscriptionKind::Artist => "user_subscriptions",
            SubscriptionKind::Organizer => "org_subscriptions",
        }
    }

    pub fn owner_column(&self) -> &'static str {
        match self {
            SubscriptionKind::Artist => "user_id",
            SubscriptionKind::Organizer => "organization_id",
        }
    }

    pub fn owner_table(&self) -> &'static str {
        match self {
            SubscriptionKind::Artist => "users",
            SubscriptionKind::Organizer => "organizations",
        }
    }

    pub const ALL: [SubscriptionKind; 2] = [SubscriptionKind::Artist, SubscriptionKind::Organizer];
}

impl From<AccountType> for SubscriptionKind {
    fn from(account_type: AccountType) -> Self {
        match account_type {
            AccountType::Artist => SubscriptionKind::Artist,
            AccountType::Organizer => SubscriptionKind::Organizer,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Discount {
    pub coupon: Option<String>,
    pub percent: Option<f64>,
    pub amount: Option<i64>,
    /// "once", "repeating" or "forever"
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub kind: SubscriptionKind,
    /// user id for artists, organization id for organizers
    pub owner_id: String,
    pub customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub plan: i64,
    pub plan_key: Option<String>,
    pub next_plan: Option<i64>,
    pub amount: Option<i64>,
    pub next_amount: Option<i64>,
    pub currency: Option<String>,
    pub interval: Option<String>,
    pub next_interval: Option<String>,
    pub status: String,
    pub paid_status: bool,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub cancellation_reason: Option<String>,
    pub cancellation_comment: Option<String>,
    pub cancellation_feedback: Option<String>,
    pub discount: Option<Discount>,
    pub trial_ends_at: Option<i64>,
    pub last_payment_error: Option<String>,
    pub created_at: i64,
    pub last_edited_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub kind: SubscriptionKind,
    pub owner_id: String,
    pub customer_id: Option<String>,
    pub status: String,
    pub paid_status: bool,
}

/// Field patch for a subscription row. `None` leaves a column untouched;
/// for the nested options `Some(None)` writes NULL.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionPatch {
    pub customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub plan: Option<i64>,
    pub plan_key: Option<String>,
    pub next_plan: Option<Option<i64>>,
    pub amount: Option<i64>,
    pub next_amount: Option<Option<i64>>,
    pub currency: Option<String>,
    pub interval: Option<String>,
    pub next_interval: Option<Option<String>>,
    pub status: Option<String>,
    pub paid_status: Option<bool>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub cancel_at_period_end: Option<bool>,
    pub canceled_at: Option<Option<i64>>,
    pub ended_at: Option<i64>,
    pub cancellation_reason: Option<Option<String>>,
    pub cancellation_comment: Option<Option<String>>,
    pub cancellation_feedback: Option<Option<String>>,
    pub discount: Option<Option<Discount>>,
    pub trial_ends_at: Option<Option<i64>>,
    pub last_payment_error: Option<Option<String>>,
}
