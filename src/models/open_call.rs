use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OpenCallState {
    Draft,
    Pending,
    Submitted,
    Published,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenCall {
    pub id: String,
    pub organization_id: String,
    pub title: String,
    pub state: OpenCallState,
    pub paid: bool,
    /// Listing fee was waived by the free-call coupon
    pub free_call: bool,
    pub payment_intent_id: Option<String>,
    pub charge_id: Option<String>,
    pub amount_paid: Option<i64>,
    pub paid_at: Option<i64>,
    pub refunded_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateOpenCall {
    pub organization_id: String,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct OpenCallPayment {
    pub payment_intent_id: Option<String>,
    pub amount_paid: i64,
    pub free_call: bool,
}
