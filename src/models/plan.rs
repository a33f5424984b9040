use serde::{Deserialize, Serialize};

use super::AccountType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub key: String,
    pub name: String,
    pub account_type: AccountType,
    /// Small integer rank; higher is a richer tier
    pub plan_number: i64,
    pub stripe_product_id: Option<String>,
    pub monthly_price: Option<i64>,
    pub yearly_price: Option<i64>,
    pub one_time_price: Option<i64>,
    pub features: Vec<String>,
}

/// Plan import record, upserted by `key`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertPlan {
    pub key: String,
    pub name: String,
    pub account_type: AccountType,
    pub plan_number: i64,
    #[serde(default)]
    pub stripe_product_id: Option<String>,
    #[serde(default)]
    pub monthly_price: Option<i64>,
    #[serde(default)]
    pub yearly_price: Option<i64>,
    #[serde(default)]
    pub one_time_price: Option<i64>,
    #[serde(default)]
    pub features: Vec<String>,
}

/// Result of mapping a provider product id to an internal plan.
/// Both fields are null when the product is unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanLookup {
    pub plan: Option<i64>,
    pub key: Option<String>,
}
