use serde::{Deserialize, Serialize};

/// Paid add-on event (workshop, portfolio review) with limited seats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineEvent {
    pub id: String,
    pub organization_id: Option<String>,
    pub name: String,
    pub price: i64,
    pub currency: String,
    pub capacity_max: i64,
    pub capacity_current: i64,
    pub starts_at: Option<i64>,
    pub created_at: i64,
}

impl OnlineEvent {
    pub fn is_full(&self) -> bool {
        self.capacity_current >= self.capacity_max
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateOnlineEvent {
    #[serde(default)]
    pub organization_id: Option<String>,
    pub name: String,
    pub price: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub capacity_max: i64,
    #[serde(default)]
    pub starts_at: Option<i64>,
}

fn default_currency() -> String {
    "usd".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRegistration {
    pub id: String,
    pub event_id: String,
    pub user_id: Option<String>,
    pub paid: bool,
    pub payment_intent_id: Option<String>,
    pub refunded: bool,
    pub created_at: i64,
}
