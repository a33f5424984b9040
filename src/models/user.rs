use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AccountType {
    Artist,
    Organizer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub account_type: AccountType,
    /// Denormalized plan rank, 0 = no active plan
    pub plan: i64,
    /// Denormalized label such as "monthly-banana"
    pub subscription: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub banned: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub name: String,
    pub account_type: AccountType,
}
