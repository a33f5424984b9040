use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NewsletterFrequency {
    Monthly,
    Weekly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsletterSubscription {
    pub id: String,
    pub user_id: Option<String>,
    pub email: String,
    pub active: bool,
    pub frequency: NewsletterFrequency,
    pub plan: i64,
    /// Content types the reader opted into, e.g. "openCall", "general"
    pub types: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateNewsletterSubscription {
    #[serde(default)]
    pub user_id: Option<String>,
    pub email: String,
    pub frequency: NewsletterFrequency,
    #[serde(default)]
    pub types: Vec<String>,
}
