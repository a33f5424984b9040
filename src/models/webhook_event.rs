use serde::{Deserialize, Serialize};

/// Append-only record of an inbound provider event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventLog {
    pub id: String,
    pub event_id: Option<String>,
    pub event_type: String,
    pub livemode: bool,
    /// Raw JSON body as received
    pub payload: String,
    pub stripe_created_at: Option<i64>,
    pub received_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreateWebhookEvent {
    pub event_id: Option<String>,
    pub event_type: String,
    pub livemode: bool,
    pub payload: String,
    pub stripe_created_at: Option<i64>,
}
