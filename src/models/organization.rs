use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub slug: String,
    pub plan: i64,
    pub subscription: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrganization {
    pub owner_id: String,
    pub name: String,
    pub slug: String,
}
