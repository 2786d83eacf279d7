use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Active,
    Inactive,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: i32,
    /// Owning user. Every read and write is scoped to this tenant.
    pub tenant_id: i32,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: Option<String>,
    pub status: ClientStatus,
    pub created_at: DateTime<Utc>,
}
