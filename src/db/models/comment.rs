use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user comment on a sale (PostgreSQL, written by the API).
///
/// Read-only from the indexer's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: i64,
    pub contract_address: String,
    pub wallet_address: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
