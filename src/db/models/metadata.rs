use serde::{Deserialize, Serialize};

/// Displayed "best comment" projection.
///
/// Replaced as a whole on every recompute, never merged field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestComment {
    pub content: String,
    #[serde(rename = "walletAddress")]
    pub wallet_address: String,
}

/// Sale contract metadata (PostgreSQL)
///
/// Primary Key: address
/// Query Pattern: "Get sale card for contract X"
#[derive(Debug, Clone, PartialEq)]
pub struct ContractMetadata {
    // Primary key
    pub address: String,

    // Set at creation, mutable by MetaUpdated
    pub title: String,
    pub description: String,
    pub image_url: String,

    // Set once
    pub created_at_ms: i64,

    // Monotonic false -> true
    pub is_launched: bool,

    pub best_comment: Option<BestComment>,
}

impl ContractMetadata {
    pub fn new(
        address: String,
        title: String,
        description: String,
        image_url: String,
        created_at_ms: i64,
    ) -> Self {
        Self {
            address,
            title,
            description,
            image_url,
            created_at_ms,
            is_launched: false,
            best_comment: None,
        }
    }
}
