use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Indexer sync progress checkpoint (PostgreSQL).
///
/// Tracks the next block to stream for the configured chain.
/// Used to resume indexing after restarts without missing data; blocks after
/// the checkpoint may be replayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub chain_id: i64,
    pub last_indexed_block: u64,
    pub updated_at: DateTime<Utc>,
}

impl SyncCheckpoint {
    pub fn new(chain_id: i64, last_indexed_block: u64) -> Self {
        Self {
            chain_id,
            last_indexed_block,
            updated_at: Utc::now(),
        }
    }
}
