//! Job that follows the comments table and re-ranks best comments.
//!
//! Comments are consumed in id order from a persisted cursor. Each affected
//! sale is ranked once per batch, however many of its comments arrived.

use std::sync::Arc;

use anyhow::Result;
use log::{debug, info, warn};
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;

use crate::db::models::CommentRecord;
use crate::db::{CommentStore, Database};
use crate::reconciler::{BestCommentRanker, Outcome};
use crate::utils::canonical_address;

pub const JOB_NAME: &str = "comment_watcher";

/// Name of the cursor row in `stream_cursors`.
const CURSOR_NAME: &str = "comments";

/// Tally of one ranked batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RankReport {
    pub ranked: usize,
    pub unchanged: usize,
    pub missing: usize,
    pub failed: usize,
}

/// Latest comment of each distinct sale in `batch`, in order of first
/// appearance. Comments with an unparseable sale address are dropped.
pub fn contracts_to_rank(batch: &[CommentRecord]) -> Vec<&CommentRecord> {
    let mut order: Vec<String> = Vec::new();
    let mut latest: FxHashMap<String, &CommentRecord> = FxHashMap::default();

    for comment in batch {
        let Some(contract) = canonical_address(&comment.contract_address) else {
            warn!(
                "Comment {} references invalid sale address {:?}, skipping",
                comment.id, comment.contract_address
            );
            continue;
        };
        if latest.insert(contract.clone(), comment).is_none() {
            order.push(contract);
        }
    }

    order
        .iter()
        .filter_map(|contract| latest.get(contract).copied())
        .collect()
}

/// Rank every sale touched by `batch`.
pub async fn rank_batch(ranker: &BestCommentRanker, batch: &[CommentRecord]) -> RankReport {
    let mut report = RankReport::default();

    for comment in contracts_to_rank(batch) {
        match ranker.on_comment_inserted(comment).await {
            Ok(Outcome::Applied) => report.ranked += 1,
            Ok(Outcome::Unchanged) => report.unchanged += 1,
            Ok(Outcome::MissingRecord) => report.missing += 1,
            Err(e) => {
                warn!("Failed to rank comments of {}: {}", comment.contract_address, e);
                report.failed += 1;
            },
        }
    }

    report
}

pub struct CommentWatcher {
    db: Arc<Database>,
    comments: Arc<dyn CommentStore>,
    ranker: Arc<BestCommentRanker>,
    batch_size: i64,
    running: Mutex<()>,
}

impl CommentWatcher {
    pub fn new(
        db: Arc<Database>,
        comments: Arc<dyn CommentStore>,
        ranker: Arc<BestCommentRanker>,
        batch_size: i64,
    ) -> Self {
        Self {
            db,
            comments,
            ranker,
            batch_size,
            running: Mutex::new(()),
        }
    }

    /// Consume one batch of new comments. A failed ranking is not retried;
    /// the cursor moves past it.
    pub async fn run(&self) -> Result<()> {
        let Ok(_guard) = self.running.try_lock() else {
            return Ok(());
        };

        let after = self.db.postgres.get_stream_cursor(CURSOR_NAME).await?;
        let batch = self.comments.comments_after(after, self.batch_size).await?;
        let Some(last) = batch.last().map(|c| c.id) else {
            return Ok(());
        };

        let now = time::OffsetDateTime::now_utc();
        let report = rank_batch(&self.ranker, &batch).await;

        self.db.postgres.set_stream_cursor(CURSOR_NAME, last).await?;
        self.db.postgres.set_cron_checkpoint(JOB_NAME, now).await?;

        if report.failed > 0 {
            info!(
                "comment_watcher: {} comments up to id {}, {} sales ranked, {} failed",
                batch.len(),
                last,
                report.ranked,
                report.failed
            );
        } else {
            debug!(
                "comment_watcher: {} comments up to id {}, {:?}",
                batch.len(),
                last,
                report
            );
        }
        Ok(())
    }
}
