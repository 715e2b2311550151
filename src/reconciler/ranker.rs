//! Best-comment ranking.
//!
//! A sale's featured comment is the one whose author currently holds the
//! largest balance in that sale, ties going to the more recent comment.
//! Balances are read live from the chain on every recompute.

use std::sync::Arc;

use alloy::primitives::U256;
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, warn};

use crate::db::models::{BestComment, CommentRecord};
use crate::db::store::{CommentStore, MetadataStore};

use super::error::{canonical, Outcome, ReconcileError};

/// Source of a wallet's current balance in a sale contract.
#[async_trait]
pub trait BalanceOracle: Send + Sync {
    async fn get_balance(&self, contract: &str, wallet: &str) -> anyhow::Result<U256>;
}

/// Pick the best comment from `(comment, balance)` pairs in listing order.
///
/// The first pair is the provisional best. A later pair replaces it when its
/// balance is strictly greater, or equal with a strictly later `created_at`.
pub fn select_best<'a, I>(candidates: I) -> Option<&'a CommentRecord>
where
    I: IntoIterator<Item = (&'a CommentRecord, U256)>,
{
    candidates
        .into_iter()
        .fold(None::<(&'a CommentRecord, U256)>, |best, (comment, balance)| match best {
            None => Some((comment, balance)),
            Some((current, current_balance)) => {
                let displaces = balance > current_balance
                    || (balance == current_balance && comment.created_at > current.created_at);
                if displaces {
                    Some((comment, balance))
                } else {
                    Some((current, current_balance))
                }
            },
        })
        .map(|(comment, _)| comment)
}

pub struct BestCommentRanker {
    metadata: Arc<dyn MetadataStore>,
    comments: Arc<dyn CommentStore>,
    oracle: Arc<dyn BalanceOracle>,
}

impl BestCommentRanker {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        comments: Arc<dyn CommentStore>,
        oracle: Arc<dyn BalanceOracle>,
    ) -> Self {
        Self {
            metadata,
            comments,
            oracle,
        }
    }

    pub async fn on_comment_inserted(
        &self,
        comment: &CommentRecord,
    ) -> Result<Outcome, ReconcileError> {
        self.rank_contract(&comment.contract_address).await
    }

    /// Recompute and store the best comment of `contract`.
    pub async fn rank_contract(&self, contract: &str) -> Result<Outcome, ReconcileError> {
        let contract = canonical(contract)?;

        let metadata = self
            .metadata
            .get_metadata(&contract)
            .await
            .map_err(ReconcileError::store("read metadata", &contract))?;
        if metadata.is_none() {
            debug!("Comment on unknown sale {}, not ranking", contract);
            return Ok(Outcome::MissingRecord);
        }

        let comments = self
            .comments
            .list_comments(&contract)
            .await
            .map_err(ReconcileError::store("list comments", &contract))?;
        if comments.is_empty() {
            return Ok(Outcome::Unchanged);
        }

        let lookups = comments
            .iter()
            .map(|comment| self.oracle.get_balance(&contract, &comment.wallet_address));
        let balances = join_all(lookups).await;

        let candidates = comments
            .iter()
            .zip(balances)
            .filter_map(|(comment, balance)| match balance {
                Ok(balance) => Some((comment, balance)),
                Err(cause) => {
                    let err = ReconcileError::BalanceLookup {
                        contract: contract.clone(),
                        wallet: comment.wallet_address.clone(),
                        cause,
                    };
                    warn!("Excluding comment {} from ranking: {}", comment.id, err);
                    None
                },
            });

        let Some(best) = select_best(candidates) else {
            warn!("No balance lookups succeeded for {}, keeping current best comment", contract);
            return Ok(Outcome::Unchanged);
        };

        let best = BestComment {
            content: best.content.clone(),
            wallet_address: best.wallet_address.clone(),
        };
        let updated = self
            .metadata
            .set_best_comment(&contract, &best)
            .await
            .map_err(ReconcileError::store("set best comment", &contract))?;
        if !updated {
            return Ok(Outcome::MissingRecord);
        }

        debug!("Best comment for {} is from {}", contract, best.wallet_address);
        Ok(Outcome::Applied)
    }
}
