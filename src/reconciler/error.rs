//! Result types for reconciler operations.
//!
//! Every unit of work (one event, one address's repair, one contract's
//! ranking) returns `Result<Outcome, ReconcileError>`. Callers log failures
//! and move on to the next unit; nothing here is retried automatically.

use thiserror::Error;

/// What a successful operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// State was written.
    Applied,
    /// Nothing to do: duplicate create, already-canonical history, no comments.
    Unchanged,
    /// The referenced aggregate does not exist; benign, logged by the caller.
    MissingRecord,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Store read or write failed.
    #[error("store {op} failed for {address}: {cause:#}")]
    Store {
        op: &'static str,
        address: String,
        cause: anyhow::Error,
    },

    /// On-chain balance lookup failed.
    #[error("balance lookup failed for wallet {wallet} on {contract}: {cause:#}")]
    BalanceLookup {
        contract: String,
        wallet: String,
        cause: anyhow::Error,
    },

    /// Input address is not a 20-byte hex address.
    #[error("invalid contract address {0:?}")]
    InvalidAddress(String),

    /// A compare-and-swap write lost to a concurrent writer.
    #[error("concurrent write to {address}: revision {expected_revision} is stale")]
    Conflict {
        address: String,
        expected_revision: i64,
    },
}

impl ReconcileError {
    /// Adapter for `map_err` on store calls.
    pub(crate) fn store(op: &'static str, address: &str) -> impl FnOnce(anyhow::Error) -> Self {
        let address = address.to_string();
        move |cause| Self::Store { op, address, cause }
    }
}

/// Canonicalize an entry-point address or fail with [`ReconcileError::InvalidAddress`].
pub(crate) fn canonical(address: &str) -> Result<String, ReconcileError> {
    crate::utils::canonical_address(address)
        .ok_or_else(|| ReconcileError::InvalidAddress(address.to_string()))
}
