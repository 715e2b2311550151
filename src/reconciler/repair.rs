//! History repair (compaction) pass.
//!
//! The live path only ever appends, so histories accumulate malformed entries
//! from older writers, out-of-order samples and unbounded length. A sweep
//! re-validates every history, sorts it, applies the retention policy and
//! recomputes the current volume, writing back only what actually changed.
//!
//! Writes go through a compare-and-swap on the aggregate's revision: a sweep
//! that races a live append loses and leaves the append in place.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::{Mutex, Notify};

use crate::db::models::{RawSample, Sample};
use crate::db::store::VolumeStore;

use super::error::{canonical, Outcome, ReconcileError};

/// Number of samples a history is meant to keep.
pub const RETENTION_WINDOW: usize = 4;

/// How far back the retained suffix starts once the window is exceeded.
/// Histories therefore keep up to 7 samples, not `RETENTION_WINDOW`.
const RETENTION_LOOKBACK: usize = 7;

/// First index of the retained suffix for a history of `len` valid samples.
pub fn retention_start(len: usize) -> usize {
    if len > RETENTION_WINDOW {
        len.saturating_sub(RETENTION_LOOKBACK)
    } else {
        0
    }
}

/// Validate, order and bound a stored history.
///
/// Entries rejected by [`Sample::from_raw`] are dropped silently; the
/// survivors are sorted by time (stable) and cut to the retained suffix.
pub fn repair_history(raw: &[RawSample]) -> Vec<Sample> {
    let mut samples: Vec<Sample> = raw.iter().filter_map(Sample::from_raw).collect();
    samples.sort_by_key(|s| s.time);
    let start = retention_start(samples.len());
    samples.split_off(start)
}

/// Volume of the last retained sample, or 0 for an empty history.
pub fn current_volume_of(samples: &[Sample]) -> f64 {
    samples.last().map_or(0.0, |s| s.volume)
}

/// Whether `repaired` is structurally the same document as `raw`.
fn is_unchanged(raw: &[RawSample], repaired: &[Sample]) -> bool {
    raw.len() == repaired.len()
        && raw
            .iter()
            .zip(repaired)
            .all(|(stored, sample)| *stored == RawSample::from(sample))
}

/// Tally of one full sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RepairReport {
    pub scanned: usize,
    pub repaired: usize,
    pub unchanged: usize,
    /// Lost a compare-and-swap to a live write; retried next sweep.
    pub conflicts: usize,
    pub failed: usize,
}

pub struct HistoryRepairer {
    store: Arc<dyn VolumeStore>,
    sweep_lock: Mutex<()>,
}

impl HistoryRepairer {
    pub fn new(store: Arc<dyn VolumeStore>) -> Self {
        Self {
            store,
            sweep_lock: Mutex::new(()),
        }
    }

    /// Repair every volume aggregate.
    ///
    /// Returns `Ok(None)` without doing anything when another sweep is still
    /// running. Failures on one address are logged and counted; only failing
    /// to list the aggregates aborts the sweep.
    pub async fn repair_all(&self) -> Result<Option<RepairReport>, ReconcileError> {
        let Ok(_guard) = self.sweep_lock.try_lock() else {
            debug!("History repair already running, skipping");
            return Ok(None);
        };

        let start = Instant::now();
        let addresses = self
            .store
            .list_volume_addresses()
            .await
            .map_err(ReconcileError::store("list volume", "*"))?;

        let mut report = RepairReport::default();
        for address in &addresses {
            report.scanned += 1;
            match self.repair_address(address).await {
                Ok(Outcome::Applied) => report.repaired += 1,
                Ok(Outcome::Unchanged) | Ok(Outcome::MissingRecord) => report.unchanged += 1,
                Err(ReconcileError::Conflict { .. }) => {
                    debug!(
                        "History of {} changed during repair, leaving it for next sweep",
                        address
                    );
                    report.conflicts += 1;
                },
                Err(e) => {
                    warn!("Failed to repair history of {}: {}", address, e);
                    report.failed += 1;
                },
            }
        }

        info!(
            "History repair finished in {:?}: {} scanned, {} repaired, {} unchanged, {} conflicts, {} failed",
            start.elapsed(),
            report.scanned,
            report.repaired,
            report.unchanged,
            report.conflicts,
            report.failed
        );
        Ok(Some(report))
    }

    /// Repair one aggregate, writing only if the history changed.
    pub async fn repair_address(&self, address: &str) -> Result<Outcome, ReconcileError> {
        let address = canonical(address)?;

        let Some(aggregate) = self
            .store
            .get_volume(&address)
            .await
            .map_err(ReconcileError::store("read volume", &address))?
        else {
            return Ok(Outcome::MissingRecord);
        };

        let repaired = repair_history(&aggregate.history);
        if is_unchanged(&aggregate.history, &repaired) {
            return Ok(Outcome::Unchanged);
        }

        let current_volume = current_volume_of(&repaired);
        let written = self
            .store
            .compare_and_set_volume(&address, aggregate.revision, &repaired, current_volume)
            .await
            .map_err(ReconcileError::store("write volume", &address))?;
        if !written {
            return Err(ReconcileError::Conflict {
                address,
                expected_revision: aggregate.revision,
            });
        }

        debug!(
            "Repaired history of {}: {} -> {} samples, volume {}",
            address,
            aggregate.history.len(),
            repaired.len(),
            current_volume
        );
        Ok(Outcome::Applied)
    }
}

/// Requests an extra sweep after every `every_n_updates` live volume writes.
pub struct RepairTrigger {
    every_n_updates: u64,
    updates: AtomicU64,
    notify: Notify,
}

impl RepairTrigger {
    /// `every_n_updates == 0` disables update-driven sweeps.
    pub fn new(every_n_updates: u64) -> Self {
        Self {
            every_n_updates,
            updates: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    pub fn record_update(&self) {
        if self.every_n_updates == 0 {
            return;
        }
        let n = self.updates.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.every_n_updates == 0 {
            self.notify.notify_one();
        }
    }

    /// Resolves once the update threshold has been crossed since the last call.
    pub async fn triggered(&self) {
        self.notify.notified().await;
    }
}
