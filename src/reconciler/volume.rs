//! Append path for buy/sell events.
//!
//! Every trade records the sale's new cumulative raised total as a sample at
//! the end of the history. The retention window is NOT applied here; the
//! history grows until the repair pass compacts it.

use std::sync::Arc;

use alloy::primitives::U256;
use anyhow::anyhow;
use log::debug;

use crate::db::models::{RawSample, Sample, VolumeAggregate};
use crate::db::store::VolumeStore;
use crate::utils::wei_to_volume;

use super::error::{canonical, Outcome, ReconcileError};

pub struct VolumeAggregator {
    store: Arc<dyn VolumeStore>,
}

impl VolumeAggregator {
    pub fn new(store: Arc<dyn VolumeStore>) -> Self {
        Self { store }
    }

    /// Record `cumulative_raised` (wei) at `timestamp_ms`.
    ///
    /// Buys and sells are handled identically: the direction is already in
    /// the cumulative total. Duplicate deliveries append duplicate samples.
    pub async fn on_volume_event(
        &self,
        address: &str,
        cumulative_raised: U256,
        timestamp_ms: i64,
    ) -> Result<Outcome, ReconcileError> {
        let address = canonical(address)?;
        let sample = Sample::new(timestamp_ms, wei_to_volume(cumulative_raised));

        let existing = self
            .store
            .get_volume(&address)
            .await
            .map_err(ReconcileError::store("read volume", &address))?;

        let aggregate = match existing {
            Some(aggregate) => aggregate,
            None => {
                let fresh = VolumeAggregate::with_first_sample(address.clone(), sample);
                let inserted = self
                    .store
                    .insert_volume_if_absent(&fresh)
                    .await
                    .map_err(ReconcileError::store("insert volume", &address))?;
                if inserted {
                    debug!("Created volume aggregate for {} at {}", address, sample.volume);
                    return Ok(Outcome::Applied);
                }
                // Someone else created it in between; append to theirs.
                self.store
                    .get_volume(&address)
                    .await
                    .map_err(ReconcileError::store("read volume", &address))?
                    .ok_or_else(|| ReconcileError::Store {
                        op: "read volume",
                        address: address.clone(),
                        cause: anyhow!("aggregate vanished after insert conflict"),
                    })?
            },
        };

        let mut history = aggregate.history;
        history.push(RawSample::from(&sample));

        self.store
            .update_volume(&address, &history, sample.volume)
            .await
            .map_err(ReconcileError::store("update volume", &address))?;

        debug!(
            "Volume for {} now {} ({} samples)",
            address,
            sample.volume,
            history.len()
        );
        Ok(Outcome::Applied)
    }
}
