//! Event routing.
//!
//! Events for the same sale must be applied one at a time and in delivery
//! order, otherwise two appends racing on the same history lose one of them.
//! The dispatcher owns a fixed set of shard tasks and sends every event to
//! the shard picked by hashing its address, so one task owns each address.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::Context;
use log::{debug, info, warn};
use rustc_hash::FxHasher;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::db::store::{MetadataStore, VolumeStore};
use crate::utils::canonical_address;

use super::error::{Outcome, ReconcileError};
use super::event::SaleEvent;
use super::metadata::MetadataProjector;
use super::repair::RepairTrigger;
use super::volume::VolumeAggregator;

/// Applies one event to the aggregates it touches.
pub struct Reconciler {
    metadata: MetadataProjector,
    volume: VolumeAggregator,
    trigger: Arc<RepairTrigger>,
}

impl Reconciler {
    pub fn new(
        metadata_store: Arc<dyn MetadataStore>,
        volume_store: Arc<dyn VolumeStore>,
        trigger: Arc<RepairTrigger>,
    ) -> Self {
        Self {
            metadata: MetadataProjector::new(metadata_store, volume_store.clone()),
            volume: VolumeAggregator::new(volume_store),
            trigger,
        }
    }

    pub async fn apply(&self, event: &SaleEvent) -> Result<Outcome, ReconcileError> {
        match event {
            SaleEvent::SaleCreated {
                address,
                timestamp_ms,
                name,
                description,
                logo_url,
            } => {
                self.metadata
                    .on_sale_created(address, *timestamp_ms, name, description, logo_url)
                    .await
            },
            SaleEvent::SaleLaunched { address } => self.metadata.on_sale_launched(address).await,
            SaleEvent::TokensBought {
                address,
                cumulative_raised,
                timestamp_ms,
            }
            | SaleEvent::TokensSold {
                address,
                cumulative_raised,
                timestamp_ms,
            } => {
                let outcome = self
                    .volume
                    .on_volume_event(address, *cumulative_raised, *timestamp_ms)
                    .await?;
                if outcome == Outcome::Applied {
                    self.trigger.record_update();
                }
                Ok(outcome)
            },
            SaleEvent::MetaUpdated {
                address,
                logo_url,
                description,
            } => {
                self.metadata
                    .on_meta_updated(address, logo_url, description)
                    .await
            },
            SaleEvent::Claimed { address, claimant } => {
                self.metadata.on_claimed(address, claimant).await
            },
        }
    }
}

enum ShardMessage {
    Event(SaleEvent),
    /// Acknowledged once every event queued before it has been applied.
    Flush(oneshot::Sender<()>),
    Shutdown,
}

pub struct EventDispatcher {
    senders: Vec<mpsc::Sender<ShardMessage>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl EventDispatcher {
    /// Spawn `shard_count` shard tasks, each with a queue of `queue_capacity`.
    pub fn spawn(reconciler: Arc<Reconciler>, shard_count: usize, queue_capacity: usize) -> Self {
        let shard_count = shard_count.max(1);
        let mut senders = Vec::with_capacity(shard_count);
        let mut handles = Vec::with_capacity(shard_count);

        for shard in 0..shard_count {
            let (tx, rx) = mpsc::channel(queue_capacity.max(1));
            senders.push(tx);
            handles.push(tokio::spawn(run_shard(shard, reconciler.clone(), rx)));
        }

        info!("Event dispatcher started with {} shards", shard_count);
        Self {
            senders,
            handles: Mutex::new(handles),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.senders.len()
    }

    /// Shard owning `address`.
    ///
    /// Hashes the canonical key, so every spelling the handlers store under
    /// the same key lands on the same shard. Unparseable addresses fall back
    /// to their lowercase form; the handler rejects them anyway.
    pub fn shard_for(&self, address: &str) -> usize {
        let key = canonical_address(address).unwrap_or_else(|| address.to_ascii_lowercase());
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Queue an event on its shard. Waits while the shard's queue is full.
    pub async fn dispatch(&self, event: SaleEvent) -> anyhow::Result<()> {
        let shard = self.shard_for(event.address());
        self.senders[shard]
            .send(ShardMessage::Event(event))
            .await
            .map_err(|_| anyhow::anyhow!("Shard {} is not running", shard))
    }

    /// Wait until every event dispatched so far has been applied.
    pub async fn flush(&self) -> anyhow::Result<()> {
        let mut acks = Vec::with_capacity(self.senders.len());
        for (shard, sender) in self.senders.iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            sender
                .send(ShardMessage::Flush(tx))
                .await
                .map_err(|_| anyhow::anyhow!("Shard {} is not running", shard))?;
            acks.push(rx);
        }
        for (shard, ack) in acks.into_iter().enumerate() {
            ack.await
                .with_context(|| format!("Shard {} stopped before flushing", shard))?;
        }
        Ok(())
    }

    /// Drain every shard and wait for the tasks to exit.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        for sender in &self.senders {
            // A shard that already exited has nothing left to drain.
            let _ = sender.send(ShardMessage::Shutdown).await;
        }
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            handle.await.context("Shard task panicked")?;
        }
        info!("Event dispatcher stopped");
        Ok(())
    }
}

async fn run_shard(
    shard: usize,
    reconciler: Arc<Reconciler>,
    mut rx: mpsc::Receiver<ShardMessage>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            ShardMessage::Event(event) => match reconciler.apply(&event).await {
                Ok(outcome) => debug!(
                    "[shard {}] {} for {}: {:?}",
                    shard,
                    event.kind(),
                    event.address(),
                    outcome
                ),
                Err(e) => warn!(
                    "[shard {}] Failed to apply {} for {}: {}",
                    shard,
                    event.kind(),
                    event.address(),
                    e
                ),
            },
            ShardMessage::Flush(ack) => {
                let _ = ack.send(());
            },
            ShardMessage::Shutdown => break,
        }
    }
    debug!("[shard {}] stopped", shard);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Sample;
    use crate::test_utils::{ether, MemoryStore, SALE_A, SALE_B};
    use alloy::primitives::U256;

    fn reconciler(store: &Arc<MemoryStore>, trigger: Arc<RepairTrigger>) -> Arc<Reconciler> {
        Arc::new(Reconciler::new(store.clone(), store.clone(), trigger))
    }

    fn spawn_idle(store: &Arc<MemoryStore>, shards: usize, capacity: usize) -> EventDispatcher {
        let trigger = Arc::new(RepairTrigger::new(0));
        EventDispatcher::spawn(reconciler(store, trigger), shards, capacity)
    }

    fn created(address: &str) -> SaleEvent {
        SaleEvent::SaleCreated {
            address: address.to_string(),
            timestamp_ms: 1,
            name: "Sale".to_string(),
            description: String::new(),
            logo_url: String::new(),
        }
    }

    fn bought(address: &str, raised: U256, ts: i64) -> SaleEvent {
        SaleEvent::TokensBought {
            address: address.to_string(),
            cumulative_raised: raised,
            timestamp_ms: ts,
        }
    }

    #[tokio::test]
    async fn test_apply_routes_every_kind() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(&store, Arc::new(RepairTrigger::new(0)));

        reconciler.apply(&created(SALE_A)).await.unwrap();
        reconciler
            .apply(&SaleEvent::SaleLaunched {
                address: SALE_A.to_string(),
            })
            .await
            .unwrap();
        reconciler
            .apply(&SaleEvent::MetaUpdated {
                address: SALE_A.to_string(),
                logo_url: "new.png".to_string(),
                description: "new".to_string(),
            })
            .await
            .unwrap();
        reconciler.apply(&bought(SALE_A, ether(2), 10)).await.unwrap();
        reconciler
            .apply(&SaleEvent::TokensSold {
                address: SALE_A.to_string(),
                cumulative_raised: ether(1),
                timestamp_ms: 20,
            })
            .await
            .unwrap();
        let claimed = reconciler
            .apply(&SaleEvent::Claimed {
                address: SALE_A.to_string(),
                claimant: "0xabc".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(claimed, Outcome::Unchanged);
        let metadata = store.metadata_of(SALE_A).unwrap();
        assert!(metadata.is_launched);
        assert_eq!(metadata.image_url, "new.png");
        let volume = store.volume_of(SALE_A).unwrap();
        assert_eq!(volume.history.len(), 2);
        assert_eq!(volume.current_volume, 1.0);
    }

    #[tokio::test]
    async fn test_shard_for_is_stable_and_case_insensitive() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = spawn_idle(&store, 4, 8);

        let mixed = "0xAbCdEf0000000000000000000000000000000001";
        assert_eq!(dispatcher.shard_for(mixed), dispatcher.shard_for(&mixed.to_lowercase()));
        assert_eq!(dispatcher.shard_for(SALE_A), dispatcher.shard_for(SALE_A));
        assert!(dispatcher.shard_for(SALE_B) < dispatcher.shard_count());

        dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_every_spelling_of_an_address_shares_a_shard() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = spawn_idle(&store, 8, 8);

        let bare = SALE_A.trim_start_matches("0x");
        let padded = format!("  {}  ", SALE_A);
        let upper = "0xABCDEF0000000000000000000000000000000001";
        let lower = "0xabcdef0000000000000000000000000000000001";

        let owner = dispatcher.shard_for(SALE_A);
        assert_eq!(dispatcher.shard_for(bare), owner);
        assert_eq!(dispatcher.shard_for(&padded), owner);
        assert_eq!(dispatcher.shard_for(upper), dispatcher.shard_for(lower));

        dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bare_and_prefixed_events_share_one_history() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = spawn_idle(&store, 8, 2);
        let bare = SALE_A.trim_start_matches("0x");

        for i in 1..=20u64 {
            let address = if i % 2 == 0 { SALE_A } else { bare };
            dispatcher.dispatch(bought(address, ether(i), i as i64)).await.unwrap();
        }
        dispatcher.flush().await.unwrap();

        let volume = store.volume_of(SALE_A).unwrap();
        assert_eq!(volume.history.len(), 20);
        assert_eq!(volume.current_volume, 20.0);

        dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_same_address_events_apply_in_order() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = spawn_idle(&store, 4, 2);

        for i in 1..=50u64 {
            dispatcher.dispatch(bought(SALE_A, ether(i), i as i64)).await.unwrap();
            dispatcher.dispatch(bought(SALE_B, ether(i), i as i64)).await.unwrap();
        }
        dispatcher.flush().await.unwrap();

        for address in [SALE_A, SALE_B] {
            let volume = store.volume_of(address).unwrap();
            assert_eq!(volume.history.len(), 50);
            assert_eq!(volume.current_volume, 50.0);
            let times: Vec<i64> = volume
                .history
                .iter()
                .filter_map(Sample::from_raw)
                .map(|s| s.time)
                .collect();
            assert_eq!(times, (1..=50).collect::<Vec<i64>>());
        }

        dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_event_does_not_stop_the_shard() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = spawn_idle(&store, 1, 8);

        dispatcher
            .dispatch(SaleEvent::SaleLaunched {
                address: "not an address".to_string(),
            })
            .await
            .unwrap();
        store.set_failing(true);
        dispatcher.dispatch(bought(SALE_A, ether(1), 1)).await.unwrap();
        dispatcher.flush().await.unwrap();
        store.set_failing(false);
        dispatcher.dispatch(bought(SALE_A, ether(3), 2)).await.unwrap();
        dispatcher.flush().await.unwrap();

        assert_eq!(store.volume_of(SALE_A).unwrap().current_volume, 3.0);
        dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_volume_updates_poke_repair_trigger() {
        let store = Arc::new(MemoryStore::new());
        let trigger = Arc::new(RepairTrigger::new(2));
        let dispatcher = EventDispatcher::spawn(reconciler(&store, trigger.clone()), 2, 8);

        dispatcher.dispatch(bought(SALE_A, ether(1), 1)).await.unwrap();
        dispatcher.dispatch(bought(SALE_B, ether(1), 1)).await.unwrap();
        dispatcher.flush().await.unwrap();

        tokio::time::timeout(std::time::Duration::from_millis(200), trigger.triggered())
            .await
            .expect("two volume updates should request a repair");
        dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_after_shutdown_fails() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = spawn_idle(&store, 2, 8);

        dispatcher.shutdown().await.unwrap();

        assert!(dispatcher.dispatch(created(SALE_A)).await.is_err());
        assert!(dispatcher.flush().await.is_err());
    }
}
