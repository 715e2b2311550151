//! Projects sale lifecycle events onto the metadata aggregate.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::db::models::{ContractMetadata, VolumeAggregate};
use crate::db::store::{MetadataStore, VolumeStore};

use super::error::{canonical, Outcome, ReconcileError};

pub struct MetadataProjector {
    metadata: Arc<dyn MetadataStore>,
    volume: Arc<dyn VolumeStore>,
}

impl MetadataProjector {
    pub fn new(metadata: Arc<dyn MetadataStore>, volume: Arc<dyn VolumeStore>) -> Self {
        Self { metadata, volume }
    }

    /// Create the metadata record (and an empty volume aggregate) for a new
    /// sale. A second `SaleCreated` for the same address changes nothing.
    pub async fn on_sale_created(
        &self,
        address: &str,
        timestamp_ms: i64,
        name: &str,
        description: &str,
        logo_url: &str,
    ) -> Result<Outcome, ReconcileError> {
        let address = canonical(address)?;

        let existing = self
            .metadata
            .get_metadata(&address)
            .await
            .map_err(ReconcileError::store("read metadata", &address))?;
        if existing.is_some() {
            // An earlier delivery may have failed between the two inserts.
            if self.ensure_volume(&address).await? {
                warn!("Restored missing volume aggregate for {}", address);
                return Ok(Outcome::Applied);
            }
            debug!("SaleCreated for {} already projected, skipping", address);
            return Ok(Outcome::Unchanged);
        }

        let record = ContractMetadata::new(
            address.clone(),
            name.to_string(),
            description.to_string(),
            logo_url.to_string(),
            timestamp_ms,
        );
        let inserted = self
            .metadata
            .insert_metadata_if_absent(&record)
            .await
            .map_err(ReconcileError::store("insert metadata", &address))?;
        if !inserted {
            return Ok(Outcome::Unchanged);
        }

        self.ensure_volume(&address).await?;

        info!("Sale {} created ({:?})", address, name);
        Ok(Outcome::Applied)
    }

    /// Insert the empty volume aggregate unless one exists. A buy may have
    /// been indexed first and created it lazily. Returns whether it inserted.
    async fn ensure_volume(&self, address: &str) -> Result<bool, ReconcileError> {
        self.volume
            .insert_volume_if_absent(&VolumeAggregate::empty(address.to_string()))
            .await
            .map_err(ReconcileError::store("insert volume", address))
    }

    pub async fn on_sale_launched(&self, address: &str) -> Result<Outcome, ReconcileError> {
        let address = canonical(address)?;

        let updated = self
            .metadata
            .set_launched(&address)
            .await
            .map_err(ReconcileError::store("set launched", &address))?;
        if !updated {
            warn!("SaleLaunched for unknown sale {}, ignoring", address);
            return Ok(Outcome::MissingRecord);
        }

        info!("Sale {} launched", address);
        Ok(Outcome::Applied)
    }

    pub async fn on_meta_updated(
        &self,
        address: &str,
        logo_url: &str,
        description: &str,
    ) -> Result<Outcome, ReconcileError> {
        let address = canonical(address)?;

        let updated = self
            .metadata
            .update_meta(&address, logo_url, description)
            .await
            .map_err(ReconcileError::store("update meta", &address))?;
        if !updated {
            warn!("MetaUpdated for unknown sale {}, ignoring", address);
            return Ok(Outcome::MissingRecord);
        }

        Ok(Outcome::Applied)
    }

    /// Claims are not persisted yet; logged so the hook is visible.
    pub async fn on_claimed(
        &self,
        address: &str,
        claimant: &str,
    ) -> Result<Outcome, ReconcileError> {
        let address = canonical(address)?;
        info!("Claim on sale {} by {}", address, claimant);
        Ok(Outcome::Unchanged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MemoryStore, SALE_A};

    fn projector(store: &Arc<MemoryStore>) -> MetadataProjector {
        MetadataProjector::new(store.clone(), store.clone())
    }

    #[tokio::test]
    async fn test_sale_created_inserts_unlaunched_record_and_empty_volume() {
        let store = Arc::new(MemoryStore::new());
        let outcome = projector(&store)
            .on_sale_created(SALE_A, 1_700_000_000_000, "Pizza", "hot", "ipfs://logo")
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Applied);
        let record = store.metadata_of(SALE_A).unwrap();
        assert_eq!(record.title, "Pizza");
        assert_eq!(record.image_url, "ipfs://logo");
        assert_eq!(record.created_at_ms, 1_700_000_000_000);
        assert!(!record.is_launched);
        assert!(record.best_comment.is_none());

        let volume = store.volume_of(SALE_A).unwrap();
        assert!(volume.history.is_empty());
        assert_eq!(volume.current_volume, 0.0);
    }

    #[tokio::test]
    async fn test_sale_created_twice_keeps_one_record() {
        let store = Arc::new(MemoryStore::new());
        let projector = projector(&store);

        projector
            .on_sale_created(SALE_A, 1, "First", "a", "x")
            .await
            .unwrap();
        let second = projector
            .on_sale_created(SALE_A, 2, "Second", "b", "y")
            .await
            .unwrap();

        assert_eq!(second, Outcome::Unchanged);
        assert_eq!(store.metadata.lock().unwrap().len(), 1);
        assert_eq!(store.metadata_of(SALE_A).unwrap().title, "First");
        assert_eq!(store.metadata_writes(), 1);
    }

    #[tokio::test]
    async fn test_sale_created_with_mixed_case_address_uses_canonical_key() {
        let store = Arc::new(MemoryStore::new());
        let projector = projector(&store);
        let mixed = "0xAbCdEf0000000000000000000000000000000001";
        let lower = "0xabcdef0000000000000000000000000000000001";

        projector.on_sale_created(mixed, 1, "A", "", "").await.unwrap();
        projector.on_sale_created(lower, 1, "A", "", "").await.unwrap();

        assert!(store.metadata_of(lower).is_some());
        assert_eq!(store.metadata.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sale_created_keeps_lazily_created_volume() {
        let store = Arc::new(MemoryStore::new());
        store.put_volume(VolumeAggregate::with_first_sample(
            SALE_A.to_string(),
            crate::db::models::Sample::new(5, 2.0),
        ));

        projector(&store)
            .on_sale_created(SALE_A, 1, "A", "", "")
            .await
            .unwrap();

        let volume = store.volume_of(SALE_A).unwrap();
        assert_eq!(volume.history.len(), 1);
        assert_eq!(volume.current_volume, 2.0);
    }

    #[tokio::test]
    async fn test_redelivered_sale_created_restores_volume_after_failed_insert() {
        let store = Arc::new(MemoryStore::new());
        let projector = projector(&store);
        store.fail_next_volume_inserts(1);

        let first = projector.on_sale_created(SALE_A, 1, "A", "", "").await;
        assert!(matches!(first, Err(ReconcileError::Store { .. })));
        assert!(store.metadata_of(SALE_A).is_some());
        assert!(store.volume_of(SALE_A).is_none());

        let redelivered = projector
            .on_sale_created(SALE_A, 1, "A", "", "")
            .await
            .unwrap();

        assert_eq!(redelivered, Outcome::Applied);
        let volume = store.volume_of(SALE_A).unwrap();
        assert!(volume.history.is_empty());
        assert_eq!(volume.current_volume, 0.0);
        assert_eq!(store.metadata_writes(), 1);
    }

    #[tokio::test]
    async fn test_launch_is_monotonic_and_missing_is_benign() {
        let store = Arc::new(MemoryStore::new());
        let projector = projector(&store);

        assert_eq!(
            projector.on_sale_launched(SALE_A).await.unwrap(),
            Outcome::MissingRecord
        );

        projector.on_sale_created(SALE_A, 1, "A", "", "").await.unwrap();
        projector.on_sale_launched(SALE_A).await.unwrap();
        projector.on_sale_launched(SALE_A).await.unwrap();
        assert!(store.metadata_of(SALE_A).unwrap().is_launched);
    }

    #[tokio::test]
    async fn test_meta_updated_overwrites_logo_and_description() {
        let store = Arc::new(MemoryStore::new());
        let projector = projector(&store);
        projector
            .on_sale_created(SALE_A, 1, "A", "old", "old.png")
            .await
            .unwrap();

        let outcome = projector
            .on_meta_updated(SALE_A, "new.png", "new")
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Applied);
        let record = store.metadata_of(SALE_A).unwrap();
        assert_eq!(record.image_url, "new.png");
        assert_eq!(record.description, "new");
        assert_eq!(record.title, "A");
    }

    #[tokio::test]
    async fn test_claimed_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let outcome = projector(&store)
            .on_claimed(SALE_A, "0xabc")
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Unchanged);
        assert_eq!(store.metadata_writes(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_reported_with_address() {
        let store = Arc::new(MemoryStore::new());
        store.set_failing(true);

        let err = projector(&store)
            .on_sale_created(SALE_A, 1, "A", "", "")
            .await
            .unwrap_err();

        match err {
            ReconcileError::Store { address, .. } => assert_eq!(address, SALE_A),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_address_rejected() {
        let store = Arc::new(MemoryStore::new());
        let err = projector(&store)
            .on_sale_launched("0x12")
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidAddress(_)));
    }
}
