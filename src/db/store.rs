//! Aggregate store seams.
//!
//! The reconciler only talks to storage through these traits, keyed by
//! canonical contract address. PostgreSQL implements them in
//! [`crate::db::postgres`]; tests use in-memory doubles.

use async_trait::async_trait;

use crate::db::models::{
    BestComment, CommentRecord, ContractMetadata, RawSample, Sample, VolumeAggregate,
};

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_metadata(&self, address: &str) -> anyhow::Result<Option<ContractMetadata>>;

    /// Insert unless a record already exists. Returns whether a row was inserted.
    async fn insert_metadata_if_absent(&self, metadata: &ContractMetadata) -> anyhow::Result<bool>;

    /// Returns false if no record exists for `address`.
    async fn set_launched(&self, address: &str) -> anyhow::Result<bool>;

    /// Returns false if no record exists for `address`.
    async fn update_meta(
        &self,
        address: &str,
        image_url: &str,
        description: &str,
    ) -> anyhow::Result<bool>;

    /// Returns false if no record exists for `address`.
    async fn set_best_comment(&self, address: &str, best: &BestComment) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait VolumeStore: Send + Sync {
    async fn get_volume(&self, address: &str) -> anyhow::Result<Option<VolumeAggregate>>;

    /// Addresses of every volume aggregate, for full sweeps.
    async fn list_volume_addresses(&self) -> anyhow::Result<Vec<String>>;

    /// Insert unless a record already exists. Returns whether a row was inserted.
    async fn insert_volume_if_absent(&self, aggregate: &VolumeAggregate) -> anyhow::Result<bool>;

    /// Unconditionally replace history and current volume.
    async fn update_volume(
        &self,
        address: &str,
        history: &[RawSample],
        current_volume: f64,
    ) -> anyhow::Result<()>;

    /// Replace history and current volume only if the stored revision is
    /// still `expected_revision`. Returns whether the write happened.
    async fn compare_and_set_volume(
        &self,
        address: &str,
        expected_revision: i64,
        history: &[Sample],
        current_volume: f64,
    ) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait CommentStore: Send + Sync {
    /// All comments on a contract, newest first.
    async fn list_comments(&self, contract_address: &str) -> anyhow::Result<Vec<CommentRecord>>;

    /// Comments with `id > after_id` in id order, at most `limit`.
    async fn comments_after(&self, after_id: i64, limit: i64)
        -> anyhow::Result<Vec<CommentRecord>>;
}
