use async_trait::async_trait;
use log::error;
use serde_json::Value;
use tokio_postgres::types::Json;

use crate::db::models::{
    BestComment, CommentRecord, ContractMetadata, RawSample, Sample, SyncCheckpoint,
    VolumeAggregate,
};
use crate::db::postgres::PostgresClient;
use crate::db::store::{CommentStore, MetadataStore, VolumeStore};

/// Sanitize a string for PostgreSQL by removing null bytes (0x00)
/// which are invalid in UTF-8 text columns
fn sanitize_string(s: &str) -> String {
    s.replace('\0', "")
}

// ==================== CONTRACT METADATA ====================

#[async_trait]
impl MetadataStore for PostgresClient {
    async fn get_metadata(&self, address: &str) -> anyhow::Result<Option<ContractMetadata>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT address, title, description, image_url, created_at_ms, is_launched, best_comment
            FROM saleboard.contract_metadata
            WHERE address = $1
        "#;

        let row = client.query_opt(query, &[&address]).await?;
        Ok(row.as_ref().map(row_to_metadata))
    }

    async fn insert_metadata_if_absent(&self, metadata: &ContractMetadata) -> anyhow::Result<bool> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO saleboard.contract_metadata (
                address, title, description, image_url, created_at_ms, is_launched, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (address) DO NOTHING
        "#;

        let inserted = client
            .execute(
                query,
                &[
                    &metadata.address,
                    &sanitize_string(&metadata.title),
                    &sanitize_string(&metadata.description),
                    &sanitize_string(&metadata.image_url),
                    &metadata.created_at_ms,
                    &metadata.is_launched,
                ],
            )
            .await
            .map_err(|e| {
                error!("Failed to insert metadata for {}: {:?}", metadata.address, e);
                e
            })?;

        Ok(inserted > 0)
    }

    async fn set_launched(&self, address: &str) -> anyhow::Result<bool> {
        let client = self.pool.get().await?;
        let query = r#"
            UPDATE saleboard.contract_metadata
            SET is_launched = TRUE, updated_at = NOW()
            WHERE address = $1
        "#;

        let updated = client.execute(query, &[&address]).await?;
        Ok(updated > 0)
    }

    async fn update_meta(
        &self,
        address: &str,
        image_url: &str,
        description: &str,
    ) -> anyhow::Result<bool> {
        let client = self.pool.get().await?;
        let query = r#"
            UPDATE saleboard.contract_metadata
            SET image_url = $2, description = $3, updated_at = NOW()
            WHERE address = $1
        "#;

        let updated = client
            .execute(
                query,
                &[&address, &sanitize_string(image_url), &sanitize_string(description)],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn set_best_comment(&self, address: &str, best: &BestComment) -> anyhow::Result<bool> {
        let client = self.pool.get().await?;
        let query = r#"
            UPDATE saleboard.contract_metadata
            SET best_comment = $2, updated_at = NOW()
            WHERE address = $1
        "#;

        let updated = client.execute(query, &[&address, &Json(best)]).await?;
        Ok(updated > 0)
    }
}

// ==================== VOLUME ====================

#[async_trait]
impl VolumeStore for PostgresClient {
    async fn get_volume(&self, address: &str) -> anyhow::Result<Option<VolumeAggregate>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT address, current_volume, history, revision
            FROM saleboard.volume
            WHERE address = $1
        "#;

        let row = client.query_opt(query, &[&address]).await?;
        Ok(row.as_ref().map(row_to_volume))
    }

    async fn list_volume_addresses(&self) -> anyhow::Result<Vec<String>> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT address FROM saleboard.volume ORDER BY address", &[])
            .await?;
        Ok(rows.iter().map(|row| row.get("address")).collect())
    }

    async fn insert_volume_if_absent(&self, aggregate: &VolumeAggregate) -> anyhow::Result<bool> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO saleboard.volume (address, current_volume, history, revision, updated_at)
            VALUES ($1, $2, $3, 0, NOW())
            ON CONFLICT (address) DO NOTHING
        "#;

        let inserted = client
            .execute(
                query,
                &[
                    &aggregate.address,
                    &aggregate.current_volume,
                    &Json(&aggregate.history),
                ],
            )
            .await
            .map_err(|e| {
                error!("Failed to insert volume for {}: {:?}", aggregate.address, e);
                e
            })?;

        Ok(inserted > 0)
    }

    async fn update_volume(
        &self,
        address: &str,
        history: &[RawSample],
        current_volume: f64,
    ) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            UPDATE saleboard.volume
            SET history = $2, current_volume = $3, revision = revision + 1, updated_at = NOW()
            WHERE address = $1
        "#;

        client
            .execute(query, &[&address, &Json(history), &current_volume])
            .await
            .map_err(|e| {
                error!("Failed to update volume for {}: {:?}", address, e);
                e
            })?;

        Ok(())
    }

    async fn compare_and_set_volume(
        &self,
        address: &str,
        expected_revision: i64,
        history: &[Sample],
        current_volume: f64,
    ) -> anyhow::Result<bool> {
        let client = self.pool.get().await?;
        let query = r#"
            UPDATE saleboard.volume
            SET history = $2, current_volume = $3, revision = revision + 1, updated_at = NOW()
            WHERE address = $1 AND revision = $4
        "#;

        let updated = client
            .execute(
                query,
                &[&address, &Json(history), &current_volume, &expected_revision],
            )
            .await?;

        Ok(updated > 0)
    }
}

// ==================== COMMENTS ====================

#[async_trait]
impl CommentStore for PostgresClient {
    async fn list_comments(&self, contract_address: &str) -> anyhow::Result<Vec<CommentRecord>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT id, contract_address, wallet_address, content, created_at
            FROM saleboard.comments
            WHERE lower(contract_address) = $1
            ORDER BY created_at DESC, id DESC
        "#;

        let rows = client.query(query, &[&contract_address]).await?;
        Ok(rows.iter().map(row_to_comment).collect())
    }

    async fn comments_after(
        &self,
        after_id: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<CommentRecord>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT id, contract_address, wallet_address, content, created_at
            FROM saleboard.comments
            WHERE id > $1
            ORDER BY id
            LIMIT $2
        "#;

        let rows = client.query(query, &[&after_id, &limit]).await?;
        Ok(rows.iter().map(row_to_comment).collect())
    }
}

impl PostgresClient {
    // ==================== SYNC CHECKPOINT ====================

    /// Get sync checkpoint for a chain
    pub async fn get_sync_checkpoint(
        &self,
        chain_id: i64,
    ) -> anyhow::Result<Option<SyncCheckpoint>> {
        let client = self.pool.get().await?;
        let query = "SELECT chain_id, last_indexed_block, updated_at FROM saleboard.sync_checkpoints WHERE chain_id = $1";

        let row = client.query_opt(query, &[&chain_id]).await?;

        Ok(row.map(|r| {
            let block: i64 = r.get("last_indexed_block");
            SyncCheckpoint {
                chain_id: r.get("chain_id"),
                last_indexed_block: block.max(0) as u64,
                updated_at: r.get("updated_at"),
            }
        }))
    }

    /// Set sync checkpoint for a chain
    pub async fn set_sync_checkpoint(&self, checkpoint: &SyncCheckpoint) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO saleboard.sync_checkpoints (chain_id, last_indexed_block, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (chain_id) DO UPDATE SET
                last_indexed_block = EXCLUDED.last_indexed_block,
                updated_at = EXCLUDED.updated_at
        "#;

        let block = checkpoint.last_indexed_block as i64;
        client
            .execute(
                query,
                &[&checkpoint.chain_id, &block, &checkpoint.updated_at],
            )
            .await
            .map_err(|e| {
                error!(
                    "Failed to insert sync checkpoint for chain {}: {:?}",
                    checkpoint.chain_id, e
                );
                e
            })?;

        Ok(())
    }

    // ==================== CRON CHECKPOINTS ====================

    /// Get last run timestamp for a cron job
    pub async fn get_cron_checkpoint(
        &self,
        job_name: &str,
    ) -> anyhow::Result<Option<time::OffsetDateTime>> {
        let client = self.pool.get().await?;
        let query = "SELECT last_run_at FROM saleboard.cron_checkpoints WHERE job_name = $1";

        let row = client.query_opt(query, &[&job_name]).await?;

        if let Some(row) = row {
            let last_run_at: Option<chrono::DateTime<chrono::Utc>> = row.get("last_run_at");

            if let Some(last_run) = last_run_at {
                let ts = time::OffsetDateTime::from_unix_timestamp(last_run.timestamp())?
                    .replace_nanosecond(last_run.timestamp_subsec_nanos())?;
                return Ok(Some(ts));
            }
        }

        Ok(None)
    }

    /// Set last run timestamp for a cron job
    pub async fn set_cron_checkpoint(
        &self,
        job_name: &str,
        last_run_at: time::OffsetDateTime,
    ) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO saleboard.cron_checkpoints (job_name, last_run_at, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (job_name) DO UPDATE SET
                last_run_at = EXCLUDED.last_run_at,
                updated_at = NOW()
        "#;

        let last_run_chrono = chrono::DateTime::<chrono::Utc>::from_timestamp(
            last_run_at.unix_timestamp(),
            last_run_at.nanosecond(),
        )
        .unwrap_or_default();

        client
            .execute(query, &[&job_name, &last_run_chrono])
            .await
            .map_err(|e| {
                error!(
                    "Failed to update checkpoint for cron job {}: {:?}",
                    job_name, e
                );
                e
            })?;

        Ok(())
    }

    // ==================== STREAM CURSORS ====================

    /// Get the last consumed position of a polled stream (0 if never consumed)
    pub async fn get_stream_cursor(&self, name: &str) -> anyhow::Result<i64> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT position FROM saleboard.stream_cursors WHERE name = $1",
                &[&name],
            )
            .await?;
        Ok(row.map(|r| r.get("position")).unwrap_or(0))
    }

    pub async fn set_stream_cursor(&self, name: &str, position: i64) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO saleboard.stream_cursors (name, position, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (name) DO UPDATE SET
                position = EXCLUDED.position,
                updated_at = NOW()
        "#;

        client.execute(query, &[&name, &position]).await?;
        Ok(())
    }
}

// ==================== HELPER FUNCTIONS ====================

fn row_to_metadata(row: &tokio_postgres::Row) -> ContractMetadata {
    let address: String = row.get("address");
    // A malformed stored projection is treated as absent; the next ranking replaces it.
    let best_comment: Option<Value> = row.get("best_comment");
    ContractMetadata {
        address: address.to_lowercase(),
        title: row.get("title"),
        description: row.get("description"),
        image_url: row.get("image_url"),
        created_at_ms: row.get("created_at_ms"),
        is_launched: row.get("is_launched"),
        best_comment: best_comment.and_then(|v| serde_json::from_value::<BestComment>(v).ok()),
    }
}

fn row_to_volume(row: &tokio_postgres::Row) -> VolumeAggregate {
    let address: String = row.get("address");
    let history: Value = row.get("history");
    VolumeAggregate {
        address: address.to_lowercase(),
        current_volume: row.get("current_volume"),
        history: decode_history(history),
        revision: row.get("revision"),
    }
}

fn row_to_comment(row: &tokio_postgres::Row) -> CommentRecord {
    CommentRecord {
        id: row.get("id"),
        contract_address: row.get("contract_address"),
        wallet_address: row.get("wallet_address"),
        content: row.get("content"),
        created_at: row.get("created_at"),
    }
}

/// Decode a stored history document without ever failing.
///
/// A document that is not an array at all becomes a single all-null entry so
/// the repair pass sees a change and rewrites it.
fn decode_history(value: Value) -> Vec<RawSample> {
    match value {
        Value::Array(items) => items.into_iter().map(RawSample::from_json).collect(),
        Value::Null => Vec::new(),
        _ => vec![RawSample::default()],
    }
}
