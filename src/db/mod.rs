use std::sync::Arc;

use log::info;

use crate::config::Settings;

pub mod models;
pub mod postgres;
pub mod store;

pub use postgres::PostgresClient;
pub use store::{CommentStore, MetadataStore, VolumeStore};

/// Database handle shared by the worker, the reconcilers and cron jobs.
///
/// PostgreSQL holds the aggregates (metadata, volume), the comments written
/// by the API, and the indexer's checkpoints.
#[derive(Clone)]
pub struct Database {
    pub postgres: Arc<PostgresClient>,
}

impl Database {
    pub async fn new(settings: Arc<Settings>) -> anyhow::Result<Self> {
        let postgres = PostgresClient::new(settings.postgres.clone()).await?;

        postgres.migrate().await?;
        postgres.health_check().await?;

        info!("Database ready");

        Ok(Self {
            postgres: Arc::new(postgres),
        })
    }
}
