use alloy::primitives::U256;
use anyhow::Context;
use hypersync_client::{
    net_types::{BlockField, LogField, LogFilter, Query},
    Client, ClientConfig, SerializationFormat, StreamConfig,
};
use log::{debug, info, warn};
use rustc_hash::FxHashMap;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::IndexerSettings,
    db::models::SyncCheckpoint,
    reconciler::EventDispatcher,
    worker::parser,
    Database,
};

/// Interval for logging progress updates (10 seconds)
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Timeout for receiving data from HyperSync stream (5 minutes)
/// If no data is received within this time, reconnect the stream
const STREAM_RECV_TIMEOUT: Duration = Duration::from_secs(300);

/// Sale indexer worker.
///
/// Streams factory and sale logs from HyperSync and feeds them to the
/// reconciler:
/// - Decodes logs into sale events
/// - Dispatches them to the per-address shards
/// - Waits for the shards to apply the batch, then advances the checkpoint
pub struct SaleWorker {
    chain_id: i64,
    client: Arc<Client>,
    db: Arc<Database>,
    dispatcher: Arc<EventDispatcher>,
    filters: LogFilter,
    factories: Vec<String>,
    start_block: u64,
    tip_poll_interval: Duration,
}

impl SaleWorker {
    pub fn new(
        settings: &IndexerSettings,
        db: Arc<Database>,
        dispatcher: Arc<EventDispatcher>,
    ) -> anyhow::Result<Self> {
        let url = settings
            .hypersync_url
            .parse()
            .context("Invalid HyperSync URL")?;

        let client_config = ClientConfig {
            serialization_format: SerializationFormat::CapnProto {
                should_cache_queries: false,
            },
            http_req_timeout_millis: 120_000,
            url,
            api_token: settings.hypersync_bearer_token.clone(),
            max_num_retries: 5,
            ..Default::default()
        };

        let client =
            Arc::new(Client::new(client_config).context("Failed to create HyperSync client")?);

        Ok(Self {
            chain_id: settings.chain_id,
            client,
            db,
            dispatcher,
            filters: LogFilter::all().and_topic0(parser::event_signatures().map(|s| s.0))?,
            factories: settings.factories.clone(),
            start_block: settings.start_block,
            tip_poll_interval: Duration::from_millis(settings.tip_poll_interval_milliseconds),
        })
    }

    async fn resume_block(&self) -> u64 {
        let checkpoint = match self.db.postgres.get_sync_checkpoint(self.chain_id).await {
            Ok(checkpoint) => checkpoint.map(|c| c.last_indexed_block).unwrap_or(0),
            Err(e) => {
                warn!(
                    "Failed to fetch last block from postgres: {:?}. Starting from block {}.",
                    e, self.start_block
                );
                0
            },
        };
        checkpoint.max(self.start_block)
    }

    pub async fn run(&self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        let mut last_progress_log = Instant::now();

        loop {
            if cancellation_token.is_cancelled() {
                info!(
                    "Indexer for chain {} received cancellation signal",
                    self.chain_id
                );
                break;
            }

            let mut last_synced_block = self.resume_block().await;

            let query = Query::new()
                .from_block(last_synced_block)
                .where_logs(self.filters.clone())
                .select_block_fields([BlockField::Number, BlockField::Timestamp])
                .select_log_fields([
                    LogField::BlockNumber,
                    LogField::LogIndex,
                    LogField::Address,
                    LogField::Data,
                    LogField::Topic0,
                    LogField::Topic1,
                    LogField::Topic2,
                    LogField::Topic3,
                ]);

            let mut stream = self
                .client
                .stream(query, StreamConfig::default())
                .await
                .context("Failed to open HyperSync stream")?;

            loop {
                let received = tokio::select! {
                    _ = cancellation_token.cancelled() => break,
                    received = tokio::time::timeout(STREAM_RECV_TIMEOUT, stream.recv()) => received,
                };

                let res = match received {
                    Ok(Some(res)) => res.context("Stream error")?,
                    Ok(None) => break,
                    Err(_) => {
                        warn!(
                            "Chain {}: no data for {:?}, reconnecting stream",
                            self.chain_id, STREAM_RECV_TIMEOUT
                        );
                        break;
                    },
                };

                // Get block timestamps for the log batch
                let block_timestamps: FxHashMap<u64, u64> = res
                    .data
                    .blocks
                    .iter()
                    .flatten()
                    .filter_map(|b| {
                        let n = b.number?;
                        let t = U256::from_be_slice(b.timestamp.as_ref()?).to::<u64>();
                        Some((n, t))
                    })
                    .collect();

                let log_count_estimate: usize = res.data.logs.iter().map(Vec::len).sum();

                let parsed = parser::parse_logs(
                    res.data.logs.into_iter().flatten(),
                    &block_timestamps,
                    &self.factories,
                    log_count_estimate,
                );
                if parsed.skipped > 0 {
                    debug!(
                        "Chain {}: skipped {} undecodable or foreign logs",
                        self.chain_id, parsed.skipped
                    );
                }

                let event_count = parsed.events.len();
                for event in parsed.events {
                    self.dispatcher.dispatch(event).await?;
                }

                // Every event of the batch must be applied before the
                // checkpoint moves past it.
                self.dispatcher
                    .flush()
                    .await
                    .context("Failed to flush event dispatcher")?;

                let next_block = res.next_block;
                last_synced_block = next_block;
                let checkpoint = SyncCheckpoint::new(self.chain_id, next_block);

                if let Err(e) = self.db.postgres.set_sync_checkpoint(&checkpoint).await {
                    return Err(anyhow::anyhow!(
                        "Critical: Failed to update checkpoint for chain {}: {:?}. Stopping to prevent data loss.",
                        self.chain_id, e
                    ));
                }

                if last_progress_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                    info!(
                        "Chain {} synced to block {} ({} events in last batch)",
                        self.chain_id, next_block, event_count
                    );
                    last_progress_log = Instant::now();
                }
            }

            if cancellation_token.is_cancelled() {
                continue;
            }

            // HEARTBEAT: refresh the checkpoint timestamp during quiet periods
            let checkpoint = SyncCheckpoint::new(self.chain_id, last_synced_block);
            if let Err(e) = self.db.postgres.set_sync_checkpoint(&checkpoint).await {
                warn!(
                    "Failed to update heartbeat checkpoint for chain {}: {:?}",
                    self.chain_id, e
                );
            }

            tokio::select! {
                _ = cancellation_token.cancelled() => {},
                _ = tokio::time::sleep(self.tip_poll_interval) => {},
            }
        }

        Ok(())
    }
}
