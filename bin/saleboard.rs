use std::sync::Arc;

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use saleboard::{
    cron::jobs::CommentWatcher,
    db::{CommentStore, MetadataStore, VolumeStore},
    reconciler::{BalanceOracle, BestCommentRanker, RepairTrigger},
    CronScheduler, CronSettings, Database, EventDispatcher, HistoryRepairer, Reconciler,
    SaleBalanceOracle, SaleWorker, Settings,
};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .context("Failed to initialize logger")?;

    // Load configuration
    let settings = Arc::new(
        Settings::new()
            .context("Failed to load config.yaml. Please ensure it exists and is valid")?
            .validate()
            .context("Invalid configuration")?,
    );

    let db = Arc::new(
        Database::new(settings.clone())
            .await
            .context("Failed to initialize database connection")?,
    );

    run_indexer(settings, db).await
}

async fn run_indexer(settings: Arc<Settings>, db: Arc<Database>) -> anyhow::Result<()> {
    let cancellation_token = CancellationToken::new();
    let reconciler_settings = &settings.reconciler;

    // Every aggregate lives in PostgreSQL; the reconcilers only see the traits.
    let metadata_store: Arc<dyn MetadataStore> = db.postgres.clone();
    let volume_store: Arc<dyn VolumeStore> = db.postgres.clone();
    let comment_store: Arc<dyn CommentStore> = db.postgres.clone();

    let oracle: Arc<dyn BalanceOracle> = Arc::new(SaleBalanceOracle::new(
        &settings.indexer.rpc_url,
        reconciler_settings.balance_cache_ttl_secs,
    )?);

    let trigger = Arc::new(RepairTrigger::new(reconciler_settings.repair_every_n_updates));
    let repairer = Arc::new(HistoryRepairer::new(volume_store.clone()));
    let ranker = Arc::new(BestCommentRanker::new(
        metadata_store.clone(),
        comment_store.clone(),
        oracle,
    ));

    let reconciler = Arc::new(Reconciler::new(metadata_store, volume_store, trigger.clone()));
    let dispatcher = Arc::new(EventDispatcher::spawn(
        reconciler,
        reconciler_settings.shard_count,
        reconciler_settings.shard_queue_capacity,
    ));

    let worker = SaleWorker::new(&settings.indexer, db.clone(), dispatcher.clone())?;
    let worker_token = cancellation_token.child_token();
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker.run(worker_token).await {
            error!("Sale worker failed: {:#}", e);
        }
    });

    info!("Sale worker started for chain {}", settings.indexer.chain_id);

    let comment_watcher = Arc::new(CommentWatcher::new(
        db.clone(),
        comment_store,
        ranker,
        reconciler_settings.comment_batch_size,
    ));
    let cron_scheduler = CronScheduler::new(
        db.clone(),
        repairer,
        trigger,
        comment_watcher,
        CronSettings::from(reconciler_settings),
    );

    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron_scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {:#}", e);
        }
    });

    info!("Cron scheduler started - history repair and comment ranking will run periodically");

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Indexer running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
            _ = cancellation_token.cancelled() => {},
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    info!("Finishing all tasks...");

    cancellation_token.cancel();

    info!("Waiting for sale worker to stop...");
    let _ = worker_handle.await;

    info!("Waiting for cron scheduler to stop...");
    let _ = cron_handle.await;

    // Apply whatever the worker already queued before exiting.
    info!("Draining event dispatcher...");
    if let Err(e) = dispatcher.shutdown().await {
        error!("Event dispatcher did not stop cleanly: {:#}", e);
    }

    info!("All tasks stopped");
    Ok(())
}
