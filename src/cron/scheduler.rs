//! Cron scheduler for periodic background tasks.
//!
//! Runs jobs like:
//! - Repairing volume histories (on an interval and after bursts of updates)
//! - Re-ranking best comments as new comments arrive

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{error, info};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::config::ReconcilerSettings;
use crate::db::Database;
use crate::reconciler::{HistoryRepairer, RepairTrigger};

use super::jobs::{self, CommentWatcher};

/// Cron scheduler that manages periodic background jobs.
pub struct CronScheduler {
    db: Arc<Database>,
    repairer: Arc<HistoryRepairer>,
    trigger: Arc<RepairTrigger>,
    comment_watcher: Arc<CommentWatcher>,
    settings: Arc<CronSettings>,
}

/// Configuration for cron job intervals
#[derive(Debug, Clone)]
pub struct CronSettings {
    /// Interval for the full history repair sweep - default 10 minutes
    pub repair_interval_secs: u64,
    /// Interval for polling new comments - default 1 second
    pub comment_poll_interval_ms: u64,
}

impl Default for CronSettings {
    fn default() -> Self {
        Self {
            repair_interval_secs: 600,
            comment_poll_interval_ms: 1_000,
        }
    }
}

impl From<&ReconcilerSettings> for CronSettings {
    fn from(settings: &ReconcilerSettings) -> Self {
        Self {
            repair_interval_secs: settings.repair_interval_secs.max(1),
            comment_poll_interval_ms: settings.comment_poll_interval_ms.max(1),
        }
    }
}

impl CronScheduler {
    pub fn new(
        db: Arc<Database>,
        repairer: Arc<HistoryRepairer>,
        trigger: Arc<RepairTrigger>,
        comment_watcher: Arc<CommentWatcher>,
        settings: CronSettings,
    ) -> Self {
        Self {
            db,
            repairer,
            trigger,
            comment_watcher,
            settings: Arc::new(settings),
        }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        self.register_repair_history_job(&scheduler).await?;
        self.register_comment_watcher_job(&scheduler).await?;

        scheduler.start().await?;
        info!("Cron scheduler started with {} jobs", 2);

        let trigger_task = self.spawn_repair_trigger(cancellation_token.clone());

        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        if let Err(e) = trigger_task.await {
            error!("Repair trigger task failed: {}", e);
        }
        Ok(())
    }

    async fn register_repair_history_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let db = self.db.clone();
        let repairer = self.repairer.clone();
        let interval = self.settings.repair_interval_secs;

        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _lock| {
            let db = db.clone();
            let repairer = repairer.clone();
            Box::pin(async move {
                if let Err(e) = jobs::repair_history::run(&db, &repairer).await {
                    error!("Failed to repair volume histories: {:#}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered repair_history job (every {}s)", interval);
        Ok(())
    }

    async fn register_comment_watcher_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let watcher = self.comment_watcher.clone();
        let interval = self.settings.comment_poll_interval_ms;

        let job = Job::new_repeated_async(Duration::from_millis(interval), move |_uuid, _lock| {
            let watcher = watcher.clone();
            Box::pin(async move {
                if let Err(e) = watcher.run().await {
                    error!("Failed to process new comments: {:#}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered comment_watcher job (every {}ms)", interval);
        Ok(())
    }

    /// Run an extra sweep whenever the live path reports enough updates.
    fn spawn_repair_trigger(
        &self,
        cancellation_token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let db = self.db.clone();
        let repairer = self.repairer.clone();
        let trigger = self.trigger.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => break,
                    _ = trigger.triggered() => {
                        if let Err(e) = jobs::repair_history::run(&db, &repairer).await {
                            error!("Failed to repair volume histories: {:#}", e);
                        }
                    },
                }
            }
        })
    }
}
