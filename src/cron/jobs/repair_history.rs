//! Job to compact and re-validate every volume history.
//!
//! Runs on a fixed interval and additionally whenever enough live volume
//! updates have accumulated. Overlapping runs are skipped by the repairer.

use anyhow::Result;
use log::{debug, info};

use crate::db::Database;
use crate::reconciler::HistoryRepairer;

pub const JOB_NAME: &str = "repair_history";

pub async fn run(db: &Database, repairer: &HistoryRepairer) -> Result<()> {
    info!("Starting repair_history job...");
    let now = time::OffsetDateTime::now_utc();

    let Some(report) = repairer.repair_all().await? else {
        debug!("repair_history skipped, previous sweep still running");
        return Ok(());
    };

    db.postgres.set_cron_checkpoint(JOB_NAME, now).await?;

    if report.failed + report.conflicts > 0 {
        info!(
            "repair_history left {} histories unrepaired, retrying next run",
            report.failed + report.conflicts
        );
    }
    Ok(())
}
