mod dispatcher;
mod error;
mod event;
mod metadata;
mod ranker;
mod repair;
mod volume;

pub use dispatcher::{EventDispatcher, Reconciler};
pub use error::{Outcome, ReconcileError};
pub use event::{EventKind, SaleEvent};
pub use metadata::MetadataProjector;
pub use ranker::{select_best, BalanceOracle, BestCommentRanker};
pub use repair::{
    current_volume_of, repair_history, retention_start, HistoryRepairer, RepairReport,
    RepairTrigger, RETENTION_WINDOW,
};
pub use volume::VolumeAggregator;
