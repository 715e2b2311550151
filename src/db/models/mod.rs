mod checkpoint;
mod comment;
mod metadata;
mod volume;

pub use checkpoint::SyncCheckpoint;
pub use comment::CommentRecord;
pub use metadata::{BestComment, ContractMetadata};
pub use volume::{LooseValue, RawSample, Sample, VolumeAggregate};
