pub mod comment_watcher;
pub mod repair_history;

pub use comment_watcher::CommentWatcher;
