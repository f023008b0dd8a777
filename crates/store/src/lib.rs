pub mod store;

pub use store::{
    now_ms, AssetVersionRow, BackoffPolicy, DiffClass, EnqueueOutcome, ExceptionRow, FailOutcome,
    LeaseOutcome, NewAssetVersion, RunRow, Store, TaskCounts, TaskRow,
};
