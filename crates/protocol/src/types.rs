pub const RUN_STATUS_RUNNING: &str = "running";
pub const RUN_STATUS_COMPLETED: &str = "completed";
pub const RUN_STATUS_STOPPED: &str = "stopped";
pub const RUN_STATUS_ERROR: &str = "error";

pub const TASK_STATUS_PENDING: &str = "pending";
pub const TASK_STATUS_IN_PROGRESS: &str = "in_progress";
pub const TASK_STATUS_FINISHED: &str = "finished";
pub const TASK_STATUS_ERROR: &str = "error";

pub const EXCEPTION_KIND_FETCH: &str = "fetch";
pub const EXCEPTION_KIND_NORMALIZE: &str = "normalize";
pub const EXCEPTION_KIND_WORKER: &str = "worker";
pub const EXCEPTION_KIND_MISSING: &str = "missing";

pub const DIFF_CLASS_NEW: &str = "new";
pub const DIFF_CLASS_UPDATED: &str = "updated";
pub const DIFF_CLASS_UNCHANGED: &str = "unchanged";

pub const PLUGIN_HINT_PAGE: &str = "page";
pub const PLUGIN_HINT_MEDIA: &str = "media";

/// True once a task can no longer change state.
pub fn task_status_is_terminal(status: &str) -> bool {
    status == TASK_STATUS_FINISHED || status == TASK_STATUS_ERROR
}

/// True once a run has been finalized.
pub fn run_status_is_terminal(status: &str) -> bool {
    status == RUN_STATUS_COMPLETED || status == RUN_STATUS_STOPPED || status == RUN_STATUS_ERROR
}
