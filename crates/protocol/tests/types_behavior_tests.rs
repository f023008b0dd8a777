use sitesync_protocol::error::SitesyncError;
use sitesync_protocol::types::{
    run_status_is_terminal, task_status_is_terminal, RUN_STATUS_COMPLETED, RUN_STATUS_ERROR,
    RUN_STATUS_RUNNING, RUN_STATUS_STOPPED, TASK_STATUS_ERROR, TASK_STATUS_FINISHED,
    TASK_STATUS_IN_PROGRESS, TASK_STATUS_PENDING,
};

#[test]
fn task_terminality_matches_state_machine() {
    assert!(!task_status_is_terminal(TASK_STATUS_PENDING));
    assert!(!task_status_is_terminal(TASK_STATUS_IN_PROGRESS));
    assert!(task_status_is_terminal(TASK_STATUS_FINISHED));
    assert!(task_status_is_terminal(TASK_STATUS_ERROR));
}

#[test]
fn run_terminality_matches_state_machine() {
    assert!(!run_status_is_terminal(RUN_STATUS_RUNNING));
    assert!(run_status_is_terminal(RUN_STATUS_COMPLETED));
    assert!(run_status_is_terminal(RUN_STATUS_STOPPED));
    assert!(run_status_is_terminal(RUN_STATUS_ERROR));
}

#[test]
fn transient_classification_covers_only_retryable_kinds() {
    assert!(SitesyncError::TransientFetch("timeout".into()).is_transient());
    assert!(!SitesyncError::PermanentFetch("404".into()).is_transient());
    assert!(!SitesyncError::Normalization("empty body".into()).is_transient());
    assert!(!SitesyncError::Cancelled.is_transient());
}

#[test]
fn error_messages_name_the_failure() {
    let err = SitesyncError::DuplicateTask("https://example.com/a".into());
    assert!(err.to_string().contains("duplicate task"));
    assert!(err.to_string().contains("https://example.com/a"));

    let err = SitesyncError::Storage("disk full".into());
    assert_eq!(err.to_string(), "storage error: disk full");
}
