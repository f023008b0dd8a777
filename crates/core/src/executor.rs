use crate::config::{CrawlerSettings, SourceProfile};
use crate::fetcher::Fetcher;
use crate::frontier::{FrontierFilter, RuntimeDenies};
use crate::plugins::PluginRegistry;
use crate::worker::{process_task, AuthRedirect, WorkerContext};
use sitesync_protocol::types::{
    EXCEPTION_KIND_WORKER, RUN_STATUS_COMPLETED, RUN_STATUS_ERROR, RUN_STATUS_STOPPED,
};
use sitesync_protocol::SitesyncError;
use sitesync_store::{FailOutcome, Store, TaskCounts};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

/// Sleep between acquisition attempts when the queue is momentarily empty or
/// the backpressure gate is closed.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Binds one run to a pool of worker threads: acquisition with backpressure,
/// runtime deny-rule merging, drain detection, cancellation, finalization.
pub struct Executor {
    pub store: Store,
    pub crawler: CrawlerSettings,
    pub profile: Arc<SourceProfile>,
    pub fetcher: Arc<dyn Fetcher>,
    pub plugins: Arc<PluginRegistry>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: String,
    pub counts: TaskCounts,
    pub runtime_denies: BTreeMap<String, Vec<String>>,
    pub released_on_stop: usize,
}

impl Executor {
    /// Run the worker pool until the queue drains, the cancel flag fires, or
    /// the store becomes unusable. Always finalizes the run exactly once.
    pub fn run(&self, run_id: i64, cancel: Arc<AtomicBool>) -> Result<RunOutcome, SitesyncError> {
        let denies = Arc::new(RuntimeDenies::new());
        let frontier = Arc::new(FrontierFilter::new(self.profile.clone(), denies.clone()));
        let (deny_tx, deny_rx) = mpsc::channel::<AuthRedirect>();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let store_failed = Arc::new(AtomicBool::new(false));

        let parallel = self
            .profile
            .parallel_agents
            .unwrap_or(self.crawler.parallel_agents)
            .max(1);
        let batch = self
            .profile
            .pages_per_agent
            .unwrap_or(self.crawler.pages_per_agent)
            .max(1);
        let max_in_flight = self.crawler.effective_max_in_flight();

        let counts = self.store.task_counts(run_id)?;
        tracing::info!(
            run_id,
            parallel,
            batch,
            pending = counts.pending,
            in_progress = counts.in_progress,
            finished = counts.finished,
            errors = counts.error,
            "starting crawl workers"
        );

        let mut handles = Vec::with_capacity(parallel);
        for index in 0..parallel {
            let ctx = WorkerContext {
                store: self.store.clone(),
                fetcher: self.fetcher.clone(),
                plugins: self.plugins.clone(),
                frontier: frontier.clone(),
                profile: self.profile.clone(),
                crawler: self.crawler.clone(),
                deny_tx: deny_tx.clone(),
                cancel: cancel.clone(),
            };
            let in_flight = in_flight.clone();
            let store_failed = store_failed.clone();
            let handle = thread::Builder::new()
                .name(format!("agent-{:02}", index + 1))
                .spawn(move || {
                    worker_loop(ctx, run_id, index, batch, max_in_flight, in_flight, store_failed)
                })
                .map_err(|err| SitesyncError::Storage(format!("spawn worker: {err}")))?;
            handles.push(handle);
        }
        drop(deny_tx);

        // Single writer for the frontier rule set: merge worker signals
        // until every sender is gone.
        while let Ok(signal) = deny_rx.recv() {
            apply_deny_signal(&denies, &signal);
        }

        let mut coordinator_panic = false;
        for handle in handles {
            if handle.join().is_err() {
                coordinator_panic = true;
            }
        }

        let released_on_stop = if cancel.load(Ordering::Acquire) {
            let released = self.store.release_in_progress(run_id, "stopped")?;
            if released > 0 {
                tracing::info!(run_id, released, "returned in-progress tasks to pending");
            }
            released
        } else {
            0
        };

        let status = if store_failed.load(Ordering::Acquire) || coordinator_panic {
            RUN_STATUS_ERROR
        } else if cancel.load(Ordering::Acquire) {
            RUN_STATUS_STOPPED
        } else {
            RUN_STATUS_COMPLETED
        };
        self.store.finalize_run(run_id, status)?;

        let counts = self.store.task_counts(run_id)?;
        tracing::info!(
            run_id,
            status,
            finished = counts.finished,
            errors = counts.error,
            "crawl workers stopped"
        );
        Ok(RunOutcome {
            status: status.to_owned(),
            counts,
            runtime_denies: denies.snapshot(),
            released_on_stop,
        })
    }
}

fn apply_deny_signal(denies: &RuntimeDenies, signal: &AuthRedirect) {
    for pattern in &signal.patterns {
        if denies.add(&signal.host, pattern) {
            tracing::info!(host = %signal.host, pattern = %pattern, "runtime deny rule added");
        }
    }
}

/// One worker: claim a batch, process it, repeat until the run drains or the
/// cancel flag fires. Lease reclamation rides along with every acquire call.
fn worker_loop(
    ctx: WorkerContext,
    run_id: i64,
    index: usize,
    batch: usize,
    max_in_flight: usize,
    in_flight: Arc<AtomicUsize>,
    store_failed: Arc<AtomicBool>,
) {
    let owner = format!("agent-{:02}-{}", index + 1, Uuid::new_v4().simple());
    let backoff = ctx.crawler.backoff_policy();

    let result: Result<(), SitesyncError> = (|| {
        loop {
            if ctx.cancel.load(Ordering::Acquire) || store_failed.load(Ordering::Acquire) {
                return Ok(());
            }
            if in_flight.load(Ordering::Acquire) >= max_in_flight {
                thread::sleep(IDLE_POLL);
                continue;
            }

            let tasks = ctx.store.acquire_tasks(
                run_id,
                &owner,
                batch,
                ctx.crawler.lease_ttl_ms(),
                ctx.crawler.max_retries,
                &backoff,
            )?;
            if tasks.is_empty() {
                let counts = ctx.store.task_counts(run_id)?;
                if counts.drained() {
                    tracing::debug!(owner = %owner, "queue drained; worker exiting");
                    return Ok(());
                }
                thread::sleep(IDLE_POLL);
                continue;
            }

            in_flight.fetch_add(tasks.len(), Ordering::AcqRel);
            let mut batch_err: Option<SitesyncError> = None;
            for task in &tasks {
                if batch_err.is_some() {
                    in_flight.fetch_sub(1, Ordering::AcqRel);
                    continue;
                }
                if ctx.cancel.load(Ordering::Acquire) {
                    if let Err(err) = ctx.store.release_task(task.id, &owner, "stopped") {
                        batch_err = Some(err);
                    }
                    in_flight.fetch_sub(1, Ordering::AcqRel);
                    continue;
                }
                tracing::debug!(owner = %owner, task_id = task.id, url = %task.url, "picked task");
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| process_task(&ctx, task)));
                in_flight.fetch_sub(1, Ordering::AcqRel);
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => batch_err = Some(err),
                    Err(payload) => {
                        let message = format!("worker panicked: {}", panic_message(&payload));
                        tracing::error!(task_id = task.id, %message, "task processing panicked");
                        match ctx.store.fail_transient(
                            task.id,
                            &owner,
                            &message,
                            ctx.crawler.max_retries,
                            &backoff,
                        ) {
                            Ok(FailOutcome::Exhausted) => {
                                if let Err(err) = ctx.store.record_exception(
                                    run_id,
                                    Some(task.id),
                                    Some(&task.url),
                                    EXCEPTION_KIND_WORKER,
                                    &message,
                                    None,
                                ) {
                                    batch_err = Some(err);
                                }
                            }
                            Ok(_) => {}
                            Err(err) => batch_err = Some(err),
                        }
                    }
                }
            }
            if let Some(err) = batch_err {
                return Err(err);
            }
        }
    })();

    if let Err(err) = result {
        tracing::error!(owner = %owner, error = %err, "worker aborted; run will finalize as error");
        store_failed.store(true, Ordering::Release);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
