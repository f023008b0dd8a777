use crate::canonical::canonicalize_url;
use crate::config::{CrawlerSettings, SourceProfile};
use crate::fetcher::{FetchResult, Fetcher};
use crate::frontier::FrontierFilter;
use crate::html;
use crate::plugins::PluginRegistry;
use sha2::{Digest, Sha256};
use sitesync_protocol::types::{EXCEPTION_KIND_FETCH, EXCEPTION_KIND_NORMALIZE};
use sitesync_protocol::SitesyncError;
use sitesync_store::{EnqueueOutcome, FailOutcome, LeaseOutcome, NewAssetVersion, Store, TaskRow};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use url::Url;

/// Signal sent to the executor when a fetch lands on an auth wall. The
/// worker holds only this sender, never a reference to the executor.
#[derive(Debug, Clone)]
pub struct AuthRedirect {
    pub host: String,
    pub patterns: Vec<String>,
    pub task_url: String,
    pub final_url: String,
}

/// Everything one worker needs: run-scoped handles passed downward.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Store,
    pub fetcher: Arc<dyn Fetcher>,
    pub plugins: Arc<PluginRegistry>,
    pub frontier: Arc<FrontierFilter>,
    pub profile: Arc<SourceProfile>,
    pub crawler: CrawlerSettings,
    pub deny_tx: Sender<AuthRedirect>,
    pub cancel: Arc<AtomicBool>,
}

enum FetchAttempt {
    Completed(FetchResult),
    Failed(SitesyncError),
    LeaseLost,
    Cancelled,
}

/// Drive one leased task through fetch, normalize, persist and discover.
/// Task-level failures are absorbed into queue transitions and exception
/// rows; only storage failures propagate.
pub fn process_task(ctx: &WorkerContext, task: &TaskRow) -> Result<(), SitesyncError> {
    let owner = task.lease_owner.clone().unwrap_or_default();
    let backoff = ctx.crawler.backoff_policy();

    let fetch = match fetch_with_renewal(ctx, task, &owner)? {
        FetchAttempt::Completed(result) => result,
        FetchAttempt::LeaseLost => {
            tracing::debug!(task_id = task.id, "lease lost mid-fetch; abandoning task");
            return Ok(());
        }
        FetchAttempt::Cancelled => {
            ctx.store.release_task(task.id, &owner, "stopped")?;
            return Ok(());
        }
        FetchAttempt::Failed(err) if err.is_transient() => {
            let message = err.to_string();
            tracing::debug!(task_id = task.id, error = %message, "transient fetch failure");
            let outcome = ctx.store.fail_transient(
                task.id,
                &owner,
                &message,
                ctx.crawler.max_retries,
                &backoff,
            )?;
            if outcome == FailOutcome::Exhausted {
                tracing::warn!(task_id = task.id, url = %task.url, "retries exhausted");
                ctx.store.record_exception(
                    task.run_id,
                    Some(task.id),
                    Some(&task.url),
                    EXCEPTION_KIND_FETCH,
                    &message,
                    attempt_context(task).as_deref(),
                )?;
            }
            return Ok(());
        }
        FetchAttempt::Failed(err) => {
            let message = err.to_string();
            if ctx.store.fail_permanent(task.id, &owner, &message)? == LeaseOutcome::Applied {
                ctx.store.record_exception(
                    task.run_id,
                    Some(task.id),
                    Some(&task.url),
                    EXCEPTION_KIND_FETCH,
                    &message,
                    attempt_context(task).as_deref(),
                )?;
            }
            return Ok(());
        }
    };

    let auth_redirect = detect_auth_redirect(&ctx.crawler.auth_redirect_prefixes, task, &fetch);
    if let Some(signal) = &auth_redirect {
        tracing::info!(
            task_url = %signal.task_url,
            final_url = %signal.final_url,
            patterns = ?signal.patterns,
            "auth redirect detected; suppressing discovery"
        );
        let _ = ctx.deny_tx.send(signal.clone());
    }

    let plugin = ctx.plugins.select(task.plugin_hint.as_deref(), &fetch);
    let record = match plugin.normalize(&fetch) {
        Ok(record) => record,
        Err(err) => {
            let message = err.to_string();
            if ctx.store.fail_permanent(task.id, &owner, &message)? == LeaseOutcome::Applied {
                ctx.store.record_exception(
                    task.run_id,
                    Some(task.id),
                    Some(&task.url),
                    EXCEPTION_KIND_NORMALIZE,
                    &message,
                    attempt_context(task).as_deref(),
                )?;
            }
            return Ok(());
        }
    };

    let normalized_hash = sha256_hex(&record.normalized_payload);
    let raw_hash = sha256_hex(&fetch.body);
    let diff_class = ctx.store.record_asset_version(&NewAssetVersion {
        run_id: task.run_id,
        source_name: &task.source_name,
        url: &task.url,
        asset_type: &record.asset_type,
        normalized_hash: &normalized_hash,
        raw_hash: &raw_hash,
        payload_ref: record.raw_payload_ref.as_deref(),
    })?;
    tracing::debug!(
        task_id = task.id,
        url = %task.url,
        diff_class = diff_class.as_str(),
        "asset version recorded"
    );

    if auth_redirect.is_none() {
        discover_links(ctx, task, &fetch)?;
    }

    if ctx.store.finish_task(task.id, &owner)? == LeaseOutcome::Lost {
        tracing::debug!(task_id = task.id, "lease lost before finish; task left to its new owner");
    }
    Ok(())
}

/// Run the fetch on a helper thread while this thread renews the lease every
/// `lease_ttl / 3` and enforces the hard fetch deadline.
fn fetch_with_renewal(
    ctx: &WorkerContext,
    task: &TaskRow,
    owner: &str,
) -> Result<FetchAttempt, SitesyncError> {
    let (result_tx, result_rx) = std::sync::mpsc::channel();
    let fetcher = ctx.fetcher.clone();
    let profile = ctx.profile.clone();
    let url = task.url.clone();
    thread::spawn(move || {
        let _ = result_tx.send(fetcher.fetch(&url, &profile));
    });

    let started = Instant::now();
    let deadline = ctx.crawler.fetch_timeout();
    let tick = ctx.crawler.renew_interval().max(Duration::from_millis(10));
    loop {
        let Some(remaining) = deadline.checked_sub(started.elapsed()) else {
            return Ok(FetchAttempt::Failed(SitesyncError::TransientFetch(format!(
                "fetch timeout for {}",
                task.url
            ))));
        };
        match result_rx.recv_timeout(tick.min(remaining)) {
            Ok(Ok(result)) => return Ok(FetchAttempt::Completed(result)),
            Ok(Err(err)) => return Ok(FetchAttempt::Failed(err)),
            Err(RecvTimeoutError::Timeout) => {
                if ctx.cancel.load(Ordering::Acquire) {
                    return Ok(FetchAttempt::Cancelled);
                }
                if started.elapsed() >= deadline {
                    return Ok(FetchAttempt::Failed(SitesyncError::TransientFetch(format!(
                        "fetch timeout for {}",
                        task.url
                    ))));
                }
                if ctx
                    .store
                    .renew_lease(task.id, owner, ctx.crawler.lease_ttl_ms())?
                    == LeaseOutcome::Lost
                {
                    return Ok(FetchAttempt::LeaseLost);
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Ok(FetchAttempt::Failed(SitesyncError::TransientFetch(format!(
                    "fetch thread died for {}",
                    task.url
                ))));
            }
        }
    }
}

/// Auth-redirect suppression: a terminal URL under a configured auth prefix
/// stops discovery for the page and proposes deny rules for the rest of the
/// run. The `continue` query parameter names the protected subtree.
fn detect_auth_redirect(
    prefixes: &[String],
    task: &TaskRow,
    fetch: &FetchResult,
) -> Option<AuthRedirect> {
    let url = Url::parse(&fetch.final_url).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    let path = url.path();
    let prefix = prefixes.iter().find(|prefix| path.starts_with(prefix.as_str()))?;

    let mut patterns = vec![format!("{}/**", prefix.trim_end_matches('/'))];
    if let Some(continue_target) = url
        .query_pairs()
        .find(|(key, _)| key.as_ref() == "continue")
        .map(|(_, value)| value.into_owned())
    {
        let continue_path = if continue_target.starts_with('/') {
            continue_target
        } else {
            Url::parse(&continue_target)
                .map(|parsed| parsed.path().to_owned())
                .unwrap_or_default()
        };
        let continue_path = continue_path.trim_end_matches('/');
        if !continue_path.is_empty() {
            patterns.push(format!("{continue_path}/**"));
        }
    }

    Some(AuthRedirect {
        host,
        patterns,
        task_url: task.url.clone(),
        final_url: fetch.final_url.clone(),
    })
}

fn discover_links(ctx: &WorkerContext, task: &TaskRow, fetch: &FetchResult) -> Result<(), SitesyncError> {
    if !fetch.is_html() || fetch.body.is_empty() {
        return Ok(());
    }
    let next_depth = task.depth.saturating_add(1);
    if next_depth > ctx.profile.max_depth {
        return Ok(());
    }
    let Ok(base) = canonicalize_url(&fetch.final_url) else {
        return Ok(());
    };

    let body = String::from_utf8_lossy(&fetch.body);
    let mut queued = 0usize;
    for url in html::extract_links(&base, &body) {
        if !ctx.frontier.evaluate(&url, next_depth).is_enqueue() {
            continue;
        }
        let hint = html::classify_url(&url);
        match ctx.store.enqueue_task(
            task.run_id,
            url.as_str(),
            next_depth,
            &task.source_name,
            Some(hint),
        )? {
            EnqueueOutcome::Queued(_) => queued += 1,
            EnqueueOutcome::Duplicate => {}
        }
    }
    if queued > 0 {
        tracing::debug!(task_id = task.id, queued, "queued discovered urls");
    }
    Ok(())
}

fn attempt_context(task: &TaskRow) -> Option<String> {
    serde_json::to_string(&serde_json::json!({
        "depth": task.depth,
        "attempt_count": task.attempt_count,
    }))
    .ok()
}

pub(crate) fn sha256_hex(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetch_at(final_url: &str) -> FetchResult {
        FetchResult {
            final_url: final_url.to_owned(),
            status_code: 200,
            headers: Vec::new(),
            body: Vec::new(),
            fetched_at: 0,
            session_metadata: serde_json::Value::Null,
        }
    }

    fn task_for(url: &str) -> TaskRow {
        TaskRow {
            id: 1,
            run_id: 1,
            url: url.to_owned(),
            depth: 0,
            source_name: "docs".into(),
            plugin_hint: None,
            status: "in_progress".into(),
            attempt_count: 0,
            next_run_at: 0,
            lease_owner: Some("agent-01".into()),
            lease_expires_at: Some(i64::MAX),
            last_error: None,
            updated_at: 0,
        }
    }

    fn prefixes() -> Vec<String> {
        ["/auth/", "/oauth/", "/login", "/signin"]
            .iter()
            .map(|p| (*p).to_owned())
            .collect()
    }

    #[test]
    fn auth_redirect_with_continue_denies_both_subtrees() {
        let task = task_for("https://example.com/settings/roles");
        let fetch = fetch_at("https://example.com/auth/login?continue=%2Fsettings%2Froles");
        let signal =
            detect_auth_redirect(&prefixes(), &task, &fetch).expect("auth redirect detected");
        assert_eq!(signal.host, "example.com");
        assert_eq!(signal.patterns, ["/auth/**", "/settings/roles/**"]);
    }

    #[test]
    fn auth_redirect_without_continue_denies_the_prefix() {
        let task = task_for("https://example.com/a");
        let fetch = fetch_at("https://example.com/login");
        let signal =
            detect_auth_redirect(&prefixes(), &task, &fetch).expect("auth redirect detected");
        assert_eq!(signal.patterns, ["/login/**"]);
    }

    #[test]
    fn ordinary_final_urls_are_not_auth_redirects() {
        let task = task_for("https://example.com/a");
        assert!(detect_auth_redirect(&prefixes(), &task, &fetch_at("https://example.com/docs/a"))
            .is_none());
    }

    #[test]
    fn absolute_continue_urls_reduce_to_their_path() {
        let task = task_for("https://example.com/team");
        let fetch = fetch_at(
            "https://example.com/auth/login?continue=https%3A%2F%2Fexample.com%2Fteam%2F",
        );
        let signal =
            detect_auth_redirect(&prefixes(), &task, &fetch).expect("auth redirect detected");
        assert_eq!(signal.patterns, ["/auth/**", "/team/**"]);
    }

    #[test]
    fn hashes_are_stable_and_hex_encoded() {
        let a = sha256_hex(b"payload");
        let b = sha256_hex(b"payload");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, sha256_hex(b"other"));
    }
}
