use crate::canonical::canonicalize_url;
use crate::config::{Config, CrawlerSettings, SourceProfile};
use crate::executor::Executor;
use crate::fetcher::{Fetcher, HttpFetcher, NullFetcher};
use crate::plugins::{PluginFactory, PluginRegistry};
use sitesync_protocol::types::RUN_STATUS_COMPLETED;
use sitesync_protocol::SitesyncError;
use sitesync_store::{Store, TaskCounts};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// CLI-facing knobs for a single crawl invocation.
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    pub source: Option<String>,
    pub resume: bool,
    pub start_urls: Vec<String>,
    pub depth_override: Option<u32>,
    pub parallel_override: Option<usize>,
}

/// End-of-run summary.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: i64,
    pub source_name: String,
    pub resumed: bool,
    pub queued_seeds: usize,
    pub status: String,
    pub counts: TaskCounts,
    pub open_exceptions: i64,
    pub suggested_denies: BTreeMap<String, Vec<String>>,
    pub missing_assets: usize,
    pub released_on_stop: usize,
}

/// Thin glue between configuration, the store and the executor: resolves the
/// effective profile, creates or resumes the run, seeds the frontier, wires
/// the fetcher and plugin registry, then finalizes and summarizes.
pub struct Orchestrator {
    config: Config,
    store: Store,
    discovered_plugins: Vec<(String, PluginFactory)>,
    fetcher_override: Option<Arc<dyn Fetcher>>,
}

impl Orchestrator {
    pub fn new(config: Config, store: Store) -> Self {
        Self {
            config,
            store,
            discovered_plugins: Vec::new(),
            fetcher_override: None,
        }
    }

    /// Host-provided plugin discovery; registered after the built-ins.
    pub fn with_discovered_plugins(mut self, plugins: Vec<(String, PluginFactory)>) -> Self {
        self.discovered_plugins = plugins;
        self
    }

    /// Replace the profile-selected fetcher (tests, embedding hosts).
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher_override = Some(fetcher);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn crawl(
        &self,
        options: &CrawlOptions,
        cancel: Arc<AtomicBool>,
    ) -> Result<RunReport, SitesyncError> {
        let mut profile = self.config.source(options.source.as_deref())?.clone();
        if let Some(depth) = options.depth_override {
            profile.max_depth = depth;
        }
        if let Some(parallel) = options.parallel_override {
            profile.parallel_agents = Some(parallel.max(1));
        }

        let snapshot = config_snapshot(&self.config.crawler, &profile)?;
        let (run, resumed) = self.resume_or_start(options.resume, &profile.name, &snapshot)?;

        let seed_urls = if options.start_urls.is_empty() {
            profile.start_urls.clone()
        } else {
            options.start_urls.clone()
        };
        let mut seeds = Vec::with_capacity(seed_urls.len());
        for raw in &seed_urls {
            let url = canonicalize_url(raw)
                .map_err(|err| SitesyncError::Config(format!("invalid start url: {err}")))?;
            seeds.push((url.to_string(), 0u32));
        }
        let queued_seeds = self.store.enqueue_seeds(run.id, &profile.name, &seeds)?;
        if seeds.is_empty() {
            tracing::warn!(run_id = run.id, source = %profile.name, "run has no seed urls");
        } else {
            tracing::info!(
                run_id = run.id,
                source = %profile.name,
                queued_seeds,
                resumed,
                "run seeded"
            );
        }

        let mut plugins = PluginRegistry::with_builtin();
        plugins.load_discovered(self.discovered_plugins.iter().cloned());

        let fetcher = match &self.fetcher_override {
            Some(fetcher) => fetcher.clone(),
            None => build_fetcher(&profile, &self.config.crawler)?,
        };

        let executor = Executor {
            store: self.store.clone(),
            crawler: self.config.crawler.clone(),
            profile: Arc::new(profile.clone()),
            fetcher,
            plugins: Arc::new(plugins),
        };
        let outcome = executor.run(run.id, cancel)?;

        let missing_assets = if outcome.status == RUN_STATUS_COMPLETED {
            self.store
                .record_missing_assets(run.id, &profile.name, run.started_at)?
        } else {
            0
        };
        if missing_assets > 0 {
            tracing::warn!(run_id = run.id, missing_assets, "assets missing from this crawl");
        }

        Ok(RunReport {
            run_id: run.id,
            source_name: profile.name.clone(),
            resumed,
            queued_seeds,
            status: outcome.status,
            counts: outcome.counts,
            open_exceptions: self.store.open_exception_count(run.id)?,
            suggested_denies: outcome.runtime_denies,
            missing_assets,
            released_on_stop: outcome.released_on_stop,
        })
    }

    fn resume_or_start(
        &self,
        resume: bool,
        source_name: &str,
        snapshot: &str,
    ) -> Result<(sitesync_store::RunRow, bool), SitesyncError> {
        if resume {
            if let Some(run) = self.store.latest_resumable(source_name)? {
                tracing::info!(run_id = run.id, source = %source_name, "resuming run");
                self.store.mark_run_running(run.id)?;
                return Ok((run, true));
            }
            tracing::warn!(
                source = %source_name,
                "resume requested but no resumable run found; starting a new run"
            );
        }
        let run = self.store.create_run(source_name, snapshot)?;
        tracing::info!(run_id = run.id, source = %source_name, "started new run");
        Ok((run, false))
    }
}

fn config_snapshot(
    crawler: &CrawlerSettings,
    profile: &SourceProfile,
) -> Result<String, SitesyncError> {
    serde_json::to_string(&serde_json::json!({
        "crawler": crawler,
        "source": profile,
    }))
    .map_err(|err| SitesyncError::Config(format!("config snapshot: {err}")))
}

fn build_fetcher(
    profile: &SourceProfile,
    crawler: &CrawlerSettings,
) -> Result<Arc<dyn Fetcher>, SitesyncError> {
    match profile.fetcher.as_str() {
        "http" => Ok(Arc::new(HttpFetcher::new(crawler.fetch_timeout())?)),
        "null" => Ok(Arc::new(NullFetcher)),
        other => Err(SitesyncError::Config(format!(
            "unknown fetcher '{other}' for source '{}'",
            profile.name
        ))),
    }
}
