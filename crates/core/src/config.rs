use serde::{Deserialize, Serialize};
use sitesync_protocol::constants::{
    DEFAULT_AUTH_REDIRECT_PREFIXES, DEFAULT_BACKOFF_BASE_SECONDS, DEFAULT_BACKOFF_CAP_SECONDS,
    DEFAULT_DB_FILENAME, DEFAULT_FETCH_TIMEOUT_SECONDS, DEFAULT_JITTER_FRACTION,
    DEFAULT_LEASE_TTL_SECONDS, DEFAULT_MAX_DEPTH, DEFAULT_MAX_RETRIES, DEFAULT_PAGES_PER_AGENT,
    DEFAULT_PARALLEL_AGENTS,
};
use sitesync_protocol::SitesyncError;
use sitesync_store::BackoffPolicy;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerSettings {
    #[serde(default = "default_parallel_agents")]
    pub parallel_agents: usize,
    #[serde(default = "default_pages_per_agent")]
    pub pages_per_agent: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_fetch_timeout_seconds")]
    pub fetch_timeout_seconds: f64,
    #[serde(default = "default_lease_ttl_seconds")]
    pub lease_ttl_seconds: f64,
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    #[serde(default = "default_backoff_base_seconds")]
    pub backoff_base_seconds: f64,
    #[serde(default = "default_backoff_cap_seconds")]
    pub backoff_cap_seconds: f64,
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
    #[serde(default = "default_auth_redirect_prefixes")]
    pub auth_redirect_prefixes: Vec<String>,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            parallel_agents: default_parallel_agents(),
            pages_per_agent: default_pages_per_agent(),
            max_retries: default_max_retries(),
            fetch_timeout_seconds: default_fetch_timeout_seconds(),
            lease_ttl_seconds: default_lease_ttl_seconds(),
            max_in_flight: None,
            backoff_base_seconds: default_backoff_base_seconds(),
            backoff_cap_seconds: default_backoff_cap_seconds(),
            jitter_fraction: default_jitter_fraction(),
            auth_redirect_prefixes: default_auth_redirect_prefixes(),
        }
    }
}

impl CrawlerSettings {
    pub fn lease_ttl_ms(&self) -> i64 {
        (self.lease_ttl_seconds.max(0.0) * 1_000.0) as i64
    }

    /// Lease renewal cadence: a third of the TTL.
    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis((self.lease_ttl_ms().max(3) / 3) as u64)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis((self.fetch_timeout_seconds.max(0.0) * 1_000.0) as u64)
    }

    /// Backpressure ceiling: explicit when configured, otherwise derived
    /// from the pool size and batch size.
    pub fn effective_max_in_flight(&self) -> usize {
        self.max_in_flight
            .unwrap_or_else(|| self.parallel_agents.max(1) * self.pages_per_agent.max(1))
            .max(1)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_ms: (self.backoff_base_seconds.max(0.0) * 1_000.0) as i64,
            cap_ms: (self.backoff_cap_seconds.max(0.0) * 1_000.0) as i64,
            jitter_fraction: self.jitter_fraction.clamp(0.0, 1.0),
        }
    }
}

/// Per-domain discovery rules. Deny always wins; an empty allow list accepts
/// every path on the domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainRules {
    #[serde(default)]
    pub allow_paths: Vec<String>,
    #[serde(default)]
    pub deny_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceProfile {
    pub name: String,
    #[serde(default)]
    pub start_urls: Vec<String>,
    #[serde(default)]
    pub allowed_domains: BTreeMap<String, DomainRules>,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default = "default_fetcher")]
    pub fetcher: String,
    #[serde(default)]
    pub parallel_agents: Option<usize>,
    #[serde(default)]
    pub pages_per_agent: Option<usize>,
}

impl SourceProfile {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            start_urls: Vec::new(),
            allowed_domains: BTreeMap::new(),
            max_depth: default_max_depth(),
            plugins: Vec::new(),
            fetcher: default_fetcher(),
            parallel_agents: None,
            pages_per_agent: None,
        }
    }

    pub fn rules_for_host(&self, host: &str) -> Option<&DomainRules> {
        self.allowed_domains.get(host)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub crawler: CrawlerSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default = "default_source_name")]
    pub default_source: String,
    #[serde(default)]
    pub sources: Vec<SourceProfile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingSettings::default(),
            crawler: CrawlerSettings::default(),
            storage: StorageSettings::default(),
            default_source: default_source_name(),
            sources: vec![SourceProfile::named(&default_source_name())],
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, SitesyncError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            SitesyncError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        let config: Config = toml::from_str(&raw).map_err(|err| {
            SitesyncError::Config(format!("invalid config {}: {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SitesyncError> {
        let mut seen = std::collections::BTreeSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(SitesyncError::Config("source name must not be empty".into()));
            }
            if !seen.insert(source.name.as_str()) {
                return Err(SitesyncError::Config(format!(
                    "duplicate source name: {}",
                    source.name
                )));
            }
        }
        if !self.sources.is_empty() && !seen.contains(self.default_source.as_str()) {
            return Err(SitesyncError::Config(format!(
                "default source '{}' is not defined",
                self.default_source
            )));
        }
        if self.crawler.parallel_agents == 0 || self.crawler.pages_per_agent == 0 {
            return Err(SitesyncError::Config(
                "crawler.parallel_agents and crawler.pages_per_agent must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn source(&self, name: Option<&str>) -> Result<&SourceProfile, SitesyncError> {
        let target = name.unwrap_or(&self.default_source);
        self.sources
            .iter()
            .find(|source| source.name == target)
            .ok_or_else(|| SitesyncError::Config(format!("source profile '{target}' is not defined")))
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_parallel_agents() -> usize {
    DEFAULT_PARALLEL_AGENTS
}

fn default_pages_per_agent() -> usize {
    DEFAULT_PAGES_PER_AGENT
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_fetch_timeout_seconds() -> f64 {
    DEFAULT_FETCH_TIMEOUT_SECONDS
}

fn default_lease_ttl_seconds() -> f64 {
    DEFAULT_LEASE_TTL_SECONDS
}

fn default_backoff_base_seconds() -> f64 {
    DEFAULT_BACKOFF_BASE_SECONDS
}

fn default_backoff_cap_seconds() -> f64 {
    DEFAULT_BACKOFF_CAP_SECONDS
}

fn default_jitter_fraction() -> f64 {
    DEFAULT_JITTER_FRACTION
}

fn default_auth_redirect_prefixes() -> Vec<String> {
    DEFAULT_AUTH_REDIRECT_PREFIXES
        .iter()
        .map(|prefix| (*prefix).to_owned())
        .collect()
}

fn default_max_depth() -> u32 {
    DEFAULT_MAX_DEPTH
}

fn default_fetcher() -> String {
    "http".to_owned()
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_FILENAME)
}

fn default_source_name() -> String {
    "default".to_owned()
}
