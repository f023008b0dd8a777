pub const DEFAULT_PARALLEL_AGENTS: usize = 2;
pub const DEFAULT_PAGES_PER_AGENT: usize = 2;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_FETCH_TIMEOUT_SECONDS: f64 = 30.0;
pub const DEFAULT_LEASE_TTL_SECONDS: f64 = 30.0;
pub const DEFAULT_BACKOFF_BASE_SECONDS: f64 = 2.0;
pub const DEFAULT_BACKOFF_CAP_SECONDS: f64 = 120.0;
pub const DEFAULT_JITTER_FRACTION: f64 = 0.25;
pub const DEFAULT_MAX_DEPTH: u32 = 1;
pub const DEFAULT_DB_FILENAME: &str = "sitesync.sqlite";

/// Paths treated as authentication entry points unless overridden.
pub const DEFAULT_AUTH_REDIRECT_PREFIXES: &[&str] = &["/auth/", "/oauth/", "/login", "/signin"];

/// Upper bound on a single fetched payload.
pub const MAX_FETCH_BODY_BYTES: usize = 100_000_000;
