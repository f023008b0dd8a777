use crate::config::SourceProfile;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use url::Url;

/// Why a discovered URL was kept or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Enqueue,
    TooDeep,
    DomainNotAllowed,
    Denied,
    NotAllowed,
}

impl Verdict {
    pub fn is_enqueue(&self) -> bool {
        matches!(self, Self::Enqueue)
    }
}

/// Deny rules added while a run executes (auth-redirect suppression). One
/// writer (the executor), many readers; each read takes a consistent
/// snapshot of the rule set for the host.
#[derive(Debug, Default)]
pub struct RuntimeDenies {
    rules: RwLock<BTreeMap<String, BTreeSet<String>>>,
}

impl RuntimeDenies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the pattern is new for the host.
    pub fn add(&self, host: &str, pattern: &str) -> bool {
        if pattern.is_empty() {
            return false;
        }
        let mut rules = self.rules.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        rules
            .entry(host.to_ascii_lowercase())
            .or_default()
            .insert(pattern.to_owned())
    }

    pub fn for_host(&self, host: &str) -> Vec<String> {
        let rules = self.rules.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        rules
            .get(host)
            .map(|patterns| patterns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Everything accumulated so far, for the end-of-run summary.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        let rules = self.rules.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        rules
            .iter()
            .map(|(host, patterns)| (host.clone(), patterns.iter().cloned().collect()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        let rules = self.rules.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        rules.is_empty()
    }
}

/// Pure discovery filter: depth ceiling, host membership, then per-domain
/// deny/allow globs. Deny always wins; an empty allow list accepts.
pub struct FrontierFilter {
    profile: Arc<SourceProfile>,
    runtime_denies: Arc<RuntimeDenies>,
}

impl FrontierFilter {
    pub fn new(profile: Arc<SourceProfile>, runtime_denies: Arc<RuntimeDenies>) -> Self {
        Self {
            profile,
            runtime_denies,
        }
    }

    pub fn evaluate(&self, url: &Url, depth: u32) -> Verdict {
        if depth > self.profile.max_depth {
            return Verdict::TooDeep;
        }
        let Some(host) = url.host_str() else {
            return Verdict::DomainNotAllowed;
        };
        let host = host.to_ascii_lowercase();
        let Some(rules) = self.profile.rules_for_host(&host) else {
            return Verdict::DomainNotAllowed;
        };

        let path = match url.path() {
            "" => "/",
            path => path,
        };
        let runtime = self.runtime_denies.for_host(&host);
        for pattern in rules
            .deny_paths
            .iter()
            .map(String::as_str)
            .chain(runtime.iter().map(String::as_str))
        {
            if path_matches(path, pattern) {
                return Verdict::Denied;
            }
        }

        if rules.allow_paths.is_empty() {
            return Verdict::Enqueue;
        }
        if rules
            .allow_paths
            .iter()
            .any(|pattern| path_matches(path, pattern))
        {
            Verdict::Enqueue
        } else {
            Verdict::NotAllowed
        }
    }
}

/// Segment glob match: literal segments by default, `*` matches exactly one
/// segment component, `**` matches any number of segments including zero.
pub fn path_matches(path: &str, pattern: &str) -> bool {
    let path_segments: Vec<&str> = split_segments(path);
    let pattern_segments: Vec<&str> = split_segments(pattern);
    match_segments(&pattern_segments, &path_segments)
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => {
            (0..=path.len()).any(|skip| match_segments(rest, &path[skip..]))
        }
        Some((first, rest)) => match path.split_first() {
            Some((segment, path_rest)) => {
                segment_matches(first, segment) && match_segments(rest, path_rest)
            }
            None => false,
        },
    }
}

/// `*` within a segment matches any run of characters that stays inside the
/// segment. Greedy two-pointer wildcard match.
fn segment_matches(pattern: &str, segment: &str) -> bool {
    let p = pattern.as_bytes();
    let s = segment.as_bytes();
    let (mut pi, mut si) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;
    while si < s.len() {
        if pi < p.len() && (p[pi] == s[si]) {
            pi += 1;
            si += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star = Some(pi);
            mark = si;
            pi += 1;
        } else if let Some(star_at) = star {
            pi = star_at + 1;
            mark += 1;
            si = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonicalize_url;
    use crate::config::DomainRules;

    fn profile_with(
        domain: &str,
        allow: &[&str],
        deny: &[&str],
        max_depth: u32,
    ) -> Arc<SourceProfile> {
        let mut profile = SourceProfile::named("docs");
        profile.max_depth = max_depth;
        profile.allowed_domains.insert(
            domain.to_owned(),
            DomainRules {
                allow_paths: allow.iter().map(|p| (*p).to_owned()).collect(),
                deny_paths: deny.iter().map(|p| (*p).to_owned()).collect(),
            },
        );
        Arc::new(profile)
    }

    fn filter(profile: Arc<SourceProfile>) -> FrontierFilter {
        FrontierFilter::new(profile, Arc::new(RuntimeDenies::new()))
    }

    #[test]
    fn glob_star_matches_exactly_one_segment() {
        assert!(path_matches("/docs/intro", "/docs/*"));
        assert!(!path_matches("/docs/a/b", "/docs/*"));
        assert!(!path_matches("/docs", "/docs/*"));
        assert!(path_matches("/docs/file.html", "/docs/*.html"));
        assert!(!path_matches("/docs/file.pdf", "/docs/*.html"));
    }

    #[test]
    fn glob_double_star_matches_zero_or_more_segments() {
        assert!(path_matches("/docs", "/docs/**"));
        assert!(path_matches("/docs/a", "/docs/**"));
        assert!(path_matches("/docs/a/b/c", "/docs/**"));
        assert!(!path_matches("/blog/a", "/docs/**"));
        assert!(path_matches("/a/x/b", "/a/**/b"));
        assert!(path_matches("/a/b", "/a/**/b"));
    }

    #[test]
    fn literal_patterns_match_exactly() {
        assert!(path_matches("/docs", "/docs"));
        assert!(!path_matches("/docs/intro", "/docs"));
        assert!(path_matches("/", "/"));
    }

    #[test]
    fn deny_beats_allow() {
        let filter = filter(profile_with(
            "example.com",
            &["/docs/**"],
            &["/docs/private/**"],
            5,
        ));
        let allowed = canonicalize_url("https://example.com/docs/a").expect("url");
        let denied = canonicalize_url("https://example.com/docs/private/b").expect("url");
        let outside = canonicalize_url("https://example.com/blog/c").expect("url");
        let foreign = canonicalize_url("https://other.com/x").expect("url");

        assert_eq!(filter.evaluate(&allowed, 1), Verdict::Enqueue);
        assert_eq!(filter.evaluate(&denied, 1), Verdict::Denied);
        assert_eq!(filter.evaluate(&outside, 1), Verdict::NotAllowed);
        assert_eq!(filter.evaluate(&foreign, 1), Verdict::DomainNotAllowed);
    }

    #[test]
    fn empty_allow_list_accepts_everything_not_denied() {
        let filter = filter(profile_with("example.com", &[], &["/admin/**"], 5));
        let page = canonicalize_url("https://example.com/anything/goes").expect("url");
        let admin = canonicalize_url("https://example.com/admin/panel").expect("url");
        assert_eq!(filter.evaluate(&page, 0), Verdict::Enqueue);
        assert_eq!(filter.evaluate(&admin, 0), Verdict::Denied);
    }

    #[test]
    fn depth_ceiling_applies_before_domain_rules() {
        let filter = filter(profile_with("example.com", &[], &[], 2));
        let url = canonicalize_url("https://example.com/a").expect("url");
        assert_eq!(filter.evaluate(&url, 2), Verdict::Enqueue);
        assert_eq!(filter.evaluate(&url, 3), Verdict::TooDeep);
    }

    #[test]
    fn runtime_denies_take_effect_immediately() {
        let denies = Arc::new(RuntimeDenies::new());
        let filter = FrontierFilter::new(profile_with("example.com", &[], &[], 5), denies.clone());
        let login = canonicalize_url("https://example.com/auth/login").expect("url");

        assert_eq!(filter.evaluate(&login, 1), Verdict::Enqueue);
        assert!(denies.add("example.com", "/auth/**"));
        assert!(!denies.add("example.com", "/auth/**"), "second add is a no-op");
        assert_eq!(filter.evaluate(&login, 1), Verdict::Denied);
    }

    #[test]
    fn runtime_snapshot_lists_rules_per_host() {
        let denies = RuntimeDenies::new();
        denies.add("Example.com", "/auth/**");
        denies.add("example.com", "/settings/roles/**");
        let snapshot = denies.snapshot();
        assert_eq!(
            snapshot.get("example.com").map(Vec::as_slice),
            Some(&["/auth/**".to_owned(), "/settings/roles/**".to_owned()][..])
        );
    }
}
