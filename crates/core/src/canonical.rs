use sitesync_protocol::SitesyncError;
use url::Url;

/// Query parameters stripped during canonicalization; they never change the
/// payload a server returns.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
];

/// Canonicalize a URL for task identity: http(s) only, lowercase host,
/// fragment stripped, default port removed, trailing slash dropped outside
/// the root, tracking parameters removed and the rest sorted. The `url`
/// crate already lowercases scheme/host and hides default ports.
pub fn canonicalize_url(raw: &str) -> Result<Url, SitesyncError> {
    let mut url =
        Url::parse(raw.trim()).map_err(|err| SitesyncError::InvalidUrl(format!("{raw}: {err}")))?;
    canonicalize_parsed(&mut url)?;
    Ok(url)
}

/// Resolve `candidate` against `base` (for relative hrefs), then canonicalize.
pub fn canonicalize_with_base(base: &Url, candidate: &str) -> Result<Url, SitesyncError> {
    let mut url = base
        .join(candidate.trim())
        .map_err(|err| SitesyncError::InvalidUrl(format!("{candidate}: {err}")))?;
    canonicalize_parsed(&mut url)?;
    Ok(url)
}

fn canonicalize_parsed(url: &mut Url) -> Result<(), SitesyncError> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(SitesyncError::InvalidUrl(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(SitesyncError::InvalidUrl("missing host".into()));
    }

    url.set_fragment(None);

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_owned();
        url.set_path(if trimmed.is_empty() { "/" } else { &trimmed });
    }

    if url.query().is_some() {
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        if params.is_empty() {
            url.set_query(None);
        } else {
            params.sort();
            let query = params
                .iter()
                .map(|(key, value)| {
                    if value.is_empty() {
                        key.clone()
                    } else {
                        format!("{key}={value}")
                    }
                })
                .collect::<Vec<_>>()
                .join("&");
            url.set_query(Some(&query));
        }
    }
    Ok(())
}
