use crate::config::SourceProfile;
use sitesync_protocol::constants::MAX_FETCH_BODY_BYTES;
use sitesync_protocol::SitesyncError;
use std::io::Read;
use std::time::Duration;

/// Payload returned by a fetcher. `final_url` reflects redirects and is what
/// auth-redirect detection inspects.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub final_url: String,
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub fetched_at: i64,
    pub session_metadata: serde_json::Value,
}

impl FetchResult {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
            .map(|value| value.split(';').next().unwrap_or(value).trim())
    }

    pub fn is_html(&self) -> bool {
        self.content_type()
            .map(|mime| mime == "text/html" || mime == "application/xhtml+xml")
            // No header: sniff nothing, assume HTML pages (test doubles).
            .unwrap_or(true)
    }
}

/// Contract for payload retrieval. Implementations classify their own
/// failures as transient or permanent via the error taxonomy and must return
/// within the profile's configured deadline budget.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, profile: &SourceProfile) -> Result<FetchResult, SitesyncError>;
}

/// Blocking HTTP fetcher. Status mapping follows the retry policy: 5xx and
/// transport errors are transient, other 4xx are permanent.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, SitesyncError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sitesync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| SitesyncError::Config(format!("http client: {err}")))?;
        Ok(Self {
            client,
            max_body_bytes: MAX_FETCH_BODY_BYTES,
        })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, _profile: &SourceProfile) -> Result<FetchResult, SitesyncError> {
        let response = self.client.get(url).send().map_err(|err| {
            if err.is_timeout() {
                SitesyncError::TransientFetch(format!("timeout fetching {url}: {err}"))
            } else if err.is_connect() || err.is_request() {
                SitesyncError::TransientFetch(format!("connection error for {url}: {err}"))
            } else {
                SitesyncError::PermanentFetch(format!("http error for {url}: {err}"))
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(SitesyncError::TransientFetch(format!(
                "HTTP {status} for {url}"
            )));
        }
        if status.is_client_error() {
            return Err(SitesyncError::PermanentFetch(format!(
                "HTTP {status} for {url}"
            )));
        }

        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    value.to_str().unwrap_or_default().to_owned(),
                )
            })
            .collect::<Vec<_>>();

        let mut body = Vec::new();
        let mut reader = response.take(self.max_body_bytes as u64 + 1);
        reader
            .read_to_end(&mut body)
            .map_err(|err| SitesyncError::TransientFetch(format!("read error for {url}: {err}")))?;
        if body.len() > self.max_body_bytes {
            return Err(SitesyncError::PermanentFetch(format!(
                "response exceeds {} bytes for {url}",
                self.max_body_bytes
            )));
        }

        let content_type = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.clone());
        Ok(FetchResult {
            final_url,
            status_code: status.as_u16(),
            session_metadata: serde_json::json!({
                "content_type": content_type,
                "content_length": body.len(),
            }),
            fetched_at: sitesync_store::now_ms(),
            headers,
            body,
        })
    }
}

/// Fetcher that performs no I/O: every URL resolves to a stub page. Used for
/// dry runs and plumbing tests.
pub struct NullFetcher;

impl Fetcher for NullFetcher {
    fn fetch(&self, url: &str, _profile: &SourceProfile) -> Result<FetchResult, SitesyncError> {
        Ok(FetchResult {
            final_url: url.to_owned(),
            status_code: 200,
            headers: vec![("content-type".to_owned(), "text/html".to_owned())],
            body: format!("<html><head><title>{url}</title></head><body></body></html>")
                .into_bytes(),
            fetched_at: sitesync_store::now_ms(),
            session_metadata: serde_json::json!({"fetcher": "null"}),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with_content_type(value: &str) -> FetchResult {
        FetchResult {
            final_url: "https://example.com/a".into(),
            status_code: 200,
            headers: vec![("Content-Type".to_owned(), value.to_owned())],
            body: Vec::new(),
            fetched_at: 0,
            session_metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn content_type_ignores_parameters_and_case() {
        let result = result_with_content_type("text/HTML; charset=utf-8");
        assert_eq!(result.content_type(), Some("text/HTML"));
        assert!(result_with_content_type("text/html; charset=utf-8").is_html());
        assert!(!result_with_content_type("image/png").is_html());
    }

    #[test]
    fn null_fetcher_echoes_the_url() {
        let profile = SourceProfile::named("docs");
        let result = NullFetcher
            .fetch("https://example.com/a", &profile)
            .expect("fetch");
        assert_eq!(result.final_url, "https://example.com/a");
        assert_eq!(result.status_code, 200);
        assert!(String::from_utf8_lossy(&result.body).contains("https://example.com/a"));
    }
}
