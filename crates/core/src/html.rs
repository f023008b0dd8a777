use crate::canonical::canonicalize_with_base;
use scraper::{Html, Selector};
use sitesync_protocol::types::{PLUGIN_HINT_MEDIA, PLUGIN_HINT_PAGE};
use std::collections::BTreeSet;
use url::Url;

/// File extensions routed to the media pipeline instead of page parsing.
const MEDIA_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".svg", ".ico", ".webp", ".avif", ".mp4", ".mp3",
    ".wav", ".avi", ".mov", ".wmv", ".mkv", ".webm", ".pdf", ".zip", ".tar", ".gz", ".rar", ".7z",
    ".dmg", ".exe", ".iso", ".ppt", ".pptx", ".doc", ".docx", ".xls", ".xlsx", ".woff", ".woff2",
    ".ttf", ".otf", ".css", ".js",
];

/// Harvest outbound links from an HTML document, canonicalized against
/// `base`. Self-links and unparseable hrefs are dropped; duplicates collapse.
pub fn extract_links(base: &Url, html: &str) -> Vec<Url> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("anchor selector");
    let mut seen = BTreeSet::new();
    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() {
            continue;
        }
        let Ok(url) = canonicalize_with_base(base, href) else {
            continue;
        };
        if &url == base {
            continue;
        }
        if seen.insert(url.to_string()) {
            links.push(url);
        }
    }
    links
}

/// Plugin hint for a discovered URL based on its path extension.
pub fn classify_url(url: &Url) -> &'static str {
    let path = url.path().to_ascii_lowercase();
    if MEDIA_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        PLUGIN_HINT_MEDIA
    } else {
        PLUGIN_HINT_PAGE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonicalize_url;

    #[test]
    fn extracts_absolute_and_relative_links() {
        let base = canonicalize_url("https://example.com/docs/index").expect("base");
        let html = r##"
            <html><body>
                <a href="/docs/a">A</a>
                <a href="b">B</a>
                <a href="https://other.com/x">X</a>
                <a href="mailto:team@example.com">mail</a>
                <a href="#fragment-only"></a>
                <a href="/docs/a">dup</a>
            </body></html>
        "##;
        let links: Vec<String> = extract_links(&base, html)
            .into_iter()
            .map(|url| url.to_string())
            .collect();
        assert_eq!(
            links,
            [
                "https://example.com/docs/a",
                "https://example.com/docs/b",
                "https://other.com/x",
            ]
        );
    }

    #[test]
    fn self_links_are_dropped() {
        let base = canonicalize_url("https://example.com/docs").expect("base");
        let html = r#"<a href="https://example.com/docs#top">self</a>"#;
        assert!(extract_links(&base, html).is_empty());
    }

    #[test]
    fn classify_routes_media_extensions() {
        let page = canonicalize_url("https://example.com/docs/guide").expect("url");
        let image = canonicalize_url("https://example.com/logo.PNG").expect("url");
        let archive = canonicalize_url("https://example.com/dist/bundle.tar.gz").expect("url");
        assert_eq!(classify_url(&page), "page");
        assert_eq!(classify_url(&image), "media");
        assert_eq!(classify_url(&archive), "media");
    }
}
