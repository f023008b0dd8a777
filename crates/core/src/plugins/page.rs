use super::{AssetRecord, Plugin};
use crate::fetcher::FetchResult;
use scraper::Html;
use sitesync_protocol::types::PLUGIN_HINT_PAGE;
use sitesync_protocol::SitesyncError;

/// Built-in HTML normalizer: title plus whitespace-collapsed text content.
/// This is the registry's default plugin.
pub struct PagePlugin;

impl Plugin for PagePlugin {
    fn name(&self) -> &str {
        PLUGIN_HINT_PAGE
    }

    fn matches(&self, plugin_hint: Option<&str>, fetch: &FetchResult) -> bool {
        plugin_hint == Some(PLUGIN_HINT_PAGE) || fetch.is_html()
    }

    fn normalize(&self, fetch: &FetchResult) -> Result<AssetRecord, SitesyncError> {
        if fetch.body.is_empty() {
            return Err(SitesyncError::Normalization(format!(
                "empty body for {}",
                fetch.final_url
            )));
        }
        let html = std::str::from_utf8(&fetch.body).map_err(|err| {
            SitesyncError::Normalization(format!("non-utf8 body for {}: {err}", fetch.final_url))
        })?;

        let document = Html::parse_document(html);
        let title = document
            .select(&scraper::Selector::parse("title").expect("title selector"))
            .next()
            .map(|element| collapse_whitespace(&element.text().collect::<String>()))
            .unwrap_or_default();
        let text = collapse_whitespace(
            &document
                .root_element()
                .text()
                .collect::<Vec<_>>()
                .join(" "),
        );

        Ok(AssetRecord {
            asset_type: PLUGIN_HINT_PAGE.to_owned(),
            canonical_url: fetch.final_url.clone(),
            normalized_payload: text.into_bytes(),
            raw_payload_ref: None,
            relationships: Vec::new(),
            provenance: serde_json::json!({
                "plugin": PLUGIN_HINT_PAGE,
                "title": title,
                "status": fetch.status_code,
            }),
        })
    }
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}
