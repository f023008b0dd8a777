use super::{AssetRecord, Plugin};
use crate::fetcher::FetchResult;
use sitesync_protocol::types::PLUGIN_HINT_MEDIA;
use sitesync_protocol::SitesyncError;

/// Built-in normalizer for binary payloads: classifies the MIME type into a
/// coarse category and stores the payload bytes as-is.
pub struct MediaPlugin;

impl Plugin for MediaPlugin {
    fn name(&self) -> &str {
        PLUGIN_HINT_MEDIA
    }

    fn matches(&self, plugin_hint: Option<&str>, fetch: &FetchResult) -> bool {
        plugin_hint == Some(PLUGIN_HINT_MEDIA) || !fetch.is_html()
    }

    fn normalize(&self, fetch: &FetchResult) -> Result<AssetRecord, SitesyncError> {
        if fetch.body.is_empty() {
            return Err(SitesyncError::Normalization(format!(
                "empty media payload for {}",
                fetch.final_url
            )));
        }
        let content_type = fetch.content_type().map(str::to_owned);
        Ok(AssetRecord {
            asset_type: classify_content_type(content_type.as_deref()).to_owned(),
            canonical_url: fetch.final_url.clone(),
            normalized_payload: fetch.body.clone(),
            raw_payload_ref: None,
            relationships: Vec::new(),
            provenance: serde_json::json!({
                "plugin": PLUGIN_HINT_MEDIA,
                "content_type": content_type,
                "content_length": fetch.body.len(),
            }),
        })
    }
}

fn classify_content_type(content_type: Option<&str>) -> &'static str {
    let Some(mime) = content_type else {
        return "binary";
    };
    let mime = mime.to_ascii_lowercase();
    match mime.as_str() {
        "application/pdf"
        | "application/msword"
        | "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        | "application/vnd.ms-excel"
        | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        | "application/vnd.ms-powerpoint"
        | "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "document",
        "application/zip" | "application/gzip" | "application/x-tar"
        | "application/x-7z-compressed" | "application/x-rar-compressed" => "archive",
        "text/css" => "stylesheet",
        "application/javascript" | "text/javascript" => "script",
        _ if mime.starts_with("image/") => "image",
        _ if mime.starts_with("video/") => "video",
        _ if mime.starts_with("audio/") => "audio",
        _ if mime.starts_with("font/") || mime.starts_with("application/font-") => "font",
        _ => "binary",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetch(content_type: Option<&str>, body: &[u8]) -> FetchResult {
        FetchResult {
            final_url: "https://example.com/logo.png".into(),
            status_code: 200,
            headers: content_type
                .map(|value| vec![("content-type".to_owned(), value.to_owned())])
                .unwrap_or_default(),
            body: body.to_vec(),
            fetched_at: 0,
            session_metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn classifies_common_mime_families() {
        assert_eq!(classify_content_type(Some("image/png")), "image");
        assert_eq!(classify_content_type(Some("video/mp4")), "video");
        assert_eq!(classify_content_type(Some("audio/mpeg")), "audio");
        assert_eq!(classify_content_type(Some("application/pdf")), "document");
        assert_eq!(classify_content_type(Some("application/zip")), "archive");
        assert_eq!(classify_content_type(Some("font/woff2")), "font");
        assert_eq!(classify_content_type(Some("text/css")), "stylesheet");
        assert_eq!(classify_content_type(Some("application/octet-stream")), "binary");
        assert_eq!(classify_content_type(None), "binary");
    }

    #[test]
    fn media_record_keeps_raw_bytes() {
        let payload = [0x89, b'P', b'N', b'G'];
        let record = MediaPlugin
            .normalize(&fetch(Some("image/png"), &payload))
            .expect("normalize");
        assert_eq!(record.asset_type, "image");
        assert_eq!(record.normalized_payload, payload);
        assert_eq!(record.provenance["content_length"], 4);
    }

    #[test]
    fn rejects_empty_payloads() {
        assert!(MediaPlugin.normalize(&fetch(Some("image/png"), &[])).is_err());
    }
}
