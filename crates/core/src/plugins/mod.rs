use crate::fetcher::FetchResult;
use sitesync_protocol::SitesyncError;

mod media;
mod page;

pub use media::MediaPlugin;
pub use page::PagePlugin;

/// Normalized representation of a fetched payload, ready for hashing and
/// version storage.
#[derive(Debug, Clone)]
pub struct AssetRecord {
    pub asset_type: String,
    pub canonical_url: String,
    pub normalized_payload: Vec<u8>,
    pub raw_payload_ref: Option<String>,
    pub relationships: Vec<String>,
    pub provenance: serde_json::Value,
}

/// Asset normalization plugin. `matches` is a deterministic capability check;
/// `normalize` either produces a record or rejects the payload.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    fn matches(&self, plugin_hint: Option<&str>, fetch: &FetchResult) -> bool;
    fn normalize(&self, fetch: &FetchResult) -> Result<AssetRecord, SitesyncError>;
}

pub type PluginFactory = fn() -> Result<Box<dyn Plugin>, SitesyncError>;

/// Closed registry populated once during orchestrator startup. Built-ins are
/// registered before discovered plugins; the first registered plugin is the
/// fallback when nothing matches.
pub struct PluginRegistry {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn with_builtin() -> Self {
        let mut registry = Self {
            plugins: Vec::new(),
        };
        registry.register(Box::new(PagePlugin));
        registry.register(Box::new(MediaPlugin));
        registry
    }

    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        if self.plugins.iter().any(|existing| existing.name() == plugin.name()) {
            return;
        }
        self.plugins.push(plugin);
    }

    /// Load host-provided plugins. A failing factory is logged and skipped;
    /// it never prevents the remaining plugins from loading.
    pub fn load_discovered(&mut self, discovered: impl IntoIterator<Item = (String, PluginFactory)>) {
        for (name, factory) in discovered {
            match factory() {
                Ok(plugin) => self.register(plugin),
                Err(err) => {
                    tracing::warn!(plugin = %name, error = %err, "failed to load plugin");
                }
            }
        }
    }

    /// Deterministic selection: an exact hint match wins, then the first
    /// plugin whose capability matches, else the declared default (the first
    /// registered plugin).
    pub fn select(&self, plugin_hint: Option<&str>, fetch: &FetchResult) -> &dyn Plugin {
        if let Some(hint) = plugin_hint {
            if let Some(plugin) = self.plugins.iter().find(|plugin| plugin.name() == hint) {
                return plugin.as_ref();
            }
        }
        self.plugins
            .iter()
            .find(|plugin| plugin.matches(plugin_hint, fetch))
            .unwrap_or(&self.plugins[0])
            .as_ref()
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|plugin| plugin.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RejectingPlugin;

    impl Plugin for RejectingPlugin {
        fn name(&self) -> &str {
            "rejecting"
        }

        fn matches(&self, plugin_hint: Option<&str>, _fetch: &FetchResult) -> bool {
            plugin_hint == Some("rejecting")
        }

        fn normalize(&self, _fetch: &FetchResult) -> Result<AssetRecord, SitesyncError> {
            Err(SitesyncError::Normalization("always rejects".into()))
        }
    }

    fn html_fetch() -> FetchResult {
        FetchResult {
            final_url: "https://example.com/a".into(),
            status_code: 200,
            headers: vec![("content-type".to_owned(), "text/html".to_owned())],
            body: b"<html><title>t</title></html>".to_vec(),
            fetched_at: 0,
            session_metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn builtins_register_page_before_media() {
        let registry = PluginRegistry::with_builtin();
        assert_eq!(registry.names(), ["page", "media"]);
    }

    #[test]
    fn one_failing_factory_does_not_abort_the_rest() {
        fn failing() -> Result<Box<dyn Plugin>, SitesyncError> {
            Err(SitesyncError::Config("broken factory".into()))
        }
        fn working() -> Result<Box<dyn Plugin>, SitesyncError> {
            Ok(Box::new(RejectingPlugin))
        }

        let mut registry = PluginRegistry::with_builtin();
        registry.load_discovered([
            ("broken".to_owned(), failing as PluginFactory),
            ("rejecting".to_owned(), working as PluginFactory),
        ]);
        assert_eq!(registry.names(), ["page", "media", "rejecting"]);
    }

    #[test]
    fn duplicate_names_are_ignored() {
        let mut registry = PluginRegistry::with_builtin();
        registry.register(Box::new(PagePlugin));
        assert_eq!(registry.names(), ["page", "media"]);
    }

    #[test]
    fn selection_prefers_hint_then_capability_then_default() {
        let registry = PluginRegistry::with_builtin();
        let fetch = html_fetch();
        assert_eq!(registry.select(Some("media"), &fetch).name(), "media");
        assert_eq!(registry.select(Some("page"), &fetch).name(), "page");
        // Unknown hint: capability match on the HTML payload wins.
        assert_eq!(registry.select(Some("nonexistent"), &fetch).name(), "page");
        assert_eq!(registry.select(None, &fetch).name(), "page");
    }
}
