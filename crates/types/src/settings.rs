//! Serialized plugin and module configuration.
//!
//! These documents are what a YAML or JSON binding file deserializes into. Code-only features
//! (transforms, computed parameters, custom matchers) are attached after loading.

use std::env;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{binding::BindingSpec, endpoint::Endpoint, endpoint::SourceKind, naming::NamingSettings};

/// Overrides the REST base URL.
pub const BASE_URL_ENV: &str = "STATEBIND_BASE_URL";
/// Enables strict mode when set to `1` or `true`.
pub const STRICT_ENV: &str = "STATEBIND_STRICT";

pub const DEFAULT_ENGINE_NAMESPACE: &str = "bind";
pub const DEFAULT_COOKIE_EXPIRES_MS: u64 = 720_000;

fn default_engine_namespace() -> String {
    DEFAULT_ENGINE_NAMESPACE.to_string()
}

/// Cookie attributes applied by storage endpoints using the cookie scope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(default)]
pub struct CookieSettings {
    /// Lifetime in milliseconds.
    pub expires: u64,
    pub path: String,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            expires: DEFAULT_COOKIE_EXPIRES_MS,
            path: "/".to_string(),
        }
    }
}

/// Which configured sources are replaced by mocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MockSelection {
    pub rest: bool,
    pub storage: bool,
    pub wasm: bool,
}

impl MockSelection {
    pub fn includes(&self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Rest => self.rest,
            SourceKind::Storage => self.storage,
            SourceKind::Wasm => self.wasm,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MockSettings {
    All(bool),
    Selected(MockSelection),
}

impl Default for MockSettings {
    fn default() -> Self {
        Self::All(false)
    }
}

impl MockSettings {
    pub fn mocks(&self, kind: SourceKind) -> bool {
        match self {
            Self::All(all) => *all,
            Self::Selected(selection) => selection.includes(kind),
        }
    }
}

/// Data source selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourcesSettings {
    /// REST base URL. Configures the REST source.
    pub url: Option<String>,
    /// Base headers sent with every REST request.
    pub headers: Option<IndexMap<String, String>>,
    /// Configures the storage source.
    pub storage: bool,
    /// WebAssembly module file. Configures the WASM source.
    pub wasm: Option<String>,
    pub mock: MockSettings,
    /// Source used when an endpoint's shape does not pick one.
    pub default_source: Option<SourceKind>,
    pub cookies: CookieSettings,
}

impl SourcesSettings {
    /// Configured source kinds in routing priority order. REST is implied when nothing is configured.
    pub fn configured(&self) -> Vec<SourceKind> {
        let mut kinds = Vec::new();
        if self.url.is_some() {
            kinds.push(SourceKind::Rest);
        }
        if self.storage {
            kinds.push(SourceKind::Storage);
        }
        if self.wasm.is_some() {
            kinds.push(SourceKind::Wasm);
        }
        if kinds.is_empty() {
            kinds.push(SourceKind::Rest);
        }
        kinds
    }
}

/// Plugin-wide settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    pub endpoints: IndexMap<String, Endpoint>,
    /// Namespace the execution engine registers under.
    pub namespace: String,
    pub naming: NamingSettings,
    pub strict: bool,
    pub log_blocked_binds: bool,
    pub sources: SourcesSettings,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            endpoints: IndexMap::new(),
            namespace: default_engine_namespace(),
            naming: NamingSettings::default(),
            strict: false,
            log_blocked_binds: false,
            sources: SourcesSettings::default(),
        }
    }
}

impl PluginSettings {
    /// Applies `STATEBIND_BASE_URL` and `STATEBIND_STRICT` on top of the loaded values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var(BASE_URL_ENV)
            && !url.trim().is_empty()
        {
            self.sources.url = Some(url.trim().to_string());
        }
        if let Ok(strict) = env::var(STRICT_ENV) {
            self.strict = matches!(strict.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }
}

/// One store module as authored in a binding document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModuleDocument {
    pub namespace: Option<String>,
    pub state: Map<String, Value>,
    pub endpoints: IndexMap<String, Endpoint>,
    pub bindings: Option<IndexMap<String, BindingSpec>>,
    pub modules: IndexMap<String, ModuleDocument>,
}

/// Top-level binding document: plugin settings plus the modules to bind.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BindingDocument {
    pub plugin: PluginSettings,
    pub modules: IndexMap<String, ModuleDocument>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_the_plugin_contract() {
        let settings = PluginSettings::default();
        assert_eq!(settings.namespace, "bind");
        assert!(!settings.strict);
        assert_eq!(settings.sources.cookies, CookieSettings { expires: 720_000, path: "/".into() });
        assert_eq!(settings.sources.configured(), vec![SourceKind::Rest]);
    }

    #[test]
    fn mock_settings_accept_flag_or_selection() {
        let all: MockSettings = serde_json::from_value(json!(true)).expect("mock flag");
        assert!(all.mocks(SourceKind::Wasm));
        let selected: MockSettings = serde_json::from_value(json!({ "rest": true })).expect("mock selection");
        assert!(selected.mocks(SourceKind::Rest));
        assert!(!selected.mocks(SourceKind::Storage));
    }

    #[test]
    fn configured_sources_follow_settings() {
        let sources = SourcesSettings {
            url: Some("http://localhost".into()),
            storage: true,
            wasm: Some("application.wasm".into()),
            ..SourcesSettings::default()
        };
        assert_eq!(sources.configured(), vec![SourceKind::Rest, SourceKind::Storage, SourceKind::Wasm]);

        let storage_only = SourcesSettings {
            storage: true,
            ..SourcesSettings::default()
        };
        assert_eq!(storage_only.configured(), vec![SourceKind::Storage]);
    }

    #[test]
    fn env_overrides_replace_url_and_strict() {
        temp_env::with_vars([(BASE_URL_ENV, Some("http://override.test/api")), (STRICT_ENV, Some("true"))], || {
            let mut settings = PluginSettings::default();
            settings.apply_env_overrides();
            assert_eq!(settings.sources.url.as_deref(), Some("http://override.test/api"));
            assert!(settings.strict);
        });
    }

    #[test]
    fn parses_a_binding_document() {
        let document: BindingDocument = serde_yaml::from_str(
            r#"
plugin:
  strict: true
  sources:
    url: http://myapi.hppr.dev/api
  endpoints:
    users:
      type: array
modules:
  profile:
    namespace: profile
    state:
      username: ""
    bindings:
      users:
        bind: once
"#,
        )
        .expect("parse binding document");
        assert!(document.plugin.strict);
        assert_eq!(document.plugin.sources.url.as_deref(), Some("http://myapi.hppr.dev/api"));
        assert!(document.plugin.endpoints.contains_key("users"));
        let profile = &document.modules["profile"];
        assert_eq!(profile.namespace.as_deref(), Some("profile"));
        assert_eq!(profile.state.get("username"), Some(&json!("")));
        assert_eq!(profile.bindings.as_ref().map(IndexMap::len), Some(1));
    }
}
