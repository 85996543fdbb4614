//! Plugin configuration.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use indexmap::IndexMap;
use statebind_types::{DEFAULT_ENGINE_NAMESPACE, Endpoint, Naming, PluginSettings, SnakeCase};

use crate::source::{DataSource, SourceServices, build_data_source};

/// Everything the compiler and the engine need, passed explicitly to both.
#[derive(Clone)]
pub struct PluginConfig {
    /// Plugin-wide endpoint table. Module tables are searched first.
    pub endpoints: IndexMap<String, Endpoint>,
    /// Namespace the engine module is registered under.
    pub namespace: String,
    pub naming: Arc<dyn Naming>,
    /// Turns configuration mistakes into errors and enables type warnings.
    pub strict: bool,
    /// Logs bindings skipped because a parameter is unset.
    pub log_blocked_binds: bool,
    pub data_source: Arc<dyn DataSource>,
    /// Serializes the double-bind check with the `add_bound_store` commit across `start_bind`s.
    pub(crate) start_lock: Arc<Mutex<()>>,
}

impl PluginConfig {
    pub fn new(data_source: Arc<dyn DataSource>) -> Self {
        Self {
            endpoints: IndexMap::new(),
            namespace: DEFAULT_ENGINE_NAMESPACE.to_string(),
            naming: Arc::new(SnakeCase::default()),
            strict: false,
            log_blocked_binds: false,
            data_source,
            start_lock: Arc::default(),
        }
    }

    /// Builds the configuration and its data source from serialized settings.
    pub fn from_settings(settings: &PluginSettings, services: &SourceServices) -> Self {
        Self {
            endpoints: settings.endpoints.clone(),
            namespace: settings.namespace.clone(),
            naming: settings.naming.build(),
            strict: settings.strict,
            log_blocked_binds: settings.log_blocked_binds,
            data_source: build_data_source(&settings.sources, services),
            start_lock: Arc::default(),
        }
    }

    pub fn with_endpoint(mut self, name: impl Into<String>, endpoint: Endpoint) -> Self {
        self.endpoints.insert(name.into(), endpoint);
        self
    }

    pub fn with_endpoints(mut self, endpoints: IndexMap<String, Endpoint>) -> Self {
        self.endpoints.extend(endpoints);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_naming(mut self, naming: Arc<dyn Naming>) -> Self {
        self.naming = naming;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn log_blocked_binds(mut self, log: bool) -> Self {
        self.log_blocked_binds = log;
        self
    }
}

impl fmt::Debug for PluginConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginConfig")
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .field("namespace", &self.namespace)
            .field("naming", &self.naming)
            .field("strict", &self.strict)
            .field("log_blocked_binds", &self.log_blocked_binds)
            .field("data_source", &self.data_source.kind())
            .finish()
    }
}
