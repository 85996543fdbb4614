//! Plugin bootstrap.
//!
//! [`BindPlugin`] installs the engine into a store, subscribes to the store's mutation stream to
//! re-run watching bindings, and compiles bound modules against the same configuration.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use statebind_store::{ModuleDef, MutationRecord, Payload, Store, StoreError, SubscriptionId, state_at};
use statebind_types::{BindingDocument, PluginSettings};
use statebind_util::{Timers, spawn_detached};
use tracing::{debug, warn};

use crate::{
    accessors::Accessors,
    bind_module::{BindModule, WATCH_PARAMS},
    bound_store::{BoundStore, CompiledModule, ModuleConfig},
    config::PluginConfig,
    error::BindError,
    source::SourceServices,
};

/// Result of [`BindPlugin::bound_modules`] for one entry.
#[derive(Debug, Clone)]
pub enum BoundModule {
    /// Registered at its namespace.
    Compiled(CompiledModule),
    /// Registered at its key, unchanged.
    Plain(ModuleDef),
}

pub struct BindPlugin {
    config: Arc<PluginConfig>,
    timers: Arc<Timers>,
}

impl BindPlugin {
    pub fn new(config: PluginConfig) -> Self {
        Self {
            config: Arc::new(config),
            timers: Arc::new(Timers::new()),
        }
    }

    /// Builds the plugin with the default transports (reqwest, in-memory storage).
    pub fn from_settings(settings: &PluginSettings) -> anyhow::Result<Self> {
        Ok(Self::with_services(settings, &SourceServices::new()?))
    }

    pub fn with_services(settings: &PluginSettings, services: &SourceServices) -> Self {
        Self::new(PluginConfig::from_settings(settings, services))
    }

    pub fn config(&self) -> &Arc<PluginConfig> {
        &self.config
    }

    pub fn timers(&self) -> &Arc<Timers> {
        &self.timers
    }

    /// The engine module registered by [`install`](Self::install).
    pub fn engine_module(&self) -> ModuleDef {
        BindModule::new(self.config.clone(), self.timers.clone()).into_module()
    }

    /// Registers the engine under the configured namespace and subscribes to mutations.
    pub fn install(&self, store: &Store) -> Result<SubscriptionId, StoreError> {
        store.register_module(&self.config.namespace, self.engine_module())?;
        let engine_namespace = self.config.namespace.clone();
        let weak = store.downgrade();
        let subscription = store.subscribe(move |record: &MutationRecord, state: &Value| {
            let Some(actions) = state_at(state, &engine_namespace)
                .and_then(|engine| engine.get(WATCH_PARAMS))
                .and_then(|registry| registry.get(&record.r#type))
                .and_then(Value::as_array)
            else {
                return;
            };
            let Some(store) = weak.upgrade() else {
                return;
            };
            for action in actions.iter().filter_map(Value::as_str) {
                debug!(mutation = %record.r#type, action, "re-running watched binding");
                let pending = store.dispatch(action, Payload::Empty);
                spawn_detached("watched binding", async move { pending.await.map(|_| ()) });
            }
        });
        debug!(namespace = %self.config.namespace, "bind plugin installed");
        Ok(subscription)
    }

    /// Compiles one bound module against this plugin's configuration.
    pub fn bound_store(&self, module: ModuleConfig) -> Result<CompiledModule, BindError> {
        BoundStore::compile(&self.config, module)
    }

    /// Compiles every module that declares both a namespace and bindings and passes the rest
    /// through. Half-declared modules are passed through with a warning.
    pub fn bound_modules(&self, modules: IndexMap<String, ModuleConfig>) -> Result<IndexMap<String, BoundModule>, BindError> {
        let mut bound = IndexMap::new();
        for (key, module) in modules {
            let entry = match (module.namespace.is_some(), module.is_bound()) {
                (true, true) => BoundModule::Compiled(self.bound_store(module)?),
                (false, false) => BoundModule::Plain(module.into_module_def()),
                (false, true) => {
                    warn!(module = %key, "Module {key} has bindings but is missing namespace");
                    BoundModule::Plain(module.into_module_def())
                }
                (true, false) => {
                    warn!(module = %key, "Module {key} has namespace but is missing bindings");
                    BoundModule::Plain(module.into_module_def())
                }
            };
            bound.insert(key, entry);
        }
        Ok(bound)
    }

    /// Compiles `modules` and registers them: compiled modules at their namespace, plain ones at
    /// their key.
    pub fn register_modules(&self, store: &Store, modules: IndexMap<String, ModuleConfig>) -> anyhow::Result<()> {
        for (key, module) in self.bound_modules(modules)? {
            match module {
                BoundModule::Compiled(compiled) => compiled.register(store)?,
                BoundModule::Plain(def) => store.register_module(&key, def)?,
            }
        }
        Ok(())
    }

    /// Builds a store from a binding document: installs the plugin and registers every module.
    pub fn from_document(document: BindingDocument, services: &SourceServices) -> anyhow::Result<(Self, Store)> {
        let plugin = Self::with_services(&document.plugin, services);
        let store = Store::new();
        plugin.install(&store)?;
        let modules = document.modules.into_iter().map(|(key, module)| (key, ModuleConfig::from(module))).collect();
        plugin.register_modules(&store, modules)?;
        Ok((plugin, store))
    }

    pub fn accessors(&self, store: &Store) -> Accessors {
        Accessors::new(store.clone(), self.config.naming.clone())
    }
}
