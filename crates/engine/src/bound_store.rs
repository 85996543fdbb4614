//! Binding compiler.
//!
//! [`BoundStore::compile`] turns a module declaration with bindings into a plain store module:
//! state fields and update mutations for outputs and parameters, loading flags, one load (or
//! trigger) action per binding and a `start_bind` action that wires everything up. Authored
//! state, mutations and actions always win over generated ones.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use statebind_store::{Action, ActionContext, Getter, ModuleDef, Mutation, Payload, Store, StoreError, action, mutation, qualify};
use statebind_types::{BindMode, BindingSpec, Endpoint, EndpointRef, LoadingMode, ModuleDocument};
use tracing::{debug, warn};

use crate::{
    bind_module::{ADD_BOUND_STORE, BIND, RESET, WATCH_PARAMS},
    binding::{BindPayload, Binding, BindingNames, DEFAULT_WATCH_PERIOD},
    config::PluginConfig,
    error::BindError,
    params::map_endpoint_types,
};

/// Action every bound module exposes to start its bindings.
pub const START_BIND: &str = "start_bind";

/// Module declaration accepted by the compiler.
///
/// A module is bound when it has a `bindings` table; `namespace` is required for bound top-level
/// modules and derived from the path for nested ones.
#[derive(Clone, Default)]
pub struct ModuleConfig {
    pub namespace: Option<String>,
    pub state: Map<String, Value>,
    pub mutations: IndexMap<String, Mutation>,
    pub actions: IndexMap<String, Action>,
    pub getters: IndexMap<String, Getter>,
    pub endpoints: IndexMap<String, Endpoint>,
    pub bindings: Option<IndexMap<String, BindingSpec>>,
    pub modules: IndexMap<String, ModuleConfig>,
}

impl ModuleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound module with no bindings yet.
    pub fn bound(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            bindings: Some(IndexMap::new()),
            ..Self::default()
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bindings.is_some()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_binding(mut self, output: impl Into<String>, binding: BindingSpec) -> Self {
        self.bindings.get_or_insert_with(IndexMap::new).insert(output.into(), binding);
        self
    }

    pub fn with_endpoint(mut self, name: impl Into<String>, endpoint: Endpoint) -> Self {
        self.endpoints.insert(name.into(), endpoint);
        self
    }

    pub fn with_state(mut self, name: impl Into<String>, value: Value) -> Self {
        self.state.insert(name.into(), value);
        self
    }

    pub fn with_mutation<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut Map<String, Value>, Value) + Send + Sync + 'static,
    {
        self.mutations.insert(name.into(), mutation(handler));
        self
    }

    pub fn with_action(mut self, name: impl Into<String>, handler: Action) -> Self {
        self.actions.insert(name.into(), handler);
        self
    }

    pub fn with_getter(mut self, name: impl Into<String>, handler: Getter) -> Self {
        self.getters.insert(name.into(), handler);
        self
    }

    pub fn with_module(mut self, name: impl Into<String>, module: ModuleConfig) -> Self {
        self.modules.insert(name.into(), module);
        self
    }

    /// The module as is, ignoring bindings and endpoints.
    pub fn into_module_def(self) -> ModuleDef {
        ModuleDef {
            state: self.state,
            mutations: self.mutations,
            actions: self.actions,
            getters: self.getters,
            modules: self.modules.into_iter().map(|(name, module)| (name, module.into_module_def())).collect(),
        }
    }
}

impl From<ModuleDocument> for ModuleConfig {
    fn from(document: ModuleDocument) -> Self {
        Self {
            namespace: document.namespace,
            state: document.state,
            endpoints: document.endpoints,
            bindings: document.bindings,
            modules: document.modules.into_iter().map(|(name, module)| (name, Self::from(module))).collect(),
            ..Self::default()
        }
    }
}

/// Output of the compiler: a store module plus the compiled bindings of its top level.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub namespace: String,
    pub module: ModuleDef,
    pub bindings: IndexMap<String, Arc<Binding>>,
}

impl CompiledModule {
    pub fn binding(&self, output: &str) -> Option<&Arc<Binding>> {
        self.bindings.get(output)
    }

    /// Registers the module at its namespace.
    pub fn register(self, store: &Store) -> Result<(), StoreError> {
        store.register_module(&self.namespace, self.module)
    }
}

/// Compiler state for one bound module.
pub struct BoundStore<'a> {
    config: &'a PluginConfig,
    namespace: String,
    endpoints: IndexMap<String, Endpoint>,
    def: ModuleDef,
    bindings: IndexMap<String, Arc<Binding>>,
    load_actions: Vec<String>,
    watch_defs: IndexMap<String, Vec<String>>,
    commit_on_start: Vec<String>,
}

impl<'a> BoundStore<'a> {
    /// Compiles a bound module. The module must declare its namespace.
    pub fn compile(config: &'a PluginConfig, module: ModuleConfig) -> Result<CompiledModule, BindError> {
        let namespace = module.namespace.clone().ok_or(BindError::MissingNamespace)?;
        Self::compile_at(config, namespace, module)
    }

    fn compile_at(config: &'a PluginConfig, namespace: String, module: ModuleConfig) -> Result<CompiledModule, BindError> {
        let ModuleConfig {
            state,
            mutations,
            actions,
            getters,
            endpoints,
            bindings,
            modules,
            ..
        } = module;

        let mut compiler = Self {
            config,
            namespace,
            endpoints,
            def: ModuleDef {
                state,
                mutations,
                actions,
                getters,
                modules: IndexMap::new(),
            },
            bindings: IndexMap::new(),
            load_actions: Vec::new(),
            watch_defs: IndexMap::new(),
            commit_on_start: Vec::new(),
        };

        for (output, spec) in bindings.unwrap_or_default() {
            compiler.add_binding(output, spec)?;
        }
        compiler.add_start_bind();

        for (key, child) in modules {
            let child = build_child(config, &compiler.namespace, &key, child)?;
            compiler.def.modules.insert(key, child);
        }

        debug!(
            namespace = %compiler.namespace,
            bindings = compiler.bindings.len(),
            "compiled bound store"
        );
        Ok(CompiledModule {
            namespace: compiler.namespace,
            module: compiler.def,
            bindings: compiler.bindings,
        })
    }

    fn add_binding(&mut self, output: String, mut spec: BindingSpec) -> Result<(), BindError> {
        spec.apply_defaults(&output);
        let mode = self.bind_mode(&output, &spec)?;
        let Some((endpoint_name, mut endpoint)) = self.resolve_endpoint(&output, &spec)? else {
            return Ok(());
        };
        self.config.data_source.apply_defaults(&endpoint_name, &mut endpoint);

        let param_map = spec.param_map.unwrap_or_default();
        let type_map = endpoint.params.clone().unwrap_or_default();
        let binding = Arc::new(Binding {
            names: BindingNames::new(self.config.naming.as_ref(), &output, mode),
            params: map_endpoint_types(&param_map, &type_map),
            output: output.clone(),
            endpoint_name,
            endpoint: Arc::new(endpoint),
            mode,
            create_params: spec.create_params.unwrap_or(true),
            redirect: spec.redirect,
            side_effect: spec.side_effect,
            loading: spec.loading,
            period: spec.period.map(Duration::from_millis).unwrap_or(DEFAULT_WATCH_PERIOD),
            transform: spec.transform,
        });

        self.generate(&binding);
        self.bindings.insert(output, binding);
        Ok(())
    }

    fn bind_mode(&self, output: &str, spec: &BindingSpec) -> Result<BindMode, BindError> {
        let raw = spec.bind.as_deref().unwrap_or(BindMode::Once.as_str());
        match raw.parse::<BindMode>() {
            Ok(mode) => Ok(mode),
            Err(_) if self.config.strict => Err(BindError::InvalidBindMode {
                output: output.to_string(),
                mode: raw.to_string(),
            }),
            Err(_) => {
                warn!(namespace = %self.namespace, output, mode = raw, "Unrecognized bind mode; binding once");
                Ok(BindMode::Once)
            }
        }
    }

    /// Module table first, then the plugin table. Inline endpoints are named after the output.
    fn resolve_endpoint(&self, output: &str, spec: &BindingSpec) -> Result<Option<(String, Endpoint)>, BindError> {
        let name = match &spec.endpoint {
            Some(EndpointRef::Inline(endpoint)) => return Ok(Some((output.to_string(), endpoint.as_ref().clone()))),
            Some(EndpointRef::Named(name)) => name.clone(),
            None => output.to_string(),
        };
        let found = self.endpoints.get(&name).or_else(|| self.config.endpoints.get(&name));
        match found {
            Some(endpoint) => Ok(Some((name, endpoint.clone()))),
            None if self.config.strict => Err(BindError::UnknownEndpoint {
                output: output.to_string(),
                endpoint: name,
            }),
            None => {
                warn!(namespace = %self.namespace, output, endpoint = %name, "Binding refers to unknown endpoint; skipping");
                Ok(None)
            }
        }
    }

    fn generate(&mut self, binding: &Arc<Binding>) {
        if binding.redirect.is_none() && !binding.params.contains_key(&binding.output) {
            self.create_field(&binding.output, binding.endpoint.result_type().default_value());
        }
        if binding.create_params {
            for (local, param) in &binding.params {
                if param.computed.is_none() {
                    self.create_field(local, param.spec.default_value());
                }
            }
        }

        if binding.loading.is_enabled() {
            let flag = binding.names.loading.clone();
            self.def.state.entry(flag.clone()).or_insert(Value::Bool(false));
            self.def
                .mutations
                .entry(binding.names.loading.clone())
                .or_insert_with(|| set_flag(flag.clone(), true));
            self.def
                .mutations
                .entry(binding.names.done.clone())
                .or_insert_with(|| set_flag(flag, false));
            if binding.loading == LoadingMode::OnStart {
                self.commit_on_start.push(binding.names.loading.clone());
            }
        }

        if binding.mode.watches_params() {
            self.watch_defs.insert(binding.output.clone(), binding.watched_fields());
        }
        if !binding.is_trigger() {
            self.load_actions.push(binding.names.action.clone());
        }

        let load = Arc::new(LoadSpec {
            payload: Arc::new(BindPayload::new(binding.clone(), self.namespace.clone())),
            engine_bind: qualify(&self.config.namespace, BIND),
            loading: (binding.loading == LoadingMode::Each).then(|| binding.names.loading.clone()),
        });
        self.def
            .actions
            .entry(binding.names.action.clone())
            .or_insert_with(|| action(move |ctx, _payload| run_load(ctx, load.clone())));
    }

    fn create_field(&mut self, name: &str, default: Value) {
        self.def.state.entry(name.to_string()).or_insert(default);
        self.def
            .mutations
            .entry(self.config.naming.update(name))
            .or_insert_with(|| set_field(name.to_string()));
    }

    fn add_start_bind(&mut self) {
        let registrations: Vec<(String, Vec<String>)> = self
            .watch_defs
            .iter()
            .filter_map(|(output, fields)| {
                let binding = self.bindings.get(output)?;
                let mutations: Vec<String> = fields
                    .iter()
                    .map(|field| qualify(&self.namespace, &self.config.naming.update(field)))
                    .collect();
                Some((qualify(&self.namespace, &binding.names.action), mutations))
            })
            .collect();
        let start = Arc::new(StartSpec {
            namespace: self.namespace.clone(),
            engine_namespace: self.config.namespace.clone(),
            strict: self.config.strict,
            start_lock: self.config.start_lock.clone(),
            registrations,
            commit_on_start: self.commit_on_start.clone(),
            load_actions: self.load_actions.clone(),
        });
        self.def
            .actions
            .entry(START_BIND.to_string())
            .or_insert_with(|| action(move |ctx, _payload| run_start_bind(ctx, start.clone())));
    }
}

/// Nested modules are compiled at `parent/key` when bound and passed through otherwise.
fn build_child(config: &PluginConfig, parent: &str, key: &str, child: ModuleConfig) -> Result<ModuleDef, BindError> {
    let path = qualify(parent, key);
    if let Some(namespace) = &child.namespace
        && *namespace != path
    {
        warn!(namespace = %namespace, path = %path, "Nested module namespace ignored; using its path");
    }
    if child.is_bound() {
        return Ok(BoundStore::compile_at(config, path, child)?.module);
    }

    let ModuleConfig {
        state,
        mutations,
        actions,
        getters,
        modules,
        ..
    } = child;
    let mut def = ModuleDef {
        state,
        mutations,
        actions,
        getters,
        modules: IndexMap::new(),
    };
    for (name, grandchild) in modules {
        let built = build_child(config, &path, &name, grandchild)?;
        def.modules.insert(name, built);
    }
    Ok(def)
}

fn set_field(field: String) -> Mutation {
    mutation(move |state, value| {
        state.insert(field.clone(), value);
    })
}

fn set_flag(field: String, flag: bool) -> Mutation {
    mutation(move |state, _| {
        state.insert(field.clone(), Value::Bool(flag));
    })
}

struct LoadSpec {
    payload: Arc<BindPayload>,
    engine_bind: String,
    /// Loading flag raised before every load (`loading: each`).
    loading: Option<String>,
}

async fn run_load(ctx: ActionContext, spec: Arc<LoadSpec>) -> anyhow::Result<Value> {
    if let Some(flag) = &spec.loading {
        ctx.commit(flag, Value::Bool(true))?;
    }
    ctx.dispatch_root(&spec.engine_bind, Payload::Shared(spec.payload.clone())).await
}

struct StartSpec {
    namespace: String,
    engine_namespace: String,
    strict: bool,
    start_lock: Arc<Mutex<()>>,
    /// `(qualified load action, qualified update mutations)` per watching binding.
    registrations: Vec<(String, Vec<String>)>,
    commit_on_start: Vec<String>,
    load_actions: Vec<String>,
}

/// Checks the double-bind guard and marks the namespace as bound in one step.
fn claim_namespace(ctx: &ActionContext, spec: &StartSpec) -> anyhow::Result<()> {
    let _guard = spec.start_lock.lock().unwrap_or_else(PoisonError::into_inner);
    let engine_state = ctx.store().module_state(&spec.engine_namespace).unwrap_or(Value::Null);
    let already_bound = engine_state
        .get("bound_stores")
        .and_then(Value::as_array)
        .is_some_and(|bound| bound.iter().any(|name| name.as_str() == Some(spec.namespace.as_str())));
    if already_bound {
        if spec.strict {
            return Err(BindError::AlreadyBound {
                action: qualify(&spec.namespace, START_BIND),
                reset: qualify(&spec.engine_namespace, RESET),
            }
            .into());
        }
        debug!(namespace = %spec.namespace, "start_bind on an already bound namespace");
    }
    ctx.commit_root(&qualify(&spec.engine_namespace, ADD_BOUND_STORE), json!({ "name": spec.namespace }))?;
    Ok(())
}

async fn run_start_bind(ctx: ActionContext, spec: Arc<StartSpec>) -> anyhow::Result<Value> {
    claim_namespace(&ctx, &spec)?;
    for (load_action, mutations) in &spec.registrations {
        ctx.commit_root(
            &qualify(&spec.engine_namespace, WATCH_PARAMS),
            json!({ "mutations": mutations, "action": load_action }),
        )?;
    }
    for flag in &spec.commit_on_start {
        ctx.commit(flag, Value::Bool(true))?;
    }

    let mut last = Value::Null;
    for load_action in &spec.load_actions {
        last = ctx.dispatch(load_action, Payload::Empty).await?;
    }
    Ok(last)
}
