//! Routing across several data sources.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use statebind_store::Mutation;
use statebind_types::{Endpoint, SourceKind};
use tracing::debug;

use super::{DataSource, SourceArgs};

/// Dispatches each endpoint to one of several configured sources.
///
/// The target is the endpoint's explicit `source` when that source is configured, otherwise it is
/// inferred from the endpoint's shape: `url`/`method` pick REST, `key`/`scope` pick storage and
/// `func` picks WebAssembly. Anything else goes to the default source.
pub struct MultiDataSource {
    sources: IndexMap<SourceKind, Arc<dyn DataSource>>,
    default: SourceKind,
}

impl MultiDataSource {
    pub fn new(sources: IndexMap<SourceKind, Arc<dyn DataSource>>, default: SourceKind) -> Self {
        Self { sources, default }
    }

    pub fn default_source(&self) -> SourceKind {
        self.default
    }

    /// Source kind the endpoint will be routed to.
    pub fn route(&self, endpoint: &Endpoint) -> SourceKind {
        let inferred = endpoint.source.or_else(|| {
            if endpoint.url.is_some() || endpoint.method.is_some() {
                Some(SourceKind::Rest)
            } else if endpoint.key.is_some() || endpoint.scope.is_some() {
                Some(SourceKind::Storage)
            } else if endpoint.func.is_some() {
                Some(SourceKind::Wasm)
            } else {
                None
            }
        });
        inferred.filter(|kind| self.sources.contains_key(kind)).unwrap_or(self.default)
    }

    fn source(&self, kind: SourceKind) -> anyhow::Result<&Arc<dyn DataSource>> {
        self.sources
            .get(&kind)
            .ok_or_else(|| anyhow::anyhow!("data source '{kind}' is not configured"))
    }
}

#[async_trait]
impl DataSource for MultiDataSource {
    fn kind(&self) -> &'static str {
        "multi"
    }

    fn state(&self) -> Map<String, Value> {
        let mut state = Map::new();
        for source in self.sources.values() {
            state.extend(source.state());
        }
        state
    }

    fn mutations(&self) -> IndexMap<String, Mutation> {
        let mut mutations = IndexMap::new();
        for source in self.sources.values() {
            mutations.extend(source.mutations());
        }
        mutations
    }

    /// Records the chosen source on the endpoint, then applies that source's defaults.
    fn apply_defaults(&self, name: &str, endpoint: &mut Endpoint) {
        let kind = self.route(endpoint);
        endpoint.source.get_or_insert(kind);
        match self.sources.get(&kind) {
            Some(source) => source.apply_defaults(name, endpoint),
            None => endpoint.apply_base_defaults(),
        }
    }

    fn args(&self, bind_state: &Value, params: &Map<String, Value>, endpoint: &Endpoint) -> anyhow::Result<SourceArgs> {
        let kind = self.route(endpoint);
        let args = self.source(kind)?.args(bind_state, params, endpoint)?;
        Ok(SourceArgs::Routed {
            source: kind,
            args: Box::new(args),
        })
    }

    /// Runs the routed call and unwraps it with the routed source's `assign`.
    async fn module(&self, args: SourceArgs) -> anyhow::Result<Value> {
        let SourceArgs::Routed { source: kind, args } = args else {
            anyhow::bail!("multi data source expects routed arguments, got {}", args.variant());
        };
        debug!(source = %kind, "routing bound call");
        let source = self.source(kind)?;
        let response = source.module(*args).await?;
        Ok(source.assign(response))
    }
}
