//! Data sources.
//!
//! A data source is the only part of the engine that talks to the outside world. The engine
//! treats every transport the same way:
//!
//! 1. `state()` / `mutations()` are merged into the engine module at install time,
//! 2. `apply_defaults(name, endpoint)` fills locator fields from the endpoint name,
//! 3. `args(bind_state, params, endpoint)` builds the call,
//! 4. `module(args)` performs it,
//! 5. `assign(response)` unwraps the raw response into the value that gets committed.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use statebind_store::Mutation;
use statebind_types::{Endpoint, SourceKind, SourcesSettings};
use statebind_util::{HttpTransport, ReqwestTransport, RestRequest, StorageBackend, StorageRequest};

pub mod mock;
pub mod multi;
pub mod rest;
pub mod storage;
pub mod wasm;

pub use mock::{MockCall, MockDataSource, MockTransform};
pub use multi::MultiDataSource;
pub use rest::RestDataSource;
pub use storage::StorageDataSource;
pub use wasm::{DEFAULT_WASM_FILE, UnsupportedWasm, WasmCall, WasmDataSource, WasmInvoker};

#[cfg(feature = "wasmtime")]
pub use wasm::WasmtimeInvoker;

/// Source-specific call produced by [`DataSource::args`].
#[derive(Debug, Clone)]
pub enum SourceArgs {
    Rest(RestRequest),
    Storage(StorageRequest),
    Wasm(WasmCall),
    Mock(MockCall),
    /// Call addressed to one sub-source of a [`MultiDataSource`].
    Routed { source: SourceKind, args: Box<SourceArgs> },
}

impl SourceArgs {
    pub fn variant(&self) -> &'static str {
        match self {
            Self::Rest(_) => "rest",
            Self::Storage(_) => "storage",
            Self::Wasm(_) => "wasm",
            Self::Mock(_) => "mock",
            Self::Routed { .. } => "routed",
        }
    }
}

/// Uniform contract every transport satisfies.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Short name used in logs.
    fn kind(&self) -> &'static str;

    /// State fields merged into the engine module.
    fn state(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Mutations merged into the engine module.
    fn mutations(&self) -> IndexMap<String, Mutation> {
        IndexMap::new()
    }

    /// Fills absent endpoint fields. Must be idempotent and never overwrite authored values.
    fn apply_defaults(&self, _name: &str, endpoint: &mut Endpoint) {
        endpoint.apply_base_defaults();
    }

    /// Builds the call for `module` from the engine state, the resolved parameters (keyed by
    /// endpoint parameter name) and the endpoint.
    fn args(&self, bind_state: &Value, params: &Map<String, Value>, endpoint: &Endpoint) -> anyhow::Result<SourceArgs>;

    /// Performs the call.
    async fn module(&self, args: SourceArgs) -> anyhow::Result<Value>;

    /// Unwraps a raw response into the committed value.
    fn assign(&self, response: Value) -> Value {
        response
    }
}

pub(crate) fn unexpected_args(source: &str, args: &SourceArgs) -> anyhow::Error {
    anyhow::anyhow!("{source} data source cannot execute {} arguments", args.variant())
}

/// Transports shared by the sources built from settings.
#[derive(Clone)]
pub struct SourceServices {
    pub http: Arc<dyn HttpTransport>,
    pub storage: Arc<StorageBackend>,
    pub wasm: Arc<dyn WasmInvoker>,
}

impl SourceServices {
    /// reqwest transport, in-memory storage, no WebAssembly runtime.
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            http: Arc::new(ReqwestTransport::new()?),
            storage: Arc::new(StorageBackend::in_memory()),
            wasm: Arc::new(UnsupportedWasm),
        })
    }

    pub fn with_http(mut self, http: Arc<dyn HttpTransport>) -> Self {
        self.http = http;
        self
    }

    pub fn with_storage(mut self, storage: Arc<StorageBackend>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_wasm(mut self, wasm: Arc<dyn WasmInvoker>) -> Self {
        self.wasm = wasm;
        self
    }
}

/// Builds the data source described by `settings`.
///
/// Every configured source is wrapped in a mock when selected. A single configured source is
/// returned as is; several are combined into a [`MultiDataSource`].
pub fn build_data_source(settings: &SourcesSettings, services: &SourceServices) -> Arc<dyn DataSource> {
    let mut sources: IndexMap<SourceKind, Arc<dyn DataSource>> = IndexMap::new();
    for kind in settings.configured() {
        let source: Arc<dyn DataSource> = match kind {
            SourceKind::Rest => {
                let mut rest = RestDataSource::new(services.http.clone()).with_url(settings.url.clone().unwrap_or_default());
                if let Some(headers) = &settings.headers {
                    rest = rest.with_headers(headers.clone());
                }
                Arc::new(rest)
            }
            SourceKind::Storage => Arc::new(StorageDataSource::new(services.storage.clone()).with_cookies(settings.cookies.clone())),
            SourceKind::Wasm => {
                let mut wasm = WasmDataSource::new(services.wasm.clone());
                if let Some(file) = settings.wasm.clone().filter(|file| !file.is_empty()) {
                    wasm = wasm.with_file(file);
                }
                Arc::new(wasm)
            }
        };
        let source = if settings.mock.mocks(kind) {
            Arc::new(MockDataSource::new(source)) as Arc<dyn DataSource>
        } else {
            source
        };
        sources.insert(kind, source);
    }

    if sources.len() == 1
        && let Some((_, source)) = sources.pop()
    {
        return source;
    }

    let default = settings
        .default_source
        .filter(|kind| sources.contains_key(kind))
        .or_else(|| sources.keys().next().copied())
        .unwrap_or(SourceKind::Rest);
    Arc::new(MultiDataSource::new(sources, default))
}
