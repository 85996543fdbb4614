//! Mock data source.
//!
//! Wraps another source and keeps its state, mutations and defaults, but answers every call from
//! the endpoint's `mock` value (or the default of the endpoint's result type) without any I/O.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use statebind_store::Mutation;
use statebind_types::Endpoint;
use tracing::debug;

use super::{DataSource, SourceArgs, unexpected_args};

/// Endpoint and resolved parameters of one mocked call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub endpoint: Endpoint,
    pub input_params: Map<String, Value>,
}

/// Produces the mocked response. `None` (or `null`) falls back to the result type default.
pub type MockTransform = Arc<dyn Fn(&MockCall) -> Option<Value> + Send + Sync>;

pub struct MockDataSource {
    inner: Arc<dyn DataSource>,
    transform: MockTransform,
}

impl MockDataSource {
    /// Mocks `inner` using each endpoint's `mock` field.
    pub fn new(inner: Arc<dyn DataSource>) -> Self {
        Self::with_transform(inner, |call: &MockCall| call.endpoint.mock.as_ref().map(|mock| mock.resolve(&call.input_params)))
    }

    pub fn with_transform<F>(inner: Arc<dyn DataSource>, transform: F) -> Self
    where
        F: Fn(&MockCall) -> Option<Value> + Send + Sync + 'static,
    {
        Self {
            inner,
            transform: Arc::new(transform),
        }
    }
}

#[async_trait]
impl DataSource for MockDataSource {
    fn kind(&self) -> &'static str {
        "mock"
    }

    fn state(&self) -> Map<String, Value> {
        self.inner.state()
    }

    fn mutations(&self) -> IndexMap<String, Mutation> {
        self.inner.mutations()
    }

    fn apply_defaults(&self, name: &str, endpoint: &mut Endpoint) {
        self.inner.apply_defaults(name, endpoint);
    }

    fn args(&self, _bind_state: &Value, params: &Map<String, Value>, endpoint: &Endpoint) -> anyhow::Result<SourceArgs> {
        Ok(SourceArgs::Mock(MockCall {
            endpoint: endpoint.clone(),
            input_params: params.clone(),
        }))
    }

    async fn module(&self, args: SourceArgs) -> anyhow::Result<Value> {
        let SourceArgs::Mock(call) = args else {
            return Err(unexpected_args("mock", &args));
        };
        let value = (self.transform)(&call)
            .filter(|value| !value.is_null())
            .unwrap_or_else(|| call.endpoint.result_type().default_value());
        debug!(inner = self.inner.kind(), "returning mocked response");
        Ok(value)
    }
}
