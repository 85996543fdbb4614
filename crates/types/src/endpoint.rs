//! Endpoint descriptors.
//!
//! An [`Endpoint`] describes where a binding reads its value from. Which locator fields matter
//! depends on the data source handling it: REST uses `url`/`method`/`headers`, storage uses
//! `key`/`scope`, WebAssembly uses `func`/`order`. Data sources fill missing fields through their
//! `apply_defaults` hook; after that the endpoint is treated as immutable.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::value_type::TypeSpec;

/// Post-processing applied to a fetched value.
#[derive(Clone)]
pub struct Transform(Arc<dyn Fn(Value) -> Value + Send + Sync>);

impl Transform {
    pub fn new<F>(transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(transform))
    }

    pub fn apply(&self, value: Value) -> Value {
        (self.0)(value)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transform(..)")
    }
}

type UrlBuilder = Arc<dyn Fn(&Map<String, Value>) -> String + Send + Sync>;

/// REST locator. Either a fixed path or a function of the resolved parameters.
#[derive(Clone)]
pub enum EndpointUrl {
    Static(String),
    Computed(UrlBuilder),
}

impl EndpointUrl {
    pub fn computed<F>(builder: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> String + Send + Sync + 'static,
    {
        Self::Computed(Arc::new(builder))
    }

    pub fn render(&self, params: &Map<String, Value>) -> String {
        match self {
            Self::Static(url) => url.clone(),
            Self::Computed(builder) => builder(params),
        }
    }
}

impl fmt::Debug for EndpointUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(url) => f.debug_tuple("Static").field(url).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl From<&str> for EndpointUrl {
    fn from(url: &str) -> Self {
        Self::Static(url.to_string())
    }
}

impl<'de> Deserialize<'de> for EndpointUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::Static)
    }
}

type MockBuilder = Arc<dyn Fn(&Map<String, Value>) -> Value + Send + Sync>;

/// Canned response used by mock data sources.
#[derive(Clone)]
pub enum MockData {
    Value(Value),
    Computed(MockBuilder),
}

impl MockData {
    pub fn computed<F>(builder: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Value + Send + Sync + 'static,
    {
        Self::Computed(Arc::new(builder))
    }

    pub fn resolve(&self, params: &Map<String, Value>) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Computed(builder) => builder(params),
        }
    }
}

impl fmt::Debug for MockData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl<'de> Deserialize<'de> for MockData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::Value)
    }
}

/// Data source family an endpoint is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Rest,
    Storage,
    Wasm,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Storage => "storage",
            Self::Wasm => "wasm",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage area used by storage endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageScope {
    #[default]
    Local,
    Session,
    Cookie,
}

/// Named resource descriptor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub url: Option<EndpointUrl>,
    pub method: Option<String>,
    pub headers: Option<IndexMap<String, String>>,
    pub key: Option<String>,
    pub scope: Option<StorageScope>,
    pub func: Option<String>,
    pub order: Option<Vec<String>>,
    pub params: Option<IndexMap<String, TypeSpec>>,
    #[serde(rename = "type")]
    pub r#type: Option<TypeSpec>,
    pub source: Option<SourceKind>,
    pub mock: Option<MockData>,
    #[serde(skip)]
    pub transform: Option<Transform>,
}

impl Endpoint {
    /// REST endpoint at a fixed path.
    pub fn rest(url: impl Into<String>) -> Self {
        Self {
            url: Some(EndpointUrl::Static(url.into())),
            ..Self::default()
        }
    }

    /// Storage endpoint under the given key.
    pub fn storage(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    /// WebAssembly endpoint calling an exported function.
    pub fn wasm(func: impl Into<String>) -> Self {
        Self {
            func: Some(func.into()),
            ..Self::default()
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, spec: TypeSpec) -> Self {
        self.params.get_or_insert_with(IndexMap::new).insert(name.into(), spec);
        self
    }

    pub fn with_type(mut self, spec: TypeSpec) -> Self {
        self.r#type = Some(spec);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.get_or_insert_with(IndexMap::new).insert(name.into(), value.into());
        self
    }

    pub fn with_mock(mut self, mock: MockData) -> Self {
        self.mock = Some(mock);
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Declared result type, `object` when absent.
    pub fn result_type(&self) -> TypeSpec {
        self.r#type.clone().unwrap_or_default()
    }

    /// Fills the fields every data source relies on. Never overwrites.
    pub fn apply_base_defaults(&mut self) {
        self.params.get_or_insert_with(IndexMap::new);
        self.r#type.get_or_insert_with(TypeSpec::default);
    }
}
