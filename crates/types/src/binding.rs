//! Binding declarations.
//!
//! A [`BindingSpec`] is the authored description of how one output state field gets populated.
//! It references an endpoint, picks a [`BindMode`] and maps local state fields onto endpoint
//! parameters. Defaults are applied once, when the owning module is compiled.

use std::{fmt, str::FromStr, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::endpoint::{Endpoint, Transform};

/// When a binding is (re)loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindMode {
    /// Fetched once by `start_bind`.
    Once,
    /// Fetched by `start_bind`, then polled on an interval and refetched on parameter change.
    Watch,
    /// Fetched by `start_bind`, then refetched whenever a parameter changes.
    Change,
    /// Only fetched when its trigger action is dispatched.
    Trigger,
}

impl BindMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Watch => "watch",
            Self::Change => "change",
            Self::Trigger => "trigger",
        }
    }

    /// Modes whose parameters re-trigger the load action when they change.
    pub fn watches_params(self) -> bool {
        matches!(self, Self::Watch | Self::Change)
    }
}

impl fmt::Display for BindMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized bind mode '{0}'")]
pub struct UnknownBindMode(pub String);

impl FromStr for BindMode {
    type Err = UnknownBindMode;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode {
            "once" => Ok(Self::Once),
            "watch" => Ok(Self::Watch),
            "change" => Ok(Self::Change),
            "trigger" => Ok(Self::Trigger),
            other => Err(UnknownBindMode(other.to_string())),
        }
    }
}

/// Loading-flag tracking for a binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadingMode {
    #[default]
    Off,
    /// Flag raised by `start_bind`, cleared after the first load.
    OnStart,
    /// Flag raised every time the load or trigger action runs.
    Each,
}

impl LoadingMode {
    pub fn is_enabled(self) -> bool {
        !matches!(self, Self::Off)
    }
}

impl<'de> Deserialize<'de> for LoadingMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Mode(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(false) => Ok(Self::Off),
            Raw::Flag(true) => Ok(Self::OnStart),
            Raw::Mode(mode) if mode == "each" => Ok(Self::Each),
            Raw::Mode(other) => Err(serde::de::Error::custom(format!("unsupported loading mode '{other}', expected a boolean or \"each\""))),
        }
    }
}

/// Endpoint reference: a name in an endpoint table or an inline definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EndpointRef {
    Named(String),
    Inline(Box<Endpoint>),
}

impl From<&str> for EndpointRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<Endpoint> for EndpointRef {
    fn from(endpoint: Endpoint) -> Self {
        Self::Inline(Box::new(endpoint))
    }
}

type ComputeFn = Arc<dyn Fn(&Value, &Map<String, Value>) -> Value + Send + Sync>;

/// Parameter value derived from module state and getters instead of a single field.
#[derive(Clone)]
pub struct ComputedParam {
    compute: ComputeFn,
    /// State fields whose updates should re-trigger watching bindings.
    pub watch: Vec<String>,
}

impl ComputedParam {
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn(&Value, &Map<String, Value>) -> Value + Send + Sync + 'static,
    {
        Self {
            compute: Arc::new(compute),
            watch: Vec::new(),
        }
    }

    pub fn watching<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.watch = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Evaluates against the module's state and its evaluated getters.
    pub fn compute(&self, local_state: &Value, getters: &Map<String, Value>) -> Value {
        (self.compute)(local_state, getters)
    }
}

impl fmt::Debug for ComputedParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedParam").field("watch", &self.watch).finish_non_exhaustive()
    }
}

/// One `param_map` entry.
///
/// `Field` maps a local state field onto the named endpoint parameter. `Computed` entries are keyed
/// by the endpoint parameter they produce.
#[derive(Debug, Clone)]
pub enum ParamSource {
    Field(String),
    Computed(ComputedParam),
}

impl From<&str> for ParamSource {
    fn from(param: &str) -> Self {
        Self::Field(param.to_string())
    }
}

impl From<ComputedParam> for ParamSource {
    fn from(computed: ComputedParam) -> Self {
        Self::Computed(computed)
    }
}

impl<'de> Deserialize<'de> for ParamSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::Field)
    }
}

/// Authored binding declaration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BindingSpec {
    pub endpoint: Option<EndpointRef>,
    /// Raw bind mode, validated when the module is compiled.
    pub bind: Option<String>,
    pub param_map: Option<IndexMap<String, ParamSource>>,
    pub create_params: Option<bool>,
    pub redirect: Option<String>,
    pub side_effect: Option<String>,
    pub loading: LoadingMode,
    /// Poll period in milliseconds for `watch` bindings.
    pub period: Option<u64>,
    #[serde(skip)]
    pub transform: Option<Transform>,
}

impl BindingSpec {
    /// Binding against a named or inline endpoint.
    pub fn to(endpoint: impl Into<EndpointRef>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Self::default()
        }
    }

    pub fn mode(mut self, mode: BindMode) -> Self {
        self.bind = Some(mode.as_str().to_string());
        self
    }

    pub fn map_param(mut self, local: impl Into<String>, source: impl Into<ParamSource>) -> Self {
        self.param_map.get_or_insert_with(IndexMap::new).insert(local.into(), source.into());
        self
    }

    pub fn create_params(mut self, create: bool) -> Self {
        self.create_params = Some(create);
        self
    }

    pub fn redirect(mut self, mutation: impl Into<String>) -> Self {
        self.redirect = Some(mutation.into());
        self
    }

    pub fn side_effect(mut self, action: impl Into<String>) -> Self {
        self.side_effect = Some(action.into());
        self
    }

    pub fn loading(mut self, loading: LoadingMode) -> Self {
        self.loading = loading;
        self
    }

    pub fn period(mut self, period_ms: u64) -> Self {
        self.period = Some(period_ms);
        self
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Fills unset fields: endpoint named after the output, `once`, empty `param_map`,
    /// `create_params = true`. Calling it again is a no-op.
    pub fn apply_defaults(&mut self, output: &str) {
        self.endpoint.get_or_insert_with(|| EndpointRef::Named(output.to_string()));
        self.bind.get_or_insert_with(|| BindMode::Once.as_str().to_string());
        self.param_map.get_or_insert_with(IndexMap::new);
        self.create_params.get_or_insert(true);
    }
}
