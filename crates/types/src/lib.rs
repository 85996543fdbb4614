//! Shared declarative model for statebind.
//!
//! Endpoints, bindings, type specs, naming conventions and the serialized plugin settings live
//! here so the store-facing engine and the transport utilities agree on one vocabulary.

pub mod binding;
pub mod endpoint;
pub mod naming;
pub mod settings;
pub mod value_type;

pub use binding::{BindMode, BindingSpec, ComputedParam, EndpointRef, LoadingMode, ParamSource, UnknownBindMode};
pub use endpoint::{Endpoint, EndpointUrl, MockData, SourceKind, StorageScope, Transform};
pub use naming::{CamelCase, Naming, NamingSettings, NamingStyle, Prefixes, SnakeCase};
pub use settings::{
    BASE_URL_ENV, BindingDocument, CookieSettings, DEFAULT_COOKIE_EXPIRES_MS, DEFAULT_ENGINE_NAMESPACE, MockSelection, MockSettings,
    ModuleDocument, PluginSettings, STRICT_ENV, SourcesSettings,
};
pub use value_type::{FnMatcher, Matcher, TypeSpec};
