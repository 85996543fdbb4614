//! # Statebind Engine
//!
//! Declarative data bindings for the statebind store. A module declares which of its fields are
//! bound to which endpoints; the engine generates the state fields, mutations and actions, fetches
//! the values through a data source and keeps them fresh when parameters change or on a timer.
//!
//! ## Key Features
//!
//! - **Binding Compiler**: turns `bindings` declarations into a plain store module
//! - **Execution Engine**: `bind`/`watch`/`once`/`reset` actions plus the watch registry and
//!   interval table
//! - **Data Sources**: REST, storage, WebAssembly, mocks of each, and routing across several
//! - **Documents**: YAML/JSON binding files with environment overrides
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use statebind_engine::{BindPlugin, ModuleConfig, PluginConfig, source::{MockDataSource, RestDataSource}};
//! use statebind_store::Store;
//! use statebind_types::{BindingSpec, Endpoint, MockData, TypeSpec};
//! use statebind_util::ReqwestTransport;
//!
//! # tokio::runtime::Runtime::new()?.block_on(async {
//! let rest = RestDataSource::new(Arc::new(ReqwestTransport::new()?));
//! let config = PluginConfig::new(Arc::new(MockDataSource::new(Arc::new(rest))))
//!     .with_endpoint("users", Endpoint::rest("/users/").with_type(TypeSpec::Array).with_mock(MockData::Value(json!([{ "id": 1 }]))));
//! let plugin = BindPlugin::new(config);
//!
//! let store = Store::new();
//! plugin.install(&store)?;
//! plugin.bound_store(ModuleConfig::bound("profile").with_binding("users", BindingSpec::default()))?.register(&store)?;
//!
//! store.dispatch("profile/start_bind", ()).await?;
//! assert_eq!(store.module_state("profile").map(|state| state["users"].clone()), Some(json!([{ "id": 1 }])));
//! # Ok::<(), anyhow::Error>(())
//! # })?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - **`bound_store`**: the compiler (`BoundStore`, `ModuleConfig`)
//! - **`bind_module`**: the engine module every bound namespace delegates to
//! - **`params`**: parameter mapping and resolution
//! - **`source`**: the data source contract and its variants
//! - **`plugin`**: installation, watch subscription and the module-set helper
//! - **`accessors`**: reading and driving bindings by name

pub mod accessors;
pub mod bind_module;
pub mod binding;
pub mod bound_store;
pub mod config;
pub mod document;
pub mod error;
pub mod params;
pub mod plugin;
pub mod source;

#[cfg(test)]
mod test_support;

pub use accessors::{Accessors, LoadingValue};
pub use bind_module::BindModule;
pub use binding::{BindPayload, Binding, BindingNames, DEFAULT_WATCH_PERIOD};
pub use bound_store::{BoundStore, CompiledModule, ModuleConfig, START_BIND};
pub use config::PluginConfig;
pub use document::{DocumentFormat, parse_binding_file, parse_binding_str};
pub use error::BindError;
pub use params::{EffectiveParam, ParamResolution, TypeMismatch, map_endpoint_types, resolve_params, reverse_map};
pub use plugin::{BindPlugin, BoundModule};
pub use source::{DataSource, SourceArgs, SourceServices, build_data_source};
