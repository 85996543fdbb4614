//! Convenience readers and writers over a bound store.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use statebind_store::{Payload, Store, StoreError, qualify};
use statebind_types::Naming;

/// A bound value together with its loading flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadingValue {
    pub value: Value,
    pub loading: bool,
}

/// Reads bound values and drives generated mutations and actions by binding name.
///
/// Namespaces are module paths (`profile`, `profile/settings`) or `""` for the root module.
#[derive(Clone)]
pub struct Accessors {
    store: Store,
    naming: Arc<dyn Naming>,
}

impl Accessors {
    pub fn new(store: Store, naming: Arc<dyn Naming>) -> Self {
        Self { store, naming }
    }

    /// Current value of a bound field, `null` when absent.
    pub fn binding(&self, namespace: &str, name: &str) -> Value {
        self.store
            .module_state(namespace)
            .and_then(|state| state.get(name).cloned())
            .unwrap_or(Value::Null)
    }

    pub fn bindings(&self, namespace: &str, names: &[&str]) -> IndexMap<String, Value> {
        let state = self.store.module_state(namespace).unwrap_or(Value::Null);
        names
            .iter()
            .map(|name| (name.to_string(), state.get(*name).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    pub fn binding_with_loading(&self, namespace: &str, name: &str) -> LoadingValue {
        let state = self.store.module_state(namespace).unwrap_or(Value::Null);
        LoadingValue {
            value: state.get(name).cloned().unwrap_or(Value::Null),
            loading: state
                .get(self.naming.loading(name))
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }

    /// Writes a parameter through its generated update mutation.
    pub fn sync_param(&self, namespace: &str, name: &str, value: Value) -> Result<(), StoreError> {
        self.store.commit(&qualify(namespace, &self.naming.update(name)), value)
    }

    /// Dispatches the load action of a non-trigger binding.
    pub fn load(&self, namespace: &str, name: &str) -> BoxFuture<'static, anyhow::Result<Value>> {
        self.store.dispatch(&qualify(namespace, &self.naming.load(name)), Payload::Empty)
    }

    /// Dispatches the trigger action of a `trigger` binding.
    pub fn trigger(&self, namespace: &str, name: &str) -> BoxFuture<'static, anyhow::Result<Value>> {
        self.store.dispatch(&qualify(namespace, &self.naming.trigger(name)), Payload::Empty)
    }
}
