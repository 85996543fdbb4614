//! Storage data source.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use statebind_types::{CookieSettings, Endpoint, TypeSpec};
use statebind_util::{StorageBackend, StorageRequest};
use tracing::warn;

use super::{DataSource, SourceArgs, unexpected_args};

/// Reads and writes a [`StorageBackend`].
///
/// The bound parameter named after the endpoint `key` drives the call: an unset value reads,
/// `null` deletes, anything else is stored and echoed back.
pub struct StorageDataSource {
    backend: Arc<StorageBackend>,
    cookies: CookieSettings,
}

impl StorageDataSource {
    pub fn new(backend: Arc<StorageBackend>) -> Self {
        Self {
            backend,
            cookies: CookieSettings::default(),
        }
    }

    pub fn with_cookies(mut self, cookies: CookieSettings) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn backend(&self) -> &Arc<StorageBackend> {
        &self.backend
    }
}

#[async_trait]
impl DataSource for StorageDataSource {
    fn kind(&self) -> &'static str {
        "storage"
    }

    fn state(&self) -> Map<String, Value> {
        let mut state = Map::new();
        match serde_json::to_value(&self.cookies) {
            Ok(cookies) => {
                state.insert("cookies".into(), cookies);
            }
            Err(error) => warn!(error = %error, "failed to serialize cookie settings"),
        }
        state
    }

    /// `key` defaults to the endpoint name, `type` to `string`, `params` to `{key: type}` and
    /// `scope` to `local`.
    fn apply_defaults(&self, name: &str, endpoint: &mut Endpoint) {
        let key = endpoint.key.get_or_insert_with(|| name.to_string()).clone();
        let spec = endpoint.r#type.get_or_insert(TypeSpec::String).clone();
        endpoint.params.get_or_insert_with(|| [(key, spec)].into_iter().collect());
        endpoint.scope.get_or_insert_with(Default::default);
        endpoint.apply_base_defaults();
    }

    fn args(&self, bind_state: &Value, params: &Map<String, Value>, endpoint: &Endpoint) -> anyhow::Result<SourceArgs> {
        let key = endpoint.key.clone().unwrap_or_default();
        let value = params.get(&key).cloned().unwrap_or(Value::Null);
        let r#type = endpoint
            .params
            .as_ref()
            .and_then(|params| params.get(&key))
            .or(endpoint.r#type.as_ref())
            .cloned()
            .unwrap_or(TypeSpec::String);
        let cookies = bind_state
            .get("cookies")
            .and_then(|cookies| serde_json::from_value(cookies.clone()).ok())
            .unwrap_or_else(|| self.cookies.clone());
        Ok(SourceArgs::Storage(StorageRequest {
            key,
            value,
            r#type,
            scope: endpoint.scope.unwrap_or_default(),
            cookies,
        }))
    }

    async fn module(&self, args: SourceArgs) -> anyhow::Result<Value> {
        let SourceArgs::Storage(request) = args else {
            return Err(unexpected_args("storage", &args));
        };
        Ok(self.backend.execute(&request)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use statebind_types::StorageScope;

    fn prepared(name: &str, endpoint: Endpoint) -> (StorageDataSource, Endpoint) {
        let source = StorageDataSource::new(Arc::new(StorageBackend::in_memory()));
        let mut endpoint = endpoint;
        source.apply_defaults(name, &mut endpoint);
        (source, endpoint)
    }

    #[test]
    fn defaults_use_the_endpoint_name_as_key() {
        let (_, endpoint) = prepared("theme", Endpoint::default());
        assert_eq!(endpoint.key.as_deref(), Some("theme"));
        assert_eq!(endpoint.r#type, Some(TypeSpec::String));
        assert_eq!(endpoint.scope, Some(StorageScope::Local));
        assert_eq!(endpoint.params.as_ref().and_then(|params| params.get("theme")), Some(&TypeSpec::String));
    }

    #[test]
    fn args_carry_key_value_scope_and_cookies() {
        let (source, mut endpoint) = prepared("session", Endpoint::storage("session_id"));
        endpoint.scope = Some(StorageScope::Cookie);
        let state = json!({"cookies": {"expires": 1000, "path": "/app"}});
        let params = json!({"session_id": "abc"}).as_object().cloned().expect("object");
        let SourceArgs::Storage(request) = source.args(&state, &params, &endpoint).expect("args") else {
            panic!("expected storage args");
        };
        assert_eq!(request.key, "session_id");
        assert_eq!(request.value, json!("abc"));
        assert_eq!(request.scope, StorageScope::Cookie);
        assert_eq!(request.cookies, CookieSettings { expires: 1000, path: "/app".into() });
    }

    #[tokio::test]
    async fn writes_then_reads_back() {
        let (source, endpoint) = prepared("theme", Endpoint::default());
        let state = Value::Object(source.state());

        let write = json!({"theme": "dark"}).as_object().cloned().expect("object");
        let stored = source.module(source.args(&state, &write, &endpoint).expect("args")).await.expect("write");
        assert_eq!(source.assign(stored), json!("dark"));

        let read = json!({"theme": ""}).as_object().cloned().expect("object");
        let loaded = source.module(source.args(&state, &read, &endpoint).expect("args")).await.expect("read");
        assert_eq!(loaded, json!("dark"));
        assert_eq!(source.backend().get(StorageScope::Local, "theme"), Some(json!("dark")));
    }
}
