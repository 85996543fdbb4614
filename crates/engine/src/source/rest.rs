//! REST data source.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use statebind_store::{Mutation, mutation};
use statebind_types::{Endpoint, EndpointUrl};
use statebind_util::{HttpTransport, RestRequest};
use tracing::warn;

use super::{DataSource, SourceArgs, unexpected_args};

pub const UPDATE_URL: &str = "update_url";
pub const UPDATE_HEADER: &str = "update_header";

fn default_headers() -> IndexMap<String, String> {
    IndexMap::from([("Content-Type".to_string(), "application/json".to_string())])
}

/// Sends bindings to an HTTP API through an [`HttpTransport`].
///
/// The base URL and base headers live in engine state (`url`, `headers`) and can be changed at
/// runtime through the `update_url` and `update_header` mutations.
pub struct RestDataSource {
    url: String,
    headers: IndexMap<String, String>,
    transport: Arc<dyn HttpTransport>,
}

impl RestDataSource {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            url: String::new(),
            headers: default_headers(),
            transport,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Replaces the base headers.
    pub fn with_headers(mut self, headers: IndexMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

#[async_trait]
impl DataSource for RestDataSource {
    fn kind(&self) -> &'static str {
        "rest"
    }

    fn state(&self) -> Map<String, Value> {
        let headers: Map<String, Value> = self
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), Value::String(value.clone())))
            .collect();
        let mut state = Map::new();
        state.insert("url".into(), Value::String(self.url.clone()));
        state.insert("headers".into(), Value::Object(headers));
        state
    }

    fn mutations(&self) -> IndexMap<String, Mutation> {
        let mut mutations = IndexMap::new();
        mutations.insert(
            UPDATE_URL.to_string(),
            mutation(|state, url| {
                state.insert("url".into(), url);
            }),
        );
        mutations.insert(
            UPDATE_HEADER.to_string(),
            mutation(|state, header| {
                let Some(key) = header.get("key").and_then(Value::as_str) else {
                    warn!(payload = %header, "update_header expects {{key, value}}");
                    return;
                };
                let value = header.get("value").cloned().unwrap_or(Value::Null);
                let headers = state.entry("headers").or_insert_with(|| json!({}));
                if !headers.is_object() {
                    *headers = json!({});
                }
                if let Some(headers) = headers.as_object_mut() {
                    headers.insert(key.to_string(), value);
                }
            }),
        );
        mutations
    }

    /// `url` defaults to `/<name>/`, `method` to `get`.
    fn apply_defaults(&self, name: &str, endpoint: &mut Endpoint) {
        endpoint.apply_base_defaults();
        endpoint.url.get_or_insert_with(|| EndpointUrl::Static(format!("/{name}/")));
        endpoint.method.get_or_insert_with(|| "get".to_string());
    }

    fn args(&self, bind_state: &Value, params: &Map<String, Value>, endpoint: &Endpoint) -> anyhow::Result<SourceArgs> {
        let method = endpoint.method.clone().unwrap_or_else(|| "get".to_string());
        let base_url = bind_state.get("url").and_then(Value::as_str).unwrap_or(&self.url).to_string();
        let url = endpoint.url.as_ref().map(|url| url.render(params)).unwrap_or_default();

        let mut headers: IndexMap<String, String> = match bind_state.get("headers").and_then(Value::as_object) {
            Some(state_headers) => state_headers
                .iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(name, value)| {
                    let rendered = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                    (name.clone(), rendered)
                })
                .collect(),
            None => self.headers.clone(),
        };
        if let Some(endpoint_headers) = &endpoint.headers {
            headers.extend(endpoint_headers.iter().map(|(name, value)| (name.clone(), value.clone())));
        }

        let mut request = RestRequest {
            method,
            base_url,
            url,
            headers,
            ..RestRequest::default()
        };
        if request.is_get() {
            request.params = params.clone();
        } else {
            request.data = params.clone();
        }
        Ok(SourceArgs::Rest(request))
    }

    async fn module(&self, args: SourceArgs) -> anyhow::Result<Value> {
        let SourceArgs::Rest(request) = args else {
            return Err(unexpected_args("rest", &args));
        };
        let response = self.transport.execute(request).await?;
        Ok(serde_json::to_value(response)?)
    }

    /// The decoded response body, or `null` when the response has none.
    fn assign(&self, response: Value) -> Value {
        response.get("data").cloned().unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statebind_types::TypeSpec;
    use statebind_util::RestResponse;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        requests: Mutex<Vec<RestRequest>>,
    }

    #[async_trait]
    impl HttpTransport for Recording {
        async fn execute(&self, request: RestRequest) -> anyhow::Result<RestResponse> {
            self.requests.lock().expect("lock").push(request);
            Ok(RestResponse {
                status: 200,
                data: json!({"id": 1}),
                headers: IndexMap::new(),
            })
        }
    }

    fn source() -> (RestDataSource, Arc<Recording>) {
        let transport = Arc::new(Recording::default());
        (RestDataSource::new(transport.clone()).with_url("http://myapi.hppr.dev/api"), transport)
    }

    fn bind_state(source: &RestDataSource) -> Value {
        Value::Object(source.state())
    }

    #[test]
    fn defaults_derive_url_from_the_endpoint_name() {
        let (source, _) = source();
        let mut endpoint = Endpoint::default();
        source.apply_defaults("users", &mut endpoint);
        source.apply_defaults("ignored", &mut endpoint);
        assert_eq!(endpoint.url.as_ref().map(|url| url.render(&Map::new())).as_deref(), Some("/users/"));
        assert_eq!(endpoint.method.as_deref(), Some("get"));
        assert_eq!(endpoint.r#type, Some(TypeSpec::Object));
    }

    #[test]
    fn get_sends_query_params_and_post_sends_body() {
        let (source, _) = source();
        let params = json!({"user_id": 10}).as_object().cloned().expect("object");

        let get = Endpoint::rest("/user/data/");
        let SourceArgs::Rest(request) = source.args(&bind_state(&source), &params, &get).expect("args") else {
            panic!("expected REST args");
        };
        assert_eq!(request.params, params);
        assert!(request.data.is_empty());
        assert_eq!(request.headers.get("Content-Type").map(String::as_str), Some("application/json"));
        assert_eq!(request.full_url(), "http://myapi.hppr.dev/api/user/data/");

        let post = Endpoint::rest("/login/").with_method("post").with_header("X-Trace", "1");
        let SourceArgs::Rest(request) = source.args(&bind_state(&source), &params, &post).expect("args") else {
            panic!("expected REST args");
        };
        assert!(request.params.is_empty());
        assert_eq!(request.data, params);
        assert_eq!(request.headers.get("X-Trace").map(String::as_str), Some("1"));
    }

    #[test]
    fn header_mutation_updates_state_headers() {
        let (source, _) = source();
        let mut state = source.state();
        let update = source.mutations().get(UPDATE_HEADER).cloned().expect("mutation");
        update(&mut state, json!({"key": "Authorization", "value": "Token abc"}));
        let args = source
            .args(&Value::Object(state), &Map::new(), &Endpoint::rest("/me/"))
            .expect("args");
        let SourceArgs::Rest(request) = args else {
            panic!("expected REST args");
        };
        assert_eq!(request.headers.get("Authorization").map(String::as_str), Some("Token abc"));
    }

    #[tokio::test]
    async fn module_returns_the_response_and_assign_unwraps_data() {
        let (source, transport) = source();
        let args = source
            .args(&bind_state(&source), &Map::new(), &Endpoint::rest("/users/"))
            .expect("args");
        let response = source.module(args).await.expect("response");
        assert_eq!(source.assign(response), json!({"id": 1}));
        assert_eq!(transport.requests.lock().expect("lock").len(), 1);
        assert_eq!(source.assign(json!({"status": 204})), Value::Null);
    }
}
