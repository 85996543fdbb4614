//! REST request execution.
//!
//! The REST data source produces a [`RestRequest`] and hands it to an [`HttpTransport`]. The
//! default transport is reqwest based; tests and embedders can substitute their own.

use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Request description produced by the REST data source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestRequest {
    pub method: String,
    pub base_url: String,
    pub url: String,
    /// Query parameters (GET).
    pub params: Map<String, Value>,
    /// JSON body (every other method).
    pub data: Map<String, Value>,
    pub headers: IndexMap<String, String>,
}

impl RestRequest {
    /// `base_url` and `url` joined with exactly one slash between them. Absolute `url`s win.
    pub fn full_url(&self) -> String {
        if self.url.starts_with("http://") || self.url.starts_with("https://") || self.base_url.is_empty() {
            return self.url.clone();
        }
        if self.url.is_empty() {
            return self.base_url.clone();
        }
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.url.trim_start_matches('/'))
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("get")
    }
}

/// Response returned to the REST data source. `data` holds the decoded body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestResponse {
    pub status: u16,
    pub data: Value,
    pub headers: IndexMap<String, String>,
}

/// Executes REST requests on behalf of the REST data source.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends the request. Non-success statuses are errors.
    async fn execute(&self, request: RestRequest) -> anyhow::Result<RestResponse>;
}

/// Default transport backed by a shared reqwest [`Client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .gzip(true)
            .brotli(true)
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|error| anyhow!(error))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: RestRequest) -> anyhow::Result<RestResponse> {
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("invalid HTTP method '{}'", request.method))?;
        let url = request.full_url();
        debug!(method = %method, url = %url, "sending bound request");

        let mut builder = self.client.request(method, &url).headers(build_headers(&request.headers)?);
        if request.is_get() {
            builder = builder.query(&query_pairs(&request.params));
        } else {
            builder = builder.json(&request.data);
        }

        let response = builder.send().await.map_err(|error| anyhow!("Network error: {error}"))?;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.to_string(), value.to_string())))
            .collect();
        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {url}"))?;

        if !status.is_success() {
            bail!("HTTP {}: {}", status.as_u16(), text);
        }

        Ok(RestResponse {
            status: status.as_u16(),
            data: parse_body(&text),
            headers,
        })
    }
}

fn build_headers(headers: &IndexMap<String, String>) -> anyhow::Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).with_context(|| format!("invalid header name '{name}'"))?;
        let header_value = HeaderValue::from_str(value).with_context(|| format!("invalid value for header '{name}'"))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Flattens parameters to query pairs. Strings are sent verbatim, everything else as JSON text.
pub fn query_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    params
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(name, value)| {
            let rendered = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (name.clone(), rendered)
        })
        .collect()
}

/// Decodes a response body as JSON, falling back to a string; empty bodies become `null`.
pub fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(base_url: &str, url: &str) -> RestRequest {
        RestRequest {
            method: "get".into(),
            base_url: base_url.into(),
            url: url.into(),
            ..RestRequest::default()
        }
    }

    #[test]
    fn joins_base_and_path() {
        assert_eq!(request("http://myapi.hppr.dev/api", "/users/").full_url(), "http://myapi.hppr.dev/api/users/");
        assert_eq!(request("http://myapi.hppr.dev/api/", "users/").full_url(), "http://myapi.hppr.dev/api/users/");
        assert_eq!(request("", "/users/").full_url(), "/users/");
        assert_eq!(request("http://a.test", "https://b.test/x").full_url(), "https://b.test/x");
    }

    #[test]
    fn query_pairs_render_scalars() {
        let params = json!({ "user_id": 10, "name": "james", "skip": null, "flag": true });
        let pairs = query_pairs(params.as_object().expect("object"));
        assert_eq!(
            pairs,
            vec![
                ("flag".to_string(), "true".to_string()),
                ("name".to_string(), "james".to_string()),
                ("user_id".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn parses_json_text_and_empty_bodies() {
        assert_eq!(parse_body(r#"{"id":1}"#), json!({"id": 1}));
        assert_eq!(parse_body("plain"), json!("plain"));
        assert_eq!(parse_body("  "), Value::Null);
    }

    #[tokio::test]
    async fn truncated_bodies_are_errors() {
        use tokio::{io::AsyncWriteExt, net::TcpListener};

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let address = listener.local_addr().expect("local address");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = [0u8; 1024];
            let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut request).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\ncontent-type: application/json\r\n\r\n{\"id\":")
                .await;
        });

        let transport = ReqwestTransport::new().expect("client");
        let error = transport
            .execute(request(&format!("http://{address}"), "/users/"))
            .await
            .expect_err("truncated body");
        assert!(format!("{error:#}").contains("Failed to read response body"), "{error:#}");
    }

    #[test]
    fn rejects_invalid_header_names() {
        let mut headers = IndexMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        assert!(build_headers(&headers).is_err());
    }
}
