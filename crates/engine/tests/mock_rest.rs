//! Document-driven setup: mocked REST endpoints next to a real storage backend.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::json;
use statebind_engine::{BindPlugin, DocumentFormat, SourceServices, parse_binding_str, source::UnsupportedWasm};
use statebind_store::{Payload, Store};
use statebind_types::StorageScope;
use statebind_util::{HttpTransport, RestRequest, RestResponse, StorageBackend};

const DOCUMENT: &str = r#"
plugin:
  sources:
    url: http://myapi.hppr.dev/api
    storage: true
    mock:
      rest: true
  endpoints:
    users:
      url: /users/
      type: array
      mock:
        - id: 1
          name: james
    preferred_theme:
      key: preferred_theme
      scope: session
modules:
  profile:
    namespace: profile
    state:
      note: ""
    bindings:
      users: {}
      theme:
        endpoint: preferred_theme
        bind: change
  settings:
    state:
      locale: en
"#;

struct UnreachableTransport;

#[async_trait]
impl HttpTransport for UnreachableTransport {
    async fn execute(&self, request: RestRequest) -> anyhow::Result<RestResponse> {
        anyhow::bail!("mocked REST source reached the network for {}", request.full_url())
    }
}

fn build() -> (Store, Arc<StorageBackend>) {
    let storage = Arc::new(StorageBackend::in_memory());
    let services = SourceServices {
        http: Arc::new(UnreachableTransport),
        storage: storage.clone(),
        wasm: Arc::new(UnsupportedWasm),
    };
    let document = parse_binding_str(DOCUMENT, DocumentFormat::Yaml).expect("parse document");
    let (_plugin, store) = BindPlugin::from_document(document, &services).expect("build store");
    (store, storage)
}

#[tokio::test(start_paused = true)]
async fn mocked_endpoints_are_committed_on_start() {
    let (store, _storage) = build();

    store.dispatch("profile/start_bind", Payload::Empty).await.expect("start_bind");

    let profile = store.module_state("profile").expect("profile state");
    assert_eq!(profile["users"], json!([{ "id": 1, "name": "james" }]));
    assert_eq!(profile["note"], json!(""));
    assert_eq!(profile["theme"], json!(""));
    assert_eq!(store.module_state("settings"), Some(json!({ "locale": "en" })));
}

#[tokio::test(start_paused = true)]
async fn storage_bindings_write_through_on_change() {
    let (store, storage) = build();
    store.dispatch("profile/start_bind", Payload::Empty).await.expect("start_bind");
    assert_eq!(storage.get(StorageScope::Session, "preferred_theme"), None);

    store.commit("profile/update_preferred_theme", json!("dark")).expect("pick theme");
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert_eq!(storage.get(StorageScope::Session, "preferred_theme"), Some(json!("dark")));
    assert_eq!(store.module_state("profile").expect("profile")["theme"], json!("dark"));
    assert_eq!(
        store.module_state("bind").expect("engine")["watch_params"]["profile/update_preferred_theme"],
        json!(["profile/load_theme"])
    );
}
