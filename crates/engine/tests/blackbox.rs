//! End-to-end REST scenario: a profile module bound to an HTTP API, driven through a real store
//! with a recording transport and a paused clock.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use statebind_engine::{BindPlugin, ModuleConfig, PluginConfig, source::RestDataSource};
use statebind_store::{MutationRecord, Payload, Store};
use statebind_types::{BindMode, BindingSpec, Endpoint, LoadingMode, Transform, TypeSpec};
use statebind_util::{HttpTransport, RestRequest, RestResponse};
use tracing_subscriber::EnvFilter;

const BASE_URL: &str = "http://myapi.hppr.dev/api";

#[derive(Default)]
struct RecordingTransport {
    requests: Mutex<Vec<RestRequest>>,
    responses: Mutex<HashMap<String, Value>>,
}

impl RecordingTransport {
    fn respond(&self, url: &str, data: Value) {
        self.responses.lock().expect("responses").insert(url.to_string(), data);
    }

    fn requests(&self) -> Vec<RestRequest> {
        self.requests.lock().expect("requests").clone()
    }

    fn requests_to(&self, url: &str) -> Vec<RestRequest> {
        self.requests().into_iter().filter(|request| request.url == url).collect()
    }
}

#[async_trait]
impl HttpTransport for RecordingTransport {
    async fn execute(&self, request: RestRequest) -> anyhow::Result<RestResponse> {
        let data = self.responses.lock().expect("responses").get(&request.url).cloned().unwrap_or(json!({}));
        self.requests.lock().expect("requests").push(request);
        Ok(RestResponse {
            status: 200,
            data,
            headers: Default::default(),
        })
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn profile_module() -> ModuleConfig {
    ModuleConfig::bound("profile")
        .with_state("token", json!(""))
        .with_state("posts", json!([]))
        .with_mutation("update_token", |state, response| {
            state.insert("token".into(), response.get("token").cloned().unwrap_or(Value::Null));
        })
        .with_mutation("update_posts_and_meta_ids", |state, posts| {
            let ids: Vec<Value> = posts
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|post| post.get("id").cloned())
                .collect();
            state.insert("posts".into(), posts);
            state.insert("post_ids".into(), Value::Array(ids));
        })
        .with_binding(
            "login",
            BindingSpec::to(
                Endpoint::rest("/login/")
                    .with_method("post")
                    .with_param("username", TypeSpec::String)
                    .with_param("password", TypeSpec::String),
            )
            .mode(BindMode::Trigger)
            .redirect("update_token"),
        )
        .with_binding(
            "user_data",
            BindingSpec::default()
                .mode(BindMode::Watch)
                .period(10_000)
                .map_param("selected_user_id", "user_id"),
        )
        .with_binding("users", BindingSpec::default().mode(BindMode::Once).loading(LoadingMode::OnStart))
        .with_binding(
            "posts",
            BindingSpec::default()
                .mode(BindMode::Trigger)
                .redirect("update_posts_and_meta_ids")
                .side_effect("trigger_post_meta_data"),
        )
        .with_binding(
            "post_meta_data",
            BindingSpec::to("post_meta").mode(BindMode::Trigger).map_param("post_ids", "ids"),
        )
}

fn setup(strict: bool) -> (Store, BindPlugin, Arc<RecordingTransport>) {
    init_tracing();
    let transport = Arc::new(RecordingTransport::default());
    let source = RestDataSource::new(transport.clone()).with_url(BASE_URL);
    let config = PluginConfig::new(Arc::new(source))
        .strict(strict)
        .with_endpoint("user_data", Endpoint::rest("/user/data/").with_param("user_id", TypeSpec::Number))
        .with_endpoint("users", Endpoint::rest("/users/").with_type(TypeSpec::Array))
        .with_endpoint("posts", Endpoint::rest("/posts/").with_type(TypeSpec::Array))
        .with_endpoint("post_meta", Endpoint::rest("/posts/meta/").with_param("ids", TypeSpec::Array));
    let plugin = BindPlugin::new(config);

    let store = Store::new();
    plugin.install(&store).expect("install plugin");
    plugin.bound_store(profile_module()).expect("compile profile").register(&store).expect("register profile");
    (store, plugin, transport)
}

fn record_mutations(store: &Store) -> Arc<Mutex<Vec<String>>> {
    let records = Arc::new(Mutex::new(Vec::new()));
    let sink = records.clone();
    store.subscribe(move |record: &MutationRecord, _state: &Value| {
        sink.lock().expect("records").push(record.r#type.clone());
    });
    records
}

/// Lets detached dispatches spawned by subscriptions and timers run to completion.
async fn settle() {
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn start_bind_loads_once_bindings() {
    let (store, _plugin, transport) = setup(false);
    transport.respond("/users/", json!([{ "id": 1 }, { "id": 2 }]));

    store.dispatch("profile/start_bind", Payload::Empty).await.expect("start_bind");

    let requests = transport.requests();
    assert_eq!(requests.len(), 1, "only the users binding is ready: {requests:?}");
    let request = &requests[0];
    assert_eq!(request.method, "get");
    assert_eq!(request.full_url(), "http://myapi.hppr.dev/api/users/");
    assert!(request.params.is_empty());
    assert_eq!(request.headers.get("Content-Type").map(String::as_str), Some("application/json"));

    let profile = store.module_state("profile").expect("profile state");
    assert_eq!(profile["users"], json!([{ "id": 1 }, { "id": 2 }]));
    assert_eq!(profile["loading_users"], json!(false));
    assert_eq!(store.module_state("bind").expect("engine")["bound_stores"], json!(["profile"]));
}

#[tokio::test(start_paused = true)]
async fn loading_flag_is_raised_before_the_first_load() {
    let (store, _plugin, _transport) = setup(false);
    let records = record_mutations(&store);

    store.dispatch("profile/start_bind", Payload::Empty).await.expect("start_bind");

    let records = records.lock().expect("records").clone();
    let position = |name: &str| records.iter().position(|record| record == name);
    let raised = position("profile/loading_users").expect("loading flag raised");
    let updated = position("profile/update_users").expect("users committed");
    let cleared = position("profile/done_loading_users").expect("loading flag cleared");
    assert!(position("bind/add_bound_store") < position("bind/watch_params"));
    assert!(raised < updated && updated < cleared);
}

#[tokio::test(start_paused = true)]
async fn parameter_updates_and_ticks_refetch_watched_bindings() {
    let (store, _plugin, transport) = setup(false);
    transport.respond("/user/data/", json!({ "name": "james" }));
    store.dispatch("profile/start_bind", Payload::Empty).await.expect("start_bind");
    assert!(transport.requests_to("/user/data/").is_empty(), "user_data is blocked until a user is selected");

    store.commit("profile/update_selected_user_id", json!(10)).expect("select user");
    settle().await;

    let fetched = transport.requests_to("/user/data/");
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].method, "get");
    assert_eq!(fetched[0].params, object(json!({ "user_id": 10 })));
    assert_eq!(store.module_state("profile").expect("profile")["user_data"], json!({ "name": "james" }));

    tokio::time::sleep(Duration::from_millis(10_001)).await;
    settle().await;
    assert_eq!(transport.requests_to("/user/data/").len(), 2);

    let intervals = store.module_state("bind").expect("engine")["intervals"].clone();
    assert_eq!(intervals.as_object().map(Map::len), Some(1));
    assert!(intervals.get("profile/user_data").is_some());
}

#[tokio::test(start_paused = true)]
async fn trigger_bindings_redirect_and_chain_side_effects() {
    let (store, _plugin, transport) = setup(false);
    transport.respond("/login/", json!({ "token": "abc" }));
    transport.respond("/posts/", json!([{ "id": 4 }, { "id": 7 }]));
    transport.respond("/posts/meta/", json!({ "count": 2 }));
    store.dispatch("profile/start_bind", Payload::Empty).await.expect("start_bind");

    store.commit("profile/update_username", json!("james")).expect("username");
    store.commit("profile/update_password", json!("hunter2")).expect("password");
    store.dispatch("profile/trigger_login", Payload::Empty).await.expect("login");

    let login = transport.requests_to("/login/");
    assert_eq!(login.len(), 1);
    assert_eq!(login[0].method, "post");
    assert!(login[0].params.is_empty());
    assert_eq!(login[0].data, object(json!({ "username": "james", "password": "hunter2" })));
    let profile = store.module_state("profile").expect("profile");
    assert_eq!(profile["token"], json!("abc"));
    assert!(profile.get("login").is_none());

    store.dispatch("profile/trigger_posts", Payload::Empty).await.expect("posts");
    let profile = store.module_state("profile").expect("profile");
    assert_eq!(profile["posts"], json!([{ "id": 4 }, { "id": 7 }]));
    assert_eq!(profile["post_ids"], json!([4, 7]));
    assert_eq!(profile["post_meta_data"], json!({ "count": 2 }));

    let meta = transport.requests_to("/posts/meta/");
    assert_eq!(meta.len(), 1);
    assert_eq!(meta[0].params, object(json!({ "ids": [4, 7] })));
}

#[tokio::test(start_paused = true)]
async fn strict_mode_rejects_double_binding_until_reset() {
    let (store, _plugin, _transport) = setup(true);
    store.dispatch("profile/start_bind", Payload::Empty).await.expect("first start_bind");

    let error = store.dispatch("profile/start_bind", Payload::Empty).await.expect_err("second start_bind");
    assert_eq!(
        error.to_string(),
        "Tried to profile/start_bind twice. Dispatch bind/reset before restarting bind"
    );

    store.commit("profile/update_selected_user_id", json!(3)).expect("select user");
    settle().await;
    store.dispatch("bind/reset", Payload::Empty).await.expect("reset");
    let engine = store.module_state("bind").expect("engine");
    assert_eq!(engine["bound_stores"], json!([]));
    assert_eq!(engine["watch_params"], json!({}));
    assert_eq!(engine["intervals"], json!({}));

    store.dispatch("profile/start_bind", Payload::Empty).await.expect("start_bind after reset");
}

#[tokio::test(start_paused = true)]
async fn header_updates_apply_to_later_requests() {
    let (store, _plugin, transport) = setup(false);
    store
        .commit("bind/update_header", json!({ "key": "Authorization", "value": "Token abc" }))
        .expect("update header");
    store.commit("bind/update_url", json!("http://localhost:8000")).expect("update url");
    store.dispatch("profile/start_bind", Payload::Empty).await.expect("start_bind");

    let request = &transport.requests_to("/users/")[0];
    assert_eq!(request.headers.get("Authorization").map(String::as_str), Some("Token abc"));
    assert_eq!(request.full_url(), "http://localhost:8000/users/");
}

#[tokio::test(start_paused = true)]
async fn endpoint_transform_runs_before_the_binding_transform() {
    let (store, plugin, transport) = setup(false);
    transport.respond("/scores/", json!("raw"));
    let scores = ModuleConfig::bound("scores").with_binding(
        "scores",
        BindingSpec::to(Endpoint::rest("/scores/").with_transform(Transform::new(|value| json!([value, "endpoint"]))))
            .mode(BindMode::Trigger)
            .transform(Transform::new(|value| json!({ "wrapped": value }))),
    );
    plugin.bound_store(scores).expect("compile scores").register(&store).expect("register scores");

    store.dispatch("scores/trigger_scores", Payload::Empty).await.expect("trigger scores");

    assert_eq!(
        store.module_state("scores").expect("scores")["scores"],
        json!({ "wrapped": ["raw", "endpoint"] })
    );
}

#[tokio::test(start_paused = true)]
async fn a_binding_fed_only_by_its_own_output_does_nothing() {
    let (store, plugin, transport) = setup(false);
    let session = ModuleConfig::bound("session").with_binding(
        "token",
        BindingSpec::to(Endpoint::rest("/token/").with_param("token", TypeSpec::String)).mode(BindMode::Trigger),
    );
    plugin.bound_store(session).expect("compile session").register(&store).expect("register session");
    store.commit("session/update_token", json!("abc")).expect("seed token");
    let records = record_mutations(&store);

    let result = store.dispatch("session/trigger_token", Payload::Empty).await.expect("trigger token");

    assert_eq!(result, Value::Null);
    let records = records.lock().expect("records").clone();
    assert!(records.iter().all(|record| !record.contains("update_")), "{records:?}");
    assert!(transport.requests_to("/token/").is_empty());
    assert_eq!(store.module_state("session").expect("session")["token"], json!("abc"));
}

#[tokio::test(start_paused = true)]
async fn each_trigger_raises_and_clears_its_loading_flag() {
    let (store, plugin, transport) = setup(false);
    transport.respond("/feed/", json!([{ "id": 1 }]));
    let feed = ModuleConfig::bound("feed").with_binding(
        "feed",
        BindingSpec::to(Endpoint::rest("/feed/").with_type(TypeSpec::Array))
            .mode(BindMode::Trigger)
            .loading(LoadingMode::Each),
    );
    plugin.bound_store(feed).expect("compile feed").register(&store).expect("register feed");
    let records = record_mutations(&store);

    store.dispatch("feed/trigger_feed", Payload::Empty).await.expect("first trigger");
    settle().await;
    store.dispatch("feed/trigger_feed", Payload::Empty).await.expect("second trigger");
    settle().await;

    let records: Vec<String> = records
        .lock()
        .expect("records")
        .iter()
        .filter(|record| record.starts_with("feed/"))
        .cloned()
        .collect();
    let cycle = ["feed/loading_feed", "feed/update_feed", "feed/done_loading_feed"];
    assert_eq!(records, [cycle, cycle].concat());
    assert_eq!(transport.requests_to("/feed/").len(), 2);
    assert_eq!(store.module_state("feed").expect("feed")["loading_feed"], json!(false));
}
