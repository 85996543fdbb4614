//! Execution engine.
//!
//! [`BindModule`] is the store module every bound namespace delegates to. It owns the interval
//! table, the parameter watch registry and the double-bind guard, and runs the fetch pipeline for
//! one binding in [`once`](ONCE):
//!
//! 1. apply data source defaults to a copy of the endpoint
//! 2. resolve parameters from the owning module's state and getters
//! 3. skip self-referencing and blocked bindings
//! 4. build source arguments, call the source, unwrap and transform the value
//! 5. commit to the output (or redirect) mutation, clear the loading flag, run the side effect

use std::sync::Arc;

use serde_json::{Map, Value, json};
use statebind_store::{ActionContext, ModuleDef, Payload, action, mutation, qualify, state_at};
use statebind_util::{Timers, spawn_detached};
use tracing::{debug, info, warn};

use crate::{
    binding::BindPayload,
    config::PluginConfig,
    error::BindError,
    params::{ParamResolution, resolve_params},
};

pub const BIND: &str = "bind";
pub const WATCH: &str = "watch";
pub const ONCE: &str = "once";
pub const RESET: &str = "reset";

pub const WATCH_PARAMS: &str = "watch_params";
pub const ADD_INTERVAL: &str = "add_interval";
pub const DELETE_INTERVAL: &str = "delete_interval";
pub const CLEAR_INTERVALS: &str = "clear_intervals";
pub const ADD_BOUND_STORE: &str = "add_bound_store";
pub const CLEAR_BOUND_STORES: &str = "clear_bound_stores";
pub const CLEAR_WATCH_PARAMS: &str = "clear_watch_params";

pub struct BindModule {
    config: Arc<PluginConfig>,
    timers: Arc<Timers>,
}

impl BindModule {
    pub fn new(config: Arc<PluginConfig>, timers: Arc<Timers>) -> Self {
        Self { config, timers }
    }

    /// Engine state, mutations and actions, plus the data source's state and mutations.
    pub fn into_module(self) -> ModuleDef {
        let mut def = ModuleDef::new();
        def.state = self.config.data_source.state();
        def.state.insert("intervals".into(), json!({}));
        def.state.insert(WATCH_PARAMS.into(), json!({}));
        def.state.insert("bound_stores".into(), json!([]));
        def.mutations = self.config.data_source.mutations();

        def = def
            .with_mutation(WATCH_PARAMS, register_watch)
            .with_mutation(ADD_BOUND_STORE, add_bound_store)
            .with_mutation(CLEAR_BOUND_STORES, |state, _| {
                if let Some(Value::Array(bound)) = state.get_mut("bound_stores") {
                    bound.retain(|name| name.as_str() == Some(""));
                }
            })
            .with_mutation(CLEAR_WATCH_PARAMS, |state, _| {
                state.insert(WATCH_PARAMS.into(), json!({}));
            });

        let timers = self.timers.clone();
        def.mutations.insert(
            ADD_INTERVAL.into(),
            mutation(move |state, payload| add_interval(&timers, state, payload)),
        );
        let timers = self.timers.clone();
        def.mutations.insert(
            DELETE_INTERVAL.into(),
            mutation(move |state, payload| delete_interval(&timers, state, payload)),
        );
        let timers = self.timers.clone();
        def.mutations.insert(
            CLEAR_INTERVALS.into(),
            mutation(move |state, _| clear_intervals(&timers, state)),
        );

        let config = self.config.clone();
        let timers = self.timers;
        def.actions.insert(BIND.into(), action(bind));
        def.actions.insert(
            WATCH.into(),
            action(move |ctx, payload| watch(timers.clone(), ctx, payload)),
        );
        def.actions.insert(ONCE.into(), action(move |ctx, payload| once(config.clone(), ctx, payload)));
        def.actions.insert(RESET.into(), action(reset));
        def
    }
}

fn bind_payload(action: &str, payload: &Payload) -> Result<Arc<BindPayload>, BindError> {
    payload.downcast::<BindPayload>().ok_or_else(|| BindError::InvalidPayload {
        action: action.to_string(),
    })
}

/// Routes to `watch` for polling/change bindings and to `once` for everything else.
async fn bind(ctx: ActionContext, payload: Payload) -> anyhow::Result<Value> {
    let request = bind_payload(BIND, &payload)?;
    let target = if request.binding.mode == statebind_types::BindMode::Watch {
        WATCH
    } else {
        ONCE
    };
    ctx.dispatch(target, payload).await
}

/// Starts (or replaces) the poll timer of a binding, then fetches it once.
async fn watch(timers: Arc<Timers>, ctx: ActionContext, payload: Payload) -> anyhow::Result<Value> {
    let request = bind_payload(WATCH, &payload)?;
    let key = qualify(&request.namespace, request.output());
    let weak = ctx.store().downgrade();
    let once_action = qualify(ctx.namespace(), ONCE);
    let tick_payload = request.clone();
    let interval = timers.set_interval(request.binding.period, move || {
        let Some(store) = weak.upgrade() else {
            return;
        };
        let pending = store.dispatch(&once_action, Payload::Shared(tick_payload.clone()));
        spawn_detached("watch interval", async move { pending.await.map(|_| ()) });
    })
    .map_err(|_| BindError::MissingRuntime {
        output: request.output().to_string(),
    })?;
    debug!(binding = %key, interval_id = interval, period_ms = request.binding.period.as_millis() as u64, "watching binding");
    if let Err(error) = ctx.commit(ADD_INTERVAL, json!({ "name": key, "interval": interval })) {
        timers.clear_interval(interval);
        return Err(error.into());
    }
    ctx.dispatch(ONCE, payload).await
}

/// Fetches one binding and commits the result.
async fn once(config: Arc<PluginConfig>, ctx: ActionContext, payload: Payload) -> anyhow::Result<Value> {
    let request = bind_payload(ONCE, &payload)?;
    let binding = &request.binding;
    let namespace = request.namespace.as_str();
    let source = config.data_source.clone();

    let mut endpoint = binding.endpoint.as_ref().clone();
    source.apply_defaults(&binding.endpoint_name, &mut endpoint);

    let root = ctx.root_state();
    let local_state = state_at(&root, namespace).cloned().unwrap_or(Value::Null);
    let getters = ctx.store().module_getters(namespace);
    let resolution = resolve_params(&binding.params, &binding.output, &local_state, &getters);

    if config.strict {
        for mismatch in resolution.mismatches() {
            warn!(
                namespace,
                output = %binding.output,
                field = %mismatch.field,
                expected = %mismatch.expected,
                actual = %mismatch.actual,
                "Bound parameter does not match its declared type"
            );
        }
    }

    let params: Map<String, Value> = match resolution {
        ParamResolution::Ready { params, .. } => params,
        ParamResolution::SelfReference => {
            debug!(namespace, output = %binding.output, "binding reads its own output; skipping");
            return Ok(Value::Null);
        }
        ParamResolution::Blocked { field, .. } => {
            if config.log_blocked_binds {
                info!(namespace, output = %binding.output, field = %field, "Binding blocked by unset parameter");
            }
            return Ok(Value::Null);
        }
    };

    let bind_state = ctx.state();
    let args = source.args(&bind_state, &params, &endpoint)?;
    debug!(namespace, output = %binding.output, source = source.kind(), "executing binding");
    let response = source.module(args).await?;

    let mut value = source.assign(response);
    if let Some(transform) = &endpoint.transform {
        value = transform.apply(value);
    }
    if let Some(transform) = &binding.transform {
        value = transform.apply(value);
    }
    if config.strict {
        let expected = endpoint.result_type();
        if !expected.is_type_match(&value) {
            warn!(
                namespace,
                output = %binding.output,
                expected = expected.name(),
                actual = %value,
                "Bound result does not match the endpoint type"
            );
        }
    }

    ctx.commit_root(&qualify(namespace, binding.commit_target()), value.clone())?;
    if binding.loading.is_enabled() {
        ctx.commit_root(&qualify(namespace, &binding.names.done), Value::Null)?;
    }
    if let Some(side_effect) = &binding.side_effect {
        ctx.dispatch_root(&qualify(namespace, side_effect), value.clone()).await?;
    }
    Ok(value)
}

/// Clears the watch registry, every interval and the bound namespaces.
async fn reset(ctx: ActionContext, _payload: Payload) -> anyhow::Result<Value> {
    ctx.commit(CLEAR_WATCH_PARAMS, Value::Null)?;
    ctx.commit(CLEAR_INTERVALS, Value::Null)?;
    ctx.commit(CLEAR_BOUND_STORES, Value::Null)?;
    Ok(Value::Null)
}

fn object_field<'a>(state: &'a mut Map<String, Value>, field: &str) -> &'a mut Map<String, Value> {
    let slot = state.entry(field).or_insert_with(|| json!({}));
    if !slot.is_object() {
        *slot = json!({});
    }
    match slot {
        Value::Object(map) => map,
        _ => unreachable!("slot was just replaced with an object"),
    }
}

/// Appends `action` to the action list of every mutation in `mutations`.
fn register_watch(state: &mut Map<String, Value>, payload: Value) {
    let Some(action) = payload.get("action").and_then(Value::as_str) else {
        warn!(payload = %payload, "watch_params expects {{action, mutations}}");
        return;
    };
    let registry = object_field(state, WATCH_PARAMS);
    for mutation in payload.get("mutations").and_then(Value::as_array).into_iter().flatten() {
        let Some(mutation) = mutation.as_str() else {
            continue;
        };
        match registry.entry(mutation).or_insert_with(|| json!([])) {
            Value::Array(actions) => actions.push(Value::String(action.to_string())),
            other => *other = json!([action]),
        }
    }
}

fn add_bound_store(state: &mut Map<String, Value>, payload: Value) {
    let Some(name) = payload.get("name").and_then(Value::as_str) else {
        return;
    };
    let bound = state.entry("bound_stores").or_insert_with(|| json!([]));
    if !bound.is_array() {
        *bound = json!([]);
    }
    if let Value::Array(bound) = bound
        && !bound.iter().any(|entry| entry.as_str() == Some(name))
    {
        bound.push(Value::String(name.to_string()));
    }
}

/// Records a timer under `name`, cancelling the one it replaces.
fn add_interval(timers: &Timers, state: &mut Map<String, Value>, payload: Value) {
    let (Some(name), Some(id)) = (
        payload.get("name").and_then(Value::as_str),
        payload.get("interval").and_then(Value::as_u64),
    ) else {
        warn!(payload = %payload, "add_interval expects {{name, interval}}");
        return;
    };
    let intervals = object_field(state, "intervals");
    if let Some(previous) = intervals.insert(name.to_string(), Value::from(id)).and_then(|previous| previous.as_u64())
        && previous != id
    {
        timers.clear_interval(previous);
    }
}

fn delete_interval(timers: &Timers, state: &mut Map<String, Value>, payload: Value) {
    let Some(name) = payload.get("name").and_then(Value::as_str).or_else(|| payload.as_str()) else {
        return;
    };
    let intervals = object_field(state, "intervals");
    if let Some(id) = intervals.remove(name).and_then(|id| id.as_u64()) {
        timers.clear_interval(id);
    }
}

fn clear_intervals(timers: &Timers, state: &mut Map<String, Value>) {
    let intervals = object_field(state, "intervals");
    for id in intervals.values().filter_map(Value::as_u64) {
        timers.clear_interval(id);
    }
    intervals.clear();
}
