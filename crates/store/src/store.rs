//! Namespaced JSON state container.
//!
//! State lives in one JSON object. Modules own a slice of it addressed by a `/`-separated path
//! (`""` is the root). Mutations are synchronous and are the only way state changes; every commit
//! notifies subscribers synchronously with the mutation record and a snapshot of the root state.
//! Actions are async and may commit and dispatch further.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        Arc, PoisonError, RwLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::{
    error::StoreError,
    module::{Action, Getter, ModuleDef, Mutation, Payload},
};

/// Mutation descriptor handed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationRecord {
    /// Fully qualified mutation name, e.g. `profile/update_user`.
    #[serde(rename = "type")]
    pub r#type: String,
    pub payload: Value,
}

/// Identifier returned by [`Store::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

pub type Subscriber = Arc<dyn Fn(&MutationRecord, &Value) + Send + Sync>;

#[derive(Clone)]
struct Registered<T> {
    path: String,
    name: String,
    handler: T,
}

struct StoreInner {
    state: RwLock<Value>,
    modules: RwLock<HashSet<String>>,
    mutations: RwLock<HashMap<String, Registered<Mutation>>>,
    actions: RwLock<HashMap<String, Registered<Action>>>,
    getters: RwLock<HashMap<String, Registered<Getter>>>,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber)>>,
    next_subscription: AtomicU64,
}

/// Shared handle to the store. Cloning is cheap.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

/// Non-owning handle, used by long-lived callbacks held inside the store itself.
#[derive(Clone)]
pub struct WeakStore {
    inner: Weak<StoreInner>,
}

impl WeakStore {
    pub fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("state", &self.state()).finish_non_exhaustive()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// Joins a module path and a local name.
pub fn qualify(path: &str, name: &str) -> String {
    if path.is_empty() { name.to_string() } else { format!("{path}/{name}") }
}

/// Looks up the state slice of a module path inside a root state snapshot.
pub fn state_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path).try_fold(root, |current, segment| current.get(segment))
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was replaced with an object"),
    }
}

fn object_at_mut<'a>(root: &'a mut Value, path: &str) -> &'a mut Map<String, Value> {
    let mut current = root;
    for segment in segments(path) {
        current = ensure_object(current)
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(current)
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(Value::Object(Map::new())),
                modules: RwLock::new(HashSet::new()),
                mutations: RwLock::new(HashMap::new()),
                actions: RwLock::new(HashMap::new()),
                getters: RwLock::new(HashMap::new()),
                subscribers: RwLock::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    /// Store whose root module is `root`.
    pub fn with_root(root: ModuleDef) -> Result<Self, StoreError> {
        let store = Self::new();
        store.register_module("", root)?;
        Ok(store)
    }

    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Registers a module (and its children) at `path`. The root path merges into the root module.
    pub fn register_module(&self, path: &str, module: ModuleDef) -> Result<(), StoreError> {
        let path = segments(path).collect::<Vec<_>>().join("/");
        if !path.is_empty() {
            let mut modules = self.inner.modules.write().unwrap_or_else(PoisonError::into_inner);
            if !modules.insert(path.clone()) {
                return Err(StoreError::DuplicateModule(path));
            }
        }

        let ModuleDef {
            state,
            mutations,
            actions,
            getters,
            modules,
        } = module;
        debug!(
            module = %path,
            state_fields = state.len(),
            mutations = mutations.len(),
            actions = actions.len(),
            "registering store module"
        );

        {
            let mut root = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
            let slice = object_at_mut(&mut root, &path);
            for (name, value) in state {
                slice.insert(name, value);
            }
        }
        register_all(&self.inner.mutations, &path, mutations);
        register_all(&self.inner.actions, &path, actions);
        register_all(&self.inner.getters, &path, getters);

        for (child, module) in modules {
            self.register_module(&qualify(&path, &child), module)?;
        }
        Ok(())
    }

    pub fn has_module(&self, path: &str) -> bool {
        path.is_empty() || self.inner.modules.read().unwrap_or_else(PoisonError::into_inner).contains(path)
    }

    pub fn has_mutation(&self, name: &str) -> bool {
        self.inner.mutations.read().unwrap_or_else(PoisonError::into_inner).contains_key(name)
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.inner.actions.read().unwrap_or_else(PoisonError::into_inner).contains_key(name)
    }

    /// Snapshot of the whole state tree.
    pub fn state(&self) -> Value {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Snapshot of one module's state slice.
    pub fn module_state(&self, path: &str) -> Option<Value> {
        let root = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
        state_at(&root, path).cloned()
    }

    /// Evaluates a getter by its qualified name.
    pub fn getter(&self, name: &str) -> Option<Value> {
        let entry = self.inner.getters.read().unwrap_or_else(PoisonError::into_inner).get(name).cloned()?;
        let root = self.state();
        let local = state_at(&root, &entry.path).cloned().unwrap_or(Value::Null);
        Some((entry.handler)(&local, &root))
    }

    /// Evaluates every getter registered by the module at `path`, keyed by local name.
    pub fn module_getters(&self, path: &str) -> Map<String, Value> {
        let entries: Vec<Registered<Getter>> = self
            .inner
            .getters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|entry| entry.path == path)
            .cloned()
            .collect();
        if entries.is_empty() {
            return Map::new();
        }
        let root = self.state();
        let local = state_at(&root, path).cloned().unwrap_or(Value::Null);
        entries
            .into_iter()
            .map(|entry| {
                let value = (entry.handler)(&local, &root);
                (entry.name, value)
            })
            .collect()
    }

    /// Applies a mutation by its qualified name, then notifies subscribers.
    pub fn commit(&self, name: &str, payload: Value) -> Result<(), StoreError> {
        let entry = self
            .inner
            .mutations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownMutation(name.to_string()))?;

        let snapshot = {
            let mut root = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
            let slice = object_at_mut(&mut root, &entry.path);
            (entry.handler)(slice, payload.clone());
            root.clone()
        };
        trace!(mutation = %name, "committed mutation");

        let record = MutationRecord {
            r#type: name.to_string(),
            payload,
        };
        let subscribers: Vec<Subscriber> = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, subscriber)| subscriber.clone())
            .collect();
        for subscriber in subscribers {
            subscriber(&record, &snapshot);
        }
        Ok(())
    }

    /// Runs an action by its qualified name.
    ///
    /// The returned future is `'static` so it can be spawned; unknown actions resolve to an error.
    pub fn dispatch(&self, name: &str, payload: impl Into<Payload>) -> BoxFuture<'static, anyhow::Result<Value>> {
        let entry = self.inner.actions.read().unwrap_or_else(PoisonError::into_inner).get(name).cloned();
        match entry {
            Some(entry) => {
                trace!(action = %name, "dispatching action");
                let context = ActionContext {
                    store: self.clone(),
                    path: entry.path,
                };
                (entry.handler)(context, payload.into())
            }
            None => {
                let error = StoreError::UnknownAction(name.to_string());
                Box::pin(async move { Err(error.into()) })
            }
        }
    }

    /// Registers a callback invoked synchronously after every commit.
    pub fn subscribe<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&MutationRecord, &Value) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(subscriber)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }
}

fn register_all<T>(table: &RwLock<HashMap<String, Registered<T>>>, path: &str, entries: indexmap::IndexMap<String, T>) {
    let mut table = table.write().unwrap_or_else(PoisonError::into_inner);
    for (name, handler) in entries {
        table.insert(
            qualify(path, &name),
            Registered {
                path: path.to_string(),
                name,
                handler,
            },
        );
    }
}

/// Handle given to actions, bound to the module that registered the action.
///
/// `commit`/`dispatch` resolve names relative to that module; the `_root` variants take
/// fully qualified names.
#[derive(Clone)]
pub struct ActionContext {
    store: Store,
    path: String,
}

impl ActionContext {
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Module path, `""` for the root module.
    pub fn namespace(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> Value {
        self.store.module_state(&self.path).unwrap_or(Value::Null)
    }

    pub fn root_state(&self) -> Value {
        self.store.state()
    }

    pub fn getters(&self) -> Map<String, Value> {
        self.store.module_getters(&self.path)
    }

    pub fn commit(&self, name: &str, payload: Value) -> Result<(), StoreError> {
        self.store.commit(&qualify(&self.path, name), payload)
    }

    pub fn commit_root(&self, name: &str, payload: Value) -> Result<(), StoreError> {
        self.store.commit(name, payload)
    }

    pub fn dispatch(&self, name: &str, payload: impl Into<Payload>) -> BoxFuture<'static, anyhow::Result<Value>> {
        self.store.dispatch(&qualify(&self.path, name), payload)
    }

    pub fn dispatch_root(&self, name: &str, payload: impl Into<Payload>) -> BoxFuture<'static, anyhow::Result<Value>> {
        self.store.dispatch(name, payload)
    }
}
