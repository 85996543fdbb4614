//! Module definitions registered into a [`Store`](crate::Store).

use std::{any::Any, fmt, future::Future, sync::Arc};

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::store::ActionContext;

/// Synchronous state transition applied to a module's state object.
pub type Mutation = Arc<dyn Fn(&mut Map<String, Value>, Value) + Send + Sync>;

/// Asynchronous action. Receives a context bound to the owning module.
pub type Action = Arc<dyn Fn(ActionContext, Payload) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Derived value computed from `(module_state, root_state)`.
pub type Getter = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

pub fn mutation<F>(handler: F) -> Mutation
where
    F: Fn(&mut Map<String, Value>, Value) + Send + Sync + 'static,
{
    Arc::new(handler)
}

pub fn action<F, Fut>(handler: F) -> Action
where
    F: Fn(ActionContext, Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |context, payload| Box::pin(handler(context, payload)))
}

pub fn getter<F>(handler: F) -> Getter
where
    F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
{
    Arc::new(handler)
}

/// Action payload. JSON for application data, `Shared` for in-process values that are not
/// serializable (compiled bindings, handles).
#[derive(Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    Json(Value),
    Shared(Arc<dyn Any + Send + Sync>),
}

impl Payload {
    pub fn shared<T: Any + Send + Sync>(value: T) -> Self {
        Self::Shared(Arc::new(value))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// JSON view of the payload; `null` for empty and shared payloads.
    pub fn into_json(self) -> Value {
        match self {
            Self::Json(value) => value,
            _ => Value::Null,
        }
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Self::Shared(shared) => shared.clone().downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Shared(_) => f.write_str("Shared(..)"),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Self::Empty
    }
}

/// State, mutations, actions, getters and child modules of one namespace.
#[derive(Clone, Default)]
pub struct ModuleDef {
    pub state: Map<String, Value>,
    pub mutations: IndexMap<String, Mutation>,
    pub actions: IndexMap<String, Action>,
    pub getters: IndexMap<String, Getter>,
    pub modules: IndexMap<String, ModuleDef>,
}

impl ModuleDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, name: impl Into<String>, value: Value) -> Self {
        self.state.insert(name.into(), value);
        self
    }

    pub fn with_mutation<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut Map<String, Value>, Value) + Send + Sync + 'static,
    {
        self.mutations.insert(name.into(), mutation(handler));
        self
    }

    pub fn with_action<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ActionContext, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.actions.insert(name.into(), action(handler));
        self
    }

    pub fn with_getter<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        self.getters.insert(name.into(), getter(handler));
        self
    }

    pub fn with_module(mut self, name: impl Into<String>, module: ModuleDef) -> Self {
        self.modules.insert(name.into(), module);
        self
    }
}

impl fmt::Debug for ModuleDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDef")
            .field("state", &self.state)
            .field("mutations", &self.mutations.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .field("modules", &self.modules)
            .finish()
    }
}
