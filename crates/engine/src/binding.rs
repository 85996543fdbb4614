//! Compiled bindings.

use std::{sync::Arc, time::Duration};

use indexmap::IndexMap;
use statebind_types::{BindMode, Endpoint, LoadingMode, Naming, Transform};

use crate::params::EffectiveParam;

/// Poll period of `watch` bindings that do not set one.
pub const DEFAULT_WATCH_PERIOD: Duration = Duration::from_secs(10);

/// Generated identifiers for one binding, resolved once through the plugin's [`Naming`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingNames {
    /// Mutation writing the output field.
    pub update: String,
    /// Load action, or trigger action for `trigger` bindings.
    pub action: String,
    /// Loading flag field and the mutation setting it.
    pub loading: String,
    /// Mutation clearing the loading flag.
    pub done: String,
}

impl BindingNames {
    pub fn new(naming: &dyn Naming, output: &str, mode: BindMode) -> Self {
        Self {
            update: naming.update(output),
            action: match mode {
                BindMode::Trigger => naming.trigger(output),
                _ => naming.load(output),
            },
            loading: naming.loading(output),
            done: naming.done(output),
        }
    }
}

/// A binding after defaults, endpoint lookup and parameter mapping. Immutable once compiled.
#[derive(Debug, Clone)]
pub struct Binding {
    pub output: String,
    /// Name used for endpoint defaults: the endpoint's table name, or the output for inline ones.
    pub endpoint_name: String,
    pub endpoint: Arc<Endpoint>,
    pub mode: BindMode,
    /// Keyed by local field name.
    pub params: IndexMap<String, EffectiveParam>,
    pub create_params: bool,
    pub redirect: Option<String>,
    pub side_effect: Option<String>,
    pub loading: LoadingMode,
    pub period: Duration,
    pub transform: Option<Transform>,
    pub names: BindingNames,
}

impl Binding {
    pub fn is_trigger(&self) -> bool {
        self.mode == BindMode::Trigger
    }

    /// Module-local mutation the fetched value is committed through.
    pub fn commit_target(&self) -> &str {
        self.redirect.as_deref().unwrap_or(&self.names.update)
    }

    /// Local fields whose update mutations re-run this binding: mapped fields plus the watch
    /// targets of computed parameters.
    pub fn watched_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for (local, param) in &self.params {
            let targets = match &param.computed {
                Some(computed) => computed.watch.clone(),
                None => vec![local.clone()],
            };
            for field in targets {
                if !fields.contains(&field) {
                    fields.push(field);
                }
            }
        }
        fields
    }
}

/// Payload handed from a generated load action to the engine's `bind`/`watch`/`once` actions.
#[derive(Debug, Clone)]
pub struct BindPayload {
    pub binding: Arc<Binding>,
    /// Namespace of the module owning the binding.
    pub namespace: String,
}

impl BindPayload {
    pub fn new(binding: Arc<Binding>, namespace: impl Into<String>) -> Self {
        Self {
            binding,
            namespace: namespace.into(),
        }
    }

    pub fn output(&self) -> &str {
        &self.binding.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::map_endpoint_types;
    use serde_json::json;
    use statebind_types::{CamelCase, ComputedParam, ParamSource, SnakeCase, TypeSpec};

    fn binding(mode: BindMode, param_map: IndexMap<String, ParamSource>) -> Binding {
        let endpoint = Endpoint::rest("/user/data/")
            .with_param("user_id", TypeSpec::Number)
            .with_param("total", TypeSpec::Number);
        let params = map_endpoint_types(&param_map, endpoint.params.as_ref().expect("params"));
        Binding {
            output: "user_data".into(),
            endpoint_name: "user_data".into(),
            endpoint: Arc::new(endpoint),
            mode,
            params,
            create_params: true,
            redirect: None,
            side_effect: None,
            loading: LoadingMode::Off,
            period: DEFAULT_WATCH_PERIOD,
            transform: None,
            names: BindingNames::new(&SnakeCase::default(), "user_data", mode),
        }
    }

    #[test]
    fn names_follow_the_mode_and_convention() {
        let snake = BindingNames::new(&SnakeCase::default(), "posts", BindMode::Trigger);
        assert_eq!(snake.action, "trigger_posts");
        assert_eq!(snake.update, "update_posts");
        assert_eq!(snake.done, "done_loading_posts");

        let camel = BindingNames::new(&CamelCase::default(), "user_data", BindMode::Watch);
        assert_eq!(camel.action, "loadUserData");
        assert_eq!(camel.update, "updateUserData");
    }

    #[test]
    fn watched_fields_include_computed_targets() {
        let mut param_map = IndexMap::new();
        param_map.insert("selected_user_id".to_string(), ParamSource::from("user_id"));
        param_map.insert(
            "total".to_string(),
            ParamSource::Computed(ComputedParam::new(|state, _| json!(state["a"].as_i64().unwrap_or(0) + 1)).watching(["a", "selected_user_id"])),
        );
        let binding = binding(BindMode::Watch, param_map);
        assert_eq!(binding.watched_fields(), vec!["selected_user_id".to_string(), "a".to_string()]);
    }

    #[test]
    fn redirect_replaces_the_commit_target() {
        let mut binding = binding(BindMode::Trigger, IndexMap::new());
        assert_eq!(binding.commit_target(), "update_user_data");
        binding.redirect = Some("update_token".into());
        assert_eq!(binding.commit_target(), "update_token");
        assert!(binding.is_trigger());
    }
}
