//! Naming conventions for generated mutations and actions.
//!
//! A binding named `user` produces an update mutation, a load or trigger action and optional
//! loading mutations. The exact identifiers come from a [`Naming`] strategy resolved once per
//! binding at compile time.

use std::{fmt, sync::Arc};

use heck::ToUpperCamelCase;
use serde::Deserialize;

/// Formats generated identifiers for a binding output.
pub trait Naming: Send + Sync + fmt::Debug {
    fn update(&self, name: &str) -> String;
    fn load(&self, name: &str) -> String;
    fn loading(&self, name: &str) -> String;
    /// Mutation clearing the loading flag, derived from [`Naming::loading`].
    fn done(&self, name: &str) -> String;
    fn trigger(&self, name: &str) -> String;
}

/// Prefix words shared by both conventions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Prefixes {
    pub update: String,
    pub load: String,
    pub loading: String,
    pub done: String,
    pub trigger: String,
}

impl Default for Prefixes {
    fn default() -> Self {
        Self {
            update: "update".into(),
            load: "load".into(),
            loading: "loading".into(),
            done: "done".into(),
            trigger: "trigger".into(),
        }
    }
}

/// `update_user`, `load_user`, `loading_user`, `done_loading_user`, `trigger_user`.
#[derive(Debug, Clone, Default)]
pub struct SnakeCase {
    pub prefixes: Prefixes,
}

impl SnakeCase {
    pub fn with_prefixes(prefixes: Prefixes) -> Self {
        Self { prefixes }
    }
}

impl Naming for SnakeCase {
    fn update(&self, name: &str) -> String {
        format!("{}_{name}", self.prefixes.update)
    }

    fn load(&self, name: &str) -> String {
        format!("{}_{name}", self.prefixes.load)
    }

    fn loading(&self, name: &str) -> String {
        format!("{}_{name}", self.prefixes.loading)
    }

    fn done(&self, name: &str) -> String {
        format!("{}_{}", self.prefixes.done, self.loading(name))
    }

    fn trigger(&self, name: &str) -> String {
        format!("{}_{name}", self.prefixes.trigger)
    }
}

/// `updateUser`, `loadUser`, `loadingUser`, `doneLoadingUser`, `triggerUser`.
///
/// Every word of the field name is capitalized, not only the first letter: `selected_user_id`
/// becomes `updateSelectedUserId` (never `updateSelected_user_id`), and an already camel-cased
/// `userData` becomes `updateUserData`.
#[derive(Debug, Clone, Default)]
pub struct CamelCase {
    pub prefixes: Prefixes,
}

impl CamelCase {
    pub fn with_prefixes(prefixes: Prefixes) -> Self {
        Self { prefixes }
    }
}

impl Naming for CamelCase {
    fn update(&self, name: &str) -> String {
        format!("{}{}", self.prefixes.update, name.to_upper_camel_case())
    }

    fn load(&self, name: &str) -> String {
        format!("{}{}", self.prefixes.load, name.to_upper_camel_case())
    }

    fn loading(&self, name: &str) -> String {
        format!("{}{}", self.prefixes.loading, name.to_upper_camel_case())
    }

    fn done(&self, name: &str) -> String {
        format!("{}{}", self.prefixes.done, self.loading(name).to_upper_camel_case())
    }

    fn trigger(&self, name: &str) -> String {
        format!("{}{}", self.prefixes.trigger, name.to_upper_camel_case())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingStyle {
    #[default]
    SnakeCase,
    CamelCase,
}

/// Serialized naming configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NamingSettings {
    pub style: NamingStyle,
    pub prefixes: Prefixes,
}

impl NamingSettings {
    pub fn build(&self) -> Arc<dyn Naming> {
        match self.style {
            NamingStyle::SnakeCase => Arc::new(SnakeCase::with_prefixes(self.prefixes.clone())),
            NamingStyle::CamelCase => Arc::new(CamelCase::with_prefixes(self.prefixes.clone())),
        }
    }
}
