//! # Statebind Store
//!
//! A small namespaced state container: JSON state split into module slices, synchronous
//! mutations, async actions returning boxed futures, getters, and synchronous mutation
//! subscriptions. The binding engine builds on the contract this crate exposes:
//!
//! - `commit(name, payload)` / `dispatch(name, payload)` with qualified or module-relative names
//! - `subscribe(fn(&MutationRecord, &root_state))` invoked after every commit
//!
//! ```rust
//! use serde_json::json;
//! use statebind_store::{ModuleDef, Store};
//!
//! let store = Store::new();
//! store.register_module(
//!     "profile",
//!     ModuleDef::new()
//!         .with_state("name", json!(""))
//!         .with_mutation("update_name", |state, payload| {
//!             state.insert("name".into(), payload);
//!         }),
//! )?;
//! store.commit("profile/update_name", json!("james"))?;
//! assert_eq!(store.module_state("profile"), Some(json!({ "name": "james" })));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod module;
pub mod store;

pub use error::StoreError;
pub use module::{Action, Getter, ModuleDef, Mutation, Payload, action, getter, mutation};
pub use store::{ActionContext, MutationRecord, Store, Subscriber, SubscriptionId, WeakStore, qualify, state_at};
