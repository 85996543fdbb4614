//! Configuration and lifecycle errors raised by the binding engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BindError {
    /// A binding names an endpoint found in neither the module nor the plugin endpoint table.
    #[error("Binding '{output}' refers to unknown endpoint '{endpoint}'")]
    UnknownEndpoint { output: String, endpoint: String },

    #[error("Binding '{output}' declares unrecognized bind mode '{mode}'")]
    InvalidBindMode { output: String, mode: String },

    #[error("Bound store declared without a namespace")]
    MissingNamespace,

    /// `start_bind` dispatched again for a namespace that was not reset.
    #[error("Tried to {action} twice. Dispatch {reset} before restarting bind")]
    AlreadyBound { action: String, reset: String },

    #[error("Binding '{output}' cannot be watched outside a Tokio runtime")]
    MissingRuntime { output: String },

    /// An engine action received something other than a compiled binding.
    #[error("Action '{action}' expected a bind payload")]
    InvalidPayload { action: String },
}
