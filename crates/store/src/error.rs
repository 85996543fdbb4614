use thiserror::Error;

/// Failure raised by the store when a name cannot be resolved.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown mutation type: {0}")]
    UnknownMutation(String),
    #[error("unknown action type: {0}")]
    UnknownAction(String),
    #[error("duplicate module registration: {0}")]
    DuplicateModule(String),
}
