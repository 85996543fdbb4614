//! Transport and runtime helpers used by the statebind engine.
//!
//! - [`http_exec`]: REST request model and the reqwest-backed transport
//! - [`storage`]: local/session/cookie key-value storage
//! - [`timers`]: interval tasks keyed by numeric id
//! - [`async_runtime`]: detached task spawning from synchronous callbacks

pub mod async_runtime;
pub mod http_exec;
pub mod storage;
pub mod timers;

pub use async_runtime::spawn_detached;
pub use http_exec::{HttpTransport, ReqwestTransport, RestRequest, RestResponse};
pub use storage::{STORAGE_PATH_ENV, StorageBackend, StorageError, StorageRequest};
pub use timers::{TimerError, Timers};
