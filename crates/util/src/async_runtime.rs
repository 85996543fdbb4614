//! Detached task helpers.
//!
//! Work triggered from synchronous callbacks (store subscriptions, timer ticks) is handed to the
//! current Tokio runtime without awaiting it.

use std::future::Future;

use tokio::runtime::Handle;
use tracing::warn;

/// Spawns `future` on the current runtime and logs its error, if any.
///
/// Returns `false` (and logs) when called outside a Tokio runtime.
pub fn spawn_detached<F>(task: &'static str, future: F) -> bool
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(error) = future.await {
                    warn!(task, error = %error, "detached task failed");
                }
            });
            true
        }
        Err(_) => {
            warn!(task, "no Tokio runtime available; dropping detached task");
            false
        }
    }
}
