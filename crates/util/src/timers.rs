//! Interval timers over the Tokio runtime.
//!
//! Each interval is a spawned task identified by a numeric id. The id is what bind state stores;
//! the task handle stays here so it can be aborted.

use std::{
    collections::HashMap,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use thiserror::Error;
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::debug;

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("interval timers require a running Tokio runtime")]
    NoRuntime,
}

/// Table of running interval tasks.
#[derive(Debug, Default)]
pub struct Timers {
    handles: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls `tick` every `period`, first after one full period. Returns the interval id.
    pub fn set_interval<F>(&self, period: Duration, tick: F) -> Result<u64, TimerError>
    where
        F: Fn() + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| TimerError::NoRuntime)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let period = period.max(Duration::from_millis(1));
        let task = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tick();
            }
        });
        debug!(interval_id = id, period_ms = period.as_millis() as u64, "interval started");
        self.handles.lock().unwrap_or_else(PoisonError::into_inner).insert(id, task);
        Ok(id)
    }

    /// Stops an interval. Returns `false` for unknown ids.
    pub fn clear_interval(&self, id: u64) -> bool {
        let handle = self.handles.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
        match handle {
            Some(handle) => {
                handle.abort();
                debug!(interval_id = id, "interval cleared");
                true
            }
            None => false,
        }
    }

    /// Stops every interval and returns how many were running.
    pub fn clear_all(&self) -> usize {
        let drained: Vec<JoinHandle<()>> = self.handles.lock().unwrap_or_else(PoisonError::into_inner).drain().map(|(_, handle)| handle).collect();
        for handle in &drained {
            handle.abort();
        }
        drained.len()
    }

    pub fn is_active(&self, id: u64) -> bool {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner).contains_key(&id)
    }

    pub fn active_count(&self) -> usize {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.clear_all();
    }
}
