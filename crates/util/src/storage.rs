//! Key/value storage backing storage-bound endpoints.
//!
//! Three scopes are available: `local` (optionally persisted to a JSON file under the user's
//! config directory), `session` (process lifetime) and `cookie` (entries with an expiry and a
//! path). Values are stored as JSON.

use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use statebind_types::{CookieSettings, StorageScope, TypeSpec};
use thiserror::Error;
use tracing::{debug, warn};

/// Overrides the local storage file location.
pub const STORAGE_PATH_ENV: &str = "STATEBIND_STORAGE_PATH";

pub const STORAGE_FILE_NAME: &str = "local_storage.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Arguments of one storage call, as produced by the storage data source.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageRequest {
    pub key: String,
    pub value: Value,
    pub r#type: TypeSpec,
    pub scope: StorageScope,
    pub cookies: CookieSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CookieEntry {
    value: Value,
    expires_at: DateTime<Utc>,
    path: String,
}

/// Thread-safe storage shared by every storage endpoint of a plugin.
#[derive(Debug, Default)]
pub struct StorageBackend {
    local: Mutex<Map<String, Value>>,
    session: Mutex<Map<String, Value>>,
    cookies: Mutex<HashMap<String, CookieEntry>>,
    persist_path: Option<PathBuf>,
}

impl StorageBackend {
    /// Purely in-memory storage.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Local scope persisted at the default location (see [`STORAGE_PATH_ENV`]).
    pub fn persistent() -> Result<Self, StorageError> {
        Self::persistent_at(default_storage_path())
    }

    /// Local scope persisted at `path`. A missing file starts empty; an unreadable one is logged
    /// and replaced on the next write.
    pub fn persistent_at(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let local = load_local(&path)?;
        Ok(Self {
            local: Mutex::new(local),
            persist_path: Some(path),
            ..Self::default()
        })
    }

    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }

    pub fn get(&self, scope: StorageScope, key: &str) -> Option<Value> {
        match scope {
            StorageScope::Local => self.local.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned(),
            StorageScope::Session => self.session.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned(),
            StorageScope::Cookie => {
                let mut cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
                let entry = cookies.get(key).map(|entry| (entry.expires_at > Utc::now(), entry.value.clone()));
                match entry {
                    Some((true, value)) => Some(value),
                    Some((false, _)) => {
                        cookies.remove(key);
                        None
                    }
                    None => None,
                }
            }
        }
    }

    pub fn set(&self, scope: StorageScope, key: &str, value: Value, cookies: &CookieSettings) -> Result<(), StorageError> {
        match scope {
            StorageScope::Local => {
                let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
                local.insert(key.to_string(), value);
                self.persist(&local)?;
            }
            StorageScope::Session => {
                self.session.lock().unwrap_or_else(PoisonError::into_inner).insert(key.to_string(), value);
            }
            StorageScope::Cookie => {
                let expires_at = i64::try_from(cookies.expires)
                    .ok()
                    .and_then(ChronoDuration::try_milliseconds)
                    .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                self.cookies.lock().unwrap_or_else(PoisonError::into_inner).insert(
                    key.to_string(),
                    CookieEntry {
                        value,
                        expires_at,
                        path: cookies.path.clone(),
                    },
                );
            }
        }
        Ok(())
    }

    pub fn remove(&self, scope: StorageScope, key: &str) -> Result<Option<Value>, StorageError> {
        let removed = match scope {
            StorageScope::Local => {
                let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
                let removed = local.remove(key);
                if removed.is_some() {
                    self.persist(&local)?;
                }
                removed
            }
            StorageScope::Session => self.session.lock().unwrap_or_else(PoisonError::into_inner).remove(key),
            StorageScope::Cookie => self
                .cookies
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(key)
                .map(|entry| entry.value),
        };
        Ok(removed)
    }

    /// Path a cookie was written with, if it is still live.
    pub fn cookie_path(&self, key: &str) -> Option<String> {
        let cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        cookies.get(key).filter(|entry| entry.expires_at > Utc::now()).map(|entry| entry.path.clone())
    }

    /// Runs one storage call.
    ///
    /// - `null` deletes the key and yields `null`.
    /// - A value that is unset for its declared type reads the stored value (`null` when absent).
    /// - Anything else is written and echoed back.
    pub fn execute(&self, request: &StorageRequest) -> Result<Value, StorageError> {
        if request.value.is_null() {
            debug!(key = %request.key, scope = ?request.scope, "deleting stored value");
            self.remove(request.scope, &request.key)?;
            return Ok(Value::Null);
        }
        if request.r#type.is_unset(&request.value) {
            return Ok(self.get(request.scope, &request.key).unwrap_or(Value::Null));
        }
        debug!(key = %request.key, scope = ?request.scope, "storing value");
        self.set(request.scope, &request.key, request.value.clone(), &request.cookies)?;
        Ok(request.value.clone())
    }

    fn persist(&self, local: &Map<String, Value>) -> Result<(), StorageError> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(local)?)?;
        Ok(())
    }
}

fn default_storage_path() -> PathBuf {
    if let Ok(path) = env::var(STORAGE_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("statebind")
        .join(STORAGE_FILE_NAME)
}

fn load_local(path: &Path) -> Result<Map<String, Value>, StorageError> {
    match fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(local) => Ok(local),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "Failed to parse local storage file; starting empty");
                Ok(Map::new())
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
        Err(error) => Err(StorageError::Io(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(key: &str, value: Value, scope: StorageScope) -> StorageRequest {
        StorageRequest {
            key: key.into(),
            value,
            r#type: TypeSpec::String,
            scope,
            cookies: CookieSettings::default(),
        }
    }

    #[test]
    fn unset_values_read_and_set_values_write() {
        let storage = StorageBackend::in_memory();
        assert_eq!(storage.execute(&request("token", json!(""), StorageScope::Local)).expect("read"), Value::Null);
        assert_eq!(storage.execute(&request("token", json!("abc"), StorageScope::Local)).expect("write"), json!("abc"));
        assert_eq!(storage.execute(&request("token", json!(""), StorageScope::Local)).expect("read back"), json!("abc"));
    }

    #[test]
    fn null_deletes_the_key() {
        let storage = StorageBackend::in_memory();
        storage.execute(&request("token", json!("abc"), StorageScope::Session)).expect("write");
        assert_eq!(storage.execute(&request("token", Value::Null, StorageScope::Session)).expect("delete"), Value::Null);
        assert_eq!(storage.get(StorageScope::Session, "token"), None);
    }

    #[test]
    fn scopes_are_isolated() {
        let storage = StorageBackend::in_memory();
        storage.execute(&request("key", json!("local"), StorageScope::Local)).expect("local write");
        assert_eq!(storage.get(StorageScope::Session, "key"), None);
        assert_eq!(storage.get(StorageScope::Cookie, "key"), None);
    }

    #[test]
    fn cookies_expire_and_keep_their_path() {
        let storage = StorageBackend::in_memory();
        let live = CookieSettings {
            expires: 60_000,
            path: "/app".into(),
        };
        storage.set(StorageScope::Cookie, "session", json!("id"), &live).expect("live cookie");
        assert_eq!(storage.get(StorageScope::Cookie, "session"), Some(json!("id")));
        assert_eq!(storage.cookie_path("session").as_deref(), Some("/app"));

        let expired = CookieSettings {
            expires: 0,
            path: "/".into(),
        };
        storage.set(StorageScope::Cookie, "stale", json!("id"), &expired).expect("expired cookie");
        assert_eq!(storage.get(StorageScope::Cookie, "stale"), None);
    }

    #[test]
    fn local_scope_persists_to_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join(STORAGE_FILE_NAME);
        {
            let storage = StorageBackend::persistent_at(&path).expect("open storage");
            storage.execute(&request("theme", json!("dark"), StorageScope::Local)).expect("write");
        }
        let reopened = StorageBackend::persistent_at(&path).expect("reopen storage");
        assert_eq!(reopened.get(StorageScope::Local, "theme"), Some(json!("dark")));
        reopened.remove(StorageScope::Local, "theme").expect("remove");
        let emptied = StorageBackend::persistent_at(&path).expect("reopen after removal");
        assert_eq!(emptied.get(StorageScope::Local, "theme"), None);
    }

    #[test]
    fn storage_path_honours_env_override() {
        temp_env::with_var(STORAGE_PATH_ENV, Some("/tmp/statebind-test/storage.json"), || {
            assert_eq!(default_storage_path(), PathBuf::from("/tmp/statebind-test/storage.json"));
        });
    }
}
