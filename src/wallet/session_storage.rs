// src/wallet/session_storage.rs
//! Session-scoped storage for the active identity.
//!
//! Session storage lives exactly as long as the serving process: nothing is
//! ever written to durable or cross-session storage. The only key in use is
//! [`IDENTITY_KEY`], holding the serialized identity string.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Key under which the bound identity is persisted.
pub const IDENTITY_KEY: &str = "did";

/// Key/value storage scoped to one session.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    /// Returns true if a value was present.
    fn remove(&self, key: &str) -> bool;
}

/// In-process session storage.
///
/// # Note
/// Uses a mutex-guarded hashmap; contents vanish when the process exits.
#[derive(Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) -> bool {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key).is_some()
    }
}
