//! Per-(ticker, component) async mutexes.
//!
//! At most one pipeline run holds a given key. Distinct keys never contend.
//! Idle entries are pruned on the next acquisition.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use ticker_mirror_core::models::Component;

type Key = (String, Component);

#[derive(Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<Key, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive ownership of (ticker, component). Released on drop.
    pub async fn lock(&self, ticker: &str, component: Component) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // only the map holds a reference: nobody waits on or owns it
            map.retain(|_, m| Arc::strong_count(m) > 1);
            map.entry((ticker.to_string(), component))
                .or_default()
                .clone()
        };
        mutex.lock_owned().await
    }

    /// Keys currently tracked, including idle ones not yet pruned.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
