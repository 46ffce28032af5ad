//! In-process realtime tree. Used by tests and by profiles configured with
//! `transport = "memory"` for broker-less development.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{Mirror, RemoteStore, Subscription};

pub struct MemoryStore {
    mirror: Mutex<Mirror>,
    connected: AtomicBool,
    failing_writes: AtomicUsize,
    writes: Mutex<Vec<(String, Option<Value>)>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            mirror: Mutex::new(Mirror::new()),
            connected: AtomicBool::new(true),
            failing_writes: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make the next `n` writes fail without touching the tree.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Apply a change as if another writer (the pond controller board, a
    /// second phone) had made it.
    pub fn inject(&self, path: &str, value: Option<Value>) {
        if let Ok(mut mirror) = self.mirror.lock() {
            mirror.apply(path, value);
        }
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.mirror
            .lock()
            .ok()
            .and_then(|m| m.tree().get(path).cloned())
    }

    /// Every accepted write in order, for assertions.
    pub fn writes(&self) -> Vec<(String, Option<Value>)> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.mirror
            .lock()
            .map(|m| m.subscriber_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn subscribe(&self, path: &str) -> Subscription {
        match self.mirror.lock() {
            Ok(mut mirror) => mirror.subscribe(path),
            Err(poisoned) => poisoned.into_inner().subscribe(path),
        }
    }

    async fn set(&self, path: &str, value: Option<Value>) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            bail!("store offline");
        }
        let failing = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            bail!("write rejected at {path}");
        }

        if let Ok(mut writes) = self.writes.lock() {
            writes.push((path.to_string(), value.clone()));
        }
        self.inject(path, value);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
