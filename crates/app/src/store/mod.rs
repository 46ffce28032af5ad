//! Realtime key-value tree the app reads from and writes to.
//!
//! Paths are `/`-separated (`devices/relay5`, `Control/MRTA`). A subscription
//! at a path receives the whole subtree rooted there every time anything at
//! or below it changes, and once immediately with the current value.

mod memory;
mod mqtt;
mod tree;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

pub use memory::MemoryStore;
pub use mqtt::{MqttStore, MqttTarget};
pub use tree::Mirror;

/// Point-in-time value delivered for a subscribed path. `value` is `None`
/// when nothing is stored there.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: String,
    pub value: Option<Value>,
}

/// Receiving end of a path subscription. Dropping it releases the listener.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Snapshot>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Snapshot>) -> Self {
        Self { rx }
    }

    /// Next snapshot, or `None` once the store behind it is gone.
    pub async fn recv(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn subscribe(&self, path: &str) -> Subscription;

    /// Write `value` at `path`; `None` writes the absence marker.
    async fn set(&self, path: &str, value: Option<Value>) -> Result<()>;

    fn is_connected(&self) -> bool;
}
