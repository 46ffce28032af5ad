//! Device state synchroniser: one subscription per device, remote changes
//! folded into the local board.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::encoding::BackendEncoding;
use crate::registry::Registry;
use crate::state::SharedState;
use crate::store::RemoteStore;

/// Owns the per-device listener tasks. Dropping it releases every listener.
pub struct SyncHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn listener_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }

    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct Synchronizer;

impl Synchronizer {
    pub fn start(
        store: Arc<dyn RemoteStore>,
        registry: Registry,
        encoding: BackendEncoding,
        shared: SharedState,
    ) -> SyncHandle {
        let mut tasks = Vec::with_capacity(registry.len());

        for (index, device) in registry.devices().iter().enumerate() {
            let Some(path) = registry.backend_path(index) else {
                continue;
            };
            let mut sub = store.subscribe(&path);
            let shared = shared.clone();
            let key = device.key;

            tasks.push(tokio::spawn(async move {
                while let Some(snap) = sub.recv().await {
                    // No data at the path: keep whatever the board shows.
                    let Some(value) = snap.value else {
                        debug!(device = key, "no remote value");
                        continue;
                    };
                    let on = encoding.decode(&value);
                    let mut st = shared.write().await;
                    if st.confirm_device(index, on) {
                        info!(device = key, on, "remote state change");
                    }
                }
            }));
        }

        info!(profile = %registry.profile(), listeners = tasks.len(), "device sync started");
        SyncHandle { tasks }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProfileId;
    use crate::state::{AnimationState, AppState};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn start(profile: ProfileId) -> (Arc<MemoryStore>, SharedState, SyncHandle) {
        let store = Arc::new(MemoryStore::new());
        let registry = Registry::for_profile(profile);
        let shared = AppState::shared(registry);
        let handle = Synchronizer::start(store.clone(), registry, profile.encoding(), shared.clone());
        (store, shared, handle)
    }

    #[tokio::test]
    async fn remote_on_updates_board_and_animation() {
        let (store, shared, _h) = start(ProfileId::IotDemo);
        store.inject("devices/relay5", Some(json!({"message": "ON"})));
        settle().await;

        let st = shared.read().await;
        let slot = st.board.slot(4).unwrap();
        assert!(slot.on);
        assert!(matches!(slot.animation, AnimationState::Running { .. }));
    }

    #[tokio::test]
    async fn repeated_remote_value_is_idempotent() {
        let (store, shared, _h) = start(ProfileId::Nckh);
        store.inject("Control/MRTA", Some(json!("1")));
        settle().await;
        store.inject("Control/MRTA", Some(json!("1")));
        settle().await;

        let st = shared.read().await;
        assert_eq!(st.board.slot(0).unwrap().transitions, 1);
    }

    #[tokio::test]
    async fn missing_value_leaves_state_alone() {
        let (store, shared, _h) = start(ProfileId::Nckh);
        store.inject("Control/LED", Some(json!("1")));
        settle().await;
        store.inject("Control/LED", None);
        settle().await;

        assert_eq!(shared.read().await.board.is_on(6), Some(true));
    }

    #[tokio::test]
    async fn numeric_digit_decodes_on() {
        let (store, shared, _h) = start(ProfileId::Nckh);
        store.inject("Control/FAN", Some(json!(1)));
        settle().await;
        assert_eq!(shared.read().await.board.is_on(5), Some(true));
    }

    #[tokio::test]
    async fn parent_write_reaches_children() {
        let (store, shared, _h) = start(ProfileId::Nckh);
        store.inject("Control", Some(json!({"MSP": "1", "OXI": "1"})));
        settle().await;

        let st = shared.read().await;
        assert_eq!(st.board.is_on(1), Some(true));
        assert_eq!(st.board.is_on(4), Some(true));
        assert_eq!(st.board.is_on(0), Some(false));
    }

    #[tokio::test]
    async fn stop_releases_listeners() {
        let (store, shared, mut handle) = start(ProfileId::Nckh);
        assert_eq!(handle.listener_count(), 7);
        handle.stop();
        settle().await;

        store.inject("Control/LED", Some(json!("1")));
        settle().await;
        assert_eq!(shared.read().await.board.is_on(6), Some(false));
        assert_eq!(store.subscriber_count(), 0);
    }
}
