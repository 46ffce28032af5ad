//! Optimistic device writes with rollback.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::encoding::BackendEncoding;
use crate::registry::Registry;
use crate::state::SharedState;
use crate::store::RemoteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// Store not connected or unknown device; nothing was touched.
    NotReady,
    Written,
    /// The remote write failed and the board was put back.
    RolledBack,
}

/// Why a device could not be driven at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    UnknownDevice,
    NotConnected,
}

/// A local change already shown on the board, waiting for its remote write.
struct Pending {
    index: usize,
    path: String,
    previous: bool,
    desired: bool,
}

#[derive(Clone)]
pub struct Controller {
    store: Arc<dyn RemoteStore>,
    registry: Registry,
    encoding: BackendEncoding,
    shared: SharedState,
}

impl Controller {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        registry: Registry,
        encoding: BackendEncoding,
        shared: SharedState,
    ) -> Self {
        Self {
            store,
            registry,
            encoding,
            shared,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Show `desired` immediately, then write it. The board is reverted if
    /// the write fails. Concurrent calls for one device are not serialised.
    pub async fn set_device(&self, index: usize, desired: bool) -> WriteOutcome {
        match self.apply_local(index, |_| desired).await {
            Ok(pending) => self.write_remote(pending).await,
            Err(_) => WriteOutcome::NotReady,
        }
    }

    /// Flip the local state now and write it in the background. Reading and
    /// negating happen under one lock, so back-to-back toggles alternate.
    pub async fn toggle(&self, index: usize) -> Result<bool, Refusal> {
        let pending = self.apply_local(index, |on| !on).await?;
        let desired = pending.desired;
        let this = self.clone();
        tokio::spawn(async move {
            this.write_remote(pending).await;
        });
        Ok(desired)
    }

    /// Precondition check plus the optimistic board update.
    async fn apply_local(
        &self,
        index: usize,
        desired: impl FnOnce(bool) -> bool,
    ) -> Result<Pending, Refusal> {
        let Some(path) = self.registry.backend_path(index) else {
            warn!(index, "unknown device index");
            return Err(Refusal::UnknownDevice);
        };
        let mut st = self.shared.write().await;
        if !self.store.is_connected() {
            warn!(%path, "store not connected");
            st.record_error(format!("{path}: store not connected"));
            return Err(Refusal::NotConnected);
        }
        let current = st.board.is_on(index).ok_or(Refusal::UnknownDevice)?;
        let desired = desired(current);
        let previous = st
            .set_device(index, desired)
            .ok_or(Refusal::UnknownDevice)?;
        Ok(Pending {
            index,
            path,
            previous,
            desired,
        })
    }

    async fn write_remote(&self, pending: Pending) -> WriteOutcome {
        let Pending {
            index,
            path,
            previous,
            desired,
        } = pending;
        let value = self.encoding.encode(desired);
        match self.store.set(&path, Some(value)).await {
            Ok(()) => {
                info!(%path, on = desired, "device write");
                WriteOutcome::Written
            }
            Err(e) => {
                error!(%path, "device write failed: {e:#}");
                let mut st = self.shared.write().await;
                st.revert_device(index, previous);
                WriteOutcome::RolledBack
            }
        }
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

    fn controller(profile: ProfileId) -> (Arc<MemoryStore>, SharedState, Controller) {
        let store = Arc::new(MemoryStore::new());
        let registry = Registry::for_profile(profile);
        let shared = AppState::shared(registry);
        let ctl = Controller::new(store.clone(), registry, profile.encoding(), shared.clone());
        (store, shared, ctl)
    }

    #[tokio::test]
    async fn write_encodes_for_profile_a() {
        let (store, shared, ctl) = controller(ProfileId::IotDemo);
        assert_eq!(ctl.set_device(4, true).await, WriteOutcome::Written);
        assert_eq!(
            store.writes(),
            vec![("devices/relay5".to_string(), Some(json!({"message": "ON"})))]
        );
        assert_eq!(shared.read().await.board.is_on(4), Some(true));
    }

    #[tokio::test]
    async fn write_encodes_for_profile_b() {
        let (store, _shared, ctl) = controller(ProfileId::Nckh);
        ctl.set_device(0, true).await;
        assert_eq!(store.get("Control/MRTA"), Some(json!("1")));
    }

    #[tokio::test]
    async fn failed_write_rolls_back() {
        let (store, shared, ctl) = controller(ProfileId::Nckh);
        store.fail_next_writes(1);
        assert_eq!(ctl.set_device(6, true).await, WriteOutcome::RolledBack);

        let st = shared.read().await;
        let slot = st.board.slot(6).unwrap();
        assert!(!slot.on);
        assert_eq!(slot.animation, AnimationState::Stopped);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn disconnected_store_is_not_ready() {
        let (store, shared, ctl) = controller(ProfileId::IotDemo);
        store.set_connected(false);
        assert_eq!(ctl.set_device(0, true).await, WriteOutcome::NotReady);
        let st = shared.read().await;
        assert_eq!(st.board.is_on(0), Some(false));
        assert_eq!(st.board.slot(0).unwrap().transitions, 0);
    }

    #[tokio::test]
    async fn unknown_index_is_not_ready() {
        let (store, _shared, ctl) = controller(ProfileId::Nckh);
        assert_eq!(ctl.set_device(7, true).await, WriteOutcome::NotReady);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn toggle_flips_in_background() {
        let (store, shared, ctl) = controller(ProfileId::Nckh);
        assert_eq!(ctl.toggle(3).await, Ok(true));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("Control/MAY_BOM_RA"), Some(json!("1")));

        assert_eq!(ctl.toggle(3).await, Ok(false));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("Control/MAY_BOM_RA"), Some(json!("0")));
        assert_eq!(shared.read().await.board.is_on(3), Some(false));
    }

    #[tokio::test]
    async fn toggle_shows_state_before_write_then_reverts_on_failure() {
        let (store, shared, ctl) = controller(ProfileId::IotDemo);
        store.fail_next_writes(1);
        assert_eq!(ctl.toggle(4).await, Ok(true));
        {
            let st = shared.read().await;
            let slot = st.board.slot(4).unwrap();
            assert!(slot.on);
            assert_ne!(slot.animation, AnimationState::Stopped);
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        let st = shared.read().await;
        let slot = st.board.slot(4).unwrap();
        assert!(!slot.on);
        assert_eq!(slot.animation, AnimationState::Stopped);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn toggle_writes_message_encoding_on_profile_a() {
        let (store, shared, ctl) = controller(ProfileId::IotDemo);
        ctl.toggle(4).await.unwrap();
        assert_eq!(shared.read().await.board.is_on(4), Some(true));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("devices/relay5"), Some(json!({"message": "ON"})));
    }

    #[tokio::test]
    async fn double_toggle_ends_off() {
        let (store, shared, ctl) = controller(ProfileId::Nckh);
        assert_eq!(ctl.toggle(3).await, Ok(true));
        assert_eq!(ctl.toggle(3).await, Ok(false));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let values: Vec<_> = store.writes().into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![Some(json!("1")), Some(json!("0"))]);
        assert_eq!(store.get("Control/MAY_BOM_RA"), Some(json!("0")));
        assert_eq!(shared.read().await.board.is_on(3), Some(false));
    }

    #[tokio::test]
    async fn toggle_refuses_unknown_or_disconnected() {
        let (store, shared, ctl) = controller(ProfileId::Nckh);
        assert_eq!(ctl.toggle(7).await, Err(Refusal::UnknownDevice));
        store.set_connected(false);
        assert_eq!(ctl.toggle(0).await, Err(Refusal::NotConnected));
        assert_eq!(shared.read().await.board.is_on(0), Some(false));
        assert!(store.writes().is_empty());
    }
}
