use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::i18n::Language;
use crate::registry::{AnimationProfile, IconKind, ProfileId, Registry, Rgb};
use crate::sensors::{SensorData, SensorReport};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<AppState>>;

// ---------------------------------------------------------------------------
// Device board
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum AnimationState {
    Stopped,
    Running { profile: AnimationProfile },
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceSlot {
    pub on: bool,
    pub animation: AnimationState,
    /// Animation starts/stops applied to this slot since the board was built.
    pub transitions: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_changed: Option<OffsetDateTime>,
    #[serde(skip)]
    icon: IconKind,
}

/// On/off state of every device in the active registry, addressed by index.
/// State and animation are only ever written together.
#[derive(Debug, Clone)]
pub struct DeviceBoard {
    slots: Vec<DeviceSlot>,
}

impl DeviceBoard {
    /// All devices off, no animation running.
    pub fn new(registry: &Registry) -> Self {
        let slots = registry
            .devices()
            .iter()
            .map(|d| DeviceSlot {
                on: false,
                animation: AnimationState::Stopped,
                transitions: 0,
                last_changed: None,
                icon: d.icon,
            })
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Option<&DeviceSlot> {
        self.slots.get(index)
    }

    pub fn is_on(&self, index: usize) -> Option<bool> {
        self.slots.get(index).map(|s| s.on)
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.on).count()
    }

    /// Unconditionally apply `on`, (re)starting or stopping the animation.
    /// Returns the previous state, or `None` for an unknown index.
    pub fn set(&mut self, index: usize, on: bool) -> Option<bool> {
        let slot = self.slots.get_mut(index)?;
        let previous = slot.on;
        slot.on = on;
        slot.animation = if on {
            AnimationState::Running {
                profile: slot.icon.animation(),
            }
        } else {
            AnimationState::Stopped
        };
        slot.transitions += 1;
        slot.last_changed = Some(OffsetDateTime::now_utc());
        Some(previous)
    }

    /// Apply `on` only if it differs from the current state. An echo of the
    /// value already shown leaves state and animation untouched.
    pub fn confirm(&mut self, index: usize, on: bool) -> bool {
        match self.is_on(index) {
            Some(current) if current != on => {
                self.set(index, on);
                true
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct AppState {
    pub started_at: Instant,
    pub registry: Registry,
    pub board: DeviceBoard,
    pub sensors: Option<SensorData>,
    pub sensors_online: bool,
    pub sensors_updated_at: Option<OffsetDateTime>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Device,
    Sensor,
    Voice,
    Schedule,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct DeviceStatus {
    pub index: usize,
    pub id: &'static str,
    pub key: &'static str,
    pub label: &'static str,
    pub path: String,
    pub icon: IconKind,
    pub color: Rgb,
    #[serde(flatten)]
    pub slot: DeviceSlot,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub profile: ProfileId,
    pub connected: bool,
    pub active_devices: usize,
    pub devices: Vec<DeviceStatus>,
    pub sensors_online: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub sensors_updated_at: Option<OffsetDateTime>,
    pub sensors: Vec<SensorReport>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl AppState {
    pub fn new(registry: Registry) -> Self {
        Self {
            started_at: Instant::now(),
            board: DeviceBoard::new(&registry),
            registry,
            sensors: None,
            sensors_online: false,
            sensors_updated_at: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn shared(registry: Registry) -> SharedState {
        Arc::new(RwLock::new(Self::new(registry)))
    }

    fn device_key(&self, index: usize) -> &'static str {
        self.registry.get(index).map(|d| d.key).unwrap_or("?")
    }

    /// Optimistic local write. Returns the previous state.
    pub fn set_device(&mut self, index: usize, on: bool) -> Option<bool> {
        let previous = self.board.set(index, on)?;
        let key = self.device_key(index);
        self.push_event(EventKind::Device, format!("{key} set {}", on_off(on)));
        Some(previous)
    }

    /// Remote confirmation. Returns whether anything changed.
    pub fn confirm_device(&mut self, index: usize, on: bool) -> bool {
        let changed = self.board.confirm(index, on);
        if changed {
            let key = self.device_key(index);
            self.push_event(
                EventKind::Device,
                format!("{key} changed to {} remotely", on_off(on)),
            );
        }
        changed
    }

    /// Put a device back after a failed write.
    pub fn revert_device(&mut self, index: usize, previous: bool) {
        if self.board.set(index, previous).is_some() {
            let key = self.device_key(index);
            self.push_event(
                EventKind::Error,
                format!("{key} write failed, reverted to {}", on_off(previous)),
            );
        }
    }

    /// Record the latest `sensors` snapshot; `None` means the subtree is gone.
    pub fn record_sensors(&mut self, data: Option<SensorData>) {
        let online = data.is_some();
        if online != self.sensors_online {
            let detail = if online { "sensors online" } else { "sensors offline" };
            self.push_event(EventKind::Sensor, detail.to_string());
        }
        if online {
            self.sensors_updated_at = Some(OffsetDateTime::now_utc());
        }
        self.sensors_online = online;
        self.sensors = data;
    }

    pub fn record_voice(&mut self, detail: String) {
        self.push_event(EventKind::Voice, detail);
    }

    pub fn record_schedule(&mut self, detail: String) {
        self.push_event(EventKind::Schedule, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self, language: Language, connected: bool) -> StatusResponse {
        let devices = self
            .registry
            .devices()
            .iter()
            .enumerate()
            .filter_map(|(index, d)| {
                let slot = self.board.slot(index)?.clone();
                Some(DeviceStatus {
                    index,
                    id: d.id,
                    key: d.key,
                    label: language.device_label(d.id),
                    path: self.registry.backend_path(index)?,
                    icon: d.icon,
                    color: d.color,
                    slot,
                })
            })
            .collect();

        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            profile: self.registry.profile(),
            connected,
            active_devices: self.board.active_count(),
            devices,
            sensors_online: self.sensors_online,
            sensors_updated_at: self.sensors_updated_at,
            sensors: self.sensors.as_ref().map(SensorData::report).unwrap_or_default(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn nckh() -> AppState {
        AppState::new(Registry::for_profile(ProfileId::Nckh))
    }

    #[test]
    fn new_board_is_all_off() {
        let st = nckh();
        assert_eq!(st.board.len(), 7);
        for i in 0..7 {
            let slot = st.board.slot(i).unwrap();
            assert!(!slot.on);
            assert_eq!(slot.animation, AnimationState::Stopped);
        }
    }

    #[test]
    fn set_moves_state_and_animation_together() {
        let mut board = DeviceBoard::new(&Registry::for_profile(ProfileId::IotDemo));
        assert_eq!(board.set(5, true), Some(false));
        let slot = board.slot(5).unwrap();
        assert!(slot.on);
        assert_eq!(
            slot.animation,
            AnimationState::Running {
                profile: IconKind::Fan.animation()
            }
        );

        board.set(5, false);
        let slot = board.slot(5).unwrap();
        assert!(!slot.on);
        assert_eq!(slot.animation, AnimationState::Stopped);
        assert_eq!(slot.transitions, 2);
    }

    #[test]
    fn confirm_ignores_echo() {
        let mut board = DeviceBoard::new(&Registry::for_profile(ProfileId::Nckh));
        board.set(0, true);
        assert!(!board.confirm(0, true));
        assert_eq!(board.slot(0).unwrap().transitions, 1);
    }

    #[test]
    fn confirm_applies_change() {
        let mut board = DeviceBoard::new(&Registry::for_profile(ProfileId::Nckh));
        assert!(board.confirm(6, true));
        let slot = board.slot(6).unwrap();
        assert!(slot.on);
        assert!(matches!(slot.animation, AnimationState::Running { .. }));
    }

    #[test]
    fn unknown_index_is_ignored() {
        let mut board = DeviceBoard::new(&Registry::for_profile(ProfileId::Nckh));
        assert_eq!(board.set(7, true), None);
        assert!(!board.confirm(7, true));
        assert_eq!(board.active_count(), 0);
    }

    #[test]
    fn revert_records_error_event() {
        let mut st = nckh();
        st.set_device(1, true);
        st.revert_device(1, false);
        assert_eq!(st.board.is_on(1), Some(false));
        let last = st.events.back().unwrap();
        assert_eq!(last.kind, EventKind::Error);
        assert!(last.detail.contains("MSP"), "{}", last.detail);
    }

    #[test]
    fn event_ring_buffer_is_bounded() {
        let mut st = nckh();
        for i in 0..(MAX_EVENTS + 25) {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        assert_eq!(st.events.front().unwrap().detail, "event 25");
    }

    #[test]
    fn sensor_online_transitions_are_logged_once() {
        let mut st = nckh();
        st.record_sensors(Some(SensorData::default()));
        st.record_sensors(Some(SensorData::default()));
        st.record_sensors(None);
        let sensor_events = st
            .events
            .iter()
            .filter(|e| e.kind == EventKind::Sensor)
            .count();
        assert_eq!(sensor_events, 2);
        assert!(!st.sensors_online);
    }

    #[test]
    fn status_lists_devices_with_paths_and_labels() {
        let mut st = AppState::new(Registry::for_profile(ProfileId::IotDemo));
        st.set_device(4, true);
        let status = st.to_status(Language::En, true);
        assert_eq!(status.devices.len(), 8);
        assert_eq!(status.active_devices, 1);
        assert_eq!(status.devices[4].path, "devices/relay5");
        assert_eq!(status.devices[4].label, "Oxygen Pump");

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["devices"][4]["on"], true);
        assert_eq!(json["devices"][4]["animation"]["state"], "running");
        assert_eq!(json["devices"][4]["animation"]["profile"]["kind"], "blink");
        assert_eq!(json["devices"][4]["icon"], "gas-cylinder");
        assert_eq!(json["profile"], "firebase1");
    }
}
