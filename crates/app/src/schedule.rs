//! Per-device on/off schedules stored at `schedules/<KEY>`.
//!
//! The store only persists records; nothing here turns devices on or off at
//! the scheduled times. Times are kept as the strings the user typed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::state::SharedState;
use crate::store::RemoteStore;

pub const SCHEDULES_PATH: &str = "schedules";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub hour_on: String,
    pub minute_on: String,
    pub hour_off: String,
    pub minute_off: String,
    pub enabled: bool,
}

impl Schedule {
    /// What the editor shows for a device without a schedule.
    pub fn default_draft() -> Self {
        Self {
            hour_on: "06".into(),
            minute_on: "00".into(),
            hour_off: "18".into(),
            minute_off: "00".into(),
            enabled: false,
        }
    }

    pub fn on_time(&self) -> String {
        format_time(&self.hour_on, &self.minute_on)
    }

    pub fn off_time(&self) -> String {
        format_time(&self.hour_off, &self.minute_off)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_time(hour: &str, minute: &str) -> Option<(u32, u32)> {
    let h: u32 = hour.trim().parse().ok()?;
    let m: u32 = minute.trim().parse().ok()?;
    (h < 24 && m < 60).then_some((h, m))
}

pub fn is_valid_time(hour: &str, minute: &str) -> bool {
    parse_time(hour, minute).is_some()
}

/// Both times valid and the off time strictly after the on time.
pub fn is_valid_schedule(s: &Schedule) -> bool {
    match (
        parse_time(&s.hour_on, &s.minute_on),
        parse_time(&s.hour_off, &s.minute_off),
    ) {
        (Some((h1, m1)), Some((h2, m2))) => h2 * 60 + m2 > h1 * 60 + m1,
        _ => false,
    }
}

pub fn format_time(hour: &str, minute: &str) -> String {
    format!("{hour:0>2}:{minute:0>2}")
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

type Cache = Arc<RwLock<BTreeMap<String, Schedule>>>;

pub struct ScheduleStore {
    store: Arc<dyn RemoteStore>,
    shared: SharedState,
    cache: Cache,
    task: JoinHandle<()>,
}

impl ScheduleStore {
    /// Subscribe to `schedules` and keep the last snapshot.
    pub fn start(store: Arc<dyn RemoteStore>, shared: SharedState) -> Self {
        let cache: Cache = Arc::new(RwLock::new(BTreeMap::new()));
        let mut sub = store.subscribe(SCHEDULES_PATH);
        let task_cache = Arc::clone(&cache);

        let task = tokio::spawn(async move {
            while let Some(snap) = sub.recv().await {
                let parsed = snap.value.map(parse_all).unwrap_or_default();
                *task_cache.write().await = parsed;
            }
        });

        Self {
            store,
            shared,
            cache,
            task,
        }
    }

    pub async fn get(&self, key: &str) -> Option<Schedule> {
        self.cache.read().await.get(key).cloned()
    }

    pub async fn all(&self) -> BTreeMap<String, Schedule> {
        self.cache.read().await.clone()
    }

    /// Save `schedule` as-is. Returns `false` if the write failed.
    pub async fn update(&self, key: &str, schedule: Schedule) -> bool {
        let value = match serde_json::to_value(&schedule) {
            Ok(v) => v,
            Err(e) => {
                error!(key, "encode schedule: {e}");
                return false;
            }
        };
        if !self.write(key, Some(value)).await {
            return false;
        }
        info!(key, on = %schedule.on_time(), off = %schedule.off_time(), enabled = schedule.enabled, "schedule saved");
        self.shared.write().await.record_schedule(format!(
            "{key} {}-{} {}",
            schedule.on_time(),
            schedule.off_time(),
            if schedule.enabled { "enabled" } else { "disabled" }
        ));
        self.cache.write().await.insert(key.to_string(), schedule);
        true
    }

    pub async fn delete(&self, key: &str) -> bool {
        if !self.write(key, None).await {
            return false;
        }
        info!(key, "schedule deleted");
        self.shared
            .write()
            .await
            .record_schedule(format!("{key} deleted"));
        self.cache.write().await.remove(key);
        true
    }

    /// Flip `enabled` on an existing schedule; `false` if there is none.
    pub async fn enable(&self, key: &str, enabled: bool) -> bool {
        let Some(current) = self.get(key).await else {
            warn!(key, "enable: schedule not found");
            return false;
        };
        self.update(key, Schedule { enabled, ..current }).await
    }

    pub async fn create(
        &self,
        key: &str,
        hour_on: &str,
        minute_on: &str,
        hour_off: &str,
        minute_off: &str,
        enabled: bool,
    ) -> bool {
        let schedule = Schedule {
            hour_on: hour_on.to_string(),
            minute_on: minute_on.to_string(),
            hour_off: hour_off.to_string(),
            minute_off: minute_off.to_string(),
            enabled,
        };
        self.update(key, schedule).await
    }

    async fn write(&self, key: &str, value: Option<Value>) -> bool {
        let path = format!("{SCHEDULES_PATH}/{key}");
        match self.store.set(&path, value).await {
            Ok(()) => true,
            Err(e) => {
                error!(%path, "schedule write failed: {e:#}");
                self.shared
                    .write()
                    .await
                    .record_error(format!("{path}: {e:#}"));
                false
            }
        }
    }
}

impl Drop for ScheduleStore {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn parse_all(value: Value) -> BTreeMap<String, Schedule> {
    let Value::Object(map) = value else {
        warn!("schedules is not an object, ignoring");
        return BTreeMap::new();
    };
    map.into_iter()
        .filter_map(|(key, v)| match serde_json::from_value::<Schedule>(v) {
            Ok(s) => Some((key, s)),
            Err(e) => {
                warn!(%key, "skipping malformed schedule: {e}");
                None
            }
        })
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================
