//! Pond telemetry: the `sensors` subtree, its thresholds, and the feed that
//! keeps the latest snapshot in shared state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::state::SharedState;
use crate::store::RemoteStore;

pub const SENSORS_PATH: &str = "sensors";

// ---------------------------------------------------------------------------
// Snapshot shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaterReadings {
    pub temp: Option<f64>,
    pub ph: Option<f64>,
    pub turbidity: Option<f64>,
    pub dissolved_oxygen: Option<f64>,
    pub tds: Option<f64>,
    pub level: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GasReadings {
    pub ch4: Option<f64>,
    pub h2s: Option<f64>,
    pub nh3: Option<f64>,
    pub no2: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentReadings {
    pub tds: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorData {
    #[serde(default)]
    pub water: WaterReadings,
    #[serde(default)]
    pub gas: GasReadings,
    #[serde(default)]
    pub environment: EnvironmentReadings,
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    Normal,
    Warning,
    Danger,
}

impl SensorStatus {
    /// `danger` beyond 20 % outside the band, `warning` outside it.
    pub fn classify(value: f64, min: f64, max: f64) -> Self {
        if value < min * 0.8 || value > max * 1.2 {
            Self::Danger
        } else if value < min || value > max {
            Self::Warning
        } else {
            Self::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SensorSpec {
    pub id: &'static str,
    pub path: &'static str,
    pub unit: &'static str,
    pub min: f64,
    pub max: f64,
}

pub const SENSOR_SPECS: &[SensorSpec] = &[
    SensorSpec { id: "temperature", path: "water/temp", unit: "°C", min: 26.0, max: 32.0 },
    SensorSpec { id: "ph", path: "water/ph", unit: "pH", min: 7.0, max: 8.5 },
    SensorSpec { id: "turbidity", path: "water/turbidity", unit: "NTU", min: 20.0, max: 60.0 },
    SensorSpec { id: "dissolvedOxygen", path: "water/dissolved_oxygen", unit: "mg/L", min: 4.0, max: 8.0 },
    SensorSpec { id: "tds", path: "water/tds", unit: "ppm", min: 10.0, max: 30.0 },
    SensorSpec { id: "waterLevel", path: "water/level", unit: "cm", min: 80.0, max: 150.0 },
    SensorSpec { id: "ch4", path: "gas/ch4", unit: "ppm", min: 0.0, max: 100.0 },
    SensorSpec { id: "h2s", path: "gas/h2s", unit: "ppm", min: 0.0, max: 0.05 },
    SensorSpec { id: "nh3", path: "gas/nh3", unit: "ppm", min: 0.0, max: 0.3 },
    SensorSpec { id: "no2", path: "gas/no2", unit: "ppm", min: 0.0, max: 0.1 },
];

#[derive(Debug, Clone, Serialize)]
pub struct SensorReport {
    pub id: &'static str,
    pub unit: &'static str,
    pub value: f64,
    pub status: SensorStatus,
}

impl SensorData {
    fn value_at(&self, path: &str) -> Option<f64> {
        match path {
            "water/temp" => self.water.temp,
            "water/ph" => self.water.ph,
            "water/turbidity" => self.water.turbidity,
            "water/dissolved_oxygen" => self.water.dissolved_oxygen,
            "water/tds" => self.water.tds,
            "water/level" => self.water.level,
            "gas/ch4" => self.gas.ch4,
            "gas/h2s" => self.gas.h2s,
            "gas/nh3" => self.gas.nh3,
            "gas/no2" => self.gas.no2,
            _ => None,
        }
    }

    /// Classified readings for every sensor that has a value.
    pub fn report(&self) -> Vec<SensorReport> {
        SENSOR_SPECS
            .iter()
            .filter_map(|spec| {
                let value = self.value_at(spec.path)?;
                Some(SensorReport {
                    id: spec.id,
                    unit: spec.unit,
                    value,
                    status: SensorStatus::classify(value, spec.min, spec.max),
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

/// Keeps `AppState::sensors` in step with the `sensors` subtree until dropped.
pub struct SensorFeed {
    task: JoinHandle<()>,
}

impl SensorFeed {
    pub fn start(store: Arc<dyn RemoteStore>, shared: SharedState) -> Self {
        let mut sub = store.subscribe(SENSORS_PATH);
        let task = tokio::spawn(async move {
            while let Some(snap) = sub.recv().await {
                let data = match snap.value {
                    Some(value) => match parse(value) {
                        Ok(d) => Some(d),
                        Err(e) => {
                            warn!("bad sensor snapshot: {e}");
                            let mut st = shared.write().await;
                            st.record_error(format!("bad sensor snapshot: {e}"));
                            continue;
                        }
                    },
                    None => None,
                };
                debug!(online = data.is_some(), "sensor snapshot");
                let mut st = shared.write().await;
                st.record_sensors(data);
            }
        });
        Self { task }
    }
}

impl Drop for SensorFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn parse(value: Value) -> serde_json::Result<SensorData> {
    serde_json::from_value(value)
}

// ===========================================================================
// Tests
// ===========================================================================
