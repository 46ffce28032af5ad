//! Stateful pond telemetry simulator for local development.
//!
//! Models the readings a pond controller board would publish:
//! - Temporal coherence via random walk with mean reversion
//! - Per-reading electronic noise and occasional spikes
//! - Diurnal (day/night) cycle on water and air temperature
//! - Oxygen demand: dissolved oxygen sinks unless the pond is aerated
//! - Closed-loop aeration response while the oxygen pump or fan relay is on

use serde::Serialize;
use std::fmt;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Everything near the middle of its healthy band, low noise.
    Stable,
    /// Heavy oxygen demand: dissolved oxygen falls below 4 mg/L within a few
    /// dozen ticks unless aerated, and ammonia creeps up.
    Hypoxic,
    /// Triple noise and ~10% spike rate. Exercises the warning/danger bands.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "hypoxic" => Self::Hypoxic,
            "flaky" => Self::Flaky,
            _ => Self::Stable,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Hypoxic => write!(f, "hypoxic"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    WaterTemp,
    Ph,
    Turbidity,
    DissolvedOxygen,
    Tds,
    Level,
    Ch4,
    H2s,
    Nh3,
    No2,
    AirTemp,
    Humidity,
}

impl Channel {
    pub const ALL: [Channel; 12] = [
        Self::WaterTemp,
        Self::Ph,
        Self::Turbidity,
        Self::DissolvedOxygen,
        Self::Tds,
        Self::Level,
        Self::Ch4,
        Self::H2s,
        Self::Nh3,
        Self::No2,
        Self::AirTemp,
        Self::Humidity,
    ];

    /// (centre, walk sigma, noise sigma, floor, ceiling)
    fn params(self) -> (f64, f64, f64, f64, f64) {
        match self {
            Self::WaterTemp => (29.0, 0.05, 0.05, 15.0, 40.0),
            Self::Ph => (7.8, 0.02, 0.02, 5.0, 10.0),
            Self::Turbidity => (40.0, 0.8, 0.5, 0.0, 200.0),
            Self::DissolvedOxygen => (6.0, 0.05, 0.05, 0.0, 14.0),
            Self::Tds => (20.0, 0.3, 0.2, 0.0, 100.0),
            Self::Level => (115.0, 0.5, 0.3, 0.0, 250.0),
            Self::Ch4 => (40.0, 1.0, 0.5, 0.0, 500.0),
            Self::H2s => (0.02, 0.001, 0.001, 0.0, 1.0),
            Self::Nh3 => (0.12, 0.005, 0.003, 0.0, 5.0),
            Self::No2 => (0.04, 0.002, 0.001, 0.0, 2.0),
            Self::AirTemp => (31.0, 0.1, 0.1, 10.0, 45.0),
            Self::Humidity => (75.0, 0.5, 0.3, 0.0, 100.0),
        }
    }

    fn has_diurnal_cycle(self) -> bool {
        matches!(self, Self::WaterTemp | Self::AirTemp)
    }
}

struct ChannelState {
    channel: Channel,
    base: f64,
    center: f64,
    walk_sigma: f64,
    noise_sigma: f64,
    floor: f64,
    ceil: f64,
}

// ---------------------------------------------------------------------------
// Snapshot shape (matches the `sensors` subtree)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Water {
    pub temp: f64,
    pub ph: f64,
    pub turbidity: f64,
    pub dissolved_oxygen: f64,
    pub tds: f64,
    pub level: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Gas {
    pub ch4: f64,
    pub h2s: f64,
    pub nh3: f64,
    pub no2: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Environment {
    pub tds: f64,
    pub temperature: f64,
    pub humidity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PondReading {
    pub ts: i64,
    pub water: Water,
    pub gas: Gas,
    pub environment: Environment,
}

// ---------------------------------------------------------------------------
// Main simulator
// ---------------------------------------------------------------------------

pub struct PondSim {
    channels: Vec<ChannelState>,

    mean_reversion: f64,

    spike_prob: f32,
    spike_scale: f64,

    diurnal_amplitude: f64,
    diurnal_period_s: f64,

    /// Dissolved oxygen consumed per tick (mg/L).
    oxygen_demand: f64,
    /// Dissolved oxygen added per tick while aerated (mg/L).
    aeration_rate: f64,
    aerated: bool,
}

impl PondSim {
    /// `diurnal_period_s` controls the day/night cycle length. Use 600
    /// (10 min) for fast dev iteration or 86400 for real-time.
    pub fn new(scenario: Scenario, diurnal_period_s: f64) -> Self {
        let (mean_rev, noise_mult, spike_prob, spike_scale, oxygen_demand) = match scenario {
            Scenario::Stable => (0.05, 1.0, 0.005_f32, 5.0, 0.0),
            Scenario::Hypoxic => (0.01, 1.0, 0.01, 5.0, 0.12),
            Scenario::Flaky => (0.03, 3.0, 0.10, 15.0, 0.02),
        };

        let channels = Channel::ALL
            .iter()
            .map(|&channel| {
                let (center, walk, noise, floor, ceil) = channel.params();
                let center = match (scenario, channel) {
                    (Scenario::Hypoxic, Channel::Nh3) => 0.35,
                    _ => center,
                };
                ChannelState {
                    channel,
                    base: (center + gaussian(0.0, walk * 3.0)).clamp(floor, ceil),
                    center,
                    walk_sigma: walk,
                    noise_sigma: noise * noise_mult,
                    floor,
                    ceil,
                }
            })
            .collect();

        Self {
            channels,
            mean_reversion: mean_rev,
            spike_prob,
            spike_scale,
            diurnal_amplitude: 1.5,
            diurnal_period_s,
            oxygen_demand,
            aeration_rate: 0.25,
            aerated: false,
        }
    }

    /// Inform the simulator whether the oxygen pump or fan is running.
    pub fn set_aeration(&mut self, on: bool) {
        self.aerated = on;
    }

    pub fn is_aerated(&self) -> bool {
        self.aerated
    }

    /// Advance every channel one tick and return the instantaneous readings.
    pub fn tick(&mut self) -> PondReading {
        let now_s = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        self.tick_at(now_s)
    }

    /// As `tick`, with an explicit wall-clock time in seconds.
    pub fn tick_at(&mut self, now_s: f64) -> PondReading {
        let phase = 2.0 * std::f64::consts::PI * now_s / self.diurnal_period_s;
        let mut values = [0.0_f64; Channel::ALL.len()];

        for (i, ch) in self.channels.iter_mut().enumerate() {
            // -- Evolve the base value ----------------------------------------
            let pull = self.mean_reversion * (ch.center - ch.base);
            let walk = gaussian(0.0, ch.walk_sigma);
            let mut drift = 0.0;
            if ch.channel == Channel::DissolvedOxygen {
                drift -= self.oxygen_demand;
                if self.aerated {
                    drift += self.aeration_rate;
                }
            }
            ch.base = (ch.base + pull + walk + drift).clamp(ch.floor, ch.ceil);

            // -- Build the instantaneous reading ------------------------------
            let diurnal = if ch.channel.has_diurnal_cycle() {
                self.diurnal_amplitude * phase.sin()
            } else {
                0.0
            };
            let noise = gaussian(0.0, ch.noise_sigma);
            let spike = if fastrand::f32() < self.spike_prob {
                gaussian(0.0, ch.noise_sigma * self.spike_scale)
            } else {
                0.0
            };
            values[i] = round3((ch.base + diurnal + noise + spike).clamp(ch.floor, ch.ceil));
        }

        let v = |c: Channel| values[c as usize];
        PondReading {
            ts: now_s as i64,
            water: Water {
                temp: v(Channel::WaterTemp),
                ph: v(Channel::Ph),
                turbidity: v(Channel::Turbidity),
                dissolved_oxygen: v(Channel::DissolvedOxygen),
                tds: v(Channel::Tds),
                level: v(Channel::Level),
            },
            gas: Gas {
                ch4: v(Channel::Ch4),
                h2s: v(Channel::H2s),
                nh3: v(Channel::Nh3),
                no2: v(Channel::No2),
            },
            environment: Environment {
                tds: v(Channel::Tds),
                temperature: v(Channel::AirTemp),
                humidity: v(Channel::Humidity),
            },
        }
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

// ===========================================================================
// Tests
// ===========================================================================
