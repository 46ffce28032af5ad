//! Static device tables for the two backend profiles.
//!
//! Profile A (`firebase1`, "IoT System Demo") drives eight relays at
//! `devices/relay1..8`; profile B (`firebase2`, "NCKH") drives seven devices
//! at `Control/<KEY>`. The tables are not merged: order and count differ and
//! every index-addressed structure is rebuilt when the profile changes.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::encoding::BackendEncoding;

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfileId {
    #[serde(rename = "firebase1")]
    IotDemo,
    #[serde(rename = "firebase2")]
    Nckh,
}

impl ProfileId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IotDemo => "firebase1",
            Self::Nckh => "firebase2",
        }
    }

    pub fn encoding(self) -> BackendEncoding {
        match self {
            Self::IotDemo => BackendEncoding::MessageOnOff,
            Self::Nckh => BackendEncoding::DigitString,
        }
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "firebase1" => Ok(Self::IotDemo),
            "firebase2" => Ok(Self::Nckh),
            other => bail!("unknown backend profile '{other}'"),
        }
    }
}

// ---------------------------------------------------------------------------
// Presentation metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IconKind {
    Grain,
    Engine,
    GasCylinder,
    Fan,
    WaterPlus,
    #[serde(rename = "lightbulb-on-outline")]
    Lightbulb,
}

/// How a running device is drawn. Every icon has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnimationProfile {
    Blink { half_period_ms: u32, dim_percent: u8 },
    Pulse { half_period_ms: u32, dim_percent: u8 },
    Rotate { period_ms: u32 },
    Shake { step_ms: u32, amplitude_px: u8 },
}

impl IconKind {
    pub fn animation(self) -> AnimationProfile {
        match self {
            Self::Engine | Self::GasCylinder => AnimationProfile::Blink {
                half_period_ms: 400,
                dim_percent: 30,
            },
            Self::Fan => AnimationProfile::Rotate { period_ms: 1500 },
            Self::Lightbulb => AnimationProfile::Pulse {
                half_period_ms: 1000,
                dim_percent: 60,
            },
            Self::Grain => AnimationProfile::Shake {
                step_ms: 100,
                amplitude_px: 5,
            },
            Self::WaterPlus => AnimationProfile::Blink {
                half_period_ms: 600,
                dim_percent: 40,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

impl Serialize for Rgb {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// Logical id, also the i18n label key.
    pub id: &'static str,
    /// Backend key; addresses the device under `Control/` (profile B) and
    /// its schedule under `schedules/` (both profiles).
    pub key: &'static str,
    pub icon: IconKind,
    pub color: Rgb,
}

const fn device(id: &'static str, key: &'static str, icon: IconKind, color: Rgb) -> DeviceDescriptor {
    DeviceDescriptor { id, key, icon, color }
}

const FEEDER_COLOR: Rgb = Rgb(0xd8, 0x43, 0x15);
const PUMP_COLOR: Rgb = Rgb(0x02, 0x88, 0xd1);
const OXYGEN_COLOR: Rgb = Rgb(0x43, 0xa0, 0x47);
const FAN_COLOR: Rgb = Rgb(0xfb, 0xc0, 0x2d);
const ELECTROLYZER_COLOR: Rgb = Rgb(0x8e, 0x24, 0xaa);
const LAMP_COLOR: Rgb = Rgb(0xff, 0x98, 0x00);

static IOT_DEMO_DEVICES: [DeviceDescriptor; 8] = [
    device("autoFeeder", "MAY_RAI_THUC_AN", IconKind::Grain, FEEDER_COLOR),
    device("siphonPump", "MAY_SIPHONG", IconKind::Engine, PUMP_COLOR),
    device("waterPump-In", "BOM_NUOC_VAO", IconKind::Engine, PUMP_COLOR),
    device("waterPump-Out", "BOM_NUOC_RA", IconKind::Engine, PUMP_COLOR),
    device("oxygenPump", "OXI", IconKind::GasCylinder, OXYGEN_COLOR),
    device("oxygenFan", "QUAT_OXY", IconKind::Fan, FAN_COLOR),
    device("electrolyzer", "MAY_DIEN_PHAN", IconKind::WaterPlus, ELECTROLYZER_COLOR),
    device("lightingLamp", "DEN_CHIEU_SANG", IconKind::Lightbulb, LAMP_COLOR),
];

static NCKH_DEVICES: [DeviceDescriptor; 7] = [
    device("autoFeeder", "MRTA", IconKind::Grain, FEEDER_COLOR),
    device("siphonPump", "MSP", IconKind::Engine, PUMP_COLOR),
    device("waterPump-In", "MAY_BOM_VAO", IconKind::Engine, PUMP_COLOR),
    device("waterPump-Out", "MAY_BOM_RA", IconKind::Engine, PUMP_COLOR),
    device("oxygenPump", "OXI", IconKind::GasCylinder, OXYGEN_COLOR),
    device("oxygenFan", "FAN", IconKind::Fan, FAN_COLOR),
    device("lightingLamp", "LED", IconKind::Lightbulb, LAMP_COLOR),
];

/// The device table of one profile plus its path layout.
#[derive(Debug, Clone, Copy)]
pub struct Registry {
    profile: ProfileId,
    devices: &'static [DeviceDescriptor],
}

impl Registry {
    pub fn for_profile(profile: ProfileId) -> Self {
        let devices: &'static [DeviceDescriptor] = match profile {
            ProfileId::IotDemo => &IOT_DEMO_DEVICES,
            ProfileId::Nckh => &NCKH_DEVICES,
        };
        Self { profile, devices }
    }

    pub fn profile(&self) -> ProfileId {
        self.profile
    }

    pub fn devices(&self) -> &'static [DeviceDescriptor] {
        self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn get(&self, index: usize) -> Option<&'static DeviceDescriptor> {
        self.devices.get(index)
    }

    pub fn index_of_id(&self, id: &str) -> Option<usize> {
        self.devices.iter().position(|d| d.id == id)
    }

    pub fn index_of_key(&self, key: &str) -> Option<usize> {
        self.devices.iter().position(|d| d.key == key)
    }

    /// Backend path of the device at `index`, or `None` for an unknown index.
    pub fn backend_path(&self, index: usize) -> Option<String> {
        let device = self.devices.get(index)?;
        Some(match self.profile {
            ProfileId::IotDemo => format!("devices/relay{}", index + 1),
            ProfileId::Nckh => format!("Control/{}", device.key),
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
