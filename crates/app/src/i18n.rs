use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Vi,
    En,
}

/// Fixed spoken replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phrase {
    DeviceOn,
    DeviceOff,
    ActionFailed,
    ErrorControlling,
    CannotControl,
    NotUnderstood,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vi => "vi",
            Self::En => "en",
        }
    }

    /// Locale handed to the speech engine.
    pub fn speech_locale(self) -> &'static str {
        match self {
            Self::Vi => "vi-VN",
            Self::En => "en-US",
        }
    }

    pub fn phrase(self, phrase: Phrase) -> &'static str {
        use Phrase::*;
        match (self, phrase) {
            (Self::Vi, DeviceOn) => "Đã bật thiết bị",
            (Self::Vi, DeviceOff) => "Đã tắt thiết bị",
            (Self::Vi, ActionFailed) => "Thao tác thất bại",
            (Self::Vi, ErrorControlling) => "Lỗi khi điều khiển thiết bị",
            (Self::Vi, CannotControl) => "Không thể điều khiển thiết bị",
            (Self::Vi, NotUnderstood) => "Không hiểu lệnh. Vui lòng thử lại",
            (Self::En, DeviceOn) => "Device turned on",
            (Self::En, DeviceOff) => "Device turned off",
            (Self::En, ActionFailed) => "Action failed",
            (Self::En, ErrorControlling) => "Error controlling device",
            (Self::En, CannotControl) => "Cannot control device",
            (Self::En, NotUnderstood) => "Command not understood. Please try again",
        }
    }

    /// Display label for a device id; unknown ids are shown as-is.
    pub fn device_label(self, id: &'static str) -> &'static str {
        let (vi, en) = match id {
            "autoFeeder" => ("Máy cho ăn", "Auto Feeder"),
            "siphonPump" => ("Máy siphong", "Siphon Pump"),
            "waterPump-In" => ("Bơm nước vào", "Water Pump In"),
            "waterPump-Out" => ("Bơm nước ra", "Water Pump Out"),
            "oxygenPump" => ("Máy bơm oxy", "Oxygen Pump"),
            "oxygenFan" => ("Quạt oxy", "Oxygen Fan"),
            "electrolyzer" => ("Máy điện phân", "Electrolyzer"),
            "lightingLamp" => ("Đèn chiếu sáng", "Lighting Lamp"),
            _ => (id, id),
        };
        match self {
            Self::Vi => vi,
            Self::En => en,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vi" => Ok(Self::Vi),
            "en" => Ok(Self::En),
            other => bail!("unsupported language '{other}'"),
        }
    }
}
