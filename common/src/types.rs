use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Off,
    Pilot,
    Min,
    Max,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Pilot => "pilot",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown heater mode {0:?}")]
pub struct UnknownMode(pub String);

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "pilot" => Ok(Self::Pilot),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            _ => Err(UnknownMode(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub mode: Mode,
    pub temperature: f32,
    #[serde(default)]
    pub battery: f32,
    #[serde(rename = "wifiStrength", default)]
    pub wifi_strength: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl DeviceStatus {
    pub fn reading(&self, now_ms: u64) -> DeviceReading {
        DeviceReading {
            mode: self.mode,
            temperature_c: self.temperature,
            timestamp_ms: now_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceReading {
    pub mode: Mode,
    pub temperature_c: f32,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeCommand {
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    #[serde(rename = "currentTemp")]
    pub current_temp: Option<f32>,
    #[serde(rename = "targetTemp")]
    pub target_temp: f32,
    pub mode: &'static str,
    #[serde(rename = "autoEnabled")]
    pub auto_enabled: bool,
    pub connected: bool,
    #[serde(rename = "pendingMode")]
    pub pending_mode: Option<&'static str>,
    #[serde(rename = "pendingInMs")]
    pub pending_in_ms: Option<u64>,
    #[serde(rename = "dwellRemainingMs")]
    pub dwell_remaining_ms: u64,
    pub battery: Option<f32>,
    #[serde(rename = "wifiStrength")]
    pub wifi_strength: Option<u8>,
    #[serde(rename = "activeScheduleId")]
    pub active_schedule_id: Option<u64>,
    #[serde(rename = "nextScheduleEventEpoch")]
    pub next_schedule_event_epoch: Option<i64>,
    #[serde(rename = "timeSynced")]
    pub time_synced: bool,
    pub timezone: String,
}
