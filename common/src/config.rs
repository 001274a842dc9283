use serde::{Deserialize, Serialize};

pub const MIN_TARGET_TEMP_C: f32 = 15.0;
pub const MAX_TARGET_TEMP_C: f32 = 30.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    pub stable_band_c: f32,
    pub trim_threshold_c: f32,
    pub boost_threshold_c: f32,
    pub cutoff_margin_c: f32,
    pub overheat_warning_margin_c: f32,
    pub min_dwell_ms: u64,
    pub debounce_ms: u64,
    pub poll_interval_ms: u64,
    pub status_timeout_ms: u64,
    pub state_publish_interval_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            stable_band_c: 0.5,
            trim_threshold_c: 0.8,
            boost_threshold_c: 2.0,
            cutoff_margin_c: 2.0,
            overheat_warning_margin_c: 5.0,
            min_dwell_ms: 10_000,
            debounce_ms: 1_500,
            poll_interval_ms: 5_000,
            status_timeout_ms: 5_000,
            state_publish_interval_ms: 10_000,
        }
    }
}

impl ControlConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        for (value, default) in [
            (&mut self.stable_band_c, defaults.stable_band_c),
            (&mut self.trim_threshold_c, defaults.trim_threshold_c),
            (&mut self.boost_threshold_c, defaults.boost_threshold_c),
            (&mut self.cutoff_margin_c, defaults.cutoff_margin_c),
            (&mut self.overheat_warning_margin_c, defaults.overheat_warning_margin_c),
        ] {
            if !value.is_finite() || *value < 0.0 {
                *value = default;
            }
        }

        // Periods must stay non-zero.
        self.poll_interval_ms = self.poll_interval_ms.clamp(500, 300_000);
        self.status_timeout_ms = self.status_timeout_ms.clamp(500, 60_000);
        self.state_publish_interval_ms = self.state_publish_interval_ms.clamp(1_000, 3_600_000);
        self.debounce_ms = self.debounce_ms.clamp(100, 60_000);
        self.min_dwell_ms = self.min_dwell_ms.min(3_600_000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSettings {
    pub target_temp_c: f32,
    pub auto_enabled: bool,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            target_temp_c: 21.0,
            auto_enabled: true,
        }
    }
}

impl PersistedSettings {
    pub fn sanitize(&mut self) {
        if !self.target_temp_c.is_finite() {
            self.target_temp_c = Self::default().target_temp_c;
        }
        self.target_temp_c = self
            .target_temp_c
            .clamp(MIN_TARGET_TEMP_C, MAX_TARGET_TEMP_C);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub base_url: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://192.168.1.100".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub control: ControlConfig,
    pub settings: PersistedSettings,
    pub timezone: String,
    pub device: DeviceConfig,
    pub network: NetworkConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            control: ControlConfig::default(),
            settings: PersistedSettings::default(),
            timezone: "Europe/Madrid".to_string(),
            device: DeviceConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}
