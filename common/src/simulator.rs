use crate::types::{DeviceStatus, Mode};

const MIN_TEMP_C: f32 = 10.0;
const MAX_TEMP_C: f32 = 40.0;

#[derive(Debug, Clone)]
pub struct SimulatedHeater {
    mode: Mode,
    temperature_c: f32,
    battery: f32,
    wifi_strength: u8,
    fail_status: bool,
    reject_commands: bool,
    commands: Vec<Mode>,
}

impl Default for SimulatedHeater {
    fn default() -> Self {
        Self::new(18.0)
    }
}

impl SimulatedHeater {
    pub fn new(temperature_c: f32) -> Self {
        Self {
            mode: Mode::Off,
            temperature_c,
            battery: 85.0,
            wifi_strength: 4,
            fail_status: false,
            reject_commands: false,
            commands: Vec::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn temperature_c(&self) -> f32 {
        self.temperature_c
    }

    pub fn set_fail_status(&mut self, fail: bool) {
        self.fail_status = fail;
    }

    pub fn set_reject_commands(&mut self, reject: bool) {
        self.reject_commands = reject;
    }

    pub fn commands(&self) -> &[Mode] {
        &self.commands
    }

    pub fn status(&self) -> Option<DeviceStatus> {
        if self.fail_status {
            return None;
        }
        Some(DeviceStatus {
            mode: self.mode,
            temperature: self.temperature_c,
            battery: self.battery,
            wifi_strength: self.wifi_strength,
            timestamp: None,
        })
    }

    pub fn apply_mode(&mut self, mode: Mode) -> bool {
        if self.reject_commands {
            return false;
        }
        self.mode = mode;
        self.commands.push(mode);
        true
    }

    pub fn advance(&mut self, elapsed_s: f32, noise_c: f32) {
        let drift = Self::temperature_rate(self.mode) * elapsed_s + noise_c;
        self.temperature_c = (self.temperature_c + drift).clamp(MIN_TEMP_C, MAX_TEMP_C);

        let drain = Self::battery_drain(self.mode) * elapsed_s;
        self.battery = (self.battery - drain).clamp(0.0, 100.0);
    }

    pub fn set_wifi_strength(&mut self, strength: u8) {
        self.wifi_strength = strength.clamp(1, 4);
    }

    fn temperature_rate(mode: Mode) -> f32 {
        match mode {
            Mode::Off => -0.15,
            Mode::Pilot => 0.02,
            Mode::Min => 0.2,
            Mode::Max => 0.5,
        }
    }

    fn battery_drain(mode: Mode) -> f32 {
        match mode {
            Mode::Off => 0.01,
            Mode::Pilot => 0.03,
            Mode::Min => 0.1,
            Mode::Max => 0.2,
        }
    }
}
