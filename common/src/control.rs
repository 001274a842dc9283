use crate::{
    config::{ControlConfig, PersistedSettings, MAX_TARGET_TEMP_C, MIN_TARGET_TEMP_C},
    debounce::{Debouncer, Pending},
    schedule::ScheduleTarget,
    types::{ControllerStatus, DeviceReading, DeviceStatus, Mode},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Hold,
    Switch { mode: Mode, overheat: bool },
}

pub fn decide(current_c: f32, target_c: f32, config: &ControlConfig) -> Decision {
    let diff = target_c - current_c;
    let abs_diff = diff.abs();

    if abs_diff <= config.stable_band_c {
        return Decision::Hold;
    }

    if diff > 0.0 {
        let mode = if abs_diff > config.boost_threshold_c {
            Mode::Max
        } else if abs_diff > config.trim_threshold_c {
            Mode::Min
        } else {
            Mode::Pilot
        };
        return Decision::Switch {
            mode,
            overheat: false,
        };
    }

    if current_c > target_c + config.cutoff_margin_c {
        Decision::Switch {
            mode: Mode::Off,
            overheat: current_c - target_c >= config.overheat_warning_margin_c,
        }
    } else {
        Decision::Switch {
            mode: Mode::Pilot,
            overheat: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    SetMode(Mode),
    ChangeScheduled { mode: Mode, fire_at_ms: u64 },
    ChangeCancelled(Mode),
    OverheatWarning { temperature_c: f32, target_c: f32 },
    Disconnected,
    Reconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Unknown,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlState {
    pub current_mode: Mode,
    pub current_temp_c: Option<f32>,
    pub target_temp_c: f32,
    pub auto_enabled: bool,
    pub connected: bool,
    pub last_mode_change_ms: Option<u64>,
    pub pending_change: Option<Pending<Mode>>,
}

#[derive(Debug, Clone)]
pub struct AutoControlEngine {
    pub config: ControlConfig,
    settings: PersistedSettings,

    current_mode: Mode,
    current_temp_c: Option<f32>,
    link: Link,

    last_mode_change_ms: Option<u64>,

    pending: Debouncer<Mode>,
}

impl AutoControlEngine {
    pub fn new(mut config: ControlConfig, mut settings: PersistedSettings) -> Self {
        config.sanitize();
        settings.sanitize();
        let pending = Debouncer::new(config.debounce_ms);
        Self {
            config,
            settings,
            current_mode: Mode::Off,
            current_temp_c: None,
            link: Link::Unknown,
            last_mode_change_ms: None,
            pending,
        }
    }

    pub fn settings(&self) -> &PersistedSettings {
        &self.settings
    }

    pub fn current_mode(&self) -> Mode {
        self.current_mode
    }

    pub fn is_connected(&self) -> bool {
        self.link == Link::Up
    }

    pub fn is_auto_active(&self) -> bool {
        self.settings.auto_enabled && self.link != Link::Down
    }

    pub fn pending_change(&self) -> Option<Pending<Mode>> {
        self.pending.pending()
    }

    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.pending.deadline_ms()
    }

    pub fn state(&self) -> ControlState {
        ControlState {
            current_mode: self.current_mode,
            current_temp_c: self.current_temp_c,
            target_temp_c: self.settings.target_temp_c,
            auto_enabled: self.is_auto_active(),
            connected: self.is_connected(),
            last_mode_change_ms: self.last_mode_change_ms,
            pending_change: self.pending.pending(),
        }
    }

    pub fn dwell_remaining_ms(&self, now_ms: u64) -> u64 {
        match self.last_mode_change_ms {
            Some(last) => self
                .config
                .min_dwell_ms
                .saturating_sub(now_ms.saturating_sub(last)),
            None => 0,
        }
    }

    // A committed mode outranks the reading, which predates the command.
    pub fn evaluate(&mut self, reading: DeviceReading, now_ms: u64) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        if self.link == Link::Down {
            actions.push(EngineAction::Reconnected);
        }
        self.link = Link::Up;
        self.current_mode = reading.mode;
        self.current_temp_c = Some(reading.temperature_c);

        self.commit_due(now_ms, &mut actions);
        self.evaluate_state(now_ms, &mut actions);
        actions
    }

    pub fn tick(&mut self, now_ms: u64) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        self.commit_due(now_ms, &mut actions);
        actions
    }

    // The device is assumed off and auto control suspended until a good reading.
    pub fn on_status_failure(&mut self) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        self.cancel_pending(&mut actions);
        self.current_mode = Mode::Off;
        if self.link != Link::Down {
            actions.push(EngineAction::Disconnected);
        }
        self.link = Link::Down;
        actions
    }

    pub fn set_auto_enabled(&mut self, enabled: bool, now_ms: u64) -> (bool, Vec<EngineAction>) {
        if self.settings.auto_enabled == enabled {
            return (false, Vec::new());
        }

        let mut actions = Vec::new();
        self.settings.auto_enabled = enabled;
        self.evaluate_state(now_ms, &mut actions);
        (true, actions)
    }

    pub fn set_target_temp(&mut self, temp_c: f32, now_ms: u64) -> (bool, Vec<EngineAction>) {
        if !temp_c.is_finite() {
            return (false, Vec::new());
        }
        let clamped = temp_c.clamp(MIN_TARGET_TEMP_C, MAX_TARGET_TEMP_C);
        if (self.settings.target_temp_c - clamped).abs() <= f32::EPSILON {
            return (false, Vec::new());
        }

        let mut actions = Vec::new();
        self.settings.target_temp_c = clamped;
        self.evaluate_state(now_ms, &mut actions);
        (true, actions)
    }

    // Bypasses the decision table and the debounce. Off also disables auto.
    pub fn set_manual_mode(&mut self, mode: Mode) -> (bool, Vec<EngineAction>) {
        let mut actions = Vec::new();
        let mut settings_changed = false;

        self.cancel_pending(&mut actions);

        if mode == Mode::Off && self.settings.auto_enabled {
            self.settings.auto_enabled = false;
            settings_changed = true;
        }

        if mode != self.current_mode {
            self.current_mode = mode;
            actions.push(EngineAction::SetMode(mode));
        }

        (settings_changed, actions)
    }

    pub fn apply_schedule_target(
        &mut self,
        target: ScheduleTarget,
        now_ms: u64,
    ) -> (bool, Vec<EngineAction>) {
        match target {
            ScheduleTarget::Mode(mode) => self.set_manual_mode(mode),
            ScheduleTarget::Temperature(temp_c) => {
                let (target_changed, mut actions) = self.set_target_temp(temp_c, now_ms);
                let (auto_changed, mut auto_actions) = self.set_auto_enabled(true, now_ms);
                actions.append(&mut auto_actions);
                (target_changed || auto_changed, actions)
            }
        }
    }

    pub fn shutdown(&mut self) -> Option<Mode> {
        self.pending.cancel()
    }

    pub fn status(
        &self,
        now_ms: u64,
        telemetry: Option<&DeviceStatus>,
        active_schedule_id: Option<u64>,
        next_schedule_event_epoch: Option<i64>,
        time_synced: bool,
        timezone: &str,
    ) -> ControllerStatus {
        let state = self.state();
        ControllerStatus {
            current_temp: state.current_temp_c,
            target_temp: state.target_temp_c,
            mode: state.current_mode.as_str(),
            auto_enabled: state.auto_enabled,
            connected: state.connected,
            pending_mode: state.pending_change.map(|pending| pending.value.as_str()),
            pending_in_ms: self.pending.remaining_ms(now_ms),
            dwell_remaining_ms: self.dwell_remaining_ms(now_ms),
            battery: telemetry.map(|status| status.battery),
            wifi_strength: telemetry.map(|status| status.wifi_strength),
            active_schedule_id,
            next_schedule_event_epoch,
            time_synced,
            timezone: timezone.to_string(),
        }
    }

    fn evaluate_state(&mut self, now_ms: u64, actions: &mut Vec<EngineAction>) {
        if !self.is_auto_active() {
            self.cancel_pending(actions);
            return;
        }

        let Some(current_c) = self.current_temp_c else {
            return;
        };

        // Inside the dwell window the decision is deferred, not dropped.
        if self.dwell_remaining_ms(now_ms) > 0 {
            return;
        }

        let target_c = self.settings.target_temp_c;
        match decide(current_c, target_c, &self.config) {
            Decision::Hold => self.cancel_pending(actions),
            Decision::Switch { mode, overheat } => {
                if overheat {
                    actions.push(EngineAction::OverheatWarning {
                        temperature_c: current_c,
                        target_c,
                    });
                }

                if mode == self.current_mode {
                    self.cancel_pending(actions);
                } else {
                    let fire_at_ms = self.pending.schedule(mode, now_ms);
                    actions.push(EngineAction::ChangeScheduled { mode, fire_at_ms });
                }
            }
        }
    }

    fn commit_due(&mut self, now_ms: u64, actions: &mut Vec<EngineAction>) {
        let Some(mode) = self.pending.take_due(now_ms) else {
            return;
        };
        if mode == self.current_mode {
            return;
        }

        actions.push(EngineAction::SetMode(mode));
        self.current_mode = mode;
        self.last_mode_change_ms = Some(now_ms);
    }

    fn cancel_pending(&mut self, actions: &mut Vec<EngineAction>) {
        if let Some(mode) = self.pending.cancel() {
            actions.push(EngineAction::ChangeCancelled(mode));
        }
    }
}
