use std::sync::Arc;

use chrono::DateTime;
use chrono_tz::Tz;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use heater_common::{
    AutoControlEngine, ControllerStatus, DeviceStatus, EngineAction, ScheduleId, ScheduleStore,
};

use crate::device::HeaterDevice;

#[derive(Clone)]
pub struct ControlLoop<D> {
    device: Arc<D>,
    pub engine: Arc<Mutex<AutoControlEngine>>,
    pub schedules: Arc<Mutex<ScheduleStore>>,
    telemetry: Arc<Mutex<Option<DeviceStatus>>>,
    active_schedule: Arc<Mutex<Option<ScheduleId>>>,
    wake: Arc<Notify>,
    settings_dirty: Arc<Notify>,
}

impl<D: HeaterDevice> ControlLoop<D> {
    pub fn new(device: D, engine: AutoControlEngine, schedules: ScheduleStore) -> Self {
        Self {
            device: Arc::new(device),
            engine: Arc::new(Mutex::new(engine)),
            schedules: Arc::new(Mutex::new(schedules)),
            telemetry: Arc::new(Mutex::new(None)),
            active_schedule: Arc::new(Mutex::new(None)),
            wake: Arc::new(Notify::new()),
            settings_dirty: Arc::new(Notify::new()),
        }
    }

    pub async fn poll_once(&self, now_ms: u64) -> Vec<EngineAction> {
        let actions = self.refresh(now_ms).await;
        self.execute(actions, now_ms).await
    }

    pub async fn fire_due(&self, now_ms: u64) -> Vec<EngineAction> {
        let actions = self.engine.lock().await.tick(now_ms);
        self.execute(actions, now_ms).await
    }

    // A window that stays open across ticks is applied once.
    pub async fn apply_schedules(
        &self,
        now_local: Option<DateTime<Tz>>,
        now_ms: u64,
    ) -> Vec<EngineAction> {
        let Some(now) = now_local else {
            return Vec::new();
        };

        let active = self.schedules.lock().await.active_at(&now).cloned();
        let opened = {
            let mut current = self.active_schedule.lock().await;
            let id = active.as_ref().map(|schedule| schedule.id);
            let opened = id.is_some() && id != *current;
            *current = id;
            opened
        };

        let Some(schedule) = active.filter(|_| opened) else {
            return Vec::new();
        };

        info!(schedule = %schedule.id, target = ?schedule.target, "schedule window opened");
        let (settings_changed, actions) = self
            .engine
            .lock()
            .await
            .apply_schedule_target(schedule.target, now_ms);
        if settings_changed {
            self.settings_dirty.notify_one();
        }
        self.execute(actions, now_ms).await
    }

    // A failed command is followed by one immediate status fetch.
    pub async fn execute(&self, mut actions: Vec<EngineAction>, now_ms: u64) -> Vec<EngineAction> {
        if !self.dispatch(&actions).await {
            let mut resync = self.refresh(now_ms).await;
            self.dispatch(&resync).await;
            actions.append(&mut resync);
        }
        self.wake.notify_one();
        actions
    }

    pub async fn next_deadline_ms(&self) -> Option<u64> {
        self.engine.lock().await.next_deadline_ms()
    }

    pub async fn woken(&self) {
        self.wake.notified().await;
    }

    pub async fn settings_changed(&self) {
        self.settings_dirty.notified().await;
    }

    pub async fn active_schedule(&self) -> Option<ScheduleId> {
        *self.active_schedule.lock().await
    }

    pub async fn status(
        &self,
        now_ms: u64,
        now_local: Option<DateTime<Tz>>,
        timezone: &str,
    ) -> ControllerStatus {
        let telemetry = self.telemetry.lock().await.clone();
        let active_schedule = self.active_schedule().await;
        let next_event = match &now_local {
            Some(now) => self.schedules.lock().await.next_transition_epoch(now),
            None => None,
        };

        self.engine.lock().await.status(
            now_ms,
            telemetry.as_ref(),
            active_schedule.map(|id| id.0),
            next_event,
            now_local.is_some(),
            timezone,
        )
    }

    pub async fn shutdown(&self) {
        if let Some(mode) = self.engine.lock().await.shutdown() {
            info!(mode = %mode, "dropped pending mode change on shutdown");
        }
    }

    async fn refresh(&self, now_ms: u64) -> Vec<EngineAction> {
        match self.device.fetch_status().await {
            Ok(status) => {
                let reading = status.reading(now_ms);
                *self.telemetry.lock().await = Some(status);
                self.engine.lock().await.evaluate(reading, now_ms)
            }
            Err(err) => {
                if err.is_connectivity() {
                    warn!(error = %err, "heater status unavailable");
                } else {
                    warn!(error = %err, "heater status unusable");
                }
                *self.telemetry.lock().await = None;
                self.engine.lock().await.on_status_failure()
            }
        }
    }

    async fn dispatch(&self, actions: &[EngineAction]) -> bool {
        let mut delivered = true;

        for action in actions {
            match action {
                EngineAction::SetMode(mode) => {
                    info!(mode = %mode, "heater mode change");
                    if let Err(err) = self.device.send_mode(*mode).await {
                        warn!(mode = %mode, error = %err, "heater refused mode command");
                        delivered = false;
                    }
                }
                EngineAction::ChangeScheduled { mode, fire_at_ms } => {
                    debug!(mode = %mode, fire_at_ms, "mode change scheduled");
                }
                EngineAction::ChangeCancelled(mode) => {
                    debug!(mode = %mode, "pending mode change cancelled");
                }
                EngineAction::OverheatWarning {
                    temperature_c,
                    target_c,
                } => {
                    warn!(temperature_c, target_c, "room is well above target, heater off");
                }
                EngineAction::Disconnected => {
                    warn!("heater disconnected, auto control suspended");
                }
                EngineAction::Reconnected => {
                    info!("heater reconnected");
                }
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono_tz::Europe::Madrid;
    use heater_common::{
        ControlConfig, DeviceReading, Mode, PersistedSettings, ScheduleDraft, ScheduleTarget,
        SimulatedHeater, Weekday,
    };

    use super::*;
    use crate::device::DeviceError;

    #[derive(Clone, Default)]
    struct FakeHeater {
        heater: Arc<Mutex<SimulatedHeater>>,
    }

    impl HeaterDevice for FakeHeater {
        async fn fetch_status(&self) -> Result<DeviceStatus, DeviceError> {
            self.heater
                .lock()
                .await
                .status()
                .ok_or(DeviceError::Timeout(5_000))
        }

        async fn send_mode(&self, mode: Mode) -> Result<(), DeviceError> {
            if self.heater.lock().await.apply_mode(mode) {
                Ok(())
            } else {
                Err(DeviceError::Rejected(503))
            }
        }
    }

    fn control(heater: &FakeHeater, schedules: ScheduleStore) -> ControlLoop<FakeHeater> {
        let engine = AutoControlEngine::new(ControlConfig::default(), PersistedSettings::default());
        ControlLoop::new(heater.clone(), engine, schedules)
    }

    fn monday(hour: u32, minute: u32) -> Option<DateTime<Tz>> {
        // Jan 5, 2026 is a Monday.
        Madrid.with_ymd_and_hms(2026, 1, 5, hour, minute, 0).single()
    }

    #[tokio::test]
    async fn cold_room_commits_max_after_debounce() {
        let heater = FakeHeater::default();
        let control = control(&heater, ScheduleStore::new());

        let actions = control.poll_once(0).await;
        assert!(matches!(
            actions.as_slice(),
            [EngineAction::ChangeScheduled {
                mode: Mode::Max,
                fire_at_ms: 1_500
            }]
        ));
        assert!(heater.heater.lock().await.commands().is_empty());
        assert_eq!(control.next_deadline_ms().await, Some(1_500));

        assert!(control.fire_due(1_000).await.is_empty());
        let actions = control.fire_due(1_500).await;
        assert_eq!(actions, vec![EngineAction::SetMode(Mode::Max)]);
        assert_eq!(heater.heater.lock().await.commands(), &[Mode::Max]);
    }

    #[tokio::test]
    async fn failed_poll_suspends_until_next_reading() {
        let heater = FakeHeater::default();
        let control = control(&heater, ScheduleStore::new());

        control.poll_once(0).await;
        heater.heater.lock().await.set_fail_status(true);

        let actions = control.poll_once(1_000).await;
        assert!(actions.contains(&EngineAction::ChangeCancelled(Mode::Max)));
        assert!(actions.contains(&EngineAction::Disconnected));
        assert!(control.fire_due(1_500).await.is_empty());

        let status = control.status(1_500, None, "Europe/Madrid").await;
        assert!(!status.connected);
        assert!(!status.auto_enabled);
        assert_eq!(status.battery, None);

        heater.heater.lock().await.set_fail_status(false);
        let actions = control.poll_once(6_000).await;
        assert_eq!(actions[0], EngineAction::Reconnected);
        assert!(matches!(
            actions[1],
            EngineAction::ChangeScheduled { mode: Mode::Max, .. }
        ));
    }

    #[tokio::test]
    async fn rejected_command_resynchronises_from_device() {
        let heater = FakeHeater::default();
        heater.heater.lock().await.set_reject_commands(true);
        let control = control(&heater, ScheduleStore::new());

        control.poll_once(0).await;
        let actions = control.fire_due(1_500).await;

        assert_eq!(actions, vec![EngineAction::SetMode(Mode::Max)]);
        assert!(heater.heater.lock().await.commands().is_empty());
        // The resync reading shows the heater still off; dwell holds off a retry.
        let engine = control.engine.lock().await;
        assert_eq!(engine.current_mode(), Mode::Off);
        assert_eq!(engine.next_deadline_ms(), None);
    }

    #[tokio::test]
    async fn schedule_applies_once_per_window() {
        let mut schedules = ScheduleStore::new();
        schedules
            .add(
                ScheduleDraft {
                    start_time: "08:00".parse().unwrap(),
                    end_time: "10:00".parse().unwrap(),
                    weekdays: [Weekday::Monday].into_iter().collect(),
                    target: ScheduleTarget::Mode(Mode::Pilot),
                },
                Weekday::Monday,
            )
            .unwrap();
        let heater = FakeHeater::default();
        let control = control(&heater, schedules);

        assert!(control.apply_schedules(monday(7, 59), 0).await.is_empty());

        let actions = control.apply_schedules(monday(8, 0), 1_000).await;
        assert_eq!(actions, vec![EngineAction::SetMode(Mode::Pilot)]);
        assert_eq!(control.active_schedule().await, Some(ScheduleId(0)));

        assert!(control.apply_schedules(monday(9, 30), 2_000).await.is_empty());
        assert!(control.apply_schedules(monday(10, 0), 3_000).await.is_empty());
        assert_eq!(control.active_schedule().await, None);
        assert_eq!(heater.heater.lock().await.commands(), &[Mode::Pilot]);
    }

    #[tokio::test]
    async fn temperature_schedule_retargets_engine() {
        let mut schedules = ScheduleStore::new();
        schedules
            .add(
                ScheduleDraft {
                    start_time: "06:30".parse().unwrap(),
                    end_time: "08:00".parse().unwrap(),
                    weekdays: Default::default(),
                    target: ScheduleTarget::Temperature(24.5),
                },
                Weekday::Monday,
            )
            .unwrap();
        let heater = FakeHeater::default();
        let control = control(&heater, schedules);
        control
            .engine
            .lock()
            .await
            .set_auto_enabled(false, 0);

        control.apply_schedules(monday(7, 0), 0).await;

        let engine = control.engine.lock().await;
        assert_eq!(engine.settings().target_temp_c, 24.5);
        assert!(engine.settings().auto_enabled);
    }

    #[tokio::test]
    async fn status_reports_telemetry_and_next_transition() {
        let mut schedules = ScheduleStore::new();
        schedules
            .add(
                ScheduleDraft {
                    start_time: "18:00".parse().unwrap(),
                    end_time: "22:00".parse().unwrap(),
                    weekdays: [Weekday::Monday].into_iter().collect(),
                    target: ScheduleTarget::Temperature(22.0),
                },
                Weekday::Monday,
            )
            .unwrap();
        let heater = FakeHeater::default();
        let control = control(&heater, schedules);

        control.poll_once(0).await;
        let status = control.status(500, monday(9, 0), "Europe/Madrid").await;

        assert_eq!(status.current_temp, Some(18.0));
        assert_eq!(status.battery, Some(85.0));
        assert_eq!(status.wifi_strength, Some(4));
        assert_eq!(status.pending_mode, Some("max"));
        assert_eq!(status.pending_in_ms, Some(1_000));
        assert_eq!(
            status.next_schedule_event_epoch,
            monday(18, 0).map(|at| at.timestamp())
        );
        assert!(status.time_synced);
    }

    #[tokio::test]
    async fn shutdown_drops_pending_change() {
        let heater = FakeHeater::default();
        let control = control(&heater, ScheduleStore::new());

        control.poll_once(0).await;
        control.shutdown().await;

        assert!(control.fire_due(5_000).await.is_empty());
        assert!(heater.heater.lock().await.commands().is_empty());

        // A manual reading afterwards still goes through the engine normally.
        let reading = DeviceReading {
            mode: Mode::Off,
            temperature_c: 21.0,
            timestamp_ms: 6_000,
        };
        assert!(control.engine.lock().await.evaluate(reading, 6_000).is_empty());
    }
}
