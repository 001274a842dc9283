pub mod config;
pub mod control;
pub mod debounce;
pub mod error;
pub mod schedule;
pub mod simulator;
pub mod store;
pub mod topics;
pub mod types;

pub use config::{ControlConfig, PersistedSettings, RuntimeConfig};
pub use control::{decide, AutoControlEngine, ControlState, Decision, EngineAction};
pub use debounce::{Debouncer, Pending};
pub use error::ScheduleError;
pub use schedule::{
    conflicting_days, conflicts, ClockTime, Schedule, ScheduleDraft, ScheduleId, ScheduleTarget,
    Weekday,
};
pub use simulator::SimulatedHeater;
pub use store::ScheduleStore;
pub use topics::*;
pub use types::{ControllerStatus, DeviceReading, DeviceStatus, Mode, ModeCommand};
