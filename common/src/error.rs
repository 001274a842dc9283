use std::collections::BTreeSet;

use crate::schedule::{ClockTime, ScheduleId, Weekday};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid time {0:?}, expected zero-padded HH:MM")]
    InvalidTime(String),

    #[error("start time {start} must be before end time {end}")]
    EmptyWindow { start: ClockTime, end: ClockTime },

    #[error("target temperature {0} is outside 15.0-30.0")]
    TemperatureOutOfRange(f32),

    #[error("target temperature {0} must be a multiple of 0.5")]
    TemperatureStep(f32),

    #[error(
        "a schedule already exists for {start} - {end} on: {}",
        day_list(.days)
    )]
    Conflict {
        start: ClockTime,
        end: ClockTime,
        days: BTreeSet<Weekday>,
    },

    #[error("schedule {0} not found")]
    NotFound(ScheduleId),

    #[error("schedule id {0} is used twice")]
    DuplicateId(ScheduleId),

    #[error("no schedule ids left")]
    IdsExhausted,
}

impl ScheduleError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

fn day_list(days: &BTreeSet<Weekday>) -> String {
    days.iter()
        .map(|day| day.label())
        .collect::<Vec<_>>()
        .join(", ")
}
