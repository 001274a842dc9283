use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Datelike, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

use crate::{
    config::{MAX_TARGET_TEMP_C, MIN_TARGET_TEMP_C},
    error::ScheduleError,
    types::Mode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub fn index(self) -> usize {
        match self {
            Self::Monday => 0,
            Self::Tuesday => 1,
            Self::Wednesday => 2,
            Self::Thursday => 3,
            Self::Friday => 4,
            Self::Saturday => 5,
            Self::Sunday => 6,
        }
    }

    pub fn from_index(index: usize) -> Self {
        match index % 7 {
            0 => Self::Monday,
            1 => Self::Tuesday,
            2 => Self::Wednesday,
            3 => Self::Thursday,
            4 => Self::Friday,
            5 => Self::Saturday,
            _ => Self::Sunday,
        }
    }

    pub fn from_chrono(weekday: chrono::Weekday) -> Self {
        Self::from_index(weekday.num_days_from_monday() as usize)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Monday => "Monday",
            Self::Tuesday => "Tuesday",
            Self::Wednesday => "Wednesday",
            Self::Thursday => "Thursday",
            Self::Friday => "Friday",
            Self::Saturday => "Saturday",
            Self::Sunday => "Sunday",
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// Minutes after midnight; orders like its HH:MM form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime(u16);

impl ClockTime {
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then(|| Self((hour * 60 + minute) as u16))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn of<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        Self((now.hour() * 60 + now.minute()) as u16)
    }
}

impl FromStr for ClockTime {
    type Err = ScheduleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleError::InvalidTime(value.to_string());
        let bytes = value.as_bytes();
        if bytes.len() != 5 || bytes[2] != b':' {
            return Err(invalid());
        }
        let digits = [bytes[0], bytes[1], bytes[3], bytes[4]];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(invalid());
        }

        let hour = u32::from(bytes[0] - b'0') * 10 + u32::from(bytes[1] - b'0');
        let minute = u32::from(bytes[3] - b'0') * 10 + u32::from(bytes[4] - b'0');
        Self::from_hm(hour, minute).ok_or_else(invalid)
    }
}

impl TryFrom<String> for ClockTime {
    type Error = ScheduleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClockTime> for String {
    fn from(value: ClockTime) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleTarget {
    Mode(Mode),
    Temperature(f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(pub u64);

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDraft {
    #[serde(rename = "startTime")]
    pub start_time: ClockTime,
    #[serde(rename = "endTime")]
    pub end_time: ClockTime,
    #[serde(default)]
    pub weekdays: BTreeSet<Weekday>,
    pub target: ScheduleTarget,
}

impl ScheduleDraft {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        validate_window(self.start_time, self.end_time, self.target)
    }

    pub fn into_schedule(self, id: ScheduleId) -> Schedule {
        Schedule {
            id,
            start_time: self.start_time,
            end_time: self.end_time,
            weekdays: self.weekdays,
            target: self.target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    #[serde(rename = "startTime")]
    pub start_time: ClockTime,
    #[serde(rename = "endTime")]
    pub end_time: ClockTime,
    #[serde(default)]
    pub weekdays: BTreeSet<Weekday>,
    pub target: ScheduleTarget,
}

impl Schedule {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        validate_window(self.start_time, self.end_time, self.target)
    }

    // An empty set means the evaluation day.
    pub fn effective_weekdays(&self, today: Weekday) -> BTreeSet<Weekday> {
        if self.weekdays.is_empty() {
            BTreeSet::from([today])
        } else {
            self.weekdays.clone()
        }
    }

    pub fn overlaps_in_time(&self, other: &Schedule) -> bool {
        self.start_time < other.end_time && other.start_time < self.end_time
    }

    // Half-open: the end minute is outside the window.
    pub fn is_active_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        let today = Weekday::from_chrono(now.weekday());
        let time = ClockTime::of(now);
        self.effective_weekdays(today).contains(&today)
            && self.start_time <= time
            && time < self.end_time
    }
}

fn validate_window(
    start_time: ClockTime,
    end_time: ClockTime,
    target: ScheduleTarget,
) -> Result<(), ScheduleError> {
    if start_time >= end_time {
        return Err(ScheduleError::EmptyWindow {
            start: start_time,
            end: end_time,
        });
    }

    if let ScheduleTarget::Temperature(value) = target {
        if !value.is_finite() || !(MIN_TARGET_TEMP_C..=MAX_TARGET_TEMP_C).contains(&value) {
            return Err(ScheduleError::TemperatureOutOfRange(value));
        }
        if (value * 2.0).fract() != 0.0 {
            return Err(ScheduleError::TemperatureStep(value));
        }
    }

    Ok(())
}

pub fn conflicting_days(a: &Schedule, b: &Schedule, today: Weekday) -> BTreeSet<Weekday> {
    if !a.overlaps_in_time(b) {
        return BTreeSet::new();
    }

    let days_a = a.effective_weekdays(today);
    let days_b = b.effective_weekdays(today);
    days_a.intersection(&days_b).copied().collect()
}

pub fn conflicts(a: &Schedule, b: &Schedule, today: Weekday) -> bool {
    !conflicting_days(a, b, today).is_empty()
}

#[cfg(test)]
mod tests {
    use chrono::FixedOffset;
    use pretty_assertions::assert_eq;

    use super::*;

    fn time(value: &str) -> ClockTime {
        value.parse().unwrap()
    }

    fn schedule(id: u64, days: &[Weekday], start: &str, end: &str) -> Schedule {
        Schedule {
            id: ScheduleId(id),
            start_time: time(start),
            end_time: time(end),
            weekdays: days.iter().copied().collect(),
            target: ScheduleTarget::Mode(Mode::Min),
        }
    }

    fn fixed_time(day: u32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2026, 1, day, hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn parses_only_zero_padded_clock_times() {
        assert_eq!(time("08:05").minutes(), 8 * 60 + 5);
        assert_eq!(time("23:59").to_string(), "23:59");

        for bad in ["8:05", "24:00", "12:60", "12-30", "ab:cd", "12:300"] {
            assert!(bad.parse::<ClockTime>().is_err(), "{bad}");
        }
    }

    #[test]
    fn overlapping_windows_on_same_day_conflict() {
        let a = schedule(1, &[Weekday::Monday], "08:00", "10:00");
        let b = schedule(2, &[Weekday::Monday], "09:00", "11:00");

        assert!(conflicts(&a, &b, Weekday::Friday));
        assert_eq!(
            conflicting_days(&a, &b, Weekday::Friday),
            BTreeSet::from([Weekday::Monday])
        );
    }

    #[test]
    fn disjoint_days_never_conflict() {
        let a = schedule(1, &[Weekday::Monday], "08:00", "10:00");
        let b = schedule(2, &[Weekday::Tuesday], "08:00", "10:00");

        assert!(!conflicts(&a, &b, Weekday::Monday));
    }

    #[test]
    fn touching_windows_do_not_conflict() {
        let a = schedule(1, &[Weekday::Monday], "08:00", "10:00");
        let b = schedule(2, &[Weekday::Monday], "10:00", "11:00");

        assert!(!conflicts(&a, &b, Weekday::Monday));
    }

    #[test]
    fn empty_weekdays_mean_today() {
        let a = schedule(1, &[], "08:00", "10:00");
        let b = schedule(2, &[], "09:30", "10:30");
        let wednesday = schedule(3, &[Weekday::Wednesday], "09:00", "09:15");

        assert!(conflicts(&a, &b, Weekday::Sunday));
        assert!(conflicts(&a, &wednesday, Weekday::Wednesday));
        assert!(!conflicts(&a, &wednesday, Weekday::Thursday));
    }

    #[test]
    fn conflict_is_symmetric() {
        let days = [
            vec![],
            vec![Weekday::Monday],
            vec![Weekday::Monday, Weekday::Sunday],
            vec![Weekday::Saturday],
        ];
        let windows = [("06:00", "07:30"), ("07:00", "09:00"), ("09:00", "12:00")];

        let mut all = Vec::new();
        for day_set in &days {
            for (start, end) in windows {
                all.push(schedule(all.len() as u64, day_set, start, end));
            }
        }

        for a in &all {
            for b in &all {
                for today in [Weekday::Monday, Weekday::Saturday] {
                    assert_eq!(conflicts(a, b, today), conflicts(b, a, today));
                }
            }
        }
    }

    #[test]
    fn validation_rejects_bad_windows_and_temperatures() {
        let mut draft = ScheduleDraft {
            start_time: time("10:00"),
            end_time: time("10:00"),
            weekdays: BTreeSet::new(),
            target: ScheduleTarget::Temperature(21.0),
        };
        assert!(matches!(
            draft.validate(),
            Err(ScheduleError::EmptyWindow { .. })
        ));

        draft.end_time = time("11:00");
        assert_eq!(draft.validate(), Ok(()));

        draft.target = ScheduleTarget::Temperature(30.5);
        assert_eq!(
            draft.validate(),
            Err(ScheduleError::TemperatureOutOfRange(30.5))
        );

        draft.target = ScheduleTarget::Temperature(21.25);
        assert_eq!(draft.validate(), Err(ScheduleError::TemperatureStep(21.25)));
    }

    #[test]
    fn active_window_is_half_open() {
        // Jan 5, 2026 is a Monday.
        let entry = schedule(1, &[Weekday::Monday], "08:00", "10:00");

        assert!(entry.is_active_at(&fixed_time(5, 8, 0)));
        assert!(entry.is_active_at(&fixed_time(5, 9, 59)));
        assert!(!entry.is_active_at(&fixed_time(5, 10, 0)));
        assert!(!entry.is_active_at(&fixed_time(6, 9, 0)));
    }

    #[test]
    fn schedule_json_uses_editor_field_names() {
        let entry = Schedule {
            id: ScheduleId(7),
            start_time: time("08:00"),
            end_time: time("09:30"),
            weekdays: BTreeSet::from([Weekday::Saturday, Weekday::Monday]),
            target: ScheduleTarget::Temperature(21.5),
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": 7,
                "startTime": "08:00",
                "endTime": "09:30",
                "weekdays": ["monday", "saturday"],
                "target": { "temperature": 21.5 },
            })
        );

        let bad = r#"{"id":1,"startTime":"8:00","endTime":"09:00","target":{"mode":"max"}}"#;
        assert!(serde_json::from_str::<Schedule>(bad).is_err());
    }
}
