use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone};

use crate::{
    error::ScheduleError,
    schedule::{conflicting_days, ClockTime, Schedule, ScheduleDraft, ScheduleId, Weekday},
};

#[derive(Debug, Clone)]
pub struct ScheduleStore {
    schedules: Vec<Schedule>,
    // None once u64::MAX has been handed out.
    next_id: Option<u64>,
}

impl Default for ScheduleStore {
    fn default() -> Self {
        Self {
            schedules: Vec::new(),
            next_id: Some(0),
        }
    }
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Entries that are malformed or clash with an earlier one are returned, not kept.
    pub fn restore(
        schedules: Vec<Schedule>,
        today: Weekday,
    ) -> (Self, Vec<(Schedule, ScheduleError)>) {
        let mut store = Self::new();
        let mut rejected = Vec::new();

        for schedule in schedules {
            let id = schedule.id;
            let result = if store.get(id).is_some() {
                Err(ScheduleError::DuplicateId(id))
            } else {
                store.insert_checked(schedule.clone(), today, None)
            };

            match result {
                Ok(()) => {
                    store.next_id = store
                        .next_id
                        .and_then(|next| id.0.checked_add(1).map(|after| next.max(after)));
                }
                Err(err) => rejected.push((schedule, err)),
            }
        }

        (store, rejected)
    }

    pub fn list(&self) -> &[Schedule] {
        &self.schedules
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    pub fn get(&self, id: ScheduleId) -> Option<&Schedule> {
        self.schedules.iter().find(|schedule| schedule.id == id)
    }

    pub fn add(
        &mut self,
        draft: ScheduleDraft,
        today: Weekday,
    ) -> Result<&Schedule, ScheduleError> {
        let id = self.next_id.ok_or(ScheduleError::IdsExhausted)?;
        self.insert_checked(draft.into_schedule(ScheduleId(id)), today, None)?;
        self.next_id = id.checked_add(1);
        Ok(&self.schedules[self.schedules.len() - 1])
    }

    pub fn remove(&mut self, id: ScheduleId) -> Option<Schedule> {
        let index = self.position(id)?;
        Some(self.schedules.remove(index))
    }

    pub fn replace(
        &mut self,
        id: ScheduleId,
        draft: ScheduleDraft,
        today: Weekday,
    ) -> Result<&Schedule, ScheduleError> {
        let index = self.position(id).ok_or(ScheduleError::NotFound(id))?;
        let previous = self.schedules.remove(index);

        match self.insert_checked(draft.into_schedule(id), today, Some(index)) {
            Ok(()) => Ok(&self.schedules[index]),
            Err(err) => {
                self.schedules.insert(index, previous);
                Err(err)
            }
        }
    }

    pub fn active_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<&Schedule> {
        self.schedules
            .iter()
            .find(|schedule| schedule.is_active_at(now))
    }

    // Boundaries are resolved in `now`'s zone so DST changes shift them.
    pub fn next_transition_epoch<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<i64> {
        let zone = now.timezone();
        let now_day = Weekday::from_chrono(now.weekday());
        let now_time = ClockTime::of(now);

        let mut best: Option<DateTime<Tz>> = None;

        for day_offset in 0..8i64 {
            let day = Weekday::from_index(now_day.index() + day_offset as usize);
            for schedule in &self.schedules {
                if !schedule.effective_weekdays(now_day).contains(&day) {
                    continue;
                }

                for boundary in [schedule.start_time, schedule.end_time] {
                    if day_offset == 0 && boundary <= now_time {
                        continue;
                    }

                    let date = now.date_naive() + Duration::days(day_offset);
                    let minutes = u32::from(boundary.minutes());
                    let Some(naive) = date.and_hms_opt(minutes / 60, minutes % 60, 0) else {
                        continue;
                    };
                    let Some(candidate) = resolve_local(&zone, naive) else {
                        continue;
                    };

                    if best.as_ref().is_none_or(|current| candidate < *current) {
                        best = Some(candidate);
                    }
                }
            }
        }

        best.map(|dt| dt.timestamp())
    }

    fn position(&self, id: ScheduleId) -> Option<usize> {
        self.schedules.iter().position(|schedule| schedule.id == id)
    }

    fn insert_checked(
        &mut self,
        mut schedule: Schedule,
        today: Weekday,
        at: Option<usize>,
    ) -> Result<(), ScheduleError> {
        schedule.validate()?;
        if schedule.weekdays.is_empty() {
            schedule.weekdays.insert(today);
        }

        let days: BTreeSet<Weekday> = self
            .schedules
            .iter()
            .flat_map(|existing| conflicting_days(&schedule, existing, today))
            .collect();
        if !days.is_empty() {
            return Err(ScheduleError::Conflict {
                start: schedule.start_time,
                end: schedule.end_time,
                days,
            });
        }

        match at {
            Some(index) => self.schedules.insert(index, schedule),
            None => self.schedules.push(schedule),
        }
        Ok(())
    }
}

// Ambiguous local times take the earlier instant. Times skipped by a
// spring-forward gap move to the first wall-clock minute after it.
fn resolve_local<Tz: TimeZone>(zone: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    zone.from_local_datetime(&naive)
        .earliest()
        .or_else(|| zone.from_local_datetime(&(naive + Duration::hours(1))).earliest())
}
