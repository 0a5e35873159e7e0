use chrono::{DateTime, Datelike, Duration, FixedOffset, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::{devices::DeviceStore, error::ControlError, types::DeviceIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        Self::Mon,
        Self::Tue,
        Self::Wed,
        Self::Thu,
        Self::Fri,
        Self::Sat,
        Self::Sun,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::Mon => 0,
            Self::Tue => 1,
            Self::Wed => 2,
            Self::Thu => 3,
            Self::Fri => 4,
            Self::Sat => 5,
            Self::Sun => 6,
        }
    }

    pub fn from_chrono(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => Self::Mon,
            Weekday::Tue => Self::Tue,
            Weekday::Wed => Self::Wed,
            Weekday::Thu => Self::Thu,
            Weekday::Fri => Self::Fri,
            Weekday::Sat => Self::Sat,
            Weekday::Sun => Self::Sun,
        }
    }

    /// Lowercase short name, also used as the form field name.
    pub fn key(self) -> &'static str {
        match self {
            Self::Mon => "mon",
            Self::Tue => "tue",
            Self::Wed => "wed",
            Self::Thu => "thu",
            Self::Fri => "fri",
            Self::Sat => "sat",
            Self::Sun => "sun",
        }
    }
}

/// Set of weekdays, one bit per [`DayOfWeek::index`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<DayOfWeek>", into = "Vec<DayOfWeek>")]
pub struct WeekdayMask(u8);

impl WeekdayMask {
    pub const EVERY_DAY: WeekdayMask = WeekdayMask(0b111_1111);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, day: DayOfWeek) -> bool {
        self.0 & (1 << day.index()) != 0
    }

    pub fn insert(&mut self, day: DayOfWeek) {
        self.0 |= 1 << day.index();
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn days(self) -> impl Iterator<Item = DayOfWeek> {
        DayOfWeek::ALL.into_iter().filter(move |day| self.contains(*day))
    }
}

impl FromIterator<DayOfWeek> for WeekdayMask {
    fn from_iter<I: IntoIterator<Item = DayOfWeek>>(iter: I) -> Self {
        let mut mask = Self::empty();
        for day in iter {
            mask.insert(day);
        }
        mask
    }
}

impl From<Vec<DayOfWeek>> for WeekdayMask {
    fn from(days: Vec<DayOfWeek>) -> Self {
        days.into_iter().collect()
    }
}

impl From<WeekdayMask> for Vec<DayOfWeek> {
    fn from(mask: WeekdayMask) -> Self {
        mask.days().collect()
    }
}

/// Daily activation window. `end` earlier than `start` crosses midnight;
/// `end == start` is an empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub days: WeekdayMask,
    #[serde(rename = "startHour")]
    pub start_hour: u8,
    #[serde(rename = "startMinute")]
    pub start_minute: u8,
    #[serde(rename = "endHour")]
    pub end_hour: u8,
    #[serde(rename = "endMinute")]
    pub end_minute: u8,
}

impl Default for ScheduleWindow {
    fn default() -> Self {
        Self {
            days: WeekdayMask::EVERY_DAY,
            start_hour: 18,
            start_minute: 0,
            end_hour: 22,
            end_minute: 0,
        }
    }
}

impl ScheduleWindow {
    pub fn new(
        days: WeekdayMask,
        start_hour: u8,
        start_minute: u8,
        end_hour: u8,
        end_minute: u8,
    ) -> Result<Self, ControlError> {
        let window = Self {
            days,
            start_hour,
            start_minute,
            end_hour,
            end_minute,
        };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        if self.start_hour > 23 || self.end_hour > 23 {
            return Err(ControlError::InvalidSchedule("hour must be 0-23"));
        }
        if self.start_minute > 59 || self.end_minute > 59 {
            return Err(ControlError::InvalidSchedule("minute must be 0-59"));
        }
        Ok(())
    }

    pub fn start_minutes(&self) -> u16 {
        self.start_hour as u16 * 60 + self.start_minute as u16
    }

    pub fn end_minutes(&self) -> u16 {
        self.end_hour as u16 * 60 + self.end_minute as u16
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end_minutes() < self.start_minutes()
    }
}

/// Whether the window is active at `now`. Pure; the weekday is taken from
/// `now` itself, so the after-midnight part of a crossing window belongs to
/// the following day.
pub fn evaluate<Tz: TimeZone>(now: &DateTime<Tz>, window: &ScheduleWindow) -> bool {
    if !window.days.contains(DayOfWeek::from_chrono(now.weekday())) {
        return false;
    }

    let current = now.hour() as u16 * 60 + now.minute() as u16;
    let start = window.start_minutes();
    let end = window.end_minutes();

    if window.crosses_midnight() {
        current >= start || current < end
    } else {
        start <= current && current < end
    }
}

/// Configured schedule: the window plus which devices it drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub enabled: bool,
    pub devices: Vec<DeviceIndex>,
    pub window: ScheduleWindow,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            enabled: false,
            devices: vec![3],
            window: ScheduleWindow::default(),
        }
    }
}

impl Schedule {
    pub fn normalize(&mut self, device_count: usize) {
        if self.window.validate().is_err() {
            self.window = ScheduleWindow::default();
        }
        self.devices.retain(|index| *index < device_count);
        self.devices.sort_unstable();
        self.devices.dedup();
    }

    pub fn is_active(&self, now: &DateTime<FixedOffset>) -> bool {
        self.enabled && evaluate(now, &self.window)
    }

    /// Epoch seconds of the next minute at which the window flips state,
    /// looking at most a week ahead.
    pub fn next_transition_epoch(&self, now: DateTime<FixedOffset>) -> Option<i64> {
        if !self.enabled || self.window.days.is_empty() {
            return None;
        }

        let current = evaluate(&now, &self.window);
        let boundaries = [self.window.start_minutes(), self.window.end_minutes()];
        let mut best: Option<DateTime<FixedOffset>> = None;

        for day_offset in 0..=7i64 {
            let date = now.date_naive() + Duration::days(day_offset);
            for minutes in boundaries {
                let Some(naive) =
                    date.and_hms_opt((minutes / 60) as u32, (minutes % 60) as u32, 0)
                else {
                    continue;
                };
                let Some(candidate) = now.offset().from_local_datetime(&naive).single() else {
                    continue;
                };
                if candidate <= now || evaluate(&candidate, &self.window) == current {
                    continue;
                }
                if best.map(|b| candidate < b).unwrap_or(true) {
                    best = Some(candidate);
                }
            }
        }

        best.map(|dt| dt.timestamp())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTransition {
    pub active: bool,
    /// At least one managed device actually changed state.
    pub changed: bool,
}

/// Applies the schedule to the store at boundaries only.
///
/// The reconciler remembers the last desired state it applied and does not
/// touch the devices again until that desired state changes, so a manual
/// toggle sticks until the next window boundary.
#[derive(Debug, Clone, Default)]
pub struct ScheduleReconciler {
    last_desired: Option<bool>,
}

impl ScheduleReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the last applied state so the next cycle re-applies the window.
    pub fn reset(&mut self) {
        self.last_desired = None;
    }

    pub fn reconcile(
        &mut self,
        now: &DateTime<FixedOffset>,
        schedule: &Schedule,
        store: &mut DeviceStore,
    ) -> Option<ScheduleTransition> {
        if !schedule.enabled {
            self.last_desired = None;
            return None;
        }

        let desired = evaluate(now, &schedule.window);
        if self.last_desired == Some(desired) {
            return None;
        }
        self.last_desired = Some(desired);

        let mut changed = false;
        for index in &schedule.devices {
            // Indices were validated by `Schedule::normalize`.
            if let Ok(device_changed) = store.set_state(*index, desired) {
                changed |= device_changed;
            }
        }

        Some(ScheduleTransition {
            active: desired,
            changed,
        })
    }
}
