//! Window membership and next-transition computation.
//!
//! Both schedule strategies reduce to a [`DailyWindow`] per day: a start and
//! an end instant on the same local day. When `start > end` the window
//! crosses midnight. Start is inclusive, end exclusive, and a window whose
//! bounds are equal is never active.
//!
//! Anything that cannot be resolved (malformed time, unknown zone, polar day)
//! evaluates to "not in window, no next transition" rather than an error.

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use super::{
    parse_clock_time, FixedSchedule, ScheduleConfig, SolarSchedule, SunCalculator,
    MAX_SOLAR_OFFSET_MINUTES,
};

/// One day's occurrence of the calm window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DailyWindow {
    /// Window crosses midnight (starts in the evening, ends next morning).
    pub fn is_overnight(&self) -> bool {
        self.start > self.end
    }

    pub fn is_degenerate(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if self.is_degenerate() {
            false
        } else if self.is_overnight() {
            at >= self.start || at < self.end
        } else {
            self.start <= at && at < self.end
        }
    }

    /// Soonest instant after `now` at which membership flips.
    ///
    /// `tomorrow` is consulted only when today's relevant bound has already
    /// elapsed.
    fn next_flip(
        &self,
        now: DateTime<Utc>,
        tomorrow: impl FnOnce() -> Option<DailyWindow>,
    ) -> Option<DateTime<Utc>> {
        if self.is_degenerate() {
            return None;
        }
        let candidate = match (self.contains(now), self.is_overnight()) {
            // Early morning, still inside last night's window.
            (true, true) if now < self.end => Some(self.end),
            // Evening, inside tonight's window; it ends tomorrow morning.
            (true, true) => tomorrow().map(|w| w.end),
            (true, false) => Some(self.end),
            // Daytime gap of an overnight window.
            (false, true) => Some(self.start),
            (false, false) if now < self.start => Some(self.start),
            (false, false) => tomorrow().map(|w| w.start),
        };
        candidate.filter(|at| *at > now)
    }
}

/// Result of evaluating a schedule at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEvaluation {
    pub calm_active: bool,
    pub next_transition_at: Option<DateTime<Utc>>,
}

/// Evaluate membership and the next transition in one pass.
pub fn evaluate(
    schedule: &ScheduleConfig,
    sun: &dyn SunCalculator,
    now: DateTime<Utc>,
) -> WindowEvaluation {
    let inactive = WindowEvaluation {
        calm_active: false,
        next_transition_at: None,
    };
    let Some(resolved) = Resolved::new(schedule, sun) else {
        return inactive;
    };
    let day = resolved.day_of(now);
    let Some(today) = resolved.window_on(day) else {
        return inactive;
    };
    WindowEvaluation {
        calm_active: today.contains(now),
        next_transition_at: today.next_flip(now, || resolved.window_on(day.succ_opt()?)),
    }
}

/// Whether `now` falls inside the schedule's calm window.
pub fn in_window(schedule: &ScheduleConfig, sun: &dyn SunCalculator, now: DateTime<Utc>) -> bool {
    evaluate(schedule, sun, now).calm_active
}

/// Soonest instant strictly after `now` at which [`in_window`] flips.
pub fn next_transition(
    schedule: &ScheduleConfig,
    sun: &dyn SunCalculator,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    evaluate(schedule, sun, now).next_transition_at
}

/// Zone used to interpret fixed `HH:mm` bounds.
#[derive(Debug, Clone, Copy)]
enum Zone {
    Local,
    Named(Tz),
}

/// A schedule with its strings parsed, ready to produce daily windows.
enum Resolved<'a> {
    Fixed {
        start: NaiveTime,
        end: NaiveTime,
        zone: Zone,
    },
    Solar {
        config: &'a SolarSchedule,
        sun: &'a dyn SunCalculator,
    },
}

impl<'a> Resolved<'a> {
    fn new(schedule: &'a ScheduleConfig, sun: &'a dyn SunCalculator) -> Option<Self> {
        match schedule {
            ScheduleConfig::Fixed(fixed) => Self::fixed(fixed),
            ScheduleConfig::SunsetSunrise(config) => {
                let valid = (-90.0..=90.0).contains(&config.latitude)
                    && (-180.0..=180.0).contains(&config.longitude);
                if !valid {
                    tracing::warn!(
                        latitude = config.latitude,
                        longitude = config.longitude,
                        "coordinates out of range; calm window disabled"
                    );
                    return None;
                }
                let max = MAX_SOLAR_OFFSET_MINUTES;
                let offsets_valid = (-max..=max).contains(&config.offset_before_sunset_minutes)
                    && (-max..=max).contains(&config.offset_after_sunrise_minutes);
                if !offsets_valid {
                    tracing::warn!(
                        before_sunset = config.offset_before_sunset_minutes,
                        after_sunrise = config.offset_after_sunrise_minutes,
                        "solar offsets out of range; calm window disabled"
                    );
                    return None;
                }
                Some(Resolved::Solar { config, sun })
            }
        }
    }

    fn fixed(fixed: &FixedSchedule) -> Option<Self> {
        let parsed = parse_clock_time("sleep_start", &fixed.sleep_start)
            .and_then(|start| Ok((start, parse_clock_time("sleep_end", &fixed.sleep_end)?)));
        let (start, end) = match parsed {
            Ok(bounds) => bounds,
            Err(e) => {
                tracing::warn!(error = %e, "invalid fixed schedule; calm window disabled");
                return None;
            }
        };
        let zone = match &fixed.timezone {
            None => Zone::Local,
            Some(name) => match name.parse::<Tz>() {
                Ok(tz) => Zone::Named(tz),
                Err(_) => {
                    tracing::warn!(timezone = %name, "unknown timezone; calm window disabled");
                    return None;
                }
            },
        };
        Some(Resolved::Fixed { start, end, zone })
    }

    /// Calendar day that `now` belongs to for this schedule.
    fn day_of(&self, now: DateTime<Utc>) -> NaiveDate {
        match self {
            Resolved::Fixed { zone: Zone::Local, .. } => now.with_timezone(&Local).date_naive(),
            Resolved::Fixed {
                zone: Zone::Named(tz),
                ..
            } => now.with_timezone(tz).date_naive(),
            // Local mean solar date.
            Resolved::Solar { config, .. } => {
                let offset_ms = (config.longitude / 15.0 * 3_600_000.0) as i64;
                (now + Duration::milliseconds(offset_ms)).date_naive()
            }
        }
    }

    fn window_on(&self, day: NaiveDate) -> Option<DailyWindow> {
        match self {
            Resolved::Fixed { start, end, zone } => Some(DailyWindow {
                start: zone.instant(day, *start)?,
                end: zone.instant(day, *end)?,
            }),
            Resolved::Solar { config, sun } => {
                let times = sun.sun_times(day, config.latitude, config.longitude)?;
                let before = Duration::try_minutes(config.offset_before_sunset_minutes)?;
                let after = Duration::try_minutes(config.offset_after_sunrise_minutes)?;
                Some(DailyWindow {
                    start: times.sunset.checked_sub_signed(before)?,
                    end: times.sunrise.checked_add_signed(after)?,
                })
            }
        }
    }
}

impl Zone {
    fn instant(self, day: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        match self {
            Zone::Local => localize(&Local, day, time),
            Zone::Named(tz) => localize(&tz, day, time),
        }
    }
}

/// Map a local wall-clock time to an instant.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times inside a
/// DST gap are pushed forward by the gap's usual hour.
fn localize<Z: TimeZone>(zone: &Z, day: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    let naive = day.and_time(time);
    zone.from_local_datetime(&naive)
        .earliest()
        .or_else(|| zone.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|at| at.with_timezone(&Utc))
}
