//! Calm-period schedule definitions.
//!
//! A schedule describes the daily window during which calm mode is active.
//! Two strategies exist:
//!
//! - **Fixed**: wall-clock `HH:mm` bounds, optionally in a named IANA zone
//! - **Sunset/sunrise**: bounds derived from the sun at a given location
//!
//! Switching strategy replaces the whole config; fields never merge across
//! variants.

mod solar;
mod window;

pub use solar::{SolarCalculator, SunCalculator, SunTimes};
pub use window::{evaluate, in_window, next_transition, DailyWindow, WindowEvaluation};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Largest accepted sunset/sunrise offset, in minutes.
pub const MAX_SOLAR_OFFSET_MINUTES: i64 = 12 * 60;

/// Active schedule configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ScheduleConfig {
    Fixed(FixedSchedule),
    SunsetSunrise(SolarSchedule),
}

/// Fixed clock-time window, e.g. 22:00 to 07:00.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedSchedule {
    /// `HH:mm` at which calm mode starts (inclusive).
    pub sleep_start: String,
    /// `HH:mm` at which calm mode ends (exclusive).
    pub sleep_end: String,
    /// IANA zone name; the host's local zone when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// Window running from (sunset - offset) to (sunrise + offset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarSchedule {
    pub latitude: f64,
    pub longitude: f64,
    /// Minutes before sunset at which calm mode starts.
    #[serde(default)]
    pub offset_before_sunset_minutes: i64,
    /// Minutes after sunrise at which calm mode ends.
    #[serde(default)]
    pub offset_after_sunrise_minutes: i64,
}

impl ScheduleConfig {
    /// Fixed window without an explicit timezone.
    pub fn fixed(sleep_start: impl Into<String>, sleep_end: impl Into<String>) -> Self {
        ScheduleConfig::Fixed(FixedSchedule {
            sleep_start: sleep_start.into(),
            sleep_end: sleep_end.into(),
            timezone: None,
        })
    }

    /// Fixed window in a named timezone.
    pub fn fixed_in(
        sleep_start: impl Into<String>,
        sleep_end: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Self {
        ScheduleConfig::Fixed(FixedSchedule {
            sleep_start: sleep_start.into(),
            sleep_end: sleep_end.into(),
            timezone: Some(timezone.into()),
        })
    }

    /// Sunset-to-sunrise window with no offsets.
    pub fn sunset_sunrise(latitude: f64, longitude: f64) -> Self {
        ScheduleConfig::SunsetSunrise(SolarSchedule {
            latitude,
            longitude,
            offset_before_sunset_minutes: 0,
            offset_after_sunrise_minutes: 0,
        })
    }

    /// Short name of the strategy, as used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleConfig::Fixed(_) => "fixed",
            ScheduleConfig::SunsetSunrise(_) => "sunset-sunrise",
        }
    }

    /// Check the config before it is handed to the clock.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: malformed times, an empty window,
    /// an unknown timezone, or coordinates/offsets out of range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ScheduleConfig::Fixed(fixed) => {
                let start = parse_clock_time("sleep_start", &fixed.sleep_start)?;
                let end = parse_clock_time("sleep_end", &fixed.sleep_end)?;
                if start == end {
                    return Err(ValidationError::EmptyWindow(fixed.sleep_start.clone()));
                }
                if let Some(tz) = &fixed.timezone {
                    tz.parse::<chrono_tz::Tz>()
                        .map_err(|_| ValidationError::UnknownTimezone(tz.clone()))?;
                }
                Ok(())
            }
            ScheduleConfig::SunsetSunrise(solar) => {
                check_range("latitude", solar.latitude, -90.0, 90.0)?;
                check_range("longitude", solar.longitude, -180.0, 180.0)?;
                let max = MAX_SOLAR_OFFSET_MINUTES as f64;
                check_range(
                    "offset_before_sunset_minutes",
                    solar.offset_before_sunset_minutes as f64,
                    -max,
                    max,
                )?;
                check_range(
                    "offset_after_sunrise_minutes",
                    solar.offset_after_sunrise_minutes as f64,
                    -max,
                    max,
                )
            }
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig::fixed("22:00", "07:00")
    }
}

/// Parse an `HH:mm` string.
pub fn parse_clock_time(field: &str, value: &str) -> Result<NaiveTime, ValidationError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| ValidationError::InvalidTime {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn check_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_is_ten_to_seven() {
        assert_eq!(ScheduleConfig::default(), ScheduleConfig::fixed("22:00", "07:00"));
    }

    #[test]
    fn validate_accepts_well_formed_configs() {
        assert!(ScheduleConfig::fixed("22:00", "07:00").validate().is_ok());
        assert!(ScheduleConfig::fixed_in("13:00", "14:00", "Europe/Berlin")
            .validate()
            .is_ok());
        assert!(ScheduleConfig::sunset_sunrise(52.52, 13.40).validate().is_ok());
    }

    #[test]
    fn validate_rejects_malformed_time() {
        let err = ScheduleConfig::fixed("25:00", "07:00").validate().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTime { ref field, .. } if field == "sleep_start"));

        let err = ScheduleConfig::fixed("22:00", "seven").validate().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTime { ref field, .. } if field == "sleep_end"));
    }

    #[test]
    fn validate_rejects_empty_window() {
        let err = ScheduleConfig::fixed("06:30", "06:30").validate().unwrap_err();
        assert_eq!(err, ValidationError::EmptyWindow("06:30".to_string()));
    }

    #[test]
    fn validate_rejects_unknown_timezone() {
        let err = ScheduleConfig::fixed_in("22:00", "07:00", "Mars/Olympus")
            .validate()
            .unwrap_err();
        assert_eq!(err, ValidationError::UnknownTimezone("Mars/Olympus".to_string()));
    }

    #[test]
    fn validate_rejects_out_of_range_coordinates() {
        assert!(ScheduleConfig::sunset_sunrise(91.0, 0.0).validate().is_err());
        assert!(ScheduleConfig::sunset_sunrise(0.0, -180.5).validate().is_err());
        assert!(ScheduleConfig::sunset_sunrise(f64::NAN, 0.0).validate().is_err());
    }

    #[test]
    fn schedule_serializes_with_type_tag() {
        let json = serde_json::to_value(ScheduleConfig::fixed("22:00", "07:00")).unwrap();
        assert_eq!(json["type"], "fixed");
        assert_eq!(json["sleep_start"], "22:00");
        assert!(json.get("timezone").is_none());

        let solar: ScheduleConfig = serde_json::from_str(
            r#"{"type":"sunset-sunrise","latitude":48.1,"longitude":11.6}"#,
        )
        .unwrap();
        match solar {
            ScheduleConfig::SunsetSunrise(s) => {
                assert_eq!(s.offset_before_sunset_minutes, 0);
                assert_eq!(s.offset_after_sunrise_minutes, 0);
            }
            other => panic!("expected solar schedule, got {other:?}"),
        }
    }
}
