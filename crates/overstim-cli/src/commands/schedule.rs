use clap::Subcommand;
use overstim_core::schedule::SolarSchedule;
use overstim_core::{Request, ScheduleConfig};

use super::{open_host, print_json, send, CliResult};

#[derive(Subcommand)]
pub enum ScheduleAction {
    /// Show the current schedule
    Show,
    /// Calm mode between two clock times, e.g. `22:00 07:00`
    Fixed {
        /// Start time (HH:mm)
        start: String,
        /// End time (HH:mm)
        end: String,
        /// IANA timezone, e.g. "Europe/Berlin"; local time when omitted
        #[arg(long)]
        timezone: Option<String>,
    },
    /// Calm mode from sunset to sunrise at a location
    Solar {
        #[arg(allow_negative_numbers = true)]
        latitude: f64,
        #[arg(allow_negative_numbers = true)]
        longitude: f64,
        /// Start this many minutes before sunset
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        before_sunset: i64,
        /// End this many minutes after sunrise
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        after_sunrise: i64,
    },
    /// Set schedule from a JSON string
    Set {
        /// JSON schedule, e.g. {"type":"fixed","sleep_start":"23:00","sleep_end":"06:30"}
        json: String,
    },
    /// Reset to the default 22:00-07:00 window
    Reset,
}

pub fn run(action: ScheduleAction) -> CliResult {
    let host = open_host()?;
    let schedule = match action {
        ScheduleAction::Show => return print_json(&host.settings().schedule),
        ScheduleAction::Fixed {
            start,
            end,
            timezone,
        } => match timezone {
            Some(tz) => ScheduleConfig::fixed_in(start, end, tz),
            None => ScheduleConfig::fixed(start, end),
        },
        ScheduleAction::Solar {
            latitude,
            longitude,
            before_sunset,
            after_sunrise,
        } => ScheduleConfig::SunsetSunrise(SolarSchedule {
            latitude,
            longitude,
            offset_before_sunset_minutes: before_sunset,
            offset_after_sunrise_minutes: after_sunrise,
        }),
        ScheduleAction::Set { json } => serde_json::from_str(&json)?,
        ScheduleAction::Reset => ScheduleConfig::default(),
    };

    let summary = describe(&schedule);
    send(&host, Request::UpdateSchedule { schedule })?;
    println!("schedule updated: {summary}");
    Ok(())
}

/// One-line summary of a schedule.
pub fn describe(schedule: &ScheduleConfig) -> String {
    match schedule {
        ScheduleConfig::Fixed(fixed) => {
            let zone = fixed.timezone.as_deref().unwrap_or("local time");
            format!("{} to {} ({zone})", fixed.sleep_start, fixed.sleep_end)
        }
        ScheduleConfig::SunsetSunrise(solar) => {
            let mut text = format!(
                "sunset to sunrise at {:.4}, {:.4}",
                solar.latitude, solar.longitude
            );
            if solar.offset_before_sunset_minutes != 0 || solar.offset_after_sunrise_minutes != 0
            {
                text.push_str(&format!(
                    " ({:+}m / {:+}m)",
                    solar.offset_before_sunset_minutes.saturating_neg(),
                    solar.offset_after_sunrise_minutes
                ));
            }
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solar(before: i64, after: i64) -> ScheduleConfig {
        ScheduleConfig::SunsetSunrise(SolarSchedule {
            latitude: 52.52,
            longitude: 13.405,
            offset_before_sunset_minutes: before,
            offset_after_sunrise_minutes: after,
        })
    }

    #[test]
    fn describe_signs_offsets_relative_to_the_sun() {
        assert_eq!(
            describe(&solar(30, 45)),
            "sunset to sunrise at 52.5200, 13.4050 (-30m / +45m)"
        );
        assert_eq!(
            describe(&solar(-30, -15)),
            "sunset to sunrise at 52.5200, 13.4050 (+30m / -15m)"
        );
        assert_eq!(
            describe(&solar(0, 0)),
            "sunset to sunrise at 52.5200, 13.4050"
        );
    }

    #[test]
    fn describe_fixed_names_the_zone() {
        assert_eq!(
            describe(&ScheduleConfig::fixed("22:00", "07:00")),
            "22:00 to 07:00 (local time)"
        );
    }
}
