//! Sunrise/sunset calculation.
//!
//! The clock only depends on [`SunCalculator`]; [`SolarCalculator`] is the
//! default implementation, using the low-precision NOAA / SunCalc formulas
//! (accurate to a minute or two, which is plenty for a calm window).

use std::f64::consts::PI;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

/// Sunrise and sunset for one solar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SunTimes {
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
}

/// Deterministic per calendar day and location.
///
/// Returns `None` when the sun does not rise or set that day (polar day or
/// night); the schedule then has no window until the data changes.
pub trait SunCalculator: Send + Sync {
    fn sun_times(&self, date: NaiveDate, latitude: f64, longitude: f64) -> Option<SunTimes>;
}

/// NOAA-style solar position calculator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolarCalculator;

const RAD: f64 = PI / 180.0;
const J1970: f64 = 2_440_588.0;
const J2000: f64 = 2_451_545.0;
const J0: f64 = 0.0009;
const MS_PER_DAY: f64 = 86_400_000.0;
/// Sun altitude at apparent sunrise/sunset (refraction + solar radius).
const SUNRISE_ALTITUDE_DEG: f64 = -0.833;
/// Obliquity of the ecliptic.
const OBLIQUITY: f64 = RAD * 23.4397;

impl SunCalculator for SolarCalculator {
    fn sun_times(&self, date: NaiveDate, latitude: f64, longitude: f64) -> Option<SunTimes> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return None;
        }

        // Local mean solar noon of `date`, expressed in days since J2000.
        let noon = date.and_hms_opt(12, 0, 0)?.and_utc()
            - Duration::milliseconds((longitude / 15.0 * 3_600_000.0) as i64);
        let d = to_days(noon);

        let lw = -longitude * RAD;
        let phi = latitude * RAD;

        let n = (d - J0 - lw / (2.0 * PI)).round();
        let ds = approx_transit(0.0, lw, n);
        let m = solar_mean_anomaly(ds);
        let l = ecliptic_longitude(m);
        let dec = declination(l);
        let j_noon = solar_transit(ds, m, l);

        let cos_h = ((SUNRISE_ALTITUDE_DEG * RAD).sin() - phi.sin() * dec.sin())
            / (phi.cos() * dec.cos());
        if !(-1.0..=1.0).contains(&cos_h) {
            return None;
        }
        let h = cos_h.acos();

        let j_set = solar_transit(approx_transit(h, lw, n), m, l);
        let j_rise = j_noon - (j_set - j_noon);

        Some(SunTimes {
            sunrise: from_julian(j_rise)?,
            sunset: from_julian(j_set)?,
        })
    }
}

fn to_days(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / MS_PER_DAY - 0.5 + J1970 - J2000
}

fn from_julian(j: f64) -> Option<DateTime<Utc>> {
    let ms = (j + 0.5 - J1970) * MS_PER_DAY;
    if !ms.is_finite() {
        return None;
    }
    Utc.timestamp_millis_opt(ms.round() as i64).single()
}

fn solar_mean_anomaly(d: f64) -> f64 {
    RAD * (357.5291 + 0.985_600_28 * d)
}

fn ecliptic_longitude(m: f64) -> f64 {
    let center = RAD * (1.9148 * m.sin() + 0.02 * (2.0 * m).sin() + 0.0003 * (3.0 * m).sin());
    let perihelion = RAD * 102.9372;
    m + center + perihelion + PI
}

fn declination(l: f64) -> f64 {
    (OBLIQUITY.sin() * l.sin()).asin()
}

fn approx_transit(ht: f64, lw: f64, n: f64) -> f64 {
    J0 + (ht + lw) / (2.0 * PI) + n
}

fn solar_transit(ds: f64, m: f64, l: f64) -> f64 {
    J2000 + ds + 0.0053 * m.sin() - 0.0069 * (2.0 * l).sin()
}
