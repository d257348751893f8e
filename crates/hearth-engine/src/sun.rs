//! Solar event computation
//!
//! Sunrise/sunset times from the NOAA sunrise equation for a configured
//! latitude/longitude. At polar latitudes the sun can stay up (or down)
//! all day; those days yield `None` and sun triggers simply do not fire.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use hearth_automation::SunEvent;

/// Zenith for official sunrise/sunset, including refraction
const ZENITH_DEG: f64 = 90.833;

/// Geographic position of the installation
#[derive(Debug, Clone, Copy)]
pub struct Location {
    /// Latitude in degrees, north positive
    pub latitude: f64,
    /// Longitude in degrees, east positive
    pub longitude: f64,
    /// Observer elevation above sea level in metres
    pub elevation_m: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            elevation_m: 0.0,
        }
    }

    pub fn with_elevation(mut self, elevation_m: f64) -> Self {
        self.elevation_m = elevation_m;
        self
    }

    /// Effective zenith angle, with horizon dip for an elevated observer
    fn zenith_deg(&self) -> f64 {
        if self.elevation_m > 0.0 {
            ZENITH_DEG + 2.076 * self.elevation_m.sqrt() / 60.0
        } else {
            ZENITH_DEG
        }
    }

    /// UTC time of a sun event on the given date, `None` when the sun
    /// never crosses the horizon that day.
    pub fn sun_event(&self, date: NaiveDate, event: SunEvent) -> Option<DateTime<Utc>> {
        let n = date.ordinal() as f64;
        let lng_hour = self.longitude / 15.0;

        let t = match event {
            SunEvent::Sunrise => n + ((6.0 - lng_hour) / 24.0),
            SunEvent::Sunset => n + ((18.0 - lng_hour) / 24.0),
        };

        // Sun's mean anomaly and true longitude
        let m = 0.9856 * t - 3.289;
        let l = normalize_degrees(
            m + 1.916 * m.to_radians().sin() + 0.020 * (2.0 * m).to_radians().sin() + 282.634,
        );

        // Right ascension, shifted into the same quadrant as L
        let mut ra = normalize_degrees((0.91764 * l.to_radians().tan()).atan().to_degrees());
        let l_quadrant = (l / 90.0).floor() * 90.0;
        let ra_quadrant = (ra / 90.0).floor() * 90.0;
        ra = (ra + (l_quadrant - ra_quadrant)) / 15.0;

        // Declination
        let sin_dec = 0.39782 * l.to_radians().sin();
        let cos_dec = sin_dec.asin().cos();

        // Local hour angle
        let cos_h = (self.zenith_deg().to_radians().cos()
            - sin_dec * self.latitude.to_radians().sin())
            / (cos_dec * self.latitude.to_radians().cos());

        if !(-1.0..=1.0).contains(&cos_h) {
            // Polar day or polar night
            return None;
        }

        let h = match event {
            SunEvent::Sunrise => (360.0 - cos_h.acos().to_degrees()) / 15.0,
            SunEvent::Sunset => cos_h.acos().to_degrees() / 15.0,
        };

        // Local mean time, then UTC
        let local_t = h + ra - 0.06571 * t - 6.622;
        let ut = (local_t - lng_hour).rem_euclid(24.0);

        let secs = (ut * 3600.0).round() as u32;
        let midnight = date.and_hms_opt(0, 0, 0)?;
        let when = midnight + chrono::Duration::seconds(secs as i64);
        Some(Utc.from_utc_datetime(&when))
    }
}

fn normalize_degrees(value: f64) -> f64 {
    value.rem_euclid(360.0)
}
