//! Cone search geometry on the celestial sphere.

use crate::error::{Error, Result};

/// Slack added to the radius so that `radius = 0` still matches an exact
/// coordinate hit after floating point round-off.
pub const ANGLE_EPSILON_DEG: f64 = 1e-9;

/// Great-circle separation in degrees between two (ra, dec) positions given in
/// degrees. Haversine form: exact zero for identical points, stable for small
/// angles, and indifferent to the RA seam at 0/360 and to the poles.
pub fn angular_separation(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let (dec1, dec2) = (dec1.to_radians(), dec2.to_radians());
    let d_dec = dec2 - dec1;
    let d_ra = (ra2 - ra1).to_radians();

    let h = (d_dec / 2.0).sin().powi(2) + dec1.cos() * dec2.cos() * (d_ra / 2.0).sin().powi(2);
    let h = h.clamp(0.0, 1.0);
    (2.0 * h.sqrt().asin()).to_degrees()
}

/// A validated cone: center (ra, dec) and angular radius, all in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConeSearch {
    pub ra: f64,
    pub dec: f64,
    pub radius: f64,
}

impl ConeSearch {
    pub fn new(ra: f64, dec: f64, radius: f64) -> Result<Self> {
        if !ra.is_finite() || !(0.0..360.0).contains(&ra) {
            return Err(Error::validation("ra", format!("{} is outside [0, 360)", ra)));
        }
        if !dec.is_finite() || !(-90.0..=90.0).contains(&dec) {
            return Err(Error::validation("dec", format!("{} is outside [-90, 90]", dec)));
        }
        if !radius.is_finite() || !(0.0..=180.0).contains(&radius) {
            return Err(Error::validation("radius", format!("{} is outside [0, 180]", radius)));
        }
        Ok(Self { ra, dec, radius })
    }

    pub fn contains(&self, ra: f64, dec: f64) -> bool {
        angular_separation(self.ra, self.dec, ra, dec) <= self.radius + ANGLE_EPSILON_DEG
    }

    /// Declination band that encloses the cone, used as an index prefilter.
    /// RA is not bounded because the band wraps around the seam and the poles.
    pub fn dec_band(&self) -> (f64, f64) {
        let slack = self.radius + ANGLE_EPSILON_DEG;
        ((self.dec - slack).max(-90.0), (self.dec + slack).min(90.0))
    }
}
