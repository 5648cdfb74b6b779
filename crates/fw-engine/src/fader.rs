//! Fader gain stage and pan law

use std::sync::atomic::{AtomicU64, Ordering};

use fw_core::{db_to_amplitude, Sample};

/// Highest fader position in dB
pub const MAX_FADER_DB: f64 = 12.0;

/// Volume fader with the gain stored in dB (f64 bits in an atomic, so the
/// UI thread can move it while audio runs).
#[derive(Debug)]
pub struct Fader {
    gain_db: AtomicU64,
}

impl Fader {
    /// Create a fader at the given dB position (0.0 = unity)
    pub fn new(db: f64) -> Self {
        Self {
            gain_db: AtomicU64::new(clamp_db(db).to_bits()),
        }
    }

    pub fn gain_db(&self) -> f64 {
        f64::from_bits(self.gain_db.load(Ordering::Relaxed))
    }

    pub fn set_gain_db(&self, db: f64) {
        self.gain_db.store(clamp_db(db).to_bits(), Ordering::Relaxed);
    }

    /// Linear amplitude for the current position: `-inf dB` is exactly 0.0,
    /// `0 dB` exactly unity, monotonic in between.
    #[inline]
    pub fn amp(&self) -> Sample {
        db_to_amplitude(self.gain_db())
    }
}

impl Default for Fader {
    fn default() -> Self {
        Self::new(0.0)
    }
}

// A corrupt (NaN) value degrades to silence, never to full volume.
#[inline]
fn clamp_db(db: f64) -> f64 {
    if db.is_nan() {
        f64::NEG_INFINITY
    } else {
        db.min(MAX_FADER_DB)
    }
}

/// Constant-power pan law: `pan` in [-1, 1], centre gives equal gains on
/// both sides (cos/sin over the quarter circle).
#[inline]
pub fn pan_gains(pan: f64) -> (Sample, Sample) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * 0.25 * std::f64::consts::PI;
    (angle.cos(), angle.sin())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_1_SQRT_2;

    #[test]
    fn test_unity_and_silence() {
        let fader = Fader::default();
        assert_eq!(fader.amp(), 1.0);

        fader.set_gain_db(f64::NEG_INFINITY);
        assert_eq!(fader.amp(), 0.0);
    }

    #[test]
    fn test_clamped_to_max() {
        let fader = Fader::new(40.0);
        assert_eq!(fader.gain_db(), MAX_FADER_DB);
    }

    #[test]
    fn test_nan_degrades_to_silence() {
        let fader = Fader::new(f64::NAN);
        assert_eq!(fader.amp(), 0.0);

        let fader = Fader::default();
        fader.set_gain_db(f64::NAN);
        assert_eq!(fader.amp(), 0.0);
    }

    #[test]
    fn test_pan_centre_equal_power() {
        let (l, r) = pan_gains(0.0);
        assert!((l - FRAC_1_SQRT_2).abs() < 1e-12);
        assert!((r - FRAC_1_SQRT_2).abs() < 1e-12);
    }

    #[test]
    fn test_pan_extremes() {
        let (l, r) = pan_gains(-1.0);
        assert!((l - 1.0).abs() < 1e-12);
        assert!(r.abs() < 1e-12);

        let (l, r) = pan_gains(1.0);
        assert!(l.abs() < 1e-12);
        assert!((r - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_pan_constant_power() {
        for pan in [-0.8, -0.3, 0.0, 0.5, 0.9] {
            let (l, r) = pan_gains(pan);
            assert!((l * l + r * r - 1.0).abs() < 1e-12);
        }
    }
}
