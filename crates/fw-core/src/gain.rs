//! Gain conversions between decibels and linear amplitude

use crate::Sample;

/// Decibel value wrapper
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Decibels(pub f64);

impl Decibels {
    pub const ZERO: Self = Self(0.0);
    pub const NEG_INF: Self = Self(f64::NEG_INFINITY);

    #[inline]
    pub fn to_amplitude(self) -> Sample {
        db_to_amplitude(self.0)
    }

    #[inline]
    pub fn from_amplitude(amp: Sample) -> Self {
        Self(amplitude_to_db(amp))
    }
}

/// Convert decibels to linear amplitude.
///
/// Monotonic over the whole fader range: `-inf dB` maps to exactly `0.0`
/// and `0 dB` maps to exactly `1.0`.
#[inline]
pub fn db_to_amplitude(db: f64) -> Sample {
    if db == f64::NEG_INFINITY {
        0.0
    } else {
        10.0_f64.powf(db / 20.0)
    }
}

/// Convert linear amplitude to decibels (`0.0` maps to `-inf dB`).
#[inline]
pub fn amplitude_to_db(amp: Sample) -> f64 {
    if amp > 0.0 {
        20.0 * amp.log10()
    } else {
        f64::NEG_INFINITY
    }
}
