use crate::constants::{FREQUENCY_UNIT_HZ, HR_PER_QUARTER_DB};
use crate::model::Family;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Accessor resolution for swept quantities.
///
/// Attenuation is stored once, in fine units. The standard accessors see it in
/// quarter-dB steps, the high-resolution ones in 0.05 dB steps. Phase shifters
/// only have the standard resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum Resolution {
    #[default]
    #[strum(to_string = "standard")]
    Standard,
    #[strum(to_string = "high-resolution")]
    High,
}

impl Resolution {
    /// Scale accessor units into fine units.
    pub fn to_fine(self, family: Family, value: i32) -> i64 {
        match self {
            Resolution::High => value as i64,
            Resolution::Standard => value as i64 * family.level_scale() as i64,
        }
    }

    /// Convert fine units into this accessor's units, rounding half up.
    pub fn from_fine(self, family: Family, fine: i32) -> i32 {
        match self {
            Resolution::High => fine,
            Resolution::Standard => round_div(fine, family.level_scale()),
        }
    }

    /// Widest range in accessor units whose values all fall inside the
    /// fine-unit range `min..=max`.
    pub fn range_from_fine(self, family: Family, (min, max): (i64, i64)) -> (i64, i64) {
        match self {
            Resolution::High => (min, max),
            Resolution::Standard => {
                let scale = family.level_scale() as i64;
                (-(-min).div_euclid(scale), max.div_euclid(scale))
            }
        }
    }
}

fn round_div(value: i32, divisor: i32) -> i32 {
    let divisor = divisor as i64;
    (value as i64 + divisor / 2).div_euclid(divisor) as i32
}

pub fn db_to_quarter_db(db: f64) -> i32 {
    (db * 4.0).round() as i32
}

pub fn quarter_db_to_db(quarter_db: i32) -> f64 {
    quarter_db as f64 / 4.0
}

pub fn db_to_hr(db: f64) -> i32 {
    (db * 4.0 * HR_PER_QUARTER_DB as f64).round() as i32
}

pub fn hr_to_db(hr: i32) -> f64 {
    hr as f64 / (4.0 * HR_PER_QUARTER_DB as f64)
}

/// Frequency in Hz to the 100 kHz units the devices use.
pub fn hz_to_frequency_units(hz: f64) -> i32 {
    (hz / FREQUENCY_UNIT_HZ as f64).round() as i32
}

pub fn frequency_units_to_hz(units: i32) -> f64 {
    units as f64 * FREQUENCY_UNIT_HZ as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_to_fine_is_exact() {
        assert_eq!(Resolution::Standard.to_fine(Family::Attenuator, 40), 200);
        assert_eq!(Resolution::High.to_fine(Family::Attenuator, 53), 53);
        assert_eq!(Resolution::Standard.to_fine(Family::PhaseShifter, 90), 90);
    }

    #[test]
    fn fine_to_standard_rounds() {
        // 2.65 dB -> 2.75 dB, 2.60 dB -> 2.50 dB
        assert_eq!(Resolution::Standard.from_fine(Family::Attenuator, 53), 11);
        assert_eq!(Resolution::Standard.from_fine(Family::Attenuator, 52), 10);
        assert_eq!(Resolution::Standard.from_fine(Family::Attenuator, 50), 10);
        assert_eq!(Resolution::Standard.from_fine(Family::Attenuator, 0), 0);
    }

    #[test]
    fn fine_to_standard_near_limits() {
        assert_eq!(Resolution::Standard.from_fine(Family::Attenuator, i32::MAX), 429_496_729);
        assert_eq!(Resolution::Standard.from_fine(Family::Attenuator, i32::MIN), -429_496_730);
    }

    #[test]
    fn ranges_stay_inside_fine_limits() {
        // 0.1 dB minimum step is one quarter dB at standard resolution
        assert_eq!(Resolution::Standard.range_from_fine(Family::Attenuator, (2, 2400)), (1, 480));
        assert_eq!(Resolution::Standard.range_from_fine(Family::Attenuator, (3, 2403)), (1, 480));
        assert_eq!(Resolution::Standard.range_from_fine(Family::Attenuator, (-3, -1)), (0, -1));
        assert_eq!(Resolution::High.range_from_fine(Family::Attenuator, (2, 2400)), (2, 2400));
        assert_eq!(Resolution::Standard.range_from_fine(Family::PhaseShifter, (1, 360)), (1, 360));
    }

    #[test]
    fn db_helpers() {
        assert_eq!(db_to_quarter_db(10.0), 40);
        assert_eq!(db_to_hr(10.0), 200);
        assert_eq!(quarter_db_to_db(41), 10.25);
        assert_eq!(hr_to_db(201), 10.05);
        assert_eq!(hz_to_frequency_units(5.6e9), 56_000);
        assert_eq!(frequency_units_to_hz(56_000), 5.6e9);
    }
}
