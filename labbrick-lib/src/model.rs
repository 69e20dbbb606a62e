//! Static model table for supported Lab Brick units.
//!
//! Every quantity is kept in the units the device protocol uses: frequencies in
//! 100 kHz steps, levels in fine units (0.05 dB for attenuators, 1 degree for
//! phase shifters), times in milliseconds.

use crate::constants::{HR_PER_QUARTER_DB, PROFILE_MAX, PROFILE_MAX_LONG};
use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;
use strum_macros::Display;

/// The two device families sharing the Lab Brick command model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
pub enum Family {
    #[strum(to_string = "LDA attenuator")]
    Attenuator,
    #[strum(to_string = "LPS phase shifter")]
    PhaseShifter,
}

impl Family {
    /// Fine units per standard accessor unit.
    pub fn level_scale(&self) -> i32 {
        match self {
            Family::Attenuator => HR_PER_QUARTER_DB,
            Family::PhaseShifter => 1,
        }
    }
}

bitflags! {
    /// Capability flags reported by `features()`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
    pub struct Features: u16 {
        const HAS_BIDIR_RAMPS = 0x01;
        const HAS_PROFILES = 0x02;
        const HAS_HIRES = 0x04;
        const HAS_4CHANNELS = 0x08;
        const HAS_8CHANNELS = 0x10;
        const HAS_LONG_PROFILE = 0x20;
    }
}

/// Supported models, keyed by USB product id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum DeviceModel {
    #[strum(to_string = "LDA-102")]
    Lda102 = 0x1207,
    #[strum(to_string = "LDA-602")]
    Lda602 = 0x1208,
    #[strum(to_string = "LDA-602Q")]
    Lda602Q = 0x1214,
    #[strum(to_string = "LPS-802")]
    Lps802 = 0x1220,
    #[strum(to_string = "LPS-123")]
    Lps123 = 0x1221,
    #[strum(to_string = "LPS-402")]
    Lps402 = 0x1222,
}

/// Static capabilities of one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    pub name: &'static str,
    pub family: Family,
    pub min_frequency: i32,
    pub max_frequency: i32,
    pub min_level: i32,
    pub max_level: i32,
    pub min_step: i32,
    pub channels: u8,
    pub features: Features,
    pub profile_max: u16,
}

const ATTEN_FEATURES: Features = Features::HAS_BIDIR_RAMPS.union(Features::HAS_PROFILES);
const ATTEN_HR_FEATURES: Features = ATTEN_FEATURES
    .union(Features::HAS_HIRES)
    .union(Features::HAS_LONG_PROFILE);
const PHASE_FEATURES: Features = Features::HAS_BIDIR_RAMPS.union(Features::HAS_PROFILES);

impl DeviceModel {
    pub const ALL: [DeviceModel; 6] = [
        DeviceModel::Lda102,
        DeviceModel::Lda602,
        DeviceModel::Lda602Q,
        DeviceModel::Lps802,
        DeviceModel::Lps123,
        DeviceModel::Lps402,
    ];

    pub fn product_id(&self) -> u16 {
        (*self).into()
    }

    pub fn from_product_id(pid: u16) -> Option<Self> {
        DeviceModel::try_from(pid).ok()
    }

    pub fn spec(&self) -> ModelSpec {
        match self {
            // 10 MHz - 6 GHz, 0 - 63 dB in 0.5 dB steps
            DeviceModel::Lda102 => ModelSpec {
                name: "LDA-102",
                family: Family::Attenuator,
                min_frequency: 100,
                max_frequency: 60_000,
                min_level: 0,
                max_level: 63 * 4 * HR_PER_QUARTER_DB,
                min_step: 2 * HR_PER_QUARTER_DB,
                channels: 1,
                features: ATTEN_FEATURES,
                profile_max: PROFILE_MAX,
            },
            // 10 MHz - 6 GHz, 0 - 120 dB in 0.1 dB steps
            DeviceModel::Lda602 => ModelSpec {
                name: "LDA-602",
                family: Family::Attenuator,
                min_frequency: 100,
                max_frequency: 60_000,
                min_level: 0,
                max_level: 120 * 4 * HR_PER_QUARTER_DB,
                min_step: 2,
                channels: 1,
                features: ATTEN_HR_FEATURES,
                profile_max: PROFILE_MAX_LONG,
            },
            DeviceModel::Lda602Q => ModelSpec {
                name: "LDA-602Q",
                family: Family::Attenuator,
                min_frequency: 100,
                max_frequency: 60_000,
                min_level: 0,
                max_level: 120 * 4 * HR_PER_QUARTER_DB,
                min_step: 2,
                channels: 4,
                features: ATTEN_HR_FEATURES.union(Features::HAS_4CHANNELS),
                profile_max: PROFILE_MAX_LONG,
            },
            // 4 - 8 GHz
            DeviceModel::Lps802 => ModelSpec {
                name: "LPS-802",
                family: Family::PhaseShifter,
                min_frequency: 40_000,
                max_frequency: 80_000,
                min_level: 0,
                max_level: 360,
                min_step: 1,
                channels: 1,
                features: PHASE_FEATURES,
                profile_max: PROFILE_MAX,
            },
            // 8 - 12 GHz
            DeviceModel::Lps123 => ModelSpec {
                name: "LPS-123",
                family: Family::PhaseShifter,
                min_frequency: 80_000,
                max_frequency: 120_000,
                min_level: 0,
                max_level: 360,
                min_step: 1,
                channels: 1,
                features: PHASE_FEATURES,
                profile_max: PROFILE_MAX,
            },
            // 2 - 4 GHz
            DeviceModel::Lps402 => ModelSpec {
                name: "LPS-402",
                family: Family::PhaseShifter,
                min_frequency: 20_000,
                max_frequency: 40_000,
                min_level: 0,
                max_level: 360,
                min_step: 1,
                channels: 1,
                features: PHASE_FEATURES,
                profile_max: PROFILE_MAX,
            },
        }
    }

    pub fn family(&self) -> Family {
        self.spec().family
    }
}
