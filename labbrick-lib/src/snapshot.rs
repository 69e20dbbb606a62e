use crate::codec::Opcode;
use crate::constants::{DEFAULT_DWELL_MS, DEFAULT_HOLD_MS, DEFAULT_IDLE_MS, MAX_TIME_MS, MIN_DWELL_MS};
use crate::model::{Family, ModelSpec};
use serde::Serialize;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize)]
pub enum Activity {
    #[default]
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RampSettings {
    /// Start, end and steps are in fine units.
    pub start: i32,
    pub end: i32,
    pub step_one: i32,
    pub step_two: i32,
    pub dwell_one: i32,
    pub dwell_two: i32,
    pub idle: i32,
    pub hold: i32,
    pub up: bool,
    pub repeat: bool,
    pub bidirectional: bool,
    pub state: Activity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSettings {
    /// Fine units; only the first `count` entries are addressable.
    pub elements: Vec<i32>,
    pub count: u16,
    pub dwell: i32,
    pub idle: i32,
    pub index: i32,
    pub state: Activity,
}

/// Last known settings of one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    /// 100 kHz units
    pub frequency: i32,
    /// Selected channel, 1-based
    pub channel: u8,
    /// Level of every channel in fine units
    pub levels: Vec<i32>,
    pub rf_on: bool,
    pub ramp: RampSettings,
    pub profile: ProfileSettings,
}

impl DeviceSnapshot {
    /// Power-on state of a unit of the given model.
    pub fn defaults(spec: &ModelSpec) -> Self {
        Self {
            frequency: spec.min_frequency,
            channel: 1,
            levels: vec![spec.min_level; spec.channels.max(1) as usize],
            rf_on: true,
            ramp: RampSettings {
                start: spec.min_level,
                end: spec.max_level,
                step_one: spec.min_step,
                step_two: spec.min_step,
                dwell_one: DEFAULT_DWELL_MS,
                dwell_two: DEFAULT_DWELL_MS,
                idle: DEFAULT_IDLE_MS,
                hold: DEFAULT_HOLD_MS,
                up: true,
                repeat: false,
                bidirectional: false,
                state: Activity::Idle,
            },
            profile: ProfileSettings {
                elements: vec![spec.min_level; spec.profile_max as usize],
                count: 0,
                dwell: DEFAULT_DWELL_MS,
                idle: DEFAULT_IDLE_MS,
                index: 0,
                state: Activity::Idle,
            },
        }
    }

    pub fn level(&self) -> i32 {
        self.channel_level(self.channel).unwrap_or_default()
    }

    pub fn channel_level(&self, channel: u8) -> Option<i32> {
        self.levels.get((channel as usize).checked_sub(1)?).copied()
    }

    pub fn set_channel_level(&mut self, channel: u8, fine: i32) {
        if let Some(slot) = (channel as usize).checked_sub(1).and_then(|i| self.levels.get_mut(i)) {
            *slot = fine;
        }
    }

    pub fn get(&self, param: Param) -> i32 {
        match param {
            Param::Frequency => self.frequency,
            Param::Level => self.level(),
            Param::RampStart => self.ramp.start,
            Param::RampEnd => self.ramp.end,
            Param::StepOne => self.ramp.step_one,
            Param::StepTwo => self.ramp.step_two,
            Param::DwellOne => self.ramp.dwell_one,
            Param::DwellTwo => self.ramp.dwell_two,
            Param::Idle => self.ramp.idle,
            Param::Hold => self.ramp.hold,
            Param::ProfileCount => self.profile.count as i32,
            Param::ProfileDwell => self.profile.dwell,
            Param::ProfileIdle => self.profile.idle,
            Param::ProfileIndex => self.profile.index,
        }
    }

    pub fn set(&mut self, param: Param, value: i32) {
        match param {
            Param::Frequency => self.frequency = value,
            Param::Level => self.set_channel_level(self.channel, value),
            Param::RampStart => self.ramp.start = value,
            Param::RampEnd => self.ramp.end = value,
            Param::StepOne => self.ramp.step_one = value,
            Param::StepTwo => self.ramp.step_two = value,
            Param::DwellOne => self.ramp.dwell_one = value,
            Param::DwellTwo => self.ramp.dwell_two = value,
            Param::Idle => self.ramp.idle = value,
            Param::Hold => self.ramp.hold = value,
            Param::ProfileCount => self.profile.count = value.clamp(0, u16::MAX as i32) as u16,
            Param::ProfileDwell => self.profile.dwell = value,
            Param::ProfileIdle => self.profile.idle = value,
            Param::ProfileIndex => self.profile.index = value,
        }
    }
}

/// Scalar settings addressable by a single opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    Frequency,
    /// Attenuation or phase angle, depending on the family.
    Level,
    RampStart,
    RampEnd,
    StepOne,
    StepTwo,
    DwellOne,
    DwellTwo,
    Idle,
    Hold,
    ProfileCount,
    ProfileDwell,
    ProfileIdle,
    ProfileIndex,
}

impl Param {
    pub fn opcode(&self, family: Family) -> Opcode {
        match self {
            Param::Frequency => Opcode::Frequency,
            Param::Level => match family {
                Family::Attenuator => Opcode::Attenuation,
                Family::PhaseShifter => Opcode::PhaseAngle,
            },
            Param::RampStart => Opcode::RampStart,
            Param::RampEnd => Opcode::RampEnd,
            Param::StepOne => Opcode::StepOne,
            Param::StepTwo => Opcode::StepTwo,
            Param::DwellOne => Opcode::DwellOne,
            Param::DwellTwo => Opcode::DwellTwo,
            Param::Idle => Opcode::Idle,
            Param::Hold => Opcode::Hold,
            Param::ProfileCount => Opcode::ProfileCount,
            Param::ProfileDwell => Opcode::ProfileDwell,
            Param::ProfileIdle => Opcode::ProfileIdle,
            Param::ProfileIndex => Opcode::ProfileIndex,
        }
    }

    pub fn name(&self, family: Family) -> &'static str {
        match self {
            Param::Frequency => "working frequency",
            Param::Level => match family {
                Family::Attenuator => "attenuation",
                Family::PhaseShifter => "phase angle",
            },
            Param::RampStart => "ramp start",
            Param::RampEnd => "ramp end",
            Param::StepOne => "ramp step",
            Param::StepTwo => "ramp step two",
            Param::DwellOne => "dwell time",
            Param::DwellTwo => "dwell time two",
            Param::Idle => "idle time",
            Param::Hold => "hold time",
            Param::ProfileCount => "profile count",
            Param::ProfileDwell => "profile dwell time",
            Param::ProfileIdle => "profile idle time",
            Param::ProfileIndex => "profile index",
        }
    }

    /// Carried in fine units and subject to accessor resolution.
    pub fn is_level_scaled(&self) -> bool {
        matches!(
            self,
            Param::Level | Param::RampStart | Param::RampEnd | Param::StepOne | Param::StepTwo
        )
    }

    pub fn is_profile(&self) -> bool {
        matches!(
            self,
            Param::ProfileCount | Param::ProfileDwell | Param::ProfileIdle | Param::ProfileIndex
        )
    }

    /// Accepted range in fine units (or ms / 100 kHz for unscaled settings).
    pub fn bounds(&self, spec: &ModelSpec) -> (i64, i64) {
        let level = (spec.min_level as i64, spec.max_level as i64);
        match self {
            Param::Frequency => (spec.min_frequency as i64, spec.max_frequency as i64),
            Param::Level | Param::RampStart | Param::RampEnd => level,
            Param::StepOne | Param::StepTwo => (spec.min_step as i64, level.1 - level.0),
            Param::DwellOne | Param::DwellTwo | Param::ProfileDwell => (MIN_DWELL_MS as i64, MAX_TIME_MS as i64),
            Param::Idle | Param::Hold | Param::ProfileIdle => (0, MAX_TIME_MS as i64),
            Param::ProfileCount => (0, spec.profile_max as i64),
            Param::ProfileIndex => (0, spec.profile_max.saturating_sub(1) as i64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceModel;

    #[test]
    fn defaults_follow_model() {
        let spec = DeviceModel::Lda602Q.spec();
        let snapshot = DeviceSnapshot::defaults(&spec);
        assert_eq!(snapshot.levels.len(), 4);
        assert_eq!(snapshot.profile.elements.len(), 1000);
        assert_eq!(snapshot.frequency, spec.min_frequency);
        assert_eq!(snapshot.ramp.end, spec.max_level);
    }

    #[test]
    fn level_follows_selected_channel() {
        let spec = DeviceModel::Lda602Q.spec();
        let mut snapshot = DeviceSnapshot::defaults(&spec);
        snapshot.set(Param::Level, 100);
        snapshot.channel = 3;
        snapshot.set(Param::Level, 300);
        assert_eq!(snapshot.channel_level(1), Some(100));
        assert_eq!(snapshot.get(Param::Level), 300);
        assert_eq!(snapshot.channel_level(5), None);
    }

    #[test]
    fn step_bounds_span_level_range() {
        let spec = DeviceModel::Lps802.spec();
        assert_eq!(Param::StepOne.bounds(&spec), (1, 360));
        assert_eq!(Param::Level.opcode(spec.family), Opcode::PhaseAngle);
        assert_eq!(Param::Level.name(Family::Attenuator), "attenuation");
    }
}
