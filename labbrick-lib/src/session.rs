//! Per-unit session: lifecycle, validation and the cached settings snapshot.
//!
//! A session owns at most one open `Link`. Setters validate before anything
//! is sent and only touch the cache after the unit acknowledged the exact
//! request. Getters query the unit for opcodes it answers live and fall back
//! to the cache otherwise.

use crate::codec::{Command, Opcode, ProfileMode, Reply};
use crate::config::TraceLevel;
use crate::error::{LabBrickError, Result};
use crate::manager::DeviceId;
use crate::model::{Family, Features, ModelSpec};
use crate::snapshot::{Activity, DeviceSnapshot, Param};
use crate::status::{DeviceStatus, RampFlags};
use crate::transport::{Backend, DeviceDescriptor, Link};
use crate::units::Resolution;
use serde::Serialize;
use std::io;
use std::time::Duration;
use strum_macros::Display;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum HandleState {
    #[strum(to_string = "uninitialized")]
    Uninitialized,
    #[strum(to_string = "open")]
    Open,
    #[strum(to_string = "closed")]
    Closed,
}

/// Send one command and decode the reply.
async fn exchange(link: &mut Link, command: Command, limit: Duration) -> Result<Reply> {
    let request = command.to_frame();
    debug!(?command, "Request");
    let frame = link.transact(&request, limit).await?;
    let reply = command.parse_reply(&request, &frame)?;
    debug!(?reply, "Reply");
    Ok(reply)
}

fn expect_value(reply: Reply) -> Result<i32> {
    match reply {
        Reply::Value(value) => Ok(value),
        other => Err(LabBrickError::Protocol(format!("expected a value reply, got {:?}", other))),
    }
}

pub struct Session {
    id: DeviceId,
    descriptor: DeviceDescriptor,
    spec: ModelSpec,
    state: HandleState,
    link: Option<Link>,
    degraded: bool,
    snapshot: DeviceSnapshot,
    timeout: Duration,
}

impl Session {
    pub(crate) fn new(id: DeviceId, descriptor: DeviceDescriptor, timeout: Duration) -> Self {
        let spec = descriptor.model.spec();
        Self {
            id,
            descriptor,
            spec,
            state: HandleState::Uninitialized,
            link: None,
            degraded: false,
            snapshot: DeviceSnapshot::defaults(&spec),
            timeout,
        }
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    fn invalid_state(&self) -> LabBrickError {
        LabBrickError::InvalidState {
            device: self.id,
            state: self.state,
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state != HandleState::Open {
            return Err(self.invalid_state());
        }
        if self.degraded {
            return Err(LabBrickError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("device {} is degraded after a transport failure; re-open it", self.id),
            )));
        }
        Ok(())
    }

    fn not_supported(&self, operation: &'static str) -> LabBrickError {
        LabBrickError::NotSupported {
            operation,
            model: self.spec.name,
        }
    }

    fn require_family(&self, family: Family, operation: &'static str) -> Result<()> {
        if self.spec.family != family {
            return Err(self.not_supported(operation));
        }
        Ok(())
    }

    fn require_feature(&self, feature: Features, operation: &'static str) -> Result<()> {
        if !self.spec.features.contains(feature) {
            return Err(self.not_supported(operation));
        }
        Ok(())
    }

    fn check_access(&self, param: Param, resolution: Resolution) -> Result<()> {
        if resolution == Resolution::High {
            if !param.is_level_scaled() || self.spec.family != Family::Attenuator {
                return Err(self.not_supported("high-resolution access"));
            }
            self.require_feature(Features::HAS_HIRES, "high-resolution access")?;
        }
        if param.is_profile() {
            self.require_feature(Features::HAS_PROFILES, "profiles")?;
        }
        Ok(())
    }

    /// Send a command over the open link, degrading the handle on transport failure.
    async fn send(&mut self, command: Command) -> Result<Reply> {
        self.ensure_ready()?;
        let link = self.link.as_mut().ok_or_else(|| LabBrickError::InvalidState {
            device: self.id,
            state: self.state,
        })?;
        match exchange(link, command, self.timeout).await {
            Err(e) if e.degrades_handle() => {
                warn!("Device {} degraded: {}", self.id, e);
                self.degraded = true;
                Err(e)
            }
            Err(e @ LabBrickError::Nak { .. }) => {
                warn!("Device {} {}", self.id, e);
                Err(e)
            }
            other => other,
        }
    }

    /// Convert an accessor value into fine units and check it against `bounds`.
    fn validate(&self, param: Param, resolution: Resolution, value: i32, bounds: (i64, i64)) -> Result<i32> {
        let family = self.spec.family;
        let fine = if param.is_level_scaled() {
            resolution.to_fine(family, value)
        } else {
            value as i64
        };
        let (min, max) = bounds;
        if fine < min || fine > max {
            let (min, max) = self.accessor_range(param, resolution, bounds);
            return Err(LabBrickError::out_of_range(param.name(family), value, min, max));
        }
        Ok(fine as i32)
    }

    /// Fine-unit `bounds` as seen through the accessor at `resolution`.
    fn accessor_range(&self, param: Param, resolution: Resolution, bounds: (i64, i64)) -> (i64, i64) {
        if param.is_level_scaled() {
            resolution.range_from_fine(self.spec.family, bounds)
        } else {
            bounds
        }
    }

    fn wire_high_res(&self, param: Param, resolution: Resolution) -> bool {
        param.is_level_scaled() && resolution == Resolution::High
    }

    // --- Lifecycle ---

    /// Open the link and seed the cache from the unit's live values.
    /// `descriptor` is the unit's current enumeration entry; its bus position
    /// may have changed since the session was registered.
    pub(crate) async fn open(&mut self, backend: &Backend, descriptor: DeviceDescriptor, trace_io: TraceLevel) -> Result<()> {
        if self.state == HandleState::Open && !self.degraded {
            return Err(self.invalid_state());
        }
        // Drop a degraded link before claiming the unit again
        self.link = None;
        self.descriptor = descriptor;

        let mut link = backend.open(&self.descriptor, trace_io)?;
        let snapshot = self.seed(&mut link).await?;

        info!(
            "Device {} ({} #{}) open",
            self.id, self.descriptor.model, self.descriptor.serial_number
        );
        self.link = Some(link);
        self.snapshot = snapshot;
        self.degraded = false;
        self.state = HandleState::Open;
        Ok(())
    }

    async fn seed(&self, link: &mut Link) -> Result<DeviceSnapshot> {
        let family = self.spec.family;
        let mut snapshot = DeviceSnapshot::defaults(&self.spec);
        let query = |opcode, high_res| Command::Query { opcode, high_res };

        if let Reply::Status(status) = exchange(link, query(Opcode::Status, false), self.timeout).await? {
            snapshot.ramp.up = status.ramp_up();
            snapshot.ramp.repeat = status.ramp_repeat();
            snapshot.ramp.bidirectional = status.ramp_bidirectional();
            snapshot.ramp.state = if status.ramp_active() { Activity::Running } else { Activity::Idle };
            snapshot.profile.state = if status.profile_active() { Activity::Running } else { Activity::Idle };
            snapshot.rf_on = status.rf_on();
        }

        match exchange(link, query(Opcode::SerialNumber, false), self.timeout).await? {
            Reply::Serial(serial) if serial == self.descriptor.serial_number => {}
            other => {
                return Err(LabBrickError::Protocol(format!(
                    "expected serial number {}, unit answered {:?}",
                    self.descriptor.serial_number, other
                )));
            }
        }

        snapshot.frequency = expect_value(exchange(link, query(Opcode::Frequency, false), self.timeout).await?)?;

        let level_opcode = Param::Level.opcode(family);
        let high_res = family == Family::Attenuator;
        for channel in 1..=self.spec.channels {
            if self.spec.channels > 1 {
                exchange(link, Command::SetChannel(channel), self.timeout).await?;
            }
            let level = expect_value(exchange(link, query(level_opcode, high_res), self.timeout).await?)?;
            snapshot.set_channel_level(channel, level);
        }
        if self.spec.channels > 1 {
            exchange(link, Command::SetChannel(1), self.timeout).await?;
        }

        if self.spec.features.contains(Features::HAS_PROFILES) {
            snapshot.profile.index = expect_value(exchange(link, query(Opcode::ProfileIndex, false), self.timeout).await?)?;
        }
        Ok(snapshot)
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        if self.state != HandleState::Open {
            return Err(self.invalid_state());
        }
        self.link = None;
        self.degraded = false;
        self.state = HandleState::Closed;
        info!("Device {} closed", self.id);
        Ok(())
    }

    // --- Scalar settings ---

    pub(crate) async fn set_param(&mut self, param: Param, resolution: Resolution, value: i32) -> Result<()> {
        self.ensure_ready()?;
        if param == Param::ProfileIndex {
            return Err(self.not_supported("setting the profile index"));
        }
        self.check_access(param, resolution)?;
        let fine = self.validate(param, resolution, value, param.bounds(&self.spec))?;

        let command = Command::Set {
            opcode: param.opcode(self.spec.family),
            value,
            high_res: self.wire_high_res(param, resolution),
        };
        self.send(command).await?;
        self.snapshot.set(param, fine);
        Ok(())
    }

    pub(crate) async fn get_param(&mut self, param: Param, resolution: Resolution) -> Result<i32> {
        self.ensure_ready()?;
        self.check_access(param, resolution)?;
        let family = self.spec.family;
        let opcode = param.opcode(family);

        let fine = if opcode.is_queryable() {
            let high_res = param.is_level_scaled() && family == Family::Attenuator;
            let value = expect_value(self.send(Command::Query { opcode, high_res }).await?)?;
            self.snapshot.set(param, value);
            value
        } else {
            self.snapshot.get(param)
        };

        Ok(if param.is_level_scaled() {
            resolution.from_fine(family, fine)
        } else {
            fine
        })
    }

    /// Attenuation or phase angle, checked against the family the caller expects.
    pub(crate) async fn set_level(&mut self, family: Family, resolution: Resolution, value: i32) -> Result<()> {
        self.ensure_ready()?;
        self.require_family(family, level_operation(family))?;
        self.set_param(Param::Level, resolution, value).await
    }

    pub(crate) async fn get_level(&mut self, family: Family, resolution: Resolution) -> Result<i32> {
        self.ensure_ready()?;
        self.require_family(family, level_operation(family))?;
        self.get_param(Param::Level, resolution).await
    }

    /// Bounds in accessor units, from the cached model limits.
    pub(crate) fn bounds(&self, param: Param, resolution: Resolution) -> Result<(i32, i32)> {
        self.ensure_ready()?;
        self.check_access(param, resolution)?;
        let (min, max) = self.accessor_range(param, resolution, param.bounds(&self.spec));
        Ok((min as i32, max as i32))
    }

    pub(crate) fn level_bounds(&self, family: Family, resolution: Resolution) -> Result<(i32, i32)> {
        self.ensure_ready()?;
        self.require_family(family, level_operation(family))?;
        self.bounds(Param::Level, resolution)
    }

    /// Smallest level step in accessor units.
    pub(crate) fn min_step(&self, family: Family, resolution: Resolution) -> Result<i32> {
        self.level_bounds(family, resolution)?;
        Ok(self.bounds(Param::StepOne, resolution)?.0)
    }

    // --- Attenuator channels and RF ---

    pub(crate) async fn set_attenuation_on(&mut self, channel: u8, resolution: Resolution, value: i32) -> Result<()> {
        self.ensure_ready()?;
        self.require_family(Family::Attenuator, "attenuation")?;
        self.check_access(Param::Level, resolution)?;
        self.check_channel(channel)?;
        let fine = self.validate(Param::Level, resolution, value, Param::Level.bounds(&self.spec))?;

        self.send(Command::SetAttenuationOn {
            channel,
            value,
            high_res: self.wire_high_res(Param::Level, resolution),
        })
        .await?;
        self.snapshot.set_channel_level(channel, fine);
        Ok(())
    }

    fn check_channel(&self, channel: u8) -> Result<()> {
        if channel == 0 || channel > self.spec.channels {
            return Err(LabBrickError::out_of_range("channel", channel, 1, self.spec.channels));
        }
        Ok(())
    }

    pub(crate) async fn set_channel(&mut self, channel: u8) -> Result<()> {
        self.ensure_ready()?;
        self.require_family(Family::Attenuator, "channel selection")?;
        self.check_channel(channel)?;
        self.send(Command::SetChannel(channel)).await?;
        self.snapshot.channel = channel;
        Ok(())
    }

    pub(crate) fn channel(&self) -> Result<u8> {
        self.ensure_ready()?;
        self.require_family(Family::Attenuator, "channel selection")?;
        Ok(self.snapshot.channel)
    }

    pub(crate) async fn set_rf_on(&mut self, on: bool) -> Result<()> {
        self.ensure_ready()?;
        self.require_family(Family::Attenuator, "RF on/off")?;
        self.send(Command::SetFlag {
            opcode: Opcode::RfOn,
            on,
        })
        .await?;
        self.snapshot.rf_on = on;
        Ok(())
    }

    pub(crate) async fn rf_on(&mut self) -> Result<bool> {
        self.ensure_ready()?;
        self.require_family(Family::Attenuator, "RF on/off")?;
        let value = expect_value(
            self.send(Command::Query {
                opcode: Opcode::RfOn,
                high_res: false,
            })
            .await?,
        )?;
        self.snapshot.rf_on = value != 0;
        Ok(self.snapshot.rf_on)
    }

    pub(crate) fn features(&self) -> Result<Features> {
        self.ensure_ready()?;
        self.require_family(Family::Attenuator, "feature flags")?;
        Ok(self.spec.features)
    }

    // --- Ramp ---

    fn ramp_flags(&self) -> RampFlags {
        RampFlags::new()
            .with_up(self.snapshot.ramp.up)
            .with_repeat(self.snapshot.ramp.repeat)
            .with_bidirectional(self.snapshot.ramp.bidirectional)
    }

    async fn send_ramp_flags(&mut self, flags: RampFlags) -> Result<()> {
        self.send(Command::SetRampMode(flags)).await?;
        self.snapshot.ramp.up = flags.up();
        self.snapshot.ramp.repeat = flags.repeat();
        self.snapshot.ramp.bidirectional = flags.bidirectional();
        Ok(())
    }

    pub(crate) async fn set_ramp_direction(&mut self, up: bool) -> Result<()> {
        self.ensure_ready()?;
        let flags = self.ramp_flags().with_up(up);
        self.send_ramp_flags(flags).await
    }

    /// `repeat` keeps sweeping until stopped; otherwise the ramp runs once.
    pub(crate) async fn set_ramp_mode(&mut self, repeat: bool) -> Result<()> {
        self.ensure_ready()?;
        let flags = self.ramp_flags().with_repeat(repeat);
        self.send_ramp_flags(flags).await
    }

    pub(crate) async fn set_ramp_bidirectional(&mut self, enable: bool) -> Result<()> {
        self.ensure_ready()?;
        self.require_feature(Features::HAS_BIDIR_RAMPS, "bidirectional ramps")?;
        let flags = self.ramp_flags().with_bidirectional(enable);
        self.send_ramp_flags(flags).await
    }

    pub(crate) async fn start_ramp(&mut self, go: bool) -> Result<()> {
        self.ensure_ready()?;
        self.send(Command::SetFlag {
            opcode: Opcode::Sweep,
            on: go,
        })
        .await?;
        self.snapshot.ramp.state = if go { Activity::Running } else { Activity::Idle };
        Ok(())
    }

    // --- Profile ---

    fn check_profile_index(&self, index: u16) -> Result<()> {
        let count = self.snapshot.profile.count;
        if index >= count {
            return Err(LabBrickError::out_of_range(
                "profile index",
                index,
                0,
                count as i64 - 1,
            ));
        }
        Ok(())
    }

    pub(crate) async fn set_profile_element(&mut self, index: u16, resolution: Resolution, value: i32) -> Result<()> {
        self.ensure_ready()?;
        self.require_feature(Features::HAS_PROFILES, "profiles")?;
        self.check_access(Param::Level, resolution)?;
        self.check_profile_index(index)?;
        let fine = self.validate(Param::Level, resolution, value, Param::Level.bounds(&self.spec))?;

        self.send(Command::SetProfileElement {
            index,
            value,
            high_res: self.wire_high_res(Param::Level, resolution),
        })
        .await?;
        self.snapshot.profile.elements[index as usize] = fine;
        Ok(())
    }

    pub(crate) async fn profile_element(&mut self, index: u16, resolution: Resolution) -> Result<i32> {
        self.ensure_ready()?;
        self.require_feature(Features::HAS_PROFILES, "profiles")?;
        self.check_access(Param::Level, resolution)?;
        self.check_profile_index(index)?;

        let family = self.spec.family;
        let fine = expect_value(
            self.send(Command::QueryProfileElement {
                index,
                high_res: family == Family::Attenuator,
            })
            .await?,
        )?;
        self.snapshot.profile.elements[index as usize] = fine;
        Ok(resolution.from_fine(family, fine))
    }

    pub(crate) async fn start_profile(&mut self, mode: ProfileMode) -> Result<()> {
        self.ensure_ready()?;
        self.require_feature(Features::HAS_PROFILES, "profiles")?;
        self.send(Command::StartProfile(mode)).await?;
        self.snapshot.profile.index = 0;
        self.snapshot.profile.state = match mode {
            ProfileMode::Off => Activity::Idle,
            ProfileMode::Once | ProfileMode::Repeat => Activity::Running,
        };
        Ok(())
    }

    // --- Persistence and status ---

    pub(crate) async fn save_settings(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.send(Command::SaveSettings).await?;
        info!("Device {} settings saved", self.id);
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> Result<DeviceSnapshot> {
        self.ensure_ready()?;
        Ok(self.snapshot.clone())
    }

    /// Status word of the unit. Failures to reach or decode the unit are
    /// reported through the `degraded` bit rather than as errors.
    pub(crate) async fn status(&mut self, present: bool) -> DeviceStatus {
        let base = DeviceStatus::new().with_connected(present);
        if self.state != HandleState::Open {
            return base;
        }
        let base = base.with_opened(true);
        if self.degraded {
            return base.with_degraded(true);
        }

        let reply = self
            .send(Command::Query {
                opcode: Opcode::Status,
                high_res: false,
            })
            .await;
        match reply {
            Ok(Reply::Status(device)) => {
                if !device.ramp_active() {
                    self.snapshot.ramp.state = Activity::Idle;
                }
                if !device.profile_active() {
                    self.snapshot.profile.state = Activity::Idle;
                }
                device.with_connected(true).with_opened(true).with_degraded(false)
            }
            Ok(other) => {
                warn!("Device {} returned {:?} to a status query", self.id, other);
                base.with_degraded(true)
            }
            Err(e) => {
                warn!("Device {} status unavailable: {}", self.id, e);
                base.with_degraded(true)
            }
        }
    }
}

fn level_operation(family: Family) -> &'static str {
    match family {
        Family::Attenuator => "attenuation",
        Family::PhaseShifter => "phase angle",
    }
}
