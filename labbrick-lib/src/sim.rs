//! Simulated Lab Brick units for test mode.
//!
//! Each simulated unit decodes the same frames real hardware receives, keeps
//! its settings in a `DeviceSnapshot` and answers with echo or value replies.
//! The bus handle is cheap to clone; tests keep one to unplug units, stall
//! them or corrupt their replies.

use crate::codec::{Command, Frame, Opcode};
use crate::constants::FRAME_SIZE;
use crate::error::{LabBrickError, Result};
use crate::model::{DeviceModel, Family, ModelSpec};
use crate::snapshot::{Activity, DeviceSnapshot, Param};
use crate::status::DeviceStatus;
use crate::transport::{DeviceDescriptor, Location};
use crate::units::Resolution;
use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

pub const NAK_MALFORMED: u8 = 0x01;
pub const NAK_RANGE: u8 = 0x02;
pub const NAK_UNSUPPORTED: u8 = 0x03;

const PARAMS: [Param; 14] = [
    Param::Frequency,
    Param::Level,
    Param::RampStart,
    Param::RampEnd,
    Param::StepOne,
    Param::StepTwo,
    Param::DwellOne,
    Param::DwellTwo,
    Param::Idle,
    Param::Hold,
    Param::ProfileCount,
    Param::ProfileDwell,
    Param::ProfileIdle,
    Param::ProfileIndex,
];

fn param_for(opcode: Opcode, family: Family) -> Option<Param> {
    PARAMS.into_iter().find(|p| p.opcode(family) == opcode)
}

fn resolution(high_res: bool) -> Resolution {
    if high_res { Resolution::High } else { Resolution::Standard }
}

struct SimDevice {
    descriptor: DeviceDescriptor,
    spec: ModelSpec,
    connected: bool,
    unresponsive: bool,
    corrupt_next: bool,
    live: DeviceSnapshot,
    saved: DeviceSnapshot,
}

impl SimDevice {
    fn new(model: DeviceModel, serial_number: u32) -> Self {
        let spec = model.spec();
        let defaults = DeviceSnapshot::defaults(&spec);
        Self {
            descriptor: DeviceDescriptor {
                model,
                serial_number,
                location: Location::Simulated,
            },
            spec,
            connected: true,
            unresponsive: false,
            corrupt_next: false,
            live: defaults.clone(),
            saved: defaults,
        }
    }

    fn handle(&mut self, request: &Frame) -> Frame {
        let command = match Command::try_from(request) {
            Ok(command) => command,
            Err(_) => return Frame::nak(request, NAK_MALFORMED),
        };
        match self.apply(command) {
            Ok(Some(payload)) => Frame::reply(request, payload),
            Ok(None) => Frame::reply(request, request.payload.clone()),
            Err(reason) => Frame::nak(request, reason),
        }
    }

    fn to_fine(&self, param: Param, high_res: bool, value: i32) -> std::result::Result<i32, u8> {
        let fine = if param.is_level_scaled() {
            resolution(high_res).to_fine(self.spec.family, value)
        } else {
            value as i64
        };
        let (min, max) = param.bounds(&self.spec);
        if fine < min || fine > max {
            return Err(NAK_RANGE);
        }
        Ok(fine as i32)
    }

    fn status(&self) -> DeviceStatus {
        DeviceStatus::new()
            .with_connected(true)
            .with_ramp_active(self.live.ramp.state == Activity::Running)
            .with_ramp_up(self.live.ramp.up)
            .with_ramp_repeat(self.live.ramp.repeat)
            .with_ramp_bidirectional(self.live.ramp.bidirectional)
            .with_profile_active(self.live.profile.state == Activity::Running)
            .with_rf_on(self.live.rf_on)
    }

    /// `Ok(None)` echoes the request payload.
    fn apply(&mut self, command: Command) -> std::result::Result<Option<Bytes>, u8> {
        let family = self.spec.family;
        let mut reply = BytesMut::new();
        match command {
            Command::Set { opcode, value, high_res } => {
                let param = param_for(opcode, family)
                    .filter(|p| *p != Param::ProfileIndex)
                    .ok_or(NAK_UNSUPPORTED)?;
                let fine = self.to_fine(param, high_res, value)?;
                self.live.set(param, fine);
            }
            Command::SetAttenuationOn { channel, value, high_res } => {
                if family != Family::Attenuator {
                    return Err(NAK_UNSUPPORTED);
                }
                if channel == 0 || channel > self.spec.channels {
                    return Err(NAK_RANGE);
                }
                let fine = self.to_fine(Param::Level, high_res, value)?;
                self.live.set_channel_level(channel, fine);
            }
            Command::SetFlag { opcode: Opcode::RfOn, on } => self.live.rf_on = on,
            Command::SetFlag { opcode: Opcode::Sweep, on } => {
                self.live.ramp.state = if on { Activity::Running } else { Activity::Idle };
            }
            Command::SetFlag { .. } => return Err(NAK_UNSUPPORTED),
            Command::SetRampMode(flags) => {
                self.live.ramp.up = flags.up();
                self.live.ramp.repeat = flags.repeat();
                self.live.ramp.bidirectional = flags.bidirectional();
            }
            Command::SetChannel(channel) => {
                if channel == 0 || channel > self.spec.channels {
                    return Err(NAK_RANGE);
                }
                self.live.channel = channel;
            }
            Command::SetProfileElement { index, value, high_res } => {
                if index >= self.spec.profile_max {
                    return Err(NAK_RANGE);
                }
                let fine = self.to_fine(Param::Level, high_res, value)?;
                self.live.profile.elements[index as usize] = fine;
            }
            Command::StartProfile(mode) => {
                self.live.profile.index = 0;
                self.live.profile.state = match mode {
                    crate::codec::ProfileMode::Off => Activity::Idle,
                    _ => Activity::Running,
                };
            }
            Command::SaveSettings => {
                self.saved = self.live.clone();
                self.saved.ramp.state = Activity::Idle;
                self.saved.profile.state = Activity::Idle;
            }
            Command::Query { opcode: Opcode::Status, .. } => {
                reply.put_u16_le(self.status().bits());
                return Ok(Some(reply.freeze()));
            }
            Command::Query {
                opcode: Opcode::SerialNumber,
                ..
            } => {
                reply.put_u32_le(self.descriptor.serial_number);
                return Ok(Some(reply.freeze()));
            }
            Command::Query { opcode: Opcode::RfOn, .. } => {
                reply.put_i32_le(self.live.rf_on as i32);
                return Ok(Some(reply.freeze()));
            }
            Command::Query { opcode, high_res } => {
                let param = param_for(opcode, family).ok_or(NAK_UNSUPPORTED)?;
                let mut value = self.live.get(param);
                if param.is_level_scaled() {
                    value = resolution(high_res).from_fine(family, value);
                }
                reply.put_i32_le(value);
                return Ok(Some(reply.freeze()));
            }
            Command::QueryProfileElement { index, high_res } => {
                let fine = *self.live.profile.elements.get(index as usize).ok_or(NAK_RANGE)?;
                reply.put_u16_le(index);
                reply.put_i32_le(resolution(high_res).from_fine(family, fine));
                return Ok(Some(reply.freeze()));
            }
        }
        Ok(None)
    }
}

/// Shared set of simulated units.
#[derive(Clone, Default)]
pub struct SimulatedBus {
    devices: Arc<Mutex<Vec<SimDevice>>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// LDA-102 #11001, LDA-602 #11002, LDA-602Q #11003 and LPS-802 #21001.
    pub fn with_default_devices() -> Self {
        let bus = Self::new();
        bus.insert(DeviceModel::Lda102, 11001);
        bus.insert(DeviceModel::Lda602, 11002);
        bus.insert(DeviceModel::Lda602Q, 11003);
        bus.insert(DeviceModel::Lps802, 21001);
        bus
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SimDevice>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_device<T>(&self, serial_number: u32, f: impl FnOnce(&mut SimDevice) -> T) -> Option<T> {
        self.lock()
            .iter_mut()
            .find(|d| d.descriptor.serial_number == serial_number)
            .map(f)
    }

    /// Plug a unit in. Re-attaching a known serial reconnects it with its
    /// settings intact; the model must match the one first attached.
    pub fn attach(&self, model: DeviceModel, serial_number: u32) -> Result<DeviceDescriptor> {
        let known = self.with_device(serial_number, |d| {
            if d.descriptor.model != model {
                return Err(LabBrickError::Config(format!(
                    "simulated serial {} is a {}, not a {}",
                    serial_number, d.descriptor.model, model
                )));
            }
            d.connected = true;
            Ok(d.descriptor.clone())
        });
        if let Some(descriptor) = known {
            return descriptor;
        }
        Ok(self.insert(model, serial_number))
    }

    fn insert(&self, model: DeviceModel, serial_number: u32) -> DeviceDescriptor {
        let device = SimDevice::new(model, serial_number);
        let descriptor = device.descriptor.clone();
        info!("Simulated {} #{} attached", model, serial_number);
        self.lock().push(device);
        descriptor
    }

    /// Unplug a unit. Returns false if the serial is unknown.
    pub fn detach(&self, serial_number: u32) -> bool {
        self.with_device(serial_number, |d| d.connected = false).is_some()
    }

    /// Stop answering requests, so reads run into the response timeout.
    pub fn set_unresponsive(&self, serial_number: u32, unresponsive: bool) {
        self.with_device(serial_number, |d| d.unresponsive = unresponsive);
    }

    /// Flip the checksum of the next reply.
    pub fn corrupt_next_response(&self, serial_number: u32) {
        self.with_device(serial_number, |d| d.corrupt_next = true);
    }

    /// Signal that the running ramp and profile have completed.
    pub fn finish_sweep(&self, serial_number: u32) {
        self.with_device(serial_number, |d| {
            d.live.ramp.state = Activity::Idle;
            d.live.profile.state = Activity::Idle;
        });
    }

    /// Advance a running profile by one element.
    pub fn step_profile(&self, serial_number: u32) {
        self.with_device(serial_number, |d| {
            let profile = &mut d.live.profile;
            if profile.state == Activity::Running && profile.count > 0 {
                profile.index = (profile.index + 1) % profile.count as i32;
            }
        });
    }

    /// Reload the settings last written to non-volatile memory.
    pub fn power_cycle(&self, serial_number: u32) {
        self.with_device(serial_number, |d| d.live = d.saved.clone());
    }

    /// Current settings held by the unit.
    pub fn registers(&self, serial_number: u32) -> Option<DeviceSnapshot> {
        self.with_device(serial_number, |d| d.live.clone())
    }

    /// Settings stored in the unit's non-volatile memory.
    pub fn saved_settings(&self, serial_number: u32) -> Option<DeviceSnapshot> {
        self.with_device(serial_number, |d| d.saved.clone())
    }

    pub(crate) fn enumerate(&self) -> Vec<DeviceDescriptor> {
        self.lock()
            .iter()
            .filter(|d| d.connected)
            .map(|d| d.descriptor.clone())
            .collect()
    }

    pub(crate) fn open(&self, descriptor: &DeviceDescriptor) -> Result<SimLink> {
        let present = self.lock().iter().any(|d| d.connected && d.descriptor.same_unit(descriptor));
        if !present {
            return Err(LabBrickError::DeviceNotFound);
        }
        Ok(SimLink {
            bus: self.clone(),
            serial_number: descriptor.serial_number,
            pending: None,
        })
    }

    /// Deliver one request. `Ok(None)` means the unit stays silent.
    fn exchange(&self, serial_number: u32, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut devices = self.lock();
        let device = devices
            .iter_mut()
            .find(|d| d.descriptor.serial_number == serial_number && d.connected)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotConnected,
                    format!("simulated device #{} is not connected", serial_number),
                )
            })?;

        if device.unresponsive {
            return Ok(None);
        }
        let Ok(request) = Frame::try_from(bytes) else {
            debug!(serial_number, "Simulated device dropped a malformed frame");
            return Ok(None);
        };

        let mut reply = device.handle(&request).to_bytes().to_vec();
        if device.corrupt_next {
            device.corrupt_next = false;
            reply[FRAME_SIZE - 1] ^= 0xFF;
        }
        Ok(Some(reply))
    }
}

/// Link to one simulated unit.
pub struct SimLink {
    bus: SimulatedBus,
    serial_number: u32,
    pending: Option<Vec<u8>>,
}

impl SimLink {
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.pending = self.bus.exchange(self.serial_number, bytes)?;
        Ok(())
    }

    pub async fn read(&mut self) -> Result<Vec<u8>> {
        match self.pending.take() {
            Some(reply) => Ok(reply),
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Reply;

    fn roundtrip(device: &mut SimDevice, command: Command) -> std::result::Result<Reply, LabBrickError> {
        let request = command.to_frame();
        let reply = device.handle(&request);
        command.parse_reply(&request, &reply)
    }

    #[test]
    fn standard_write_reads_back_in_both_resolutions() {
        let mut device = SimDevice::new(DeviceModel::Lda602, 1);
        let set = Command::Set {
            opcode: Opcode::Attenuation,
            value: 41,
            high_res: false,
        };
        assert_eq!(roundtrip(&mut device, set).unwrap(), Reply::Ack);
        let query = |high_res| Command::Query {
            opcode: Opcode::Attenuation,
            high_res,
        };
        assert_eq!(roundtrip(&mut device, query(true)).unwrap(), Reply::Value(205));
        assert_eq!(roundtrip(&mut device, query(false)).unwrap(), Reply::Value(41));
    }

    #[test]
    fn out_of_range_is_nakked() {
        let mut device = SimDevice::new(DeviceModel::Lda102, 1);
        let set = Command::Set {
            opcode: Opcode::Attenuation,
            value: 1000,
            high_res: false,
        };
        assert!(matches!(
            roundtrip(&mut device, set),
            Err(LabBrickError::Nak { reason: NAK_RANGE, .. })
        ));
    }

    #[test]
    fn phase_shifter_rejects_attenuation() {
        let mut device = SimDevice::new(DeviceModel::Lps802, 1);
        let set = Command::Set {
            opcode: Opcode::Attenuation,
            value: 4,
            high_res: false,
        };
        assert!(matches!(
            roundtrip(&mut device, set),
            Err(LabBrickError::Nak {
                reason: NAK_UNSUPPORTED,
                ..
            })
        ));
    }

    #[test]
    fn detached_units_disappear_from_enumeration() {
        let bus = SimulatedBus::with_default_devices();
        assert_eq!(bus.enumerate().len(), 4);
        assert!(bus.detach(11002));
        assert!(!bus.detach(99));
        let serials: Vec<u32> = bus.enumerate().iter().map(|d| d.serial_number).collect();
        assert_eq!(serials, vec![11001, 11003, 21001]);
    }

    #[test]
    fn reattach_checks_model() {
        let bus = SimulatedBus::with_default_devices();
        bus.detach(11002);
        assert!(matches!(
            bus.attach(DeviceModel::Lps802, 11002),
            Err(LabBrickError::Config(msg)) if msg.contains("LDA-602")
        ));
        assert_eq!(bus.enumerate().len(), 3);

        let descriptor = bus.attach(DeviceModel::Lda602, 11002).unwrap();
        assert_eq!(descriptor.model, DeviceModel::Lda602);
        assert_eq!(bus.enumerate().len(), 4);

        bus.attach(DeviceModel::Lps123, 31001).unwrap();
        assert_eq!(bus.enumerate().len(), 5);
    }
}
