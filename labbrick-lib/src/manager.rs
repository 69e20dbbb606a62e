//! Registry of Lab Brick units keyed by `DeviceId`.
//!
//! Every unit ever seen by `enumerate` gets a session slot. Ids are handed out
//! in discovery order starting at 1 and are never reused, so a handle kept
//! across an unplug still resolves (and then fails with a transport error).
//! Each session sits behind its own async mutex: one command in flight per
//! unit, different units in parallel.

use crate::codec::ProfileMode;
use crate::config::Config;
use crate::error::{LabBrickError, Result};
use crate::model::{Family, Features};
use crate::session::{HandleState, Session};
use crate::sim::SimulatedBus;
use crate::snapshot::{DeviceSnapshot, Param};
use crate::status::DeviceStatus;
use crate::transport::{Backend, DeviceDescriptor};
use crate::units::Resolution;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

/// Handle of one registered unit. Valid ids start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceId(u32);

impl DeviceId {
    pub const fn new(id: u32) -> Self {
        DeviceId(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    fn index(self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

impl From<u32> for DeviceId {
    fn from(id: u32) -> Self {
        DeviceId(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Entry {
    descriptor: DeviceDescriptor,
    session: Arc<Mutex<Session>>,
}

pub struct LabBrick {
    config: Config,
    backend: Backend,
    entries: RwLock<Vec<Entry>>,
}

impl LabBrick {
    /// Create a registry over USB hardware, or over the default simulated
    /// units when `config.test_mode` is set.
    pub fn new(config: Config) -> Result<Self> {
        let backend = if config.test_mode {
            Backend::Simulated(SimulatedBus::with_default_devices())
        } else {
            Backend::Usb
        };
        Self::with_backend(config, backend)
    }

    /// Create a registry over a caller-provided simulated bus.
    pub fn with_simulated_bus(config: Config, bus: SimulatedBus) -> Result<Self> {
        Self::with_backend(config, Backend::Simulated(bus))
    }

    fn with_backend(config: Config, backend: Backend) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            entries: RwLock::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn simulated_bus(&self) -> Option<&SimulatedBus> {
        match &self.backend {
            Backend::Simulated(bus) => Some(bus),
            Backend::Usb => None,
        }
    }

    pub fn library_version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    // --- Enumeration ---

    /// Units connected right now, registering any not seen before.
    pub fn enumerate(&self) -> Result<Vec<(DeviceId, DeviceDescriptor)>> {
        let found = self.backend.enumerate()?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let mut present = Vec::with_capacity(found.len());
        for descriptor in found {
            let id = match entries.iter().position(|e| e.descriptor.same_unit(&descriptor)) {
                Some(index) => {
                    entries[index].descriptor = descriptor.clone();
                    DeviceId(index as u32 + 1)
                }
                None => {
                    let id = DeviceId(entries.len() as u32 + 1);
                    info!("Registered {} #{} as device {}", descriptor.model, descriptor.serial_number, id);
                    let session = Session::new(id, descriptor.clone(), self.config.response_timeout());
                    entries.push(Entry {
                        descriptor: descriptor.clone(),
                        session: Arc::new(Mutex::new(session)),
                    });
                    id
                }
            };
            present.push((id, descriptor));
        }
        Ok(present)
    }

    pub fn num_devices(&self) -> Result<usize> {
        Ok(self.enumerate()?.len())
    }

    /// Ids of the units connected right now.
    pub fn dev_info(&self) -> Result<Vec<DeviceId>> {
        Ok(self.enumerate()?.into_iter().map(|(id, _)| id).collect())
    }

    /// Last known descriptor of a registered unit.
    pub fn descriptor(&self, id: DeviceId) -> Result<DeviceDescriptor> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        id.index()
            .and_then(|i| entries.get(i))
            .map(|e| e.descriptor.clone())
            .ok_or(LabBrickError::UnknownDevice(id))
    }

    pub fn model_name(&self, id: DeviceId) -> Result<&'static str> {
        Ok(self.descriptor(id)?.model.spec().name)
    }

    /// Model name as UTF-16 code units.
    pub fn model_name_wide(&self, id: DeviceId) -> Result<Vec<u16>> {
        Ok(self.model_name(id)?.encode_utf16().collect())
    }

    pub fn serial_number(&self, id: DeviceId) -> Result<u32> {
        Ok(self.descriptor(id)?.serial_number)
    }

    pub fn family(&self, id: DeviceId) -> Result<Family> {
        Ok(self.descriptor(id)?.model.family())
    }

    fn session(&self, id: DeviceId) -> Result<Arc<Mutex<Session>>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        id.index()
            .and_then(|i| entries.get(i))
            .map(|e| Arc::clone(&e.session))
            .ok_or(LabBrickError::UnknownDevice(id))
    }

    /// Wait for exclusive use of one unit's session.
    async fn lock(&self, id: DeviceId) -> Result<OwnedMutexGuard<Session>> {
        Ok(self.session(id)?.lock_owned().await)
    }

    // --- Lifecycle ---

    pub async fn init_device(&self, id: DeviceId) -> Result<()> {
        let session = self.session(id)?;
        let current = self.enumerate()?;
        let descriptor = current
            .into_iter()
            .find(|(present, _)| *present == id)
            .map(|(_, descriptor)| descriptor)
            .ok_or(LabBrickError::DeviceNotFound)?;
        session
            .lock_owned()
            .await
            .open(&self.backend, descriptor, self.config.trace.io)
            .await
    }

    /// Lifecycle state of a handle and whether it is degraded.
    pub async fn handle_state(&self, id: DeviceId) -> Result<(HandleState, bool)> {
        let session = self.lock(id).await?;
        Ok((session.state(), session.is_degraded()))
    }

    pub async fn close_device(&self, id: DeviceId) -> Result<()> {
        self.lock(id).await?.close()
    }

    /// Status word of a unit. Only an unknown id is an error; transport and
    /// decode failures set the `degraded` bit.
    pub async fn device_status(&self, id: DeviceId) -> Result<DeviceStatus> {
        let session = self.session(id)?;
        let descriptor = self.descriptor(id)?;
        let present = self
            .backend
            .enumerate()
            .map(|found| found.iter().any(|d| d.same_unit(&descriptor)))
            .unwrap_or(false);
        Ok(session.lock_owned().await.status(present).await)
    }

    pub async fn snapshot(&self, id: DeviceId) -> Result<DeviceSnapshot> {
        self.lock(id).await?.snapshot()
    }

    pub async fn save_settings(&self, id: DeviceId) -> Result<()> {
        self.lock(id).await?.save_settings().await
    }

    // --- Frequency ---

    /// Working frequency in 100 kHz units.
    pub async fn set_working_frequency(&self, id: DeviceId, frequency: i32) -> Result<()> {
        self.lock(id).await?.set_param(Param::Frequency, Resolution::Standard, frequency).await
    }

    pub async fn working_frequency(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_param(Param::Frequency, Resolution::Standard).await
    }

    pub async fn min_working_frequency(&self, id: DeviceId) -> Result<i32> {
        Ok(self.lock(id).await?.bounds(Param::Frequency, Resolution::Standard)?.0)
    }

    pub async fn max_working_frequency(&self, id: DeviceId) -> Result<i32> {
        Ok(self.lock(id).await?.bounds(Param::Frequency, Resolution::Standard)?.1)
    }

    // --- Attenuator ---

    /// Attenuation in quarter-dB steps.
    pub async fn set_attenuation(&self, id: DeviceId, attenuation: i32) -> Result<()> {
        self.lock(id).await?.set_level(Family::Attenuator, Resolution::Standard, attenuation).await
    }

    /// Attenuation in 0.05 dB steps.
    pub async fn set_attenuation_hr(&self, id: DeviceId, attenuation: i32) -> Result<()> {
        self.lock(id).await?.set_level(Family::Attenuator, Resolution::High, attenuation).await
    }

    /// Set one channel of a multi-channel unit without changing the selection.
    pub async fn set_attenuation_hr_on_channel(&self, id: DeviceId, channel: u8, attenuation: i32) -> Result<()> {
        self.lock(id).await?.set_attenuation_on(channel, Resolution::High, attenuation).await
    }

    pub async fn attenuation(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_level(Family::Attenuator, Resolution::Standard).await
    }

    pub async fn attenuation_hr(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_level(Family::Attenuator, Resolution::High).await
    }

    pub async fn min_attenuation(&self, id: DeviceId) -> Result<i32> {
        Ok(self.lock(id).await?.level_bounds(Family::Attenuator, Resolution::Standard)?.0)
    }

    pub async fn max_attenuation(&self, id: DeviceId) -> Result<i32> {
        Ok(self.lock(id).await?.level_bounds(Family::Attenuator, Resolution::Standard)?.1)
    }

    pub async fn min_attenuation_hr(&self, id: DeviceId) -> Result<i32> {
        Ok(self.lock(id).await?.level_bounds(Family::Attenuator, Resolution::High)?.0)
    }

    pub async fn max_attenuation_hr(&self, id: DeviceId) -> Result<i32> {
        Ok(self.lock(id).await?.level_bounds(Family::Attenuator, Resolution::High)?.1)
    }

    pub async fn min_atten_step(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.min_step(Family::Attenuator, Resolution::Standard)
    }

    pub async fn min_atten_step_hr(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.min_step(Family::Attenuator, Resolution::High)
    }

    /// Select the channel later attenuation calls address.
    pub async fn set_channel(&self, id: DeviceId, channel: u8) -> Result<()> {
        self.lock(id).await?.set_channel(channel).await
    }

    pub async fn channel(&self, id: DeviceId) -> Result<u8> {
        self.lock(id).await?.channel()
    }

    pub async fn set_rf_on(&self, id: DeviceId, on: bool) -> Result<()> {
        self.lock(id).await?.set_rf_on(on).await
    }

    pub async fn rf_on(&self, id: DeviceId) -> Result<bool> {
        self.lock(id).await?.rf_on().await
    }

    pub async fn features(&self, id: DeviceId) -> Result<Features> {
        self.lock(id).await?.features()
    }

    // --- Phase shifter ---

    /// Phase angle in degrees.
    pub async fn set_phase_angle(&self, id: DeviceId, angle: i32) -> Result<()> {
        self.lock(id).await?.set_level(Family::PhaseShifter, Resolution::Standard, angle).await
    }

    pub async fn phase_angle(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_level(Family::PhaseShifter, Resolution::Standard).await
    }

    pub async fn min_phase_shift(&self, id: DeviceId) -> Result<i32> {
        Ok(self.lock(id).await?.level_bounds(Family::PhaseShifter, Resolution::Standard)?.0)
    }

    pub async fn max_phase_shift(&self, id: DeviceId) -> Result<i32> {
        Ok(self.lock(id).await?.level_bounds(Family::PhaseShifter, Resolution::Standard)?.1)
    }

    pub async fn min_phase_step(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.min_step(Family::PhaseShifter, Resolution::Standard)
    }

    // --- Ramp ---

    pub async fn set_ramp_start(&self, id: DeviceId, start: i32) -> Result<()> {
        self.lock(id).await?.set_param(Param::RampStart, Resolution::Standard, start).await
    }

    pub async fn set_ramp_start_hr(&self, id: DeviceId, start: i32) -> Result<()> {
        self.lock(id).await?.set_param(Param::RampStart, Resolution::High, start).await
    }

    pub async fn ramp_start(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_param(Param::RampStart, Resolution::Standard).await
    }

    pub async fn ramp_start_hr(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_param(Param::RampStart, Resolution::High).await
    }

    pub async fn set_ramp_end(&self, id: DeviceId, end: i32) -> Result<()> {
        self.lock(id).await?.set_param(Param::RampEnd, Resolution::Standard, end).await
    }

    pub async fn set_ramp_end_hr(&self, id: DeviceId, end: i32) -> Result<()> {
        self.lock(id).await?.set_param(Param::RampEnd, Resolution::High, end).await
    }

    pub async fn ramp_end(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_param(Param::RampEnd, Resolution::Standard).await
    }

    pub async fn ramp_end_hr(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_param(Param::RampEnd, Resolution::High).await
    }

    pub async fn set_ramp_step(&self, id: DeviceId, step: i32) -> Result<()> {
        self.lock(id).await?.set_param(Param::StepOne, Resolution::Standard, step).await
    }

    pub async fn set_ramp_step_hr(&self, id: DeviceId, step: i32) -> Result<()> {
        self.lock(id).await?.set_param(Param::StepOne, Resolution::High, step).await
    }

    pub async fn ramp_step(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_param(Param::StepOne, Resolution::Standard).await
    }

    pub async fn ramp_step_hr(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_param(Param::StepOne, Resolution::High).await
    }

    /// Step used on the return leg of a bidirectional ramp.
    pub async fn set_ramp_step_two(&self, id: DeviceId, step: i32) -> Result<()> {
        self.lock(id).await?.set_param(Param::StepTwo, Resolution::Standard, step).await
    }

    pub async fn set_ramp_step_two_hr(&self, id: DeviceId, step: i32) -> Result<()> {
        self.lock(id).await?.set_param(Param::StepTwo, Resolution::High, step).await
    }

    pub async fn ramp_step_two(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_param(Param::StepTwo, Resolution::Standard).await
    }

    pub async fn ramp_step_two_hr(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_param(Param::StepTwo, Resolution::High).await
    }

    pub async fn set_ramp_direction(&self, id: DeviceId, up: bool) -> Result<()> {
        self.lock(id).await?.set_ramp_direction(up).await
    }

    pub async fn set_ramp_mode(&self, id: DeviceId, repeat: bool) -> Result<()> {
        self.lock(id).await?.set_ramp_mode(repeat).await
    }

    pub async fn set_ramp_bidirectional(&self, id: DeviceId, enable: bool) -> Result<()> {
        self.lock(id).await?.set_ramp_bidirectional(enable).await
    }

    /// Start (`go`) or stop the ramp.
    pub async fn start_ramp(&self, id: DeviceId, go: bool) -> Result<()> {
        self.lock(id).await?.start_ramp(go).await
    }

    // --- Timing (milliseconds) ---

    pub async fn set_dwell_time(&self, id: DeviceId, ms: i32) -> Result<()> {
        self.lock(id).await?.set_param(Param::DwellOne, Resolution::Standard, ms).await
    }

    pub async fn dwell_time(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_param(Param::DwellOne, Resolution::Standard).await
    }

    pub async fn set_dwell_time_two(&self, id: DeviceId, ms: i32) -> Result<()> {
        self.lock(id).await?.set_param(Param::DwellTwo, Resolution::Standard, ms).await
    }

    pub async fn dwell_time_two(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_param(Param::DwellTwo, Resolution::Standard).await
    }

    pub async fn set_idle_time(&self, id: DeviceId, ms: i32) -> Result<()> {
        self.lock(id).await?.set_param(Param::Idle, Resolution::Standard, ms).await
    }

    pub async fn idle_time(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_param(Param::Idle, Resolution::Standard).await
    }

    pub async fn set_hold_time(&self, id: DeviceId, ms: i32) -> Result<()> {
        self.lock(id).await?.set_param(Param::Hold, Resolution::Standard, ms).await
    }

    pub async fn hold_time(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_param(Param::Hold, Resolution::Standard).await
    }

    // --- Profile ---

    pub async fn set_profile_element(&self, id: DeviceId, index: u16, value: i32) -> Result<()> {
        self.lock(id).await?.set_profile_element(index, Resolution::Standard, value).await
    }

    pub async fn set_profile_element_hr(&self, id: DeviceId, index: u16, value: i32) -> Result<()> {
        self.lock(id).await?.set_profile_element(index, Resolution::High, value).await
    }

    pub async fn profile_element(&self, id: DeviceId, index: u16) -> Result<i32> {
        self.lock(id).await?.profile_element(index, Resolution::Standard).await
    }

    pub async fn profile_element_hr(&self, id: DeviceId, index: u16) -> Result<i32> {
        self.lock(id).await?.profile_element(index, Resolution::High).await
    }

    pub async fn set_profile_count(&self, id: DeviceId, count: i32) -> Result<()> {
        self.lock(id).await?.set_param(Param::ProfileCount, Resolution::Standard, count).await
    }

    pub async fn profile_count(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_param(Param::ProfileCount, Resolution::Standard).await
    }

    pub async fn set_profile_dwell_time(&self, id: DeviceId, ms: i32) -> Result<()> {
        self.lock(id).await?.set_param(Param::ProfileDwell, Resolution::Standard, ms).await
    }

    pub async fn profile_dwell_time(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_param(Param::ProfileDwell, Resolution::Standard).await
    }

    pub async fn set_profile_idle_time(&self, id: DeviceId, ms: i32) -> Result<()> {
        self.lock(id).await?.set_param(Param::ProfileIdle, Resolution::Standard, ms).await
    }

    pub async fn profile_idle_time(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_param(Param::ProfileIdle, Resolution::Standard).await
    }

    /// Element the running profile is on.
    pub async fn profile_index(&self, id: DeviceId) -> Result<i32> {
        self.lock(id).await?.get_param(Param::ProfileIndex, Resolution::Standard).await
    }

    pub async fn start_profile(&self, id: DeviceId, mode: ProfileMode) -> Result<()> {
        self.lock(id).await?.start_profile(mode).await
    }
}
