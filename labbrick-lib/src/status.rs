use modular_bitfield::prelude::*;
use serde::{Serialize, Serializer};

/// Two-byte device status word.
///
/// The device reports the sweep, profile and RF bits. `opened` and `degraded`
/// are filled in by the host from the handle's own state.
#[bitfield(bytes = 2)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceStatus {
    pub connected: bool,
    pub opened: bool,
    pub ramp_active: bool,
    pub ramp_up: bool,
    pub ramp_repeat: bool,
    pub ramp_bidirectional: bool,
    pub profile_active: bool,
    pub rf_on: bool,
    pub degraded: bool,
    #[skip]
    unused: B7,
}

impl DeviceStatus {
    pub fn bits(&self) -> u16 {
        u16::from_le_bytes(self.into_bytes())
    }

    pub fn from_bits(bits: u16) -> Self {
        DeviceStatus::from_bytes(bits.to_le_bytes())
    }

    /// Connected, opened and not degraded.
    pub fn is_healthy(&self) -> bool {
        self.connected() && self.opened() && !self.degraded()
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus::new()
    }
}

impl Serialize for DeviceStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.bits())
    }
}

/// Ramp configuration flags carried by the ramp-mode command.
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampFlags {
    pub up: bool,
    pub repeat: bool,
    pub bidirectional: bool,
    #[skip]
    unused: B5,
}

impl Default for RampFlags {
    fn default() -> Self {
        RampFlags::new().with_up(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bit_positions() {
        let status = DeviceStatus::new().with_connected(true).with_ramp_active(true).with_degraded(true);
        assert_eq!(status.bits(), 0x0105);
        assert_eq!(DeviceStatus::from_bits(0x0105), status);
        assert!(!status.is_healthy());
    }

    #[test]
    fn healthy_requires_open_connection() {
        let status = DeviceStatus::new().with_connected(true).with_opened(true);
        assert!(status.is_healthy());
        assert!(!status.with_opened(false).is_healthy());
    }

    #[test]
    fn ramp_flags_default_sweeps_up() {
        let flags = RampFlags::default();
        assert!(flags.up());
        assert!(!flags.repeat());
        assert_eq!(flags.into_bytes(), [0x01]);
    }
}
