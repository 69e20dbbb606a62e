// Protocol and device constants for Lab Brick instruments

/// Vaunix USB vendor id
pub const VID: u16 = 0x041F;

/// HID interface claimed on every unit
pub const INTERFACE: u8 = 0;

/// Interrupt OUT endpoint (host to device)
pub const ENDPOINT_OUT: u8 = 0x02;

/// Interrupt IN endpoint (device to host)
pub const ENDPOINT_IN: u8 = 0x81;

/// Size of every command and reply frame (10 bytes)
pub const FRAME_SIZE: usize = 10;

/// Maximum payload carried by a single frame (7 bytes)
pub const MAX_PAYLOAD: usize = 7;

/// Default bound on waiting for a reply, in milliseconds
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1000;

/// Fine (HR) attenuation units per standard unit: 0.25 dB / 0.05 dB
pub const HR_PER_QUARTER_DB: i32 = 5;

/// Frequencies are carried in 100 kHz units
pub const FREQUENCY_UNIT_HZ: u64 = 100_000;

/// Longest dwell, idle or hold time accepted, in milliseconds (24 h)
pub const MAX_TIME_MS: i32 = 86_400_000;

/// Shortest dwell time accepted, in milliseconds
pub const MIN_DWELL_MS: i32 = 1;

/// Profile capacity of standard models
pub const PROFILE_MAX: u16 = 100;

/// Profile capacity of models flagged `HAS_LONG_PROFILE`
pub const PROFILE_MAX_LONG: u16 = 1000;

/// Model defaults applied to freshly opened handles for non-queryable settings
pub const DEFAULT_DWELL_MS: i32 = 1000;
pub const DEFAULT_IDLE_MS: i32 = 0;
pub const DEFAULT_HOLD_MS: i32 = 0;
