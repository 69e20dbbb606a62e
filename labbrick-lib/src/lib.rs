pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod manager;
pub mod model;
pub mod session;
pub mod sim;
pub mod snapshot;
pub mod status;
pub mod transport;
pub mod units;
pub mod usb;

// Re-export the registry and the types most callers need
pub use codec::ProfileMode;
pub use config::{Config, TraceConfig, TraceLevel};
pub use error::{LabBrickError, Result};
pub use manager::{DeviceId, LabBrick};
pub use model::{DeviceModel, Family, Features};
pub use session::HandleState;
pub use sim::SimulatedBus;
pub use snapshot::DeviceSnapshot;
pub use status::DeviceStatus;
pub use transport::DeviceDescriptor;
