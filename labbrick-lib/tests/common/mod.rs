//! Common test utilities and shared imports

// Shared across several test files; not every item is used by each of them
#[allow(unused_imports)]
pub use labbrick_lib::{
    Config, DeviceId, DeviceModel, DeviceStatus, Family, Features, HandleState, LabBrick, LabBrickError, ProfileMode,
    SimulatedBus,
};
#[allow(unused_imports)]
pub use labbrick_lib::units::Resolution;
#[allow(unused_imports)]
pub use std::time::Duration;

/// Serial numbers of the default simulated units, in registration order.
#[allow(dead_code)]
pub const LDA102_SERIAL: u32 = 11001;
#[allow(dead_code)]
pub const LDA602_SERIAL: u32 = 11002;
#[allow(dead_code)]
pub const LDA602Q_SERIAL: u32 = 11003;
#[allow(dead_code)]
pub const LPS802_SERIAL: u32 = 21001;

#[allow(dead_code)]
pub const LDA102: DeviceId = DeviceId::new(1);
#[allow(dead_code)]
pub const LDA602: DeviceId = DeviceId::new(2);
#[allow(dead_code)]
pub const LDA602Q: DeviceId = DeviceId::new(3);
#[allow(dead_code)]
pub const LPS802: DeviceId = DeviceId::new(4);

/// Route library logs to the test harness; set `RUST_LOG` to see them.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Registry over the default simulated units, already enumerated.
#[allow(dead_code)]
pub fn registry() -> (LabBrick, SimulatedBus) {
    registry_with(Config::test_mode())
}

#[allow(dead_code)]
pub fn registry_with(config: Config) -> (LabBrick, SimulatedBus) {
    init_tracing();
    let bus = SimulatedBus::with_default_devices();
    let lab = LabBrick::with_simulated_bus(config, bus.clone()).expect("valid config");
    lab.enumerate().expect("simulated enumeration");
    (lab, bus)
}

/// Registry with one unit initialised.
#[allow(dead_code)]
pub async fn opened(id: DeviceId) -> (LabBrick, SimulatedBus) {
    let (lab, bus) = registry();
    lab.init_device(id).await.expect("init simulated device");
    (lab, bus)
}
