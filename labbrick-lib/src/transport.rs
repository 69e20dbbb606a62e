//! Transport backends: USB hardware or the simulated bus used in test mode.

use crate::codec::Frame;
use crate::config::TraceLevel;
use crate::error::Result;
use crate::model::DeviceModel;
use crate::sim::{SimLink, SimulatedBus};
use crate::usb::{self, UsbLink};
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Location {
    Usb { bus: u8, address: u8 },
    Simulated,
}

/// One enumerated unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub model: DeviceModel,
    pub serial_number: u32,
    pub location: Location,
}

impl DeviceDescriptor {
    /// Same physical unit, wherever it is plugged in.
    pub fn same_unit(&self, other: &DeviceDescriptor) -> bool {
        self.model == other.model && self.serial_number == other.serial_number
    }
}

pub enum Backend {
    Usb,
    Simulated(SimulatedBus),
}

impl Backend {
    /// Snapshot of the units currently connected.
    pub fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
        match self {
            Backend::Usb => usb::enumerate(),
            Backend::Simulated(bus) => Ok(bus.enumerate()),
        }
    }

    pub fn open(&self, descriptor: &DeviceDescriptor, trace_io: TraceLevel) -> Result<Link> {
        let kind = match self {
            Backend::Usb => LinkKind::Usb(usb::open(descriptor)?),
            Backend::Simulated(bus) => LinkKind::Simulated(bus.open(descriptor)?),
        };
        Ok(Link { kind, trace_io })
    }
}

enum LinkKind {
    Usb(UsbLink),
    Simulated(SimLink),
}

/// An open, half-duplex connection to one unit.
pub struct Link {
    kind: LinkKind,
    trace_io: TraceLevel,
}

impl Link {
    pub async fn write(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.to_bytes();
        dump_frame(self.trace_io, "write", &bytes);
        match &mut self.kind {
            LinkKind::Usb(link) => link.write(&bytes).await,
            LinkKind::Simulated(link) => link.write(&bytes),
        }
    }

    pub async fn read(&mut self) -> Result<Frame> {
        let bytes = match &mut self.kind {
            LinkKind::Usb(link) => link.read().await?,
            LinkKind::Simulated(link) => link.read().await?,
        };
        dump_frame(self.trace_io, "read", &bytes);
        Frame::try_from(bytes.as_slice())
    }

    /// Write `frame` and wait at most `limit` for each half of the exchange.
    pub async fn transact(&mut self, frame: &Frame, limit: Duration) -> Result<Frame> {
        timeout(limit, self.write(frame)).await??;
        let reply = timeout(limit, self.read()).await??;
        Ok(reply)
    }
}

fn dump_frame(level: TraceLevel, direction: &str, bytes: &[u8]) {
    if level == TraceLevel::Off {
        return;
    }
    let bytes = hex::encode(bytes);
    match level {
        TraceLevel::Off => {}
        TraceLevel::Error => error!(%bytes, "Frame {}", direction),
        TraceLevel::Warn => warn!(%bytes, "Frame {}", direction),
        TraceLevel::Info => info!(%bytes, "Frame {}", direction),
        TraceLevel::Debug => debug!(%bytes, "Frame {}", direction),
        TraceLevel::Trace => trace!(%bytes, "Frame {}", direction),
    }
}
