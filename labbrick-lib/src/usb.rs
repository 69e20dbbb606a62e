use crate::constants::{ENDPOINT_IN, ENDPOINT_OUT, INTERFACE, VID};
use crate::error::{LabBrickError, Result};
use crate::model::DeviceModel;
use crate::transport::{DeviceDescriptor, Location};
use nusb::{DeviceInfo, Interface, transfer::RequestBuffer};
use tracing::{debug, info};

// Full-speed interrupt endpoints carry at most 64 bytes per report
const REPORT_SIZE: usize = 64;

pub fn enumerate() -> Result<Vec<DeviceDescriptor>> {
    let mut found = Vec::new();
    for device_info in nusb::list_devices()?.filter(|d| d.vendor_id() == VID) {
        let Some(model) = DeviceModel::from_product_id(device_info.product_id()) else {
            debug!(pid = %format!("{:#06x}", device_info.product_id()), "Skipping unsupported Vaunix product");
            continue;
        };
        found.push(DeviceDescriptor {
            model,
            serial_number: serial_of(&device_info),
            location: Location::Usb {
                bus: device_info.bus_number(),
                address: device_info.device_address(),
            },
        });
    }
    info!("Found {} Lab Brick unit(s) on USB", found.len());
    Ok(found)
}

/// Serial numbers are decimal in the USB string descriptor. Units without one
/// fall back to their bus position.
fn serial_of(device_info: &DeviceInfo) -> u32 {
    device_info
        .serial_number()
        .map(|s| s.trim_start_matches(|c: char| !c.is_ascii_digit()))
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| ((device_info.bus_number() as u32) << 8) | device_info.device_address() as u32)
}

pub fn open(descriptor: &DeviceDescriptor) -> Result<UsbLink> {
    let device_info = nusb::list_devices()?
        .find(|d| {
            d.vendor_id() == VID
                && d.product_id() == descriptor.model.product_id()
                && serial_of(d) == descriptor.serial_number
        })
        .ok_or(LabBrickError::DeviceNotFound)?;

    info!(
        "Opening {} #{} on bus {} addr {}",
        descriptor.model,
        descriptor.serial_number,
        device_info.bus_number(),
        device_info.device_address()
    );
    let device = device_info.open()?;
    let interface = device.detach_and_claim_interface(INTERFACE)?;
    Ok(UsbLink { interface })
}

/// HID interrupt endpoints of one claimed unit.
pub struct UsbLink {
    interface: Interface,
}

impl UsbLink {
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let completion = self.interface.interrupt_out(ENDPOINT_OUT, bytes.to_vec()).await;
        completion.into_result()?;
        Ok(())
    }

    pub async fn read(&mut self) -> Result<Vec<u8>> {
        let completion = self
            .interface
            .interrupt_in(ENDPOINT_IN, RequestBuffer::new(REPORT_SIZE))
            .await;
        Ok(completion.into_result()?)
    }
}
