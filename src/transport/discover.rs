//! USB enumeration and CDC-ACM line-coding setup — the external layer that
//! hands the protocol engine an already-opened endpoint pair. Follows the
//! usual interface-association-descriptor fallback and CDC line-coding
//! control sequence for composite download-mode gadgets.

use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use rusb::{Direction, Recipient, RequestType, TransferType, UsbContext};

use crate::error::{Error, Result};
use crate::transport::{DeviceSession, Flavor};

/// Default Samsung flashing VID/PID.
pub const DEFAULT_VID: u16 = 0x04e8;
pub const DEFAULT_PID: u16 = 0x685d;

const USB_CLASS_COMM: u8 = 0x02;
const USB_CLASS_CDC_DATA: u8 = 0x0a;
const CDC_SUBCLASS_ACM: u8 = 0x02;

const USB_CDC_REQ_SET_LINE_CODING: u8 = 0x20;
const USB_CDC_REQ_SET_CONTROL_LINE_STATE: u8 = 0x22;
const ACM_CTRL_DTR: u16 = 0x1;
const ACM_CTRL_RTS: u16 = 0x2;

/// Criteria for picking a device among several enumerated candidates.
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub busid: Option<String>,
    pub serial: Option<String>,
}

struct Interfaces {
    control: u8,
    data: u8,
    ep_in: u8,
    ep_out: u8,
}

fn find_interfaces(config: &rusb::ConfigDescriptor) -> Option<Interfaces> {
    let mut control = None;
    let mut data = None;
    let mut ep_in = None;
    let mut ep_out = None;

    for iface in config.interfaces() {
        for setting in iface.descriptors() {
            match setting.class_code() {
                USB_CLASS_COMM if setting.sub_class_code() == CDC_SUBCLASS_ACM => {
                    control = Some(setting.interface_number());
                }
                USB_CLASS_CDC_DATA => {
                    data = Some(setting.interface_number());
                    for ep in setting.endpoint_descriptors() {
                        if ep.transfer_type() != TransferType::Bulk {
                            continue;
                        }
                        if ep.direction() == Direction::In {
                            ep_in = Some(ep.address());
                        } else {
                            ep_out = Some(ep.address());
                        }
                    }
                }
                _ => {}
            }
        }
    }

    Some(Interfaces { control: control?, data: data?, ep_in: ep_in?, ep_out: ep_out? })
}

fn matches_filter(device: &rusb::Device<rusb::Context>, filter: &DeviceFilter) -> bool {
    let desc = match device.device_descriptor() {
        Ok(d) => d,
        Err(_) => return false,
    };
    if let Some(vid) = filter.vendor_id {
        if desc.vendor_id() != vid {
            return false;
        }
    }
    if let Some(pid) = filter.product_id {
        if desc.product_id() != pid {
            return false;
        }
    }
    if let Some(busid) = &filter.busid {
        let this = format!("{}-{}", device.bus_number(), device.address());
        if &this != busid {
            return false;
        }
    }
    true
}

/// Programs the CDC-ACM control interface before the handshake: set-control-
/// line-state=0, set-line-coding (9600 8N1), set-control-line-state=DTR|RTS.
fn prepare_acm(handle: &rusb::DeviceHandle<rusb::Context>, control_interface: u8, timeout: Duration) -> Result<()> {
    let request_type = rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface);

    handle
        .write_control(request_type, USB_CDC_REQ_SET_CONTROL_LINE_STATE, 0, control_interface as u16, &[], timeout)
        .map_err(|e| Error::IoError(format!("set-control-line-state(0) failed: {}", e)))?;

    let mut line_coding = [0u8; 7];
    LittleEndian::write_u32(&mut line_coding[0..4], 9600); // dwDTERate
    line_coding[4] = 0; // bCharFormat: 1 stop bit
    line_coding[5] = 0; // bParityType: none
    line_coding[6] = 8; // bDataBits
    handle
        .write_control(request_type, USB_CDC_REQ_SET_LINE_CODING, 0, control_interface as u16, &line_coding, timeout)
        .map_err(|e| Error::IoError(format!("set-line-coding failed: {}", e)))?;

    handle
        .write_control(
            request_type,
            USB_CDC_REQ_SET_CONTROL_LINE_STATE,
            ACM_CTRL_DTR | ACM_CTRL_RTS,
            control_interface as u16,
            &[],
            timeout,
        )
        .map_err(|e| Error::IoError(format!("set-control-line-state(DTR|RTS) failed: {}", e)))?;

    Ok(())
}

/// Opens the first device matching `filter`, claims both its data and
/// CDC-ACM control interfaces, programs line coding on the control interface,
/// and returns a bound [`DeviceSession`] ready for
/// [`crate::session::SessionController::handshake`].
pub fn open(filter: &DeviceFilter, flavor: Flavor, timeout: Duration) -> Result<DeviceSession> {
    let ctx = rusb::Context::new().map_err(|e| Error::IoError(format!("libusb init failed: {}", e)))?;

    for device in ctx.devices().map_err(|e| Error::IoError(e.to_string()))?.iter() {
        if !matches_filter(&device, filter) {
            continue;
        }
        let config = match device.active_config_descriptor() {
            Ok(c) => c,
            Err(_) => continue,
        };
        let ifaces = match find_interfaces(&config) {
            Some(i) => i,
            None => continue,
        };

        let mut handle = device.open().map_err(|e| Error::IoError(format!("opening device: {}", e)))?;

        if let Some(serial) = &filter.serial {
            let desc = device.device_descriptor().map_err(|e| Error::IoError(e.to_string()))?;
            let actual = handle.read_serial_number_string_ascii(&desc).unwrap_or_default();
            if &actual != serial {
                continue;
            }
        }

        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            handle.set_auto_detach_kernel_driver(true).ok();
        }
        handle
            .claim_interface(ifaces.data)
            .map_err(|e| Error::IoError(format!("claiming data interface {}: {}", ifaces.data, e)))?;
        handle.claim_interface(ifaces.control).map_err(|e| {
            let _ = handle.release_interface(ifaces.data);
            Error::IoError(format!("claiming control interface {}: {}", ifaces.control, e))
        })?;

        if let Err(e) = prepare_acm(&handle, ifaces.control, timeout) {
            let _ = handle.release_interface(ifaces.control);
            let _ = handle.release_interface(ifaces.data);
            return Err(e);
        }

        return Ok(DeviceSession::new(handle, ifaces.ep_in, ifaces.ep_out, flavor));
    }

    Err(Error::IoError("no matching Thor/Odin download-mode device found".to_string()))
}
