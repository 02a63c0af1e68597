//! Control request model and dispatcher
//!
//! The dispatcher answers every control transfer synchronously. It never
//! blocks: SET_CONFIGURATION only schedules the endpoint binder.

use std::sync::Arc;
use tracing::{debug, trace};

use super::descriptor::{
    CONFIG_VALUE, HID_DT_REPORT, USB_DT_CONFIG, USB_DT_DEVICE, USB_DT_STRING,
};
use super::session::SessionShared;
use super::udc::Ep0Reply;
use crate::error::{AppError, Result};

pub const USB_DIR_IN: u8 = 0x80;
pub const USB_TYPE_MASK: u8 = 0x60;
pub const USB_TYPE_STANDARD: u8 = 0x00;
pub const USB_TYPE_CLASS: u8 = 0x20;
pub const USB_RECIP_MASK: u8 = 0x1f;
pub const USB_RECIP_DEVICE: u8 = 0x00;
pub const USB_RECIP_INTERFACE: u8 = 0x01;

pub const USB_REQ_GET_DESCRIPTOR: u8 = 0x06;
pub const USB_REQ_SET_CONFIGURATION: u8 = 0x09;

pub const HID_REQ_SET_REPORT: u8 = 0x09;
pub const HID_REQ_SET_IDLE: u8 = 0x0A;
pub const HID_REQ_SET_PROTOCOL: u8 = 0x0B;

const STANDARD_IN_DEVICE: u8 = USB_DIR_IN | USB_TYPE_STANDARD | USB_RECIP_DEVICE;
const STANDARD_IN_INTERFACE: u8 = USB_DIR_IN | USB_TYPE_STANDARD | USB_RECIP_INTERFACE;
const STANDARD_OUT_DEVICE: u8 = USB_TYPE_STANDARD | USB_RECIP_DEVICE;
const CLASS_OUT_INTERFACE: u8 = USB_TYPE_CLASS | USB_RECIP_INTERFACE;

/// Size of the control endpoint buffer
pub const EP0_BUFFER_SIZE: usize = 256;

/// SETUP packet of a control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl ControlRequest {
    /// Parse the 8-byte wire format (little-endian words)
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let b: &[u8; 8] = bytes.get(..8)?.try_into().ok()?;
        Some(Self {
            request_type: b[0],
            request: b[1],
            value: u16::from_le_bytes([b[2], b[3]]),
            index: u16::from_le_bytes([b[4], b[5]]),
            length: u16::from_le_bytes([b[6], b[7]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let v = self.value.to_le_bytes();
        let i = self.index.to_le_bytes();
        let l = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            v[0],
            v[1],
            i[0],
            i[1],
            l[0],
            l[1],
        ]
    }

    pub fn is_in(&self) -> bool {
        self.request_type & USB_DIR_IN != 0
    }

    /// Descriptor type of a GET_DESCRIPTOR request
    pub fn descriptor_type(&self) -> u8 {
        (self.value >> 8) as u8
    }

    /// Descriptor index of a GET_DESCRIPTOR request
    pub fn descriptor_index(&self) -> u8 {
        (self.value & 0xff) as u8
    }

    pub fn get_descriptor(descriptor_type: u8, index: u8, length: u16) -> Self {
        Self {
            request_type: STANDARD_IN_DEVICE,
            request: USB_REQ_GET_DESCRIPTOR,
            value: ((descriptor_type as u16) << 8) | index as u16,
            index: if descriptor_type == USB_DT_STRING && index != 0 {
                super::descriptor::LANG_ID_EN_US
            } else {
                0
            },
            length,
        }
    }

    pub fn get_report_descriptor(interface: u16, length: u16) -> Self {
        Self {
            request_type: STANDARD_IN_INTERFACE,
            request: USB_REQ_GET_DESCRIPTOR,
            value: (HID_DT_REPORT as u16) << 8,
            index: interface,
            length,
        }
    }

    pub fn set_configuration(value: u16) -> Self {
        Self {
            request_type: STANDARD_OUT_DEVICE,
            request: USB_REQ_SET_CONFIGURATION,
            value,
            index: 0,
            length: 0,
        }
    }

    /// HID class request to interface 0
    pub fn hid_class(request: u8, value: u16, length: u16) -> Self {
        Self {
            request_type: CLASS_OUT_INTERFACE,
            request,
            value,
            index: 0,
            length,
        }
    }
}

fn not_supported(ctrl: &ControlRequest) -> AppError {
    AppError::NotSupported {
        request_type: ctrl.request_type,
        request: ctrl.request,
    }
}

/// Answer one control request
///
/// Returns the number of data bytes queued on the control endpoint (0 for a
/// status-only acknowledgement). An error means nothing was queued and the
/// caller must stall the pipe.
pub fn dispatch(session: &Arc<SessionShared>, ctrl: &ControlRequest) -> Result<usize> {
    debug!(
        "ctrl: type={:#04x} req={:#04x} value={:#06x} index={:#06x} len={}",
        ctrl.request_type, ctrl.request, ctrl.value, ctrl.index, ctrl.length
    );

    let descriptors = &session.descriptors;
    let mut buf = session.ep0_buf.lock();
    buf.clear();

    match (ctrl.request_type, ctrl.request) {
        (STANDARD_IN_DEVICE, USB_REQ_GET_DESCRIPTOR) => match ctrl.descriptor_type() {
            USB_DT_DEVICE => buf.extend_from_slice(descriptors.device()),
            USB_DT_CONFIG => buf.extend_from_slice(descriptors.configuration()),
            USB_DT_STRING => {
                descriptors.write_string(ctrl.descriptor_index(), &mut buf)?;
            }
            _ => return Err(not_supported(ctrl)),
        },

        (STANDARD_IN_INTERFACE, USB_REQ_GET_DESCRIPTOR)
            if ctrl.descriptor_type() == HID_DT_REPORT =>
        {
            buf.extend_from_slice(descriptors.hid_report())
        }

        (STANDARD_OUT_DEVICE, USB_REQ_SET_CONFIGURATION) if ctrl.value == CONFIG_VALUE as u16 => {
            session.bus.set_configured()?;
            session.bus.ep0_queue(Ep0Reply::Ack { length: 0 })?;
            session.begin_configuration();
            return Ok(0);
        }

        (CLASS_OUT_INTERFACE, HID_REQ_SET_IDLE | HID_REQ_SET_PROTOCOL | HID_REQ_SET_REPORT) => {
            trace!("HID class request {:#04x} acknowledged", ctrl.request);
            session.bus.ep0_queue(Ep0Reply::Ack {
                length: ctrl.length,
            })?;
            return Ok(0);
        }

        _ => return Err(not_supported(ctrl)),
    }

    buf.truncate(EP0_BUFFER_SIZE);
    let len = buf.len().min(ctrl.length as usize);
    let zero = len < ctrl.length as usize;
    session.bus.ep0_queue(Ep0Reply::Data {
        bytes: &buf[..len],
        zero,
    })?;

    Ok(len)
}
