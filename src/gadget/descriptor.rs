//! USB descriptor table
//!
//! Device, configuration, HID report and string descriptors in the exact
//! byte layout the host reads during enumeration. The configuration blob is
//! a compile-time constant; only the device descriptor and string table
//! depend on the configured identity, and both are fixed once built.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use super::report_desc;
use crate::error::{AppError, Result};

pub const USB_DT_DEVICE: u8 = 0x01;
pub const USB_DT_CONFIG: u8 = 0x02;
pub const USB_DT_STRING: u8 = 0x03;
pub const USB_DT_INTERFACE: u8 = 0x04;
pub const USB_DT_ENDPOINT: u8 = 0x05;
pub const HID_DT_HID: u8 = 0x21;
pub const HID_DT_REPORT: u8 = 0x22;

pub const USB_CLASS_HID: u8 = 0x03;
pub const USB_ENDPOINT_XFER_INT: u8 = 0x03;
pub const USB_DIR_IN: u8 = 0x80;

/// Language ID returned for string index 0 (English, United States)
pub const LANG_ID_EN_US: u16 = 0x0409;
/// Control endpoint max packet size
pub const EP0_MAX_PACKET: u8 = 64;
/// Largest string descriptor we will build (bLength is a single byte, keep it even)
pub const MAX_STRING_DESC_LEN: usize = 254;

/// Value of the single configuration
pub const CONFIG_VALUE: u8 = 1;
/// Interrupt-IN endpoint address declared to the host
pub const HID_EP_ADDRESS: u8 = USB_DIR_IN | 0x01;
/// Interrupt-IN max packet size (one keyboard report)
pub const HID_EP_MAX_PACKET: u16 = report_desc::KEYBOARD_REPORT_LEN as u16;
/// Interrupt-IN polling interval (frames)
pub const HID_EP_INTERVAL: u8 = 1;

pub const STRING_MANUFACTURER: u8 = 1;
pub const STRING_PRODUCT: u8 = 2;
pub const STRING_SERIAL: u8 = 3;

const REPORT_DESC_LEN: usize = report_desc::KEYBOARD.len();

/// Total length of the configuration blob (config + interface + HID + endpoint)
pub const CONFIG_TOTAL_LEN: usize = 9 + 9 + 9 + 7;
/// Offset of the endpoint sub-descriptor inside the configuration blob
pub const ENDPOINT_DESC_OFFSET: usize = 27;

/// Raw configuration descriptor
pub const CONFIGURATION: [u8; CONFIG_TOTAL_LEN] = [
    // Configuration
    0x09,
    USB_DT_CONFIG,
    CONFIG_TOTAL_LEN as u8,
    (CONFIG_TOTAL_LEN >> 8) as u8,
    0x01, // bNumInterfaces
    CONFIG_VALUE,
    0x00, // iConfiguration
    0x80, // bmAttributes: bus powered
    0x32, // bMaxPower: 100mA
    // Interface
    0x09,
    USB_DT_INTERFACE,
    0x00, // bInterfaceNumber
    0x00, // bAlternateSetting
    0x01, // bNumEndpoints
    USB_CLASS_HID,
    0x01, // bInterfaceSubClass: boot
    0x01, // bInterfaceProtocol: keyboard
    0x00, // iInterface
    // HID
    0x09,
    HID_DT_HID,
    0x11,
    0x01, // bcdHID 1.11
    0x00, // bCountryCode
    0x01, // bNumDescriptors
    HID_DT_REPORT,
    REPORT_DESC_LEN as u8,
    (REPORT_DESC_LEN >> 8) as u8,
    // Endpoint
    0x07,
    USB_DT_ENDPOINT,
    HID_EP_ADDRESS,
    USB_ENDPOINT_XFER_INT,
    HID_EP_MAX_PACKET as u8,
    (HID_EP_MAX_PACKET >> 8) as u8,
    HID_EP_INTERVAL,
];

/// Standard device descriptor (18 bytes, little-endian multi-byte fields)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DeviceDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub bcd_usb: u16,
    pub b_device_class: u8,
    pub b_device_sub_class: u8,
    pub b_device_protocol: u8,
    pub b_max_packet_size0: u8,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub i_manufacturer: u8,
    pub i_product: u8,
    pub i_serial_number: u8,
    pub b_num_configurations: u8,
}

impl DeviceDescriptor {
    pub fn new(vendor_id: u16, product_id: u16, bcd_device: u16) -> Self {
        Self {
            b_length: std::mem::size_of::<Self>() as u8,
            b_descriptor_type: USB_DT_DEVICE,
            bcd_usb: 0x0200u16.to_le(),
            // Class is declared per interface
            b_device_class: 0,
            b_device_sub_class: 0,
            b_device_protocol: 0,
            b_max_packet_size0: EP0_MAX_PACKET,
            id_vendor: vendor_id.to_le(),
            id_product: product_id.to_le(),
            bcd_device: bcd_device.to_le(),
            i_manufacturer: STRING_MANUFACTURER,
            i_product: STRING_PRODUCT,
            i_serial_number: STRING_SERIAL,
            b_num_configurations: 1,
        }
    }
}

/// Standard endpoint descriptor (7 bytes)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct EndpointDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_endpoint_address: u8,
    pub bm_attributes: u8,
    pub w_max_packet_size: u16,
    pub b_interval: u8,
}

impl EndpointDescriptor {
    /// The fixed interrupt-IN endpoint of the keyboard interface
    pub const fn hid_interrupt_in() -> Self {
        Self {
            b_length: 7,
            b_descriptor_type: USB_DT_ENDPOINT,
            b_endpoint_address: HID_EP_ADDRESS,
            bm_attributes: USB_ENDPOINT_XFER_INT,
            w_max_packet_size: HID_EP_MAX_PACKET.to_le(),
            b_interval: HID_EP_INTERVAL,
        }
    }

    pub fn max_packet_size(&self) -> u16 {
        u16::from_le(self.w_max_packet_size)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Identity presented to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GadgetIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
}

impl Default for GadgetIdentity {
    fn default() -> Self {
        Self {
            vendor_id: 0x1d6b,  // Linux Foundation
            product_id: 0x0137, // Multifunction Composite Gadget
            bcd_device: 0x0100,
            manufacturer: "HID Injector".to_string(),
            product: "HID Injector Gadget".to_string(),
            serial_number: "0123456789".to_string(),
        }
    }
}

/// Immutable descriptor set, built once at startup and shared by every session
#[derive(Debug, Clone)]
pub struct DescriptorSet {
    device: DeviceDescriptor,
    /// String table, index 0 here is string index 1 on the wire
    strings: Vec<String>,
}

impl DescriptorSet {
    pub fn new(identity: &GadgetIdentity) -> Self {
        Self {
            device: DeviceDescriptor::new(
                identity.vendor_id,
                identity.product_id,
                identity.bcd_device,
            ),
            strings: vec![
                identity.manufacturer.clone(),
                identity.product.clone(),
                identity.serial_number.clone(),
            ],
        }
    }

    pub fn device(&self) -> &[u8] {
        bytemuck::bytes_of(&self.device)
    }

    pub fn configuration(&self) -> &'static [u8] {
        &CONFIGURATION
    }

    pub fn hid_report(&self) -> &'static [u8] {
        report_desc::KEYBOARD
    }

    pub fn endpoint(&self) -> EndpointDescriptor {
        EndpointDescriptor::hid_interrupt_in()
    }

    /// Number of strings, not counting the language ID table
    pub fn string_count(&self) -> usize {
        self.strings.len()
    }

    /// Build string descriptor `index` into `out`, replacing its contents
    ///
    /// Index 0 yields the language ID table. Unknown indices fail with
    /// `InvalidIndex` and leave `out` empty.
    pub fn write_string(&self, index: u8, out: &mut Vec<u8>) -> Result<usize> {
        out.clear();

        if index == 0 {
            out.extend_from_slice(&[4, USB_DT_STRING]);
            out.extend_from_slice(&LANG_ID_EN_US.to_le_bytes());
            return Ok(out.len());
        }

        let text = self
            .strings
            .get(index as usize - 1)
            .ok_or(AppError::InvalidIndex(index))?;

        out.extend_from_slice(&[0, USB_DT_STRING]);
        for unit in text.encode_utf16() {
            if out.len() + 2 > MAX_STRING_DESC_LEN {
                break;
            }
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out[0] = out.len() as u8;

        Ok(out.len())
    }
}

impl Default for DescriptorSet {
    fn default() -> Self {
        Self::new(&GadgetIdentity::default())
    }
}
