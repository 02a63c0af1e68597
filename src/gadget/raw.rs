//! Linux raw-gadget controller backend
//!
//! Drives a UDC through `/dev/raw-gadget`. Bus events are fetched on a
//! dedicated reader thread and forwarded to the async runner; interrupt-IN
//! writes happen on a writer thread, which is where transfer completions run.
//!
//! ESHUTDOWN from a write means the endpoint was disabled under it and is
//! reported as [`CompletionStatus::Shutdown`].

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::descriptor::{EndpointDescriptor, CONFIGURATION};
use super::setup::ControlRequest;
use super::transfer::{CompletionStatus, PendingTransfer, Submission};
use super::udc::{BusEvent, EndpointCaps, EndpointHandle, EndpointInfo, Ep0Reply, UdcDriver};
use crate::error::{AppError, Result};

/// Default character device
pub const RAW_GADGET_PATH: &str = "/dev/raw-gadget";
/// Transfers waiting for the writer thread
pub const WRITE_QUEUE_DEPTH: usize = 32;

const UDC_NAME_LENGTH_MAX: usize = 128;
const USB_RAW_EPS_NUM_MAX: usize = 30;
const USB_RAW_EP_NAME_MAX: usize = 16;
const USB_RAW_EP_ADDR_ANY: u32 = 0xff;
const USB_RAW_IO_FLAGS_ZERO: u16 = 0x0001;
const USB_SPEED_HIGH: u8 = 3;
const EVENT_DATA_MAX: usize = 64;
const EP0_IO_MAX: usize = 256;
const CONFIG_MAX_POWER_OFFSET: usize = 8;

const USB_RAW_EVENT_CONNECT: u32 = 1;
const USB_RAW_EVENT_CONTROL: u32 = 2;
const USB_RAW_EVENT_SUSPEND: u32 = 3;
const USB_RAW_EVENT_RESUME: u32 = 4;
const USB_RAW_EVENT_RESET: u32 = 5;
const USB_RAW_EVENT_DISCONNECT: u32 = 6;

#[repr(C)]
struct RawInit {
    driver_name: [u8; UDC_NAME_LENGTH_MAX],
    device_name: [u8; UDC_NAME_LENGTH_MAX],
    speed: u8,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct RawEventHeader {
    kind: u32,
    length: u32,
}

#[repr(C)]
struct RawEvent {
    header: RawEventHeader,
    data: [u8; EVENT_DATA_MAX],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct RawEpIoHeader {
    ep: u16,
    flags: u16,
    length: u32,
}

#[repr(C)]
struct RawEpIo<const N: usize> {
    header: RawEpIoHeader,
    data: [u8; N],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct RawEpInfo {
    name: [u8; USB_RAW_EP_NAME_MAX],
    addr: u32,
    caps: u32,
    maxpacket_limit: u16,
    max_streams: u16,
    reserved: u32,
}

#[repr(C)]
struct RawEpsInfo {
    eps: [RawEpInfo; USB_RAW_EPS_NUM_MAX],
}

/// Kernel endpoint descriptor layout, audio fields included
type KernelEndpointDescriptor = [u8; 9];

mod ioctl {
    use super::*;

    nix::ioctl_write_ptr!(init, b'U', 0, RawInit);
    nix::ioctl_none!(run, b'U', 1);
    nix::ioctl_read!(event_fetch, b'U', 2, RawEventHeader);
    nix::ioctl_write_ptr!(ep0_write, b'U', 3, RawEpIoHeader);
    nix::ioctl_readwrite!(ep0_read, b'U', 4, RawEpIoHeader);
    nix::ioctl_write_ptr!(ep_enable, b'U', 5, KernelEndpointDescriptor);
    nix::ioctl_write_int!(ep_disable, b'U', 6);
    nix::ioctl_write_ptr!(ep_write, b'U', 7, RawEpIoHeader);
    nix::ioctl_none!(configure, b'U', 9);
    nix::ioctl_write_int!(vbus_draw, b'U', 10);
    nix::ioctl_read!(eps_info, b'U', 11, RawEpsInfo);
    nix::ioctl_none!(ep0_stall, b'U', 12);
}

fn copy_name(dst: &mut [u8; UDC_NAME_LENGTH_MAX], name: &str) -> Result<()> {
    let bytes = name.as_bytes();
    if bytes.len() >= UDC_NAME_LENGTH_MAX {
        return Err(AppError::Config(format!("UDC name too long: {}", name)));
    }
    dst[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn caps_from_bits(bits: u32) -> EndpointCaps {
    EndpointCaps {
        type_control: bits & (1 << 0) != 0,
        type_iso: bits & (1 << 1) != 0,
        type_bulk: bits & (1 << 2) != 0,
        type_int: bits & (1 << 3) != 0,
        dir_in: bits & (1 << 4) != 0,
        dir_out: bits & (1 << 5) != 0,
    }
}

fn endpoint_from_raw(raw: &RawEpInfo) -> EndpointInfo {
    let name_len = raw.name.iter().position(|&b| b == 0).unwrap_or(raw.name.len());
    EndpointInfo {
        name: String::from_utf8_lossy(&raw.name[..name_len]).to_string(),
        address: if raw.addr == USB_RAW_EP_ADDR_ANY {
            None
        } else {
            Some(raw.addr as u8)
        },
        caps: caps_from_bits(raw.caps),
        max_packet_limit: raw.maxpacket_limit,
    }
}

fn bus_event_from_raw(kind: u32, data: &[u8]) -> Option<BusEvent> {
    match kind {
        USB_RAW_EVENT_CONNECT => Some(BusEvent::Connect),
        USB_RAW_EVENT_CONTROL => ControlRequest::parse(data).map(BusEvent::Control),
        USB_RAW_EVENT_SUSPEND => Some(BusEvent::Suspend),
        USB_RAW_EVENT_RESUME => Some(BusEvent::Resume),
        USB_RAW_EVENT_RESET => Some(BusEvent::Reset),
        USB_RAW_EVENT_DISCONNECT => Some(BusEvent::Disconnect),
        _ => None,
    }
}

/// Find a UDC under `/sys/class/udc`, returning `(driver, device)`
pub fn detect_udc() -> Option<(String, String)> {
    detect_udc_in(Path::new("/sys/class/udc"))
}

fn detect_udc_in(root: &Path) -> Option<(String, String)> {
    let mut devices: Vec<String> = fs::read_dir(root)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    devices.sort();
    let device = devices.into_iter().next()?;

    let driver = fs::read_link(root.join(&device).join("device/driver"))
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| device.clone());
    Some((driver, device))
}

/// Which controller to attach to
#[derive(Debug, Clone)]
pub struct RawGadgetConfig {
    pub path: PathBuf,
    pub driver: String,
    pub device: String,
}

impl RawGadgetConfig {
    /// Fill in the controller from sysfs when not given
    pub fn resolve(path: PathBuf, driver: &str, device: &str) -> Result<Self> {
        if !driver.is_empty() && !device.is_empty() {
            return Ok(Self {
                path,
                driver: driver.to_string(),
                device: device.to_string(),
            });
        }
        let (found_driver, found_device) = detect_udc()
            .ok_or_else(|| AppError::Config("No UDC found in /sys/class/udc".to_string()))?;
        Ok(Self {
            path,
            driver: if driver.is_empty() {
                found_driver
            } else {
                driver.to_string()
            },
            device: if device.is_empty() {
                found_device
            } else {
                device.to_string()
            },
        })
    }
}

struct RawShared {
    file: File,
    name: String,
    enabled: Mutex<HashSet<u16>>,
    stopping: AtomicBool,
}

impl RawShared {
    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn write_transfer(&self, transfer: PendingTransfer) {
        let ep = transfer.endpoint().0;
        if !self.enabled.lock().contains(&ep) {
            transfer.complete(CompletionStatus::Shutdown);
            return;
        }

        let buffer = transfer.buffer();
        let mut io = RawEpIo::<{ EVENT_DATA_MAX }> {
            header: RawEpIoHeader {
                ep,
                flags: 0,
                length: buffer.len().min(EVENT_DATA_MAX) as u32,
            },
            data: [0; EVENT_DATA_MAX],
        };
        io.data[..io.header.length as usize]
            .copy_from_slice(&buffer[..io.header.length as usize]);

        // SAFETY: io outlives the call and starts with the header the ioctl expects
        let result = unsafe {
            ioctl::ep_write(self.fd(), &io as *const RawEpIo<EVENT_DATA_MAX> as *const RawEpIoHeader)
        };
        let status = match result {
            Ok(n) => CompletionStatus::Completed { actual: n as usize },
            Err(nix::errno::Errno::ESHUTDOWN) => CompletionStatus::Shutdown,
            Err(e) => CompletionStatus::Error(e.to_string()),
        };
        trace!("ep{} write: {:?}", ep, status);
        transfer.complete(status);
    }
}

/// raw-gadget backed controller
pub struct RawGadget {
    shared: Arc<RawShared>,
    writer: std_mpsc::SyncSender<PendingTransfer>,
}

impl RawGadget {
    /// Open the device, register with the UDC and start both threads
    ///
    /// Bus events arrive on the returned receiver.
    pub fn open(config: &RawGadgetConfig) -> Result<(Self, mpsc::Receiver<BusEvent>)> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.path)
            .map_err(|e| {
                AppError::Bus(format!("Failed to open {}: {}", config.path.display(), e))
            })?;

        let mut init = RawInit {
            driver_name: [0; UDC_NAME_LENGTH_MAX],
            device_name: [0; UDC_NAME_LENGTH_MAX],
            speed: USB_SPEED_HIGH,
        };
        copy_name(&mut init.driver_name, &config.driver)?;
        copy_name(&mut init.device_name, &config.device)?;

        // SAFETY: init is a fully initialised repr(C) struct
        unsafe { ioctl::init(file.as_raw_fd(), &init) }
            .map_err(|e| AppError::Bus(format!("raw-gadget init: {}", e)))?;
        // SAFETY: no argument
        unsafe { ioctl::run(file.as_raw_fd()) }
            .map_err(|e| AppError::Bus(format!("raw-gadget run: {}", e)))?;

        info!(
            "raw-gadget running on {} ({})",
            config.device, config.driver
        );

        let shared = Arc::new(RawShared {
            file,
            name: config.device.clone(),
            enabled: Mutex::new(HashSet::new()),
            stopping: AtomicBool::new(false),
        });

        let (event_tx, event_rx) = mpsc::channel(super::runner::BUS_EVENT_QUEUE);
        let reader = shared.clone();
        thread::Builder::new()
            .name("raw-gadget-events".to_string())
            .spawn(move || event_loop(reader, event_tx))?;

        let (writer, write_rx) = std_mpsc::sync_channel::<PendingTransfer>(WRITE_QUEUE_DEPTH);
        let write_side = shared.clone();
        thread::Builder::new()
            .name("raw-gadget-writer".to_string())
            .spawn(move || {
                for transfer in write_rx {
                    write_side.write_transfer(transfer);
                }
                debug!("raw-gadget writer stopped");
            })?;

        Ok((Self { shared, writer }, event_rx))
    }

    /// Stop forwarding events; the reader exits after its current fetch
    pub fn stop(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
    }
}

fn event_loop(shared: Arc<RawShared>, tx: mpsc::Sender<BusEvent>) {
    while !shared.stopping.load(Ordering::SeqCst) {
        let mut event = RawEvent {
            header: RawEventHeader {
                kind: 0,
                length: EVENT_DATA_MAX as u32,
            },
            data: [0; EVENT_DATA_MAX],
        };

        // SAFETY: the buffer is RawEvent, whose prefix is the header and whose
        // data capacity matches header.length
        let result = unsafe {
            ioctl::event_fetch(shared.fd(), &mut event as *mut RawEvent as *mut RawEventHeader)
        };
        if let Err(e) = result {
            if e == nix::errno::Errno::EINTR {
                continue;
            }
            warn!("raw-gadget event fetch failed: {}", e);
            break;
        }

        let len = (event.header.length as usize).min(EVENT_DATA_MAX);
        let Some(bus_event) = bus_event_from_raw(event.header.kind, &event.data[..len]) else {
            debug!("Ignoring raw-gadget event type {}", event.header.kind);
            continue;
        };
        if tx.blocking_send(bus_event).is_err() {
            break;
        }
    }
    debug!("raw-gadget event reader stopped");
}

impl UdcDriver for RawGadget {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn endpoints(&self) -> Vec<EndpointInfo> {
        let mut info = RawEpsInfo {
            eps: [RawEpInfo {
                name: [0; USB_RAW_EP_NAME_MAX],
                addr: 0,
                caps: 0,
                maxpacket_limit: 0,
                max_streams: 0,
                reserved: 0,
            }; USB_RAW_EPS_NUM_MAX],
        };
        // SAFETY: info is the exact struct the ioctl fills
        match unsafe { ioctl::eps_info(self.shared.fd(), &mut info) } {
            Ok(count) => info
                .eps
                .iter()
                .take((count.max(0) as usize).min(USB_RAW_EPS_NUM_MAX))
                .map(endpoint_from_raw)
                .collect(),
            Err(e) => {
                warn!("raw-gadget eps info failed: {}", e);
                Vec::new()
            }
        }
    }

    fn enable(
        &self,
        endpoint: &EndpointInfo,
        descriptor: &EndpointDescriptor,
    ) -> Result<EndpointHandle> {
        let mut desc: KernelEndpointDescriptor = [0; 9];
        desc[..descriptor.as_bytes().len()].copy_from_slice(descriptor.as_bytes());

        // SAFETY: desc is the 9-byte kernel descriptor layout
        let handle = unsafe { ioctl::ep_enable(self.shared.fd(), &desc) }
            .map_err(|e| AppError::Bus(format!("{}: enable failed: {}", endpoint.name, e)))?;
        let handle = EndpointHandle(handle as u16);
        self.shared.enabled.lock().insert(handle.0);
        debug!("raw-gadget: enabled {} as {:?}", endpoint.name, handle);
        Ok(handle)
    }

    fn disable(&self, handle: EndpointHandle) -> Result<()> {
        self.shared.enabled.lock().remove(&handle.0);
        // SAFETY: integer argument
        unsafe { ioctl::ep_disable(self.shared.fd(), handle.0 as nix::sys::ioctl::ioctl_param_type) }
            .map_err(|e| AppError::Bus(format!("{:?}: disable failed: {}", handle, e)))?;
        Ok(())
    }

    fn queue(&self, transfer: PendingTransfer) -> Submission {
        match self.writer.try_send(transfer) {
            Ok(()) => Submission::Queued,
            Err(std_mpsc::TrySendError::Full(transfer)) => {
                Submission::rejected(transfer, AppError::AllocationFailure)
            }
            Err(std_mpsc::TrySendError::Disconnected(transfer)) => Submission::rejected(
                transfer,
                AppError::Bus("raw-gadget writer stopped".to_string()),
            ),
        }
    }

    fn ep0_queue(&self, reply: Ep0Reply<'_>) -> Result<()> {
        let mut io = RawEpIo::<{ EP0_IO_MAX }> {
            header: RawEpIoHeader {
                ep: 0,
                flags: 0,
                length: 0,
            },
            data: [0; EP0_IO_MAX],
        };

        match reply {
            Ep0Reply::Data { bytes, zero } => {
                let len = bytes.len().min(EP0_IO_MAX);
                io.data[..len].copy_from_slice(&bytes[..len]);
                io.header.length = len as u32;
                if zero {
                    io.header.flags |= USB_RAW_IO_FLAGS_ZERO;
                }
                // SAFETY: io starts with the header and carries `length` bytes
                unsafe {
                    ioctl::ep0_write(
                        self.shared.fd(),
                        &io as *const RawEpIo<EP0_IO_MAX> as *const RawEpIoHeader,
                    )
                }
                .map_err(|e| AppError::Bus(format!("ep0 write: {}", e)))?;
            }
            Ep0Reply::Ack { length } => {
                io.header.length = (length as usize).min(EP0_IO_MAX) as u32;
                // SAFETY: as above, with room for `length` bytes of OUT data
                unsafe {
                    ioctl::ep0_read(
                        self.shared.fd(),
                        &mut io as *mut RawEpIo<EP0_IO_MAX> as *mut RawEpIoHeader,
                    )
                }
                .map_err(|e| AppError::Bus(format!("ep0 read: {}", e)))?;
            }
        }
        Ok(())
    }

    fn ep0_stall(&self) -> Result<()> {
        // SAFETY: no argument
        unsafe { ioctl::ep0_stall(self.shared.fd()) }?;
        Ok(())
    }

    fn set_configured(&self) -> Result<()> {
        let max_power = CONFIGURATION[CONFIG_MAX_POWER_OFFSET];
        // SAFETY: integer argument
        unsafe {
            ioctl::vbus_draw(
                self.shared.fd(),
                max_power as nix::sys::ioctl::ioctl_param_type,
            )
        }?;
        // SAFETY: no argument
        unsafe { ioctl::configure(self.shared.fd()) }?;
        Ok(())
    }
}

impl Drop for RawGadget {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn test_struct_layouts() {
        assert_eq!(std::mem::size_of::<RawInit>(), 257);
        assert_eq!(std::mem::size_of::<RawEventHeader>(), 8);
        assert_eq!(std::mem::size_of::<RawEpIoHeader>(), 8);
        assert_eq!(std::mem::size_of::<RawEpInfo>(), 32);
        assert_eq!(std::mem::size_of::<RawEpsInfo>(), 32 * USB_RAW_EPS_NUM_MAX);
    }

    #[test]
    fn test_endpoint_decoding() {
        let mut name = [0u8; USB_RAW_EP_NAME_MAX];
        name[..6].copy_from_slice(b"ep3in-");
        let raw = RawEpInfo {
            name,
            addr: USB_RAW_EP_ADDR_ANY,
            caps: (1 << 3) | (1 << 4),
            maxpacket_limit: 1024,
            max_streams: 0,
            reserved: 0,
        };
        let info = endpoint_from_raw(&raw);
        assert_eq!(info.name, "ep3in-");
        assert_eq!(info.address, None);
        assert!(info.can_interrupt_in());
        assert_eq!(info.max_packet_limit, 1024);

        let fixed = RawEpInfo { addr: 2, caps: 1 << 2, ..raw };
        let info = endpoint_from_raw(&fixed);
        assert_eq!(info.address, Some(2));
        assert!(info.caps.type_bulk);
        assert!(!info.can_interrupt_in());
    }

    #[test]
    fn test_event_decoding() {
        let setup = [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00];
        match bus_event_from_raw(USB_RAW_EVENT_CONTROL, &setup) {
            Some(BusEvent::Control(ctrl)) => assert_eq!(ctrl.length, 18),
            other => panic!("unexpected {:?}", other),
        }
        assert!(bus_event_from_raw(USB_RAW_EVENT_CONTROL, &setup[..4]).is_none());
        assert_eq!(
            bus_event_from_raw(USB_RAW_EVENT_DISCONNECT, &[]),
            Some(BusEvent::Disconnect)
        );
        assert!(bus_event_from_raw(0, &[]).is_none());
    }

    #[test]
    fn test_detect_udc_from_sysfs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(detect_udc_in(&dir.path().join("missing")).is_none());
        assert!(detect_udc_in(dir.path()).is_none());

        let udc = dir.path().join("dummy_udc.0");
        fs::create_dir_all(udc.join("device")).unwrap();
        assert_eq!(
            detect_udc_in(dir.path()),
            Some(("dummy_udc.0".to_string(), "dummy_udc.0".to_string()))
        );

        let drivers = tempfile::tempdir().unwrap();
        let driver = drivers.path().join("dummy_udc");
        fs::create_dir_all(&driver).unwrap();
        symlink(&driver, udc.join("device/driver")).unwrap();
        assert_eq!(
            detect_udc_in(dir.path()),
            Some(("dummy_udc".to_string(), "dummy_udc.0".to_string()))
        );
    }

    #[test]
    fn test_resolve_keeps_explicit_names() {
        let config =
            RawGadgetConfig::resolve(PathBuf::from(RAW_GADGET_PATH), "dwc2", "fe980000.usb")
                .unwrap();
        assert_eq!(config.driver, "dwc2");
        assert_eq!(config.device, "fe980000.usb");
    }
}
