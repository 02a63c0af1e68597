//! USB device controller abstraction
//!
//! The session talks to the controller only through [`UdcDriver`]. Methods are
//! synchronous and must not block for long: they are called from the bus event
//! path as well as from the deferred binder.

use serde::Serialize;

use super::descriptor::EndpointDescriptor;
use super::setup::ControlRequest;
use super::transfer::{PendingTransfer, Submission};
use crate::error::Result;

/// Endpoint capability bits reported by the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EndpointCaps {
    pub type_control: bool,
    pub type_iso: bool,
    pub type_bulk: bool,
    pub type_int: bool,
    pub dir_in: bool,
    pub dir_out: bool,
}

/// One endpoint as enumerated by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointInfo {
    pub name: String,
    /// Hardware address, `None` when the controller assigns it on enable
    pub address: Option<u8>,
    pub caps: EndpointCaps,
    pub max_packet_limit: u16,
}

impl EndpointInfo {
    pub fn can_interrupt_in(&self) -> bool {
        self.caps.type_int && self.caps.dir_in
    }

    /// Whether the controller can enable this endpoint with `descriptor`
    ///
    /// Endpoints without a fixed address take whatever the descriptor says.
    pub fn accepts(&self, descriptor: &EndpointDescriptor) -> bool {
        match self.address {
            Some(addr) => addr & 0x0f == descriptor.b_endpoint_address & 0x0f,
            None => true,
        }
    }
}

/// Controller-side handle of an enabled endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EndpointHandle(pub u16);

/// Endpoint bound to the session with its attached descriptor
#[derive(Debug, Clone)]
pub struct BoundEndpoint {
    pub info: EndpointInfo,
    pub descriptor: EndpointDescriptor,
    pub handle: EndpointHandle,
}

/// Reply queued on the control endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ep0Reply<'a> {
    /// IN data stage. `zero` is set when the reply is shorter than wLength;
    /// the controller follows with a ZLP if the length is also a multiple of
    /// the max packet size.
    Data { bytes: &'a [u8], zero: bool },
    /// Status-only acknowledgement, reading `length` bytes of OUT data first
    Ack { length: u16 },
}

impl Ep0Reply<'_> {
    pub fn len(&self) -> usize {
        match self {
            Self::Data { bytes, .. } => bytes.len(),
            Self::Ack { .. } => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a zero-length packet must terminate the data stage
    pub fn needs_zlp(&self, max_packet: usize) -> bool {
        match self {
            Self::Data { bytes, zero } => {
                *zero && max_packet > 0 && bytes.len() % max_packet == 0
            }
            Self::Ack { .. } => false,
        }
    }
}

/// Events delivered by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Connect,
    Control(ControlRequest),
    Suspend,
    Resume,
    Reset,
    Disconnect,
}

/// USB device controller driver
pub trait UdcDriver: Send + Sync {
    /// Controller name for logging
    fn name(&self) -> &str;

    /// Enumerated endpoint list, control endpoint excluded
    fn endpoints(&self) -> Vec<EndpointInfo>;

    /// Enable an endpoint with the given descriptor
    fn enable(&self, endpoint: &EndpointInfo, descriptor: &EndpointDescriptor)
        -> Result<EndpointHandle>;

    /// Disable a previously enabled endpoint; in-flight transfers complete with shutdown
    fn disable(&self, handle: EndpointHandle) -> Result<()>;

    /// Submit a transfer for asynchronous delivery
    fn queue(&self, transfer: PendingTransfer) -> Submission;

    /// Queue a reply on the control endpoint
    fn ep0_queue(&self, reply: Ep0Reply<'_>) -> Result<()>;

    /// Stall the control endpoint
    fn ep0_stall(&self) -> Result<()>;

    /// Called when the host selects the configuration
    fn set_configured(&self) -> Result<()> {
        Ok(())
    }
}
