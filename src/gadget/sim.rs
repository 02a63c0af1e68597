//! In-memory USB device controller
//!
//! Used by the test suite and by `--simulate`, where a scripted host
//! enumeration drives the session without gadget hardware.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use super::descriptor::{
    EndpointDescriptor, HID_DT_REPORT, USB_DT_CONFIG, USB_DT_DEVICE, USB_DT_STRING,
};
use super::setup::{ControlRequest, HID_REQ_SET_IDLE, HID_REQ_SET_PROTOCOL};
use super::transfer::{CompletionStatus, PendingTransfer, Submission};
use super::udc::{BusEvent, EndpointCaps, EndpointHandle, EndpointInfo, Ep0Reply, UdcDriver};
use crate::error::{AppError, Result};

/// A reply the dispatcher queued on ep0
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ep0Record {
    Data { bytes: Vec<u8>, zero: bool },
    Ack { length: u16 },
}

#[derive(Default)]
struct SimState {
    enabled: Vec<(EndpointHandle, String, EndpointDescriptor)>,
    next_handle: u16,
    enable_calls: usize,
    disable_calls: usize,
    ep0: Vec<Ep0Record>,
    stalls: usize,
    configured: bool,
    reports: Vec<Vec<u8>>,
    held: Vec<PendingTransfer>,
}

/// Simulated controller
pub struct SimulatedUdc {
    name: String,
    endpoints: Vec<EndpointInfo>,
    state: Mutex<SimState>,
    fail_enable: AtomicBool,
    reject_queue: AtomicBool,
    hold_completions: AtomicBool,
}

fn caps(type_int: bool, type_bulk: bool, dir_in: bool) -> EndpointCaps {
    EndpointCaps {
        type_int,
        type_bulk,
        dir_in,
        dir_out: !dir_in,
        ..Default::default()
    }
}

impl SimulatedUdc {
    pub fn with_endpoints(endpoints: Vec<EndpointInfo>) -> Self {
        Self {
            name: "sim_udc.0".to_string(),
            endpoints,
            state: Mutex::new(SimState {
                next_handle: 1,
                ..Default::default()
            }),
            fail_enable: AtomicBool::new(false),
            reject_queue: AtomicBool::new(false),
            hold_completions: AtomicBool::new(false),
        }
    }

    /// Fixed-address endpoints first, then ones the controller addresses on enable
    pub fn default_endpoints() -> Vec<EndpointInfo> {
        let ep = |name: &str, address: Option<u8>, caps: EndpointCaps| EndpointInfo {
            name: name.to_string(),
            address,
            caps,
            max_packet_limit: 512,
        };
        vec![
            ep("ep1in-bulk", Some(1), caps(false, true, true)),
            ep("ep2out-bulk", Some(2), caps(false, true, false)),
            ep("ep3in-int", Some(3), caps(true, false, true)),
            ep("ep-a", None, caps(true, false, true)),
            ep("ep-b", None, caps(true, false, true)),
        ]
    }

    /// Requests a host issues while enumerating the keyboard
    pub fn enumeration_script() -> Vec<BusEvent> {
        vec![
            BusEvent::Connect,
            BusEvent::Control(ControlRequest::get_descriptor(USB_DT_DEVICE, 0, 64)),
            BusEvent::Control(ControlRequest::get_descriptor(USB_DT_DEVICE, 0, 18)),
            BusEvent::Control(ControlRequest::get_descriptor(USB_DT_CONFIG, 0, 9)),
            BusEvent::Control(ControlRequest::get_descriptor(USB_DT_CONFIG, 0, 0xFF)),
            BusEvent::Control(ControlRequest::get_descriptor(USB_DT_STRING, 0, 0xFF)),
            BusEvent::Control(ControlRequest::get_descriptor(USB_DT_STRING, 2, 0xFF)),
            BusEvent::Control(ControlRequest::get_descriptor(USB_DT_STRING, 1, 0xFF)),
            BusEvent::Control(ControlRequest::get_descriptor(USB_DT_STRING, 3, 0xFF)),
            BusEvent::Control(ControlRequest::set_configuration(1)),
            BusEvent::Control(ControlRequest::hid_class(HID_REQ_SET_IDLE, 0, 0)),
            BusEvent::Control(ControlRequest::get_report_descriptor(0, 0xFF)),
            BusEvent::Control(ControlRequest::hid_class(HID_REQ_SET_PROTOCOL, 0, 0)),
        ]
    }

    pub fn set_fail_enable(&self, fail: bool) {
        self.fail_enable.store(fail, Ordering::SeqCst);
    }

    pub fn set_reject_queue(&self, reject: bool) {
        self.reject_queue.store(reject, Ordering::SeqCst);
    }

    /// Keep queued transfers in flight until [`Self::complete_held`]
    pub fn set_hold_completions(&self, hold: bool) {
        self.hold_completions.store(hold, Ordering::SeqCst);
    }

    /// Complete every held transfer as delivered
    pub fn complete_held(&self) -> usize {
        let held = std::mem::take(&mut self.state.lock().held);
        let count = held.len();
        for transfer in held {
            let actual = transfer.buffer().len();
            transfer.complete(CompletionStatus::Completed { actual });
        }
        count
    }

    /// Reports accepted on the interrupt endpoint, in order
    pub fn reports(&self) -> Vec<Vec<u8>> {
        self.state.lock().reports.clone()
    }

    pub fn ep0_log(&self) -> Vec<Ep0Record> {
        self.state.lock().ep0.clone()
    }

    pub fn last_ep0(&self) -> Option<Ep0Record> {
        self.state.lock().ep0.last().cloned()
    }

    pub fn stall_count(&self) -> usize {
        self.state.lock().stalls
    }

    pub fn is_configured(&self) -> bool {
        self.state.lock().configured
    }

    pub fn enabled_endpoints(&self) -> Vec<EndpointHandle> {
        self.state.lock().enabled.iter().map(|(h, ..)| *h).collect()
    }

    /// Descriptors the enabled endpoints were configured with
    pub fn enabled_descriptors(&self) -> Vec<EndpointDescriptor> {
        self.state.lock().enabled.iter().map(|(.., d)| *d).collect()
    }

    pub fn is_enabled(&self, handle: EndpointHandle) -> bool {
        self.state.lock().enabled.iter().any(|(h, ..)| *h == handle)
    }

    pub fn enable_calls(&self) -> usize {
        self.state.lock().enable_calls
    }

    pub fn disable_calls(&self) -> usize {
        self.state.lock().disable_calls
    }
}

impl Default for SimulatedUdc {
    fn default() -> Self {
        Self::with_endpoints(Self::default_endpoints())
    }
}

impl UdcDriver for SimulatedUdc {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoints(&self) -> Vec<EndpointInfo> {
        self.endpoints.clone()
    }

    fn enable(
        &self,
        endpoint: &EndpointInfo,
        descriptor: &EndpointDescriptor,
    ) -> Result<EndpointHandle> {
        let mut state = self.state.lock();
        state.enable_calls += 1;

        if self.fail_enable.load(Ordering::SeqCst) {
            return Err(AppError::Bus(format!("{}: enable rejected", endpoint.name)));
        }
        if state.enabled.iter().any(|(_, name, _)| *name == endpoint.name) {
            return Err(AppError::Bus(format!("{}: already enabled", endpoint.name)));
        }
        if !endpoint.accepts(descriptor) {
            return Err(AppError::Bus(format!(
                "{}: fixed address cannot take {:#04x}",
                endpoint.name, descriptor.b_endpoint_address
            )));
        }

        let handle = EndpointHandle(state.next_handle);
        state.next_handle += 1;
        state.enabled.push((handle, endpoint.name.clone(), *descriptor));
        debug!(
            "sim: enabled {} as {:?} (addr {:#04x})",
            endpoint.name, handle, descriptor.b_endpoint_address
        );
        Ok(handle)
    }

    fn disable(&self, handle: EndpointHandle) -> Result<()> {
        let flushed = {
            let mut state = self.state.lock();
            state.disable_calls += 1;
            let before = state.enabled.len();
            state.enabled.retain(|(h, ..)| *h != handle);
            if state.enabled.len() == before {
                return Err(AppError::Bus(format!("{:?} not enabled", handle)));
            }
            let (flushed, kept) = std::mem::take(&mut state.held)
                .into_iter()
                .partition::<Vec<_>, _>(|t| t.endpoint() == handle);
            state.held = kept;
            flushed
        };

        for transfer in flushed {
            transfer.complete(CompletionStatus::Shutdown);
        }
        Ok(())
    }

    fn queue(&self, transfer: PendingTransfer) -> Submission {
        if self.reject_queue.load(Ordering::SeqCst) {
            return Submission::rejected(transfer, AppError::Bus("queue rejected".to_string()));
        }

        let mut state = self.state.lock();
        if !state.enabled.iter().any(|(h, ..)| *h == transfer.endpoint()) {
            drop(state);
            return Submission::rejected(transfer, AppError::Bus("endpoint not enabled".to_string()));
        }

        debug!("sim: report {:02x?}", transfer.buffer());
        state.reports.push(transfer.buffer().to_vec());

        if self.hold_completions.load(Ordering::SeqCst) {
            state.held.push(transfer);
        } else {
            drop(state);
            let actual = transfer.buffer().len();
            transfer.complete(CompletionStatus::Completed { actual });
        }
        Submission::Queued
    }

    fn ep0_queue(&self, reply: Ep0Reply<'_>) -> Result<()> {
        let record = match reply {
            Ep0Reply::Data { bytes, zero } => Ep0Record::Data {
                bytes: bytes.to_vec(),
                zero,
            },
            Ep0Reply::Ack { length } => Ep0Record::Ack { length },
        };
        self.state.lock().ep0.push(record);
        Ok(())
    }

    fn ep0_stall(&self) -> Result<()> {
        self.state.lock().stalls += 1;
        Ok(())
    }

    fn set_configured(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.configured {
            info!("sim: host configured the device");
        }
        state.configured = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::transfer::TransferPool;

    #[test]
    fn test_queue_requires_enabled_endpoint() {
        let udc = SimulatedUdc::default();
        let pool = TransferPool::new(4);

        let transfer = pool
            .allocate(EndpointHandle(9), &[0; 8], Box::new(|_| {}))
            .unwrap();
        assert!(matches!(udc.queue(transfer), Submission::Rejected { .. }));
        assert!(udc.reports().is_empty());
    }

    #[test]
    fn test_disable_flushes_held_transfers() {
        let udc = SimulatedUdc::default();
        let eps = udc.endpoints();
        let handle = udc
            .enable(&eps[3], &EndpointDescriptor::hid_interrupt_in())
            .unwrap();
        udc.set_hold_completions(true);

        let pool = TransferPool::new(4);
        let status = std::sync::Arc::new(Mutex::new(None));
        let s = status.clone();
        let transfer = pool
            .allocate(
                handle,
                &[0; 8],
                Box::new(move |st| *s.lock() = Some(st.clone())),
            )
            .unwrap();
        assert!(matches!(udc.queue(transfer), Submission::Queued));
        assert_eq!(pool.outstanding(), 1);

        udc.disable(handle).unwrap();
        assert_eq!(*status.lock(), Some(CompletionStatus::Shutdown));
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_enable_rejects_conflicting_address() {
        let udc = SimulatedUdc::default();
        let eps = udc.endpoints();
        let err = udc
            .enable(&eps[2], &EndpointDescriptor::hid_interrupt_in())
            .unwrap_err();
        assert!(matches!(err, AppError::Bus(_)));
        assert!(udc.enabled_endpoints().is_empty());
    }

    #[test]
    fn test_enumeration_script_ends_configured() {
        let script = SimulatedUdc::enumeration_script();
        assert!(script.contains(&BusEvent::Control(ControlRequest::set_configuration(1))));
        assert!(script.iter().any(|e| matches!(
            e,
            BusEvent::Control(c) if c.descriptor_type() == HID_DT_REPORT
        )));
    }
}
