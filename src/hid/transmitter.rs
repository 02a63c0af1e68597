//! Report transmitter
//!
//! Copies one keyboard report into a fresh transfer and hands it to the
//! controller. The completion handler only releases the transfer.

use std::sync::Arc;
use tracing::{debug, trace};

use super::report::KeyboardReport;
use crate::error::{AppError, Result};
use crate::gadget::session::SessionShared;
use crate::gadget::transfer::{CompletionHandler, CompletionStatus, Submission, TransferPool};
use crate::gadget::udc::{EndpointHandle, UdcDriver};

pub struct ReportTransmitter {
    bus: Arc<dyn UdcDriver>,
    pool: TransferPool,
}

impl ReportTransmitter {
    pub fn new(bus: Arc<dyn UdcDriver>, pool: TransferPool) -> Self {
        Self { bus, pool }
    }

    /// Submit `report` on `endpoint`
    ///
    /// Releases may use the pool's reserved slot. On rejection the transfer
    /// comes back and is freed here; on success it belongs to the controller
    /// until its completion.
    pub fn send(&self, endpoint: EndpointHandle, report: &KeyboardReport) -> Result<()> {
        let on_complete: CompletionHandler = Box::new(|status| match status {
            CompletionStatus::Completed { .. } => {}
            CompletionStatus::Shutdown => trace!("report flushed by endpoint shutdown"),
            CompletionStatus::Error(e) => debug!("report delivery failed: {}", e),
        });
        let bytes = report.to_bytes();
        let transfer = if report.is_release() {
            self.pool.allocate_reserved(endpoint, &bytes, on_complete)?
        } else {
            self.pool.allocate(endpoint, &bytes, on_complete)?
        };

        match self.bus.queue(transfer) {
            Submission::Queued => {
                trace!("report queued: {:02x?}", report.to_bytes());
                Ok(())
            }
            Submission::Rejected { transfer, error } => {
                drop(transfer);
                Err(error)
            }
        }
    }

    /// Transfers not yet released
    pub fn outstanding(&self) -> usize {
        self.pool.outstanding()
    }
}

impl SessionShared {
    /// Send one report on the bound endpoint, or fail with `NotReady`
    ///
    /// The session lock is released before queueing. A disable racing the
    /// submission is settled by the controller, which rejects or flushes it.
    pub fn send_report(&self, report: &KeyboardReport) -> Result<()> {
        let handle = self
            .inner
            .lock()
            .endpoint
            .as_ref()
            .map(|ep| ep.handle)
            .ok_or(AppError::NotReady)?;
        self.transmitter.send(handle, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::session::GadgetSession;
    use crate::gadget::sim::SimulatedUdc;
    use crate::hid::keymap::translate;

    async fn active_session() -> (Arc<SimulatedUdc>, GadgetSession) {
        let udc = Arc::new(SimulatedUdc::default());
        let session = GadgetSession::bind(udc.clone(), Default::default(), Default::default(), None)
            .unwrap();
        session.run_binder().unwrap();
        (udc, session)
    }

    #[tokio::test]
    async fn test_send_requires_active_interface() {
        let udc = Arc::new(SimulatedUdc::default());
        let session = GadgetSession::bind(udc.clone(), Default::default(), Default::default(), None)
            .unwrap();

        let err = session
            .shared()
            .send_report(&KeyboardReport::release())
            .unwrap_err();
        assert!(matches!(err, AppError::NotReady));
        assert!(udc.reports().is_empty());
        assert_eq!(session.shared().outstanding_transfers(), 0);
    }

    #[tokio::test]
    async fn test_send_copies_report() {
        let (udc, session) = active_session().await;
        let report = KeyboardReport::press(translate('a').unwrap());

        session.shared().send_report(&report).unwrap();
        assert_eq!(udc.reports(), vec![vec![0, 0, 0x04, 0, 0, 0, 0, 0]]);
        assert_eq!(session.shared().outstanding_transfers(), 0);
    }

    #[tokio::test]
    async fn test_rejected_submission_frees_transfer() {
        let (udc, session) = active_session().await;
        udc.set_reject_queue(true);

        let err = session
            .shared()
            .send_report(&KeyboardReport::release())
            .unwrap_err();
        assert!(matches!(err, AppError::Bus(_)));
        assert_eq!(session.shared().outstanding_transfers(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_released_on_completion() {
        let (udc, session) = active_session().await;
        udc.set_hold_completions(true);

        session.shared().send_report(&KeyboardReport::release()).unwrap();
        session.shared().send_report(&KeyboardReport::release()).unwrap();
        assert_eq!(session.shared().outstanding_transfers(), 2);

        assert_eq!(udc.complete_held(), 2);
        assert_eq!(session.shared().outstanding_transfers(), 0);
    }

    #[tokio::test]
    async fn test_allocation_failure_when_saturated() {
        let udc = Arc::new(SimulatedUdc::default());
        let options = crate::gadget::session::SessionOptions {
            max_in_flight: 1,
            ..Default::default()
        };
        let session = GadgetSession::bind(udc.clone(), Default::default(), options, None).unwrap();
        session.run_binder().unwrap();
        udc.set_hold_completions(true);

        let press = KeyboardReport::press(translate('a').unwrap());
        session.shared().send_report(&press).unwrap();
        let err = session.shared().send_report(&press).unwrap_err();
        assert!(matches!(err, AppError::AllocationFailure));

        // The release still fits, once
        session.shared().send_report(&KeyboardReport::release()).unwrap();
        let err = session
            .shared()
            .send_report(&KeyboardReport::release())
            .unwrap_err();
        assert!(matches!(err, AppError::AllocationFailure));

        assert_eq!(udc.complete_held(), 2);
        assert!(session.shared().send_report(&press).is_ok());
    }

    #[tokio::test]
    async fn test_send_after_unbind_is_rejected() {
        let (udc, session) = active_session().await;
        let shared = session.shared().clone();
        let handle = shared.endpoint().unwrap().handle;
        session.disconnect().await;

        // A handle taken before the disable is refused by the controller
        let err = shared
            .transmitter
            .send(handle, &KeyboardReport::release())
            .unwrap_err();
        assert!(matches!(err, AppError::Bus(_)));
        assert!(udc.reports().is_empty());
        assert_eq!(shared.outstanding_transfers(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_flushes_in_flight() {
        let (udc, session) = active_session().await;
        udc.set_hold_completions(true);

        session.shared().send_report(&KeyboardReport::release()).unwrap();
        session.disconnect().await;

        assert_eq!(session.shared().outstanding_transfers(), 0);
        assert!(matches!(
            session.shared().send_report(&KeyboardReport::release()),
            Err(AppError::NotReady)
        ));
    }
}
