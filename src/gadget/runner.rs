//! Bus event loop
//!
//! Feeds controller events into the session: control requests go to the
//! dispatcher (stalling ep0 on error), disconnect and reset tear the
//! interface down.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::GadgetSession;
use super::udc::BusEvent;

/// Events that may be buffered between the controller and the session
pub const BUS_EVENT_QUEUE: usize = 64;

/// Counters from one run of the event loop
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunnerStats {
    pub control: usize,
    pub stalled: usize,
    pub disconnects: usize,
}

/// Process bus events until the channel closes or `cancel` fires
pub async fn run_bus_events(
    session: &GadgetSession,
    mut events: mpsc::Receiver<BusEvent>,
    cancel: CancellationToken,
) -> RunnerStats {
    let mut stats = RunnerStats::default();
    let bus = session.shared().bus.clone();

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Bus event loop cancelled");
                break;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    debug!("Bus event source closed");
                    break;
                }
            },
        };

        match event {
            BusEvent::Control(ctrl) => {
                stats.control += 1;
                if let Err(e) = session.setup(&ctrl) {
                    if e.is_protocol_error() {
                        debug!("Stalling ep0: {}", e);
                    } else {
                        warn!("Control request failed, stalling ep0: {}", e);
                    }
                    stats.stalled += 1;
                    if let Err(e) = bus.ep0_stall() {
                        warn!("Failed to stall ep0: {}", e);
                    }
                }
            }
            BusEvent::Disconnect | BusEvent::Reset => {
                stats.disconnects += 1;
                info!("Bus {:?} on {}", event, bus.name());
                session.disconnect().await;
            }
            BusEvent::Connect | BusEvent::Suspend | BusEvent::Resume => {
                debug!("Bus {:?} on {}", event, bus.name());
            }
        }
    }

    stats
}

/// Channel pre-loaded with `script`, closed once drained
pub fn scripted_events(script: Vec<BusEvent>) -> mpsc::Receiver<BusEvent> {
    let (tx, rx) = mpsc::channel(script.len().max(1));
    for event in script {
        // Capacity covers the whole script
        let _ = tx.try_send(event);
    }
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::session::SessionState;
    use crate::gadget::setup::ControlRequest;
    use crate::gadget::sim::SimulatedUdc;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_enumeration_activates_interface() {
        let udc = Arc::new(SimulatedUdc::default());
        let session =
            GadgetSession::bind(udc.clone(), Default::default(), Default::default(), None)
                .unwrap();

        let stats = run_bus_events(
            &session,
            scripted_events(SimulatedUdc::enumeration_script()),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(stats.stalled, 0);
        assert!(udc.is_configured());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(udc.enabled_endpoints().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_request_stalls() {
        let udc = Arc::new(SimulatedUdc::default());
        let session =
            GadgetSession::bind(udc.clone(), Default::default(), Default::default(), None)
                .unwrap();

        // GET_STATUS is not handled
        let get_status = ControlRequest {
            request_type: 0x80,
            request: 0x00,
            value: 0,
            index: 0,
            length: 2,
        };
        let stats = run_bus_events(
            &session,
            scripted_events(vec![
                BusEvent::Control(get_status),
                BusEvent::Control(ControlRequest::get_descriptor(0x03, 7, 255)),
            ]),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(stats.stalled, 2);
        assert_eq!(udc.stall_count(), 2);
        assert!(udc.ep0_log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_event_releases_endpoint() {
        let udc = Arc::new(SimulatedUdc::default());
        let session =
            GadgetSession::bind(udc.clone(), Default::default(), Default::default(), None)
                .unwrap();
        session.run_binder().unwrap();

        let stats = run_bus_events(
            &session,
            scripted_events(vec![BusEvent::Suspend, BusEvent::Resume, BusEvent::Disconnect]),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(stats.disconnects, 1);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(udc.enabled_endpoints().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_loop() {
        let udc = Arc::new(SimulatedUdc::default());
        let session =
            GadgetSession::bind(udc.clone(), Default::default(), Default::default(), None)
                .unwrap();
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = run_bus_events(&session, rx, cancel).await;
        assert_eq!(stats, RunnerStats::default());
        drop(tx);
        assert!(udc.last_ep0().is_none());
    }
}
