//! Interrupt-IN endpoint binder
//!
//! Runs from the deferred task a short while after SET_CONFIGURATION, once
//! the controller has finished its own setup. Endpoints are matched by
//! capability, not by address.

use tracing::{debug, info, warn};

use super::descriptor::EndpointDescriptor;
use super::session::{SessionShared, SessionState};
use super::udc::{BoundEndpoint, EndpointInfo};
use crate::error::{AppError, Result};

/// First endpoint that can do interrupt IN transfers with `descriptor`
///
/// Endpoints with a fixed hardware address other than the one the host was
/// given in the configuration descriptor are passed over.
pub fn find_interrupt_in<'a>(
    endpoints: &'a [EndpointInfo],
    descriptor: &EndpointDescriptor,
) -> Option<&'a EndpointInfo> {
    endpoints
        .iter()
        .filter(|ep| ep.can_interrupt_in())
        .find(|ep| {
            let fits = ep.accepts(descriptor);
            if !fits {
                debug!(
                    "{} is fixed at address {:?}, host expects {:#04x}",
                    ep.name, ep.address, descriptor.b_endpoint_address
                );
            }
            fits
        })
}

/// Find, attach and enable the interrupt-IN endpoint
///
/// Any endpoint enabled by an earlier run is disabled first, so running twice
/// leaves exactly one live binding. The session lock is not held while the
/// controller is touched.
pub fn run(session: &SessionShared) -> Result<()> {
    let previous = {
        let mut inner = session.inner.lock();
        let previous = inner.endpoint.take();
        if previous.is_some() {
            session.set_state(&mut inner, SessionState::ConfigPending);
        }
        previous
    };
    if let Some(previous) = previous {
        info!("Re-binding: disabling {}", previous.info.name);
        if let Err(e) = session.bus.disable(previous.handle) {
            warn!("Failed to disable {}: {}", previous.info.name, e);
        }
    }

    // Attached as advertised; the host polls the address it read at enumeration
    let descriptor = session.descriptors.endpoint();
    let endpoints = session.bus.endpoints();
    let Some(info) = find_interrupt_in(&endpoints, &descriptor) else {
        warn!(
            "No usable interrupt-IN endpoint on {}; control traffic only",
            session.bus.name()
        );
        let mut inner = session.inner.lock();
        session.set_state(&mut inner, SessionState::BindFailed);
        return Err(AppError::BindFailure(
            "no interrupt-IN capable endpoint".to_string(),
        ));
    };

    match session.bus.enable(info, &descriptor) {
        Ok(handle) => {
            info!(
                "HID interface active on {} (address {:#04x}, packet {}, interval {})",
                info.name,
                descriptor.b_endpoint_address,
                descriptor.max_packet_size(),
                descriptor.b_interval
            );
            let stale = {
                let mut inner = session.inner.lock();
                let stale = inner.endpoint.replace(BoundEndpoint {
                    info: info.clone(),
                    descriptor,
                    handle,
                });
                session.set_state(&mut inner, SessionState::Active);
                stale
            };
            if let Some(stale) = stale {
                warn!("Concurrent bind left {} enabled; disabling", stale.info.name);
                if let Err(e) = session.bus.disable(stale.handle) {
                    warn!("Failed to disable {}: {}", stale.info.name, e);
                }
            }
            Ok(())
        }
        Err(e) => {
            // Descriptor is dropped with this scope; no endpoint reference kept
            warn!("Failed to enable {}: {}", info.name, e);
            let mut inner = session.inner.lock();
            session.set_state(&mut inner, SessionState::BindFailed);
            Err(AppError::BindFailure(format!("enable {}: {}", info.name, e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::descriptor::{CONFIGURATION, ENDPOINT_DESC_OFFSET};
    use crate::gadget::session::GadgetSession;
    use crate::gadget::sim::SimulatedUdc;
    use crate::gadget::udc::EndpointCaps;
    use std::sync::Arc;

    fn ep(name: &str, address: Option<u8>, caps: EndpointCaps) -> EndpointInfo {
        EndpointInfo {
            name: name.to_string(),
            address,
            caps,
            max_packet_limit: 64,
        }
    }

    #[test]
    fn test_find_matches_capability_not_address() {
        let hid = EndpointDescriptor::hid_interrupt_in();
        let eps = vec![
            ep(
                "ep1in",
                Some(1),
                EndpointCaps {
                    type_bulk: true,
                    dir_in: true,
                    ..Default::default()
                },
            ),
            ep(
                "ep2out",
                Some(2),
                EndpointCaps {
                    type_int: true,
                    dir_out: true,
                    ..Default::default()
                },
            ),
            ep(
                "ep-a",
                None,
                EndpointCaps {
                    type_int: true,
                    dir_in: true,
                    ..Default::default()
                },
            ),
            ep(
                "ep-b",
                None,
                EndpointCaps {
                    type_int: true,
                    dir_in: true,
                    ..Default::default()
                },
            ),
        ];
        assert_eq!(find_interrupt_in(&eps, &hid).unwrap().name, "ep-a");
        assert!(find_interrupt_in(&eps[..2], &hid).is_none());
    }

    #[test]
    fn test_fixed_address_must_match_advertised() {
        let hid = EndpointDescriptor::hid_interrupt_in();
        let int_in = EndpointCaps {
            type_int: true,
            dir_in: true,
            ..Default::default()
        };
        let eps = vec![ep("ep5in-int", Some(5), int_in), ep("ep1in-int", Some(1), int_in)];
        assert_eq!(find_interrupt_in(&eps, &hid).unwrap().name, "ep1in-int");
        assert!(find_interrupt_in(&eps[..1], &hid).is_none());
    }

    #[tokio::test]
    async fn test_only_conflicting_endpoints_fail_bind() {
        let int_in = EndpointCaps {
            type_int: true,
            dir_in: true,
            ..Default::default()
        };
        let udc = Arc::new(SimulatedUdc::with_endpoints(vec![ep(
            "ep5in-int",
            Some(5),
            int_in,
        )]));
        let session = GadgetSession::bind(udc.clone(), Default::default(), Default::default(), None)
            .unwrap();

        assert!(matches!(
            run(session.shared()),
            Err(AppError::BindFailure(_))
        ));
        assert_eq!(session.state(), SessionState::BindFailed);
        assert!(udc.enabled_endpoints().is_empty());
    }

    #[tokio::test]
    async fn test_bound_descriptor_matches_configuration() {
        let udc = Arc::new(SimulatedUdc::default());
        let session = GadgetSession::bind(udc.clone(), Default::default(), Default::default(), None)
            .unwrap();
        run(session.shared()).unwrap();

        let bound = session.shared().endpoint().unwrap();
        assert_eq!(
            bound.descriptor.as_bytes(),
            &CONFIGURATION[ENDPOINT_DESC_OFFSET..ENDPOINT_DESC_OFFSET + 7]
        );
        assert_eq!(udc.enabled_descriptors(), vec![bound.descriptor]);
    }

    #[tokio::test]
    async fn test_bind_success() {
        let udc = Arc::new(SimulatedUdc::default());
        let session = GadgetSession::bind(udc.clone(), Default::default(), Default::default(), None)
            .unwrap();

        run(session.shared()).unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert!(session.interface_active());
        assert_eq!(udc.enabled_endpoints().len(), 1);
    }

    #[tokio::test]
    async fn test_twice_keeps_single_binding() {
        let udc = Arc::new(SimulatedUdc::default());
        let session = GadgetSession::bind(udc.clone(), Default::default(), Default::default(), None)
            .unwrap();

        run(session.shared()).unwrap();
        let first = session.shared().endpoint().unwrap().handle;
        run(session.shared()).unwrap();
        let second = session.shared().endpoint().unwrap().handle;

        assert_eq!(udc.enabled_endpoints(), vec![second]);
        assert!(!udc.is_enabled(first));
        assert_eq!(udc.enable_calls(), 2);
        assert_eq!(udc.disable_calls(), 1);
    }

    #[tokio::test]
    async fn test_no_endpoint_leaves_session_usable() {
        let udc = Arc::new(SimulatedUdc::with_endpoints(Vec::new()));
        let session = GadgetSession::bind(udc.clone(), Default::default(), Default::default(), None)
            .unwrap();

        let err = run(session.shared()).unwrap_err();
        assert!(matches!(err, AppError::BindFailure(_)));
        assert_eq!(session.state(), SessionState::BindFailed);
        assert!(!session.interface_active());

        // Control traffic still answered
        let ctrl = crate::gadget::setup::ControlRequest::get_descriptor(1, 0, 18);
        assert_eq!(session.setup(&ctrl).unwrap(), 18);
    }

    #[tokio::test]
    async fn test_enable_failure_clears_endpoint() {
        let udc = Arc::new(SimulatedUdc::default());
        udc.set_fail_enable(true);
        let session = GadgetSession::bind(udc.clone(), Default::default(), Default::default(), None)
            .unwrap();

        assert!(run(session.shared()).is_err());
        assert_eq!(session.state(), SessionState::BindFailed);
        assert!(session.shared().endpoint().is_none());
        assert!(udc.enabled_endpoints().is_empty());

        // Hardware recovers, a later configuration succeeds
        udc.set_fail_enable(false);
        run(session.shared()).unwrap();
        assert_eq!(session.state(), SessionState::Active);
    }
}
