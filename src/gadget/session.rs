//! Gadget session lifecycle
//!
//! ```text
//! Unbound → Bound → ConfigPending → Active | BindFailed
//! Active → Disconnected (bus disconnect)
//! Disconnected | BindFailed → Unbound (unbind)
//! ```
//!
//! A [`GadgetSession`] exists from bind to unbind. Everything the dispatcher,
//! binder and transmitter need lives in [`SessionShared`], reached through the
//! session handle rather than any global.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::binder;
use super::deferred::DeferredTask;
use super::descriptor::DescriptorSet;
use super::setup::{self, ControlRequest, EP0_BUFFER_SIZE};
use super::transfer::{TransferPool, DEFAULT_MAX_IN_FLIGHT};
use super::udc::{BoundEndpoint, UdcDriver};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::hid::transmitter::ReportTransmitter;

/// Delay between SET_CONFIGURATION and endpoint enable
pub const DEFAULT_BIND_DELAY_MS: u64 = 20;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unbound,
    Bound,
    ConfigPending,
    Active,
    BindFailed,
    Disconnected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unbound => "unbound",
            Self::Bound => "bound",
            Self::ConfigPending => "config_pending",
            Self::Active => "active",
            Self::BindFailed => "bind_failed",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session tunables
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub bind_delay: Duration,
    pub max_in_flight: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            bind_delay: Duration::from_millis(DEFAULT_BIND_DELAY_MS),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// Mutable session state, guarded by one lock
///
/// `endpoint` is `Some` exactly when the interrupt-IN endpoint is enabled.
#[derive(Debug)]
pub(crate) struct SessionInner {
    pub(crate) state: SessionState,
    pub(crate) endpoint: Option<BoundEndpoint>,
}

/// State shared between the dispatcher, the deferred binder and the injector
pub struct SessionShared {
    pub(crate) bus: Arc<dyn UdcDriver>,
    pub(crate) descriptors: Arc<DescriptorSet>,
    pub(crate) ep0_buf: Mutex<Vec<u8>>,
    pub(crate) inner: Mutex<SessionInner>,
    pub(crate) binder: DeferredTask,
    pub(crate) transmitter: ReportTransmitter,
    options: SessionOptions,
    events: Option<Arc<EventBus>>,
}

impl SessionShared {
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// True iff an enabled interrupt-IN endpoint is bound
    pub fn interface_active(&self) -> bool {
        self.inner.lock().endpoint.is_some()
    }

    /// Currently bound endpoint, if any
    pub fn endpoint(&self) -> Option<BoundEndpoint> {
        self.inner.lock().endpoint.clone()
    }

    pub fn bus_name(&self) -> &str {
        self.bus.name()
    }

    /// Transfers handed to the controller and not yet completed
    pub fn outstanding_transfers(&self) -> usize {
        self.transmitter.outstanding()
    }

    pub(crate) fn set_state(&self, inner: &mut SessionInner, state: SessionState) {
        if inner.state == state {
            return;
        }
        debug!("Gadget session: {} -> {}", inner.state, state);
        inner.state = state;
        if let Some(ref events) = self.events {
            events.publish(SystemEvent::GadgetStateChanged {
                state: state.as_str().to_string(),
            });
        }
    }

    /// Host selected the configuration: schedule the binder
    pub(crate) fn begin_configuration(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            self.set_state(&mut inner, SessionState::ConfigPending);
        }

        let weak = Arc::downgrade(self);
        let scheduled = self.binder.schedule(self.options.bind_delay, move || {
            if let Some(session) = weak.upgrade() {
                // Failures are logged and recorded in the session state
                let _ = binder::run(&session);
            }
        });
        if !scheduled {
            debug!("Endpoint binder already pending");
        }
    }

    /// Drop the bound endpoint, disabling it at the controller
    fn release_endpoint(&self, next: SessionState) {
        let endpoint = {
            let mut inner = self.inner.lock();
            let endpoint = inner.endpoint.take();
            self.set_state(&mut inner, next);
            endpoint
        };

        if let Some(ep) = endpoint {
            if let Err(e) = self.bus.disable(ep.handle) {
                warn!("Failed to disable {}: {}", ep.info.name, e);
            } else {
                debug!("Disabled {}", ep.info.name);
            }
        }
    }
}

/// One bind/unbind cycle of the HID function
pub struct GadgetSession {
    shared: Arc<SessionShared>,
    unbound: bool,
}

impl GadgetSession {
    /// Bind the function to a controller
    ///
    /// Must be called from within a tokio runtime; the deferred binder runs on it.
    pub fn bind(
        bus: Arc<dyn UdcDriver>,
        descriptors: Arc<DescriptorSet>,
        options: SessionOptions,
        events: Option<Arc<EventBus>>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| AppError::Internal(format!("No async runtime for gadget session: {}", e)))?;

        let transmitter = ReportTransmitter::new(bus.clone(), TransferPool::new(options.max_in_flight));

        let shared = Arc::new(SessionShared {
            bus,
            descriptors,
            ep0_buf: Mutex::new(Vec::with_capacity(EP0_BUFFER_SIZE)),
            inner: Mutex::new(SessionInner {
                state: SessionState::Unbound,
                endpoint: None,
            }),
            binder: DeferredTask::new("endpoint-binder", runtime),
            transmitter,
            options,
            events,
        });

        {
            let mut inner = shared.inner.lock();
            shared.set_state(&mut inner, SessionState::Bound);
        }
        info!("HID gadget bound to {}", shared.bus.name());

        Ok(Self {
            shared,
            unbound: false,
        })
    }

    pub fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn interface_active(&self) -> bool {
        self.shared.interface_active()
    }

    /// Answer a control request; an error means the caller must stall
    pub fn setup(&self, ctrl: &ControlRequest) -> Result<usize> {
        setup::dispatch(&self.shared, ctrl)
    }

    /// Run the endpoint binder immediately
    pub fn run_binder(&self) -> Result<()> {
        binder::run(&self.shared)
    }

    /// Bus disconnect: cancel any pending bind, then disable the endpoint
    pub async fn disconnect(&self) {
        if self.shared.binder.cancel_sync().await {
            debug!("Pending endpoint bind cancelled by disconnect");
        }
        self.shared.release_endpoint(SessionState::Disconnected);
        info!("HID gadget disconnected");
    }

    /// Unbind: no deferred work may run after this starts
    pub async fn unbind(mut self) {
        self.shared.binder.close().await;
        self.shared.release_endpoint(SessionState::Unbound);
        self.unbound = true;
        info!("HID gadget unbound from {}", self.shared.bus.name());
    }
}

impl Drop for GadgetSession {
    fn drop(&mut self) {
        if !self.unbound {
            self.shared.binder.abort();
            self.shared.release_endpoint(SessionState::Unbound);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::sim::SimulatedUdc;
    use crate::gadget::udc::EndpointHandle;

    fn bind(udc: &Arc<SimulatedUdc>) -> GadgetSession {
        GadgetSession::bind(udc.clone(), Default::default(), Default::default(), None).unwrap()
    }

    fn assert_invariant(session: &GadgetSession, udc: &SimulatedUdc) {
        let active = session.interface_active();
        assert_eq!(active, session.state() == SessionState::Active);
        match session.shared().endpoint() {
            Some(ep) => assert!(udc.is_enabled(ep.handle)),
            None => assert!(!active),
        }
        assert!(udc.enabled_endpoints().len() <= 1);
    }

    #[test]
    fn test_bind_requires_runtime() {
        let udc = Arc::new(SimulatedUdc::default());
        let result = GadgetSession::bind(udc, Default::default(), Default::default(), None);
        assert!(matches!(result, Err(AppError::Internal(_))));
    }

    #[tokio::test]
    async fn test_bind_starts_bound() {
        let udc = Arc::new(SimulatedUdc::default());
        let session = bind(&udc);
        assert_eq!(session.state(), SessionState::Bound);
        assert!(!session.interface_active());
        assert_invariant(&session, &udc);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invariant_through_lifecycle() {
        let udc = Arc::new(SimulatedUdc::default());
        let session = bind(&udc);

        session.setup(&ControlRequest::set_configuration(1)).unwrap();
        assert_invariant(&session, &udc);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(session.state(), SessionState::Active);
        assert_invariant(&session, &udc);

        // Host re-selects the configuration while active
        session.setup(&ControlRequest::set_configuration(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(session.state(), SessionState::Active);
        assert_invariant(&session, &udc);
        assert_eq!(udc.enable_calls(), 2);
        assert_eq!(udc.disable_calls(), 1);

        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_invariant(&session, &udc);
        assert!(udc.enabled_endpoints().is_empty());

        // Reconnect and configure again
        session.setup(&ControlRequest::set_configuration(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(session.state(), SessionState::Active);
        assert_invariant(&session, &udc);

        session.unbind().await;
        assert!(udc.enabled_endpoints().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_bind() {
        let udc = Arc::new(SimulatedUdc::default());
        let session = bind(&udc);

        session.setup(&ControlRequest::set_configuration(1)).unwrap();
        assert!(session.shared().binder.is_pending());

        session.disconnect().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(udc.enable_calls(), 0);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_invariant(&session, &udc);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbind_cancels_pending_bind() {
        let udc = Arc::new(SimulatedUdc::default());
        let session = bind(&udc);
        let shared = session.shared().clone();

        session.setup(&ControlRequest::set_configuration(1)).unwrap();
        session.unbind().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(udc.enable_calls(), 0);
        assert_eq!(shared.state(), SessionState::Unbound);
        assert!(!shared.interface_active());
    }

    #[tokio::test]
    async fn test_drop_disables_endpoint() {
        let udc = Arc::new(SimulatedUdc::default());
        let session = bind(&udc);
        session.run_binder().unwrap();
        let handle: EndpointHandle = session.shared().endpoint().unwrap().handle;
        assert!(udc.is_enabled(handle));

        drop(session);
        assert!(!udc.is_enabled(handle));
    }
}
