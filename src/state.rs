use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigStore;
use crate::events::EventBus;
use crate::gadget::session::SessionState;
use crate::payload::PayloadSlot;
use crate::surface::ControlSurface;
use crate::trigger::{TriggerHandle, TriggerSource};
use crate::utils::LogThrottler;

/// Application-wide state shared by the web handlers and the trigger loop
///
/// The gadget session itself is owned by `main`; handlers reach it through
/// the control surface, which only holds a weak reference.
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Event bus for real-time notifications
    pub events: Arc<EventBus>,
    /// Staged payload
    pub payload: Arc<PayloadSlot>,
    /// Control surface in front of the gadget session
    pub surface: Arc<ControlSurface>,
    /// Trigger sender
    pub trigger: TriggerHandle,
    pub throttler: LogThrottler,
    /// Cancelled on SIGINT/SIGTERM
    pub shutdown: CancellationToken,
    pub started_at: DateTime<Utc>,
    data_dir: PathBuf,
}

impl AppState {
    pub fn new(
        config: ConfigStore,
        events: Arc<EventBus>,
        payload: Arc<PayloadSlot>,
        surface: Arc<ControlSurface>,
        trigger: TriggerHandle,
        shutdown: CancellationToken,
        data_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            events,
            payload,
            surface,
            trigger,
            throttler: LogThrottler::default(),
            shutdown,
            started_at: Utc::now(),
            data_dir,
        })
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Session state, `Unbound` when no session is attached
    pub fn gadget_state(&self) -> SessionState {
        self.surface
            .session()
            .map(|s| s.state())
            .unwrap_or(SessionState::Unbound)
    }

    pub fn fire_trigger(&self, source: TriggerSource) -> bool {
        self.trigger.fire(source)
    }
}
