//! External trigger
//!
//! A trigger fire takes whatever payload is staged and types it. Fires come
//! from a GPIO line or from the HTTP API; fires that arrive while an
//! injection is running are dropped.

pub mod gpio;
pub mod injection;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::events::SystemEvent;
use crate::state::AppState;
use crate::warn_throttled;

pub use gpio::GpioTrigger;
pub use injection::{batches, perform_injection, BatchPlan};

/// Where a fire came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Gpio,
    Manual,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpio => "gpio",
            Self::Manual => "manual",
        }
    }
}

/// Accepts one signal per window
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last: Option<Duration>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// `now` is any monotonic timestamp
    pub fn accept(&mut self, now: Duration) -> bool {
        match self.last {
            Some(last) if now.saturating_sub(last) < self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Sending side of the trigger; cheap to clone
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<TriggerSource>,
}

impl TriggerHandle {
    /// Request an injection; false if one is already queued
    pub fn fire(&self, source: TriggerSource) -> bool {
        match self.tx.try_send(source) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Trigger ({}) dropped: injection already pending", source.as_str());
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Trigger ({}) dropped: trigger loop stopped", source.as_str());
                false
            }
        }
    }
}

/// Trigger handle and the receiver [`run_trigger_loop`] consumes
pub fn channel() -> (TriggerHandle, mpsc::Receiver<TriggerSource>) {
    let (tx, rx) = mpsc::channel(1);
    (TriggerHandle { tx }, rx)
}

/// Serve fires until `cancel` fires or every handle is gone
pub async fn run_trigger_loop(
    state: Arc<AppState>,
    mut rx: mpsc::Receiver<TriggerSource>,
    cancel: CancellationToken,
) {
    info!("Trigger loop started");
    loop {
        let source = tokio::select! {
            _ = cancel.cancelled() => break,
            source = rx.recv() => match source {
                Some(source) => source,
                None => break,
            },
        };

        info!("Trigger fired ({})", source.as_str());
        state.events.publish(SystemEvent::TriggerFired {
            source: source.as_str().to_string(),
        });

        let inject = state.config.get().inject.clone();
        let plan = BatchPlan {
            batch_size: inject.batch_size.max(1),
            batch_delay: inject.batch_delay(),
        };
        match perform_injection(
            &state.payload,
            &state.surface,
            plan,
            Some(&state.events),
            &cancel,
        )
        .await
        {
            Ok(Some(_)) => {
                state.throttler.clear("empty_slot");
                state.throttler.clear("not_ready");
            }
            Ok(None) => {
                warn_throttled!(
                    state.throttler,
                    "empty_slot",
                    "Injection triggered, but no payload is staged"
                );
            }
            Err(AppError::NotReady) => {
                warn_throttled!(
                    state.throttler,
                    "not_ready",
                    "Injection refused: HID interface not active"
                );
            }
            Err(e) => debug!("Trigger injection ended: {}", e),
        }

        // Fires that queued up while typing belong to the same burst
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Dropped {} trigger fires received during injection", dropped);
        }
    }
    info!("Trigger loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debouncer_window() {
        let mut debouncer = Debouncer::new(Duration::from_millis(200));
        assert!(debouncer.accept(Duration::from_millis(1000)));
        assert!(!debouncer.accept(Duration::from_millis(1050)));
        assert!(!debouncer.accept(Duration::from_millis(1199)));
        assert!(debouncer.accept(Duration::from_millis(1200)));
        // Clock going backwards never fires twice
        assert!(!debouncer.accept(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_fire_drops_when_pending() {
        let (handle, mut rx) = channel();
        assert!(handle.fire(TriggerSource::Manual));
        assert!(!handle.fire(TriggerSource::Gpio));

        assert_eq!(rx.recv().await, Some(TriggerSource::Manual));
        assert!(handle.fire(TriggerSource::Gpio));

        drop(rx);
        assert!(!handle.fire(TriggerSource::Manual));
    }

    #[test]
    fn test_source_serialization() {
        assert_eq!(
            serde_json::to_string(&TriggerSource::Gpio).unwrap(),
            r#""gpio""#
        );
        assert_eq!(TriggerSource::Manual.as_str(), "manual");
    }
}
