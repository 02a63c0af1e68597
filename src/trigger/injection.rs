//! Trigger-side injection: take the staged payload and type it in batches

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::hid::InjectionSummary;
use crate::payload::PayloadSlot;
use crate::surface::ControlSurface;

/// How a payload is handed to the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    /// Characters per write, at least 1
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for BatchPlan {
    fn default() -> Self {
        Self {
            batch_size: 16,
            batch_delay: Duration::from_millis(50),
        }
    }
}

/// Split `payload` into runs of at most `size` characters
pub fn batches(payload: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut out = Vec::new();
    let mut start = 0;
    for (count, (idx, _)) in payload.char_indices().enumerate() {
        if count > 0 && count % size == 0 {
            out.push(&payload[start..idx]);
            start = idx;
        }
    }
    if start < payload.len() {
        out.push(&payload[start..]);
    }
    out
}

/// Take the staged payload and type it
///
/// Returns `Ok(None)` when nothing was staged. The slot is emptied before
/// typing starts, so a failed injection does not retry the same payload.
pub async fn perform_injection(
    slot: &PayloadSlot,
    surface: &ControlSurface,
    plan: BatchPlan,
    events: Option<&EventBus>,
    cancel: &CancellationToken,
) -> Result<Option<InjectionSummary>> {
    let Some(payload) = slot.take() else {
        return Ok(None);
    };

    let publish = |event: SystemEvent| {
        if let Some(events) = events {
            events.publish(event);
        }
    };

    info!("Starting injection of {} byte payload", payload.len());
    publish(SystemEvent::InjectStarted {
        length: payload.len(),
    });

    let result = type_batches(surface, &payload, plan, cancel).await;
    match &result {
        Ok(summary) => {
            info!(
                "Injection finished: {} typed, {} skipped, {} dropped",
                summary.typed, summary.skipped, summary.dropped
            );
            publish(SystemEvent::InjectCompleted {
                typed: summary.typed,
                skipped: summary.skipped,
                dropped: summary.dropped,
            });
        }
        Err(e) => {
            // Refusals repeat on every fire until the host binds; the caller throttles them
            if matches!(e, AppError::NotReady) {
                debug!("Injection refused: {}", e);
            } else {
                warn!("Injection failed: {}", e);
            }
            publish(SystemEvent::InjectFailed {
                reason: e.to_string(),
            });
        }
    }
    result.map(Some)
}

async fn type_batches(
    surface: &ControlSurface,
    payload: &str,
    plan: BatchPlan,
    cancel: &CancellationToken,
) -> Result<InjectionSummary> {
    let file = surface.open();
    let mut total = InjectionSummary::default();

    for (i, batch) in batches(payload, plan.batch_size).into_iter().enumerate() {
        if i > 0 && !plan.batch_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                _ = tokio::time::sleep(plan.batch_delay) => {}
            }
        }
        let summary = file.write_counted(batch.as_bytes(), cancel).await?;
        total.typed += summary.typed;
        total.skipped += summary.skipped;
        total.dropped += summary.dropped;
    }

    file.close();
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::session::GadgetSession;
    use crate::gadget::sim::SimulatedUdc;
    use crate::hid::Pacing;
    use std::sync::Arc;

    #[test]
    fn test_batches_split_on_characters() {
        assert_eq!(batches("abcdefg", 3), vec!["abc", "def", "g"]);
        assert_eq!(batches("abc", 3), vec!["abc"]);
        assert!(batches("", 3).is_empty());
        assert_eq!(batches("\u{e9}\u{e9}\u{e9}", 2), vec!["\u{e9}\u{e9}", "\u{e9}"]);
        assert_eq!(batches("ab", 0), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_empty_slot_is_noop() {
        let surface = ControlSurface::new(Pacing::default());
        let slot = PayloadSlot::new();
        let result = perform_injection(
            &slot,
            &surface,
            BatchPlan::default(),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_staged_payload_is_injected() {
        let udc = Arc::new(SimulatedUdc::default());
        let session =
            GadgetSession::bind(udc.clone(), Default::default(), Default::default(), None)
                .unwrap();
        session.run_binder().unwrap();
        let surface = ControlSurface::new(Pacing::default());
        let _registration = surface.attach(&session);

        let slot = PayloadSlot::new();
        slot.stage("first".to_string());
        slot.stage("second".to_string());

        let events = EventBus::new();
        let mut rx = events.subscribe();
        let summary = perform_injection(
            &slot,
            &surface,
            BatchPlan {
                batch_size: 4,
                batch_delay: Duration::from_millis(50),
            },
            Some(&events),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(summary.typed, "second".len());
        assert_eq!(udc.reports().len(), 2 * "second".len());
        // 's' is keycode 0x16
        assert_eq!(udc.reports()[0][2], 0x16);
        assert!(!slot.is_staged());

        assert!(matches!(
            rx.recv().await.unwrap(),
            SystemEvent::InjectStarted { length: 6 }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SystemEvent::InjectCompleted { typed: 6, skipped: 0, dropped: 0 }
        ));
    }

    #[tokio::test]
    async fn test_not_ready_consumes_payload() {
        let surface = ControlSurface::new(Pacing::default());
        let slot = PayloadSlot::new();
        slot.stage("ab".to_string());

        let err = perform_injection(
            &slot,
            &surface,
            BatchPlan::default(),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotReady));
        assert!(!slot.is_staged());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_between_batches() {
        let udc = Arc::new(SimulatedUdc::default());
        let session =
            GadgetSession::bind(udc.clone(), Default::default(), Default::default(), None)
                .unwrap();
        session.run_binder().unwrap();
        let surface = ControlSurface::new(Pacing::default());
        let _registration = surface.attach(&session);

        let slot = PayloadSlot::new();
        slot.stage("aaaabbbb".to_string());
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                // First batch takes 4 x 20ms
                tokio::time::sleep(Duration::from_millis(100)).await;
                cancel.cancel();
            })
        };

        let err = perform_injection(
            &slot,
            &surface,
            BatchPlan {
                batch_size: 4,
                batch_delay: Duration::from_millis(200),
            },
            None,
            &cancel,
        )
        .await
        .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, AppError::Cancelled));
        assert_eq!(udc.reports().len(), 8);
    }
}
