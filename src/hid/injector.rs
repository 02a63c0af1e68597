//! Injection bridge: types a string as press/release report pairs

use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::keymap::translate;
use super::report::KeyboardReport;
use crate::error::{AppError, Result};
use crate::gadget::session::SessionShared;

/// Default time a key is held before release
pub const DEFAULT_PRESS_HOLD_MS: u64 = 20;

/// Attempts made at the release following an accepted press
const RELEASE_ATTEMPTS: u32 = 3;

/// Inter-keystroke timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Delay between press and release
    pub press_hold: Duration,
    /// Delay after release before the next character
    pub release_gap: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            press_hold: Duration::from_millis(DEFAULT_PRESS_HOLD_MS),
            release_gap: Duration::ZERO,
        }
    }
}

/// Outcome of one injection call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InjectionSummary {
    /// Characters typed (one press/release pair each)
    pub typed: usize,
    /// Characters without a key on the layout
    pub skipped: usize,
    /// Characters whose press the controller did not accept
    pub dropped: usize,
}

/// Types strings into the host through a gadget session
#[derive(Debug, Clone, Default)]
pub struct Injector {
    pacing: Pacing,
}

impl Injector {
    pub fn new(pacing: Pacing) -> Self {
        Self { pacing }
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Type `text`, returning once every report has been submitted
    ///
    /// Unsupported characters are skipped. A press the controller refuses
    /// (no free transfer, queue error) drops that character and typing goes
    /// on. Only `NotReady` aborts the rest of the string. Every accepted press
    /// is followed by a release attempt, and cancellation is honoured between
    /// characters only.
    pub async fn inject(
        &self,
        session: &SessionShared,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<InjectionSummary> {
        if !session.interface_active() {
            debug!("Injection refused: HID interface not active");
            return Err(AppError::NotReady);
        }

        let mut summary = InjectionSummary::default();
        for c in text.chars() {
            if cancel.is_cancelled() {
                info!(
                    "Injection cancelled after {} characters",
                    summary.typed + summary.skipped
                );
                return Err(AppError::Cancelled);
            }

            let Some(stroke) = translate(c) else {
                warn!("Skipping unsupported character {:?}", c);
                summary.skipped += 1;
                continue;
            };

            match self.type_stroke(session, KeyboardReport::press(stroke)).await {
                Ok(()) => summary.typed += 1,
                Err(AppError::NotReady) => {
                    warn!("Injection aborted at {:?}: HID interface went away", c);
                    return Err(AppError::NotReady);
                }
                Err(e) => {
                    debug!("Dropped {:?}: {}", c, e);
                    summary.dropped += 1;
                }
            }
        }

        if summary.dropped > 0 {
            warn!(
                "Injection dropped {} of {} characters",
                summary.dropped,
                summary.typed + summary.dropped
            );
        }
        debug!(
            "Injected {} characters ({} skipped)",
            summary.typed, summary.skipped
        );
        Ok(summary)
    }

    /// Press, hold, release. Fails only when the press was not accepted
    /// or the interface went away before the release.
    async fn type_stroke(&self, session: &SessionShared, press: KeyboardReport) -> Result<()> {
        session.send_report(&press)?;
        tokio::time::sleep(self.pacing.press_hold).await;
        self.release(session).await?;
        if !self.pacing.release_gap.is_zero() {
            tokio::time::sleep(self.pacing.release_gap).await;
        }
        Ok(())
    }

    async fn release(&self, session: &SessionShared) -> Result<()> {
        let release = KeyboardReport::release();
        let mut attempt = 1;
        loop {
            match session.send_report(&release) {
                Ok(()) => return Ok(()),
                Err(AppError::NotReady) => return Err(AppError::NotReady),
                Err(e) if attempt < RELEASE_ATTEMPTS => {
                    debug!("Release attempt {} failed: {}", attempt, e);
                    attempt += 1;
                    tokio::time::sleep(self.pacing.press_hold).await;
                }
                Err(e) => {
                    // The press went out, so the key stays down on the host
                    // until the next report reaches it
                    warn!("Release not delivered after {} attempts: {}", attempt, e);
                    return Ok(());
                }
            }
        }
    }
}
