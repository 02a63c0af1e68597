//! In-flight USB transfers
//!
//! A [`PendingTransfer`] is created right before submission. Submitting it
//! either hands it to the controller ([`Submission::Queued`]) or returns it to
//! the caller ([`Submission::Rejected`]). Once queued, the only way it is
//! released is [`PendingTransfer::complete`], which consumes it.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::udc::EndpointHandle;
use crate::error::{AppError, Result};

/// Default bound on transfers outstanding at the controller
pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;

/// How a transfer finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Delivered to the host
    Completed { actual: usize },
    /// Endpoint was disabled while the transfer was queued
    Shutdown,
    /// Controller reported an error
    Error(String),
}

/// Completion callback, runs in the controller's completion context
pub type CompletionHandler = Box<dyn FnOnce(&CompletionStatus) + Send + 'static>;

/// One request owned by whoever currently holds it
pub struct PendingTransfer {
    endpoint: EndpointHandle,
    buf: Box<[u8]>,
    on_complete: Option<CompletionHandler>,
    _slot: InFlightSlot,
}

impl PendingTransfer {
    pub fn endpoint(&self) -> EndpointHandle {
        self.endpoint
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Signal completion and release the transfer
    pub fn complete(mut self, status: CompletionStatus) {
        if let Some(handler) = self.on_complete.take() {
            handler(&status);
        }
    }
}

impl fmt::Debug for PendingTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTransfer")
            .field("endpoint", &self.endpoint)
            .field("len", &self.buf.len())
            .finish()
    }
}

/// Result of handing a transfer to the controller
#[must_use]
#[derive(Debug)]
pub enum Submission {
    /// Controller owns the transfer until completion
    Queued,
    /// Controller refused it; the caller owns it again
    Rejected {
        transfer: PendingTransfer,
        error: AppError,
    },
}

impl Submission {
    pub fn rejected(transfer: PendingTransfer, error: AppError) -> Self {
        Self::Rejected { transfer, error }
    }
}

/// Counts live transfers, decrementing when a transfer is dropped
struct InFlightSlot {
    counter: Arc<AtomicUsize>,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bounded transfer allocator
#[derive(Debug, Clone)]
pub struct TransferPool {
    outstanding: Arc<AtomicUsize>,
    limit: usize,
}

impl TransferPool {
    pub fn new(limit: usize) -> Self {
        Self {
            outstanding: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    /// Allocate a transfer carrying a copy of `data`
    ///
    /// Fails with `AllocationFailure` when `limit` transfers are already live.
    pub fn allocate(
        &self,
        endpoint: EndpointHandle,
        data: &[u8],
        on_complete: CompletionHandler,
    ) -> Result<PendingTransfer> {
        self.allocate_within(self.limit, endpoint, data, on_complete)
    }

    /// Like [`Self::allocate`], but may take one slot past `limit`
    ///
    /// Used for the release that must follow every accepted press.
    pub fn allocate_reserved(
        &self,
        endpoint: EndpointHandle,
        data: &[u8],
        on_complete: CompletionHandler,
    ) -> Result<PendingTransfer> {
        self.allocate_within(self.limit + 1, endpoint, data, on_complete)
    }

    fn allocate_within(
        &self,
        bound: usize,
        endpoint: EndpointHandle,
        data: &[u8],
        on_complete: CompletionHandler,
    ) -> Result<PendingTransfer> {
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < bound).then_some(n + 1)
            })
            .map_err(|_| AppError::AllocationFailure)?;

        Ok(PendingTransfer {
            endpoint,
            buf: data.into(),
            on_complete: Some(on_complete),
            _slot: InFlightSlot {
                counter: self.outstanding.clone(),
            },
        })
    }

    /// Number of transfers not yet released
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for TransferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}
