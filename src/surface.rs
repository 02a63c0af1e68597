//! Character-oriented control surface
//!
//! The outside world reaches the injector through a file-like handle: writes
//! type text into the host, reads return a fixed liveness string. Opening a
//! handle associates it with whatever session is attached at that moment.

use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::gadget::session::{GadgetSession, SessionShared};
use crate::hid::{InjectionSummary, Injector, Pacing};

/// Returned by reads, for liveness checks
pub const DIAGNOSTIC: &str = "HID injector is alive\n";

/// Bytes of the diagnostic string from `offset` on, empty past the end
pub fn diagnostic_at(offset: u64) -> &'static [u8] {
    let bytes = DIAGNOSTIC.as_bytes();
    usize::try_from(offset)
        .ok()
        .and_then(|o| bytes.get(o..))
        .unwrap_or(&[])
}

pub struct ControlSurface {
    session: RwLock<Weak<SessionShared>>,
    pacing: Mutex<Pacing>,
}

impl ControlSurface {
    pub fn new(pacing: Pacing) -> Arc<Self> {
        Arc::new(Self {
            session: RwLock::new(Weak::new()),
            pacing: Mutex::new(pacing),
        })
    }

    /// Expose `session` through this surface until the registration drops
    pub fn attach(self: &Arc<Self>, session: &GadgetSession) -> SurfaceRegistration {
        *self.session.write() = Arc::downgrade(session.shared());
        info!("Control surface attached to {}", session.shared().bus_name());
        SurfaceRegistration {
            surface: self.clone(),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.session.read().strong_count() > 0
    }

    /// Session currently behind the surface
    pub fn session(&self) -> Option<Arc<SessionShared>> {
        self.session.read().upgrade()
    }

    pub fn pacing(&self) -> Pacing {
        *self.pacing.lock()
    }

    /// Applies to handles opened afterwards
    pub fn set_pacing(&self, pacing: Pacing) {
        *self.pacing.lock() = pacing;
    }

    pub fn open(&self) -> SurfaceFile {
        let session = self.session();
        debug!("Control surface opened (session attached: {})", session.is_some());
        SurfaceFile {
            session,
            injector: Injector::new(self.pacing()),
            position: 0,
        }
    }

    fn detach(&self) {
        *self.session.write() = Weak::new();
        info!("Control surface detached");
    }
}

/// Keeps a session registered on a [`ControlSurface`]
pub struct SurfaceRegistration {
    surface: Arc<ControlSurface>,
}

impl Drop for SurfaceRegistration {
    fn drop(&mut self) {
        self.surface.detach();
    }
}

/// An open handle on the control surface
pub struct SurfaceFile {
    session: Option<Arc<SessionShared>>,
    injector: Injector,
    position: u64,
}

impl SurfaceFile {
    /// Type `buf` into the host
    ///
    /// Bytes that are not valid UTF-8 are typed as nothing. Returns the full
    /// buffer length once every supported character has been sent.
    pub async fn write(&self, buf: &[u8], cancel: &CancellationToken) -> Result<usize> {
        self.write_counted(buf, cancel).await.map(|_| buf.len())
    }

    /// Like [`Self::write`], returning what was typed and skipped
    pub async fn write_counted(
        &self,
        buf: &[u8],
        cancel: &CancellationToken,
    ) -> Result<InjectionSummary> {
        let session = self.session.as_ref().ok_or(AppError::NotReady)?;
        let text = String::from_utf8_lossy(buf);
        debug!("Control surface write: {} bytes", buf.len());
        self.injector.inject(session, &text, cancel).await
    }

    /// Read the diagnostic string from the current position
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let remaining = diagnostic_at(self.position);
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n as u64;
        n
    }

    pub fn close(self) {
        debug!("Control surface closed");
    }
}
