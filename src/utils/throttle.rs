//! Log throttling
//!
//! Repeated warnings (a trigger with nothing staged, writes refused while the
//! host is away) are logged once per interval per key; the suppressed count
//! is reported with the next message that gets through.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default interval between messages for one key
pub const DEFAULT_THROTTLE_SECS: u64 = 5;

#[derive(Debug)]
struct Entry {
    last: Instant,
    suppressed: u64,
}

/// Limits how often messages for the same key are logged
///
/// ```rust
/// use hid_injector::utils::LogThrottler;
/// use std::time::Duration;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert!(throttler.should_log("empty_slot"));
/// assert!(!throttler.should_log("empty_slot"));
/// ```
#[derive(Debug)]
pub struct LogThrottler {
    entries: Mutex<HashMap<String, Entry>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// True if a message for `key` may be logged now
    pub fn should_log(&self, key: &str) -> bool {
        self.admit(key).is_some()
    }

    /// Like [`Self::should_log`], returning how many messages were held back
    /// since the last one logged
    pub fn admit(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last) < self.interval => {
                entry.suppressed += 1;
                None
            }
            Some(entry) => {
                let suppressed = entry.suppressed;
                entry.last = now;
                entry.suppressed = 0;
                Some(suppressed)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        last: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Forget `key`, so the next message for it is logged immediately
    pub fn clear(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(DEFAULT_THROTTLE_SECS)
    }
}

/// Throttled `warn!`, appending the suppressed count when non-zero
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        match $throttler.admit($key) {
            Some(0) => tracing::warn!($($arg)*),
            Some(n) => tracing::warn!("{} ({} similar suppressed)", format_args!($($arg)*), n),
            None => {}
        }
    };
}
