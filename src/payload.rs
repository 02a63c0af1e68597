//! Staged payload slot
//!
//! Holds at most one payload. Staging replaces whatever was there; the
//! injection path takes and clears it in one step.

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct PayloadSlot {
    staged: Mutex<Option<String>>,
}

impl PayloadSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the staged payload, returning the one it displaced
    pub fn stage(&self, payload: String) -> Option<String> {
        self.staged.lock().replace(payload)
    }

    /// Take the staged payload, leaving the slot empty
    pub fn take(&self) -> Option<String> {
        self.staged.lock().take()
    }

    /// Drop the staged payload; true if there was one
    pub fn clear(&self) -> bool {
        self.staged.lock().take().is_some()
    }

    /// Length in bytes of the staged payload, if any
    pub fn peek_len(&self) -> Option<usize> {
        self.staged.lock().as_ref().map(|p| p.len())
    }

    pub fn is_staged(&self) -> bool {
        self.staged.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_last_write_wins() {
        let slot = PayloadSlot::new();
        assert!(slot.stage("first".to_string()).is_none());
        assert_eq!(slot.stage("second".to_string()).as_deref(), Some("first"));

        assert_eq!(slot.take().as_deref(), Some("second"));
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_clear_and_peek() {
        let slot = PayloadSlot::new();
        assert!(!slot.clear());
        slot.stage("hello".to_string());
        assert_eq!(slot.peek_len(), Some(5));
        assert!(slot.is_staged());
        assert!(slot.clear());
        assert_eq!(slot.peek_len(), None);
    }

    #[test]
    fn test_concurrent_take_yields_once() {
        let slot = Arc::new(PayloadSlot::new());
        slot.stage("payload".to_string());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let slot = slot.clone();
                std::thread::spawn(move || slot.take())
            })
            .collect();
        let taken = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();
        assert_eq!(taken, 1);
    }
}
