//! System event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

/// System event enumeration
///
/// All events are tagged with their event name for serialization.
/// The `serde(tag = "event", content = "data")` attribute creates a
/// JSON structure like:
/// ```json
/// {
///   "event": "gadget.state_changed",
///   "data": { "state": "active" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    // ============================================================================
    // Gadget Events
    // ============================================================================
    /// Gadget session moved to a new state
    #[serde(rename = "gadget.state_changed")]
    GadgetStateChanged {
        /// "unbound", "bound", "config_pending", "active", "bind_failed", "disconnected"
        state: String,
    },

    // ============================================================================
    // Payload Events
    // ============================================================================
    /// A payload replaced the staged slot
    #[serde(rename = "payload.staged")]
    PayloadStaged {
        /// Payload length in bytes
        length: usize,
    },

    #[serde(rename = "payload.cleared")]
    PayloadCleared,

    // ============================================================================
    // Trigger / Injection Events
    // ============================================================================
    /// A trigger signal was accepted
    #[serde(rename = "trigger.fired")]
    TriggerFired {
        /// "gpio" or "manual"
        source: String,
    },

    #[serde(rename = "inject.started")]
    InjectStarted { length: usize },

    #[serde(rename = "inject.completed")]
    InjectCompleted {
        typed: usize,
        skipped: usize,
        /// Presses the controller refused
        dropped: usize,
    },

    #[serde(rename = "inject.failed")]
    InjectFailed { reason: String },

    // ============================================================================
    // System Events
    // ============================================================================
    /// Error on a component that has no dedicated event
    #[serde(rename = "system.error")]
    SystemError {
        /// Error message
        message: String,
    },
}

impl SystemEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::GadgetStateChanged { .. } => "gadget.state_changed",
            Self::PayloadStaged { .. } => "payload.staged",
            Self::PayloadCleared => "payload.cleared",
            Self::TriggerFired { .. } => "trigger.fired",
            Self::InjectStarted { .. } => "inject.started",
            Self::InjectCompleted { .. } => "inject.completed",
            Self::InjectFailed { .. } => "inject.failed",
            Self::SystemError { .. } => "system.error",
        }
    }

    /// Check if event matches a topic pattern
    ///
    /// Supports wildcards:
    /// - `*` matches all events
    /// - `inject.*` matches all injection events
    /// - `gadget.state_changed` matches exact event
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if let Some(prefix) = topic.strip_suffix(".*") {
            event_name
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
        } else {
            event_name == topic
        }
    }
}
