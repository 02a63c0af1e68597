//! USB gadget-side engine
//!
//! Presents a boot-protocol HID keyboard to a host through a device
//! controller. The controller is reached through [`UdcDriver`], implemented by
//! the Linux raw-gadget backend and by an in-memory simulation.
//!
//! ```text
//! BusEvent --> runner --> GadgetSession::setup --> setup::dispatch
//!                                 |                   |
//!                                 |        SET_CONFIGURATION
//!                                 |                   v
//!                                 |          DeferredTask --> binder::run
//!                                 v
//!                        disconnect / unbind
//! ```

pub mod binder;
pub mod deferred;
pub mod descriptor;
pub mod raw;
pub mod report_desc;
pub mod runner;
pub mod session;
pub mod setup;
pub mod sim;
pub mod transfer;
pub mod udc;

pub use descriptor::{DescriptorSet, GadgetIdentity};
pub use raw::{detect_udc, RawGadget, RawGadgetConfig};
pub use runner::run_bus_events;
pub use session::{GadgetSession, SessionOptions, SessionShared, SessionState};
pub use setup::ControlRequest;
pub use sim::SimulatedUdc;
pub use udc::{BusEvent, EndpointInfo, UdcDriver};
