//! Keyboard side of the gadget
//!
//! ```text
//! text --> keymap::translate --> KeyboardReport --> ReportTransmitter --> interrupt IN
//!                                     (press, hold, release)
//! ```

pub mod injector;
pub mod keymap;
pub mod report;
pub mod transmitter;

pub use injector::{InjectionSummary, Injector, Pacing};
pub use keymap::{translate, KeyStroke, MOD_LEFT_SHIFT};
pub use report::KeyboardReport;
pub use transmitter::ReportTransmitter;
