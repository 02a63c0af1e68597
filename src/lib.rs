//! hid-injector - USB HID keyboard gadget with staged keystroke injection
//!
//! The device enumerates as a boot keyboard on a host. A payload staged over
//! HTTP is typed into the host when a trigger fires.

pub mod config;
pub mod error;
pub mod events;
pub mod gadget;
pub mod hid;
pub mod payload;
pub mod state;
pub mod surface;
pub mod trigger;
pub mod utils;
pub mod web;

pub use error::{AppError, Result};
