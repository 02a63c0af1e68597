use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::gadget::descriptor::GadgetIdentity;
use crate::gadget::raw::RAW_GADGET_PATH;
use crate::gadget::session::{SessionOptions, DEFAULT_BIND_DELAY_MS};
use crate::gadget::transfer::DEFAULT_MAX_IN_FLIGHT;
use crate::hid::injector::{Pacing, DEFAULT_PRESS_HOLD_MS};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// USB gadget settings
    pub gadget: GadgetConfig,
    /// Keystroke pacing and batching
    pub inject: InjectConfig,
    /// Physical trigger settings
    pub trigger: TriggerConfig,
    /// Web server settings
    pub web: WebConfig,
}

/// Controller backend
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GadgetBackend {
    /// Linux raw-gadget device
    #[default]
    Raw,
    /// In-memory controller with a scripted host
    Simulated,
}

/// USB gadget configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GadgetConfig {
    pub backend: GadgetBackend,
    /// raw-gadget character device
    pub raw_gadget_path: String,
    /// UDC driver name (empty = detect from /sys/class/udc)
    pub udc_driver: String,
    /// UDC device name (empty = detect from /sys/class/udc)
    pub udc_device: String,
    /// USB Vendor ID (e.g., 0x1d6b)
    pub vendor_id: u16,
    /// USB Product ID (e.g., 0x0137)
    pub product_id: u16,
    /// Device version (BCD)
    pub bcd_device: u16,
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
    /// Delay between SET_CONFIGURATION and endpoint enable
    pub bind_delay_ms: u64,
    /// Reports allowed in flight at once
    pub max_in_flight: usize,
}

impl Default for GadgetConfig {
    fn default() -> Self {
        let identity = GadgetIdentity::default();
        Self {
            backend: GadgetBackend::Raw,
            raw_gadget_path: RAW_GADGET_PATH.to_string(),
            udc_driver: String::new(),
            udc_device: String::new(),
            vendor_id: identity.vendor_id,
            product_id: identity.product_id,
            bcd_device: identity.bcd_device,
            manufacturer: identity.manufacturer,
            product: identity.product,
            serial_number: identity.serial_number,
            bind_delay_ms: DEFAULT_BIND_DELAY_MS,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl GadgetConfig {
    pub fn identity(&self) -> GadgetIdentity {
        GadgetIdentity {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            bcd_device: self.bcd_device,
            manufacturer: self.manufacturer.clone(),
            product: self.product.clone(),
            serial_number: self.serial_number.clone(),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            bind_delay: Duration::from_millis(self.bind_delay_ms),
            max_in_flight: self.max_in_flight.max(1),
        }
    }

    pub fn raw_gadget_path(&self) -> PathBuf {
        PathBuf::from(&self.raw_gadget_path)
    }
}

/// Injection pacing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InjectConfig {
    /// Time a key is held before release
    pub press_delay_ms: u64,
    /// Pause after each release
    pub release_delay_ms: u64,
    /// Characters handed to the control surface per write
    pub batch_size: usize,
    /// Pause between batches
    pub batch_delay_ms: u64,
}

impl Default for InjectConfig {
    fn default() -> Self {
        Self {
            press_delay_ms: DEFAULT_PRESS_HOLD_MS,
            release_delay_ms: 0,
            batch_size: 16,
            batch_delay_ms: 50,
        }
    }
}

impl InjectConfig {
    pub fn pacing(&self) -> Pacing {
        Pacing {
            press_hold: Duration::from_millis(self.press_delay_ms),
            release_gap: Duration::from_millis(self.release_delay_ms),
        }
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

/// GPIO trigger configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TriggerConfig {
    pub enabled: bool,
    /// GPIO chip device (e.g., /dev/gpiochip0)
    pub gpio_chip: String,
    /// Line offset on the chip
    pub pin: u32,
    /// Signals closer together than this count as one
    pub debounce_ms: u64,
    /// Fire on the falling edge (button pulls the line low)
    pub active_low: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gpio_chip: "/dev/gpiochip0".to_string(),
            pin: 21,
            debounce_ms: 200,
            active_low: true,
        }
    }
}

impl TriggerConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    /// HTTP port
    pub http_port: u16,
    /// Bind address
    pub bind_address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            http_port: 8080,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

/// Partial update of [`InjectConfig`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InjectConfigUpdate {
    pub press_delay_ms: Option<u64>,
    pub release_delay_ms: Option<u64>,
    pub batch_size: Option<usize>,
    pub batch_delay_ms: Option<u64>,
}

impl InjectConfigUpdate {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.batch_size == Some(0) {
            return Err(crate::error::AppError::BadRequest(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.press_delay_ms.is_some_and(|ms| ms > 1000) {
            return Err(crate::error::AppError::BadRequest(
                "press_delay_ms must be at most 1000".to_string(),
            ));
        }
        Ok(())
    }

    pub fn apply_to(&self, config: &mut InjectConfig) {
        if let Some(v) = self.press_delay_ms {
            config.press_delay_ms = v;
        }
        if let Some(v) = self.release_delay_ms {
            config.release_delay_ms = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.batch_delay_ms {
            config.batch_delay_ms = v;
        }
    }
}
