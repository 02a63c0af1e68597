//! GPIO edge trigger
//!
//! Watches one line through the GPIO character device on a blocking thread
//! and fires the trigger on each debounced edge.

use gpio_cdev::{Chip, EventRequestFlags, EventType, LineRequestFlags};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Debouncer, TriggerHandle, TriggerSource};
use crate::config::TriggerConfig;
use crate::error::{AppError, Result};

const CONSUMER: &str = "hid-injector";

/// Running GPIO watcher; stops after the next edge once dropped
pub struct GpioTrigger {
    stop: Arc<AtomicBool>,
}

impl GpioTrigger {
    pub fn start(config: &TriggerConfig, handle: TriggerHandle) -> Result<Self> {
        info!(
            "Watching {} line {} for {} edges",
            config.gpio_chip,
            config.pin,
            if config.active_low { "falling" } else { "rising" }
        );

        let mut chip = Chip::new(&config.gpio_chip)
            .map_err(|e| AppError::Internal(format!("Trigger GPIO chip failed: {}", e)))?;
        let line = chip.get_line(config.pin).map_err(|e| {
            AppError::Internal(format!("Trigger GPIO line {} failed: {}", config.pin, e))
        })?;

        let edge = if config.active_low {
            EventRequestFlags::FALLING_EDGE
        } else {
            EventRequestFlags::RISING_EDGE
        };
        let events = line
            .events(LineRequestFlags::INPUT, edge, CONSUMER)
            .map_err(|e| AppError::Internal(format!("Trigger GPIO request failed: {}", e)))?;

        let active_low = config.active_low;
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let mut debouncer = Debouncer::new(config.debounce());

        thread::Builder::new()
            .name("gpio-trigger".to_string())
            .spawn(move || {
                for event in events {
                    if thread_stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let event = match event {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("GPIO trigger read failed: {}", e);
                            break;
                        }
                    };
                    if !is_trigger_edge(active_low, event.event_type()) {
                        continue;
                    }
                    if !debouncer.accept(Duration::from_nanos(event.timestamp())) {
                        debug!("GPIO edge within debounce window ignored");
                        continue;
                    }
                    handle.fire(TriggerSource::Gpio);
                }
                debug!("GPIO trigger thread stopped");
            })?;

        Ok(Self { stop })
    }
}

/// Falling edges fire an active-low line, rising edges any other
fn is_trigger_edge(active_low: bool, event: EventType) -> bool {
    match event {
        EventType::FallingEdge => active_low,
        EventType::RisingEdge => !active_low,
    }
}

impl Drop for GpioTrigger {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
