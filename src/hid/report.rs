//! Keyboard input report

use super::keymap::KeyStroke;
use crate::gadget::report_desc::KEYBOARD_REPORT_LEN;

/// Boot keyboard report: modifiers, reserved, six key slots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyboardReport {
    /// Modifier byte
    pub modifiers: u8,
    /// Reserved byte, always 0
    pub reserved: u8,
    /// Key codes (only slot 0 is used for typing)
    pub keys: [u8; 6],
}

impl KeyboardReport {
    /// Report with one key held down
    pub fn press(stroke: KeyStroke) -> Self {
        Self {
            modifiers: stroke.modifiers(),
            reserved: 0,
            keys: [stroke.keycode, 0, 0, 0, 0, 0],
        }
    }

    /// All keys up
    pub fn release() -> Self {
        Self::default()
    }

    /// Convert to bytes for USB HID
    pub fn to_bytes(&self) -> [u8; KEYBOARD_REPORT_LEN] {
        [
            self.modifiers,
            self.reserved,
            self.keys[0],
            self.keys[1],
            self.keys[2],
            self.keys[3],
            self.keys[4],
            self.keys[5],
        ]
    }

    pub fn is_release(&self) -> bool {
        *self == Self::release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::keymap::translate;

    #[test]
    fn test_press_report_layout() {
        let report = KeyboardReport::press(translate('H').unwrap());
        assert_eq!(report.to_bytes(), [0x02, 0, 0x0B, 0, 0, 0, 0, 0]);
        assert!(!report.is_release());
    }

    #[test]
    fn test_release_is_all_zero() {
        assert_eq!(KeyboardReport::release().to_bytes(), [0u8; 8]);
        assert!(KeyboardReport::release().is_release());
    }
}
