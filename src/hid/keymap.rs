//! US-ASCII to USB HID keycode translation
//!
//! Reference: USB HID Usage Tables 1.12, Section 10 (Keyboard/Keypad Page)

/// USB HID key codes (Usage Page 0x07) used by the translator
pub mod usb {
    // Letters A-Z (0x04 - 0x1D)
    pub const KEY_A: u8 = 0x04;
    pub const KEY_Z: u8 = 0x1D;

    // Numbers 1-9, 0 (0x1E - 0x27)
    pub const KEY_1: u8 = 0x1E;
    pub const KEY_9: u8 = 0x26;
    pub const KEY_0: u8 = 0x27;

    // Control keys
    pub const KEY_ENTER: u8 = 0x28;
    pub const KEY_TAB: u8 = 0x2B;
    pub const KEY_SPACE: u8 = 0x2C;
    pub const KEY_MINUS: u8 = 0x2D;
    pub const KEY_EQUAL: u8 = 0x2E;
    pub const KEY_LEFT_BRACKET: u8 = 0x2F;
    pub const KEY_RIGHT_BRACKET: u8 = 0x30;
    pub const KEY_BACKSLASH: u8 = 0x31;
    pub const KEY_SEMICOLON: u8 = 0x33;
    pub const KEY_APOSTROPHE: u8 = 0x34;
    pub const KEY_GRAVE: u8 = 0x35;
    pub const KEY_COMMA: u8 = 0x36;
    pub const KEY_PERIOD: u8 = 0x37;
    pub const KEY_SLASH: u8 = 0x38;
}

/// Modifier bit for Left Shift
pub const MOD_LEFT_SHIFT: u8 = 0x02;

/// One translated keystroke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    /// HID usage code, never 0
    pub keycode: u8,
    pub shift: bool,
}

impl KeyStroke {
    const fn plain(keycode: u8) -> Self {
        Self {
            keycode,
            shift: false,
        }
    }

    const fn shifted(keycode: u8) -> Self {
        Self {
            keycode,
            shift: true,
        }
    }

    /// Modifier byte for the press report
    pub fn modifiers(&self) -> u8 {
        if self.shift {
            MOD_LEFT_SHIFT
        } else {
            0
        }
    }
}

/// Translate one character under the US keyboard layout
///
/// Returns `None` for characters without a key on the layout; callers skip those.
pub fn translate(c: char) -> Option<KeyStroke> {
    use usb::*;

    let stroke = match c {
        'a'..='z' => KeyStroke::plain(KEY_A + (c as u8 - b'a')),
        'A'..='Z' => KeyStroke::shifted(KEY_A + (c as u8 - b'A')),
        '1'..='9' => KeyStroke::plain(KEY_1 + (c as u8 - b'1')),
        '0' => KeyStroke::plain(KEY_0),

        '\n' => KeyStroke::plain(KEY_ENTER),
        '\t' => KeyStroke::plain(KEY_TAB),
        ' ' => KeyStroke::plain(KEY_SPACE),
        '-' => KeyStroke::plain(KEY_MINUS),
        '=' => KeyStroke::plain(KEY_EQUAL),
        '[' => KeyStroke::plain(KEY_LEFT_BRACKET),
        ']' => KeyStroke::plain(KEY_RIGHT_BRACKET),
        '\\' => KeyStroke::plain(KEY_BACKSLASH),
        ';' => KeyStroke::plain(KEY_SEMICOLON),
        '\'' => KeyStroke::plain(KEY_APOSTROPHE),
        '`' => KeyStroke::plain(KEY_GRAVE),
        ',' => KeyStroke::plain(KEY_COMMA),
        '.' => KeyStroke::plain(KEY_PERIOD),
        '/' => KeyStroke::plain(KEY_SLASH),

        // Shifted symbols share the base key
        '!' => KeyStroke::shifted(KEY_1),
        '@' => KeyStroke::shifted(KEY_1 + 1),
        '#' => KeyStroke::shifted(KEY_1 + 2),
        '$' => KeyStroke::shifted(KEY_1 + 3),
        '%' => KeyStroke::shifted(KEY_1 + 4),
        '^' => KeyStroke::shifted(KEY_1 + 5),
        '&' => KeyStroke::shifted(KEY_1 + 6),
        '*' => KeyStroke::shifted(KEY_1 + 7),
        '(' => KeyStroke::shifted(KEY_9),
        ')' => KeyStroke::shifted(KEY_0),
        '_' => KeyStroke::shifted(KEY_MINUS),
        '+' => KeyStroke::shifted(KEY_EQUAL),
        '{' => KeyStroke::shifted(KEY_LEFT_BRACKET),
        '}' => KeyStroke::shifted(KEY_RIGHT_BRACKET),
        '|' => KeyStroke::shifted(KEY_BACKSLASH),
        ':' => KeyStroke::shifted(KEY_SEMICOLON),
        '"' => KeyStroke::shifted(KEY_APOSTROPHE),
        '~' => KeyStroke::shifted(KEY_GRAVE),
        '<' => KeyStroke::shifted(KEY_COMMA),
        '>' => KeyStroke::shifted(KEY_PERIOD),
        '?' => KeyStroke::shifted(KEY_SLASH),

        _ => return None,
    };

    Some(stroke)
}

/// Check if a character can be typed
pub fn is_supported(c: char) -> bool {
    translate(c).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters() {
        assert_eq!(translate('a'), Some(KeyStroke::plain(0x04)));
        assert_eq!(translate('z'), Some(KeyStroke::plain(usb::KEY_Z)));
        assert_eq!(translate('A'), Some(KeyStroke::shifted(0x04)));
        assert_eq!(translate('Z'), Some(KeyStroke::shifted(0x1D)));
    }

    #[test]
    fn test_digits() {
        assert_eq!(translate('1').unwrap().keycode, 0x1E);
        assert_eq!(translate('9').unwrap().keycode, 0x26);
        assert_eq!(translate('0').unwrap().keycode, 0x27);
        assert!(!translate('0').unwrap().shift);
    }

    #[test]
    fn test_shifted_symbols_share_base_key() {
        let pairs = [
            ('!', '1'),
            ('@', '2'),
            ('#', '3'),
            ('$', '4'),
            ('%', '5'),
            ('^', '6'),
            ('&', '7'),
            ('*', '8'),
            ('(', '9'),
            (')', '0'),
            ('_', '-'),
            ('+', '='),
            ('{', '['),
            ('}', ']'),
            ('|', '\\'),
            (':', ';'),
            ('"', '\''),
            ('~', '`'),
            ('<', ','),
            ('>', '.'),
            ('?', '/'),
        ];
        for (shifted, base) in pairs {
            let s = translate(shifted).unwrap();
            let b = translate(base).unwrap();
            assert!(s.shift, "{shifted:?} should need shift");
            assert!(!b.shift, "{base:?} should not need shift");
            assert_eq!(s.keycode, b.keycode, "{shifted:?} vs {base:?}");
        }
    }

    #[test]
    fn test_whitespace() {
        assert_eq!(translate('\n').unwrap().keycode, 0x28);
        assert_eq!(translate('\t').unwrap().keycode, 0x2B);
        assert_eq!(translate(' ').unwrap().keycode, 0x2C);
    }

    #[test]
    fn test_total_and_deterministic() {
        for b in 0u8..=0x7F {
            let c = b as char;
            assert_eq!(translate(c), translate(c));
            if let Some(stroke) = translate(c) {
                assert_ne!(stroke.keycode, 0, "{c:?} mapped to reserved keycode");
            }
        }
    }

    #[test]
    fn test_unsupported() {
        assert!(translate('\r').is_none());
        assert!(translate('\0').is_none());
        assert!(translate('\x7f').is_none());
        assert!(translate('é').is_none());
        assert!(translate('€').is_none());
        assert!(!is_supported('\x1b'));
    }

    #[test]
    fn test_printable_ascii_fully_covered() {
        for b in 0x20u8..0x7F {
            assert!(is_supported(b as char), "{:?} unsupported", b as char);
        }
    }

    #[test]
    fn test_modifiers() {
        assert_eq!(translate('H').unwrap().modifiers(), MOD_LEFT_SHIFT);
        assert_eq!(translate('h').unwrap().modifiers(), 0);
    }
}
