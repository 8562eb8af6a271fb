/*!
 * ============================================================================
 * KEY TABLE
 * ============================================================================
 *
 * PURPOSE: Key name -> DevTools key event descriptor
 *
 * Input.dispatchKeyEvent needs the DOM `key`, `code` and the legacy
 * Windows virtual key code, otherwise many slide front-ends ignore the
 * event.
 *
 * ============================================================================
 */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDescriptor {
    pub key: &'static str,
    pub code: &'static str,
    pub key_code: u32,
    // Printable keys also need `text` on keyDown
    pub text: Option<&'static str>,
}

const KEYS: &[KeyDescriptor] = &[
    KeyDescriptor {
        key: "ArrowRight",
        code: "ArrowRight",
        key_code: 39,
        text: None,
    },
    KeyDescriptor {
        key: "ArrowLeft",
        code: "ArrowLeft",
        key_code: 37,
        text: None,
    },
    KeyDescriptor {
        key: "ArrowDown",
        code: "ArrowDown",
        key_code: 40,
        text: None,
    },
    KeyDescriptor {
        key: "PageDown",
        code: "PageDown",
        key_code: 34,
        text: None,
    },
    KeyDescriptor {
        key: " ",
        code: "Space",
        key_code: 32,
        text: Some(" "),
    },
    KeyDescriptor {
        key: "Enter",
        code: "Enter",
        key_code: 13,
        text: Some("\r"),
    },
    KeyDescriptor {
        key: "Escape",
        code: "Escape",
        key_code: 27,
        text: None,
    },
    KeyDescriptor {
        key: "F5",
        code: "F5",
        key_code: 116,
        text: None,
    },
    KeyDescriptor {
        key: "F11",
        code: "F11",
        key_code: 122,
        text: None,
    },
    KeyDescriptor {
        key: "f",
        code: "KeyF",
        key_code: 70,
        text: Some("f"),
    },
];

/// Look up a key by DOM name; "Space" is accepted for " "
pub fn lookup(name: &str) -> Option<KeyDescriptor> {
    let name = if name.eq_ignore_ascii_case("space") {
        " "
    } else {
        name
    };
    KEYS.iter().find(|k| k.key == name).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_keys() {
        assert_eq!(lookup("ArrowRight").unwrap().key_code, 39);
        assert_eq!(lookup("Escape").unwrap().key_code, 27);

        let f = lookup("f").unwrap();
        assert_eq!(f.code, "KeyF");
        assert_eq!(f.text, Some("f"));
    }

    #[test]
    fn test_space_alias() {
        assert_eq!(lookup("Space").unwrap().code, "Space");
        assert_eq!(lookup(" ").unwrap().key_code, 32);
    }

    #[test]
    fn test_table_has_unique_keys() {
        for (idx, entry) in KEYS.iter().enumerate() {
            assert!(!entry.code.is_empty());
            assert!(KEYS[idx + 1..].iter().all(|other| other.key != entry.key));
        }
        assert_eq!(lookup("Enter").unwrap().text, Some("\r"));
    }

    #[test]
    fn test_unknown_key() {
        assert!(lookup("Hyper").is_none());
    }
}
