//! Logical key identifier validation

use once_cell::sync::Lazy;
use regex::Regex;

/// Cached pattern for logical key identifiers (compiled once)
static KEY_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]{1,255}$").expect("Invalid key id regex pattern"));

/// Whether `key_id` is a syntactically valid logical key identifier
///
/// Valid identifiers are 1 to 255 ASCII letters, digits, `_`, `.` or `-`,
/// so their byte length always fits the one-byte prefix of a ciphertext blob.
pub fn is_valid_key_id(key_id: &str) -> bool {
    KEY_ID_REGEX.is_match(key_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_id_is_rejected() {
        assert!(!is_valid_key_id(""));
    }

    #[test]
    fn test_length_boundary() {
        assert!(is_valid_key_id(&"a".repeat(1)));
        assert!(is_valid_key_id(&"a".repeat(255)));
        assert!(!is_valid_key_id(&"a".repeat(256)));
    }

    #[test]
    fn test_allowed_characters() {
        assert!(is_valid_key_id("19ec80b0-dfdd-4d97-8164-c6examplekey"));
        assert!(is_valid_key_id("Alias_1.prod-EU"));
    }

    #[test]
    fn test_disallowed_characters() {
        assert!(!is_valid_key_id("user@example"));
        assert!(!is_valid_key_id("alias/prod"));
        assert!(!is_valid_key_id("with space"));
        assert!(!is_valid_key_id("trailing-newline\n"));
        assert!(!is_valid_key_id("clé"));
    }
}
