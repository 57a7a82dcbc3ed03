//! Text normalization shared by every index and every query.
//!
//! All comparisons in this crate happen between strings produced by
//! [`encode_string`]: lower-case ASCII letters and digits only, with no
//! whitespace at all ("The Beatles" → "thebeatles"). An empty result is a
//! legal value that callers must treat as unmatchable.

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Everything that is not a letter, a digit, a combining mark or a space.
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\p{M} ]+").unwrap());

/// Any whitespace, removed outright rather than collapsed.
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Check if a character is a Unicode combining mark (diacritical mark).
pub fn is_combining_mark(c: char) -> bool {
    matches!(
        c as u32,
        0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F
    )
}

/// Fold Unicode text to ASCII by applying NFKD decomposition and removing combining marks,
/// then transliterating whatever is left (Cyrillic, Hebrew, CJK, ...).
/// e.g., "Beyoncé" → "beyonce", "кино" → "kino"
pub fn fold_to_ascii(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    any_ascii(&stripped).to_lowercase()
}

/// True when every alphabetic character belongs to one of the Latin blocks.
/// Names failing this check get their sort name indexed as an alias.
pub fn is_latin_only(s: &str) -> bool {
    s.chars().filter(|c| c.is_alphabetic()).all(|c| {
        matches!(c as u32, 0x0041..=0x024F | 0x1E00..=0x1EFF | 0x2C60..=0x2C7F | 0xA720..=0xA7FF)
    })
}

// ============================================================================
// NORMALIZATION FUNCTIONS
// ============================================================================

/// Canonicalize free text for fuzzy comparison.
///
/// Strips punctuation, removes every space, folds diacritics and non-Latin
/// scripts to ASCII and lower-cases. `None` in gives `None` out.
/// The output alphabet is `[a-z0-9]`, which makes the function idempotent.
pub fn encode_string(text: Option<&str>) -> Option<String> {
    let text = text?;
    let words = NON_WORD.replace_all(text, "");
    let joined = WHITESPACE.replace_all(&words, "");
    let folded = fold_to_ascii(&joined);
    Some(folded.chars().filter(|c| c.is_ascii_alphanumeric()).collect())
}

/// Shorthand for [`encode_string`] on text that is known to be present.
pub fn encode(text: &str) -> String {
    encode_string(Some(text)).unwrap_or_default()
}

/// Encoding for names made of punctuation only ("!!!", "¿?", "+/-").
///
/// [`encode_string`] reduces such names to nothing, so they are indexed
/// separately with punctuation kept: folded to ASCII, whitespace removed,
/// lower-cased, printable ASCII only.
pub fn encode_symbolic(text: &str) -> String {
    let folded = fold_to_ascii(text);
    folded.chars().filter(|c| c.is_ascii_graphic()).collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_string_basic() {
        assert_eq!(encode("The Beatles"), "thebeatles");
        assert_eq!(encode("Let It Be"), "letitbe");
        assert_eq!(encode("  AC/DC  "), "acdc");
        assert_eq!(encode("Guns N' Roses"), "gunsnroses");
    }

    #[test]
    fn test_encode_string_none() {
        assert_eq!(encode_string(None), None);
        assert_eq!(encode_string(Some("")), Some(String::new()));
    }

    #[test]
    fn test_encode_string_only_punctuation_is_empty() {
        assert_eq!(encode("!!!"), "");
        assert_eq!(encode(" - "), "");
    }

    #[test]
    fn test_fold_to_ascii() {
        assert_eq!(fold_to_ascii("Björk"), "bjork");
        assert_eq!(fold_to_ascii("Motörhead"), "motorhead");
        assert_eq!(fold_to_ascii("Beyoncé"), "beyonce");
    }

    #[test]
    fn test_encode_non_latin() {
        assert_eq!(encode("Кино"), "kino");
        assert_eq!(encode("Sigur Rós"), "sigurros");
        assert!(!encode("幾何学模様").is_empty());
    }

    #[test]
    fn test_encode_is_idempotent() {
        let samples = [
            "The Beatles",
            "Motörhead – Ace of Spades (Live)",
            "Кино / Группа крови",
            "幾何学模様",
            "Hello_World 2",
            "  \t mixed\nwhitespace ",
            "ǅemal",
            "",
        ];
        for s in samples {
            let once = encode(s);
            assert_eq!(encode(&once), once, "not idempotent for {:?}", s);
            assert!(once.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_encode_symbolic() {
        assert_eq!(encode_symbolic("!!!"), "!!!");
        assert_eq!(encode_symbolic("+ / -"), "+/-");
        assert_eq!(encode_symbolic("   "), "");
    }

    #[test]
    fn test_is_latin_only() {
        assert!(is_latin_only("The Beatles"));
        assert!(is_latin_only("Motörhead"));
        assert!(is_latin_only("!!!"));
        assert!(!is_latin_only("幾何学模様"));
        assert!(!is_latin_only("Кино"));
    }
}
