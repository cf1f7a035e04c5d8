//! Card key normalization
//!
//! Every component identifies a physical card printing by a single string
//! of the form `SET~NUMBER`. The set code is trimmed and uppercased; the
//! number has its leading zeros stripped, is padded back to three digits and
//! keeps an uppercased alphabetic suffix:
//!
//! ```text
//! ("SVI", "5")    -> SVI~005
//! ("svi", "18a")  -> SVI~018A
//! ("TWM", "0025") -> TWM~025
//! ```
//!
//! The generator and the resolver must run the exact same normalization,
//! otherwise lookups against a published index silently miss.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SubsetError;

/// Separator between set code and number
pub const KEY_SEPARATOR: char = '~';

/// Canonical identifier for one card printing
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CardKey(String);

impl CardKey {
    /// Build a key from a raw set code and number.
    ///
    /// Returns `None` when the set code or the number is blank.
    pub fn normalize(set_code: &str, number: &str) -> Option<CardKey> {
        let set = normalize_set_code(set_code)?;
        let number = normalize_card_number(number)?;
        Some(CardKey(format!("{}{}{}", set, KEY_SEPARATOR, number)))
    }

    /// Parse a `SET~NUMBER` string, normalizing both halves
    pub fn parse(raw: &str) -> Option<CardKey> {
        let (set, number) = raw.trim().split_once(KEY_SEPARATOR)?;
        Self::normalize(set, number)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Set code half of the key
    pub fn set_code(&self) -> &str {
        self.0.split_once(KEY_SEPARATOR).map(|(s, _)| s).unwrap_or(&self.0)
    }

    /// Number half of the key
    pub fn number(&self) -> &str {
        self.0.split_once(KEY_SEPARATOR).map(|(_, n)| n).unwrap_or("")
    }
}

impl fmt::Display for CardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CardKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for CardKey {
    type Err = SubsetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CardKey::parse(s).ok_or_else(|| SubsetError::InvalidCardKey(s.to_string()))
    }
}

impl TryFrom<String> for CardKey {
    type Error = SubsetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CardKey> for String {
    fn from(key: CardKey) -> Self {
        key.0
    }
}

/// Trim and uppercase a set code; `None` when blank
pub fn normalize_set_code(set_code: &str) -> Option<String> {
    let set = set_code.trim().to_uppercase();
    if set.is_empty() {
        None
    } else {
        Some(set)
    }
}

/// Normalize a card number to three digits plus an optional uppercase suffix.
///
/// Numbers that are not `digits + letters` (e.g. `"SWSH050"`) are only
/// trimmed and uppercased.
pub fn normalize_card_number(number: &str) -> Option<String> {
    let raw = number.trim();
    if raw.is_empty() {
        return None;
    }

    let digit_end = raw
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(raw.len());
    let (digits, suffix) = raw.split_at(digit_end);

    if digits.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphabetic()) {
        return Some(raw.to_uppercase());
    }

    let trimmed = digits.trim_start_matches('0');
    let trimmed = if trimmed.is_empty() { "0" } else { trimmed };
    Some(format!("{:0>3}{}", trimmed, suffix.to_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_pads_number() {
        assert_eq!(CardKey::normalize("SVI", "5").unwrap().as_str(), "SVI~005");
    }

    #[test]
    fn test_normalize_suffix_and_case() {
        assert_eq!(CardKey::normalize("svi", "18a").unwrap().as_str(), "SVI~018A");
        assert_eq!(CardKey::normalize(" par ", "072").unwrap().as_str(), "PAR~072");
    }

    #[test]
    fn test_equivalent_representations_collapse() {
        let a = CardKey::normalize("TWM", "25").unwrap();
        let b = CardKey::normalize("twm", "0025").unwrap();
        let c = CardKey::normalize("TWM ", " 025").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn test_blank_parts_rejected() {
        assert!(CardKey::normalize("", "5").is_none());
        assert!(CardKey::normalize("   ", "5").is_none());
        assert!(CardKey::normalize("SVI", "").is_none());
    }

    #[test]
    fn test_non_numeric_number_kept() {
        assert_eq!(CardKey::normalize("SVP", "swsh050").unwrap().as_str(), "SVP~SWSH050");
        assert_eq!(normalize_card_number("0"), Some("000".to_string()));
    }

    #[test]
    fn test_parse_round_trips_through_normalization() {
        let key: CardKey = "svi~5".parse().unwrap();
        assert_eq!(key.as_str(), "SVI~005");
        assert_eq!(key.set_code(), "SVI");
        assert_eq!(key.number(), "005");
        assert!("no-separator".parse::<CardKey>().is_err());
    }

    #[test]
    fn test_serde_normalizes_on_read() {
        let key: CardKey = serde_json::from_str("\"obf~9\"").unwrap();
        assert_eq!(key.as_str(), "OBF~009");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"OBF~009\"");
    }
}
