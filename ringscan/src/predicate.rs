use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::ScanError;

/// How a line's length is compared with the threshold.
///
/// In configuration files the mode is written as a numeric code:
/// `-1` (less than), `0` (equal) or `1` (greater than).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum ComparisonMode {
    LessThan,
    Equal,
    GreaterThan,
}

impl ComparisonMode {
    /// Whether `length <op> threshold` holds for this mode
    pub fn holds(self, length: usize, threshold: usize) -> bool {
        match self {
            ComparisonMode::LessThan => length < threshold,
            ComparisonMode::Equal => length == threshold,
            ComparisonMode::GreaterThan => length > threshold,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonMode::LessThan => "<",
            ComparisonMode::Equal => "==",
            ComparisonMode::GreaterThan => ">",
        }
    }
}

impl TryFrom<i64> for ComparisonMode {
    type Error = ScanError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            -1 => Ok(ComparisonMode::LessThan),
            0 => Ok(ComparisonMode::Equal),
            1 => Ok(ComparisonMode::GreaterThan),
            other => Err(ScanError::config_error(format!(
                "search_mode must be -1, 0 or 1, got {}",
                other
            ))),
        }
    }
}

impl From<ComparisonMode> for i64 {
    fn from(mode: ComparisonMode) -> Self {
        match mode {
            ComparisonMode::LessThan => -1,
            ComparisonMode::Equal => 0,
            ComparisonMode::GreaterThan => 1,
        }
    }
}

impl fmt::Display for ComparisonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Matches lines by their length in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthPredicate {
    threshold: usize,
    mode: ComparisonMode,
}

impl LengthPredicate {
    pub fn new(threshold: usize, mode: ComparisonMode) -> Self {
        Self { threshold, mode }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn mode(&self) -> ComparisonMode {
        self.mode
    }

    /// Returns true when the line should be reported
    pub fn matches(&self, line: &str) -> bool {
        self.mode.holds(line.len(), self.threshold)
    }
}

impl fmt::Display for LengthPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "len {} {}", self.mode, self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_less_than() {
        let predicate = LengthPredicate::new(5, ComparisonMode::LessThan);
        assert!(predicate.matches("abc"));
        assert!(!predicate.matches("abcde"));
        assert!(!predicate.matches("abcdefg"));
        assert!(predicate.matches(""));
    }

    #[test]
    fn test_equal() {
        let predicate = LengthPredicate::new(5, ComparisonMode::Equal);
        assert!(!predicate.matches("abc"));
        assert!(predicate.matches("abcde"));
        assert!(!predicate.matches("abcdefg"));
    }

    #[test]
    fn test_greater_than() {
        let predicate = LengthPredicate::new(5, ComparisonMode::GreaterThan);
        assert!(!predicate.matches("abc"));
        assert!(!predicate.matches("abcde"));
        assert!(predicate.matches("abcdefg"));
    }

    #[test]
    fn test_length_counts_bytes() {
        // "żółć" is four characters but eight bytes
        let predicate = LengthPredicate::new(8, ComparisonMode::Equal);
        assert!(predicate.matches("żółć"));
    }

    #[test]
    fn test_mode_codes() {
        assert_eq!(
            ComparisonMode::try_from(-1i64).unwrap(),
            ComparisonMode::LessThan
        );
        assert_eq!(ComparisonMode::try_from(0i64).unwrap(), ComparisonMode::Equal);
        assert_eq!(
            ComparisonMode::try_from(1i64).unwrap(),
            ComparisonMode::GreaterThan
        );
        assert!(ComparisonMode::try_from(2i64).is_err());

        for mode in [
            ComparisonMode::LessThan,
            ComparisonMode::Equal,
            ComparisonMode::GreaterThan,
        ] {
            assert_eq!(ComparisonMode::try_from(i64::from(mode)).unwrap(), mode);
        }
    }

    #[test]
    fn test_display() {
        let predicate = LengthPredicate::new(3, ComparisonMode::GreaterThan);
        assert_eq!(predicate.to_string(), "len > 3");
    }
}
