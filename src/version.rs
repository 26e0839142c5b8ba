//! Dotted version numbers as reported by the News app

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid version number: '{0}'")]
pub struct ParseVersionError(pub String);

/// Version number with any count of numeric segments
///
/// Parsing is lenient: leading numeric segments are taken and anything from
/// the first non-numeric segment on is ignored, so `"18.0.4-beta"` reads as
/// `18.0.4`. Missing trailing segments compare as zero, `5.2 == 5.2.0`.
#[derive(Debug, Clone, Eq)]
pub struct Version {
    segments: Vec<u64>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            segments: vec![major, minor, patch],
        }
    }

    pub fn segments(&self) -> &[u64] {
        &self.segments
    }

    fn segment(&self, idx: usize) -> u64 {
        self.segments.get(idx).copied().unwrap_or(0)
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();
        for part in s.trim().split('.') {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            if digits.is_empty() {
                break;
            }
            let value = digits
                .parse::<u64>()
                .map_err(|_| ParseVersionError(s.to_string()))?;
            segments.push(value);
            if digits.len() != part.len() {
                break;
            }
        }

        if segments.is_empty() {
            return Err(ParseVersionError(s.to_string()));
        }

        Ok(Self { segments })
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let len = self.segments.len().max(other.segments.len());
        (0..len)
            .map(|i| self.segment(i).cmp(&other.segment(i)))
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.segments.iter().map(u64::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let v: Version = "6.0.5".parse().unwrap();
        assert_eq!(v.segments(), &[6, 0, 5]);
        assert_eq!(v.to_string(), "6.0.5");
    }

    #[test]
    fn test_parse_suffix_is_ignored() {
        let v: Version = "18.0.4-beta.2".parse().unwrap();
        assert_eq!(v, Version::new(18, 0, 4));
    }

    #[test]
    fn test_parse_invalid() {
        assert!("".parse::<Version>().is_err());
        assert!("abc".parse::<Version>().is_err());
    }

    #[test]
    fn test_missing_segments_compare_as_zero() {
        let short: Version = "5.2".parse().unwrap();
        assert_eq!(short, Version::new(5, 2, 0));
        assert!(short < Version::new(5, 2, 4));
    }

    #[test]
    fn test_ordering() {
        assert!(Version::new(5, 2, 3) < Version::new(5, 2, 4));
        assert!(Version::new(6, 0, 5) >= Version::new(6, 0, 5));
        assert!(Version::new(10, 0, 0) > Version::new(9, 9, 9));
    }
}
