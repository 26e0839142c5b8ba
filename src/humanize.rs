//! Human-readable duration parsing for configuration values

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid duration format: {0}")]
    InvalidFormat(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),
}

/// Whole-second duration wrapper accepting `300`, `"300"`, `"300s"`, `"5m"` or `"1h"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Seconds(pub u64);

impl Seconds {
    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }

    pub fn to_human_readable(&self) -> String {
        const UNITS: &[(&str, u64)] = &[("s", 1), ("m", 60), ("h", 60 * 60)];

        for &(unit, divisor) in UNITS.iter().rev() {
            if self.0 >= divisor && self.0 % divisor == 0 {
                return format!("{}{}", self.0 / divisor, unit);
            }
        }

        format!("{}s", self.0)
    }
}

impl From<Seconds> for Duration {
    fn from(value: Seconds) -> Self {
        value.as_duration()
    }
}

impl<'de> Deserialize<'de> for Seconds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct SecondsVisitor;

        impl<'de> serde::de::Visitor<'de> for SecondsVisitor {
            type Value = Seconds;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a duration as string (e.g., \"30s\", \"5m\") or integer seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Seconds(v))
            }

            // Environment overrides arrive as signed integers
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(Seconds)
                    .map_err(|_| E::custom(format!("negative duration: {v}")))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse::<Seconds>().map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_any(SecondsVisitor)
    }
}

impl FromStr for Seconds {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        if let Ok(num) = s.parse::<u64>() {
            return Ok(Seconds(num));
        }

        let (num_str, unit) = if let Some(pos) = s.find(|c: char| !c.is_ascii_digit()) {
            (&s[..pos], &s[pos..])
        } else {
            return Err(ParseError::InvalidFormat(s.to_string()));
        };

        let num: u64 = num_str.parse()?;

        let multiplier = match unit.trim() {
            "s" | "sec" | "secs" => 1,
            "m" | "min" | "mins" => 60,
            "h" => 60 * 60,
            _ => return Err(ParseError::InvalidUnit(unit.to_string())),
        };

        num.checked_mul(multiplier)
            .map(Seconds)
            .ok_or_else(|| ParseError::InvalidFormat(s.to_string()))
    }
}

impl fmt::Display for Seconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_seconds() {
        assert_eq!("300".parse::<Seconds>().unwrap().as_secs(), 300);
        assert_eq!("300s".parse::<Seconds>().unwrap().as_secs(), 300);
    }

    #[test]
    fn test_parse_minutes_and_hours() {
        assert_eq!("5m".parse::<Seconds>().unwrap().as_secs(), 300);
        assert_eq!("5 min".parse::<Seconds>().unwrap().as_secs(), 300);
        assert_eq!("1h".parse::<Seconds>().unwrap().as_secs(), 3600);
    }

    #[test]
    fn test_parse_invalid_unit() {
        assert!(matches!(
            "5d".parse::<Seconds>(),
            Err(ParseError::InvalidUnit(_))
        ));
        assert!("m".parse::<Seconds>().is_err());
    }

    #[test]
    fn test_parse_overflow_is_rejected() {
        assert!(matches!(
            "18446744073709551615h".parse::<Seconds>(),
            Err(ParseError::InvalidFormat(_))
        ));
        assert_eq!(
            "18446744073709551615s".parse::<Seconds>().unwrap().as_secs(),
            u64::MAX
        );
    }

    #[test]
    fn test_to_human_readable() {
        assert_eq!(Seconds(300).to_human_readable(), "5m");
        assert_eq!(Seconds(90).to_human_readable(), "90s");
        assert_eq!(Seconds(7200).to_human_readable(), "2h");
        assert_eq!(Seconds(0).to_human_readable(), "0s");
    }

    #[test]
    fn test_deserialize_string() {
        let json = r#"{"timeout": "2m"}"#;
        #[derive(Deserialize)]
        struct TestStruct {
            timeout: Seconds,
        }
        let parsed: TestStruct = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.timeout.as_duration(), Duration::from_secs(120));
    }

    #[test]
    fn test_deserialize_number() {
        let json = r#"{"timeout": 5}"#;
        #[derive(Deserialize)]
        struct TestStruct {
            timeout: Seconds,
        }
        let parsed: TestStruct = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.timeout.as_secs(), 5);
    }
}
