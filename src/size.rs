use std::{fmt, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// A byte count that parses from and renders to human-readable strings such as
/// `10MB`, `1 KiB` or `1.0 kB`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseByteSizeError {
    #[error("invalid size number {0:?}")]
    InvalidNumber(String),
    #[error("unhandled size name: {0}")]
    UnknownUnit(String),
    #[error("too large: {0}")]
    TooLarge(String),
}

static SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<number>[0-9.,]*)(?P<unit>.*)$").expect("valid size regex"));

const DECIMAL_UNITS: [&str; 7] = ["B", "kB", "MB", "GB", "TB", "PB", "EB"];

fn unit_multiplier(unit: &str) -> Option<u64> {
    let multiplier = match unit {
        "" | "b" => 1,
        "k" | "kb" => 1_000,
        "ki" | "kib" => 1 << 10,
        "m" | "mb" => 1_000_000,
        "mi" | "mib" => 1 << 20,
        "g" | "gb" => 1_000_000_000,
        "gi" | "gib" => 1 << 30,
        "t" | "tb" => 1_000_000_000_000,
        "ti" | "tib" => 1 << 40,
        "p" | "pb" => 1_000_000_000_000_000,
        "pi" | "pib" => 1 << 50,
        "e" | "eb" => 1_000_000_000_000_000_000,
        "ei" | "eib" => 1 << 60,
        _ => return None,
    };

    Some(multiplier)
}

impl FromStr for ByteSize {
    type Err = ParseByteSizeError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let captures = SIZE_RE
            .captures(input)
            .ok_or_else(|| ParseByteSizeError::InvalidNumber(input.to_owned()))?;

        let number = captures["number"].replace(',', "");
        let value: f64 = number
            .parse()
            .map_err(|_| ParseByteSizeError::InvalidNumber(number.clone()))?;

        let unit = captures["unit"].trim().to_lowercase();
        let multiplier = unit_multiplier(&unit).ok_or(ParseByteSizeError::UnknownUnit(unit))?;

        let bytes = value * multiplier as f64;
        if bytes >= u64::MAX as f64 {
            return Err(ParseByteSizeError::TooLarge(input.to_owned()));
        }

        Ok(Self(bytes as u64))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 10 {
            return write!(f, "{} B", self.0);
        }

        let raw = self.0 as f64;
        let exponent = (raw.ln() / 1000f64.ln()).floor() as usize;
        let exponent = exponent.min(DECIMAL_UNITS.len() - 1);
        let value = (raw / 1000f64.powi(exponent as i32) * 10.0 + 0.5).floor() / 10.0;

        if value < 10.0 {
            write!(f, "{:.1} {}", value, DECIMAL_UNITS[exponent])
        } else {
            write!(f, "{:.0} {}", value, DECIMAL_UNITS[exponent])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> u64 {
        input
            .parse::<ByteSize>()
            .unwrap_or_else(|err| panic!("{input:?} should parse: {err}"))
            .as_u64()
    }

    #[test]
    fn parses_decimal_and_binary_units() {
        assert_eq!(parse("0"), 0);
        assert_eq!(parse("42"), 42);
        assert_eq!(parse("42 b"), 42);
        assert_eq!(parse("1KB"), 1_000);
        assert_eq!(parse("1kb"), 1_000);
        assert_eq!(parse("1 KiB"), 1_024);
        assert_eq!(parse("10MB"), 10_000_000);
        assert_eq!(parse("10M"), 10_000_000);
        assert_eq!(parse("2 mib"), 2 * 1_048_576);
        assert_eq!(parse("1.5GB"), 1_500_000_000);
        assert_eq!(parse("1,000 kB"), 1_000_000);
    }

    #[test]
    fn rejects_unknown_units_and_missing_numbers() {
        assert_eq!(
            "12 parsecs".parse::<ByteSize>(),
            Err(ParseByteSizeError::UnknownUnit("parsecs".into()))
        );
        assert!(matches!(
            "MB".parse::<ByteSize>(),
            Err(ParseByteSizeError::InvalidNumber(_))
        ));
        assert!(matches!(
            "".parse::<ByteSize>(),
            Err(ParseByteSizeError::InvalidNumber(_))
        ));
    }

    #[test]
    fn rejects_values_past_u64() {
        assert!(matches!(
            "20EB".parse::<ByteSize>(),
            Err(ParseByteSizeError::TooLarge(_))
        ));
    }

    #[test]
    fn renders_human_readable() {
        assert_eq!(ByteSize(0).to_string(), "0 B");
        assert_eq!(ByteSize(9).to_string(), "9 B");
        assert_eq!(ByteSize(82).to_string(), "82 B");
        assert_eq!(ByteSize(1_000).to_string(), "1.0 kB");
        assert_eq!(ByteSize(1_024).to_string(), "1.0 kB");
        assert_eq!(ByteSize(12_345_678).to_string(), "12 MB");
        assert_eq!(ByteSize(999_999).to_string(), "1000 kB");
    }
}
