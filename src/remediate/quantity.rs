//! Byte-denominated resource quantities.
//!
//! `k8s-openapi` carries quantities as opaque strings, so the arithmetic
//! the patch engine needs (percentage increase, rounding, caps) lives
//! here. The accepted grammar is the subset of Kubernetes quantity syntax
//! that appears in memory fields: a non-negative integer with an optional
//! binary (`Ki`, `Mi`, `Gi`, `Ti`) or decimal (`k`, `M`, `G`, `T`)
//! suffix.

use std::fmt;
use std::str::FromStr;

const KIB: i64 = 1024;
const MIB: i64 = 1024 * KIB;
const GIB: i64 = 1024 * MIB;
const TIB: i64 = 1024 * GIB;

/// A quantity of bytes. Ordering and equality are value-based, so
/// `1024Mi == 1Gi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteQuantity(i64);

impl ByteQuantity {
    #[must_use]
    pub fn from_bytes(bytes: i64) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(self) -> i64 {
        self.0
    }

    /// Increase by `percent` and round the result **up** to the nearest
    /// multiple of 64Mi. Fractions of a byte are dropped before rounding,
    /// matching the rounding-then-alignment order of the sizing rule.
    #[must_use]
    pub fn increased_by_percent(self, percent: u64) -> Self {
        let raw = (i128::from(self.0) * i128::from(100 + percent)) / 100;
        #[allow(clippy::cast_possible_truncation)]
        let raw = raw.min(i128::from(i64::MAX)) as i64;
        Self(round_up(raw, 64 * MIB))
    }

    /// Cap at `max`, returning whichever is smaller.
    #[must_use]
    pub fn capped_at(self, max: Self) -> Self {
        if self > max {
            max
        } else {
            self
        }
    }
}

fn round_up(value: i64, multiple: i64) -> i64 {
    ((value + multiple - 1) / multiple) * multiple
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseQuantityError(String);

impl fmt::Display for ParseQuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid quantity \"{}\"", self.0)
    }
}

impl std::error::Error for ParseQuantityError {}

impl FromStr for ByteQuantity {
    type Err = ParseQuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (digits, suffix) = s.split_at(split);

        let value: i64 = digits.parse().map_err(|_| ParseQuantityError(s.to_string()))?;
        let multiplier = match suffix {
            "" => 1,
            "Ki" => KIB,
            "Mi" => MIB,
            "Gi" => GIB,
            "Ti" => TIB,
            "k" => 1_000,
            "M" => 1_000_000,
            "G" => 1_000_000_000,
            "T" => 1_000_000_000_000,
            _ => return Err(ParseQuantityError(s.to_string())),
        };

        value
            .checked_mul(multiplier)
            .map(ByteQuantity)
            .ok_or_else(|| ParseQuantityError(s.to_string()))
    }
}

impl fmt::Display for ByteQuantity {
    /// Render with the largest binary suffix that divides evenly, so the
    /// formatted value round-trips exactly.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        if v != 0 && v % GIB == 0 {
            write!(f, "{}Gi", v / GIB)
        } else if v != 0 && v % MIB == 0 {
            write!(f, "{}Mi", v / MIB)
        } else if v != 0 && v % KIB == 0 {
            write!(f, "{}Ki", v / KIB)
        } else {
            write!(f, "{v}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> ByteQuantity {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_binary_suffixes() {
        assert_eq!(q("256Mi").as_bytes(), 256 * MIB);
        assert_eq!(q("2Gi").as_bytes(), 2 * GIB);
        assert_eq!(q("512Ki").as_bytes(), 512 * KIB);
        assert_eq!(q("1Ti").as_bytes(), TIB);
        assert_eq!(q("123").as_bytes(), 123);
    }

    #[test]
    fn test_parse_decimal_suffixes() {
        assert_eq!(q("1k").as_bytes(), 1_000);
        assert_eq!(q("500M").as_bytes(), 500_000_000);
        assert_eq!(q("1G").as_bytes(), 1_000_000_000);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<ByteQuantity>().is_err());
        assert!("Mi".parse::<ByteQuantity>().is_err());
        assert!("12Xi".parse::<ByteQuantity>().is_err());
        assert!("-5Mi".parse::<ByteQuantity>().is_err());
    }

    #[test]
    fn test_display_uses_largest_even_suffix() {
        assert_eq!(q("320Mi").to_string(), "320Mi");
        assert_eq!(q("2048Mi").to_string(), "2Gi");
        assert_eq!(q("1024Ki").to_string(), "1Mi");
        assert_eq!(ByteQuantity::from_bytes(100).to_string(), "100");
    }

    #[test]
    fn test_value_equality_across_suffixes() {
        assert_eq!(q("1Gi"), q("1024Mi"));
        assert!(q("2Gi") > q("1800Mi"));
    }

    #[test]
    fn test_increase_rounds_up_to_64mi() {
        assert_eq!(q("256Mi").increased_by_percent(25), q("320Mi"));
        assert_eq!(q("128Mi").increased_by_percent(50), q("192Mi"));
        // 110Mi raw, aligned up to the next 64Mi boundary
        assert_eq!(q("100Mi").increased_by_percent(10), q("128Mi"));
    }

    #[test]
    fn test_cap() {
        let raised = q("1800Mi").increased_by_percent(25);
        assert_eq!(raised.capped_at(q("2Gi")), q("2Gi"));
        assert_eq!(q("320Mi").capped_at(q("2Gi")), q("320Mi"));
    }
}
