//! Tri-state money amounts.
//!
//! A treatment's payment can be absent ("not applicable", distinct from
//! zero), present, or garbage the user typed. Rather than juggling
//! null/NaN/negative sentinels, parsing is total and the three states live in
//! the type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A nonnegative, finite money amount, or the explicit absence of one.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Amount {
    /// No amount recorded. Excluded from revenue sums, valid on a treatment.
    #[default]
    Unset,
    /// The input could not be read as a nonnegative finite number.
    /// Never persisted; rejected before any write.
    Invalid,
    /// A concrete amount, `>= 0` and finite.
    Value(f64),
}

impl Amount {
    /// Parse raw user input. Thousands separators (commas) and inner spaces
    /// are stripped, so `"30,000"` and `"30 000"` both read as `30000`.
    /// Empty input is `Unset`; negative or non-numeric input is `Invalid`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Unset;
        }

        let cleaned: String = trimmed.chars().filter(|c| *c != ',' && *c != ' ').collect();
        match cleaned.parse::<f64>() {
            Ok(n) if n.is_finite() && n >= 0.0 => Self::Value(n),
            _ => Self::Invalid,
        }
    }

    /// Read an amount out of a stored JSON value. Unknown shapes are
    /// `Invalid` rather than silently zero.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Unset,
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.is_finite() && f >= 0.0 => Self::Value(f),
                _ => Self::Invalid,
            },
            Value::String(s) => Self::parse(s),
            _ => Self::Invalid,
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid)
    }

    /// The numeric value, when one is set.
    pub fn get(&self) -> Option<f64> {
        match self {
            Self::Value(n) => Some(*n),
            _ => None,
        }
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            // Invalid is never meant to reach a document; serialize as null
            // so a bug cannot smuggle NaN into the store.
            Self::Unset | Self::Invalid => serializer.serialize_none(),
            Self::Value(n) => serializer.serialize_f64(*n),
        }
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Amount::from_value(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_thousands_separators_and_spaces() {
        assert_eq!(Amount::parse("30,000"), Amount::Value(30000.0));
        assert_eq!(Amount::parse("30 000"), Amount::Value(30000.0));
        assert_eq!(Amount::parse("  1,234,567 "), Amount::Value(1_234_567.0));
    }

    #[test]
    fn rejects_negative_and_non_numeric_as_invalid_not_zero() {
        assert_eq!(Amount::parse("-5"), Amount::Invalid);
        assert_eq!(Amount::parse("abc"), Amount::Invalid);
        assert_eq!(Amount::parse("NaN"), Amount::Invalid);
        assert_ne!(Amount::parse("abc"), Amount::Value(0.0));
    }

    #[test]
    fn empty_is_unset_and_distinct_from_zero() {
        assert_eq!(Amount::parse(""), Amount::Unset);
        assert_eq!(Amount::parse("   "), Amount::Unset);
        assert_eq!(Amount::parse("0"), Amount::Value(0.0));
        assert_ne!(Amount::Unset, Amount::Value(0.0));
    }

    #[test]
    fn stored_values_round_trip_through_json() {
        assert_eq!(Amount::from_value(&Value::Null), Amount::Unset);
        assert_eq!(Amount::from_value(&Value::from(2500.0)), Amount::Value(2500.0));
        assert_eq!(Amount::from_value(&Value::from(-1)), Amount::Invalid);
        assert_eq!(Amount::from_value(&Value::from("30,000")), Amount::Value(30000.0));

        let ser = serde_json::to_value(Amount::Value(10.0)).unwrap();
        assert_eq!(ser, Value::from(10.0));
        let ser = serde_json::to_value(Amount::Unset).unwrap();
        assert_eq!(ser, Value::Null);
    }
}
