//! Decimal amounts: balances, rates and costs.
//!
//! RULE: No balance ever passes through f64.
//! Rounding to WIRE_SCALE happens only where a value leaves the
//! process (wire, display, cache). Intermediate arithmetic keeps
//! the full precision of `Decimal`.

use crate::error::{EconomyError, EconomyResult};
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Fractional digits carried on the wire and shown to the player.
pub const WIRE_SCALE: u32 = 9;

/// The smallest balance increment the game deals in (1e-9).
pub fn min_increment() -> Decimal {
    Decimal::new(1, WIRE_SCALE)
}

pub fn round_wire(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(WIRE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Render with exactly nine fractional digits, e.g. `0.000000078`.
pub fn to_wire(value: Decimal) -> String {
    let mut rounded = round_wire(value);
    rounded.rescale(WIRE_SCALE);
    rounded.to_string()
}

/// Parse a decimal string. Accepts plain and scientific notation.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

/// Read an amount from an untrusted JSON value (string or number).
pub fn amount_from_json(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => parse_amount(s),
        serde_json::Value::Number(n) => parse_amount(&n.to_string()),
        _ => None,
    }
}

/// `base * factor^level`, by exact repeated multiplication.
pub fn compound(base: Decimal, factor: Decimal, level: u32) -> EconomyResult<Decimal> {
    let mut value = base;
    for _ in 0..level {
        value = value.checked_mul(factor).ok_or(EconomyError::Overflow)?;
    }
    Ok(value)
}

/// Serde adapter: serialize as a fixed 9-dp string,
/// deserialize from either a decimal string or a JSON number.
pub mod wire_amount {
    use super::{amount_from_json, to_wire};
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_wire(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        amount_from_json(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("not a decimal amount: {raw}")))
    }
}
