//! PlayerAccount: the authority-owned player record, as cached by the client.
//!
//! Wire shape (GET /player/{id}, and `player` in upgrade responses):
//!   { "score": "0.000000003", "click_value": "...", "auto_click_rate": "...",
//!     "<upgradeId>_level": 2, ... }
//!
//! Every response is untrusted: `from_wire` performs the presence and
//! range checks, and anything it rejects is a MalformedResponse.

use crate::{
    amount::{amount_from_json, to_wire},
    catalog::UpgradeCatalog,
    error::{RemoteError, RemoteResult},
    types::{PlayerId, UpgradeId},
};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const LEVEL_SUFFIX: &str = "_level";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerAccount {
    pub id: PlayerId,
    pub balance: Decimal,
    pub click_value: Decimal,
    pub passive_rate: Decimal,
    pub upgrade_levels: BTreeMap<UpgradeId, u32>,
}

impl PlayerAccount {
    /// The record an authority creates on first contact.
    pub fn new_zero(id: PlayerId, catalog: &UpgradeCatalog) -> Self {
        Self {
            id,
            balance: Decimal::ZERO,
            click_value: catalog.base_click_value,
            passive_rate: Decimal::ZERO,
            upgrade_levels: BTreeMap::new(),
        }
    }

    /// Owned level of an upgrade; 0 if never purchased.
    pub fn level(&self, upgrade_id: &str) -> u32 {
        self.upgrade_levels.get(upgrade_id).copied().unwrap_or(0)
    }

    pub fn from_wire(id: PlayerId, value: &Value) -> RemoteResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| RemoteError::malformed("player record is not an object"))?;

        let balance = required_amount(obj, "score")?;
        let click_value = required_amount(obj, "click_value")?;
        let passive_rate = required_amount(obj, "auto_click_rate")?;

        let mut upgrade_levels = BTreeMap::new();
        for (key, raw) in obj {
            let Some(upgrade_id) = key.strip_suffix(LEVEL_SUFFIX) else {
                continue;
            };
            if upgrade_id.is_empty() {
                continue;
            }
            let level = parse_level(raw).ok_or_else(|| {
                RemoteError::malformed(format!("'{key}' is not a non-negative integer"))
            })?;
            upgrade_levels.insert(upgrade_id.to_string(), level);
        }

        Ok(Self {
            id,
            balance,
            click_value,
            passive_rate,
            upgrade_levels,
        })
    }

    pub fn to_wire(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("user_id".into(), Value::String(self.id.clone()));
        obj.insert("score".into(), Value::String(to_wire(self.balance)));
        obj.insert("click_value".into(), Value::String(to_wire(self.click_value)));
        obj.insert(
            "auto_click_rate".into(),
            Value::String(to_wire(self.passive_rate)),
        );
        for (upgrade_id, level) in &self.upgrade_levels {
            obj.insert(format!("{upgrade_id}{LEVEL_SUFFIX}"), Value::from(*level));
        }
        Value::Object(obj)
    }
}

fn required_amount(obj: &Map<String, Value>, field: &str) -> RemoteResult<Decimal> {
    let raw = obj
        .get(field)
        .filter(|v| !v.is_null())
        .ok_or_else(|| RemoteError::malformed(format!("missing field '{field}'")))?;
    let amount = amount_from_json(raw)
        .ok_or_else(|| RemoteError::malformed(format!("'{field}' is not a decimal: {raw}")))?;
    if amount < Decimal::ZERO {
        return Err(RemoteError::malformed(format!("'{field}' is negative: {amount}")));
    }
    Ok(amount)
}

fn parse_level(raw: &Value) -> Option<u32> {
    match raw {
        // Columns for upgrades never bought come back as null.
        Value::Null => Some(0),
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
