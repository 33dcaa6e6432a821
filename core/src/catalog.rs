//! Upgrade catalog: static, immutable, defined at build time.
//!
//! Cost of the next level:  base_cost * growth_factor ^ level
//! Rates for owned levels:  base + Σ level × per_level_benefit (per category)

use crate::{
    amount::{compound, wire_amount},
    error::{EconomyError, EconomyResult},
    types::UpgradeId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeCategory {
    /// Raises the amount added per manual click.
    Click,
    /// Raises the per-second passive rate.
    Auto,
    /// Raises the rate the authority credits while the client is closed.
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpgradeDefinition {
    pub id: UpgradeId,
    pub category: UpgradeCategory,
    pub label: String,
    #[serde(with = "wire_amount")]
    pub base_cost: Decimal,
    #[serde(with = "wire_amount")]
    pub per_level_benefit: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogFile {
    #[serde(with = "wire_amount")]
    growth_factor: Decimal,
    #[serde(with = "wire_amount")]
    base_click_value: Decimal,
    upgrades: Vec<UpgradeDefinition>,
}

/// Rates derived from a set of owned upgrade levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rates {
    pub click_value: Decimal,
    pub passive_rate: Decimal,
    pub offline_rate: Decimal,
}

#[derive(Debug, Clone)]
pub struct UpgradeCatalog {
    pub growth_factor: Decimal,
    pub base_click_value: Decimal,
    upgrades: Vec<UpgradeDefinition>,
    index: HashMap<UpgradeId, usize>,
}

impl UpgradeCatalog {
    /// Load from the data/ directory.
    /// In tests, use UpgradeCatalog::builtin().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/upgrades/catalog.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let file: CatalogFile = serde_json::from_str(content)?;
        Self::new(file.growth_factor, file.base_click_value, file.upgrades)
    }

    pub fn new(
        growth_factor: Decimal,
        base_click_value: Decimal,
        upgrades: Vec<UpgradeDefinition>,
    ) -> anyhow::Result<Self> {
        if growth_factor <= Decimal::ONE {
            anyhow::bail!("growth factor must exceed 1, got {growth_factor}");
        }
        if base_click_value <= Decimal::ZERO {
            anyhow::bail!("base click value must be positive, got {base_click_value}");
        }
        let mut index = HashMap::with_capacity(upgrades.len());
        for (pos, def) in upgrades.iter().enumerate() {
            if def.base_cost <= Decimal::ZERO {
                anyhow::bail!("upgrade '{}' has non-positive base cost", def.id);
            }
            if def.per_level_benefit < Decimal::ZERO {
                anyhow::bail!("upgrade '{}' has negative benefit", def.id);
            }
            if index.insert(def.id.clone(), pos).is_some() {
                anyhow::bail!("duplicate upgrade id '{}'", def.id);
            }
        }
        Ok(Self {
            growth_factor,
            base_click_value,
            upgrades,
            index,
        })
    }

    /// The catalog shipped with this build. Mirrors data/upgrades/catalog.json.
    pub fn builtin() -> Self {
        let tier = |id: &str, category, label: &str, cost: i64, benefit: i64| UpgradeDefinition {
            id: id.into(),
            category,
            label: label.into(),
            base_cost: Decimal::new(cost, 9),
            per_level_benefit: Decimal::new(benefit, 9),
        };
        let upgrades = vec![
            tier("click_tier_1", UpgradeCategory::Click, "Stronger Finger", 16, 1),
            tier("click_tier_2", UpgradeCategory::Click, "Golden Glove", 512, 10),
            tier("click_tier_3", UpgradeCategory::Click, "Coin Press", 16_384, 100),
            tier("auto_tier_1", UpgradeCategory::Auto, "Tap Bot", 64, 1),
            tier("auto_tier_2", UpgradeCategory::Auto, "Mining Rig", 2_048, 10),
            tier("auto_tier_3", UpgradeCategory::Auto, "Coin Farm", 65_536, 100),
            tier("offline_tier_1", UpgradeCategory::Offline, "Night Shift", 1_024, 1),
        ];
        let index = upgrades
            .iter()
            .enumerate()
            .map(|(pos, def)| (def.id.clone(), pos))
            .collect();
        Self {
            growth_factor: Decimal::new(1215, 3),
            base_click_value: Decimal::new(1, 9),
            upgrades,
            index,
        }
    }

    pub fn get(&self, id: &str) -> EconomyResult<&UpgradeDefinition> {
        self.index
            .get(id)
            .map(|&pos| &self.upgrades[pos])
            .ok_or_else(|| EconomyError::UnknownUpgrade { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Upgrades in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &UpgradeDefinition> {
        self.upgrades.iter()
    }

    pub fn len(&self) -> usize {
        self.upgrades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upgrades.is_empty()
    }

    /// Cost of buying the next level when `level` levels are already owned.
    pub fn cost_at(&self, id: &str, level: u32) -> EconomyResult<Decimal> {
        let def = self.get(id)?;
        compound(def.base_cost, self.growth_factor, level)
    }

    /// Rates implied by the given owned levels.
    /// Levels for ids this build does not know are ignored.
    pub fn rates_for(&self, levels: &BTreeMap<UpgradeId, u32>) -> EconomyResult<Rates> {
        let mut rates = Rates {
            click_value: self.base_click_value,
            passive_rate: Decimal::ZERO,
            offline_rate: Decimal::ZERO,
        };
        for (id, &level) in levels {
            let Ok(def) = self.get(id) else {
                log::debug!("ignoring level for unknown upgrade '{id}'");
                continue;
            };
            let gain = def
                .per_level_benefit
                .checked_mul(Decimal::from(level))
                .ok_or(EconomyError::Overflow)?;
            let slot = match def.category {
                UpgradeCategory::Click => &mut rates.click_value,
                UpgradeCategory::Auto => &mut rates.passive_rate,
                UpgradeCategory::Offline => &mut rates.offline_rate,
            };
            *slot = slot.checked_add(gain).ok_or(EconomyError::Overflow)?;
        }
        Ok(rates)
    }
}
