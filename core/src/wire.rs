//! Request and response bodies of the authority's JSON API.
//!
//! Field names follow the backend exactly; amounts travel as
//! decimal strings fixed to nine fractional digits.

use crate::{
    amount::wire_amount,
    types::{PlayerId, UpgradeId},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// POST /player/sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub user_id: PlayerId,
    #[serde(with = "wire_amount")]
    pub score: Decimal,
}

/// POST /player/upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeRequest {
    pub user_id: PlayerId,
    pub upgrade_id: UpgradeId,
}

/// POST /player/syncProfile: display identity from the host platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub user_id: PlayerId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
}

/// Ranking key for GET /leaderboard/{sortKey}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Score,
    ClickValue,
    AutoClickRate,
}

impl SortKey {
    pub fn as_path(&self) -> &'static str {
        match self {
            Self::Score => "score",
            Self::ClickValue => "click_value",
            Self::AutoClickRate => "auto_click_rate",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "score" => Some(Self::Score),
            "click_value" => Some(Self::ClickValue),
            "auto_click_rate" => Some(Self::AutoClickRate),
            _ => None,
        }
    }
}

/// Public summary of a ranked player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(with = "wire_amount")]
    pub score: Decimal,
    #[serde(with = "wire_amount")]
    pub click_value: Decimal,
    #[serde(with = "wire_amount")]
    pub auto_click_rate: Decimal,
}

/// POST /wallet/transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub sender_id: PlayerId,
    pub receiver_username: String,
    #[serde(with = "wire_amount")]
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransferOutcome {
    pub fn ok() -> Self {
        Self { success: true, error: None }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self { success: false, error: Some(reason.into()) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Sent,
    Received,
}

/// One row of GET /wallet/history/{id}.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub direction: TransferDirection,
    #[serde(with = "wire_amount")]
    pub amount: Decimal,
    /// Set on received transfers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<PlayerId>,
    /// Set on sent transfers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_username: Option<String>,
    pub created_at: DateTime<Utc>,
}
