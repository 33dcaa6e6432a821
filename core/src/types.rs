//! Shared primitive types used across the client core.

/// Wall-clock time in milliseconds since the Unix epoch.
pub type Millis = i64;

/// A stable player identifier: platform-provided, or generated locally.
pub type PlayerId = String;

/// The catalog key of an upgrade, e.g. `auto_tier_1`.
pub type UpgradeId = String;

/// Correlates a dispatched remote request with its completion.
pub type RequestId = u64;
