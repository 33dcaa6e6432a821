//! SQLite persistence for the client's local cache.
//!
//! RULE: Only store.rs talks to the database.
//! Nothing stored here is authoritative. The display cache is shown
//! while connecting and is never used to seed the engine.

use crate::{
    account::PlayerAccount,
    error::{EconomyError, EconomyResult},
    event::{EconomyEvent, EventLogEntry},
    types::Millis,
};
use rusqlite::{params, Connection, OptionalExtension};

pub struct ClientStore {
    conn: Connection,
}

impl ClientStore {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: &str) -> EconomyResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode only matters for real files; ignore failures elsewhere.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EconomyResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EconomyResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, player_id: &str, at: Millis, event: &EconomyEvent) -> EconomyResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (player_id, at_ms, event_type, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![player_id, at, event.type_name(), serde_json::to_string(event)?],
        )?;
        Ok(())
    }

    pub fn events_for_player(&self, player_id: &str) -> EconomyResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, player_id, at_ms, event_type, payload
             FROM event_log WHERE player_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![player_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    player_id: row.get(1)?,
                    at: row.get(2)?,
                    event_type: row.get(3)?,
                    payload: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Keep only the newest `keep` entries for `player_id`.
    /// Returns how many rows were removed.
    pub fn prune_events(&self, player_id: &str, keep: usize) -> EconomyResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM event_log
             WHERE player_id = ?1
               AND id NOT IN (SELECT id FROM event_log WHERE player_id = ?1
                              ORDER BY id DESC LIMIT ?2)",
            params![player_id, keep as i64],
        )?;
        Ok(removed)
    }

    // ── Display cache ──────────────────────────────────────────

    pub fn save_display_cache(&self, account: &PlayerAccount, at: Millis) -> EconomyResult<()> {
        self.conn.execute(
            "INSERT INTO display_cache (player_id, account, cached_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(player_id) DO UPDATE SET account = excluded.account,
                                                  cached_at = excluded.cached_at",
            params![account.id, account.to_wire().to_string(), at],
        )?;
        Ok(())
    }

    /// Last authoritative record seen for this player, and when it was cached.
    pub fn load_display_cache(&self, player_id: &str) -> EconomyResult<Option<(PlayerAccount, Millis)>> {
        let row = self
            .conn
            .query_row(
                "SELECT account, cached_at FROM display_cache WHERE player_id = ?1",
                params![player_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        let Some((json, cached_at)) = row else {
            return Ok(None);
        };
        let value: serde_json::Value = serde_json::from_str(&json)?;
        let account = PlayerAccount::from_wire(player_id.to_string(), &value)
            .map_err(|e| EconomyError::InvalidSnapshot { reason: e.to_string() })?;
        Ok(Some((account, cached_at)))
    }
}
