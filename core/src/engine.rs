//! The economy engine: the player's balance between authority snapshots.
//!
//! STATES: Uninitialized → (initialize) → Active. Nothing else.
//! Every operation except `initialize` fails with NotInitialized
//! until the first snapshot arrives.
//!
//! RULES:
//!   - Accrual is continuous-time: balance += passive_rate × elapsed seconds,
//!     so the result does not depend on how often `tick` is called.
//!   - A clock moving backwards accrues nothing. Balance never decreases
//!     locally.
//!   - Purchases are never applied here. `purchase_upgrade_locally` only
//!     answers "can the player afford it"; levels and rates change only
//!     through `reconcile` with an authority snapshot.
//!   - Reconciliation is last-authority-write-wins. No merging.
//!   - The engine is owned by the frame thread. It is not Sync by intent
//!     and is never shared.

use crate::{
    account::PlayerAccount,
    amount::to_wire,
    catalog::{Rates, UpgradeCatalog},
    error::{EconomyError, EconomyResult},
    event::EconomyEvent,
    types::{Millis, PlayerId},
    wire::SyncRequest,
};
use rust_decimal::Decimal;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct ActiveState {
    account: PlayerAccount,
    last_tick: Millis,
}

#[derive(Debug, Clone)]
enum EngineState {
    Uninitialized,
    Active(ActiveState),
}

pub struct EconomyEngine {
    catalog: Arc<UpgradeCatalog>,
    state: EngineState,
    events: Vec<EconomyEvent>,
}

impl EconomyEngine {
    pub fn new(catalog: Arc<UpgradeCatalog>) -> Self {
        Self {
            catalog,
            state: EngineState::Uninitialized,
            events: Vec::new(),
        }
    }

    pub fn catalog(&self) -> &UpgradeCatalog {
        &self.catalog
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, EngineState::Active(_))
    }

    /// Take the authority's snapshot as the new baseline.
    /// All later local mutations are deltas on top of it.
    pub fn initialize(&mut self, snapshot: PlayerAccount, now: Millis) -> EconomyResult<()> {
        validate(&snapshot)?;
        log::info!(
            "engine initialized for {} at balance {}",
            snapshot.id,
            to_wire(snapshot.balance)
        );
        self.events.push(EconomyEvent::Initialized {
            player_id: snapshot.id.clone(),
            balance: to_wire(snapshot.balance),
        });
        self.state = EngineState::Active(ActiveState {
            account: snapshot,
            last_tick: now,
        });
        Ok(())
    }

    /// Accrue passive income for the time since the previous tick.
    /// Returns the amount accrued.
    pub fn tick(&mut self, now: Millis) -> EconomyResult<Decimal> {
        let EngineState::Active(active) = &mut self.state else {
            return Err(EconomyError::NotInitialized);
        };

        let elapsed_ms = now - active.last_tick;
        if elapsed_ms < 0 {
            log::warn!(
                "clock moved backwards by {}ms; no accrual this tick",
                -elapsed_ms
            );
            self.events.push(EconomyEvent::ClockAnomaly {
                previous: active.last_tick,
                now,
            });
            active.last_tick = now;
            return Ok(Decimal::ZERO);
        }

        let elapsed_seconds = Decimal::new(elapsed_ms, 3);
        let accrued = active
            .account
            .passive_rate
            .checked_mul(elapsed_seconds)
            .ok_or(EconomyError::Overflow)?;
        active.account.balance = active
            .account
            .balance
            .checked_add(accrued)
            .ok_or(EconomyError::Overflow)?;
        active.last_tick = now;

        log::trace!("tick: +{accrued} over {elapsed_ms}ms");
        Ok(accrued)
    }

    /// Add one click's worth to the balance. Returns the new balance.
    pub fn register_click(&mut self) -> EconomyResult<Decimal> {
        let active = self.active_mut()?;
        active.account.balance = active
            .account
            .balance
            .checked_add(active.account.click_value)
            .ok_or(EconomyError::Overflow)?;
        Ok(active.account.balance)
    }

    /// Cost of the next level: base_cost × growth ^ owned level.
    pub fn quote_upgrade_cost(&self, upgrade_id: &str) -> EconomyResult<Decimal> {
        let active = self.active()?;
        self.catalog
            .cost_at(upgrade_id, active.account.level(upgrade_id))
    }

    /// Advisory affordability check for the buy control.
    /// Never mutates state; the authority performs the actual purchase.
    /// Returns the quoted cost when affordable.
    pub fn purchase_upgrade_locally(&self, upgrade_id: &str) -> EconomyResult<Decimal> {
        let cost = self.quote_upgrade_cost(upgrade_id)?;
        let available = self.active()?.account.balance;
        if available < cost {
            return Err(EconomyError::InsufficientFunds {
                required: cost,
                available,
            });
        }
        Ok(cost)
    }

    /// Overwrite balance, rates and levels with the authority's snapshot.
    pub fn reconcile(&mut self, snapshot: PlayerAccount) -> EconomyResult<()> {
        validate(&snapshot)?;
        let active = self.active_mut()?;
        if snapshot.id != active.account.id {
            return Err(EconomyError::InvalidSnapshot {
                reason: format!(
                    "snapshot for '{}' offered to engine of '{}'",
                    snapshot.id, active.account.id
                ),
            });
        }

        let discarded = active.account.balance - snapshot.balance;
        log::debug!(
            "reconciled {}: balance {} -> {}",
            snapshot.id,
            to_wire(active.account.balance),
            to_wire(snapshot.balance)
        );
        active.account = snapshot;
        let balance = to_wire(active.account.balance);
        self.events.push(EconomyEvent::Reconciled {
            balance,
            discarded_delta: to_wire(discarded),
        });
        Ok(())
    }

    /// The current local state as a player record.
    pub fn snapshot(&self) -> EconomyResult<PlayerAccount> {
        Ok(self.active()?.account.clone())
    }

    /// The sync body, capturing the balance at this instant.
    pub fn sync_request(&self) -> EconomyResult<SyncRequest> {
        let account = &self.active()?.account;
        Ok(SyncRequest {
            user_id: account.id.clone(),
            score: account.balance,
        })
    }

    pub fn player_id(&self) -> EconomyResult<&PlayerId> {
        Ok(&self.active()?.account.id)
    }

    pub fn balance(&self) -> EconomyResult<Decimal> {
        Ok(self.active()?.account.balance)
    }

    pub fn click_value(&self) -> EconomyResult<Decimal> {
        Ok(self.active()?.account.click_value)
    }

    pub fn passive_rate(&self) -> EconomyResult<Decimal> {
        Ok(self.active()?.account.passive_rate)
    }

    pub fn level(&self, upgrade_id: &str) -> EconomyResult<u32> {
        Ok(self.active()?.account.level(upgrade_id))
    }

    /// Rates implied by the owned levels under this build's catalog.
    /// The offline rate is display-only: offline accrual belongs to the authority.
    pub fn derived_rates(&self) -> EconomyResult<Rates> {
        self.catalog.rates_for(&self.active()?.account.upgrade_levels)
    }

    pub fn last_tick(&self) -> EconomyResult<Millis> {
        Ok(self.active()?.last_tick)
    }

    /// Events recorded since the last drain.
    pub fn drain_events(&mut self) -> Vec<EconomyEvent> {
        std::mem::take(&mut self.events)
    }

    fn active(&self) -> EconomyResult<&ActiveState> {
        match &self.state {
            EngineState::Active(active) => Ok(active),
            EngineState::Uninitialized => Err(EconomyError::NotInitialized),
        }
    }

    fn active_mut(&mut self) -> EconomyResult<&mut ActiveState> {
        match &mut self.state {
            EngineState::Active(active) => Ok(active),
            EngineState::Uninitialized => Err(EconomyError::NotInitialized),
        }
    }
}

fn validate(snapshot: &PlayerAccount) -> EconomyResult<()> {
    let fields = [
        ("balance", snapshot.balance),
        ("click_value", snapshot.click_value),
        ("passive_rate", snapshot.passive_rate),
    ];
    for (name, value) in fields {
        if value < Decimal::ZERO {
            return Err(EconomyError::InvalidSnapshot {
                reason: format!("{name} is negative: {value}"),
            });
        }
    }
    Ok(())
}
