//! InMemoryAuthority: an in-process authority with the backend's semantics.
//!
//! Used by the offline runner and by tests. Clones share one ledger,
//! so a test can keep a handle while the dispatcher owns another.
//! The ledger mutex stands in for the backend's per-account locking.

use crate::{
    account::PlayerAccount,
    authority::Authority,
    catalog::UpgradeCatalog,
    error::{RemoteError, RemoteResult},
    types::PlayerId,
    wire::{
        HistoryEntry, LeaderboardEntry, PlayerProfile, SortKey, SyncRequest, TransferDirection,
        TransferOutcome, TransferRequest, UpgradeRequest,
    },
};
use rust_decimal::Decimal;
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

pub const LEADERBOARD_LIMIT: usize = 100;

#[derive(Default)]
struct Ledger {
    players: BTreeMap<PlayerId, PlayerAccount>,
    profiles: HashMap<PlayerId, PlayerProfile>,
    history: HashMap<PlayerId, Vec<HistoryEntry>>,
    injected: VecDeque<RemoteError>,
    calls: Vec<&'static str>,
}

impl Ledger {
    /// Record the call and surface an injected failure, if one is queued.
    fn enter(&mut self, call: &'static str) -> RemoteResult<()> {
        self.calls.push(call);
        match self.injected.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn player_mut(&mut self, id: &str) -> RemoteResult<&mut PlayerAccount> {
        self.players
            .get_mut(id)
            .ok_or_else(|| RemoteError::rejected("Player not found"))
    }

    fn id_for_username(&self, username: &str) -> Option<PlayerId> {
        self.profiles
            .values()
            .find(|p| p.username.as_deref() == Some(username))
            .map(|p| p.user_id.clone())
    }
}

#[derive(Clone)]
pub struct InMemoryAuthority {
    catalog: Arc<UpgradeCatalog>,
    ledger: Arc<Mutex<Ledger>>,
}

impl InMemoryAuthority {
    pub fn new(catalog: Arc<UpgradeCatalog>) -> Self {
        Self {
            catalog,
            ledger: Arc::new(Mutex::new(Ledger::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed or replace a stored record.
    pub fn insert_player(&self, account: PlayerAccount) {
        self.lock().players.insert(account.id.clone(), account);
    }

    pub fn insert_profile(&self, profile: PlayerProfile) {
        self.lock().profiles.insert(profile.user_id.clone(), profile);
    }

    /// The stored record, as the authority sees it.
    pub fn player(&self, id: &str) -> Option<PlayerAccount> {
        self.lock().players.get(id).cloned()
    }

    pub fn profile(&self, id: &str) -> Option<PlayerProfile> {
        self.lock().profiles.get(id).cloned()
    }

    /// Fail the next call (of any kind) with `err`.
    pub fn fail_next(&self, err: RemoteError) {
        self.lock().injected.push_back(err);
    }

    /// Every call received so far, by route name.
    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }
}

impl Authority for InMemoryAuthority {
    fn fetch_player(&self, player_id: &str) -> RemoteResult<PlayerAccount> {
        let mut ledger = self.lock();
        ledger.enter("fetch_player")?;
        let account = ledger
            .players
            .entry(player_id.to_string())
            .or_insert_with(|| {
                log::info!("authority: creating record for {player_id}");
                PlayerAccount::new_zero(player_id.to_string(), &self.catalog)
            });
        Ok(account.clone())
    }

    fn sync_score(&self, request: &SyncRequest) -> RemoteResult<()> {
        let mut ledger = self.lock();
        ledger.enter("sync_score")?;
        if request.score < Decimal::ZERO {
            return Err(RemoteError::rejected("Score must not be negative"));
        }
        ledger.player_mut(&request.user_id)?.balance = request.score;
        Ok(())
    }

    fn purchase_upgrade(&self, request: &UpgradeRequest) -> RemoteResult<PlayerAccount> {
        let mut ledger = self.lock();
        ledger.enter("purchase_upgrade")?;
        if !self.catalog.contains(&request.upgrade_id) {
            return Err(RemoteError::rejected(format!(
                "Unknown upgrade '{}'",
                request.upgrade_id
            )));
        }
        let player = ledger.player_mut(&request.user_id)?;
        let level = player.level(&request.upgrade_id);
        let cost = self
            .catalog
            .cost_at(&request.upgrade_id, level)
            .map_err(|e| RemoteError::rejected(e.to_string()))?;
        if player.balance < cost {
            return Err(RemoteError::rejected("Insufficient funds"));
        }

        let mut levels = player.upgrade_levels.clone();
        levels.insert(request.upgrade_id.clone(), level + 1);
        let rates = self
            .catalog
            .rates_for(&levels)
            .map_err(|e| RemoteError::rejected(e.to_string()))?;

        player.balance -= cost;
        player.upgrade_levels = levels;
        player.click_value = rates.click_value;
        player.passive_rate = rates.passive_rate;
        Ok(player.clone())
    }

    fn sync_profile(&self, profile: &PlayerProfile) -> RemoteResult<()> {
        let mut ledger = self.lock();
        ledger.enter("sync_profile")?;
        ledger.profiles.insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    fn leaderboard(&self, sort: SortKey) -> RemoteResult<Vec<LeaderboardEntry>> {
        let mut ledger = self.lock();
        ledger.enter("leaderboard")?;
        let key = |p: &PlayerAccount| match sort {
            SortKey::Score => p.balance,
            SortKey::ClickValue => p.click_value,
            SortKey::AutoClickRate => p.passive_rate,
        };
        let mut ranked: Vec<&PlayerAccount> = ledger.players.values().collect();
        ranked.sort_by(|a, b| key(b).cmp(&key(a)).then_with(|| a.id.cmp(&b.id)));
        Ok(ranked
            .into_iter()
            .take(LEADERBOARD_LIMIT)
            .map(|p| {
                let profile = ledger.profiles.get(&p.id);
                LeaderboardEntry {
                    username: profile.and_then(|pr| pr.username.clone()),
                    first_name: profile.and_then(|pr| pr.first_name.clone()),
                    photo_url: profile.and_then(|pr| pr.photo_url.clone()),
                    score: p.balance,
                    click_value: p.click_value,
                    auto_click_rate: p.passive_rate,
                }
            })
            .collect())
    }

    fn transfer(&self, request: &TransferRequest) -> RemoteResult<TransferOutcome> {
        let mut ledger = self.lock();
        ledger.enter("transfer")?;
        if request.amount <= Decimal::ZERO {
            return Ok(TransferOutcome::failed("Amount must be positive"));
        }
        let Some(receiver_id) = ledger.id_for_username(&request.receiver_username) else {
            return Ok(TransferOutcome::failed("Receiver not found"));
        };
        if receiver_id == request.sender_id {
            return Ok(TransferOutcome::failed("Cannot transfer to yourself"));
        }
        if !ledger.players.contains_key(&receiver_id) {
            return Ok(TransferOutcome::failed("Receiver not found"));
        }
        let Some(sender) = ledger.players.get_mut(&request.sender_id) else {
            return Ok(TransferOutcome::failed("Sender not found"));
        };
        if sender.balance < request.amount {
            return Ok(TransferOutcome::failed("Insufficient funds"));
        }
        sender.balance -= request.amount;
        if let Some(receiver) = ledger.players.get_mut(&receiver_id) {
            receiver.balance += request.amount;
        }

        let now = chrono::Utc::now();
        ledger
            .history
            .entry(request.sender_id.clone())
            .or_default()
            .push(HistoryEntry {
                direction: TransferDirection::Sent,
                amount: request.amount,
                sender_id: None,
                receiver_username: Some(request.receiver_username.clone()),
                created_at: now,
            });
        ledger.history.entry(receiver_id).or_default().push(HistoryEntry {
            direction: TransferDirection::Received,
            amount: request.amount,
            sender_id: Some(request.sender_id.clone()),
            receiver_username: None,
            created_at: now,
        });
        Ok(TransferOutcome::ok())
    }

    fn history(&self, player_id: &str) -> RemoteResult<Vec<HistoryEntry>> {
        let mut ledger = self.lock();
        ledger.enter("history")?;
        let mut entries = ledger.history.get(player_id).cloned().unwrap_or_default();
        entries.reverse();
        Ok(entries)
    }
}
