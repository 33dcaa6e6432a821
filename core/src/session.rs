//! Game session: the frame-thread owner of the engine.
//!
//! One `frame(now)` per animation frame:
//!   1. Engine tick (passive accrual)
//!   2. Click meter roll
//!   3. Due timers: sync (single-flight), refresh (authoritative re-fetch)
//!   4. Drain remote completions and apply them
//!   5. Flush events to the log
//!
//! RULES:
//!   - Remote failures become outcomes here. Nothing in this file lets a
//!     remote error escape into the frame loop.
//!   - Levels and rates change only by reconciling an authority snapshot.
//!   - While a purchase or transfer is in flight, no score sync is sent:
//!     a sync carrying the pre-deduction balance would undo the
//!     authority's deduction. The hold lasts until the post-operation
//!     snapshot has been reconciled.

use crate::{
    account::PlayerAccount,
    amount::to_wire,
    authority::{RemoteReply, RemoteRequest},
    catalog::{UpgradeCatalog, UpgradeCategory},
    clock::IntervalTimer,
    config::ClientConfig,
    dispatch::{Dispatcher, RemoteCompletion},
    engine::EconomyEngine,
    error::{EconomyError, EconomyResult, RemoteError},
    event::EconomyEvent,
    meter::ClickMeter,
    store::ClientStore,
    types::{Millis, PlayerId, RequestId, UpgradeId},
    wire::{
        HistoryEntry, LeaderboardEntry, PlayerProfile, SortKey, TransferOutcome, TransferRequest,
        UpgradeRequest,
    },
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::Arc,
};

/// Recent events kept in memory for the UI and tests.
pub const EVENT_BUFFER_CAP: usize = 512;

/// Event log rows kept per player across restarts.
pub const EVENT_LOG_RETAIN: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Waiting for the startup fetch.
    Connecting,
    /// Startup fetch failed. No economy until `retry_connect` succeeds.
    Disconnected,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Success,
    Error,
}

/// A user-visible message. The host maps the kind onto haptics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    fn success(message: impl Into<String>) -> Self {
        Self { kind: NoticeKind::Success, message: message.into() }
    }

    fn error(message: impl Into<String>) -> Self {
        Self { kind: NoticeKind::Error, message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeView {
    pub id: UpgradeId,
    pub label: String,
    pub category: UpgradeCategory,
    pub level: u32,
    pub next_cost: String,
    pub affordable: bool,
    pub pending: bool,
}

/// Everything a UI needs to render one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub phase: SessionPhase,
    pub player_id: PlayerId,
    pub balance: Option<String>,
    pub click_value: Option<String>,
    pub passive_rate: Option<String>,
    pub offline_rate: Option<String>,
    /// Last cached authoritative balance, shown until the economy is live.
    pub cached_balance: Option<String>,
    pub clicks_per_second: u32,
    pub upgrades: Vec<UpgradeView>,
    pub notice: Option<Notice>,
    pub leaderboard: Option<Vec<LeaderboardEntry>>,
    pub history: Option<Vec<HistoryEntry>>,
    pub last_transfer: Option<TransferOutcome>,
}

pub struct GameSession {
    player_id: PlayerId,
    engine: EconomyEngine,
    dispatcher: Box<dyn Dispatcher>,
    store: Option<ClientStore>,
    sync_timer: IntervalTimer,
    refresh_timer: Option<IntervalTimer>,
    meter: ClickMeter,
    now: Millis,
    notice_ttl_ms: Millis,

    connect_request: Option<RequestId>,
    startup_error: Option<RemoteError>,
    sync_in_flight: Option<RequestId>,
    refresh_in_flight: Option<RequestId>,
    purchases_in_flight: BTreeMap<RequestId, UpgradeId>,
    transfers_in_flight: BTreeMap<RequestId, TransferRequest>,
    holding_fetches: BTreeSet<RequestId>,
    holding_retry: bool,

    notice: Option<Notice>,
    notice_shown_at: Millis,
    leaderboard: Option<(SortKey, Vec<LeaderboardEntry>)>,
    history: Option<Vec<HistoryEntry>>,
    last_transfer: Option<TransferOutcome>,
    cached: Option<(PlayerAccount, Millis)>,
    events: VecDeque<(Millis, EconomyEvent)>,
}

impl GameSession {
    /// Create the session and dispatch the startup fetch.
    /// The economy is live once the first frame applies the reply.
    pub fn start(
        player_id: PlayerId,
        catalog: Arc<UpgradeCatalog>,
        dispatcher: Box<dyn Dispatcher>,
        config: &ClientConfig,
        store: Option<ClientStore>,
        now: Millis,
    ) -> Self {
        let cached = store.as_ref().and_then(|s| match s.load_display_cache(&player_id) {
            Ok(cached) => cached,
            Err(e) => {
                log::warn!("display cache unreadable: {e}");
                None
            }
        });
        if let Some(store) = &store {
            match store.prune_events(&player_id, EVENT_LOG_RETAIN) {
                Ok(0) => {}
                Ok(removed) => log::info!("pruned {removed} old event log rows"),
                Err(e) => log::warn!("event log prune failed: {e}"),
            }
        }
        let refresh_timer = (config.refresh_interval_ms > 0)
            .then(|| IntervalTimer::new(config.refresh_interval_ms));

        let mut session = Self {
            player_id,
            engine: EconomyEngine::new(catalog),
            dispatcher,
            store,
            sync_timer: IntervalTimer::new(config.sync_interval_ms),
            refresh_timer,
            meter: ClickMeter::new(config.click_window_ms),
            now,
            notice_ttl_ms: config.notice_ttl_ms,
            connect_request: None,
            startup_error: None,
            sync_in_flight: None,
            refresh_in_flight: None,
            purchases_in_flight: BTreeMap::new(),
            transfers_in_flight: BTreeMap::new(),
            holding_fetches: BTreeSet::new(),
            holding_retry: false,
            notice: None,
            notice_shown_at: now,
            leaderboard: None,
            history: None,
            last_transfer: None,
            cached,
            events: VecDeque::new(),
        };
        session.retry_connect();
        session
    }

    /// Dispatch the startup fetch. Returns false if the economy is
    /// already live or a fetch is already pending.
    pub fn retry_connect(&mut self) -> bool {
        if self.engine.is_active() || self.connect_request.is_some() {
            return false;
        }
        log::info!("fetching player {}", self.player_id);
        self.startup_error = None;
        let id = self.dispatcher.submit(RemoteRequest::FetchPlayer {
            player_id: self.player_id.clone(),
        });
        self.connect_request = Some(id);
        true
    }

    pub fn phase(&self) -> SessionPhase {
        if self.engine.is_active() {
            SessionPhase::Active
        } else if self.startup_error.is_some() {
            SessionPhase::Disconnected
        } else {
            SessionPhase::Connecting
        }
    }

    /// One step of the frame loop. Never fails.
    pub fn frame(&mut self, now: Millis) {
        self.now = now;
        self.expire_notice();

        if self.engine.is_active() {
            if let Err(e) = self.engine.tick(now) {
                log::error!("tick failed: {e}");
            }
            if self.sync_timer.due(now) {
                if self.holding_retry {
                    self.holding_retry = false;
                    self.fetch_holding();
                } else {
                    self.dispatch_sync(false);
                }
            }
            let refresh_due = self
                .refresh_timer
                .as_mut()
                .is_some_and(|timer| timer.due(now));
            if refresh_due {
                self.dispatch_refresh();
            }
        }
        self.meter.roll(now);

        for completion in self.dispatcher.poll() {
            self.apply(completion);
        }
        self.flush_engine_events();
    }

    // ── Player actions ─────────────────────────────────────────

    /// A tap on the coin. Returns the new balance.
    pub fn click(&mut self, now: Millis) -> EconomyResult<Decimal> {
        let balance = self.engine.register_click()?;
        self.meter.record(now);
        Ok(balance)
    }

    /// Ask the authority to buy one level. Refused locally, without a
    /// request, when the balance cannot cover the quoted cost.
    pub fn request_purchase(&mut self, upgrade_id: &str) -> EconomyResult<RequestId> {
        if let Err(err) = self.engine.purchase_upgrade_locally(upgrade_id) {
            if let EconomyError::InsufficientFunds { required, available } = &err {
                self.show(Notice::error("Not enough coins"));
                self.record(EconomyEvent::PurchaseRefused {
                    upgrade_id: upgrade_id.to_string(),
                    cost: to_wire(*required),
                    balance: to_wire(*available),
                });
            }
            return Err(err);
        }

        // The authority validates against its stored score: bring it up to date first.
        self.dispatch_sync(true);
        let id = self.dispatcher.submit(RemoteRequest::PurchaseUpgrade(UpgradeRequest {
            user_id: self.player_id.clone(),
            upgrade_id: upgrade_id.to_string(),
        }));
        self.purchases_in_flight.insert(id, upgrade_id.to_string());
        Ok(id)
    }

    pub fn request_transfer(
        &mut self,
        receiver_username: &str,
        amount: Decimal,
    ) -> EconomyResult<RequestId> {
        let available = self.engine.balance()?;
        let receiver_username = receiver_username.trim();
        if receiver_username.is_empty() {
            return Err(EconomyError::InvalidRequest {
                reason: "receiver username is empty".into(),
            });
        }
        if amount <= Decimal::ZERO {
            return Err(EconomyError::InvalidRequest {
                reason: format!("amount must be positive, got {amount}"),
            });
        }
        if available < amount {
            return Err(EconomyError::InsufficientFunds { required: amount, available });
        }

        self.dispatch_sync(true);
        let request = TransferRequest {
            sender_id: self.player_id.clone(),
            receiver_username: receiver_username.to_string(),
            amount,
        };
        let id = self
            .dispatcher
            .submit(RemoteRequest::Transfer(request.clone()));
        self.transfers_in_flight.insert(id, request);
        Ok(id)
    }

    pub fn request_leaderboard(&mut self, sort: SortKey) -> RequestId {
        self.dispatcher.submit(RemoteRequest::Leaderboard(sort))
    }

    pub fn request_history(&mut self) -> RequestId {
        self.dispatcher.submit(RemoteRequest::History {
            player_id: self.player_id.clone(),
        })
    }

    /// Push the host platform's display identity for this player.
    pub fn push_profile(&mut self, mut profile: PlayerProfile) -> RequestId {
        profile.user_id = self.player_id.clone();
        self.dispatcher.submit(RemoteRequest::SyncProfile(profile))
    }

    /// Send the current balance now, e.g. before the host closes the app.
    pub fn flush_sync(&mut self) -> bool {
        self.dispatch_sync(true)
    }

    // ── Queries ────────────────────────────────────────────────

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn engine(&self) -> &EconomyEngine {
        &self.engine
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn clear_notice(&mut self) {
        self.notice = None;
    }

    pub fn startup_error(&self) -> Option<&RemoteError> {
        self.startup_error.as_ref()
    }

    pub fn clicks_per_second(&self) -> u32 {
        self.meter.clicks_per_second()
    }

    pub fn leaderboard(&self) -> Option<(SortKey, &[LeaderboardEntry])> {
        self.leaderboard
            .as_ref()
            .map(|(sort, entries)| (*sort, entries.as_slice()))
    }

    pub fn history(&self) -> Option<&[HistoryEntry]> {
        self.history.as_deref()
    }

    pub fn last_transfer(&self) -> Option<&TransferOutcome> {
        self.last_transfer.as_ref()
    }

    pub fn cached_account(&self) -> Option<&PlayerAccount> {
        self.cached.as_ref().map(|(account, _)| account)
    }

    /// True while a purchase, transfer or its follow-up fetch is pending.
    pub fn sync_held(&self) -> bool {
        !self.purchases_in_flight.is_empty()
            || !self.transfers_in_flight.is_empty()
            || !self.holding_fetches.is_empty()
            || self.holding_retry
    }

    /// Take the buffered events, oldest first.
    pub fn take_events(&mut self) -> Vec<EconomyEvent> {
        self.events.drain(..).map(|(_, event)| event).collect()
    }

    pub fn view(&self) -> SessionView {
        let engine = &self.engine;
        let pending: BTreeSet<&str> = self
            .purchases_in_flight
            .values()
            .map(String::as_str)
            .collect();
        let upgrades = if engine.is_active() {
            engine
                .catalog()
                .iter()
                .filter_map(|def| {
                    let next_cost = engine.quote_upgrade_cost(&def.id).ok()?;
                    Some(UpgradeView {
                        id: def.id.clone(),
                        label: def.label.clone(),
                        category: def.category,
                        level: engine.level(&def.id).unwrap_or(0),
                        next_cost: to_wire(next_cost),
                        affordable: engine.purchase_upgrade_locally(&def.id).is_ok(),
                        pending: pending.contains(def.id.as_str()),
                    })
                })
                .collect()
        } else {
            Vec::new()
        };
        let wire = |value: EconomyResult<Decimal>| value.ok().map(to_wire);

        SessionView {
            phase: self.phase(),
            player_id: self.player_id.clone(),
            balance: wire(engine.balance()),
            click_value: wire(engine.click_value()),
            passive_rate: wire(engine.passive_rate()),
            offline_rate: wire(engine.derived_rates().map(|r| r.offline_rate)),
            cached_balance: self.cached_account().map(|a| to_wire(a.balance)),
            clicks_per_second: self.meter.clicks_per_second(),
            upgrades,
            notice: self.notice.clone(),
            leaderboard: self.leaderboard.as_ref().map(|(_, entries)| entries.clone()),
            history: self.history.clone(),
            last_transfer: self.last_transfer.clone(),
        }
    }

    // ── Dispatch ───────────────────────────────────────────────

    /// Send the balance as of now. `force` bypasses the single-flight
    /// guard but never the purchase/transfer hold.
    fn dispatch_sync(&mut self, force: bool) -> bool {
        if self.sync_held() {
            log::debug!("sync held while a balance-changing request is pending");
            return false;
        }
        if self.sync_in_flight.is_some() && !force {
            return false;
        }
        let Ok(request) = self.engine.sync_request() else {
            return false;
        };
        let score = to_wire(request.score);
        let id = self.dispatcher.submit(RemoteRequest::SyncScore(request));
        self.sync_in_flight = Some(id);
        self.record(EconomyEvent::SyncDispatched { score });
        true
    }

    fn dispatch_refresh(&mut self) {
        if self.refresh_in_flight.is_some() {
            return;
        }
        // Push local progress first; the worker runs requests in order,
        // so the fetch observes this sync.
        self.dispatch_sync(false);
        let id = self.dispatcher.submit(RemoteRequest::FetchPlayer {
            player_id: self.player_id.clone(),
        });
        self.refresh_in_flight = Some(id);
    }

    // ── Completions ────────────────────────────────────────────

    fn apply(&mut self, completion: RemoteCompletion) {
        let RemoteCompletion { request_id, request, result } = completion;
        match (request, result) {
            (RemoteRequest::FetchPlayer { .. }, Ok(RemoteReply::Player(account))) => {
                self.on_player(request_id, account);
            }
            (RemoteRequest::FetchPlayer { .. }, Err(err)) => {
                self.on_fetch_failed(request_id, err);
            }
            (RemoteRequest::SyncScore(_), result) => {
                if self.sync_in_flight == Some(request_id) {
                    self.sync_in_flight = None;
                }
                match result {
                    Ok(_) => log::debug!("sync acknowledged"),
                    Err(err) => {
                        log::warn!("sync failed: {err}");
                        self.record(EconomyEvent::SyncFailed { reason: err.to_string() });
                    }
                }
            }
            (RemoteRequest::PurchaseUpgrade(body), Ok(RemoteReply::Player(account))) => {
                self.purchases_in_flight.remove(&request_id);
                self.on_purchase_confirmed(&body.upgrade_id, account);
            }
            (RemoteRequest::PurchaseUpgrade(body), Err(err)) => {
                self.purchases_in_flight.remove(&request_id);
                self.on_purchase_failed(&body.upgrade_id, err);
            }
            (RemoteRequest::Transfer(body), Ok(RemoteReply::Transfer(outcome))) => {
                self.transfers_in_flight.remove(&request_id);
                self.on_transfer(body, outcome);
            }
            (RemoteRequest::Transfer(body), Err(err)) => {
                self.transfers_in_flight.remove(&request_id);
                if err.is_transient() {
                    self.fetch_holding();
                }
                self.on_transfer(body, TransferOutcome::failed(err.to_string()));
            }
            (RemoteRequest::Leaderboard(sort), Ok(RemoteReply::Leaderboard(entries))) => {
                self.leaderboard = Some((sort, entries));
            }
            (RemoteRequest::History { .. }, Ok(RemoteReply::History(entries))) => {
                self.history = Some(entries);
            }
            (RemoteRequest::SyncProfile(_), Ok(_)) => log::debug!("profile synced"),
            (request, Err(err)) => {
                log::warn!("{} failed: {err}", request.kind());
                self.record(EconomyEvent::RemoteFailed {
                    request: request.kind().to_string(),
                    reason: err.to_string(),
                });
            }
            (request, Ok(reply)) => {
                log::warn!("unexpected reply to {}: {reply:?}", request.kind());
            }
        }
    }

    fn on_player(&mut self, request_id: RequestId, account: PlayerAccount) {
        let is_connect = self.connect_request == Some(request_id);
        if is_connect {
            self.connect_request = None;
        }
        if self.refresh_in_flight == Some(request_id) {
            self.refresh_in_flight = None;
        }
        self.holding_fetches.remove(&request_id);

        if account.id != self.player_id {
            log::warn!("ignoring record for {} in session of {}", account.id, self.player_id);
            return;
        }
        self.cache(&account);

        if !self.engine.is_active() {
            match self.engine.initialize(account, self.now) {
                Ok(()) => {
                    self.sync_timer.arm(self.now);
                    if let Some(timer) = self.refresh_timer.as_mut() {
                        timer.arm(self.now);
                    }
                    self.notice = None;
                }
                Err(e) => {
                    log::error!("startup snapshot unusable: {e}");
                    if is_connect {
                        self.startup_error = Some(RemoteError::malformed(e.to_string()));
                        self.show(Notice::error("Connection failed. Tap to retry."));
                    }
                }
            }
            return;
        }

        if let Err(e) = self.engine.reconcile(account) {
            log::warn!("reconcile failed: {e}");
        }
    }

    fn on_fetch_failed(&mut self, request_id: RequestId, err: RemoteError) {
        if self.connect_request == Some(request_id) {
            self.connect_request = None;
            log::error!("startup fetch failed: {err}");
            self.startup_error = Some(err.clone());
            self.show(Notice::error("Connection failed. Tap to retry."));
        } else {
            if self.refresh_in_flight == Some(request_id) {
                self.refresh_in_flight = None;
            }
            if self.holding_fetches.remove(&request_id) {
                // The authority may hold a deduction we have not seen yet.
                // Keep syncs held; the sync timer retries the fetch.
                self.holding_retry = true;
            }
            log::warn!("refresh failed: {err}");
        }
        self.record(EconomyEvent::RemoteFailed {
            request: "fetch_player".into(),
            reason: err.to_string(),
        });
    }

    fn on_purchase_confirmed(&mut self, upgrade_id: &str, account: PlayerAccount) {
        let level = account.level(upgrade_id);
        self.cache(&account);
        if let Err(e) = self.engine.reconcile(account) {
            log::warn!("reconcile after purchase failed: {e}");
            return;
        }
        let label = self
            .engine
            .catalog()
            .get(upgrade_id)
            .map(|def| def.label.clone())
            .unwrap_or_else(|_| upgrade_id.to_string());
        log::info!("purchased {upgrade_id}, now level {level}");
        self.show(Notice::success(format!("{label} upgraded to level {level}")));
        self.record(EconomyEvent::PurchaseConfirmed {
            upgrade_id: upgrade_id.to_string(),
            level,
        });
    }

    fn on_purchase_failed(&mut self, upgrade_id: &str, err: RemoteError) {
        log::warn!("purchase of {upgrade_id} failed: {err}");
        self.show(Notice::error(match &err {
            RemoteError::AuthorityRejection { message } => message.clone(),
            other => format!("Purchase failed: {other}"),
        }));
        if err.is_transient() {
            self.record(EconomyEvent::RemoteFailed {
                request: "purchase_upgrade".into(),
                reason: err.to_string(),
            });
            // The purchase may still have landed on the authority.
            self.fetch_holding();
        } else {
            self.record(EconomyEvent::PurchaseRejected {
                upgrade_id: upgrade_id.to_string(),
                reason: err.to_string(),
            });
        }
    }

    fn on_transfer(&mut self, body: TransferRequest, outcome: TransferOutcome) {
        if outcome.success {
            log::info!("sent {} to {}", to_wire(body.amount), body.receiver_username);
            self.show(Notice::success(format!(
                "Sent {} to {}",
                to_wire(body.amount),
                body.receiver_username
            )));
            self.record(EconomyEvent::TransferCompleted {
                receiver_username: body.receiver_username,
                amount: to_wire(body.amount),
            });
            self.fetch_holding();
        } else {
            let reason = outcome
                .error
                .clone()
                .unwrap_or_else(|| "Transfer failed".to_string());
            log::warn!("transfer to {} failed: {reason}", body.receiver_username);
            self.show(Notice::error(reason.clone()));
            self.record(EconomyEvent::TransferFailed {
                receiver_username: body.receiver_username,
                reason,
            });
        }
        self.last_transfer = Some(outcome);
    }

    /// Fetch the authority's record without syncing first.
    /// Syncs stay held until it is reconciled.
    fn fetch_holding(&mut self) {
        let id = self.dispatcher.submit(RemoteRequest::FetchPlayer {
            player_id: self.player_id.clone(),
        });
        self.holding_fetches.insert(id);
    }

    // ── Notices ────────────────────────────────────────────────

    fn show(&mut self, notice: Notice) {
        self.notice = Some(notice);
        self.notice_shown_at = self.now;
    }

    /// Notices fade after `notice_ttl_ms` (0 keeps them). The connection
    /// prompt stays while the session is disconnected.
    fn expire_notice(&mut self) {
        if self.notice.is_none() || self.notice_ttl_ms == 0 {
            return;
        }
        if self.phase() == SessionPhase::Disconnected {
            return;
        }
        if self.now.saturating_sub(self.notice_shown_at) >= self.notice_ttl_ms {
            self.notice = None;
        }
    }

    // ── Events and cache ───────────────────────────────────────

    fn cache(&mut self, account: &PlayerAccount) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_display_cache(account, self.now) {
                log::warn!("display cache write failed: {e}");
            }
        }
        self.cached = Some((account.clone(), self.now));
    }

    fn flush_engine_events(&mut self) {
        for event in self.engine.drain_events() {
            self.record(event);
        }
    }

    fn record(&mut self, event: EconomyEvent) {
        if let Some(store) = self.store.as_ref().filter(|_| !event.is_routine()) {
            if let Err(e) = store.append_event(&self.player_id, self.now, &event) {
                log::warn!("event log write failed: {e}");
            }
        }
        if self.events.len() == EVENT_BUFFER_CAP {
            self.events.pop_front();
        }
        self.events.push_back((self.now, event));
    }
}
