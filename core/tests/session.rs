//! Game session: startup, timers, purchases, transfers and reconciliation
//! against the in-memory authority.

use rust_decimal::Decimal;
use std::{
    cell::RefCell,
    collections::{BTreeMap, VecDeque},
    rc::Rc,
    sync::Arc,
};
use tapcoin_core::{
    account::PlayerAccount,
    authority::{execute, Authority, RemoteRequest},
    catalog::UpgradeCatalog,
    config::ClientConfig,
    dispatch::{Dispatcher, InlineDispatcher, RemoteCompletion},
    error::{EconomyError, RemoteError},
    event::EconomyEvent,
    memory::InMemoryAuthority,
    session::{GameSession, NoticeKind, SessionPhase, EVENT_BUFFER_CAP},
    store::ClientStore,
    types::RequestId,
    wire::{PlayerProfile, SortKey},
};

const PLAYER: &str = "player-1";

fn d(raw: &str) -> Decimal {
    raw.parse().unwrap()
}

fn account(id: &str, balance: &str, passive_rate: &str) -> PlayerAccount {
    PlayerAccount {
        id: id.into(),
        balance: d(balance),
        click_value: d("0.000000001"),
        passive_rate: d(passive_rate),
        upgrade_levels: BTreeMap::new(),
    }
}

fn profile(id: &str, username: &str) -> PlayerProfile {
    PlayerProfile {
        user_id: id.into(),
        username: Some(username.into()),
        ..Default::default()
    }
}

/// Holds every request until the test completes it.
#[derive(Clone, Default)]
struct ManualDispatcher {
    state: Rc<RefCell<ManualState>>,
}

#[derive(Default)]
struct ManualState {
    next_id: RequestId,
    submitted: VecDeque<(RequestId, RemoteRequest)>,
    ready: Vec<RemoteCompletion>,
}

impl ManualDispatcher {
    fn pending(&self) -> Vec<&'static str> {
        self.state
            .borrow()
            .submitted
            .iter()
            .map(|(_, r)| r.kind())
            .collect()
    }

    fn complete_next(&self, authority: &dyn Authority) {
        let mut state = self.state.borrow_mut();
        let (request_id, request) = state.submitted.pop_front().expect("nothing pending");
        let result = execute(authority, &request);
        state.ready.push(RemoteCompletion { request_id, request, result });
    }

    fn complete_all(&self, authority: &dyn Authority) {
        while !self.pending().is_empty() {
            self.complete_next(authority);
        }
    }
}

impl Dispatcher for ManualDispatcher {
    fn submit(&mut self, request: RemoteRequest) -> RequestId {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;
        state.submitted.push_back((id, request));
        id
    }

    fn poll(&mut self) -> Vec<RemoteCompletion> {
        std::mem::take(&mut self.state.borrow_mut().ready)
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn authority_with(players: Vec<PlayerAccount>) -> InMemoryAuthority {
    init_logging();
    let authority = InMemoryAuthority::new(Arc::new(UpgradeCatalog::builtin()));
    for player in players {
        authority.insert_player(player);
    }
    authority
}

fn inline_session(authority: &InMemoryAuthority, config: &ClientConfig) -> GameSession {
    let dispatcher = InlineDispatcher::new(Box::new(authority.clone()));
    let mut session = GameSession::start(
        PLAYER.into(),
        Arc::new(UpgradeCatalog::builtin()),
        Box::new(dispatcher),
        config,
        None,
        0,
    );
    session.frame(0);
    session
}

fn manual_session(authority: &InMemoryAuthority) -> (GameSession, ManualDispatcher) {
    let dispatcher = ManualDispatcher::default();
    let mut session = GameSession::start(
        PLAYER.into(),
        Arc::new(UpgradeCatalog::builtin()),
        Box::new(dispatcher.clone()),
        &ClientConfig::default(),
        None,
        0,
    );
    dispatcher.complete_all(authority);
    session.frame(0);
    assert_eq!(session.phase(), SessionPhase::Active);
    (session, dispatcher)
}

// ── Startup ────────────────────────────────────────────────────

#[test]
fn first_contact_creates_zero_record() {
    let authority = authority_with(vec![]);
    let session = inline_session(&authority, &ClientConfig::default());

    assert_eq!(session.phase(), SessionPhase::Active);
    let view = session.view();
    assert_eq!(view.balance.as_deref(), Some("0.000000000"));
    assert_eq!(view.click_value.as_deref(), Some("0.000000001"));
    assert_eq!(view.upgrades.len(), 7);
    assert!(authority.player(PLAYER).is_some());
    assert_eq!(authority.calls(), vec!["fetch_player"]);
}

#[test]
fn session_is_connecting_until_first_frame() {
    let authority = authority_with(vec![]);
    let session = GameSession::start(
        PLAYER.into(),
        Arc::new(UpgradeCatalog::builtin()),
        Box::new(InlineDispatcher::new(Box::new(authority))),
        &ClientConfig::default(),
        None,
        0,
    );
    assert_eq!(session.phase(), SessionPhase::Connecting);
    assert!(session.view().balance.is_none());
}

#[test]
fn failed_startup_offers_retry() {
    let authority = authority_with(vec![account(PLAYER, "0.000000500", "0")]);
    authority.fail_next(RemoteError::TransientNetwork("connection refused".into()));

    let mut session = inline_session(&authority, &ClientConfig::default());

    assert_eq!(session.phase(), SessionPhase::Disconnected);
    let notice = session.notice().unwrap();
    assert_eq!(notice.kind, NoticeKind::Error);
    assert_eq!(notice.message, "Connection failed. Tap to retry.");
    assert!(matches!(session.click(10), Err(EconomyError::NotInitialized)));
    assert!(session.view().upgrades.is_empty());

    assert!(session.retry_connect());
    assert!(!session.retry_connect(), "a fetch is already pending");
    session.frame(16);

    assert_eq!(session.phase(), SessionPhase::Active);
    assert!(session.notice().is_none());
    assert_eq!(session.engine().balance().unwrap(), d("0.000000500"));
}

#[test]
fn malformed_startup_record_is_a_connection_failure() {
    let authority = authority_with(vec![]);
    authority.fail_next(RemoteError::malformed("missing field 'score'"));
    let session = inline_session(&authority, &ClientConfig::default());
    assert_eq!(session.phase(), SessionPhase::Disconnected);
    assert!(matches!(
        session.startup_error(),
        Some(RemoteError::MalformedResponse { .. })
    ));
}

// ── Frame loop and sync ────────────────────────────────────────

#[test]
fn frames_accrue_and_clicks_add() {
    let authority = authority_with(vec![account(PLAYER, "0", "0.000000010")]);
    let mut session = inline_session(&authority, &ClientConfig::default());

    for t in [100, 200, 300] {
        session.click(t).unwrap();
    }
    session.frame(1_000);

    assert_eq!(session.engine().balance().unwrap(), d("0.000000013"));
    assert_eq!(session.clicks_per_second(), 3);
}

#[test]
fn sync_timer_pushes_balance() {
    let authority = authority_with(vec![account(PLAYER, "0", "0.000000010")]);
    let mut session = inline_session(&authority, &ClientConfig::default());

    session.frame(4_999);
    assert_eq!(authority.calls(), vec!["fetch_player"]);

    session.frame(5_000);
    assert_eq!(authority.calls(), vec!["fetch_player", "sync_score"]);
    assert_eq!(authority.player(PLAYER).unwrap().balance, d("0.00000005"));
}

#[test]
fn sync_is_single_flight() {
    let authority = authority_with(vec![account(PLAYER, "0", "0.000000010")]);
    let (mut session, dispatcher) = manual_session(&authority);

    session.frame(5_000);
    assert_eq!(dispatcher.pending(), vec!["sync_score"]);

    session.frame(10_000);
    assert_eq!(dispatcher.pending(), vec!["sync_score"]);

    dispatcher.complete_all(&authority);
    session.frame(10_016);
    session.frame(15_000);
    assert_eq!(dispatcher.pending(), vec!["sync_score"]);
}

#[test]
fn failed_sync_is_retried_by_the_timer() {
    let authority = authority_with(vec![account(PLAYER, "0", "0.000000010")]);
    let (mut session, dispatcher) = manual_session(&authority);

    session.frame(5_000);
    authority.fail_next(RemoteError::TransientNetwork("timeout".into()));
    dispatcher.complete_all(&authority);
    session.frame(5_016);

    assert_eq!(session.phase(), SessionPhase::Active);
    assert!(session
        .take_events()
        .iter()
        .any(|e| matches!(e, EconomyEvent::SyncFailed { .. })));

    session.frame(10_016);
    dispatcher.complete_all(&authority);
    session.frame(10_032);
    assert_eq!(authority.player(PLAYER).unwrap().balance, d("0.00000010016"));
}

#[test]
fn flush_sync_sends_immediately() {
    let authority = authority_with(vec![account(PLAYER, "0", "0")]);
    let mut session = inline_session(&authority, &ClientConfig::default());
    session.click(10).unwrap();

    assert!(session.flush_sync());
    assert_eq!(authority.player(PLAYER).unwrap().balance, d("0.000000001"));
}

// ── Purchases ──────────────────────────────────────────────────

#[test]
fn confirmed_purchase_reconciles_authority_record() {
    let authority = authority_with(vec![account(PLAYER, "0.000001", "0")]);
    let mut session = inline_session(&authority, &ClientConfig::default());

    session.request_purchase("auto_tier_1").unwrap();
    assert!(session.sync_held());
    assert!(session.view().upgrades.iter().any(|u| u.id == "auto_tier_1" && u.pending));

    session.frame(16);

    assert!(!session.sync_held());
    let engine = session.engine();
    assert_eq!(engine.balance().unwrap(), d("0.000000936"));
    assert_eq!(engine.level("auto_tier_1").unwrap(), 1);
    assert_eq!(engine.passive_rate().unwrap(), d("0.000000001"));
    assert_eq!(
        engine.quote_upgrade_cost("auto_tier_1").unwrap(),
        d("0.00000007776")
    );

    let notice = session.notice().unwrap();
    assert_eq!(notice.kind, NoticeKind::Success);
    assert_eq!(notice.message, "Tap Bot upgraded to level 1");
    assert_eq!(
        authority.calls(),
        vec!["fetch_player", "sync_score", "purchase_upgrade"]
    );
}

#[test]
fn local_refusal_sends_nothing() {
    let authority = authority_with(vec![account(PLAYER, "0.000000063", "0")]);
    let mut session = inline_session(&authority, &ClientConfig::default());

    let result = session.request_purchase("auto_tier_1");

    assert!(matches!(result, Err(EconomyError::InsufficientFunds { .. })));
    assert_eq!(session.notice().unwrap().message, "Not enough coins");
    assert_eq!(authority.calls(), vec!["fetch_player"]);
    assert!(session
        .take_events()
        .iter()
        .any(|e| matches!(e, EconomyEvent::PurchaseRefused { .. })));
}

#[test]
fn notices_expire_after_their_time_to_live() {
    let authority = authority_with(vec![account(PLAYER, "0.000000063", "0")]);
    let config = ClientConfig {
        notice_ttl_ms: 4_000,
        ..ClientConfig::default()
    };
    let mut session = inline_session(&authority, &config);

    let _ = session.request_purchase("auto_tier_1");
    session.frame(3_999);
    assert_eq!(session.view().notice.unwrap().message, "Not enough coins");

    session.frame(4_000);
    assert!(session.notice().is_none());
    assert!(session.view().notice.is_none());

    // A fresh notice starts its own clock.
    let _ = session.request_purchase("auto_tier_1");
    session.frame(7_999);
    assert!(session.notice().is_some());
    session.frame(8_000);
    assert!(session.notice().is_none());
}

#[test]
fn connection_notice_stays_while_disconnected() {
    let authority = authority_with(vec![account(PLAYER, "0", "0")]);
    authority.fail_next(RemoteError::TransientNetwork("connection refused".into()));
    let mut session = inline_session(&authority, &ClientConfig::default());

    session.frame(60_000);

    assert_eq!(session.phase(), SessionPhase::Disconnected);
    assert_eq!(
        session.notice().unwrap().message,
        "Connection failed. Tap to retry."
    );
}

#[test]
fn dismissed_notice_is_gone_at_once() {
    let authority = authority_with(vec![account(PLAYER, "0.000000063", "0")]);
    let config = ClientConfig {
        notice_ttl_ms: 0,
        ..ClientConfig::default()
    };
    let mut session = inline_session(&authority, &config);

    let _ = session.request_purchase("auto_tier_1");
    session.frame(600_000);
    assert!(session.notice().is_some(), "ttl 0 keeps notices");

    session.clear_notice();
    assert!(session.view().notice.is_none());
}

#[test]
fn unknown_upgrade_is_refused_locally() {
    let authority = authority_with(vec![account(PLAYER, "1", "0")]);
    let mut session = inline_session(&authority, &ClientConfig::default());
    assert!(matches!(
        session.request_purchase("warp_drive"),
        Err(EconomyError::UnknownUpgrade { .. })
    ));
    assert_eq!(authority.calls(), vec!["fetch_player"]);
}

#[test]
fn rejected_purchase_changes_nothing() {
    let authority = authority_with(vec![account(PLAYER, "0.000001", "0")]);
    let (mut session, dispatcher) = manual_session(&authority);
    let before = session.engine().snapshot().unwrap();

    session.request_purchase("auto_tier_1").unwrap();
    assert_eq!(dispatcher.pending(), vec!["sync_score", "purchase_upgrade"]);
    dispatcher.complete_next(&authority);
    authority.fail_next(RemoteError::rejected("Insufficient funds"));
    dispatcher.complete_next(&authority);
    session.frame(16);

    assert_eq!(session.engine().snapshot().unwrap(), before);
    let notice = session.notice().unwrap();
    assert_eq!(notice.kind, NoticeKind::Error);
    assert_eq!(notice.message, "Insufficient funds");
    assert!(!session.sync_held());
    assert!(dispatcher.pending().is_empty());
    assert!(session
        .take_events()
        .iter()
        .any(|e| matches!(e, EconomyEvent::PurchaseRejected { .. })));
}

#[test]
fn transient_purchase_failure_refetches_before_syncing() {
    let authority = authority_with(vec![account(PLAYER, "0.000001", "0")]);
    let (mut session, dispatcher) = manual_session(&authority);

    session.request_purchase("auto_tier_1").unwrap();
    dispatcher.complete_next(&authority);
    authority.fail_next(RemoteError::TransientNetwork("timeout".into()));
    dispatcher.complete_next(&authority);
    session.frame(16);

    assert!(session.sync_held());
    assert_eq!(dispatcher.pending(), vec!["fetch_player"]);

    // The sync timer fires but the hold keeps the stale balance local.
    session.frame(5_000);
    assert_eq!(dispatcher.pending(), vec!["fetch_player"]);

    dispatcher.complete_all(&authority);
    session.frame(5_016);
    assert!(!session.sync_held());
}

#[test]
fn failed_holding_fetch_is_retried_on_the_sync_timer() {
    let authority = authority_with(vec![account(PLAYER, "0.000001", "0")]);
    let (mut session, dispatcher) = manual_session(&authority);

    session.request_purchase("auto_tier_1").unwrap();
    dispatcher.complete_next(&authority);
    authority.fail_next(RemoteError::TransientNetwork("timeout".into()));
    dispatcher.complete_next(&authority);
    session.frame(16);

    authority.fail_next(RemoteError::TransientNetwork("timeout".into()));
    dispatcher.complete_all(&authority);
    session.frame(32);
    assert!(session.sync_held());
    assert!(dispatcher.pending().is_empty());

    session.frame(5_000);
    assert_eq!(dispatcher.pending(), vec!["fetch_player"]);
    dispatcher.complete_all(&authority);
    session.frame(5_016);
    assert!(!session.sync_held());
}

// ── Transfers ──────────────────────────────────────────────────

#[test]
fn transfer_holds_sync_until_refetched() {
    let authority = authority_with(vec![
        account(PLAYER, "0.000001", "0"),
        account("player-2", "0", "0"),
    ]);
    authority.insert_profile(profile(PLAYER, "alice"));
    authority.insert_profile(profile("player-2", "bob"));
    let (mut session, dispatcher) = manual_session(&authority);

    session.request_transfer("bob", d("0.0000001")).unwrap();
    assert_eq!(dispatcher.pending(), vec!["sync_score", "transfer"]);
    assert!(session.sync_held());

    session.frame(5_000);
    assert_eq!(dispatcher.pending(), vec!["sync_score", "transfer"]);

    dispatcher.complete_all(&authority);
    session.frame(5_016);
    assert!(session.last_transfer().unwrap().success);
    assert_eq!(session.notice().unwrap().message, "Sent 0.000000100 to bob");
    assert_eq!(dispatcher.pending(), vec!["fetch_player"]);
    assert!(session.sync_held());

    dispatcher.complete_all(&authority);
    session.frame(5_032);
    assert!(!session.sync_held());
    assert_eq!(session.engine().balance().unwrap(), d("0.000000900"));
    assert_eq!(authority.player("player-2").unwrap().balance, d("0.0000001"));
}

#[test]
fn failed_transfer_reports_reason() {
    let authority = authority_with(vec![account(PLAYER, "0.000001", "0")]);
    let mut session = inline_session(&authority, &ClientConfig::default());

    session.request_transfer("nobody", d("0.0000001")).unwrap();
    session.frame(16);

    let outcome = session.last_transfer().unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("Receiver not found"));
    assert_eq!(session.notice().unwrap().kind, NoticeKind::Error);
    assert!(!session.sync_held());
    assert_eq!(session.engine().balance().unwrap(), d("0.000001"));
}

#[test]
fn invalid_transfers_are_refused_locally() {
    let authority = authority_with(vec![account(PLAYER, "0.000001", "0")]);
    let mut session = inline_session(&authority, &ClientConfig::default());

    assert!(matches!(
        session.request_transfer("bob", Decimal::ZERO),
        Err(EconomyError::InvalidRequest { .. })
    ));
    assert!(matches!(
        session.request_transfer("   ", d("0.000000001")),
        Err(EconomyError::InvalidRequest { .. })
    ));
    assert!(matches!(
        session.request_transfer("bob", d("1")),
        Err(EconomyError::InsufficientFunds { .. })
    ));
    assert_eq!(authority.calls(), vec!["fetch_player"]);
}

// ── Refresh ────────────────────────────────────────────────────

#[test]
fn refresh_adopts_authority_levels() {
    let authority = authority_with(vec![account(PLAYER, "0", "0")]);
    let mut session = inline_session(&authority, &ClientConfig::default());

    let mut remote = account(PLAYER, "0", "0.000000003");
    remote.upgrade_levels.insert("auto_tier_1".into(), 3);
    authority.insert_player(remote);

    session.frame(29_999);
    assert_eq!(session.engine().level("auto_tier_1").unwrap(), 0);

    session.frame(30_000);
    assert_eq!(session.engine().level("auto_tier_1").unwrap(), 3);
    assert_eq!(session.engine().passive_rate().unwrap(), d("0.000000003"));
}

#[test]
fn refresh_can_be_disabled() {
    let authority = authority_with(vec![account(PLAYER, "0", "0")]);
    let config = ClientConfig {
        refresh_interval_ms: 0,
        ..ClientConfig::default()
    };
    let mut session = inline_session(&authority, &config);

    session.frame(30_000);
    session.frame(60_000);

    let fetches = authority
        .calls()
        .into_iter()
        .filter(|c| *c == "fetch_player")
        .count();
    assert_eq!(fetches, 1);
}

// ── Social ─────────────────────────────────────────────────────

#[test]
fn leaderboard_and_history_arrive_on_next_frame() {
    let authority = authority_with(vec![
        account(PLAYER, "0.000001", "0"),
        account("player-2", "0.000002", "0"),
    ]);
    authority.insert_profile(profile("player-2", "bob"));
    let mut session = inline_session(&authority, &ClientConfig::default());

    session.request_leaderboard(SortKey::Score);
    session.request_history();
    assert!(session.leaderboard().is_none());
    session.frame(16);

    let (sort, entries) = session.leaderboard().unwrap();
    assert_eq!(sort, SortKey::Score);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].username.as_deref(), Some("bob"));
    assert_eq!(session.history().unwrap().len(), 0);
}

#[test]
fn pushed_profile_carries_session_identity() {
    let authority = authority_with(vec![]);
    let mut session = inline_session(&authority, &ClientConfig::default());

    session.push_profile(profile("someone-else", "alice"));
    session.frame(16);

    assert_eq!(
        authority.profile(PLAYER).unwrap().username.as_deref(),
        Some("alice")
    );
    assert!(authority.profile("someone-else").is_none());
}

// ── Events and cache ───────────────────────────────────────────

#[test]
fn event_buffer_is_bounded() {
    let authority = authority_with(vec![account(PLAYER, "0", "0")]);
    let mut session = inline_session(&authority, &ClientConfig::default());

    for _ in 0..(EVENT_BUFFER_CAP + 100) {
        let _ = session.request_purchase("auto_tier_3");
    }

    let events = session.take_events();
    assert_eq!(events.len(), EVENT_BUFFER_CAP);
    assert!(events
        .iter()
        .all(|e| matches!(e, EconomyEvent::PurchaseRefused { .. })));
    assert!(session.take_events().is_empty());
}

#[test]
fn sync_dispatches_stay_out_of_the_event_log() {
    let path = std::env::temp_dir()
        .join(format!("tapcoin-session-{}.db", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .into_owned();
    let store = ClientStore::open(&path).unwrap();
    store.migrate().unwrap();

    let authority = authority_with(vec![account(PLAYER, "0", "0")]);
    let mut session = GameSession::start(
        PLAYER.into(),
        Arc::new(UpgradeCatalog::builtin()),
        Box::new(InlineDispatcher::new(Box::new(authority.clone()))),
        &ClientConfig::default(),
        Some(store),
        0,
    );
    session.frame(0);
    for second in 1..=60 {
        session.frame(second * 1_000);
    }

    let in_memory = session.take_events();
    let dispatched = in_memory
        .iter()
        .filter(|e| matches!(e, EconomyEvent::SyncDispatched { .. }))
        .count();
    assert_eq!(dispatched, 12);
    drop(session);

    let store = ClientStore::open(&path).unwrap();
    let logged: Vec<String> = store
        .events_for_player(PLAYER)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert!(logged.contains(&"initialized".to_string()));
    assert!(!logged.contains(&"sync_dispatched".to_string()));
    drop(store);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn display_cache_survives_restart() {
    let path = std::env::temp_dir()
        .join(format!("tapcoin-session-{}.db", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .into_owned();

    {
        let store = ClientStore::open(&path).unwrap();
        store.migrate().unwrap();
        store
            .save_display_cache(&account(PLAYER, "0.000000042", "0"), 100)
            .unwrap();
    }

    let authority = authority_with(vec![account(PLAYER, "0.000000500", "0")]);
    authority.fail_next(RemoteError::TransientNetwork("offline".into()));
    let store = ClientStore::open(&path).unwrap();
    store.migrate().unwrap();
    let mut session = GameSession::start(
        PLAYER.into(),
        Arc::new(UpgradeCatalog::builtin()),
        Box::new(InlineDispatcher::new(Box::new(authority.clone()))),
        &ClientConfig::default(),
        Some(store),
        0,
    );
    session.frame(0);

    let view = session.view();
    assert_eq!(view.phase, SessionPhase::Disconnected);
    assert_eq!(view.cached_balance.as_deref(), Some("0.000000042"));
    assert!(view.balance.is_none());

    session.retry_connect();
    session.frame(16);
    assert_eq!(session.phase(), SessionPhase::Active);
    drop(session);

    let store = ClientStore::open(&path).unwrap();
    let (cached, cached_at) = store.load_display_cache(PLAYER).unwrap().unwrap();
    assert_eq!(cached.balance, d("0.000000500"));
    assert_eq!(cached_at, 16);
    let logged: Vec<String> = store
        .events_for_player(PLAYER)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert!(logged.contains(&"remote_failed".to_string()));
    assert!(logged.contains(&"initialized".to_string()));
    drop(store);

    let _ = std::fs::remove_file(&path);
}
