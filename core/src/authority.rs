//! The authority: the remote backend that owns every player record.
//!
//! RULE: The authority is the single source of truth for balances,
//! levels and rates. The client only interpolates between snapshots.
//!
//! Implementations:
//!   - HttpAuthority      (http.rs)    the real backend, over ureq
//!   - InMemoryAuthority  (memory.rs)  in-process stand-in with server semantics

use crate::{
    account::PlayerAccount,
    error::RemoteResult,
    types::PlayerId,
    wire::{
        HistoryEntry, LeaderboardEntry, PlayerProfile, SortKey, SyncRequest, TransferOutcome,
        TransferRequest, UpgradeRequest,
    },
};

/// One method per backend route.
pub trait Authority: Send {
    /// GET /player/{id}: fetch, creating a zero-balance record if absent.
    fn fetch_player(&self, player_id: &str) -> RemoteResult<PlayerAccount>;

    /// POST /player/sync: last write wins.
    fn sync_score(&self, request: &SyncRequest) -> RemoteResult<()>;

    /// POST /player/upgrade: validated and applied by the authority.
    fn purchase_upgrade(&self, request: &UpgradeRequest) -> RemoteResult<PlayerAccount>;

    /// POST /player/syncProfile
    fn sync_profile(&self, profile: &PlayerProfile) -> RemoteResult<()>;

    /// GET /leaderboard/{sortKey}
    fn leaderboard(&self, sort: SortKey) -> RemoteResult<Vec<LeaderboardEntry>>;

    /// POST /wallet/transfer
    fn transfer(&self, request: &TransferRequest) -> RemoteResult<TransferOutcome>;

    /// GET /wallet/history/{id}
    fn history(&self, player_id: &str) -> RemoteResult<Vec<HistoryEntry>>;
}

/// A queued call to the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRequest {
    FetchPlayer { player_id: PlayerId },
    SyncScore(SyncRequest),
    PurchaseUpgrade(UpgradeRequest),
    SyncProfile(PlayerProfile),
    Leaderboard(SortKey),
    Transfer(TransferRequest),
    History { player_id: PlayerId },
}

impl RemoteRequest {
    /// Stable name, used in logs and the event log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FetchPlayer { .. } => "fetch_player",
            Self::SyncScore(_) => "sync_score",
            Self::PurchaseUpgrade(_) => "purchase_upgrade",
            Self::SyncProfile(_) => "sync_profile",
            Self::Leaderboard(_) => "leaderboard",
            Self::Transfer(_) => "transfer",
            Self::History { .. } => "history",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteReply {
    Player(PlayerAccount),
    Ack,
    Leaderboard(Vec<LeaderboardEntry>),
    Transfer(TransferOutcome),
    History(Vec<HistoryEntry>),
}

/// Perform one request against an authority.
pub fn execute(authority: &dyn Authority, request: &RemoteRequest) -> RemoteResult<RemoteReply> {
    match request {
        RemoteRequest::FetchPlayer { player_id } => {
            authority.fetch_player(player_id).map(RemoteReply::Player)
        }
        RemoteRequest::SyncScore(body) => authority.sync_score(body).map(|_| RemoteReply::Ack),
        RemoteRequest::PurchaseUpgrade(body) => {
            authority.purchase_upgrade(body).map(RemoteReply::Player)
        }
        RemoteRequest::SyncProfile(profile) => {
            authority.sync_profile(profile).map(|_| RemoteReply::Ack)
        }
        RemoteRequest::Leaderboard(sort) => {
            authority.leaderboard(*sort).map(RemoteReply::Leaderboard)
        }
        RemoteRequest::Transfer(body) => authority.transfer(body).map(RemoteReply::Transfer),
        RemoteRequest::History { player_id } => {
            authority.history(player_id).map(RemoteReply::History)
        }
    }
}
