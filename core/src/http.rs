//! HttpAuthority: the real backend, reached with a blocking ureq agent.
//!
//! Blocking is fine here: calls only ever run on the dispatcher's
//! worker thread, never on the frame thread.
//!
//! Error mapping:
//!   transport failure / timeout        → TransientNetwork
//!   4xx with an `error`/`message` body → AuthorityRejection
//!   any other non-2xx, non-JSON body   → MalformedResponse

use crate::{
    account::PlayerAccount,
    authority::Authority,
    error::{RemoteError, RemoteResult},
    wire::{
        HistoryEntry, LeaderboardEntry, PlayerProfile, SortKey, SyncRequest, TransferOutcome,
        TransferRequest, UpgradeRequest,
    },
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::time::Duration;

pub struct HttpAuthority {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpAuthority {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn get_json(&self, path: &str) -> RemoteResult<Value> {
        log::debug!("GET {path}");
        let response = self.agent.get(&self.url(path)).call().map_err(classify)?;
        read_json(response)
    }

    fn post(&self, path: &str, body: &impl Serialize) -> Result<ureq::Response, ureq::Error> {
        log::debug!("POST {path}");
        self.agent.post(&self.url(path)).send_json(body)
    }
}

impl Authority for HttpAuthority {
    fn fetch_player(&self, player_id: &str) -> RemoteResult<PlayerAccount> {
        let body = self.get_json(&format!("/player/{player_id}"))?;
        PlayerAccount::from_wire(player_id.to_string(), &body)
    }

    fn sync_score(&self, request: &SyncRequest) -> RemoteResult<()> {
        self.post("/player/sync", request).map_err(classify)?;
        Ok(())
    }

    fn purchase_upgrade(&self, request: &UpgradeRequest) -> RemoteResult<PlayerAccount> {
        let response = self.post("/player/upgrade", request).map_err(classify)?;
        upgrade_reply(request, read_json(response)?)
    }

    fn sync_profile(&self, profile: &PlayerProfile) -> RemoteResult<()> {
        self.post("/player/syncProfile", profile).map_err(classify)?;
        Ok(())
    }

    fn leaderboard(&self, sort: SortKey) -> RemoteResult<Vec<LeaderboardEntry>> {
        let body = self.get_json(&format!("/leaderboard/{}", sort.as_path()))?;
        decode(body)
    }

    fn transfer(&self, request: &TransferRequest) -> RemoteResult<TransferOutcome> {
        match self.post("/wallet/transfer", request) {
            Ok(response) => decode(read_json(response)?),
            // A refused transfer still answers with {success: false, error}.
            Err(ureq::Error::Status(code, response)) if (400..500).contains(&code) => {
                transfer_reply(code, &response.into_string().unwrap_or_default())
            }
            Err(e) => Err(classify(e)),
        }
    }

    fn history(&self, player_id: &str) -> RemoteResult<Vec<HistoryEntry>> {
        let body = self.get_json(&format!("/wallet/history/{player_id}"))?;
        decode(body)
    }
}

/// A 2xx upgrade answer carries the updated record under `player`;
/// anything else is a refusal or a broken reply.
fn upgrade_reply(request: &UpgradeRequest, body: Value) -> RemoteResult<PlayerAccount> {
    match body.get("player") {
        Some(player) => PlayerAccount::from_wire(request.user_id.clone(), player),
        None => Err(match rejection_message(&body) {
            Some(message) => RemoteError::rejected(message),
            None => RemoteError::malformed("upgrade response has no 'player'"),
        }),
    }
}

/// Body of a 4xx transfer answer.
fn transfer_reply(code: u16, body: &str) -> RemoteResult<TransferOutcome> {
    serde_json::from_str::<TransferOutcome>(body).map_err(|_| status_error(code, body))
}

fn read_json(response: ureq::Response) -> RemoteResult<Value> {
    response
        .into_json::<Value>()
        .map_err(|e| RemoteError::malformed(format!("body is not JSON: {e}")))
}

fn decode<T: DeserializeOwned>(body: Value) -> RemoteResult<T> {
    serde_json::from_value(body).map_err(|e| RemoteError::malformed(e.to_string()))
}

fn rejection_message(body: &Value) -> Option<String> {
    body.get("error")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn status_error(code: u16, body: &str) -> RemoteError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| rejection_message(&v));
    match message {
        Some(message) if (400..500).contains(&code) => RemoteError::rejected(message),
        _ => RemoteError::malformed(format!("HTTP {code}")),
    }
}

fn classify(err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            status_error(code, &body)
        }
        ureq::Error::Transport(transport) => RemoteError::TransientNetwork(transport.to_string()),
    }
}
