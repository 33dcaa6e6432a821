//! tapcoin-core: the economy of a tap-to-earn coin game client.
//!
//! The engine interpolates the player's balance between snapshots of an
//! authoritative backend; the session schedules syncs, refreshes and
//! purchases around it without ever blocking the frame loop.

pub mod account;
pub mod amount;
pub mod authority;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod http;
pub mod identity;
pub mod memory;
pub mod meter;
pub mod session;
pub mod store;
pub mod types;
pub mod wire;
