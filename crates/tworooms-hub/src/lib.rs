//! Broadcast hub for tworooms.
//!
//! The hub keeps the set of live connections per room and fans events out
//! to them. It knows nothing about game rules: callers decide whether an
//! event goes to the whole room, to the players of one color room, or to a
//! single player.
//!
//! # Concurrency
//!
//! ```text
//!  register / unregister ──mpsc──→ [hub loop task] ──writes──→ membership
//!                                        │                         ↑
//!                                  sweep (5 s)               read snapshot
//!                                                                  │
//!  publish / broadcast_* (any task) ─────────────────────────────────┘
//!         └──→ try_send into each client's bounded queue (never awaits)
//! ```
//!
//! Only the loop mutates membership, and only the loop drops a client's
//! sender, so a queue is never closed by a concurrent broadcaster.

mod client;
mod config;
mod hub;

pub use client::{ClientHandle, Frame};
pub use config::HubConfig;
pub use hub::Hub;
