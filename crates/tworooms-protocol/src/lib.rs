//! Wire protocol and shared data model for tworooms.
//!
//! This crate defines everything that crosses a crate or network boundary:
//!
//! - **Ids** ([`PlayerId`], [`RoomCode`], [`VoteId`], [`SessionId`]).
//! - **Model** ([`Room`], [`Player`], [`GameSession`], [`RoundState`],
//!   [`VoteSession`]): the aggregate the registry stores and the services
//!   mutate.
//! - **Events** ([`ServerEvent`]) pushed to connections, and **actions**
//!   ([`ClientAction`]) received from them.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]).
//!
//! Every message on the wire is an envelope of `{ "type": ..., "payload": ... }`.
//!
//! ```text
//! Transport (bytes) → Protocol (ServerEvent / ClientAction) → Game services
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod action;
mod codec;
mod error;
mod event;
mod ids;
mod model;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use action::ClientAction;
pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use event::{
    CandidateVotes, ExchangeRecord, NextPhase, PlayerRef, RoomSummary,
    ServerEvent,
};
pub use ids::{PlayerId, RoomCode, SessionId, VoteId};
pub use model::{
    GameSession, LeadershipChangeReason, MAX_ROUNDS, Player, Role, Room,
    RoomColor, RoomStatus, RoundPhase, RoundState, Team, VoteChoice,
    VoteKind, VoteResult, VoteSession, VoteStatus, hostage_count,
    round_duration,
};
