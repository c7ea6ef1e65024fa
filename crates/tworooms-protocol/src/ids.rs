//! Identity newtypes.
//!
//! Players, votes and game sessions are identified by random v4 UUIDs;
//! rooms by a short human-typeable code. Each id is a newtype so a
//! `PlayerId` can never be passed where a `VoteId` is expected, and each
//! serializes as its bare inner value (`#[serde(transparent)]`).

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for a player.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Generates a fresh random id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unique identifier for a vote session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VoteId(pub Uuid);

impl VoteId {
    /// Generates a fresh random id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for VoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vote-{}", self.0)
    }
}

/// A unique identifier for a game session (one per started game).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generates a fresh random id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "game-{}", self.0)
    }
}

/// The short code players type to find a room, e.g. `"K7QX2M"`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Length of a generated room code.
    pub const LEN: usize = 6;

    /// Characters a generated code is drawn from.
    pub const CHARSET: &'static [u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

    /// Wraps a code string as-is.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_id_serializes_as_bare_uuid() {
        let id = PlayerId(Uuid::from_u128(7));
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", Uuid::from_u128(7)));
    }

    #[test]
    fn test_player_id_random_is_unique() {
        assert_ne!(PlayerId::random(), PlayerId::random());
    }

    #[test]
    fn test_room_code_display_and_serde() {
        let code = RoomCode::from("ABC123");
        assert_eq!(code.to_string(), "ABC123");
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"ABC123\"");
    }

    #[test]
    fn test_vote_id_display_prefix() {
        let id = VoteId(Uuid::nil());
        assert!(id.to_string().starts_with("vote-"));
    }
}
