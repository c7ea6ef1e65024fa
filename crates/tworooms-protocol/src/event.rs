//! Server → client events.
//!
//! `ServerEvent` is adjacently tagged, so every event is sent as
//! `{ "type": "TIMER_TICK", "payload": { "roundNumber": 1, ... } }`.
//! Which connections receive an event (whole room, one color room, or a
//! single player) is decided by the caller that publishes it, not here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    GameSession, LeadershipChangeReason, Player, PlayerId, Role, Room,
    RoomCode, RoomColor, RoomStatus, Team, VoteId, VoteKind, VoteResult,
    VoteSession,
};

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// Minimal public reference to a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRef {
    pub id: PlayerId,
    pub nickname: String,
}

impl From<&Player> for PlayerRef {
    fn from(p: &Player) -> Self {
        Self {
            id: p.id,
            nickname: p.nickname.clone(),
        }
    }
}

/// A summary of a room returned in public listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub code: RoomCode,
    pub status: RoomStatus,
    pub player_count: usize,
    pub max_players: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_nickname: Option<String>,
    pub role_config_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Room> for RoomSummary {
    fn from(room: &Room) -> Self {
        Self {
            code: room.code.clone(),
            status: room.status,
            player_count: room.players.len(),
            max_players: room.max_players,
            host_nickname: room
                .host_nickname
                .clone()
                .or_else(|| room.owner().map(|o| o.nickname.clone())),
            role_config_id: room.role_config_id.clone(),
            created_at: room.created_at,
        }
    }
}

/// One player moved by an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRecord {
    pub player_id: PlayerId,
    pub nickname: String,
    pub from_room: RoomColor,
    pub to_room: RoomColor,
}

/// Election tally line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateVotes {
    pub candidate: PlayerRef,
    pub votes: usize,
}

/// What follows a finished round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NextPhase {
    RoundSetup,
    Revealing,
}

// ---------------------------------------------------------------------------
// ServerEvent
// ---------------------------------------------------------------------------

/// Every message the server pushes to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum ServerEvent {
    // -- Connection lifecycle --
    #[serde(rename_all = "camelCase")]
    Connected { server_time: DateTime<Utc> },

    // -- Lobby (room-wide) --
    PlayerJoined {
        player: Player,
    },
    #[serde(rename_all = "camelCase")]
    PlayerLeft { player_id: PlayerId },
    #[serde(rename_all = "camelCase")]
    PlayerDisconnected { player_id: PlayerId },
    #[serde(rename_all = "camelCase")]
    NicknameChanged {
        player_id: PlayerId,
        new_nickname: String,
    },
    #[serde(rename_all = "camelCase")]
    OwnerChanged { new_owner: Player },
    RoomClosed {
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    VisibilityChanged { is_public: bool },

    // -- Game lifecycle --
    #[serde(rename_all = "camelCase")]
    GameStarted { game_session: GameSession },
    /// Unicast: only the player concerned ever sees their role.
    #[serde(rename_all = "camelCase")]
    RoleAssigned {
        role: Role,
        team: Team,
        current_room: RoomColor,
    },
    GameReset {
        room: Room,
    },

    // -- Rounds (room-wide) --
    #[serde(rename_all = "camelCase")]
    RoundStarted {
        round_number: u8,
        duration: u32,
        time_remaining: u32,
        red_leader: Option<PlayerRef>,
        blue_leader: Option<PlayerRef>,
        hostage_count: usize,
    },
    #[serde(rename_all = "camelCase")]
    TimerTick {
        round_number: u8,
        time_remaining: u32,
    },
    #[serde(rename_all = "camelCase")]
    RoundEnding {
        round_number: u8,
        hostage_count: usize,
    },
    #[serde(rename_all = "camelCase")]
    RoundEnded {
        round_number: u8,
        final_round: bool,
        next_phase: NextPhase,
    },
    #[serde(rename_all = "camelCase")]
    LeaderReady {
        room_color: RoomColor,
        leader_id: PlayerId,
        both_ready: bool,
    },
    GameRevealing {
        message: String,
    },

    // -- Leadership and voting (color-scoped) --
    #[serde(rename_all = "camelCase")]
    LeadershipChanged {
        room_color: RoomColor,
        old_leader: Option<PlayerRef>,
        new_leader: PlayerRef,
        reason: LeadershipChangeReason,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    VoteSessionStarted {
        vote_id: VoteId,
        vote_type: VoteKind,
        room_color: RoomColor,
        target_leader: Option<PlayerRef>,
        initiator: Option<PlayerRef>,
        candidates: Vec<PlayerRef>,
        total_voters: usize,
        timeout_seconds: u32,
        started_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    VoteProgress {
        vote_id: VoteId,
        voted_count: usize,
        total_voters: usize,
        time_remaining: u32,
    },
    #[serde(rename_all = "camelCase")]
    VoteCompleted {
        vote_id: VoteId,
        vote_type: VoteKind,
        result: VoteResult,
        yes_votes: usize,
        no_votes: usize,
        target_leader: Option<PlayerRef>,
        new_leader: Option<PlayerRef>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tally: Vec<CandidateVotes>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    // -- Exchange --
    /// Color-scoped: the other room must not learn the picks early.
    #[serde(rename_all = "camelCase")]
    LeaderAnnouncedHostages {
        room_color: RoomColor,
        hostages: Vec<Player>,
        waiting_for_other_leader: bool,
    },
    #[serde(rename_all = "camelCase")]
    ExchangeReady {
        red_hostages: Vec<PlayerId>,
        blue_hostages: Vec<PlayerId>,
        countdown: u32,
    },
    #[serde(rename_all = "camelCase")]
    ExchangeComplete {
        round_number: u8,
        exchanges: Vec<ExchangeRecord>,
        next_round: u8,
    },

    // -- Replies to a single connection --
    RoomCreated {
        room: Room,
    },
    #[serde(rename_all = "camelCase")]
    RoomJoined { room_code: RoomCode, player: Player },
    RoomList {
        rooms: Vec<RoomSummary>,
        total: usize,
    },
    RoomState {
        room: Room,
    },
    VoteState {
        session: Option<VoteSession>,
    },
    Ack {
        action: String,
    },
    Error {
        code: String,
        status: u16,
        message: String,
    },
}

impl ServerEvent {
    /// The wire `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "CONNECTED",
            Self::PlayerJoined { .. } => "PLAYER_JOINED",
            Self::PlayerLeft { .. } => "PLAYER_LEFT",
            Self::PlayerDisconnected { .. } => "PLAYER_DISCONNECTED",
            Self::NicknameChanged { .. } => "NICKNAME_CHANGED",
            Self::OwnerChanged { .. } => "OWNER_CHANGED",
            Self::RoomClosed { .. } => "ROOM_CLOSED",
            Self::VisibilityChanged { .. } => "VISIBILITY_CHANGED",
            Self::GameStarted { .. } => "GAME_STARTED",
            Self::RoleAssigned { .. } => "ROLE_ASSIGNED",
            Self::GameReset { .. } => "GAME_RESET",
            Self::RoundStarted { .. } => "ROUND_STARTED",
            Self::TimerTick { .. } => "TIMER_TICK",
            Self::RoundEnding { .. } => "ROUND_ENDING",
            Self::RoundEnded { .. } => "ROUND_ENDED",
            Self::LeaderReady { .. } => "LEADER_READY",
            Self::GameRevealing { .. } => "GAME_REVEALING",
            Self::LeadershipChanged { .. } => "LEADERSHIP_CHANGED",
            Self::VoteSessionStarted { .. } => "VOTE_SESSION_STARTED",
            Self::VoteProgress { .. } => "VOTE_PROGRESS",
            Self::VoteCompleted { .. } => "VOTE_COMPLETED",
            Self::LeaderAnnouncedHostages { .. } => {
                "LEADER_ANNOUNCED_HOSTAGES"
            }
            Self::ExchangeReady { .. } => "EXCHANGE_READY",
            Self::ExchangeComplete { .. } => "EXCHANGE_COMPLETE",
            Self::RoomCreated { .. } => "ROOM_CREATED",
            Self::RoomJoined { .. } => "ROOM_JOINED",
            Self::RoomList { .. } => "ROOM_LIST",
            Self::RoomState { .. } => "ROOM_STATE",
            Self::VoteState { .. } => "VOTE_STATE",
            Self::Ack { .. } => "ACK",
            Self::Error { .. } => "ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn pid(id: u128) -> PlayerId {
        PlayerId(Uuid::from_u128(id))
    }

    #[test]
    fn test_event_uses_type_payload_envelope() {
        let event = ServerEvent::TimerTick {
            round_number: 1,
            time_remaining: 179,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TIMER_TICK");
        assert_eq!(json["payload"]["roundNumber"], 1);
        assert_eq!(json["payload"]["timeRemaining"], 179);
    }

    #[test]
    fn test_kind_matches_serialized_tag() {
        let events = vec![
            ServerEvent::PlayerLeft { player_id: pid(1) },
            ServerEvent::LeaderReady {
                room_color: RoomColor::RedRoom,
                leader_id: pid(1),
                both_ready: false,
            },
            ServerEvent::ExchangeComplete {
                round_number: 1,
                exchanges: vec![],
                next_round: 2,
            },
            ServerEvent::Ack {
                action: "START_ROUND".into(),
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.kind());
        }
    }

    #[test]
    fn test_leadership_changed_payload_fields() {
        let event = ServerEvent::LeadershipChanged {
            room_color: RoomColor::BlueRoom,
            old_leader: None,
            new_leader: PlayerRef {
                id: pid(2),
                nickname: "Lee".into(),
            },
            reason: LeadershipChangeReason::VoteRemoval,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["roomColor"], "BLUE_ROOM");
        assert_eq!(json["payload"]["reason"], "VOTE_REMOVAL");
        assert_eq!(json["payload"]["newLeader"]["nickname"], "Lee");
    }

    #[test]
    fn test_vote_completed_omits_empty_tally() {
        let event = ServerEvent::VoteCompleted {
            vote_id: VoteId(Uuid::nil()),
            vote_type: VoteKind::Removal,
            result: VoteResult::Passed,
            yes_votes: 3,
            no_votes: 1,
            target_leader: None,
            new_leader: None,
            tally: vec![],
            reason: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json["payload"].get("tally").is_none());
        assert_eq!(json["payload"]["result"], "PASSED");
    }
}
