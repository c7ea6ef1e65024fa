//! Client → server actions.
//!
//! Each operation the coordinator exposes has one variant here. The
//! acting player is never part of the payload: it is whatever id the
//! connection was bound to by `JOIN_ROOM` or `ATTACH`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{PlayerId, RoomCode, RoomColor, VoteChoice, VoteId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum ClientAction {
    // -- Lobby --
    #[serde(rename_all = "camelCase")]
    CreateRoom {
        max_players: usize,
        #[serde(default)]
        is_public: bool,
        #[serde(default)]
        role_config_id: Option<String>,
        #[serde(default)]
        selected_roles: HashMap<String, u32>,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_code: RoomCode },
    /// Rebinds a connection to an existing player (reconnect).
    #[serde(rename_all = "camelCase")]
    Attach {
        room_code: RoomCode,
        player_id: PlayerId,
    },
    ListPublicRooms {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        limit: i64,
        #[serde(default)]
        offset: i64,
    },
    GetRoom,
    UpdateNickname {
        nickname: String,
    },
    LeaveRoom,
    #[serde(rename_all = "camelCase")]
    UpdateVisibility { is_public: bool },
    TransferOwnership,

    // -- Game --
    StartGame,
    ResetGame,
    #[serde(rename_all = "camelCase")]
    StartRound { round_number: u8 },
    EndRound,
    LeaderReady,
    #[serde(rename_all = "camelCase")]
    TransferLeadership { new_leader_id: PlayerId },

    // -- Voting --
    #[serde(rename_all = "camelCase")]
    StartVote {
        room_color: RoomColor,
        target_leader_id: PlayerId,
    },
    #[serde(rename_all = "camelCase")]
    CastVote { vote_id: VoteId, choice: VoteChoice },
    #[serde(rename_all = "camelCase")]
    GetVote { room_color: RoomColor },

    // -- Exchange --
    #[serde(rename_all = "camelCase")]
    SelectHostages { hostage_ids: Vec<PlayerId> },
}

impl ClientAction {
    /// The wire `type` tag, echoed back in `ACK` replies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateRoom { .. } => "CREATE_ROOM",
            Self::JoinRoom { .. } => "JOIN_ROOM",
            Self::Attach { .. } => "ATTACH",
            Self::ListPublicRooms { .. } => "LIST_PUBLIC_ROOMS",
            Self::GetRoom => "GET_ROOM",
            Self::UpdateNickname { .. } => "UPDATE_NICKNAME",
            Self::LeaveRoom => "LEAVE_ROOM",
            Self::UpdateVisibility { .. } => "UPDATE_VISIBILITY",
            Self::TransferOwnership => "TRANSFER_OWNERSHIP",
            Self::StartGame => "START_GAME",
            Self::ResetGame => "RESET_GAME",
            Self::StartRound { .. } => "START_ROUND",
            Self::EndRound => "END_ROUND",
            Self::LeaderReady => "LEADER_READY",
            Self::TransferLeadership { .. } => "TRANSFER_LEADERSHIP",
            Self::StartVote { .. } => "START_VOTE",
            Self::CastVote { .. } => "CAST_VOTE",
            Self::GetVote { .. } => "GET_VOTE",
            Self::SelectHostages { .. } => "SELECT_HOSTAGES",
        }
    }

    /// Actions that need a connection already bound to a room and player.
    pub fn requires_binding(&self) -> bool {
        !matches!(
            self,
            Self::CreateRoom { .. }
                | Self::JoinRoom { .. }
                | Self::Attach { .. }
                | Self::ListPublicRooms { .. }
        )
    }
}
