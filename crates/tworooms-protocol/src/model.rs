//! The room aggregate and everything nested inside it.
//!
//! A [`Room`] owns its players and, once a game starts, a [`GameSession`]
//! which in turn owns the current [`RoundState`]. "No game" and "no round"
//! are `None` at each level, so every service has to check for them
//! explicitly instead of tripping over a null.
//!
//! Field names serialize as camelCase and enum values as SCREAMING_SNAKE
//! case, which is what browser clients expect.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PlayerId, RoomCode, SessionId, VoteId};

/// Number of rounds in a game.
pub const MAX_ROUNDS: u8 = 3;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Lifecycle of a room.
///
/// ```text
/// WAITING ──start_game──→ IN_PROGRESS ──round 3 ready──→ REVEALING
///    ↑                         │                            │
///    └────────reset_game───────┴────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    Waiting,
    InProgress,
    Revealing,
}

impl RoomStatus {
    /// Returns `true` once a game has started and until it is reset.
    pub fn is_game_active(self) -> bool {
        matches!(self, Self::InProgress | Self::Revealing)
    }

    /// The wire name of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::InProgress => "IN_PROGRESS",
            Self::Revealing => "REVEALING",
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A player's secret team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Team {
    Red,
    Blue,
    Grey,
}

/// The physical room a player currently stands in. Distinct from [`Team`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomColor {
    RedRoom,
    BlueRoom,
}

impl RoomColor {
    /// Both colors, red first.
    pub const ALL: [RoomColor; 2] = [RoomColor::RedRoom, RoomColor::BlueRoom];

    /// The other room.
    pub fn opposite(self) -> Self {
        match self {
            Self::RedRoom => Self::BlueRoom,
            Self::BlueRoom => Self::RedRoom,
        }
    }
}

impl fmt::Display for RoomColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RedRoom => f.write_str("RED_ROOM"),
            Self::BlueRoom => f.write_str("BLUE_ROOM"),
        }
    }
}

/// Phase of a single round.
///
/// `SETUP → ACTIVE → SELECTING → EXCHANGING → COMPLETE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundPhase {
    /// Leaders are being assigned.
    Setup,
    /// The countdown is running.
    Active,
    /// Time is up; leaders pick hostages.
    Selecting,
    /// Both sides committed; the swap is in flight.
    Exchanging,
    /// Hostages have been swapped.
    Complete,
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// A secret role card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: String,
    pub name: String,
    pub description: String,
    pub team: Team,
    pub is_spy: bool,
    pub is_leader: bool,
}

impl Role {
    fn card(
        id: &str,
        name: &str,
        description: &str,
        team: Team,
        is_spy: bool,
        is_leader: bool,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            team,
            is_spy,
            is_leader,
        }
    }

    /// Blue team's key role.
    pub fn president() -> Self {
        Self::card(
            "PRESIDENT",
            "President",
            "Blue team leader. Blue wins if you are not in the Bomber's room at the end.",
            Team::Blue,
            false,
            true,
        )
    }

    /// Red team's key role.
    pub fn bomber() -> Self {
        Self::card(
            "BOMBER",
            "Bomber",
            "Red team leader. Red wins if you are in the President's room at the end.",
            Team::Red,
            false,
            true,
        )
    }

    /// A spy: shows as the opposite team but plays for `team`.
    pub fn spy(team: Team) -> Self {
        match team {
            Team::Red => Self::card(
                "RED_SPY",
                "Red Spy",
                "Plays for red while appearing to be blue.",
                Team::Red,
                true,
                false,
            ),
            _ => Self::card(
                "BLUE_SPY",
                "Blue Spy",
                "Plays for blue while appearing to be red.",
                Team::Blue,
                true,
                false,
            ),
        }
    }

    /// A regular team member.
    pub fn operative(team: Team) -> Self {
        match team {
            Team::Red => Self::card(
                "RED_OPERATIVE",
                "Red Operative",
                "Help the Bomber reach the President.",
                Team::Red,
                false,
                false,
            ),
            _ => Self::card(
                "BLUE_OPERATIVE",
                "Blue Operative",
                "Keep the President away from the Bomber.",
                Team::Blue,
                false,
                false,
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

/// A participant in a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub nickname: String,
    pub is_anonymous: bool,
    pub is_owner: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<Team>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_room: Option<RoomColor>,
    pub connected_at: DateTime<Utc>,
}

impl Player {
    /// Creates a player with no game assignment.
    pub fn new(id: PlayerId, nickname: impl Into<String>) -> Self {
        Self {
            id,
            nickname: nickname.into(),
            is_anonymous: true,
            is_owner: false,
            role: None,
            team: None,
            current_room: None,
            connected_at: Utc::now(),
        }
    }

    /// A copy safe to show to other players: secret role and team removed.
    pub fn public_view(&self) -> Self {
        Self {
            role: None,
            team: None,
            ..self.clone()
        }
    }

    /// Returns `true` if the player currently stands in `color`.
    pub fn is_in(&self, color: RoomColor) -> bool {
        self.current_room == Some(color)
    }

    /// Drops role, team and room assignment.
    pub fn clear_assignment(&mut self) {
        self.role = None;
        self.team = None;
        self.current_room = None;
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// The aggregate stored by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub code: RoomCode,
    pub status: RoomStatus,
    pub players: Vec<Player>,
    pub max_players: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game: Option<GameSession>,
    pub is_public: bool,
    pub role_config_id: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub selected_roles: HashMap<String, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_nickname: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    /// Default role set identifier.
    pub const DEFAULT_ROLE_CONFIG: &'static str = "standard";

    /// Creates an empty waiting room.
    pub fn new(code: RoomCode, max_players: usize, is_public: bool) -> Self {
        let now = Utc::now();
        Self {
            code,
            status: RoomStatus::Waiting,
            players: Vec::new(),
            max_players,
            game: None,
            is_public,
            role_config_id: Self::DEFAULT_ROLE_CONFIG.to_string(),
            selected_roles: HashMap::new(),
            host_nickname: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn owner(&self) -> Option<&Player> {
        self.players.iter().find(|p| p.is_owner)
    }

    /// Players standing in `color`, in join order.
    pub fn players_in(
        &self,
        color: RoomColor,
    ) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(move |p| p.is_in(color))
    }

    /// Ids of the players standing in `color`, in join order.
    pub fn player_ids_in(&self, color: RoomColor) -> Vec<PlayerId> {
        self.players_in(color).map(|p| p.id).collect()
    }

    /// The current round, if a game is running and a round has started.
    pub fn round(&self) -> Option<&RoundState> {
        self.game.as_ref()?.round.as_ref()
    }

    pub fn round_mut(&mut self) -> Option<&mut RoundState> {
        self.game.as_mut()?.round.as_mut()
    }

    /// A copy with every player's secrets removed.
    pub fn public_view(&self) -> Self {
        Self {
            players: self.players.iter().map(Player::public_view).collect(),
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// GameSession / RoundState
// ---------------------------------------------------------------------------

/// One started game. Discarded on reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    pub id: SessionId,
    pub room_code: RoomCode,
    pub started_at: DateTime<Utc>,
    pub current_round: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<RoundState>,
}

impl GameSession {
    pub fn new(room_code: RoomCode) -> Self {
        Self {
            id: SessionId::random(),
            room_code,
            started_at: Utc::now(),
            current_round: 0,
            round: None,
        }
    }
}

/// Round length in seconds, or `None` outside `1..=3`.
pub fn round_duration(round: u8) -> Option<u32> {
    match round {
        1 => Some(180),
        2 => Some(120),
        3 => Some(60),
        _ => None,
    }
}

/// Hostages each leader must send in `round` for a game of `players`.
pub fn hostage_count(players: usize, round: u8) -> usize {
    let idx = usize::from(round.clamp(1, MAX_ROUNDS)) - 1;
    match players {
        0..=10 => 1,
        11..=21 => [2, 1, 1][idx],
        _ => [3, 2, 1][idx],
    }
}

/// State of the round in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundState {
    pub round_number: u8,
    /// Total length in seconds.
    pub duration: u32,
    pub time_remaining: u32,
    pub phase: RoundPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub red_leader: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blue_leader: Option<PlayerId>,
    pub hostage_count: usize,
    pub red_hostages: Vec<PlayerId>,
    pub blue_hostages: Vec<PlayerId>,
    pub red_leader_ready: bool,
    pub blue_leader_ready: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl RoundState {
    /// Builds round `round_number` in `SETUP`, keeping `previous` leaders.
    ///
    /// Returns `None` if `round_number` is outside `1..=3`.
    pub fn new(
        round_number: u8,
        player_count: usize,
        previous: Option<&RoundState>,
    ) -> Option<Self> {
        let duration = round_duration(round_number)?;
        Some(Self {
            round_number,
            duration,
            time_remaining: duration,
            phase: RoundPhase::Setup,
            red_leader: previous.and_then(|r| r.red_leader),
            blue_leader: previous.and_then(|r| r.blue_leader),
            hostage_count: hostage_count(player_count, round_number),
            red_hostages: Vec::new(),
            blue_hostages: Vec::new(),
            red_leader_ready: false,
            blue_leader_ready: false,
            started_at: Utc::now(),
            ended_at: None,
        })
    }

    pub fn leader(&self, color: RoomColor) -> Option<PlayerId> {
        match color {
            RoomColor::RedRoom => self.red_leader,
            RoomColor::BlueRoom => self.blue_leader,
        }
    }

    pub fn set_leader(&mut self, color: RoomColor, leader: PlayerId) {
        match color {
            RoomColor::RedRoom => self.red_leader = Some(leader),
            RoomColor::BlueRoom => self.blue_leader = Some(leader),
        }
    }

    /// Which side `player` leads, if any.
    pub fn leader_color(&self, player: PlayerId) -> Option<RoomColor> {
        RoomColor::ALL
            .into_iter()
            .find(|c| self.leader(*c) == Some(player))
    }

    pub fn hostages(&self, color: RoomColor) -> &[PlayerId] {
        match color {
            RoomColor::RedRoom => &self.red_hostages,
            RoomColor::BlueRoom => &self.blue_hostages,
        }
    }

    pub fn hostages_mut(&mut self, color: RoomColor) -> &mut Vec<PlayerId> {
        match color {
            RoomColor::RedRoom => &mut self.red_hostages,
            RoomColor::BlueRoom => &mut self.blue_hostages,
        }
    }

    pub fn is_ready(&self, color: RoomColor) -> bool {
        match color {
            RoomColor::RedRoom => self.red_leader_ready,
            RoomColor::BlueRoom => self.blue_leader_ready,
        }
    }

    pub fn mark_ready(&mut self, color: RoomColor) {
        match color {
            RoomColor::RedRoom => self.red_leader_ready = true,
            RoomColor::BlueRoom => self.blue_leader_ready = true,
        }
    }

    pub fn both_ready(&self) -> bool {
        self.red_leader_ready && self.blue_leader_ready
    }

    pub fn is_final(&self) -> bool {
        self.round_number >= MAX_ROUNDS
    }
}

// ---------------------------------------------------------------------------
// Voting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteKind {
    Removal,
    Election,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteStatus {
    Active,
    Completed,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteResult {
    Passed,
    Failed,
    Timeout,
}

/// A ballot. Removal votes take `YES`/`NO`; elections take a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteChoice {
    Yes,
    No,
    Candidate(PlayerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadershipChangeReason {
    VoluntaryTransfer,
    Disconnection,
    VoteRemoval,
    Election,
}

/// A time-boxed poll for one color room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSession {
    pub id: VoteId,
    #[serde(rename = "voteType")]
    pub kind: VoteKind,
    pub room_code: RoomCode,
    pub room_color: RoomColor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_leader: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_leader_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<PlayerId>,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub timeout_seconds: u32,
    pub total_voters: usize,
    pub votes: HashMap<PlayerId, VoteChoice>,
    pub status: VoteStatus,
}

impl VoteSession {
    pub fn is_active(&self) -> bool {
        self.status == VoteStatus::Active
    }

    pub fn has_voted(&self, voter: PlayerId) -> bool {
        self.votes.contains_key(&voter)
    }

    /// Every registered voter has cast a ballot.
    pub fn all_voted(&self) -> bool {
        self.votes.len() >= self.total_voters
    }

    /// `(yes, no)` counts for a removal vote.
    pub fn yes_no(&self) -> (usize, usize) {
        self.votes.values().fold((0, 0), |(yes, no), choice| match choice {
            VoteChoice::Yes => (yes + 1, no),
            VoteChoice::No => (yes, no + 1),
            VoteChoice::Candidate(_) => (yes, no),
        })
    }

    /// Votes per candidate, in candidate order.
    pub fn candidate_tally(&self) -> Vec<(PlayerId, usize)> {
        self.candidates
            .iter()
            .map(|c| {
                let n = self
                    .votes
                    .values()
                    .filter(|v| **v == VoteChoice::Candidate(*c))
                    .count();
                (*c, n)
            })
            .collect()
    }

    /// The most-voted candidate. Ties go to whoever comes first in the
    /// candidate list; no votes at all yields `None`.
    pub fn plurality_winner(&self) -> Option<PlayerId> {
        let mut best: Option<(PlayerId, usize)> = None;
        for (candidate, n) in self.candidate_tally() {
            if n > 0 && best.is_none_or(|(_, top)| n > top) {
                best = Some((candidate, n));
            }
        }
        best.map(|(c, _)| c)
    }
}
