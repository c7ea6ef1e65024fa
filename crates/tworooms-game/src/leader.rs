//! Leader selection and hand-over.
//!
//! Each color room has at most one leader per round. Leaders are picked at
//! random when a game starts, carried over between rounds, and replaced by
//! voluntary transfer, disconnection, removal vote or election.
//!
//! Every change is announced with `LEADERSHIP_CHANGED`, delivered only to
//! the players standing in the affected room.

use std::sync::Arc;

use chrono::Utc;
use rand::seq::IndexedRandom;
use tworooms_hub::Hub;
use tworooms_protocol::{
    LeadershipChangeReason, Player, PlayerId, PlayerRef, Room, RoomCode,
    RoomColor, RoundPhase, RoundState, ServerEvent,
};
use tworooms_registry::RoomRegistry;

use crate::GameError;
use crate::round::round_started;

/// A committed leader change, ready to be announced.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadershipChange {
    pub room_color: RoomColor,
    pub old_leader: Option<PlayerRef>,
    pub new_leader: PlayerRef,
    /// Players standing in `room_color` when the change was committed.
    pub recipients: Vec<PlayerId>,
}

impl LeadershipChange {
    /// `true` when the change actually installed someone new.
    pub fn is_change(&self) -> bool {
        self.old_leader.as_ref().map(|p| p.id) != Some(self.new_leader.id)
    }
}

/// Looks up a player's public reference in `room`.
pub(crate) fn player_ref(room: &Room, id: PlayerId) -> Option<PlayerRef> {
    room.player(id).map(PlayerRef::from)
}

pub(crate) fn no_round() -> GameError {
    GameError::not_found("no round in progress")
}

pub struct LeaderService {
    registry: Arc<RoomRegistry>,
    hub: Hub,
}

impl LeaderService {
    pub fn new(registry: Arc<RoomRegistry>, hub: Hub) -> Self {
        Self { registry, hub }
    }

    // -- Round start --------------------------------------------------------

    /// Picks a random leader for each color room, moves the round to
    /// `ACTIVE` and broadcasts `ROUND_STARTED`.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if either color room is empty.
    /// - `Internal` if the same player was drawn for both sides.
    pub fn assign_leaders(
        &self,
        code: &RoomCode,
    ) -> Result<(PlayerId, PlayerId), GameError> {
        let (room, picks) = self.registry.update_with(code, |room| {
            let red = room.player_ids_in(RoomColor::RedRoom);
            let blue = room.player_ids_in(RoomColor::BlueRoom);
            let round = room.round_mut().ok_or_else(no_round)?;

            let mut rng = rand::rng();
            let (Some(&red_pick), Some(&blue_pick)) =
                (red.choose(&mut rng), blue.choose(&mut rng))
            else {
                return Err(GameError::invalid(
                    "each room needs at least one player to pick a leader",
                ));
            };
            if red_pick == blue_pick {
                return Err(GameError::internal(
                    "the same player was picked to lead both rooms",
                ));
            }

            round.red_leader = Some(red_pick);
            round.blue_leader = Some(blue_pick);
            round.phase = RoundPhase::Active;
            Ok((room.clone(), (red_pick, blue_pick)))
        })?;

        tracing::info!(
            room_code = %code,
            red_leader = %picks.0,
            blue_leader = %picks.1,
            "leaders assigned"
        );
        if let Some(event) = round_started(&room) {
            self.hub.publish(code, &event);
        }
        Ok(picks)
    }

    /// Keeps the previous round's leaders, moves the round to `ACTIVE` and
    /// broadcasts `ROUND_STARTED`. A side left without a leader gets a
    /// random one.
    pub fn preserve_leaders(&self, code: &RoomCode) -> Result<(), GameError> {
        let room = self.registry.update_with(code, |room| {
            let pools = RoomColor::ALL.map(|c| room.player_ids_in(c));
            let round = room.round_mut().ok_or_else(no_round)?;

            for (color, pool) in RoomColor::ALL.into_iter().zip(pools) {
                if round.leader(color).is_some() {
                    continue;
                }
                let other = round.leader(color.opposite());
                let eligible: Vec<PlayerId> =
                    pool.into_iter().filter(|p| Some(*p) != other).collect();
                if let Some(&pick) = eligible.choose(&mut rand::rng()) {
                    tracing::debug!(%color, leader = %pick, "filled vacant leader seat");
                    round.set_leader(color, pick);
                }
            }
            round.phase = RoundPhase::Active;
            Ok::<_, GameError>(room.clone())
        })?;

        if let Some(event) = round_started(&room) {
            self.hub.publish(code, &event);
        }
        Ok(())
    }

    // -- Queries ------------------------------------------------------------

    /// The current leader of `color`.
    pub fn leader(
        &self,
        code: &RoomCode,
        color: RoomColor,
    ) -> Result<Player, GameError> {
        let room = self.registry.get(code)?;
        let id = room
            .round()
            .ok_or_else(no_round)?
            .leader(color)
            .ok_or_else(|| GameError::not_found(format!("{color} has no leader")))?;
        room.player(id)
            .cloned()
            .ok_or_else(|| GameError::not_found(format!("leader {id} not in room")))
    }

    /// Which side `player` leads in the current round, if any.
    pub fn is_leader(&self, code: &RoomCode, player: PlayerId) -> Option<RoomColor> {
        self.registry.get(code).ok()?.round()?.leader_color(player)
    }

    // -- Changes ------------------------------------------------------------

    /// A leader hands leadership to another player in the same room.
    ///
    /// # Errors
    ///
    /// - `Forbidden` if `current` is not a leader.
    /// - `Conflict` during hostage selection, or if `new` already leads.
    /// - `InvalidInput` if `new` is not in the leader's room.
    pub fn transfer_leadership(
        &self,
        code: &RoomCode,
        current: PlayerId,
        new: PlayerId,
    ) -> Result<LeadershipChange, GameError> {
        let change = self.registry.update_with(code, |room| {
            let round = room.round().ok_or_else(no_round)?;
            let color = round.leader_color(current).ok_or_else(|| {
                GameError::forbidden("only a room leader can transfer leadership")
            })?;
            if round.phase == RoundPhase::Selecting {
                return Err(GameError::conflict(
                    "leadership cannot change while hostages are being selected",
                ));
            }
            if !room.player(new).is_some_and(|p| p.is_in(color)) {
                return Err(GameError::invalid(
                    "new leader must be a player in the same room",
                ));
            }
            if round.leader_color(new).is_some() {
                return Err(GameError::conflict("that player is already a leader"));
            }
            install(room, color, new)
        })?;

        tracing::info!(
            room_code = %code,
            room_color = %change.room_color,
            from = %current,
            to = %new,
            "leadership transferred"
        );
        self.announce(code, &change, LeadershipChangeReason::VoluntaryTransfer);
        Ok(change)
    }

    /// Replaces `player` if they lead a side. A non-leader is a no-op.
    ///
    /// # Errors
    ///
    /// `NotFound` if nobody else in that room can take over; leadership is
    /// left as it was.
    pub fn handle_leader_disconnect(
        &self,
        code: &RoomCode,
        player: PlayerId,
    ) -> Result<Option<LeadershipChange>, GameError> {
        let Some(color) = self.is_leader(code, player) else {
            return Ok(None);
        };
        let change = self.assign_new_leader(code, color, Some(player))?;
        tracing::info!(
            room_code = %code,
            room_color = %color,
            %player,
            new_leader = %change.new_leader.id,
            "leader replaced after disconnect"
        );
        self.announce(code, &change, LeadershipChangeReason::Disconnection);
        Ok(Some(change))
    }

    /// Installs a random replacement leader for `color`, skipping
    /// `exclude` and the other side's leader. Connected players are
    /// preferred. Does not announce.
    pub fn assign_new_leader(
        &self,
        code: &RoomCode,
        color: RoomColor,
        exclude: Option<PlayerId>,
    ) -> Result<LeadershipChange, GameError> {
        self.registry.update_with(code, |room| {
            let round = room.round().ok_or_else(no_round)?;
            let other = round.leader(color.opposite());
            let eligible: Vec<PlayerId> = room
                .players_in(color)
                .map(|p| p.id)
                .filter(|id| Some(*id) != exclude && Some(*id) != other)
                .collect();
            let connected: Vec<PlayerId> = eligible
                .iter()
                .copied()
                .filter(|id| self.hub.is_connected(code, *id))
                .collect();
            let pool = if connected.is_empty() {
                &eligible
            } else {
                &connected
            };
            let pick = *pool.choose(&mut rand::rng()).ok_or_else(|| {
                GameError::not_found(format!("no eligible replacement leader in {color}"))
            })?;
            install(room, color, pick)
        })
    }

    /// Installs `player` as leader of `color`. Does not announce.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `player` is not standing in `color`.
    pub fn set_leader(
        &self,
        code: &RoomCode,
        color: RoomColor,
        player: PlayerId,
    ) -> Result<LeadershipChange, GameError> {
        self.registry.update_with(code, |room| {
            room.round().ok_or_else(no_round)?;
            if !room.player(player).is_some_and(|p| p.is_in(color)) {
                return Err(GameError::invalid(format!(
                    "player {player} is not in {color}"
                )));
            }
            install(room, color, player)
        })
    }

    /// Sends `LEADERSHIP_CHANGED` to the players of the affected room.
    pub fn announce(
        &self,
        code: &RoomCode,
        change: &LeadershipChange,
        reason: LeadershipChangeReason,
    ) {
        let event = ServerEvent::LeadershipChanged {
            room_color: change.room_color,
            old_leader: change.old_leader.clone(),
            new_leader: change.new_leader.clone(),
            reason,
            timestamp: Utc::now(),
        };
        self.hub.publish_to_color(code, &change.recipients, &event);
    }
}

/// Sets the leader of `color` to `new` and describes the change.
fn install(
    room: &mut Room,
    color: RoomColor,
    new: PlayerId,
) -> Result<LeadershipChange, GameError> {
    let recipients = room.player_ids_in(color);
    let new_leader = player_ref(room, new)
        .ok_or_else(|| GameError::not_found(format!("player {new} not found")))?;
    let round: &mut RoundState = room.round_mut().ok_or_else(no_round)?;
    let old_id = round.leader(color);
    round.set_leader(color, new);
    let old_leader = old_id.and_then(|id| player_ref(room, id));

    Ok(LeadershipChange {
        room_color: color,
        old_leader,
        new_leader,
        recipients,
    })
}
