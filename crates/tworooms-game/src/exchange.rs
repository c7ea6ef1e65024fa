//! Hostage selection and the end-of-round swap.
//!
//! Each leader submits exactly `hostage_count` players from their own room.
//! A selection is only shown to the leader's own room; once both are in,
//! the hostages trade rooms in a single registry commit.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tworooms_hub::Hub;
use tworooms_protocol::{
    ExchangeRecord, MAX_ROUNDS, Player, PlayerId, RoomCode, RoomColor,
    RoundPhase, ServerEvent,
};
use tworooms_registry::RoomRegistry;

use crate::leader::no_round;
use crate::{GameConfig, GameError};

/// Progress of hostage selection for the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionStatus {
    pub red_selected: bool,
    pub blue_selected: bool,
    pub hostage_count: usize,
}

impl SelectionStatus {
    pub fn both_selected(&self) -> bool {
        self.red_selected && self.blue_selected
    }
}

/// Result of a completed swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOutcome {
    pub round_number: u8,
    pub exchanges: Vec<ExchangeRecord>,
    /// The round that follows, or 0 after the last one.
    pub next_round: u8,
}

pub struct ExchangeService {
    registry: Arc<RoomRegistry>,
    hub: Hub,
    config: Arc<GameConfig>,
}

impl ExchangeService {
    pub fn new(registry: Arc<RoomRegistry>, hub: Hub, config: Arc<GameConfig>) -> Self {
        Self {
            registry,
            hub,
            config,
        }
    }

    /// Records a leader's hostage picks and announces them to the
    /// leader's room. Runs the exchange once both sides have submitted.
    ///
    /// Returns the exchange outcome if this submission completed it.
    ///
    /// # Errors
    ///
    /// - `Forbidden` if `leader` leads neither side.
    /// - `Conflict` outside hostage selection, or on a second submission.
    /// - `InvalidInput` for a wrong count, self-selection, duplicates, or
    ///   players who are not in the leader's room.
    pub fn select_hostages(
        &self,
        code: &RoomCode,
        leader: PlayerId,
        hostage_ids: Vec<PlayerId>,
    ) -> Result<Option<ExchangeOutcome>, GameError> {
        let (color, hostages, recipients, status) = self.registry.update_with(code, |room| {
            let round = room.round().ok_or_else(no_round)?;
            let color = round.leader_color(leader).ok_or_else(|| {
                GameError::forbidden("only leaders can select hostages")
            })?;
            if round.phase != RoundPhase::Selecting {
                return Err(GameError::conflict("hostages can only be selected after the round timer ends"));
            }
            if hostage_ids.len() != round.hostage_count {
                return Err(GameError::invalid(format!(
                    "must select exactly {} hostages",
                    round.hostage_count
                )));
            }
            if hostage_ids.contains(&leader) {
                return Err(GameError::invalid("leader cannot select themselves as hostage"));
            }
            let mut seen = HashSet::new();
            let mut hostages: Vec<Player> = Vec::with_capacity(hostage_ids.len());
            for id in &hostage_ids {
                if !seen.insert(*id) {
                    return Err(GameError::invalid("duplicate player in selection"));
                }
                let player = room
                    .player(*id)
                    .ok_or_else(|| GameError::invalid(format!("invalid player id {id} in selection")))?;
                if !player.is_in(color) {
                    return Err(GameError::invalid("can only select players in your room"));
                }
                hostages.push(player.public_view());
            }
            if !round.hostages(color).is_empty() {
                return Err(GameError::conflict(format!(
                    "{color} leader has already selected hostages"
                )));
            }

            let recipients = room.player_ids_in(color);
            let round = room.round_mut().ok_or_else(no_round)?;
            *round.hostages_mut(color) = hostage_ids.clone();
            let status = SelectionStatus {
                red_selected: !round.red_hostages.is_empty(),
                blue_selected: !round.blue_hostages.is_empty(),
                hostage_count: round.hostage_count,
            };
            Ok((color, hostages, recipients, status))
        })?;

        tracing::info!(
            room_code = %code,
            room_color = %color,
            %leader,
            count = hostages.len(),
            "hostages selected"
        );
        self.hub.publish_to_color(
            code,
            &recipients,
            &ServerEvent::LeaderAnnouncedHostages {
                room_color: color,
                hostages,
                waiting_for_other_leader: !status.both_selected(),
            },
        );

        if status.both_selected() {
            tracing::info!(room_code = %code, "both leaders ready, executing exchange");
            return self.execute_exchange(code).map(Some);
        }
        Ok(None)
    }

    /// Swaps every selected hostage into the opposite room.
    ///
    /// Broadcasts `EXCHANGE_READY`, commits the swap in one registry
    /// update, then broadcasts `EXCHANGE_COMPLETE`.
    pub fn execute_exchange(&self, code: &RoomCode) -> Result<ExchangeOutcome, GameError> {
        let (red, blue) = self.registry.update_with(code, |room| {
            let round = room.round_mut().ok_or_else(no_round)?;
            if round.phase != RoundPhase::Selecting {
                return Err(GameError::conflict("no hostage selection to execute"));
            }
            check_selections(&round.red_hostages, &round.blue_hostages)?;
            round.phase = RoundPhase::Exchanging;
            Ok::<_, GameError>((round.red_hostages.clone(), round.blue_hostages.clone()))
        })?;

        self.hub.publish(
            code,
            &ServerEvent::ExchangeReady {
                red_hostages: red.clone(),
                blue_hostages: blue.clone(),
                countdown: self.config.exchange_countdown,
            },
        );

        let outcome = self.registry.update_with(code, |room| {
            let moves: Vec<(PlayerId, RoomColor)> = red
                .iter()
                .map(|id| (*id, RoomColor::RedRoom))
                .chain(blue.iter().map(|id| (*id, RoomColor::BlueRoom)))
                .collect();

            let mut exchanges = Vec::with_capacity(moves.len());
            for (id, from) in moves {
                let player = room
                    .player_mut(id)
                    .ok_or_else(|| GameError::internal(format!("hostage {id} left the room")))?;
                let to = from.opposite();
                player.current_room = Some(to);
                tracing::debug!(player_id = %id, %from, %to, "hostage moved");
                exchanges.push(ExchangeRecord {
                    player_id: id,
                    nickname: player.nickname.clone(),
                    from_room: from,
                    to_room: to,
                });
            }

            let round = room.round_mut().ok_or_else(no_round)?;
            round.phase = RoundPhase::Complete;
            round.ended_at = Some(Utc::now());
            let round_number = round.round_number;
            Ok::<_, GameError>(ExchangeOutcome {
                round_number,
                exchanges,
                next_round: if round_number < MAX_ROUNDS {
                    round_number + 1
                } else {
                    0
                },
            })
        })?;

        tracing::info!(
            room_code = %code,
            round = outcome.round_number,
            moved = outcome.exchanges.len(),
            "exchange complete"
        );
        self.hub.publish(
            code,
            &ServerEvent::ExchangeComplete {
                round_number: outcome.round_number,
                exchanges: outcome.exchanges.clone(),
                next_round: outcome.next_round,
            },
        );
        Ok(outcome)
    }

    /// Checks that both sides have submitted matching, complete lists.
    pub fn validate_selections(&self, code: &RoomCode) -> Result<(), GameError> {
        let room = self.registry.get(code)?;
        let round = room.round().ok_or_else(no_round)?;
        check_selections(&round.red_hostages, &round.blue_hostages)?;
        if round.red_hostages.len() != round.hostage_count {
            return Err(GameError::invalid(format!(
                "expected {} hostages per side, got {}",
                round.hostage_count,
                round.red_hostages.len()
            )));
        }
        Ok(())
    }

    /// Which sides have submitted for the current round.
    pub fn selection_status(&self, code: &RoomCode) -> Result<SelectionStatus, GameError> {
        let room = self.registry.get(code)?;
        let round = room.round().ok_or_else(no_round)?;
        Ok(SelectionStatus {
            red_selected: !round.red_hostages.is_empty(),
            blue_selected: !round.blue_hostages.is_empty(),
            hostage_count: round.hostage_count,
        })
    }
}

fn check_selections(red: &[PlayerId], blue: &[PlayerId]) -> Result<(), GameError> {
    if red.is_empty() || blue.is_empty() {
        return Err(GameError::conflict("both leaders must select hostages"));
    }
    if red.len() != blue.len() {
        return Err(GameError::invalid("unequal hostage counts"));
    }
    Ok(())
}
