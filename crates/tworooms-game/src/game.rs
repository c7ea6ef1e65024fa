//! Starting and resetting a game.

use std::sync::Arc;

use rand::Rng;
use rand::seq::SliceRandom;
use tworooms_hub::Hub;
use tworooms_protocol::{
    GameSession, Player, Role, Room, RoomCode, RoomColor, RoomStatus,
    ServerEvent, Team,
};
use tworooms_registry::RoomRegistry;

use crate::leader::LeaderService;
use crate::round::RoundEngine;
use crate::voting::VotingService;
use crate::{GameConfig, GameError};

/// Player count from which each team gets a second spy.
pub const TWO_SPY_THRESHOLD: usize = 10;

pub struct GameService {
    registry: Arc<RoomRegistry>,
    hub: Hub,
    rounds: Arc<RoundEngine>,
    leaders: Arc<LeaderService>,
    voting: VotingService,
    config: Arc<GameConfig>,
}

impl GameService {
    pub fn new(
        registry: Arc<RoomRegistry>,
        hub: Hub,
        rounds: Arc<RoundEngine>,
        leaders: Arc<LeaderService>,
        voting: VotingService,
        config: Arc<GameConfig>,
    ) -> Self {
        Self {
            registry,
            hub,
            rounds,
            leaders,
            voting,
            config,
        }
    }

    /// Deals teams, roles and rooms, then starts round 1 with fresh
    /// leaders.
    ///
    /// Each player learns their own role through a private
    /// `ROLE_ASSIGNED`; the room only sees `GAME_STARTED`.
    ///
    /// # Errors
    ///
    /// - `Conflict` if a game is already running.
    /// - `InvalidInput` with fewer than the minimum number of players.
    pub fn start_game(&self, code: &RoomCode) -> Result<GameSession, GameError> {
        let min_players = self.config.min_players;
        let room = self.registry.update_with(code, |room| {
            if room.status.is_game_active() {
                return Err(GameError::conflict("game already started"));
            }
            if room.players.len() < min_players {
                return Err(GameError::invalid(format!(
                    "need at least {min_players} players to start, have {}",
                    room.players.len()
                )));
            }
            deal(&mut room.players, &mut rand::rng());
            room.status = RoomStatus::InProgress;
            room.game = Some(GameSession::new(room.code.clone()));
            Ok(room.clone())
        })?;
        let session = room
            .game
            .clone()
            .ok_or_else(|| GameError::internal("game session missing after start"))?;

        tracing::info!(
            room_code = %code,
            session_id = %session.id,
            players = room.players.len(),
            "game started"
        );
        self.hub.publish(
            code,
            &ServerEvent::GameStarted {
                game_session: session.clone(),
            },
        );
        for player in &room.players {
            notify_role(&self.hub, code, player);
        }

        self.rounds.start_round(code, 1)?;
        self.leaders.assign_leaders(code)?;
        Ok(session)
    }

    /// Ends the running game and returns the room to `WAITING`.
    ///
    /// # Errors
    ///
    /// `Conflict` if no game has been started.
    pub fn reset_game(&self, code: &RoomCode) -> Result<Room, GameError> {
        let room = self.registry.update_with(code, |room| {
            if !room.status.is_game_active() {
                return Err(GameError::conflict("game not started"));
            }
            room.game = None;
            room.status = RoomStatus::Waiting;
            for player in &mut room.players {
                player.clear_assignment();
            }
            Ok(room.public_view())
        })?;

        self.rounds.stop(code);
        self.voting.clear_room(code);

        tracing::info!(room_code = %code, "game reset");
        self.hub.publish(code, &ServerEvent::GameReset { room: room.clone() });
        Ok(room)
    }
}

fn notify_role(hub: &Hub, code: &RoomCode, player: &Player) {
    let (Some(role), Some(team), Some(current_room)) =
        (player.role.clone(), player.team, player.current_room)
    else {
        tracing::warn!(room_code = %code, player_id = %player.id, "player left undealt");
        return;
    };
    hub.publish_to_player(
        code,
        player.id,
        &ServerEvent::RoleAssigned {
            role,
            team,
            current_room,
        },
    );
}

/// Shuffles `players` into teams (red takes the odd one), hands out roles
/// and then shuffles them again into the two rooms.
fn deal<R: Rng + ?Sized>(players: &mut [Player], rng: &mut R) {
    let n = players.len();
    let red_size = n - n / 2;
    let spies = if n >= TWO_SPY_THRESHOLD { 2 } else { 1 };

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    let (red, blue) = order.split_at(red_size);
    for (team, members) in [(Team::Red, red), (Team::Blue, blue)] {
        for (rank, &idx) in members.iter().enumerate() {
            let role = match (rank, team) {
                (0, Team::Red) => Role::bomber(),
                (0, _) => Role::president(),
                (r, _) if r <= spies => Role::spy(team),
                _ => Role::operative(team),
            };
            players[idx].team = Some(team);
            players[idx].role = Some(role);
        }
    }

    order.shuffle(rng);
    for (pos, &idx) in order.iter().enumerate() {
        players[idx].current_room = Some(if pos < red_size {
            RoomColor::RedRoom
        } else {
            RoomColor::BlueRoom
        });
    }
}
