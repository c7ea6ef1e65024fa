//! Room creation, membership and host controls.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tworooms_hub::Hub;
use tworooms_protocol::{
    Player, PlayerId, Room, RoomCode, RoomStatus, RoomSummary, ServerEvent,
};
use tworooms_registry::{Disposition, RegistryError, RoomRegistry};

use crate::{GameConfig, GameError};

/// Nickname length bounds, in characters, after trimming.
pub const NICKNAME_MIN: usize = 2;
pub const NICKNAME_MAX: usize = 20;

/// Highest suffix tried when de-duplicating a nickname.
const MAX_NICKNAME_SUFFIX: usize = 100;

/// Parameters for a new room.
#[derive(Debug, Clone, Default)]
pub struct CreateRoomRequest {
    pub max_players: usize,
    pub is_public: bool,
    pub role_config_id: Option<String>,
    pub selected_roles: HashMap<String, u32>,
}

/// What `leave_room` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The player was removed from the room.
    Left,
    /// The owner left an idle room, which was closed.
    RoomClosed,
    /// A game is running, so the player keeps their seat.
    Seated,
}

pub struct Lobby {
    registry: Arc<RoomRegistry>,
    hub: Hub,
    config: Arc<GameConfig>,
}

impl Lobby {
    pub fn new(registry: Arc<RoomRegistry>, hub: Hub, config: Arc<GameConfig>) -> Self {
        Self {
            registry,
            hub,
            config,
        }
    }

    /// Creates an empty room under a fresh random code.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if `max_players` is outside the allowed range.
    /// - `Internal` if no unused code was found.
    pub fn create_room(&self, req: CreateRoomRequest) -> Result<Room, GameError> {
        let (min, max) = (self.config.min_players, self.config.max_players);
        if !(min..=max).contains(&req.max_players) {
            return Err(GameError::invalid(format!(
                "max players must be between {min} and {max}"
            )));
        }

        for attempt in 1..=self.config.code_attempts {
            let mut room = Room::new(generate_code(), req.max_players, req.is_public);
            if let Some(id) = req.role_config_id.as_deref().filter(|s| !s.is_empty()) {
                room.role_config_id = id.to_owned();
            }
            room.selected_roles = req.selected_roles.clone();

            match self.registry.create(room.clone()) {
                Ok(()) => return Ok(room),
                Err(RegistryError::CodeExists(code)) => {
                    tracing::debug!(room_code = %code, attempt, "room code collision");
                }
                Err(e) => return Err(e.into()),
            }
        }
        tracing::warn!(attempts = self.config.code_attempts, "could not allocate a room code");
        Err(GameError::internal("failed to generate a unique room code"))
    }

    /// Adds a new player named `Player{n}`. The first player owns the room.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the room does not exist.
    /// - `Conflict` if the room is full or a game is running.
    pub fn join_room(&self, code: &RoomCode) -> Result<Player, GameError> {
        let player = self.registry.update_with(code, |room| {
            if room.status.is_game_active() {
                return Err(GameError::conflict("game already in progress"));
            }
            if room.is_full() {
                return Err(GameError::conflict("room is full"));
            }
            let base = format!("Player{}", room.players.len() + 1);
            let nickname = unique_nickname(room, &base, None)?;
            let mut player = Player::new(PlayerId::random(), nickname);
            if room.players.is_empty() {
                player.is_owner = true;
                room.host_nickname = Some(player.nickname.clone());
            }
            room.players.push(player.clone());
            Ok(player)
        })?;

        tracing::info!(
            room_code = %code,
            player_id = %player.id,
            nickname = %player.nickname,
            owner = player.is_owner,
            "player joined"
        );
        self.hub.publish(
            code,
            &ServerEvent::PlayerJoined {
                player: player.public_view(),
            },
        );
        Ok(player)
    }

    /// Renames a player. Names already taken get a ` (2)`, ` (3)`, ...
    /// suffix. Returns the nickname actually stored.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the trimmed name is too short or too long.
    /// - `NotFound` if the player is not in the room.
    /// - `Conflict` if every suffix up to 100 is taken.
    pub fn update_nickname(
        &self,
        code: &RoomCode,
        player: PlayerId,
        nickname: &str,
    ) -> Result<String, GameError> {
        let base = nickname.trim();
        let len = base.chars().count();
        if !(NICKNAME_MIN..=NICKNAME_MAX).contains(&len) {
            return Err(GameError::invalid(format!(
                "nickname must be {NICKNAME_MIN}-{NICKNAME_MAX} characters"
            )));
        }

        let stored = self.registry.update_with(code, |room| {
            let unique = unique_nickname(room, base, Some(player))?;
            let p = room
                .player_mut(player)
                .ok_or_else(|| GameError::not_found(format!("player {player} not found")))?;
            p.nickname = unique.clone();
            if p.is_owner {
                room.host_nickname = Some(unique.clone());
            }
            Ok::<_, GameError>(unique)
        })?;

        tracing::info!(room_code = %code, %player, nickname = %stored, "nickname changed");
        self.hub.publish(
            code,
            &ServerEvent::NicknameChanged {
                player_id: player,
                new_nickname: stored.clone(),
            },
        );
        Ok(stored)
    }

    /// Takes a player out of a room.
    ///
    /// During a game the player keeps their seat and only `PLAYER_LEFT` is
    /// broadcast. Outside a game the owner leaving closes the room; anyone
    /// else is removed, and an emptied room is deleted.
    pub fn leave_room(&self, code: &RoomCode, player: PlayerId) -> Result<LeaveOutcome, GameError> {
        let outcome = self.registry.update_or_delete(code, |room| {
            let idx = room
                .players
                .iter()
                .position(|p| p.id == player)
                .ok_or_else(|| GameError::not_found(format!("player {player} not found")))?;
            if room.status.is_game_active() {
                return Ok((LeaveOutcome::Seated, Disposition::Keep));
            }
            if room.players[idx].is_owner {
                return Ok((LeaveOutcome::RoomClosed, Disposition::Delete));
            }
            room.players.remove(idx);
            let disposition = if room.players.is_empty() {
                Disposition::Delete
            } else {
                Disposition::Keep
            };
            Ok::<_, GameError>((LeaveOutcome::Left, disposition))
        })?;

        tracing::info!(room_code = %code, %player, ?outcome, "player left");
        match outcome {
            LeaveOutcome::RoomClosed => self.hub.publish(
                code,
                &ServerEvent::RoomClosed {
                    reason: "the host left the room".to_owned(),
                },
            ),
            LeaveOutcome::Left | LeaveOutcome::Seated => {
                self.hub.publish(code, &ServerEvent::PlayerLeft { player_id: player });
            }
        }
        Ok(outcome)
    }

    /// Hands ownership from `owner` to the next player in join order.
    ///
    /// # Errors
    ///
    /// - `Forbidden` if `owner` does not own the room.
    /// - `Conflict` while a game is running.
    /// - `NotFound` if nobody else is in the room.
    pub fn transfer_ownership(&self, code: &RoomCode, owner: PlayerId) -> Result<Player, GameError> {
        let new_owner = self.registry.update_with(code, |room| {
            if !room.player(owner).is_some_and(|p| p.is_owner) {
                return Err(GameError::forbidden("only the room owner can transfer ownership"));
            }
            if room.status.is_game_active() {
                return Err(GameError::conflict("ownership cannot change during a game"));
            }
            let next = room
                .players
                .iter()
                .position(|p| p.id != owner)
                .ok_or_else(|| GameError::not_found("no other player to take ownership"))?;
            for p in &mut room.players {
                p.is_owner = false;
            }
            room.players[next].is_owner = true;
            room.host_nickname = Some(room.players[next].nickname.clone());
            Ok(room.players[next].clone())
        })?;

        tracing::info!(room_code = %code, from = %owner, to = %new_owner.id, "ownership transferred");
        self.hub.publish(
            code,
            &ServerEvent::OwnerChanged {
                new_owner: new_owner.public_view(),
            },
        );
        Ok(new_owner)
    }

    /// Shows or hides the room in public listings. Owner only.
    pub fn update_visibility(
        &self,
        code: &RoomCode,
        player: PlayerId,
        is_public: bool,
    ) -> Result<(), GameError> {
        self.registry.update_with(code, |room| {
            if !room.player(player).is_some_and(|p| p.is_owner) {
                return Err(GameError::forbidden("only the room owner can change visibility"));
            }
            room.is_public = is_public;
            Ok(())
        })?;

        tracing::info!(room_code = %code, is_public, "visibility changed");
        self.hub.publish(code, &ServerEvent::VisibilityChanged { is_public });
        Ok(())
    }

    /// One page of public rooms, newest first, plus the total match count.
    ///
    /// `status` may be `"WAITING"`, `"IN_PROGRESS"`, or empty for any.
    pub fn list_public_rooms(
        &self,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<RoomSummary>, usize), GameError> {
        let status = match status.map(str::trim).filter(|s| !s.is_empty()) {
            None => None,
            Some("WAITING") => Some(RoomStatus::Waiting),
            Some("IN_PROGRESS") => Some(RoomStatus::InProgress),
            Some(other) => {
                return Err(GameError::invalid(format!("invalid status filter: {other}")));
            }
        };
        let (rooms, total) = self.registry.list_public(status, limit, offset);
        Ok((rooms.iter().map(RoomSummary::from).collect(), total))
    }

    /// A full snapshot of the room.
    pub fn room(&self, code: &RoomCode) -> Result<Room, GameError> {
        Ok(self.registry.get(code)?)
    }
}

/// Draws a random code from `A-Z0-9`.
fn generate_code() -> RoomCode {
    let mut rng = rand::rng();
    let code: String = (0..RoomCode::LEN)
        .map(|_| char::from(RoomCode::CHARSET[rng.random_range(0..RoomCode::CHARSET.len())]))
        .collect();
    RoomCode::new(code)
}

/// `base` if nobody else in the room uses it, otherwise the first free
/// `"base (n)"` for n from 2.
fn unique_nickname(room: &Room, base: &str, exclude: Option<PlayerId>) -> Result<String, GameError> {
    let taken = |name: &str| {
        room.players
            .iter()
            .any(|p| Some(p.id) != exclude && p.nickname == name)
    };
    if !taken(base) {
        return Ok(base.to_owned());
    }
    (2..=MAX_NICKNAME_SUFFIX)
        .map(|n| format!("{base} ({n})"))
        .find(|candidate| !taken(candidate))
        .ok_or_else(|| GameError::conflict("nickname is not available"))
}

#[cfg(test)]
mod tests {
    use tworooms_hub::HubConfig;

    use super::*;

    fn lobby() -> Lobby {
        Lobby::new(
            Arc::new(RoomRegistry::new()),
            Hub::spawn(HubConfig::default()),
            Arc::new(GameConfig::default()),
        )
    }

    fn request(max_players: usize) -> CreateRoomRequest {
        CreateRoomRequest {
            max_players,
            ..CreateRoomRequest::default()
        }
    }

    // =====================================================================
    // create_room
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_create_room_valid_code_and_defaults() {
        let lobby = lobby();
        let room = lobby.create_room(request(10)).unwrap();

        assert_eq!(room.code.as_str().len(), RoomCode::LEN);
        assert!(room.code.as_str().bytes().all(|b| RoomCode::CHARSET.contains(&b)));
        assert_eq!(room.role_config_id, Room::DEFAULT_ROLE_CONFIG);
        assert_eq!(room.status, RoomStatus::Waiting);
        assert!(room.players.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_room_capacity_bounds() {
        let lobby = lobby();
        assert!(matches!(lobby.create_room(request(5)), Err(GameError::InvalidInput(_))));
        assert!(matches!(lobby.create_room(request(31)), Err(GameError::InvalidInput(_))));
        assert!(lobby.create_room(request(6)).is_ok());
        assert!(lobby.create_room(request(30)).is_ok());
    }

    // =====================================================================
    // join_room
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_join_room_first_player_is_owner() {
        let lobby = lobby();
        let code = lobby.create_room(request(6)).unwrap().code;

        let first = lobby.join_room(&code).unwrap();
        let second = lobby.join_room(&code).unwrap();

        assert!(first.is_owner);
        assert!(!second.is_owner);
        assert_eq!(first.nickname, "Player1");
        assert_eq!(second.nickname, "Player2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_room_full_conflict() {
        let lobby = lobby();
        let code = lobby.create_room(request(6)).unwrap().code;
        for _ in 0..6 {
            lobby.join_room(&code).unwrap();
        }

        assert!(matches!(lobby.join_room(&code), Err(GameError::Conflict(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_room_unknown_not_found() {
        let lobby = lobby();
        assert!(matches!(
            lobby.join_room(&RoomCode::from("NOROOM")),
            Err(GameError::NotFound(_))
        ));
    }

    // =====================================================================
    // update_nickname
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_update_nickname_dedupes_with_suffix() {
        let lobby = lobby();
        let code = lobby.create_room(request(6)).unwrap().code;
        let a = lobby.join_room(&code).unwrap();
        let b = lobby.join_room(&code).unwrap();
        let c = lobby.join_room(&code).unwrap();

        assert_eq!(lobby.update_nickname(&code, a.id, "Kim").unwrap(), "Kim");
        assert_eq!(lobby.update_nickname(&code, b.id, "Kim").unwrap(), "Kim (2)");
        assert_eq!(lobby.update_nickname(&code, c.id, " Kim ").unwrap(), "Kim (3)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_nickname_same_name_for_self_unchanged() {
        let lobby = lobby();
        let code = lobby.create_room(request(6)).unwrap().code;
        let a = lobby.join_room(&code).unwrap();

        lobby.update_nickname(&code, a.id, "Alex").unwrap();
        assert_eq!(lobby.update_nickname(&code, a.id, "Alex").unwrap(), "Alex");
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_nickname_length_bounds() {
        let lobby = lobby();
        let code = lobby.create_room(request(6)).unwrap().code;
        let a = lobby.join_room(&code).unwrap();

        assert!(matches!(
            lobby.update_nickname(&code, a.id, " x "),
            Err(GameError::InvalidInput(_))
        ));
        assert!(matches!(
            lobby.update_nickname(&code, a.id, &"y".repeat(21)),
            Err(GameError::InvalidInput(_))
        ));
        assert!(lobby.update_nickname(&code, a.id, &"y".repeat(20)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_nickname_owner_updates_host_name() {
        let lobby = lobby();
        let code = lobby.create_room(request(6)).unwrap().code;
        let owner = lobby.join_room(&code).unwrap();

        lobby.update_nickname(&code, owner.id, "Host").unwrap();

        assert_eq!(lobby.room(&code).unwrap().host_nickname.as_deref(), Some("Host"));
    }

    // =====================================================================
    // leave_room / transfer_ownership
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_leave_room_owner_closes_idle_room() {
        let lobby = lobby();
        let code = lobby.create_room(request(6)).unwrap().code;
        let owner = lobby.join_room(&code).unwrap();
        lobby.join_room(&code).unwrap();

        assert_eq!(lobby.leave_room(&code, owner.id).unwrap(), LeaveOutcome::RoomClosed);
        assert!(matches!(lobby.room(&code), Err(GameError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_room_guest_removed() {
        let lobby = lobby();
        let code = lobby.create_room(request(6)).unwrap().code;
        lobby.join_room(&code).unwrap();
        let guest = lobby.join_room(&code).unwrap();

        assert_eq!(lobby.leave_room(&code, guest.id).unwrap(), LeaveOutcome::Left);
        assert_eq!(lobby.room(&code).unwrap().players.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_room_during_game_keeps_seat() {
        let lobby = lobby();
        let code = lobby.create_room(request(6)).unwrap().code;
        let owner = lobby.join_room(&code).unwrap();
        lobby
            .registry
            .update_with::<_, GameError, _>(&code, |room| {
                room.status = RoomStatus::InProgress;
                Ok(())
            })
            .unwrap();

        assert_eq!(lobby.leave_room(&code, owner.id).unwrap(), LeaveOutcome::Seated);
        let room = lobby.room(&code).unwrap();
        assert_eq!(room.players.len(), 1);
        assert!(room.players[0].is_owner);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_ownership_moves_to_next_in_join_order() {
        let lobby = lobby();
        let code = lobby.create_room(request(6)).unwrap().code;
        let owner = lobby.join_room(&code).unwrap();
        let next = lobby.join_room(&code).unwrap();
        lobby.join_room(&code).unwrap();

        let new_owner = lobby.transfer_ownership(&code, owner.id).unwrap();

        assert_eq!(new_owner.id, next.id);
        let room = lobby.room(&code).unwrap();
        assert_eq!(room.players.iter().filter(|p| p.is_owner).count(), 1);
        assert_eq!(room.owner().map(|p| p.id), Some(next.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_ownership_by_guest_forbidden() {
        let lobby = lobby();
        let code = lobby.create_room(request(6)).unwrap().code;
        lobby.join_room(&code).unwrap();
        let guest = lobby.join_room(&code).unwrap();

        assert!(matches!(
            lobby.transfer_ownership(&code, guest.id),
            Err(GameError::Forbidden(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_ownership_alone_not_found() {
        let lobby = lobby();
        let code = lobby.create_room(request(6)).unwrap().code;
        let owner = lobby.join_room(&code).unwrap();

        assert!(matches!(
            lobby.transfer_ownership(&code, owner.id),
            Err(GameError::NotFound(_))
        ));
    }

    // =====================================================================
    // visibility / listing
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_update_visibility_guest_forbidden() {
        let lobby = lobby();
        let code = lobby.create_room(request(6)).unwrap().code;
        lobby.join_room(&code).unwrap();
        let guest = lobby.join_room(&code).unwrap();

        assert!(matches!(
            lobby.update_visibility(&code, guest.id, true),
            Err(GameError::Forbidden(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_public_rooms_filters_private_and_bad_status() {
        let lobby = lobby();
        lobby
            .create_room(CreateRoomRequest {
                is_public: true,
                ..request(6)
            })
            .unwrap();
        lobby.create_room(request(6)).unwrap();

        let (rooms, total) = lobby.list_public_rooms(None, 0, 0).unwrap();
        assert_eq!((rooms.len(), total), (1, 1));

        let (rooms, _) = lobby.list_public_rooms(Some("IN_PROGRESS"), 10, 0).unwrap();
        assert!(rooms.is_empty());

        assert!(matches!(
            lobby.list_public_rooms(Some("FINISHED"), 10, 0),
            Err(GameError::InvalidInput(_))
        ));
    }
}
