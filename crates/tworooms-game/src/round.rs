//! Round lifecycle and the per-room countdown.
//!
//! ```text
//! start_round ──→ SETUP ──assign/preserve leaders──→ ACTIVE
//!                                                     │ 1 Hz TIMER_TICK
//!                                                     ▼
//!                          ROUND_ENDING ←── time_remaining == 0 → SELECTING
//! ```
//!
//! One countdown runs per room. Starting a round cancels whatever timer
//! the room had before, so a restart never leaves two countdowns alive.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tworooms_hub::Hub;
use tworooms_protocol::{
    MAX_ROUNDS, NextPhase, PlayerId, PlayerRef, Room, RoomCode, RoomStatus,
    RoundPhase, RoundState, ServerEvent,
};
use tworooms_registry::RoomRegistry;
use tworooms_tick::{Countdown, TimerHandle};

use crate::leader::{LeaderService, no_round, player_ref};
use crate::{GameConfig, GameError};

/// Builds `ROUND_STARTED` from the room's current round.
pub(crate) fn round_started(room: &Room) -> Option<ServerEvent> {
    let round = room.round()?;
    let leader = |id: Option<PlayerId>| -> Option<PlayerRef> {
        id.and_then(|id| player_ref(room, id))
    };
    Some(ServerEvent::RoundStarted {
        round_number: round.round_number,
        duration: round.duration,
        time_remaining: round.time_remaining,
        red_leader: leader(round.red_leader),
        blue_leader: leader(round.blue_leader),
        hostage_count: round.hostage_count,
    })
}

/// Identifies the round a countdown was started for, so a late tick
/// never lands on a newer round.
#[derive(Clone)]
struct RoundKey {
    code: RoomCode,
    round_number: u8,
    started_at: DateTime<Utc>,
}

pub struct RoundEngine {
    registry: Arc<RoomRegistry>,
    hub: Hub,
    leaders: Arc<LeaderService>,
    config: Arc<GameConfig>,
    timers: Mutex<HashMap<RoomCode, TimerHandle>>,
}

impl RoundEngine {
    pub fn new(
        registry: Arc<RoomRegistry>,
        hub: Hub,
        leaders: Arc<LeaderService>,
        config: Arc<GameConfig>,
    ) -> Self {
        Self {
            registry,
            hub,
            leaders,
            config,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Starts round `round_number` in `SETUP`, keeping the previous
    /// leaders, broadcasts `ROUND_STARTED` and (re)starts the countdown.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if `round_number` is outside `1..=3`.
    /// - `NotFound` if the room has no game running.
    pub fn start_round(
        &self,
        code: &RoomCode,
        round_number: u8,
    ) -> Result<RoundState, GameError> {
        let duration = self.config.round_duration(round_number).ok_or_else(|| {
            GameError::invalid(format!(
                "round number must be between 1 and {MAX_ROUNDS}, got {round_number}"
            ))
        })?;

        let room = self.registry.update_with(code, |room| {
            let players = room.players.len();
            let game = room
                .game
                .as_mut()
                .ok_or_else(|| GameError::not_found("no active game"))?;
            let mut round = RoundState::new(round_number, players, game.round.as_ref())
                .ok_or_else(|| GameError::invalid("round number out of range"))?;
            round.duration = duration;
            round.time_remaining = duration;
            game.current_round = round_number;
            game.round = Some(round);
            Ok::<_, GameError>(room.clone())
        })?;
        let round = room.round().cloned().ok_or_else(no_round)?;

        tracing::info!(
            room_code = %code,
            round = round_number,
            duration,
            hostages = round.hostage_count,
            "round started"
        );
        if let Some(event) = round_started(&room) {
            self.hub.publish(code, &event);
        }

        let key = RoundKey {
            code: code.clone(),
            round_number,
            started_at: round.started_at,
        };
        let registry = Arc::clone(&self.registry);
        let hub = self.hub.clone();
        let handle = Countdown::spawn(duration, self.config.tick_period, move |remaining| {
            on_tick(&registry, &hub, &key, remaining)
        });
        if let Some(previous) = self.timers.lock().insert(code.clone(), handle) {
            previous.cancel();
        }

        Ok(round)
    }

    /// Stops the countdown, marks the round `COMPLETE` and broadcasts
    /// `ROUND_ENDED`.
    pub fn end_round(&self, code: &RoomCode) -> Result<RoundState, GameError> {
        self.stop(code);
        let round = self.registry.update_with(code, |room| {
            let round = room.round_mut().ok_or_else(no_round)?;
            round.phase = RoundPhase::Complete;
            round.ended_at.get_or_insert_with(Utc::now);
            Ok::<_, GameError>(round.clone())
        })?;

        let final_round = round.is_final();
        tracing::info!(room_code = %code, round = round.round_number, final_round, "round ended");
        self.hub.publish(
            code,
            &ServerEvent::RoundEnded {
                round_number: round.round_number,
                final_round,
                next_phase: if final_round {
                    NextPhase::Revealing
                } else {
                    NextPhase::RoundSetup
                },
            },
        );
        Ok(round)
    }

    /// Records that a leader is ready to move on and broadcasts
    /// `LEADER_READY`. Once both are ready the game advances: after the
    /// last round the room moves to `REVEALING`, otherwise the next round
    /// starts with the same leaders.
    ///
    /// Returns whether both leaders are now ready.
    ///
    /// # Errors
    ///
    /// - `Forbidden` if `leader` leads neither side.
    /// - `Conflict` if this leader was already marked ready.
    pub fn leader_ready(
        &self,
        code: &RoomCode,
        leader: PlayerId,
    ) -> Result<bool, GameError> {
        let (color, both, final_round, number) = self.registry.update_with(code, |room| {
            let round = room.round_mut().ok_or_else(no_round)?;
            let color = round.leader_color(leader).ok_or_else(|| {
                GameError::forbidden("only a room leader can signal ready")
            })?;
            if round.is_ready(color) {
                return Err(GameError::conflict("leader already marked ready"));
            }
            round.mark_ready(color);
            let both = round.both_ready();
            let final_round = round.is_final();
            let number = round.round_number;
            if both && final_round {
                room.status = RoomStatus::Revealing;
            }
            Ok((color, both, final_round, number))
        })?;

        tracing::info!(room_code = %code, room_color = %color, %leader, both_ready = both, "leader ready");
        self.hub.publish(
            code,
            &ServerEvent::LeaderReady {
                room_color: color,
                leader_id: leader,
                both_ready: both,
            },
        );

        if both {
            if final_round {
                self.stop(code);
                tracing::info!(room_code = %code, "game revealing");
                self.hub.publish(
                    code,
                    &ServerEvent::GameRevealing {
                        message: "All rounds complete. Reveal your cards!".to_owned(),
                    },
                );
            } else {
                self.start_round(code, number + 1)?;
                self.leaders.preserve_leaders(code)?;
            }
        }
        Ok(both)
    }

    /// The round in progress.
    pub fn current_round(&self, code: &RoomCode) -> Result<RoundState, GameError> {
        self.registry.get(code)?.round().cloned().ok_or_else(no_round)
    }

    /// Cancels the room's countdown, if any.
    pub fn stop(&self, code: &RoomCode) {
        if let Some(handle) = self.timers.lock().remove(code) {
            handle.cancel();
            tracing::debug!(room_code = %code, "round timer stopped");
        }
    }

    /// Number of rooms whose countdown is still running.
    pub fn active_timers(&self) -> usize {
        let mut timers = self.timers.lock();
        timers.retain(|_, h| !h.is_finished());
        timers.len()
    }

    /// Cancels every countdown.
    pub fn cleanup(&self) {
        let drained: Vec<_> = self.timers.lock().drain().collect();
        for (_, handle) in &drained {
            handle.cancel();
        }
        tracing::debug!(count = drained.len(), "round timers cleaned up");
    }
}

/// One countdown step: persist `time_remaining`, broadcast `TIMER_TICK`,
/// and at zero flip to `SELECTING` and broadcast `ROUND_ENDING`.
fn on_tick(
    registry: &RoomRegistry,
    hub: &Hub,
    key: &RoundKey,
    remaining: u32,
) -> ControlFlow<()> {
    let result = registry.update_with(&key.code, |room| {
        let round = room
            .round_mut()
            .filter(|r| r.round_number == key.round_number && r.started_at == key.started_at)
            .ok_or_else(no_round)?;
        if !matches!(round.phase, RoundPhase::Setup | RoundPhase::Active) {
            return Err(GameError::conflict("round no longer counting down"));
        }
        round.time_remaining = remaining;
        if remaining == 0 {
            round.phase = RoundPhase::Selecting;
        }
        Ok(round.hostage_count)
    });

    let hostage_count = match result {
        Ok(n) => n,
        Err(e) => {
            tracing::debug!(room_code = %key.code, reason = %e, "countdown stopped");
            return ControlFlow::Break(());
        }
    };

    hub.publish(
        &key.code,
        &ServerEvent::TimerTick {
            round_number: key.round_number,
            time_remaining: remaining,
        },
    );
    if remaining > 0 {
        return ControlFlow::Continue(());
    }

    tracing::info!(room_code = %key.code, round = key.round_number, "round time up");
    hub.publish(
        &key.code,
        &ServerEvent::RoundEnding {
            round_number: key.round_number,
            hostage_count,
        },
    );
    ControlFlow::Break(())
}
