//! Game services for tworooms.
//!
//! Every service reads and writes rooms through the shared
//! [`RoomRegistry`] and announces what happened through the [`Hub`].
//!
//! # Key types
//!
//! - [`Lobby`]: create, join, leave, rename, host controls
//! - [`GameService`]: start and reset
//! - [`RoundEngine`]: round lifecycle and the per-room countdown
//! - [`LeaderService`]: leader picks and hand-over
//! - [`VotingService`]: removal votes and elections
//! - [`ExchangeService`]: hostage selection and the swap
//! - [`Coordinator`]: builds all of the above once and wires them together
//!
//! ```text
//!   start_game ──→ start_round(1) ──→ assign_leaders ──→ countdown
//!                                                          │ 0
//!                                                          ▼
//!   select_hostages ×2 ──→ execute_exchange ──→ leader_ready ×2
//!                                                  │
//!                        start_round(n+1) ←────────┴──→ REVEALING (after 3)
//! ```

mod config;
mod error;
mod exchange;
mod game;
mod leader;
mod lobby;
mod round;
mod voting;

use std::sync::Arc;

pub use config::GameConfig;
pub use error::GameError;
pub use exchange::{ExchangeOutcome, ExchangeService, SelectionStatus};
pub use game::GameService;
pub use leader::{LeaderService, LeadershipChange};
pub use lobby::{CreateRoomRequest, LeaveOutcome, Lobby, NICKNAME_MAX, NICKNAME_MIN};
pub use round::RoundEngine;
pub use voting::{MIN_VOTERS, VotingService};

use tworooms_hub::Hub;
use tworooms_registry::RoomRegistry;

/// Owns the registry and one instance of every service.
///
/// Cheap to clone; clones share the same services.
#[derive(Clone)]
pub struct Coordinator {
    config: Arc<GameConfig>,
    registry: Arc<RoomRegistry>,
    hub: Hub,
    lobby: Arc<Lobby>,
    game: Arc<GameService>,
    rounds: Arc<RoundEngine>,
    leaders: Arc<LeaderService>,
    voting: VotingService,
    exchange: Arc<ExchangeService>,
}

impl Coordinator {
    pub fn new(config: GameConfig, hub: Hub) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(RoomRegistry::new());

        let leaders = Arc::new(LeaderService::new(Arc::clone(&registry), hub.clone()));
        let rounds = Arc::new(RoundEngine::new(
            Arc::clone(&registry),
            hub.clone(),
            Arc::clone(&leaders),
            Arc::clone(&config),
        ));
        let voting = VotingService::new(
            Arc::clone(&registry),
            hub.clone(),
            Arc::clone(&leaders),
            Arc::clone(&config),
        );
        let exchange = Arc::new(ExchangeService::new(
            Arc::clone(&registry),
            hub.clone(),
            Arc::clone(&config),
        ));
        let lobby = Arc::new(Lobby::new(
            Arc::clone(&registry),
            hub.clone(),
            Arc::clone(&config),
        ));
        let game = Arc::new(GameService::new(
            Arc::clone(&registry),
            hub.clone(),
            Arc::clone(&rounds),
            Arc::clone(&leaders),
            voting.clone(),
            Arc::clone(&config),
        ));

        Self {
            config,
            registry,
            hub,
            lobby,
            game,
            rounds,
            leaders,
            voting,
            exchange,
        }
    }

    /// Starts background housekeeping. Must be called from within a Tokio
    /// runtime.
    pub fn spawn_background(&self) {
        self.voting.spawn_sweeper();
        tracing::debug!("coordinator background tasks started");
    }

    /// Cancels every countdown, vote timeout and pending election.
    pub fn shutdown(&self) {
        self.rounds.cleanup();
        self.voting.shutdown();
        tracing::info!(rooms = self.registry.len(), "coordinator shut down");
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn lobby(&self) -> &Lobby {
        &self.lobby
    }

    pub fn game(&self) -> &GameService {
        &self.game
    }

    pub fn rounds(&self) -> &RoundEngine {
        &self.rounds
    }

    pub fn leaders(&self) -> &LeaderService {
        &self.leaders
    }

    pub fn voting(&self) -> &VotingService {
        &self.voting
    }

    pub fn exchange(&self) -> &ExchangeService {
        &self.exchange
    }
}
