//! Game timing and limits.

use std::time::Duration;

/// Tunables for every game service.
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Smallest room capacity a host may choose, and the minimum number
    /// of players needed to start.
    pub min_players: usize,

    /// Largest room capacity a host may choose.
    pub max_players: usize,

    /// Length of rounds 1, 2 and 3 in seconds.
    pub round_durations: [u32; 3],

    /// Interval between countdown ticks.
    pub tick_period: Duration,

    /// How long a removal vote or election stays open.
    pub vote_timeout: Duration,

    /// Pause between a passed removal vote and the election that follows.
    pub election_delay: Duration,

    /// Vote sessions older than this are discarded by the sweeper.
    pub vote_max_age: Duration,

    /// How often the sweeper runs.
    pub vote_sweep_interval: Duration,

    /// Countdown value announced in `EXCHANGE_READY`.
    pub exchange_countdown: u32,

    /// Attempts at drawing an unused room code before giving up.
    pub code_attempts: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            min_players: 6,
            max_players: 30,
            round_durations: [180, 120, 60],
            tick_period: Duration::from_secs(1),
            vote_timeout: Duration::from_secs(30),
            election_delay: Duration::from_secs(7),
            vote_max_age: Duration::from_secs(5 * 60),
            vote_sweep_interval: Duration::from_secs(10),
            exchange_countdown: 3,
            code_attempts: 10,
        }
    }
}

impl GameConfig {
    /// Configured length of `round` in seconds, or `None` outside `1..=3`.
    pub fn round_duration(&self, round: u8) -> Option<u32> {
        match round {
            1..=3 => Some(self.round_durations[usize::from(round) - 1]),
            _ => None,
        }
    }

    /// Vote timeout in whole seconds, as reported on the wire.
    pub fn vote_timeout_secs(&self) -> u32 {
        u32::try_from(self.vote_timeout.as_secs()).unwrap_or(u32::MAX)
    }
}
