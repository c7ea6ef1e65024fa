//! Hub configuration.

use std::time::Duration;

/// Tunables for the broadcast hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each connection's outbound queue. A client whose queue
    /// is full when an event arrives is dropped.
    pub client_buffer: usize,

    /// How long a player stays marked "disconnected" before the sweep
    /// forgets them. A leader still gone after this loses the lead.
    pub disconnect_grace: Duration,

    /// How often the hub loop prunes stale disconnect marks.
    pub sweep_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            client_buffer: 256,
            disconnect_grace: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_config_default() {
        let config = HubConfig::default();
        assert_eq!(config.client_buffer, 256);
        assert_eq!(config.disconnect_grace, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
    }
}
