//! Server configuration.

use std::time::Duration;

/// Settings for the connection front end.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,

    /// A connection from which nothing arrives for this long, pongs
    /// included, is closed.
    pub idle_timeout: Duration,

    /// How often the server pings each connection. Must be shorter than
    /// `idle_timeout` so a healthy peer's pong lands in time.
    pub ping_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            idle_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(54),
        }
    }
}
