//! `TwoRoomsServer` builder and accept loop.
//!
//! Ties the layers together: transport → protocol → coordinator → hub.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tworooms_game::{Coordinator, GameConfig};
use tworooms_hub::{Hub, HubConfig};
use tworooms_protocol::JsonCodec;
use tworooms_transport::{Transport, WebSocketTransport};

use crate::handler::handle_connection;
use crate::{ServerConfig, TwoRoomsError};

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState {
    pub(crate) coordinator: Coordinator,
    pub(crate) codec: JsonCodec,
    pub(crate) config: ServerConfig,
}

/// Builder for configuring and starting a tworooms server.
///
/// # Example
///
/// ```rust,ignore
/// let server = TwoRoomsServer::builder()
///     .bind("0.0.0.0:8080")
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct TwoRoomsServerBuilder {
    config: ServerConfig,
    game_config: GameConfig,
    hub_config: HubConfig,
}

impl TwoRoomsServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            game_config: GameConfig::default(),
            hub_config: HubConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Closes connections that stay silent for longer than `timeout`.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Pings every connection this often to keep it alive.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    /// Sets round, vote and lobby tunables.
    pub fn game_config(mut self, config: GameConfig) -> Self {
        self.game_config = config;
        self
    }

    /// Sets broadcast hub tunables.
    pub fn hub_config(mut self, config: HubConfig) -> Self {
        self.hub_config = config;
        self
    }

    /// Binds the listener and spawns the hub and the game services.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn build(self) -> Result<TwoRoomsServer, TwoRoomsError> {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;

        let hub = Hub::spawn(self.hub_config);
        let coordinator = Coordinator::new(self.game_config, hub);
        coordinator.spawn_background();

        let state = Arc::new(ServerState {
            coordinator,
            codec: JsonCodec,
            config: self.config,
        });

        Ok(TwoRoomsServer { transport, state })
    }
}

impl Default for TwoRoomsServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound tworooms server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct TwoRoomsServer {
    transport: WebSocketTransport,
    state: Arc<ServerState>,
}

impl TwoRoomsServer {
    /// Creates a new builder.
    pub fn builder() -> TwoRoomsServerBuilder {
        TwoRoomsServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The services behind this server.
    pub fn coordinator(&self) -> &Coordinator {
        &self.state.coordinator
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), TwoRoomsError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` completes, then stops every
    /// round timer, vote timer and the hub.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), TwoRoomsError>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(addr = ?self.local_addr().ok(), "tworooms server running");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        tracing::info!("tworooms server shutting down");
        self.state.coordinator.shutdown();
        self.state.coordinator.hub().shutdown();
        Ok(())
    }
}
