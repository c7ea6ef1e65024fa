//! # tworooms
//!
//! WebSocket coordinator for *Two Rooms and a Boom*.
//!
//! Clients connect over WebSocket, create or join a room by its six
//! character code, and from then on act for one player. Every rule lives in
//! [`tworooms_game`]; this crate only accepts connections, decodes
//! `ClientAction`s, dispatches them, and wires each bound connection into
//! the broadcast hub.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tworooms::TwoRoomsServer;
//!
//! # async fn run() -> Result<(), tworooms::TwoRoomsError> {
//! let server = TwoRoomsServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::ServerConfig;
pub use error::TwoRoomsError;
pub use server::{TwoRoomsServer, TwoRoomsServerBuilder};

// Re-exported so embedders can tune the services without extra imports.
pub use tworooms_game::{Coordinator, GameConfig};
pub use tworooms_hub::HubConfig;
