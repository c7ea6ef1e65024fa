//! Error types for the registry.

use tworooms_protocol::RoomCode;

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A room with this code is already stored.
    #[error("room code {0} already exists")]
    CodeExists(RoomCode),

    /// The room does not exist.
    #[error("room {0} not found")]
    NotFound(RoomCode),
}
