//! Unified error type for the tworooms server.

use tworooms_game::GameError;
use tworooms_protocol::ProtocolError;
use tworooms_registry::RegistryError;
use tworooms_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TwoRoomsError {
    /// A transport-level error (bind, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A registry error (unknown room, code collision).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A game rule was violated.
    #[error(transparent)]
    Game(#[from] GameError),
}

#[cfg(test)]
mod tests {
    use tworooms_protocol::RoomCode;

    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::Send("gone".into());
        let wrapped: TwoRoomsError = err.into();
        assert!(matches!(wrapped, TwoRoomsError::Transport(_)));
        assert!(wrapped.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let wrapped: TwoRoomsError = err.into();
        assert!(matches!(wrapped, TwoRoomsError::Protocol(_)));
    }

    #[test]
    fn test_from_registry_error() {
        let err = RegistryError::NotFound(RoomCode::from("ABCDEF"));
        let wrapped: TwoRoomsError = err.into();
        assert!(matches!(wrapped, TwoRoomsError::Registry(_)));
    }

    #[test]
    fn test_from_game_error_is_transparent() {
        let wrapped: TwoRoomsError = GameError::conflict("game already started").into();
        assert!(matches!(wrapped, TwoRoomsError::Game(GameError::Conflict(_))));
        assert_eq!(wrapped.to_string(), "game already started");
    }
}
