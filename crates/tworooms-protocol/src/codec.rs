//! Codec trait and implementations for turning protocol types into bytes.
//!
//! The hub and the connection handler only depend on the [`Codec`] trait,
//! so the wire format can change without touching game code. [`JsonCodec`]
//! is the only implementation today: browsers speak JSON natively and the
//! frames are easy to inspect in DevTools.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task and by the hub.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or
    /// don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`.
///
/// ```rust
/// use tworooms_protocol::{Codec, JsonCodec, ServerEvent};
///
/// let codec = JsonCodec;
/// let event = ServerEvent::TimerTick { round_number: 2, time_remaining: 42 };
///
/// let bytes = codec.encode(&event).unwrap();
/// let decoded: ServerEvent = codec.decode(&bytes).unwrap();
/// assert_eq!(event, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{ClientAction, RoomColor};

    #[test]
    fn test_json_codec_decodes_client_action() {
        let codec = JsonCodec;
        let bytes =
            br#"{"type":"GET_VOTE","payload":{"roomColor":"BLUE_ROOM"}}"#;
        let action: ClientAction = codec.decode(bytes).unwrap();
        assert_eq!(
            action,
            ClientAction::GetVote {
                room_color: RoomColor::BlueRoom
            }
        );
    }

    #[test]
    fn test_json_codec_decode_garbage_is_decode_error() {
        let codec = JsonCodec;
        let result: Result<ClientAction, _> = codec.decode(b"not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
