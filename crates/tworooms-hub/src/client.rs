//! A registered connection as the hub sees it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tworooms_protocol::{PlayerId, RoomCode};
use tworooms_transport::ConnectionId;

/// One encoded message, shared by every recipient of a broadcast.
pub type Frame = Arc<[u8]>;

/// Registration record for one connection.
///
/// `player` is the tag used for color-scoped and unicast delivery; a
/// connection without one only receives room-wide broadcasts.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: ConnectionId,
    pub room: RoomCode,
    pub player: Option<PlayerId>,
    pub(crate) tx: mpsc::Sender<Frame>,
}

impl ClientHandle {
    /// Creates a registration record around the sending half of the
    /// connection's outbound queue.
    pub fn new(
        id: ConnectionId,
        room: RoomCode,
        player: Option<PlayerId>,
        tx: mpsc::Sender<Frame>,
    ) -> Self {
        Self {
            id,
            room,
            player,
            tx,
        }
    }
}
