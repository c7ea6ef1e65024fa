//! The hub handle and its membership loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tworooms_protocol::{Codec, JsonCodec, PlayerId, RoomCode, ServerEvent};
use tworooms_transport::ConnectionId;

use crate::{ClientHandle, Frame, HubConfig};

/// Membership changes, applied one at a time by the hub loop.
enum HubCommand {
    Register {
        client: ClientHandle,
        reply: oneshot::Sender<()>,
    },
    Unregister {
        id: ConnectionId,
    },
    Sync {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

struct Member {
    player: Option<PlayerId>,
    tx: mpsc::Sender<Frame>,
}

#[derive(Default)]
struct Membership {
    rooms: HashMap<RoomCode, HashMap<ConnectionId, Member>>,
    /// Which room each connection is registered in.
    index: HashMap<ConnectionId, RoomCode>,
}

/// State shared between the handle and the loop.
struct Shared {
    members: RwLock<Membership>,
    disconnected: Mutex<HashMap<PlayerId, Instant>>,
    codec: JsonCodec,
    config: HubConfig,
}

impl Shared {
    /// Snapshots matching senders under the read lock, then delivers with
    /// `try_send` after releasing it. Returns connections whose queue was
    /// full.
    fn deliver(
        &self,
        code: &RoomCode,
        frame: &Frame,
        wants: impl Fn(Option<PlayerId>) -> bool,
    ) -> Vec<ConnectionId> {
        let targets: Vec<(ConnectionId, mpsc::Sender<Frame>)> = {
            let members = self.members.read();
            let Some(room) = members.rooms.get(code) else {
                return Vec::new();
            };
            room.iter()
                .filter(|(_, m)| wants(m.player))
                .map(|(id, m)| (*id, m.tx.clone()))
                .collect()
        };

        let mut overflowed = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(Arc::clone(frame)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        room_code = %code,
                        conn_id = %id,
                        "client queue full, dropping client"
                    );
                    overflowed.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::trace!(room_code = %code, conn_id = %id, "client queue closed");
                }
            }
        }
        overflowed
    }

    fn encode(&self, event: &ServerEvent) -> Option<Frame> {
        match self.codec.encode(event) {
            Ok(bytes) => Some(Frame::from(bytes)),
            Err(e) => {
                tracing::warn!(event = event.kind(), error = %e, "failed to encode event");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Hub handle
// ---------------------------------------------------------------------------

/// Handle to the broadcast hub. Cheap to clone.
///
/// Broadcast methods are synchronous and never wait on a receiver; they
/// can be called from inside a registry critical section or a timer
/// callback without risk of stalling.
#[derive(Clone)]
pub struct Hub {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl Hub {
    /// Spawns the membership loop and returns a handle to it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(config: HubConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            members: RwLock::new(Membership::default()),
            disconnected: Mutex::new(HashMap::new()),
            codec: JsonCodec,
            config,
        });

        let hub_loop = HubLoop {
            shared: Arc::clone(&shared),
            commands: rx,
        };
        tokio::spawn(hub_loop.run());

        Self {
            shared,
            commands: tx,
        }
    }

    /// Creates the bounded outbound queue for a new connection.
    pub fn client_channel(
        &self,
    ) -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
        mpsc::channel(self.shared.config.client_buffer.max(1))
    }

    /// Registers a connection and waits until the loop has applied it,
    /// so any event published afterwards reaches the new client.
    pub async fn register(&self, client: ClientHandle) {
        let (reply, done) = oneshot::channel();
        if self
            .commands
            .send(HubCommand::Register { client, reply })
            .is_err()
        {
            tracing::debug!("hub loop stopped, register ignored");
            return;
        }
        let _ = done.await;
    }

    /// Queues removal of a connection. Safe to call from `Drop`.
    pub fn unregister(&self, id: ConnectionId) {
        let _ = self.commands.send(HubCommand::Unregister { id });
    }

    /// Waits until every membership command queued before this call has
    /// been applied.
    pub async fn sync(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(HubCommand::Sync { reply }).is_ok() {
            let _ = done.await;
        }
    }

    /// Stops the loop. Every client queue is closed.
    pub fn shutdown(&self) {
        let _ = self.commands.send(HubCommand::Shutdown);
    }

    // -- Raw frame delivery -------------------------------------------------

    /// Sends a frame to every connection registered for `code`.
    pub fn broadcast_to_room(&self, code: &RoomCode, frame: Frame) {
        let full = self.shared.deliver(code, &frame, |_| true);
        self.drop_overflowed(full);
    }

    /// Sends a frame only to connections tagged with one of `players`.
    pub fn broadcast_to_room_color(
        &self,
        code: &RoomCode,
        players: &[PlayerId],
        frame: Frame,
    ) {
        let full = self.shared.deliver(code, &frame, |tag| {
            tag.is_some_and(|p| players.contains(&p))
        });
        self.drop_overflowed(full);
    }

    /// Sends a frame to every connection tagged with `player`.
    pub fn send_to_client(
        &self,
        code: &RoomCode,
        player: PlayerId,
        frame: Frame,
    ) {
        let full = self
            .shared
            .deliver(code, &frame, |tag| tag == Some(player));
        self.drop_overflowed(full);
    }

    // -- Typed events -------------------------------------------------------

    /// Encodes `event` once and broadcasts it to the whole room.
    pub fn publish(&self, code: &RoomCode, event: &ServerEvent) {
        if let Some(frame) = self.shared.encode(event) {
            tracing::trace!(room_code = %code, event = event.kind(), "publish");
            self.broadcast_to_room(code, frame);
        }
    }

    /// Encodes `event` once and sends it to the listed players only.
    pub fn publish_to_color(
        &self,
        code: &RoomCode,
        players: &[PlayerId],
        event: &ServerEvent,
    ) {
        if let Some(frame) = self.shared.encode(event) {
            tracing::trace!(
                room_code = %code,
                event = event.kind(),
                recipients = players.len(),
                "publish scoped"
            );
            self.broadcast_to_room_color(code, players, frame);
        }
    }

    /// Encodes `event` and sends it to a single player.
    pub fn publish_to_player(
        &self,
        code: &RoomCode,
        player: PlayerId,
        event: &ServerEvent,
    ) {
        if let Some(frame) = self.shared.encode(event) {
            self.send_to_client(code, player, frame);
        }
    }

    // -- Queries ------------------------------------------------------------

    /// How long a dropped player is remembered before counting as gone.
    pub fn disconnect_grace(&self) -> Duration {
        self.shared.config.disconnect_grace
    }

    /// Whether `player` dropped within the grace window and has not
    /// reconnected.
    pub fn is_player_disconnected(&self, player: PlayerId) -> bool {
        let grace = self.shared.config.disconnect_grace;
        self.shared
            .disconnected
            .lock()
            .get(&player)
            .is_some_and(|since| since.elapsed() < grace)
    }

    /// Whether `player` has at least one live connection in `code`.
    pub fn is_connected(&self, code: &RoomCode, player: PlayerId) -> bool {
        self.shared
            .members
            .read()
            .rooms
            .get(code)
            .is_some_and(|room| room.values().any(|m| m.player == Some(player)))
    }

    /// Number of connections registered for `code`.
    pub fn client_count(&self, code: &RoomCode) -> usize {
        self.shared
            .members
            .read()
            .rooms
            .get(code)
            .map_or(0, HashMap::len)
    }

    /// Number of rooms with at least one connection.
    pub fn room_count(&self) -> usize {
        self.shared.members.read().rooms.len()
    }

    fn drop_overflowed(&self, ids: Vec<ConnectionId>) {
        for id in ids {
            self.unregister(id);
        }
    }
}

// ---------------------------------------------------------------------------
// Membership loop
// ---------------------------------------------------------------------------

struct HubLoop {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<HubCommand>,
}

impl HubLoop {
    async fn run(mut self) {
        tracing::info!("hub started");

        let mut sweep = time::interval(self.shared.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        sweep.tick().await;

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(HubCommand::Register { client, reply }) => {
                        self.register(client);
                        let _ = reply.send(());
                    }
                    Some(HubCommand::Unregister { id }) => self.unregister(id),
                    Some(HubCommand::Sync { reply }) => {
                        let _ = reply.send(());
                    }
                    Some(HubCommand::Shutdown) | None => break,
                },
                _ = sweep.tick() => self.sweep(),
            }
        }

        // Dropping every member drops every sender, closing the queues.
        let mut members = self.shared.members.write();
        members.rooms.clear();
        members.index.clear();
        tracing::info!("hub stopped");
    }

    fn register(&mut self, client: ClientHandle) {
        let ClientHandle {
            id,
            room,
            player,
            tx,
        } = client;

        {
            let mut members = self.shared.members.write();
            // A connection lives in one room at a time.
            if let Some(previous) = members.index.insert(id, room.clone()) {
                if let Some(clients) = members.rooms.get_mut(&previous) {
                    clients.remove(&id);
                    if clients.is_empty() {
                        members.rooms.remove(&previous);
                    }
                }
            }
            members
                .rooms
                .entry(room.clone())
                .or_default()
                .insert(id, Member { player, tx });
        }

        if let Some(p) = player {
            self.shared.disconnected.lock().remove(&p);
        }
        tracing::info!(
            room_code = %room,
            conn_id = %id,
            player_id = ?player,
            "client registered"
        );
    }

    fn unregister(&mut self, id: ConnectionId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some((room, gone)) = self.remove(id) else {
                continue;
            };
            let Some(player) = gone else {
                continue;
            };

            self.shared
                .disconnected
                .lock()
                .insert(player, Instant::now());
            tracing::info!(room_code = %room, %player, "player disconnected");

            let event = ServerEvent::PlayerDisconnected { player_id: player };
            if let Some(frame) = self.shared.encode(&event) {
                pending.extend(self.shared.deliver(&room, &frame, |_| true));
            }
        }
    }

    /// Removes a connection. Returns its room and, if this was the
    /// player's last connection there, the player id.
    fn remove(
        &mut self,
        id: ConnectionId,
    ) -> Option<(RoomCode, Option<PlayerId>)> {
        let mut members = self.shared.members.write();
        let room = members.index.remove(&id)?;
        let clients = members.rooms.get_mut(&room)?;
        let member = clients.remove(&id)?;

        let gone = member
            .player
            .filter(|p| !clients.values().any(|m| m.player == Some(*p)));
        if clients.is_empty() {
            members.rooms.remove(&room);
        }
        tracing::debug!(room_code = %room, conn_id = %id, "client unregistered");
        Some((room, gone))
    }

    fn sweep(&self) {
        let grace = self.shared.config.disconnect_grace;
        let mut disconnected = self.shared.disconnected.lock();
        let before = disconnected.len();
        disconnected.retain(|_, since| since.elapsed() < grace);
        let pruned = before - disconnected.len();
        if pruned > 0 {
            tracing::debug!(pruned, "disconnect marks expired");
        }
    }
}
