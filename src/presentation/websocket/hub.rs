//! Connection Hub
//!
//! Single authority over the set of live connections. One task owns the
//! registry and consumes a command channel, so every mutation of the
//! connection map and the user index happens on that task. Producers only
//! ever `try_send` onto a connection's bounded outbound queue; a queue that
//! cannot take a frame gets its connection evicted instead of stalling the
//! broadcaster.

use std::collections::{HashMap, HashSet};
use std::fmt;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::rooms::RoomMembership;
use crate::domain::{Envelope, UserStatus};
use crate::infrastructure::metrics;

/// Opaque identifier, unique per socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What the hub needs to reach a connection.
///
/// The hub holds the only sender of the outbound queue, so dropping the
/// handle closes the queue and stops the connection's outbound pump.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: String,
    sender: mpsc::Sender<Utf8Bytes>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end of its outbound queue.
    pub fn new(user_id: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Utf8Bytes>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::new(),
            user_id: user_id.into(),
            sender,
            shutdown: None,
        };
        (handle, receiver)
    }

    /// Resolves once the hub has dropped this connection, whether it was
    /// unregistered or evicted.
    pub fn shutdown_signal(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.shutdown = Some(tx);
        rx
    }
}

/// Hub behaviour switches
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Broadcast `online` / `offline` when a user's first connection arrives
    /// or last connection goes away
    pub announce_presence: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            announce_presence: true,
        }
    }
}

enum HubCommand {
    Register(ConnectionHandle),
    Unregister(ConnectionId),
    JoinRoom {
        connection_id: ConnectionId,
        room_id: String,
    },
    LeaveRoom {
        connection_id: ConnectionId,
        room_id: String,
    },
    BroadcastAll(Utf8Bytes),
    BroadcastToRoom {
        room_id: String,
        frame: Utf8Bytes,
    },
    ConnectionCount(oneshot::Sender<usize>),
    UserConnectionCount {
        user_id: String,
        reply: oneshot::Sender<usize>,
    },
    RoomConnectionCount {
        room_id: String,
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable handle to the hub task
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl Hub {
    /// Start the hub task on the current runtime.
    pub fn spawn(config: HubConfig) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(Registry::new(config).run(receiver));
        Self { commands }
    }

    fn send(&self, command: HubCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Hub task has stopped, command dropped");
        }
    }

    /// Add a connection to the live set. Repeated registration of the same
    /// connection id is ignored.
    pub fn register(&self, handle: ConnectionHandle) {
        self.send(HubCommand::Register(handle));
    }

    /// Remove a connection and close its outbound queue. Safe to repeat.
    pub fn unregister(&self, connection_id: ConnectionId) {
        self.send(HubCommand::Unregister(connection_id));
    }

    pub fn join_room(&self, connection_id: ConnectionId, room_id: &str) {
        self.send(HubCommand::JoinRoom {
            connection_id,
            room_id: room_id.to_string(),
        });
    }

    pub fn leave_room(&self, connection_id: ConnectionId, room_id: &str) {
        self.send(HubCommand::LeaveRoom {
            connection_id,
            room_id: room_id.to_string(),
        });
    }

    /// Enqueue a pre-encoded frame on every live connection.
    pub fn broadcast_all(&self, frame: impl Into<Utf8Bytes>) {
        self.send(HubCommand::BroadcastAll(frame.into()));
    }

    /// Encode `envelope` once and enqueue it on every connection that has
    /// joined `room_id`.
    pub fn broadcast_to_room(&self, room_id: &str, envelope: &Envelope) {
        match envelope.encode() {
            Ok(text) => self.send(HubCommand::BroadcastToRoom {
                room_id: room_id.to_string(),
                frame: text.into(),
            }),
            Err(e) => {
                tracing::error!(room_id = %room_id, error = %e, "Failed to encode room broadcast");
            }
        }
    }

    /// Tell every live connection about a user's status. Presence is
    /// platform-wide, not room-scoped.
    pub fn broadcast_user_status(&self, user_id: &str, status: &str) {
        match Envelope::user_status(user_id, status).encode() {
            Ok(text) => self.broadcast_all(text),
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to encode status broadcast");
            }
        }
    }

    /// Number of live connections. Answered after every command sent before it.
    pub async fn connection_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::ConnectionCount(reply));
        rx.await.unwrap_or(0)
    }

    /// Number of live connections held by one user.
    pub async fn user_connection_count(&self, user_id: &str) -> usize {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::UserConnectionCount {
            user_id: user_id.to_string(),
            reply,
        });
        rx.await.unwrap_or(0)
    }

    /// Number of live connections that have joined a room.
    pub async fn room_connection_count(&self, room_id: &str) -> usize {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::RoomConnectionCount {
            room_id: room_id.to_string(),
            reply,
        });
        rx.await.unwrap_or(0)
    }
}

struct Entry {
    user_id: String,
    sender: mpsc::Sender<Utf8Bytes>,
    shutdown: Option<oneshot::Sender<()>>,
    rooms: RoomMembership,
}

/// State owned by the hub task
struct Registry {
    config: HubConfig,
    connections: HashMap<ConnectionId, Entry>,
    /// User id to all of that user's live connections
    users: HashMap<String, HashSet<ConnectionId>>,
}

impl Registry {
    fn new(config: HubConfig) -> Self {
        Self {
            config,
            connections: HashMap::new(),
            users: HashMap::new(),
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<HubCommand>) {
        tracing::debug!("Hub started");
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        tracing::debug!(remaining = self.connections.len(), "Hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(handle) => self.register(handle),
            HubCommand::Unregister(connection_id) => {
                self.unregister(connection_id);
            }
            HubCommand::JoinRoom {
                connection_id,
                room_id,
            } => {
                if let Some(entry) = self.connections.get_mut(&connection_id) {
                    entry.rooms.join(&room_id);
                }
            }
            HubCommand::LeaveRoom {
                connection_id,
                room_id,
            } => {
                if let Some(entry) = self.connections.get_mut(&connection_id) {
                    entry.rooms.leave(&room_id);
                }
            }
            HubCommand::BroadcastAll(frame) => self.broadcast_all(frame),
            HubCommand::BroadcastToRoom { room_id, frame } => {
                self.broadcast_to_room(&room_id, frame)
            }
            HubCommand::ConnectionCount(reply) => {
                let _ = reply.send(self.connections.len());
            }
            HubCommand::UserConnectionCount { user_id, reply } => {
                let count = self.users.get(&user_id).map_or(0, HashSet::len);
                let _ = reply.send(count);
            }
            HubCommand::RoomConnectionCount { room_id, reply } => {
                let count = self
                    .connections
                    .values()
                    .filter(|entry| entry.rooms.contains(&room_id))
                    .count();
                let _ = reply.send(count);
            }
        }
    }

    fn register(&mut self, handle: ConnectionHandle) {
        if self.connections.contains_key(&handle.id) {
            tracing::debug!(connection_id = %handle.id, "Connection already registered");
            return;
        }

        let ConnectionHandle {
            id,
            user_id,
            sender,
            shutdown,
        } = handle;

        let sessions = self.users.entry(user_id.clone()).or_default();
        let first_session = sessions.is_empty();
        sessions.insert(id);

        self.connections.insert(
            id,
            Entry {
                user_id: user_id.clone(),
                sender,
                shutdown,
                rooms: RoomMembership::new(),
            },
        );
        metrics::set_active_connections(self.connections.len());

        tracing::info!(
            connection_id = %id,
            user_id = %user_id,
            total = self.connections.len(),
            "Connection registered"
        );

        if first_session && self.config.announce_presence {
            self.announce(&user_id, UserStatus::Online);
        }
    }

    /// Returns `true` if the connection was live.
    fn unregister(&mut self, connection_id: ConnectionId) -> bool {
        let Some(entry) = self.connections.remove(&connection_id) else {
            return false;
        };

        let mut last_session = false;
        if let Some(sessions) = self.users.get_mut(&entry.user_id) {
            sessions.remove(&connection_id);
            if sessions.is_empty() {
                self.users.remove(&entry.user_id);
                last_session = true;
            }
        }
        metrics::set_active_connections(self.connections.len());

        tracing::info!(
            connection_id = %connection_id,
            user_id = %entry.user_id,
            rooms = entry.rooms.len(),
            total = self.connections.len(),
            "Connection unregistered"
        );

        let user_id = entry.user_id;
        // Dropping the sender closes the outbound queue.
        drop(entry.sender);
        if let Some(shutdown) = entry.shutdown {
            let _ = shutdown.send(());
        }

        if last_session && self.config.announce_presence {
            self.announce(&user_id, UserStatus::Offline);
        }
        true
    }

    fn announce(&mut self, user_id: &str, status: UserStatus) {
        match Envelope::user_status(user_id, status.as_str()).encode() {
            Ok(text) => self.broadcast_all(text.into()),
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to encode presence");
            }
        }
    }

    fn broadcast_all(&mut self, frame: Utf8Bytes) {
        let targets: Vec<ConnectionId> = self.connections.keys().copied().collect();
        self.deliver(&targets, frame, "all");
    }

    /// Targets are resolved from each connection's locally joined rooms.
    fn broadcast_to_room(&mut self, room_id: &str, frame: Utf8Bytes) {
        let targets: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, entry)| entry.rooms.contains(room_id))
            .map(|(id, _)| *id)
            .collect();

        tracing::trace!(room_id = %room_id, recipients = targets.len(), "Room broadcast");
        self.deliver(&targets, frame, "room");
    }

    fn deliver(&mut self, targets: &[ConnectionId], frame: Utf8Bytes, scope: &str) {
        let mut delivered = 0;
        let mut unresponsive = Vec::new();

        for id in targets {
            // Earlier evictions in this pass may already have removed it.
            let Some(entry) = self.connections.get(id) else {
                continue;
            };

            match entry.sender.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        connection_id = %id,
                        user_id = %entry.user_id,
                        "Outbound queue full, evicting connection"
                    );
                    unresponsive.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(connection_id = %id, "Outbound queue closed, evicting connection");
                    unresponsive.push(*id);
                }
            }
        }

        metrics::record_enqueued(scope, delivered);

        for id in unresponsive {
            if self.unregister(id) {
                metrics::record_eviction();
            }
        }
    }
}
