//! Connection Pumps
//!
//! One live socket for one authenticated user. The inbound pump runs on the
//! task that called [`Connection::serve`] and interprets frames; the outbound
//! pump runs on its own task and is the only writer to the socket.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};

use super::hub::{ConnectionHandle, ConnectionId, Hub};
use super::rooms::RoomMembership;
use crate::config::WebSocketSettings;
use crate::domain::{ChatService, Envelope, MessageKind};
use crate::infrastructure::metrics;

/// Per-connection tuning
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Outbound frames buffered before the hub evicts the connection
    pub outbound_queue_capacity: usize,
    /// Interval between keepalive pings
    pub heartbeat_interval: Duration,
    /// Close when nothing at all is read for this long
    pub idle_timeout: Option<Duration>,
    /// Check the chat service's member list before honouring `join_room`
    pub verify_room_membership: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            heartbeat_interval: Duration::from_secs(60),
            idle_timeout: Some(Duration::from_secs(150)),
            verify_room_membership: false,
        }
    }
}

impl From<&WebSocketSettings> for ConnectionSettings {
    fn from(settings: &WebSocketSettings) -> Self {
        Self {
            outbound_queue_capacity: settings.outbound_queue_capacity,
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs.max(1)),
            idle_timeout: (settings.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(settings.idle_timeout_secs)),
            verify_room_membership: settings.verify_room_membership,
        }
    }
}

/// Lifecycle of the inbound side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Closing,
    Closed,
}

/// A socket that has passed authentication but is not yet being served.
pub struct Connection {
    handle: ConnectionHandle,
    outbound: mpsc::Receiver<Utf8Bytes>,
    settings: ConnectionSettings,
}

impl Connection {
    pub fn open(user_id: impl Into<String>, settings: ConnectionSettings) -> Self {
        let (handle, outbound) = ConnectionHandle::new(user_id, settings.outbound_queue_capacity);
        Self {
            handle,
            outbound,
            settings,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id
    }

    pub fn user_id(&self) -> &str {
        &self.handle.user_id
    }

    /// Register with the hub and pump the socket until it closes.
    ///
    /// Returns once both pumps have stopped. The connection is unregistered
    /// exactly once on the way out, even if frame handling panics. Eviction
    /// by the hub or a failed socket write ends the connection at once.
    pub async fn serve<S, R, E>(self, hub: Hub, chat: Arc<dyn ChatService>, sink: S, stream: R)
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let Connection {
            mut handle,
            outbound,
            settings,
        } = self;
        let id = handle.id;
        let user_id = handle.user_id.clone();
        let evicted = handle.shutdown_signal();

        hub.register(handle);
        let guard = UnregisterOnDrop {
            hub: hub.clone(),
            id,
        };

        let mut writer = tokio::spawn(write_pump(id, outbound, sink, settings.heartbeat_interval));

        let mut inbound = InboundPump {
            id,
            user_id,
            rooms: RoomMembership::new(),
            state: ConnectionState::Connected,
            hub,
            chat,
            settings,
        };

        let finish = tokio::select! {
            _ = inbound.run(stream) => Finish::PeerClosed,
            _ = evicted => Finish::Evicted,
            result = &mut writer => Finish::WriterStopped(result),
        };

        // Unregistering closes the queue, which is what stops the writer.
        drop(guard);
        inbound.state = ConnectionState::Closed;

        match finish {
            Finish::PeerClosed => match timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(connection_id = %id, error = %e, "Outbound pump ended abnormally");
                }
                Err(_) => {
                    tracing::debug!(connection_id = %id, "Outbound pump stalled, aborting");
                    writer.abort();
                }
            },
            Finish::Evicted => {
                tracing::info!(connection_id = %id, "Connection dropped by hub, closing socket");
                // The writer may be stuck on a socket that stopped reading.
                writer.abort();
            }
            Finish::WriterStopped(Err(e)) => {
                tracing::warn!(connection_id = %id, error = %e, "Outbound pump ended abnormally");
            }
            Finish::WriterStopped(Ok(())) => {
                tracing::debug!(connection_id = %id, "Socket no longer writable");
            }
        }
        tracing::debug!(connection_id = %id, state = ?inbound.state, "Connection finished");
    }
}

/// Longest a closing connection waits for queued frames to be written.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Why the pumps stopped
enum Finish {
    PeerClosed,
    Evicted,
    WriterStopped(Result<(), tokio::task::JoinError>),
}

struct UnregisterOnDrop {
    hub: Hub,
    id: ConnectionId,
}

impl Drop for UnregisterOnDrop {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

struct InboundPump {
    id: ConnectionId,
    user_id: String,
    rooms: RoomMembership,
    state: ConnectionState,
    hub: Hub,
    chat: Arc<dyn ChatService>,
    settings: ConnectionSettings,
}

impl InboundPump {
    async fn run<R, E>(&mut self, mut stream: R)
    where
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        while self.state == ConnectionState::Connected {
            let next = match self.settings.idle_timeout {
                Some(limit) => match timeout(limit, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::info!(connection_id = %self.id, "Idle timeout, closing connection");
                        self.state = ConnectionState::Closing;
                        continue;
                    }
                },
                None => stream.next().await,
            };

            match next {
                Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()).await,
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => self.handle_frame(text).await,
                    Err(_) => {
                        tracing::warn!(connection_id = %self.id, "Binary frame is not UTF-8, skipped");
                        metrics::record_inbound_dropped("decode");
                    }
                },
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(connection_id = %self.id, frame = ?frame, "Client closed connection");
                    self.state = ConnectionState::Closing;
                }
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %self.id, error = %e, "Read error");
                    self.state = ConnectionState::Closing;
                }
                None => {
                    tracing::debug!(connection_id = %self.id, "Stream ended");
                    self.state = ConnectionState::Closing;
                }
            }
        }
    }

    async fn handle_frame(&mut self, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(connection_id = %self.id, error = %e, "Undecodable frame skipped");
                metrics::record_inbound_dropped("decode");
                return;
            }
        };

        match envelope.kind {
            MessageKind::JoinRoom => self.join(envelope).await,
            MessageKind::LeaveRoom => self.leave(envelope),
            MessageKind::Chat => self.chat(envelope).await,
            MessageKind::Typing => self.typing(envelope),
            MessageKind::UserStatus => self.status(envelope),
            kind if kind.is_server_only() => {
                tracing::debug!(connection_id = %self.id, kind = %kind, "Server-only kind from client ignored");
                metrics::record_inbound_dropped("server_only");
            }
            _ => {
                tracing::debug!(connection_id = %self.id, "Unknown message type ignored");
                metrics::record_inbound_dropped("unknown_type");
            }
        }
    }

    fn has_room(&self, envelope: &Envelope) -> bool {
        if envelope.room_id.is_empty() {
            tracing::warn!(connection_id = %self.id, kind = %envelope.kind, "Frame without roomId skipped");
            metrics::record_inbound_dropped("missing_room");
            return false;
        }
        true
    }

    async fn join(&mut self, envelope: Envelope) {
        if !self.has_room(&envelope) {
            return;
        }
        let room_id = envelope.room_id;

        if self.rooms.contains(&room_id) {
            tracing::debug!(connection_id = %self.id, room_id = %room_id, "Room already joined");
            return;
        }

        if self.settings.verify_room_membership {
            match self.chat.get_room(&room_id).await {
                Ok(room) if room.has_member(&self.user_id) => {}
                Ok(_) => {
                    tracing::warn!(user_id = %self.user_id, room_id = %room_id, "Join refused, not a member");
                    return;
                }
                Err(e) => {
                    tracing::warn!(room_id = %room_id, error = %e, "Join refused, room lookup failed");
                    return;
                }
            }
        }

        self.rooms.join(&room_id);
        self.hub.join_room(self.id, &room_id);
        self.hub
            .broadcast_to_room(&room_id, &Envelope::user_joined(&room_id, &self.user_id));

        tracing::debug!(connection_id = %self.id, room_id = %room_id, "Joined room");
    }

    fn leave(&mut self, envelope: Envelope) {
        if !self.has_room(&envelope) {
            return;
        }
        let room_id = envelope.room_id;

        if !self.rooms.leave(&room_id) {
            tracing::debug!(connection_id = %self.id, room_id = %room_id, "Leave for a room not joined");
            return;
        }

        self.hub.leave_room(self.id, &room_id);
        self.hub
            .broadcast_to_room(&room_id, &Envelope::user_left(&room_id, &self.user_id));

        tracing::debug!(connection_id = %self.id, room_id = %room_id, "Left room");
    }

    async fn chat(&mut self, envelope: Envelope) {
        if !self.has_room(&envelope) {
            return;
        }

        let persisted = match self
            .chat
            .send_message(
                &envelope.room_id,
                &self.user_id,
                MessageKind::Chat,
                &envelope.content,
            )
            .await
        {
            Ok(persisted) => persisted,
            Err(e) => {
                tracing::error!(
                    connection_id = %self.id,
                    room_id = %envelope.room_id,
                    error = %e,
                    "Failed to persist chat message, dropped"
                );
                metrics::record_persistence_failure();
                return;
            }
        };

        let outgoing = Envelope::from(persisted).with_data(envelope.data);
        self.hub.broadcast_to_room(&envelope.room_id, &outgoing);
    }

    fn typing(&mut self, envelope: Envelope) {
        if !self.has_room(&envelope) {
            return;
        }
        let outgoing = Envelope::typing(&envelope.room_id, &self.user_id, &envelope.content);
        self.hub.broadcast_to_room(&envelope.room_id, &outgoing);
    }

    fn status(&mut self, envelope: Envelope) {
        let status = envelope.content.trim();
        if status.is_empty() {
            tracing::warn!(connection_id = %self.id, "Status update without content skipped");
            metrics::record_inbound_dropped("empty_status");
            return;
        }
        self.hub.broadcast_user_status(&self.user_id, status);
    }
}

/// Sole writer to the socket. Stops when the queue closes or a write fails,
/// closing the socket either way.
async fn write_pump<S>(
    id: ConnectionId,
    mut outbound: mpsc::Receiver<Utf8Bytes>,
    mut sink: S,
    heartbeat: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        tracing::debug!(connection_id = %id, error = %e, "Write failed");
                        break;
                    }
                }
                None => {
                    tracing::debug!(connection_id = %id, "Outbound queue closed");
                    break;
                }
            },
            _ = ticker.tick() => {
                if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                    tracing::debug!(connection_id = %id, error = %e, "Heartbeat write failed");
                    break;
                }
            }
        }
    }

    if let Err(e) = sink.close().await {
        tracing::trace!(connection_id = %id, error = %e, "Socket close failed");
    }
}
