use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use protocol::{
    event_id, extract_client_and_message_id, prepare_server_message, serialize, ClientId,
    ColonyId, EventRegistry, EventSpec, FieldValue, Handler, LobbyId, MessageEncoding, OriginType,
    SERVER_ID,
};

use crate::activity::ActivityTracker;
use crate::client::Client;
use crate::transport::{TransportError, WireFrame};
use crate::util::SharedMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinErrorKind {
    NotFound,
    Closing,
    AlreadyInLobby,
    SerializationFailure,
}

#[derive(Debug, Error)]
#[error("failed to join lobby {lobby_id}: {reason}")]
pub struct LobbyJoinError {
    pub lobby_id: LobbyId,
    pub kind: JoinErrorKind,
    pub reason: String,
}

impl LobbyJoinError {
    pub fn new(lobby_id: LobbyId, kind: JoinErrorKind, reason: impl Into<String>) -> Self {
        LobbyJoinError {
            lobby_id,
            kind,
            reason: reason.into(),
        }
    }
}

/// Receivers whose write failed during a broadcast. Swallowed at dispatch
/// sites: the lobby counts it, the originating sender never hears of it.
#[derive(Debug, Error)]
#[error("{} clients were unreachable during broadcast", .clients.len())]
pub struct UnresponsiveClientsError {
    pub clients: Vec<Arc<Client>>,
}

/// Failure of dispatching an otherwise valid inbound message.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0} clients were unreachable during rebroadcast")]
    Unresponsive(usize),
    /// A handler could not process the message; surfaced to the sender as a
    /// Debug 500.
    #[error("{0}")]
    Handler(String),
}

/// A set of sessions sharing one colony. The owner created it; everyone
/// else is a guest. Lives in the manager's directory until its owner leaves
/// or the process shuts down.
pub struct Lobby {
    pub id: LobbyId,
    pub owner_id: ClientId,
    pub colony_id: ColonyId,
    pub encoding: MessageEncoding,
    pub clients: SharedMap<ClientId, Client>,
    pub activity: ActivityTracker,
    /// Serializes the join precondition checks. Never held across I/O.
    join_window: std::sync::Mutex<()>,
    closing: AtomicBool,
    unresponsive_events: AtomicU64,
    close_queue: mpsc::Sender<Arc<Lobby>>,
    /// Handle to the owning Arc, for enqueueing self on the close queue.
    me: Weak<Lobby>,
}

impl std::fmt::Debug for Lobby {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lobby")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("colony_id", &self.colony_id)
            .field("encoding", &self.encoding)
            .field("closing", &self.closing.load(Ordering::Relaxed))
            .field(
                "unresponsive_events",
                &self.unresponsive_events.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

impl Lobby {
    pub fn new(
        id: LobbyId,
        owner_id: ClientId,
        colony_id: ColonyId,
        encoding: MessageEncoding,
        close_queue: mpsc::Sender<Arc<Lobby>>,
    ) -> Arc<Lobby> {
        Arc::new_cyclic(|me| Lobby {
            id,
            owner_id,
            colony_id,
            encoding,
            clients: SharedMap::new(),
            activity: ActivityTracker::new(),
            join_window: std::sync::Mutex::new(()),
            closing: AtomicBool::new(false),
            unresponsive_events: AtomicU64::new(0),
            close_queue,
            me: me.clone(),
        })
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn unresponsive_events(&self) -> u64 {
        self.unresponsive_events.load(Ordering::Relaxed)
    }

    /// Join preconditions, checked under the join window lock.
    pub(crate) fn check_joinable(&self, client_id: ClientId) -> Result<(), LobbyJoinError> {
        let _window = self.join_window.lock().expect("join lock poisoned");

        if self.is_closing() {
            return Err(LobbyJoinError::new(
                self.id,
                JoinErrorKind::Closing,
                "Lobby is closing",
            ));
        }
        if self.clients.contains(&client_id) {
            return Err(LobbyJoinError::new(
                self.id,
                JoinErrorKind::AlreadyInLobby,
                "User is already in lobby",
            ));
        }
        Ok(())
    }

    /// Sends a message to every client in the lobby, framed per that
    /// client's encoding. The sender id is prepended unless the buffer
    /// already leads with it (server-prepared buffers do).
    pub async fn broadcast_message(
        &self,
        sender_id: ClientId,
        message: &[u8],
    ) -> Result<(), UnresponsiveClientsError> {
        let sender_bytes = sender_id.to_be_bytes();
        let frame: Vec<u8> = if message.len() >= 4 && message[0..4] == sender_bytes[..] {
            message.to_vec()
        } else {
            let mut framed = Vec::with_capacity(4 + message.len());
            framed.extend_from_slice(&sender_bytes);
            framed.extend_from_slice(message);
            framed
        };

        let mut unreachable = Vec::new();
        for client in self.clients.snapshot() {
            let encoded = client.encoding.encode(&frame);
            if client.transport.send(encoded).await.is_err() {
                unreachable.push(client);
            }
        }

        if unreachable.is_empty() {
            Ok(())
        } else {
            Err(UnresponsiveClientsError {
                clients: unreachable,
            })
        }
    }

    /// One long-running task per session: decodes, validates, authorizes and
    /// dispatches every inbound frame until the transport ends.
    pub(crate) async fn run_session(self: Arc<Self>, client: Arc<Client>) {
        loop {
            let Some(incoming) = client.transport.recv().await else {
                info!(client = client.id, lobby = self.id, "client connection closed");
                break;
            };

            let raw = match incoming {
                Ok(frame) => frame,
                Err(e) => {
                    info!(client = client.id, lobby = self.id, error = %e, "client disconnected");
                    break;
                }
            };

            let bytes = match raw {
                WireFrame::Binary(bytes) => bytes,
                WireFrame::Text(text) => {
                    match MessageEncoding::Base16.decode_text(&text) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            if self.reject(&client, 400, &format!("Error decoding message: {e}")).await {
                                continue;
                            }
                            break;
                        }
                    }
                }
                WireFrame::Other => {
                    if self.reject(&client, 404, "Invalid message type").await {
                        continue;
                    }
                    break;
                }
            };

            let (sender_id, spec, payload) = match extract_client_and_message_id(&bytes) {
                Ok(parts) => parts,
                Err(e) => {
                    if self.reject(&client, 400, &e.to_string()).await {
                        continue;
                    }
                    break;
                }
            };

            // the header must name this very session, still present here
            if bytes[0..4] != client.id_bytes[..] || !self.clients.contains(&sender_id) {
                let reason = format!(
                    "Unauthorized: sender {sender_id} is not client {} of lobby {}",
                    client.id, self.id
                );
                if self.reject(&client, 401, &reason).await {
                    continue;
                }
                break;
            }

            if !spec.permissions.allows(client.origin) {
                let reason = format!(
                    "Unauthorized: client {} is not allowed to send messages of id {}",
                    client.id, spec.id
                );
                if self.reject(&client, 401, &reason).await {
                    continue;
                }
                break;
            }

            debug!(client = client.id, message = spec.id, lobby = self.id, "dispatching");

            match self.process_client_message(&client, spec, &bytes, payload).await {
                Ok(()) => {}
                Err(DispatchError::Unresponsive(count)) => self.note_unresponsive(count),
                Err(DispatchError::Handler(reason)) => {
                    let text = format!("Error processing message: {reason}");
                    if !self.reject(&client, 500, &text).await {
                        break;
                    }
                }
            }
        }

        self.handle_disconnect(&client).await;
    }

    /// Dispatch past all pre-flight checks: run the spec's handler, fold the
    /// message into the disclosed state, let owner traffic drive the
    /// activity tracker.
    async fn process_client_message(
        &self,
        client: &Client,
        spec: &EventSpec,
        frame: &[u8],
        payload: &[u8],
    ) -> Result<(), DispatchError> {
        let mut unreachable = 0;
        match spec.handler {
            Handler::Rebroadcast => {
                if let Err(failed) = self.broadcast_message(client.id, frame).await {
                    unreachable = failed.clients.len();
                }
            }
            Handler::None => {}
        }

        client.state.update_any(spec.id, payload);
        if client.origin == OriginType::Owner {
            self.activity.observe_owner_event(spec.id, payload);
        }

        if unreachable > 0 {
            return Err(DispatchError::Unresponsive(unreachable));
        }
        Ok(())
    }

    /// Removes a client, closes its transport and tells everyone else.
    pub async fn remove_client(&self, client_id: ClientId) {
        let Some(client) = self.clients.load_and_delete(&client_id) else {
            debug!(client = client_id, lobby = self.id, "client not present, nothing to remove");
            return;
        };

        client.transport.close().await;
        self.activity.participant_left(client_id);

        let spec = EventRegistry::global().expect(event_id::PLAYER_LEFT);
        match serialize(
            spec,
            &[
                FieldValue::U32(client.id),
                FieldValue::Str(client.ign.clone()),
            ],
        ) {
            Ok(msg) => {
                if let Err(failed) = self.broadcast_message(SERVER_ID, &msg).await {
                    self.note_unresponsive(failed.clients.len());
                }
            }
            Err(e) => {
                error!(client = client_id, error = %e, "failed to serialize departure notice")
            }
        }

        info!(client = client_id, lobby = self.id, "client removed");
    }

    /// Notifies everyone the lobby is going away and queues it for teardown
    /// by the manager. Only the first call has any effect.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        let spec = EventRegistry::global().expect(event_id::LOBBY_CLOSING);
        let notice = prepare_server_message(spec);
        if let Err(failed) = self.broadcast_message(SERVER_ID, &notice).await {
            self.note_unresponsive(failed.clients.len());
        }

        let Some(me) = self.me.upgrade() else {
            return;
        };
        // capacity is far above any realistic number of concurrent closures,
        // so failing to enqueue points at a stuck drainer
        if let Err(e) = self.close_queue.try_send(me) {
            error!(lobby = self.id, error = %e, "could not enqueue lobby for teardown");
        }
    }

    /// Final teardown, called only by the manager once the lobby is off the
    /// directory: closes every remaining session transport.
    pub(crate) async fn shutdown_sessions(&self) {
        for client in self.clients.snapshot() {
            client.transport.close().await;
        }
    }

    async fn handle_disconnect(&self, client: &Client) {
        self.remove_client(client.id).await;

        if client.origin == OriginType::Owner {
            info!(lobby = self.id, "lobby owner disconnected, closing lobby");
            self.close().await;
        }
    }

    // false means the Debug event could not be delivered and the session is
    // over
    async fn reject(&self, client: &Client, code: u32, reason: &str) -> bool {
        debug!(client = client.id, lobby = self.id, code, reason, "rejecting message");
        match send_debug_to_client(client, code, reason).await {
            Ok(()) => true,
            Err(e) => {
                warn!(client = client.id, error = %e, "failed to deliver debug event");
                false
            }
        }
    }

    fn note_unresponsive(&self, count: usize) {
        self.unresponsive_events.fetch_add(1, Ordering::Relaxed);
        debug!(lobby = self.id, count, "unresponsive clients recorded");
    }
}

/// Pushes a Debug event to a single client. Codes mirror HTTP status
/// semantics so browser clients can reuse their error handling.
pub async fn send_debug_to_client(
    client: &Client,
    code: u32,
    description: &str,
) -> Result<(), TransportError> {
    let spec = EventRegistry::global().expect(event_id::DEBUG);
    let mut msg = prepare_server_message(spec);
    msg.extend_from_slice(&code.to_be_bytes());
    msg.extend_from_slice(description.as_bytes());
    client.transport.send(client.encoding.encode(&msg)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{pair, RemoteEnd};
    use protocol::EncodedFrame;

    fn test_lobby(encoding: MessageEncoding) -> Arc<Lobby> {
        let (close_tx, _close_rx) = mpsc::channel(10);
        Lobby::new(1, 7, 42, encoding, close_tx)
    }

    fn add_client(lobby: &Lobby, id: ClientId, origin: OriginType) -> RemoteEnd {
        let (transport, remote) = pair();
        let client = Client::new(id, format!("player-{id}"), origin, lobby.encoding, transport);
        lobby.clients.insert(id, client);
        remote
    }

    fn binary_frame(frame: EncodedFrame) -> Vec<u8> {
        match frame {
            EncodedFrame::Binary(bytes) => bytes,
            EncodedFrame::Text(_) => panic!("expected a binary frame"),
        }
    }

    #[tokio::test]
    async fn broadcast_prepends_sender_only_when_absent() {
        let lobby = test_lobby(MessageEncoding::Binary);
        let mut guest = add_client(&lobby, 8, OriginType::Guest);

        // server-prepared buffer already leads with SERVER_ID
        let spec = EventRegistry::global().expect(event_id::LOBBY_CLOSING);
        let prepared = prepare_server_message(spec);
        lobby.broadcast_message(SERVER_ID, &prepared).await.unwrap();

        let frame = binary_frame(guest.from_server.recv().await.unwrap());
        assert_eq!(&frame[0..4], &SERVER_ID.to_be_bytes());
        assert_eq!(frame.len(), 8);

        // client-style buffer starts at the message id, so the sender id
        // gets prepended
        let spec = EventRegistry::global().expect(event_id::PLAYER_MOVE);
        let body = serialize(
            spec,
            &[
                FieldValue::F32(1.0),
                FieldValue::F32(2.0),
                FieldValue::U32(5),
            ],
        )
        .unwrap();
        lobby.broadcast_message(7, &body).await.unwrap();

        let frame = binary_frame(guest.from_server.recv().await.unwrap());
        assert_eq!(&frame[0..4], &7u32.to_be_bytes());
        assert_eq!(&frame[4..8], &spec.id.to_be_bytes());
    }

    #[tokio::test]
    async fn broadcast_respects_the_client_encoding() {
        let lobby = test_lobby(MessageEncoding::Base16);
        let mut guest = add_client(&lobby, 8, OriginType::Guest);

        let spec = EventRegistry::global().expect(event_id::SERVER_CLOSING);
        let prepared = prepare_server_message(spec);
        lobby.broadcast_message(SERVER_ID, &prepared).await.unwrap();

        match guest.from_server.recv().await.unwrap() {
            EncodedFrame::Text(text) => {
                let decoded = MessageEncoding::Base16.decode_text(&text).unwrap();
                assert_eq!(decoded, prepared);
            }
            EncodedFrame::Binary(_) => panic!("base16 lobby sent a binary frame"),
        }
    }

    #[tokio::test]
    async fn broadcast_reports_unreachable_clients() {
        let lobby = test_lobby(MessageEncoding::Binary);
        let alive = add_client(&lobby, 8, OriginType::Guest);
        let gone = add_client(&lobby, 9, OriginType::Guest);
        drop(gone); // remote end dropped, writes to 9 now fail

        let spec = EventRegistry::global().expect(event_id::LOBBY_CLOSING);
        let err = lobby
            .broadcast_message(SERVER_ID, &prepare_server_message(spec))
            .await
            .unwrap_err();

        assert_eq!(err.clients.len(), 1);
        assert_eq!(err.clients[0].id, 9);
        drop(alive);
    }

    #[tokio::test]
    async fn removing_a_client_notifies_the_rest() {
        let lobby = test_lobby(MessageEncoding::Binary);
        let mut owner = add_client(&lobby, 7, OriginType::Owner);
        let _guest = add_client(&lobby, 8, OriginType::Guest);

        lobby.remove_client(8).await;
        assert_eq!(lobby.client_count(), 1);

        let frame = binary_frame(owner.from_server.recv().await.unwrap());
        let (sender, spec, payload) = extract_client_and_message_id(&frame).unwrap();
        assert_eq!(sender, SERVER_ID);
        assert_eq!(spec.id, event_id::PLAYER_LEFT);

        let fields = protocol::parse_payload(spec, payload).unwrap();
        assert_eq!(fields[0], FieldValue::U32(8));
        assert_eq!(fields[1], FieldValue::Str("player-8".to_owned()));
    }

    #[tokio::test]
    async fn debug_events_carry_code_and_description() {
        let lobby = test_lobby(MessageEncoding::Binary);
        let mut guest = add_client(&lobby, 8, OriginType::Guest);
        let client = lobby.clients.load(&8).unwrap();

        send_debug_to_client(&client, 401, "nope").await.unwrap();

        let frame = binary_frame(guest.from_server.recv().await.unwrap());
        let (sender, spec, payload) = extract_client_and_message_id(&frame).unwrap();
        assert_eq!(sender, SERVER_ID);
        assert_eq!(spec.id, event_id::DEBUG);

        let fields = protocol::parse_payload(spec, payload).unwrap();
        assert_eq!(fields[0], FieldValue::U32(401));
        assert_eq!(fields[1], FieldValue::Str("nope".to_owned()));
    }
}
