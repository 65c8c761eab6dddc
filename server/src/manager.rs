use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use protocol::{
    event_id, prepare_server_message, serialize, ClientId, ColonyId, EventRegistry, FieldValue,
    LobbyId, MessageEncoding, OriginType, SERVER_ID,
};

use crate::client::Client;
use crate::integrations;
use crate::lobby::{JoinErrorKind, Lobby, LobbyJoinError};
use crate::transport::Transport;
use crate::util::SharedMap;

// far more than the number of lobbies that plausibly close at once outside
// of full shutdown, where the drainer is still running anyway
const CLOSE_QUEUE_CAPACITY: usize = 10;

#[derive(Debug, Error)]
pub enum CreateLobbyError {
    #[error("lobby manager is not accepting new lobbies at this point")]
    NotAccepting,
}

/// Process-global directory of lobbies. Creates them, gates joins, and
/// tears them down through a single close-queue drainer task.
pub struct LobbyManager {
    lobbies: SharedMap<LobbyId, Lobby>,
    next_lobby_id: AtomicU32,
    accepts_new_lobbies: AtomicBool,
    /// Taken on shutdown so the drainer sees the queue end.
    close_tx: std::sync::Mutex<Option<mpsc::Sender<Arc<Lobby>>>>,
    /// Serializes the colony-uniqueness scan against lobby insertion.
    create_window: std::sync::Mutex<()>,
    default_encoding: MessageEncoding,
}

impl LobbyManager {
    pub fn new(default_encoding: MessageEncoding) -> Arc<LobbyManager> {
        let (close_tx, close_rx) = mpsc::channel(CLOSE_QUEUE_CAPACITY);

        let manager = Arc::new(LobbyManager {
            lobbies: SharedMap::new(),
            next_lobby_id: AtomicU32::new(1),
            accepts_new_lobbies: AtomicBool::new(true),
            close_tx: std::sync::Mutex::new(Some(close_tx)),
            create_window: std::sync::Mutex::new(()),
            default_encoding,
        });

        tokio::spawn(Arc::clone(&manager).process_closures(close_rx));
        manager
    }

    pub fn lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    pub fn get_lobby(&self, id: LobbyId) -> Option<Arc<Lobby>> {
        self.lobbies.load(&id)
    }

    /// Creates a lobby for the colony. Idempotent per colony: an existing
    /// lobby for the same colony is returned instead.
    pub fn create_lobby(
        &self,
        owner_id: ClientId,
        colony_id: ColonyId,
        requested_encoding: MessageEncoding,
    ) -> Result<Arc<Lobby>, CreateLobbyError> {
        if !self.accepts_new_lobbies.load(Ordering::SeqCst) {
            return Err(CreateLobbyError::NotAccepting);
        }

        let _window = self.create_window.lock().expect("create lock poisoned");

        if let Some(existing) = self
            .lobbies
            .snapshot()
            .into_iter()
            .find(|lobby| lobby.colony_id == colony_id)
        {
            debug!(lobby = existing.id, colony = colony_id, "reusing existing lobby");
            return Ok(existing);
        }

        let close_tx = self
            .close_tx
            .lock()
            .expect("close queue lock poisoned")
            .clone()
            .ok_or(CreateLobbyError::NotAccepting)?;

        let lobby_id = self.next_lobby_id.fetch_add(1, Ordering::SeqCst);

        // a lobby that does not ask for a textual encoding gets whatever the
        // runtime was configured with
        let encoding = match requested_encoding {
            MessageEncoding::Binary => self.default_encoding,
            requested => requested,
        };

        let lobby = Lobby::new(lobby_id, owner_id, colony_id, encoding, close_tx);
        self.lobbies.insert(lobby_id, Arc::clone(&lobby));

        info!(
            lobby = lobby_id,
            colony = colony_id,
            encoding = encoding.as_str(),
            "lobby created"
        );
        Ok(lobby)
    }

    /// Pre-upgrade join check. Reserves nothing; the actual join re-checks.
    ///
    /// A join aimed at a lobby this process has never heard of means the
    /// main backend believes the colony is open when it is not. Asking it to
    /// close the colony reconverges the two views.
    pub fn is_join_possible(
        &self,
        lobby_id: LobbyId,
        client_id: ClientId,
        colony_id: ColonyId,
        colony_owner_id: ClientId,
    ) -> Result<(), LobbyJoinError> {
        let Some(lobby) = self.lobbies.load(&lobby_id) else {
            integrations::close_colony_fire_and_forget(colony_id, colony_owner_id);
            return Err(LobbyJoinError::new(
                lobby_id,
                JoinErrorKind::NotFound,
                "Lobby does not exist",
            ));
        };

        lobby.check_joinable(client_id)
    }

    /// Adds a session to a lobby and spawns its read loop. The join notice
    /// goes out before the client is inserted, so incumbents observe the
    /// join before anything the joiner might send.
    pub async fn join_lobby(
        &self,
        lobby_id: LobbyId,
        client_id: ClientId,
        client_ign: String,
        transport: Arc<dyn Transport>,
    ) -> Result<(), LobbyJoinError> {
        let Some(lobby) = self.lobbies.load(&lobby_id) else {
            return Err(LobbyJoinError::new(
                lobby_id,
                JoinErrorKind::NotFound,
                "Lobby does not exist",
            ));
        };

        lobby.check_joinable(client_id)?;

        let origin = if lobby.owner_id == client_id {
            OriginType::Owner
        } else {
            OriginType::Guest
        };
        let client = Client::new(client_id, client_ign, origin, lobby.encoding, transport);

        let spec = EventRegistry::global().expect(event_id::PLAYER_JOINED);
        let notice = serialize(
            spec,
            &[
                FieldValue::U32(client.id),
                FieldValue::Str(client.ign.clone()),
            ],
        )
        .map_err(|e| {
            LobbyJoinError::new(
                lobby_id,
                JoinErrorKind::SerializationFailure,
                format!("Failed to serialize player joined message: {e}"),
            )
        })?;

        let _ = lobby.broadcast_message(SERVER_ID, &notice).await;

        // the window lock is not held across the broadcast above, so a
        // concurrent duplicate may have slipped in; insertion settles it
        if !lobby.clients.insert_if_absent(client_id, Arc::clone(&client)) {
            return Err(LobbyJoinError::new(
                lobby_id,
                JoinErrorKind::AlreadyInLobby,
                "User is already in lobby",
            ));
        }

        info!(client = client_id, lobby = lobby_id, "client joined");
        tokio::spawn(Arc::clone(&lobby).run_session(client));
        Ok(())
    }

    /// Stops accepting lobbies, notifies every session of the shutdown and
    /// queues every lobby for teardown. The drainer task finishes once the
    /// queue is exhausted and every queue handle is gone.
    pub async fn shutdown(&self) {
        self.accepts_new_lobbies.store(false, Ordering::SeqCst);
        info!(count = self.lobby_count(), "shutting down lobbies");

        let notice = prepare_server_message(EventRegistry::global().expect(event_id::SERVER_CLOSING));
        for lobby in self.lobbies.snapshot() {
            let _ = lobby.broadcast_message(SERVER_ID, &notice).await;
            lobby.close().await;
        }

        // drop our handle so the drainer can run dry
        self.close_tx.lock().expect("close queue lock poisoned").take();
    }

    /// Drains the close queue. A lobby may be queued twice in degenerate
    /// interleavings; removal is load-and-delete, so teardown runs once.
    async fn process_closures(self: Arc<Self>, mut close_rx: mpsc::Receiver<Arc<Lobby>>) {
        while let Some(lobby) = close_rx.recv().await {
            info!(lobby = lobby.id, "processing closure");
            self.unregister_lobby(&lobby).await;
        }
        info!("close queue drained");
    }

    async fn unregister_lobby(&self, lobby: &Arc<Lobby>) {
        if let Some(lobby) = self.lobbies.load_and_delete(&lobby.id) {
            lobby.shutdown_sessions().await;
            info!(lobby = lobby.id, "lobby removed");
        }
    }
}
