use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use protocol::codec::read_u32_element;
use protocol::{event_id, ClientId, EventRegistry, MessageEncoding, MessageId, OriginType};

use crate::transport::Transport;
use crate::util::ms_since_epoch;

/// State the client reports about itself. Generally untrustworthy, and read
/// concurrently by the lobby-state endpoint, so everything in here is a
/// lock-free atomic: observers may see stale values, never torn ones.
#[derive(Debug)]
pub struct DisclosedClientState {
    last_known_position: AtomicU32,
    ms_of_last_message: AtomicU64,
}

impl DisclosedClientState {
    pub fn new() -> Self {
        DisclosedClientState {
            last_known_position: AtomicU32::new(0),
            ms_of_last_message: AtomicU64::new(0),
        }
    }

    /// Folds an accepted inbound message into the tracked state. Assumes the
    /// payload already passed structural validation. Any additional state to
    /// track gets a new arm here.
    pub fn update_any(&self, message_id: MessageId, payload: &[u8]) {
        if message_id == event_id::PLAYER_MOVE {
            let spec = EventRegistry::global().expect(event_id::PLAYER_MOVE);
            let location_element = &spec.structure[2];
            if let Some(location) = read_u32_element(payload, location_element) {
                self.last_known_position.store(location, Ordering::Relaxed);
            }
        }

        self.ms_of_last_message
            .store(ms_since_epoch(), Ordering::Relaxed);
    }

    pub fn last_known_position(&self) -> u32 {
        self.last_known_position.load(Ordering::Relaxed)
    }

    pub fn ms_of_last_message(&self) -> u64 {
        self.ms_of_last_message.load(Ordering::Relaxed)
    }
}

impl Default for DisclosedClientState {
    fn default() -> Self {
        DisclosedClientState::new()
    }
}

/// A user connected to a lobby.
pub struct Client {
    pub id: ClientId,
    /// Big-endian id, cached so broadcasts don't re-encode it per message.
    pub id_bytes: [u8; 4],
    pub ign: String,
    pub origin: OriginType,
    pub encoding: MessageEncoding,
    pub state: DisclosedClientState,
    pub transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("id_bytes", &self.id_bytes)
            .field("ign", &self.ign)
            .field("origin", &self.origin)
            .field("encoding", &self.encoding)
            .field("state", &self.state)
            .field("transport", &"<dyn Transport>")
            .finish()
    }
}

impl Client {
    pub fn new(
        id: ClientId,
        ign: String,
        origin: OriginType,
        encoding: MessageEncoding,
        transport: Arc<dyn Transport>,
    ) -> Arc<Client> {
        Arc::new(Client {
            id,
            id_bytes: id.to_be_bytes(),
            ign,
            origin,
            encoding,
            state: DisclosedClientState::new(),
            transport,
        })
    }
}
