use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use protocol::codec::read_u32_element;
use protocol::{event_id, ClientId, EventRegistry, MessageId};

/// Where the lobby currently is in its mini-game flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LobbyPhase {
    Idle,
    Selecting,
    Confirmed,
    InGame,
}

impl LobbyPhase {
    fn as_u8(self) -> u8 {
        match self {
            LobbyPhase::Idle => 0,
            LobbyPhase::Selecting => 1,
            LobbyPhase::Confirmed => 2,
            LobbyPhase::InGame => 3,
        }
    }

    fn from_u8(raw: u8) -> LobbyPhase {
        match raw {
            1 => LobbyPhase::Selecting,
            2 => LobbyPhase::Confirmed,
            3 => LobbyPhase::InGame,
            _ => LobbyPhase::Idle,
        }
    }
}

/// Tracks the lobby's mini-game selection, driven by owner events only. The
/// phase is an atomic so the lobby-state endpoint reads a snapshot without
/// touching the message path.
pub struct ActivityTracker {
    current_activity_id: AtomicU32,
    current_difficulty_id: AtomicU32,
    phase: AtomicU8,
    participants: Mutex<HashSet<ClientId>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        ActivityTracker {
            current_activity_id: AtomicU32::new(0),
            current_difficulty_id: AtomicU32::new(0),
            phase: AtomicU8::new(LobbyPhase::Idle.as_u8()),
            participants: Mutex::new(HashSet::new()),
        }
    }

    pub fn phase(&self) -> LobbyPhase {
        LobbyPhase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    pub fn current_activity_id(&self) -> u32 {
        self.current_activity_id.load(Ordering::Relaxed)
    }

    pub fn current_difficulty_id(&self) -> u32 {
        self.current_difficulty_id.load(Ordering::Relaxed)
    }

    /// Feeds an accepted owner message into the state machine. Payloads have
    /// already passed structural validation.
    pub fn observe_owner_event(&self, message_id: MessageId, payload: &[u8]) {
        match message_id {
            event_id::DIFFICULTY_SELECT_FOR_MINIGAME => {
                let spec = EventRegistry::global().expect(message_id);
                if let Some(minigame_id) = read_u32_element(payload, &spec.structure[0]) {
                    self.current_activity_id.store(minigame_id, Ordering::Relaxed);
                }
                if let Some(difficulty_id) = read_u32_element(payload, &spec.structure[1]) {
                    self.current_difficulty_id
                        .store(difficulty_id, Ordering::Relaxed);
                }
                self.set_phase(LobbyPhase::Selecting);
            }
            event_id::DIFFICULTY_CONFIRMED_FOR_MINIGAME => {
                self.set_phase(LobbyPhase::Confirmed);
            }
            event_id::PLAYER_JOIN_ACTIVITY => {
                let spec = EventRegistry::global().expect(message_id);
                if let Some(player_id) = read_u32_element(payload, &spec.structure[0]) {
                    self.participants().insert(player_id);
                }
                self.set_phase(LobbyPhase::InGame);
            }
            event_id::PLAYER_ABORTING_MINIGAME => {
                let spec = EventRegistry::global().expect(message_id);
                if let Some(player_id) = read_u32_element(payload, &spec.structure[0]) {
                    self.drop_participant(player_id);
                }
            }
            _ => {}
        }
    }

    /// A client left the lobby entirely; they are no longer in any activity.
    pub fn participant_left(&self, client_id: ClientId) {
        self.drop_participant(client_id);
    }

    fn drop_participant(&self, client_id: ClientId) {
        let mut participants = self.participants();
        participants.remove(&client_id);
        if participants.is_empty() && self.phase() == LobbyPhase::InGame {
            self.set_phase(LobbyPhase::Idle);
        }
    }

    fn set_phase(&self, phase: LobbyPhase) {
        self.phase.store(phase.as_u8(), Ordering::Relaxed);
    }

    fn participants(&self) -> std::sync::MutexGuard<'_, HashSet<ClientId>> {
        self.participants
            .lock()
            .expect("participant set lock poisoned")
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        ActivityTracker::new()
    }
}
