use std::collections::HashMap;
use std::sync::OnceLock;

use crate::permissions::{SendPermissions, OWNER_AND_GUESTS, OWNER_ONLY, SERVER_ONLY};
use crate::structure::{
    compute_structure, element, ComputedElement, ElementDescriptor, FieldKind, StructureError,
};
use crate::MessageId;

/// Well-known message ids. The 3000 block belongs to the asteroids mini-game.
pub mod event_id {
    use crate::MessageId;

    pub const DEBUG: MessageId = 1;
    pub const PLAYER_JOINED: MessageId = 2;
    pub const PLAYER_LEFT: MessageId = 3;
    pub const PLAYER_MOVE: MessageId = 4;
    pub const LOBBY_CLOSING: MessageId = 5;
    pub const SERVER_CLOSING: MessageId = 6;
    pub const DIFFICULTY_SELECT_FOR_MINIGAME: MessageId = 7;
    pub const DIFFICULTY_CONFIRMED_FOR_MINIGAME: MessageId = 8;
    pub const PLAYER_JOIN_ACTIVITY: MessageId = 9;
    pub const PLAYER_ABORTING_MINIGAME: MessageId = 10;

    pub const ASTEROID_SPAWN: MessageId = 3000;
    pub const ASSIGN_PLAYER_DATA: MessageId = 3001;
    pub const ASTEROID_IMPACT: MessageId = 3002;
    pub const PLAYER_SHOOT: MessageId = 3003;
    pub const GAME_WON: MessageId = 3004;
    pub const GAME_LOST: MessageId = 3005;
    pub const UNTIMELY_ABORT_GAME: MessageId = 3006;
}

/// What the lobby does with an accepted inbound message. Declared alongside
/// the spec so dispatch is a single table lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// Relay the full frame to every client in the lobby.
    Rebroadcast,
    /// Nothing beyond the bookkeeping every message gets.
    None,
}

#[derive(Debug, Clone)]
pub struct EventSpec {
    pub id: MessageId,
    pub name: &'static str,
    /// Free-text description carried into generated client code.
    pub comment: &'static str,
    pub permissions: SendPermissions,
    pub expected_min_size: u32,
    pub structure: Vec<ComputedElement>,
    pub handler: Handler,
}

impl EventSpec {
    fn new(
        id: MessageId,
        name: &'static str,
        comment: &'static str,
        permissions: SendPermissions,
        elements: &[ElementDescriptor],
        handler: Handler,
    ) -> Result<Self, StructureError> {
        let (expected_min_size, structure) = compute_structure(name, elements)?;
        Ok(EventSpec {
            id,
            name,
            comment,
            permissions,
            expected_min_size,
            structure,
            handler,
        })
    }

    pub fn has_variable_element(&self) -> bool {
        self.structure
            .last()
            .is_some_and(|el| el.kind.is_variable_size())
    }
}

/// The immutable event table. Built exactly once; a build failure means a
/// spec declaration is wrong and the process must not come up.
pub struct EventRegistry {
    by_id: HashMap<MessageId, EventSpec>,
}

static REGISTRY: OnceLock<EventRegistry> = OnceLock::new();

impl EventRegistry {
    pub fn global() -> &'static EventRegistry {
        REGISTRY.get_or_init(|| EventRegistry::build().expect("event specifications are invalid"))
    }

    pub fn get(&self, id: MessageId) -> Option<&EventSpec> {
        self.by_id.get(&id)
    }

    /// Lookup for ids declared in [`event_id`]; those are always present.
    pub fn expect(&self, id: MessageId) -> &EventSpec {
        self.by_id
            .get(&id)
            .unwrap_or_else(|| panic!("message id {id} missing from the event table"))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// All specs ordered by id, for deterministic generated output.
    pub fn ordered(&self) -> Vec<&EventSpec> {
        let mut specs: Vec<&EventSpec> = self.by_id.values().collect();
        specs.sort_by_key(|s| s.id);
        specs
    }

    fn build() -> Result<EventRegistry, StructureError> {
        let u32k = FieldKind::U32;
        let f32k = FieldKind::F32;
        let u8k = FieldKind::U8;
        let strk = FieldKind::Str;

        let specs = vec![
            EventSpec::new(
                event_id::DEBUG,
                "Debug",
                "Out-of-band diagnostic pushed to a single client",
                SERVER_ONLY,
                &[
                    element("HTTP-like status code", "code", u32k),
                    element("Human readable explanation", "message", strk),
                ],
                Handler::None,
            )?,
            EventSpec::new(
                event_id::PLAYER_JOINED,
                "PlayerJoined",
                "A player has entered the lobby",
                SERVER_ONLY,
                &[
                    element("Player ID", "id", u32k),
                    element("Player IGN", "ign", strk),
                ],
                Handler::None,
            )?,
            EventSpec::new(
                event_id::PLAYER_LEFT,
                "PlayerLeft",
                "A player has left the lobby",
                SERVER_ONLY,
                &[
                    element("Player ID", "id", u32k),
                    element("Player IGN", "ign", strk),
                ],
                Handler::None,
            )?,
            EventSpec::new(
                event_id::PLAYER_MOVE,
                "PlayerMove",
                "A player moved to another colony location",
                OWNER_AND_GUESTS,
                &[
                    element("X Position", "x", f32k),
                    element("Y Position", "y", f32k),
                    element("Colony Location ID", "locationID", u32k),
                ],
                Handler::Rebroadcast,
            )?,
            EventSpec::new(
                event_id::LOBBY_CLOSING,
                "LobbyClosing",
                "The lobby is shutting down",
                SERVER_ONLY,
                &[],
                Handler::None,
            )?,
            EventSpec::new(
                event_id::SERVER_CLOSING,
                "ServerClosing",
                "The whole server is shutting down",
                SERVER_ONLY,
                &[],
                Handler::None,
            )?,
            EventSpec::new(
                event_id::DIFFICULTY_SELECT_FOR_MINIGAME,
                "DifficultySelectForMinigame",
                "The owner is browsing a difficulty for a mini-game",
                OWNER_ONLY,
                &[
                    element("Minigame ID", "minigameID", u32k),
                    element("Difficulty ID", "difficultyID", u32k),
                ],
                Handler::Rebroadcast,
            )?,
            EventSpec::new(
                event_id::DIFFICULTY_CONFIRMED_FOR_MINIGAME,
                "DifficultyConfirmedForMinigame",
                "The owner locked in a difficulty for a mini-game",
                OWNER_ONLY,
                &[
                    element("Minigame ID", "minigameID", u32k),
                    element("Difficulty ID", "difficultyID", u32k),
                ],
                Handler::Rebroadcast,
            )?,
            EventSpec::new(
                event_id::PLAYER_JOIN_ACTIVITY,
                "PlayerJoinActivity",
                "A player stepped into the selected mini-game",
                OWNER_AND_GUESTS,
                &[element("Player ID", "id", u32k)],
                Handler::Rebroadcast,
            )?,
            EventSpec::new(
                event_id::PLAYER_ABORTING_MINIGAME,
                "PlayerAbortingMinigame",
                "A player backed out of the selected mini-game",
                OWNER_AND_GUESTS,
                &[element("Player ID", "id", u32k)],
                Handler::Rebroadcast,
            )?,
            // Asteroids block, 3000 -> 3999
            EventSpec::new(
                event_id::ASTEROID_SPAWN,
                "AsteroidsAsteroidSpawn",
                "An asteroid entered the play field",
                SERVER_ONLY,
                &[
                    element("ID", "id", u32k),
                    element("X Offset", "x", f32k),
                    element("Y Offset", "y", f32k),
                    element("Health", "health", u8k),
                    element("Time until impact", "timeUntilImpact", u8k),
                    element("Asteroid Type", "type", u8k),
                    element("CharCode", "charCode", strk),
                ],
                Handler::None,
            )?,
            EventSpec::new(
                event_id::ASSIGN_PLAYER_DATA,
                "AsteroidsAssignPlayerData",
                "Initial per-player game data",
                SERVER_ONLY,
                &[
                    element("Player ID", "id", u32k),
                    element("X Position", "x", f32k),
                    element("Y Position", "y", f32k),
                    element("Tank Type", "type", u8k),
                    element("CharCode", "code", strk),
                ],
                Handler::None,
            )?,
            EventSpec::new(
                event_id::ASTEROID_IMPACT,
                "AsteroidsAsteroidImpactOnColony",
                "An asteroid hit the colony",
                SERVER_ONLY,
                &[
                    element("Asteroid ID", "id", u32k),
                    element("Remaining Colony Health", "colonyHPLeft", u32k),
                ],
                Handler::None,
            )?,
            EventSpec::new(
                event_id::PLAYER_SHOOT,
                "AsteroidsPlayerShootAtCode",
                "A player fired at a char code",
                OWNER_AND_GUESTS,
                &[
                    element("Player ID", "id", u32k),
                    element("CharCode", "code", strk),
                ],
                Handler::Rebroadcast,
            )?,
            EventSpec::new(
                event_id::GAME_WON,
                "AsteroidsGameWon",
                "The mini-game was won",
                SERVER_ONLY,
                &[],
                Handler::None,
            )?,
            EventSpec::new(
                event_id::GAME_LOST,
                "AsteroidsGameLost",
                "The mini-game was lost",
                SERVER_ONLY,
                &[],
                Handler::None,
            )?,
            EventSpec::new(
                event_id::UNTIMELY_ABORT_GAME,
                "AsteroidsUntimelyAbortGame",
                "The mini-game ended before resolution",
                SERVER_ONLY,
                &[],
                Handler::None,
            )?,
        ];

        let mut by_id = HashMap::with_capacity(specs.len());
        for spec in specs {
            let id = spec.id;
            if by_id.insert(id, spec).is_some() {
                return Err(StructureError::DuplicateMessageId(id));
            }
        }

        Ok(EventRegistry { by_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::MESSAGE_HEADER_SIZE;

    #[test]
    fn registry_builds_and_serves_lookups() {
        let reg = EventRegistry::global();
        assert!(reg.len() >= 17);
        assert!(reg.get(event_id::PLAYER_MOVE).is_some());
        assert!(reg.get(999_999).is_none());
    }

    #[test]
    fn min_sizes_are_header_plus_fixed_elements() {
        let reg = EventRegistry::global();
        for spec in reg.ordered() {
            let fixed: u32 = spec.structure.iter().map(|el| el.byte_size).sum();
            assert_eq!(
                spec.expected_min_size,
                MESSAGE_HEADER_SIZE + fixed,
                "min size mismatch for {}",
                spec.name
            );
        }
    }

    #[test]
    fn variable_elements_are_single_and_last() {
        let reg = EventRegistry::global();
        for spec in reg.ordered() {
            let variable = spec
                .structure
                .iter()
                .filter(|el| el.kind.is_variable_size())
                .count();
            assert!(variable <= 1, "{} has {} variable elements", spec.name, variable);
            if variable == 1 {
                assert!(
                    spec.structure.last().unwrap().kind.is_variable_size(),
                    "{} has a misplaced variable element",
                    spec.name
                );
            }
        }
    }

    #[test]
    fn client_sendable_events_rebroadcast() {
        let reg = EventRegistry::global();
        for spec in reg.ordered() {
            if spec.permissions.owner || spec.permissions.guest {
                assert_eq!(spec.handler, Handler::Rebroadcast, "{}", spec.name);
            }
        }
    }

    #[test]
    fn player_move_tracks_location_as_third_element() {
        let spec = EventRegistry::global().expect(event_id::PLAYER_MOVE);
        let location = &spec.structure[2];
        assert_eq!(location.field_name, "locationID");
        assert_eq!(location.offset, MESSAGE_HEADER_SIZE + 8);
        assert_eq!(location.byte_size, 4);
    }
}
