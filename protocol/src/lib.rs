// Static description of the lobby wire protocol: every message a client or
// the server may put on a socket is declared here, validated once at startup,
// and served as an immutable table.
//
// All multi-byte integers on the wire are big-endian. This includes the
// 8-byte header (sender id, message id), every fixed-size element, and the
// cached per-client id bytes the server uses when broadcasting.

pub mod codec;
pub mod events;
pub mod permissions;
pub mod structure;

pub type ClientId = u32;
pub type LobbyId = u32;
pub type ColonyId = u32;
pub type MessageId = u32;

// Reserved sender id for server-originated broadcasts. Never assigned to a
// client.
pub const SERVER_ID: ClientId = u32::MAX;

pub fn server_id_bytes() -> [u8; 4] {
    SERVER_ID.to_be_bytes()
}

pub use codec::{
    extract_client_and_message_id, parse_payload, prepare_server_message, serialize, CodecError,
    EncodedFrame, FieldValue, MessageEncoding,
};
pub use events::{event_id, EventRegistry, EventSpec, Handler};
pub use permissions::{OriginType, SendPermissions, OWNER_AND_GUESTS, OWNER_ONLY, SERVER_ONLY};
pub use structure::{ComputedElement, ElementDescriptor, FieldKind, MESSAGE_HEADER_SIZE};
