// Framing and parsing for the 8-byte-header binary protocol, plus the three
// on-wire encodings a lobby may broadcast with.

use base64::prelude::*;
use bytes::{BufMut, BytesMut};
use thiserror::Error;

use crate::events::{EventRegistry, EventSpec};
use crate::structure::{ComputedElement, FieldKind, MESSAGE_HEADER_SIZE};
use crate::{ClientId, MessageId};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message is shorter than the {MESSAGE_HEADER_SIZE} byte header")]
    MalformedHeader,
    #[error("unknown message id {0}")]
    UnknownMessage(MessageId),
    #[error("message {name} requires at least {expected} bytes, got {actual}")]
    PayloadTooShort {
        name: &'static str,
        expected: u32,
        actual: usize,
    },
    #[error("message {name}: {reason}")]
    BadVariableElement {
        name: &'static str,
        reason: &'static str,
    },
    #[error("failed to serialize {name}: {reason}")]
    SerializationFailure { name: &'static str, reason: String },
    #[error("invalid {encoding} text frame")]
    TextDecode { encoding: &'static str },
}

/// A value for a single message element, tagged with its wire kind.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    C64([f32; 2]),
    C128([f64; 2]),
    Str(String),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Bool(_) => FieldKind::Bool,
            FieldValue::I8(_) => FieldKind::I8,
            FieldValue::I16(_) => FieldKind::I16,
            FieldValue::I32(_) => FieldKind::I32,
            FieldValue::I64(_) => FieldKind::I64,
            FieldValue::U8(_) => FieldKind::U8,
            FieldValue::U16(_) => FieldKind::U16,
            FieldValue::U32(_) => FieldKind::U32,
            FieldValue::U64(_) => FieldKind::U64,
            FieldValue::F32(_) => FieldKind::F32,
            FieldValue::F64(_) => FieldKind::F64,
            FieldValue::C64(_) => FieldKind::C64,
            FieldValue::C128(_) => FieldKind::C128,
            FieldValue::Str(_) => FieldKind::Str,
        }
    }
}

/// Validates the header and structural constraints of an inbound frame.
///
/// Returns the claimed sender, the spec for the message id, and the
/// header-less payload. Permission and sender-identity checks are the
/// lobby's job; this only rejects frames that cannot be interpreted at all.
pub fn extract_client_and_message_id(
    bytes: &[u8],
) -> Result<(ClientId, &'static EventSpec, &[u8]), CodecError> {
    if bytes.len() < MESSAGE_HEADER_SIZE as usize {
        return Err(CodecError::MalformedHeader);
    }

    let sender = u32::from_be_bytes(bytes[0..4].try_into().expect("4 bytes"));
    let message_id = u32::from_be_bytes(bytes[4..8].try_into().expect("4 bytes"));

    let spec = EventRegistry::global()
        .get(message_id)
        .ok_or(CodecError::UnknownMessage(message_id))?;

    if bytes.len() < spec.expected_min_size as usize {
        return Err(CodecError::PayloadTooShort {
            name: spec.name,
            expected: spec.expected_min_size,
            actual: bytes.len(),
        });
    }

    if spec.has_variable_element() {
        let tail = &bytes[spec.expected_min_size as usize..];
        if tail.is_empty() {
            return Err(CodecError::BadVariableElement {
                name: spec.name,
                reason: "variable element is empty",
            });
        }
        if std::str::from_utf8(tail).is_err() {
            return Err(CodecError::BadVariableElement {
                name: spec.name,
                reason: "variable element is not valid utf-8",
            });
        }
    }

    Ok((sender, spec, &bytes[MESSAGE_HEADER_SIZE as usize..]))
}

/// Serializes a message as `messageId` followed by the payload in element
/// order. The sender id is prepended at broadcast time.
pub fn serialize(spec: &EventSpec, fields: &[FieldValue]) -> Result<Vec<u8>, CodecError> {
    if fields.len() != spec.structure.len() {
        return Err(CodecError::SerializationFailure {
            name: spec.name,
            reason: format!(
                "expected {} fields, got {}",
                spec.structure.len(),
                fields.len()
            ),
        });
    }

    let mut buf = BytesMut::with_capacity(spec.expected_min_size as usize + 16);
    buf.put_u32(spec.id);

    for (el, value) in spec.structure.iter().zip(fields) {
        if value.kind() != el.kind {
            return Err(CodecError::SerializationFailure {
                name: spec.name,
                reason: format!(
                    "field {} expects {}, got {}",
                    el.field_name,
                    el.kind.name(),
                    value.kind().name()
                ),
            });
        }

        match value {
            FieldValue::Bool(v) => buf.put_u8(u8::from(*v)),
            FieldValue::I8(v) => buf.put_i8(*v),
            FieldValue::I16(v) => buf.put_i16(*v),
            FieldValue::I32(v) => buf.put_i32(*v),
            FieldValue::I64(v) => buf.put_i64(*v),
            FieldValue::U8(v) => buf.put_u8(*v),
            FieldValue::U16(v) => buf.put_u16(*v),
            FieldValue::U32(v) => buf.put_u32(*v),
            FieldValue::U64(v) => buf.put_u64(*v),
            FieldValue::F32(v) => buf.put_f32(*v),
            FieldValue::F64(v) => buf.put_f64(*v),
            FieldValue::C64(v) => {
                buf.put_f32(v[0]);
                buf.put_f32(v[1]);
            }
            FieldValue::C128(v) => {
                buf.put_f64(v[0]);
                buf.put_f64(v[1]);
            }
            FieldValue::Str(v) => {
                if v.is_empty() {
                    return Err(CodecError::SerializationFailure {
                        name: spec.name,
                        reason: format!("field {} must not be empty", el.field_name),
                    });
                }
                buf.extend_from_slice(v.as_bytes());
            }
        }
    }

    Ok(buf.to_vec())
}

/// Inverse of [`serialize`] over the header-less payload. Assumes the frame
/// already passed [`extract_client_and_message_id`] validation.
pub fn parse_payload(spec: &EventSpec, payload: &[u8]) -> Result<Vec<FieldValue>, CodecError> {
    let mut fields = Vec::with_capacity(spec.structure.len());

    for el in &spec.structure {
        if el.kind.is_variable_size() {
            let start = (el.offset - MESSAGE_HEADER_SIZE) as usize;
            let tail = payload.get(start..).unwrap_or_default();
            if tail.is_empty() {
                return Err(CodecError::BadVariableElement {
                    name: spec.name,
                    reason: "variable element is empty",
                });
            }
            let text =
                std::str::from_utf8(tail).map_err(|_| CodecError::BadVariableElement {
                    name: spec.name,
                    reason: "variable element is not valid utf-8",
                })?;
            fields.push(FieldValue::Str(text.to_owned()));
            continue;
        }

        let range = el.payload_range();
        let raw = payload
            .get(range)
            .ok_or(CodecError::PayloadTooShort {
                name: spec.name,
                expected: spec.expected_min_size,
                actual: payload.len() + MESSAGE_HEADER_SIZE as usize,
            })?;

        let value = match el.kind {
            FieldKind::Bool => FieldValue::Bool(raw[0] != 0),
            FieldKind::I8 => FieldValue::I8(raw[0] as i8),
            FieldKind::I16 => FieldValue::I16(i16::from_be_bytes(raw.try_into().expect("2 bytes"))),
            FieldKind::I32 => FieldValue::I32(i32::from_be_bytes(raw.try_into().expect("4 bytes"))),
            FieldKind::I64 => FieldValue::I64(i64::from_be_bytes(raw.try_into().expect("8 bytes"))),
            FieldKind::U8 => FieldValue::U8(raw[0]),
            FieldKind::U16 => FieldValue::U16(u16::from_be_bytes(raw.try_into().expect("2 bytes"))),
            FieldKind::U32 => FieldValue::U32(u32::from_be_bytes(raw.try_into().expect("4 bytes"))),
            FieldKind::U64 => FieldValue::U64(u64::from_be_bytes(raw.try_into().expect("8 bytes"))),
            FieldKind::F32 => FieldValue::F32(f32::from_be_bytes(raw.try_into().expect("4 bytes"))),
            FieldKind::F64 => FieldValue::F64(f64::from_be_bytes(raw.try_into().expect("8 bytes"))),
            FieldKind::C64 => FieldValue::C64([
                f32::from_be_bytes(raw[0..4].try_into().expect("4 bytes")),
                f32::from_be_bytes(raw[4..8].try_into().expect("4 bytes")),
            ]),
            FieldKind::C128 => FieldValue::C128([
                f64::from_be_bytes(raw[0..8].try_into().expect("8 bytes")),
                f64::from_be_bytes(raw[8..16].try_into().expect("8 bytes")),
            ]),
            FieldKind::Str => unreachable!("variable kinds handled above"),
        };
        fields.push(value);
    }

    Ok(fields)
}

/// Reads a single u32 element out of a header-less payload. Used for the
/// couple of fields the server itself tracks (positions, mini-game ids).
pub fn read_u32_element(payload: &[u8], el: &ComputedElement) -> Option<u32> {
    let raw = payload.get(el.payload_range())?;
    Some(u32::from_be_bytes(raw.try_into().ok()?))
}

/// A fresh buffer starting with `SERVER_ID ∥ spec.id`; callers append the
/// payload bytes and hand the result to broadcast.
pub fn prepare_server_message(spec: &EventSpec) -> Vec<u8> {
    let mut msg = Vec::with_capacity(spec.expected_min_size as usize + 16);
    msg.extend_from_slice(&crate::server_id_bytes());
    msg.extend_from_slice(&spec.id.to_be_bytes());
    msg
}

/// On-wire framing of protocol messages for the duplex channel. Binary is
/// the raw frame; the other two are text frames for transports or clients
/// that cannot pass binary through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageEncoding {
    #[default]
    Binary,
    Base16,
    Base64,
}

/// A broadcast-ready frame; the variant selects the transport frame type.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedFrame {
    Binary(Vec<u8>),
    Text(String),
}

impl MessageEncoding {
    pub fn from_name(name: &str) -> Option<MessageEncoding> {
        match name {
            "binary" => Some(MessageEncoding::Binary),
            "base16" => Some(MessageEncoding::Base16),
            "base64" => Some(MessageEncoding::Base64),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageEncoding::Binary => "binary",
            MessageEncoding::Base16 => "base16",
            MessageEncoding::Base64 => "base64",
        }
    }

    pub fn encode(self, bytes: &[u8]) -> EncodedFrame {
        match self {
            MessageEncoding::Binary => EncodedFrame::Binary(bytes.to_vec()),
            MessageEncoding::Base16 => EncodedFrame::Text(hex::encode(bytes)),
            MessageEncoding::Base64 => EncodedFrame::Text(BASE64_STANDARD.encode(bytes)),
        }
    }

    pub fn decode_text(self, text: &str) -> Result<Vec<u8>, CodecError> {
        match self {
            MessageEncoding::Binary => Err(CodecError::TextDecode { encoding: "binary" }),
            MessageEncoding::Base16 => {
                hex::decode(text).map_err(|_| CodecError::TextDecode { encoding: "base16" })
            }
            MessageEncoding::Base64 => BASE64_STANDARD
                .decode(text)
                .map_err(|_| CodecError::TextDecode { encoding: "base64" }),
        }
    }
}
