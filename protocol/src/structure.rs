use std::ops::Range;

use thiserror::Error;

// in bytes
pub const MESSAGE_HEADER_SIZE: u32 = 8;

/// Scalar kinds a message element may carry. Strings are the single
/// variable-size kind and are terminated by the frame boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    C64,
    C128,
    Str,
}

impl FieldKind {
    /// Serialized size in bytes, 0 for variable-size kinds.
    pub fn wire_size(self) -> u32 {
        match self {
            FieldKind::Bool | FieldKind::I8 | FieldKind::U8 => 1,
            FieldKind::I16 | FieldKind::U16 => 2,
            FieldKind::I32 | FieldKind::U32 | FieldKind::F32 => 4,
            FieldKind::I64 | FieldKind::U64 | FieldKind::F64 | FieldKind::C64 => 8,
            FieldKind::C128 => 16,
            FieldKind::Str => 0,
        }
    }

    pub fn is_variable_size(self) -> bool {
        matches!(self, FieldKind::Str)
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldKind::Bool => "bool",
            FieldKind::I8 => "int8",
            FieldKind::I16 => "int16",
            FieldKind::I32 => "int32",
            FieldKind::I64 => "int64",
            FieldKind::U8 => "uint8",
            FieldKind::U16 => "uint16",
            FieldKind::U32 => "uint32",
            FieldKind::U64 => "uint64",
            FieldKind::F32 => "float32",
            FieldKind::F64 => "float64",
            FieldKind::C64 => "complex64",
            FieldKind::C128 => "complex128",
            FieldKind::Str => "string",
        }
    }
}

pub const ALL_FIELD_KINDS: [FieldKind; 14] = [
    FieldKind::Bool,
    FieldKind::I8,
    FieldKind::I16,
    FieldKind::I32,
    FieldKind::I64,
    FieldKind::U8,
    FieldKind::U16,
    FieldKind::U32,
    FieldKind::U64,
    FieldKind::F32,
    FieldKind::F64,
    FieldKind::C64,
    FieldKind::C128,
    FieldKind::Str,
];

/// Declared element, before offsets are computed.
///
/// The description appears as a comment in generated client code; the field
/// name is the field of the client-side type representing this message.
#[derive(Debug, Clone, Copy)]
pub struct ElementDescriptor {
    pub description: &'static str,
    pub field_name: &'static str,
    pub kind: FieldKind,
}

pub fn element(
    description: &'static str,
    field_name: &'static str,
    kind: FieldKind,
) -> ElementDescriptor {
    ElementDescriptor {
        description,
        field_name,
        kind,
    }
}

/// Element with its computed wire position. Offsets are full-frame offsets:
/// the first element of any message sits at MESSAGE_HEADER_SIZE.
#[derive(Debug, Clone)]
pub struct ComputedElement {
    pub byte_size: u32,
    pub offset: u32,
    pub field_name: &'static str,
    pub description: &'static str,
    pub kind: FieldKind,
}

impl ComputedElement {
    /// Byte range of this element within a header-less payload slice.
    pub fn payload_range(&self) -> Range<usize> {
        let start = (self.offset - MESSAGE_HEADER_SIZE) as usize;
        start..start + self.byte_size as usize
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StructureError {
    #[error("message {0} has multiple variable size elements")]
    MultipleVariableElements(&'static str),
    #[error("message {0} has a variable size element that is not the last element")]
    VariableElementNotLast(&'static str),
    #[error("duplicate message id {0}")]
    DuplicateMessageId(u32),
}

/// Computes per-element offsets and the minimum total size of any message of
/// this description (header plus all fixed-size elements).
pub fn compute_structure(
    message_name: &'static str,
    elements: &[ElementDescriptor],
) -> Result<(u32, Vec<ComputedElement>), StructureError> {
    let mut computed = Vec::with_capacity(elements.len());
    let mut offset = MESSAGE_HEADER_SIZE;
    let mut seen_variable = false;

    for (index, el) in elements.iter().enumerate() {
        if el.kind.is_variable_size() {
            if seen_variable {
                return Err(StructureError::MultipleVariableElements(message_name));
            }
            if index != elements.len() - 1 {
                return Err(StructureError::VariableElementNotLast(message_name));
            }
            seen_variable = true;
        }

        let size = el.kind.wire_size();
        computed.push(ComputedElement {
            byte_size: size,
            offset,
            field_name: el.field_name,
            description: el.description,
            kind: el.kind,
        });
        offset += size;
    }

    Ok((offset, computed))
}
