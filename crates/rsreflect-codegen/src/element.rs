//! Element-builder layout of exported records
//!
//! A generated `createElement` adds one entry per field and fills every
//! gap between fields, and the tail of the record, with unsigned padding
//! entries so the host element matches the script's memory layout.

use rsreflect_core::types::{TypeArena, TypeId, TypeKind};
use rsreflect_core::ApiLevel;
use serde::Serialize;

use crate::error::{CodegenError, ErrorLocation};
use crate::java::{builtin_element_construct, record_class_name};

pub const PADDING_PREFIX: &str = "#rs_padding_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum ElementEntry {
    Field {
        name: String,
        /// Expression producing the field's element
        construct: String,
        /// Element count for array fields
        array_size: Option<u32>,
    },
    Padding {
        name: String,
        /// `U32`, `U16` or `U8`
        unit: &'static str,
    },
}

impl ElementEntry {
    pub fn is_padding(&self) -> bool {
        matches!(self, ElementEntry::Padding { .. })
    }

    /// Bytes a padding entry covers; zero for fields.
    pub fn padding_bytes(&self) -> usize {
        match self {
            ElementEntry::Padding { unit: "U32", .. } => 4,
            ElementEntry::Padding { unit: "U16", .. } => 2,
            ElementEntry::Padding { .. } => 1,
            ElementEntry::Field { .. } => 0,
        }
    }
}

struct LayoutBuilder {
    entries: Vec<ElementEntry>,
    padding_count: usize,
}

impl LayoutBuilder {
    fn pad(&mut self, mut bytes: usize) {
        while bytes > 0 {
            let (unit, size) = if bytes >= 4 {
                ("U32", 4)
            } else if bytes >= 2 {
                ("U16", 2)
            } else {
                ("U8", 1)
            };
            self.entries.push(ElementEntry::Padding {
                name: format!("{}{}", PADDING_PREFIX, self.padding_count),
                unit,
            });
            self.padding_count += 1;
            bytes -= size;
        }
    }
}

fn element_construct(arena: &TypeArena, id: TypeId) -> Option<String> {
    match arena.get(id).kind() {
        TypeKind::Record { .. } => Some(format!("{}.createElement(rs)", record_class_name(arena.name(id)))),
        _ => builtin_element_construct(arena, id),
    }
}

/// Entries of the element describing `record`, in field order.
pub fn element_layout(arena: &TypeArena, record: TypeId, api: ApiLevel) -> Result<Vec<ElementEntry>, CodegenError> {
    let node = arena.get(record);
    let TypeKind::Record { fields, alloc_size, .. } = node.kind() else {
        return Err(CodegenError::UnsupportedType(node.name().to_string()));
    };

    let mut builder = LayoutBuilder {
        entries: Vec::with_capacity(fields.len()),
        padding_count: 0,
    };
    let mut position = 0;
    for field in fields {
        let location = || ErrorLocation::new().in_type(node.name()).in_field(&field.name);
        if field.offset < position {
            return Err(CodegenError::Layout {
                location: location(),
                message: format!("field offset {} overlaps previous field ending at {}", field.offset, position),
            });
        }
        builder.pad(field.offset - position);

        let (element, array_size) = match arena.get(field.ty).kind() {
            TypeKind::ConstantArray { element, size } => (*element, Some(*size)),
            _ => (field.ty, None),
        };
        let construct = element_construct(arena, element).ok_or_else(|| CodegenError::Layout {
            location: location(),
            message: format!("no element for type '{}'", arena.name(element)),
        })?;
        builder.entries.push(ElementEntry::Field {
            name: field.name.clone(),
            construct,
            array_size,
        });

        let field_alloc = arena.alloc_size(field.ty);
        // Older runtimes do not pad 3-wide vectors themselves.
        if api < ApiLevel::ICS {
            builder.pad(field_alloc - arena.store_size(field.ty).min(field_alloc));
        }
        position = field.offset + field_alloc;
    }

    if position < *alloc_size {
        builder.pad(alloc_size - position);
    }
    tracing::debug!(record = %node.name(), entries = builder.entries.len(), "element layout");
    Ok(builder.entries)
}
