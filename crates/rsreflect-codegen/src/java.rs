//! Host-side (Java) naming for exported types
//!
//! The table below is what a binding generator needs per primitive: the
//! data-type enum constant, the runtime element name, the C and Java
//! spellings, the Java vector class prefix and the `FieldPacker` method.

use rsreflect_core::types::{TypeArena, TypeId, TypeKind};
use rsreflect_core::PrimitiveKind;
use serde::Serialize;

use crate::error::CodegenError;

/// Reflection facts for one primitive kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrimitiveReflection {
    pub kind: PrimitiveKind,
    /// `Element.DataType` constant, e.g. `FLOAT_32`
    pub data_type: &'static str,
    /// Runtime element name used by `Element.F32(rs)` style constructors
    pub element_type: Option<&'static str>,
    pub c_name: Option<&'static str>,
    pub java_name: Option<&'static str>,
    /// Prefix of the Java vector classes (`Float` for `Float4`)
    pub vector_prefix: Option<&'static str>,
    /// Suffix of the `FieldPacker.add*` method
    pub packer: Option<&'static str>,
    /// Unsigned type carried in the next wider signed Java type
    pub widened: bool,
}

const fn row(
    kind: PrimitiveKind,
    data_type: &'static str,
    element_type: &'static str,
    c_name: &'static str,
    java_name: &'static str,
    vector_prefix: &'static str,
    widened: bool,
) -> PrimitiveReflection {
    PrimitiveReflection {
        kind,
        data_type,
        element_type: Some(element_type),
        c_name: Some(c_name),
        java_name: Some(java_name),
        vector_prefix: Some(vector_prefix),
        packer: Some(element_type),
        widened,
    }
}

const fn handle(kind: PrimitiveKind, data_type: &'static str, element_type: &'static str, java_name: &'static str) -> PrimitiveReflection {
    PrimitiveReflection {
        kind,
        data_type,
        element_type: Some(element_type),
        c_name: None,
        java_name: Some(java_name),
        vector_prefix: None,
        packer: Some("Obj"),
        widened: false,
    }
}

static REFLECTION: [PrimitiveReflection; 30] = [
    row(PrimitiveKind::Float16, "FLOAT_16", "F16", "half", "short", "Short", false),
    row(PrimitiveKind::Float32, "FLOAT_32", "F32", "float", "float", "Float", false),
    row(PrimitiveKind::Float64, "FLOAT_64", "F64", "double", "double", "Double", false),
    row(PrimitiveKind::Signed8, "SIGNED_8", "I8", "char", "byte", "Byte", false),
    row(PrimitiveKind::Signed16, "SIGNED_16", "I16", "short", "short", "Short", false),
    row(PrimitiveKind::Signed32, "SIGNED_32", "I32", "int", "int", "Int", false),
    row(PrimitiveKind::Signed64, "SIGNED_64", "I64", "long", "long", "Long", false),
    row(PrimitiveKind::Unsigned8, "UNSIGNED_8", "U8", "uchar", "short", "Short", true),
    row(PrimitiveKind::Unsigned16, "UNSIGNED_16", "U16", "ushort", "int", "Int", true),
    row(PrimitiveKind::Unsigned32, "UNSIGNED_32", "U32", "uint", "long", "Long", true),
    row(PrimitiveKind::Unsigned64, "UNSIGNED_64", "U64", "ulong", "long", "Long", false),
    PrimitiveReflection {
        kind: PrimitiveKind::Boolean,
        data_type: "BOOLEAN",
        element_type: Some("BOOLEAN"),
        c_name: Some("bool"),
        java_name: Some("boolean"),
        vector_prefix: None,
        packer: Some("Boolean"),
        widened: false,
    },
    PrimitiveReflection {
        kind: PrimitiveKind::Unsigned565,
        data_type: "UNSIGNED_5_6_5",
        element_type: Some("RGB_565"),
        c_name: None,
        java_name: None,
        vector_prefix: None,
        packer: None,
        widened: false,
    },
    PrimitiveReflection {
        kind: PrimitiveKind::Unsigned5551,
        data_type: "UNSIGNED_5_5_5_1",
        element_type: Some("RGBA_5551"),
        c_name: None,
        java_name: None,
        vector_prefix: None,
        packer: None,
        widened: false,
    },
    PrimitiveReflection {
        kind: PrimitiveKind::Unsigned4444,
        data_type: "UNSIGNED_4_4_4_4",
        element_type: Some("RGBA_4444"),
        c_name: None,
        java_name: None,
        vector_prefix: None,
        packer: None,
        widened: false,
    },
    PrimitiveReflection {
        kind: PrimitiveKind::Matrix2x2,
        data_type: "MATRIX_2X2",
        element_type: Some("MATRIX_2X2"),
        c_name: Some("rs_matrix2x2"),
        java_name: Some("Matrix2f"),
        vector_prefix: None,
        packer: Some("Matrix"),
        widened: false,
    },
    PrimitiveReflection {
        kind: PrimitiveKind::Matrix3x3,
        data_type: "MATRIX_3X3",
        element_type: Some("MATRIX_3X3"),
        c_name: Some("rs_matrix3x3"),
        java_name: Some("Matrix3f"),
        vector_prefix: None,
        packer: Some("Matrix"),
        widened: false,
    },
    PrimitiveReflection {
        kind: PrimitiveKind::Matrix4x4,
        data_type: "MATRIX_4X4",
        element_type: Some("MATRIX_4X4"),
        c_name: Some("rs_matrix4x4"),
        java_name: Some("Matrix4f"),
        vector_prefix: None,
        packer: Some("Matrix"),
        widened: false,
    },
    handle(PrimitiveKind::Element, "RS_ELEMENT", "ELEMENT", "Element"),
    handle(PrimitiveKind::Type, "RS_TYPE", "TYPE", "Type"),
    handle(PrimitiveKind::Allocation, "RS_ALLOCATION", "ALLOCATION", "Allocation"),
    handle(PrimitiveKind::Sampler, "RS_SAMPLER", "SAMPLER", "Sampler"),
    handle(PrimitiveKind::Script, "RS_SCRIPT", "SCRIPT", "Script"),
    handle(PrimitiveKind::Mesh, "RS_MESH", "MESH", "Mesh"),
    handle(PrimitiveKind::Path, "RS_PATH", "PATH", "Path"),
    handle(PrimitiveKind::ProgramFragment, "RS_PROGRAM_FRAGMENT", "PROGRAM_FRAGMENT", "ProgramFragment"),
    handle(PrimitiveKind::ProgramVertex, "RS_PROGRAM_VERTEX", "PROGRAM_VERTEX", "ProgramVertex"),
    handle(PrimitiveKind::ProgramRaster, "RS_PROGRAM_RASTER", "PROGRAM_RASTER", "ProgramRaster"),
    handle(PrimitiveKind::ProgramStore, "RS_PROGRAM_STORE", "PROGRAM_STORE", "ProgramStore"),
    handle(PrimitiveKind::Font, "RS_FONT", "FONT", "Font"),
];

pub fn reflection(kind: PrimitiveKind) -> &'static PrimitiveReflection {
    &REFLECTION[kind as usize]
}

/// Prefix of generated record classes.
pub const RECORD_CLASS_PREFIX: &str = "ScriptField_";

pub fn record_class_name(record: &str) -> String {
    format!("{}{}", RECORD_CLASS_PREFIX, record)
}

fn java_scalar(kind: PrimitiveKind) -> Result<&'static str, CodegenError> {
    reflection(kind)
        .java_name
        .ok_or_else(|| CodegenError::UnsupportedType(kind.name().to_string()))
}

/// Java type a generated accessor uses for the node.
pub fn host_type_name(arena: &TypeArena, id: TypeId) -> Result<String, CodegenError> {
    let node = arena.get(id);
    match node.kind() {
        TypeKind::Primitive { kind, .. } => java_scalar(*kind).map(str::to_string),
        TypeKind::Pointer { pointee } => match arena.get(*pointee).kind() {
            TypeKind::Record { .. } => Ok(record_class_name(arena.name(*pointee))),
            _ => Ok("Allocation".to_string()),
        },
        TypeKind::Vector { element, count } => {
            let prefix = reflection(*element)
                .vector_prefix
                .ok_or_else(|| CodegenError::UnsupportedType(node.name().to_string()))?;
            Ok(format!("{}{}", prefix, count))
        }
        TypeKind::Matrix { dim } => Ok(format!("Matrix{}f", dim)),
        TypeKind::ConstantArray { element, .. } => Ok(format!("{}[]", host_type_name(arena, *element)?)),
        TypeKind::Record { artificial: true, .. } => Err(CodegenError::UnsupportedType(node.name().to_string())),
        TypeKind::Record { .. } => Ok(format!("{}.Item", record_class_name(node.name()))),
    }
}

/// Default value a generated field is initialised to.
pub fn null_value(arena: &TypeArena, id: TypeId) -> &'static str {
    match arena.get(id).kind() {
        TypeKind::Primitive { kind, .. } if kind.is_object() => "null",
        TypeKind::Primitive {
            kind: PrimitiveKind::Boolean,
            ..
        } => "false",
        TypeKind::Primitive { .. } => "0",
        _ => "null",
    }
}

/// `Element` factory call for types the runtime knows natively.
pub fn builtin_element_construct(arena: &TypeArena, id: TypeId) -> Option<String> {
    match arena.get(id).kind() {
        TypeKind::Primitive { kind, .. } => reflection(*kind)
            .element_type
            .map(|name| format!("Element.{}(rs)", name)),
        TypeKind::Vector { element, count } => reflection(*element)
            .element_type
            .filter(|_| *element != PrimitiveKind::Boolean)
            .map(|name| format!("Element.{}_{}(rs)", name, count)),
        TypeKind::Matrix { dim } => Some(format!("Element.MATRIX_{}X{}(rs)", dim, dim)),
        _ => None,
    }
}

/// Flattened description of a type for generators that reason about
/// (element, vector width, pointer, array) tuples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReflectionTypeData {
    pub kind: PrimitiveKind,
    pub vec_size: u8,
    pub is_pointer: bool,
    pub array_size: u32,
}

impl ReflectionTypeData {
    pub fn from_type(arena: &TypeArena, id: TypeId) -> Result<Self, CodegenError> {
        let mut data = ReflectionTypeData {
            kind: PrimitiveKind::Signed32,
            vec_size: 1,
            is_pointer: false,
            array_size: 0,
        };
        let mut current = id;
        if let TypeKind::Pointer { pointee } = arena.get(current).kind() {
            data.is_pointer = true;
            current = *pointee;
        }
        if let TypeKind::ConstantArray { element, size } = arena.get(current).kind() {
            data.array_size = *size;
            current = *element;
        }
        match arena.get(current).kind() {
            TypeKind::Primitive { kind, .. } => data.kind = *kind,
            TypeKind::Vector { element, count } => {
                data.kind = *element;
                data.vec_size = *count;
            }
            TypeKind::Matrix { dim } => {
                data.kind = PrimitiveKind::matrix_for_dim(*dim)
                    .ok_or_else(|| CodegenError::UnsupportedType(arena.name(current).to_string()))?;
            }
            _ => return Err(CodegenError::UnsupportedType(arena.name(id).to_string())),
        }
        Ok(data)
    }

    pub fn reflection(&self) -> &'static PrimitiveReflection {
        reflection(self.kind)
    }
}
