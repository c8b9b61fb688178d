//! Closed catalog of primitive data types
//!
//! The discriminants double as the one-byte data-type field of the
//! serialized descriptor, so their order is part of the wire format.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::BuiltinKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum PrimitiveKind {
    Float16 = 0,
    Float32 = 1,
    Float64 = 2,
    Signed8 = 3,
    Signed16 = 4,
    Signed32 = 5,
    Signed64 = 6,
    Unsigned8 = 7,
    Unsigned16 = 8,
    Unsigned32 = 9,
    Unsigned64 = 10,
    Boolean = 11,
    Unsigned565 = 12,
    Unsigned5551 = 13,
    Unsigned4444 = 14,
    Matrix2x2 = 15,
    Matrix3x3 = 16,
    Matrix4x4 = 17,
    Element = 18,
    Type = 19,
    Allocation = 20,
    Sampler = 21,
    Script = 22,
    Mesh = 23,
    Path = 24,
    ProgramFragment = 25,
    ProgramVertex = 26,
    ProgramRaster = 27,
    ProgramStore = 28,
    Font = 29,
}

struct KindInfo {
    kind: PrimitiveKind,
    bits: u32,
    name: &'static str,
}

const fn info(kind: PrimitiveKind, bits: u32, name: &'static str) -> KindInfo {
    KindInfo { kind, bits, name }
}

static CATALOG: [KindInfo; 30] = [
    info(PrimitiveKind::Float16, 16, "half"),
    info(PrimitiveKind::Float32, 32, "float"),
    info(PrimitiveKind::Float64, 64, "double"),
    info(PrimitiveKind::Signed8, 8, "char"),
    info(PrimitiveKind::Signed16, 16, "short"),
    info(PrimitiveKind::Signed32, 32, "int"),
    info(PrimitiveKind::Signed64, 64, "long"),
    info(PrimitiveKind::Unsigned8, 8, "uchar"),
    info(PrimitiveKind::Unsigned16, 16, "ushort"),
    info(PrimitiveKind::Unsigned32, 32, "uint"),
    info(PrimitiveKind::Unsigned64, 64, "ulong"),
    info(PrimitiveKind::Boolean, 8, "bool"),
    info(PrimitiveKind::Unsigned565, 16, "ushort_5_6_5"),
    info(PrimitiveKind::Unsigned5551, 16, "ushort_5_5_5_1"),
    info(PrimitiveKind::Unsigned4444, 16, "ushort_4_4_4_4"),
    info(PrimitiveKind::Matrix2x2, 4 * 32, "rs_matrix2x2"),
    info(PrimitiveKind::Matrix3x3, 9 * 32, "rs_matrix3x3"),
    info(PrimitiveKind::Matrix4x4, 16 * 32, "rs_matrix4x4"),
    info(PrimitiveKind::Element, 32, "rs_element"),
    info(PrimitiveKind::Type, 32, "rs_type"),
    info(PrimitiveKind::Allocation, 32, "rs_allocation"),
    info(PrimitiveKind::Sampler, 32, "rs_sampler"),
    info(PrimitiveKind::Script, 32, "rs_script"),
    info(PrimitiveKind::Mesh, 32, "rs_mesh"),
    info(PrimitiveKind::Path, 32, "rs_path"),
    info(PrimitiveKind::ProgramFragment, 32, "rs_program_fragment"),
    info(PrimitiveKind::ProgramVertex, 32, "rs_program_vertex"),
    info(PrimitiveKind::ProgramRaster, 32, "rs_program_raster"),
    info(PrimitiveKind::ProgramStore, 32, "rs_program_store"),
    info(PrimitiveKind::Font, 32, "rs_font"),
];

impl PrimitiveKind {
    pub const FIRST_MATRIX: PrimitiveKind = PrimitiveKind::Matrix2x2;
    pub const LAST_MATRIX: PrimitiveKind = PrimitiveKind::Matrix4x4;
    pub const FIRST_OBJECT: PrimitiveKind = PrimitiveKind::Element;
    pub const LAST_OBJECT: PrimitiveKind = PrimitiveKind::Font;

    pub fn all() -> impl Iterator<Item = PrimitiveKind> {
        CATALOG.iter().map(|entry| entry.kind)
    }

    fn info(self) -> &'static KindInfo {
        &CATALOG[self as usize]
    }

    pub fn size_in_bits(self) -> u32 {
        self.info().bits
    }

    /// Canonical source spelling; reserved record names for handles and matrices.
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Opaque reference-counted runtime handle.
    pub fn is_object(self) -> bool {
        self >= Self::FIRST_OBJECT && self <= Self::LAST_OBJECT
    }

    /// Tag-only kinds that are always represented by a matrix node.
    pub fn is_matrix(self) -> bool {
        self >= Self::FIRST_MATRIX && self <= Self::LAST_MATRIX
    }

    pub fn matrix_dim(self) -> Option<u8> {
        match self {
            PrimitiveKind::Matrix2x2 => Some(2),
            PrimitiveKind::Matrix3x3 => Some(3),
            PrimitiveKind::Matrix4x4 => Some(4),
            _ => None,
        }
    }

    pub fn matrix_for_dim(dim: u8) -> Option<PrimitiveKind> {
        match dim {
            2 => Some(PrimitiveKind::Matrix2x2),
            3 => Some(PrimitiveKind::Matrix3x3),
            4 => Some(PrimitiveKind::Matrix4x4),
            _ => None,
        }
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            PrimitiveKind::Unsigned8
                | PrimitiveKind::Unsigned16
                | PrimitiveKind::Unsigned32
                | PrimitiveKind::Unsigned64
                | PrimitiveKind::Unsigned565
                | PrimitiveKind::Unsigned5551
                | PrimitiveKind::Unsigned4444
        )
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            PrimitiveKind::Float16 | PrimitiveKind::Float32 | PrimitiveKind::Float64
        )
    }

    pub fn lookup_by_name(name: &str) -> Option<PrimitiveKind> {
        CATALOG
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.kind)
    }

    pub fn from_u8(value: u8) -> Option<PrimitiveKind> {
        CATALOG.get(value as usize).map(|entry| entry.kind)
    }

    /// Supported builtin scalars. Platform-width and oversized types map to `None`.
    pub fn from_builtin(kind: BuiltinKind) -> Option<PrimitiveKind> {
        match kind {
            BuiltinKind::Bool => Some(PrimitiveKind::Boolean),
            BuiltinKind::CharS | BuiltinKind::SChar => Some(PrimitiveKind::Signed8),
            BuiltinKind::CharU | BuiltinKind::UChar => Some(PrimitiveKind::Unsigned8),
            BuiltinKind::Short => Some(PrimitiveKind::Signed16),
            BuiltinKind::UShort => Some(PrimitiveKind::Unsigned16),
            BuiltinKind::Int => Some(PrimitiveKind::Signed32),
            BuiltinKind::UInt => Some(PrimitiveKind::Unsigned32),
            BuiltinKind::Long | BuiltinKind::LongLong => Some(PrimitiveKind::Signed64),
            BuiltinKind::ULong | BuiltinKind::ULongLong => Some(PrimitiveKind::Unsigned64),
            BuiltinKind::Half => Some(PrimitiveKind::Float16),
            BuiltinKind::Float => Some(PrimitiveKind::Float32),
            BuiltinKind::Double => Some(PrimitiveKind::Float64),
            BuiltinKind::Void
            | BuiltinKind::LongDouble
            | BuiltinKind::WChar
            | BuiltinKind::Int128 => None,
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
