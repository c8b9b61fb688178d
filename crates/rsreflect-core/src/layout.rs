//! Target storage layout of exported types
//!
//! Sizes follow the C data layout the script compiler uses: natural
//! alignment, 3-wide vectors allocated as 4-wide, one-byte booleans and
//! runtime handles stored as a packed 32-bit word. Record sizes are taken
//! from the layout computed when the record node was built.

use serde::Serialize;

use crate::primitive::PrimitiveKind;
use crate::types::{TypeArena, TypeId, TypeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct StorageId(u32);

impl StorageId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Target-independent storage shape, in the spirit of an LLVM type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StorageType {
    Int { bits: u32 },
    Float { bits: u32 },
    Vector { element: StorageId, count: u8 },
    Array { element: StorageId, len: u32 },
    Struct { fields: Vec<StorageId>, packed: bool },
    Pointer(StorageId),
    /// Forward declaration standing in for a record still being realized
    Abstract(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageTable {
    types: Vec<StorageType>,
}

impl StorageTable {
    pub fn get(&self, id: StorageId) -> &StorageType {
        &self.types[id.index()]
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn push(&mut self, ty: StorageType) -> StorageId {
        self.types.push(ty);
        StorageId(self.types.len() as u32 - 1)
    }

    fn replace(&mut self, id: StorageId, ty: StorageType) {
        self.types[id.index()] = ty;
    }
}

/// Incremental C struct layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordLayout {
    size: usize,
    align: usize,
    packed: bool,
}

impl RecordLayout {
    pub fn new(packed: bool) -> Self {
        Self {
            size: 0,
            align: 1,
            packed,
        }
    }

    /// Places a field and returns its byte offset.
    pub fn push(&mut self, size: usize, align: usize) -> usize {
        let align = if self.packed { 1 } else { align.max(1) };
        let offset = align_to(self.size, align);
        self.size = offset + size;
        self.align = self.align.max(align);
        offset
    }

    pub fn alignment(&self) -> usize {
        self.align
    }

    /// Total allocated size including tail padding.
    pub fn finish(&self) -> usize {
        align_to(self.size, self.align)
    }
}

pub fn align_to(value: usize, align: usize) -> usize {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

fn primitive_bytes(kind: PrimitiveKind) -> usize {
    (kind.size_in_bits() as usize).div_ceil(8)
}

fn vector_alloc_count(count: u8) -> usize {
    if count == 3 {
        4
    } else {
        count as usize
    }
}

impl TypeArena {
    /// Bytes actually written when storing a value, excluding padding.
    pub fn store_size(&self, id: TypeId) -> usize {
        match self.get(id).kind() {
            TypeKind::Primitive { kind, .. } => primitive_bytes(*kind),
            TypeKind::Vector { element, count } => primitive_bytes(*element) * *count as usize,
            TypeKind::ConstantArray { .. } | TypeKind::Record { .. } => self.alloc_size(id),
            TypeKind::Pointer { .. } | TypeKind::Matrix { .. } => self.alloc_size(id),
        }
    }

    pub fn store_size_bits(&self, id: TypeId) -> usize {
        self.store_size(id) * 8
    }

    /// Stride between consecutive values in memory.
    pub fn alloc_size(&self, id: TypeId) -> usize {
        match self.get(id).kind() {
            TypeKind::Primitive { kind, .. } => primitive_bytes(*kind),
            TypeKind::Vector { element, count } => {
                primitive_bytes(*element) * vector_alloc_count(*count)
            }
            TypeKind::Pointer { .. } => self.pointer_width().bytes(),
            TypeKind::Matrix { dim } => (*dim as usize) * (*dim as usize) * 4,
            TypeKind::ConstantArray { element, size } => self.alloc_size(*element) * *size as usize,
            TypeKind::Record { alloc_size, .. } => *alloc_size,
        }
    }

    pub fn alignment(&self, id: TypeId) -> usize {
        match self.get(id).kind() {
            TypeKind::Primitive { kind, .. } => primitive_bytes(*kind).max(1),
            TypeKind::Vector { .. } => self.alloc_size(id),
            TypeKind::Pointer { .. } => self.pointer_width().bytes(),
            TypeKind::Matrix { .. } => 4,
            TypeKind::ConstantArray { element, .. } => self.alignment(*element),
            TypeKind::Record { fields, packed, .. } => {
                if *packed {
                    1
                } else {
                    fields
                        .iter()
                        .map(|f| self.alignment(f.ty))
                        .max()
                        .unwrap_or(1)
                }
            }
        }
    }

    /// Lays out `(size, align)` pairs in order, returning offsets and total size.
    pub fn layout_fields(&self, fields: &[TypeId], packed: bool) -> (Vec<usize>, usize) {
        let mut layout = RecordLayout::new(packed);
        let offsets = fields
            .iter()
            .map(|&ty| layout.push(self.alloc_size(ty), self.alignment(ty)))
            .collect();
        (offsets, layout.finish())
    }

    /// Builds (once) the storage shape of a node.
    pub fn realize(&mut self, id: TypeId) -> StorageId {
        if let Some(done) = self.realized[id.index()] {
            return done;
        }
        let kind = self.get(id).kind().clone();
        let storage = match kind {
            TypeKind::Primitive { kind, .. } => self.realize_primitive(kind),
            TypeKind::Pointer { pointee } => {
                let pointee = self.realize(pointee);
                self.storage.push(StorageType::Pointer(pointee))
            }
            TypeKind::Vector { element, count } => {
                let element = self.realize_primitive(element);
                self.storage.push(StorageType::Vector { element, count })
            }
            TypeKind::Matrix { dim } => {
                let float = self.storage.push(StorageType::Float { bits: 32 });
                let values = self.storage.push(StorageType::Array {
                    element: float,
                    len: dim as u32 * dim as u32,
                });
                self.storage.push(StorageType::Struct {
                    fields: vec![values],
                    packed: false,
                })
            }
            TypeKind::ConstantArray { element, size } => {
                let element = self.realize(element);
                self.storage.push(StorageType::Array { element, len: size })
            }
            TypeKind::Record { fields, packed, .. } => {
                let name = self.name(id).to_string();
                let placeholder = self.storage.push(StorageType::Abstract(name));
                self.realized[id.index()] = Some(placeholder);
                let members = fields.iter().map(|f| self.realize(f.ty)).collect();
                self.storage.replace(
                    placeholder,
                    StorageType::Struct {
                        fields: members,
                        packed,
                    },
                );
                placeholder
            }
        };
        self.realized[id.index()] = Some(storage);
        storage
    }

    fn realize_primitive(&mut self, kind: PrimitiveKind) -> StorageId {
        let shape = match kind {
            PrimitiveKind::Float16 | PrimitiveKind::Float32 | PrimitiveKind::Float64 => {
                StorageType::Float {
                    bits: kind.size_in_bits(),
                }
            }
            PrimitiveKind::Boolean => StorageType::Int { bits: 1 },
            k if k.is_object() => {
                let word = self.storage.push(StorageType::Int { bits: 32 });
                let handle = self.storage.push(StorageType::Array {
                    element: word,
                    len: 1,
                });
                StorageType::Struct {
                    fields: vec![handle],
                    packed: true,
                }
            }
            k => StorageType::Int {
                bits: k.size_in_bits(),
            },
        };
        self.storage.push(shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PointerWidth;
    use crate::types::Field;

    #[test]
    fn test_record_layout_natural_alignment() {
        let mut layout = RecordLayout::new(false);
        assert_eq!(layout.push(1, 1), 0);
        assert_eq!(layout.push(4, 4), 4);
        assert_eq!(layout.push(2, 2), 8);
        assert_eq!(layout.finish(), 12);
    }

    #[test]
    fn test_record_layout_packed() {
        let mut layout = RecordLayout::new(true);
        assert_eq!(layout.push(1, 1), 0);
        assert_eq!(layout.push(4, 4), 1);
        assert_eq!(layout.finish(), 5);
    }

    #[test]
    fn test_sizes() {
        let mut arena = TypeArena::new(PointerWidth::Bits64);
        let b = arena.primitive(PrimitiveKind::Boolean, false);
        let f3 = arena.vector(PrimitiveKind::Float32, 3);
        let ptr = arena.pointer("*bool", b);
        let m4 = arena.matrix(4);
        let alloc = arena.primitive(PrimitiveKind::Allocation, false);
        let arr = arena.constant_array(f3, 2);

        assert_eq!(arena.alloc_size(b), 1);
        assert_eq!(arena.store_size(f3), 12);
        assert_eq!(arena.alloc_size(f3), 16);
        assert_eq!(arena.alignment(f3), 16);
        assert_eq!(arena.alloc_size(ptr), 8);
        assert_eq!(arena.alloc_size(m4), 64);
        assert_eq!(arena.alloc_size(alloc), 4);
        assert_eq!(arena.alloc_size(arr), 32);
        assert_eq!(arena.store_size_bits(b), 8);
    }

    #[test]
    fn test_realize_memoizes() {
        let mut arena = TypeArena::new(PointerWidth::Bits32);
        let int = arena.primitive(PrimitiveKind::Signed32, false);
        let first = arena.realize(int);
        let second = arena.realize(int);
        assert_eq!(first, second);
        assert_eq!(arena.storage().get(first), &StorageType::Int { bits: 32 });
    }

    #[test]
    fn test_realize_object_handle() {
        let mut arena = TypeArena::new(PointerWidth::Bits32);
        let alloc = arena.primitive(PrimitiveKind::Allocation, false);
        let id = arena.realize(alloc);
        match arena.storage().get(id) {
            StorageType::Struct { fields, packed } => {
                assert!(*packed);
                assert_eq!(fields.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_realize_self_referential_record() {
        let mut arena = TypeArena::new(PointerWidth::Bits32);
        let node = arena.begin_record("Node", false, false);
        let ptr = arena.pointer("*Node", node);
        let int = arena.primitive(PrimitiveKind::Signed32, false);
        arena.finish_record(
            node,
            vec![
                Field {
                    name: "value".to_string(),
                    ty: int,
                    offset: 0,
                },
                Field {
                    name: "next".to_string(),
                    ty: ptr,
                    offset: 4,
                },
            ],
            8,
        );

        let realized = arena.realize(node);
        let fields = match arena.storage().get(realized) {
            StorageType::Struct { fields, .. } => fields.clone(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(
            arena.storage().get(fields[1]),
            &StorageType::Pointer(realized)
        );
    }

    #[test]
    fn test_layout_fields_vec3() {
        let mut arena = TypeArena::new(PointerWidth::Bits32);
        let float = arena.primitive(PrimitiveKind::Float32, false);
        let f3 = arena.vector(PrimitiveKind::Float32, 3);
        let (offsets, size) = arena.layout_fields(&[float, f3], false);
        assert_eq!(offsets, vec![0, 16]);
        assert_eq!(size, 32);
    }
}
