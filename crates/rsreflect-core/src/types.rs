//! Closed algebra of exported types
//!
//! Nodes live in a [`TypeArena`] and refer to each other by [`TypeId`].
//! Many fields and pointers may share one record node, and a record can
//! reach itself through a pointer, so the graph is not a tree. Every pass
//! over it (equality, realize, descriptor conversion, keep, adopt) is
//! written to terminate on cycles.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::api::PointerWidth;
use crate::descriptor::{DescId, DescriptorTable};
use crate::layout::{StorageId, StorageTable};
use crate::primitive::PrimitiveKind;

/// Names starting with this are placeholders and never enter a name cache.
pub const RESERVED_NAME_PREFIX: &str = "<";
pub const CONSTANT_ARRAY_TYPE_NAME: &str = "<ConstantArray>";

pub fn is_reserved_name(name: &str) -> bool {
    name.starts_with(RESERVED_NAME_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TypeId(u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum TypeClass {
    Primitive = 0,
    Pointer = 1,
    Vector = 2,
    Matrix = 3,
    ConstantArray = 4,
    Record = 5,
}

impl TypeClass {
    pub fn from_u8(value: u8) -> Option<TypeClass> {
        match value {
            0 => Some(TypeClass::Primitive),
            1 => Some(TypeClass::Pointer),
            2 => Some(TypeClass::Vector),
            3 => Some(TypeClass::Matrix),
            4 => Some(TypeClass::ConstantArray),
            5 => Some(TypeClass::Record),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    pub ty: TypeId,
    /// Byte offset from the start of the enclosing record
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TypeKind {
    Primitive {
        kind: PrimitiveKind,
        /// Source spelling differed from the canonical name
        normalized: bool,
    },
    Pointer {
        pointee: TypeId,
    },
    Vector {
        element: PrimitiveKind,
        count: u8,
    },
    Matrix {
        dim: u8,
    },
    ConstantArray {
        element: TypeId,
        size: u32,
    },
    Record {
        fields: Vec<Field>,
        packed: bool,
        /// Compiler-synthesized, never reflected or ODR-checked
        artificial: bool,
        alloc_size: usize,
    },
}

impl TypeKind {
    pub fn class(&self) -> TypeClass {
        match self {
            TypeKind::Primitive { .. } => TypeClass::Primitive,
            TypeKind::Pointer { .. } => TypeClass::Pointer,
            TypeKind::Vector { .. } => TypeClass::Vector,
            TypeKind::Matrix { .. } => TypeClass::Matrix,
            TypeKind::ConstantArray { .. } => TypeClass::ConstantArray,
            TypeKind::Record { .. } => TypeClass::Record,
        }
    }

    fn children(&self) -> Vec<TypeId> {
        match self {
            TypeKind::Pointer { pointee } => vec![*pointee],
            TypeKind::ConstantArray { element, .. } => vec![*element],
            TypeKind::Record { fields, .. } => fields.iter().map(|f| f.ty).collect(),
            TypeKind::Primitive { .. } | TypeKind::Vector { .. } | TypeKind::Matrix { .. } => {
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeNode {
    name: String,
    kind: TypeKind,
    kept: bool,
}

impl TypeNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    pub fn class(&self) -> TypeClass {
        self.kind.class()
    }

    pub fn is_kept(&self) -> bool {
        self.kept
    }

    pub fn is_artificial(&self) -> bool {
        matches!(self.kind, TypeKind::Record { artificial: true, .. })
    }

    pub fn fields(&self) -> &[Field] {
        match &self.kind {
            TypeKind::Record { fields, .. } => fields,
            _ => &[],
        }
    }

    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        match self.kind {
            TypeKind::Primitive { kind, .. } => Some(kind),
            TypeKind::Vector { element, .. } => Some(element),
            TypeKind::Matrix { dim } => PrimitiveKind::matrix_for_dim(dim),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualityMode {
    /// Variant, kinds, sizes and field types
    Structural,
    /// Structural plus positional field names, for cross-unit checks
    FieldNames,
}

/// Owner of every node created while exporting one file.
#[derive(Debug, Clone)]
pub struct TypeArena {
    pointer_width: PointerWidth,
    nodes: Vec<TypeNode>,
    pub(crate) realized: Vec<Option<StorageId>>,
    pub(crate) described: Vec<Option<DescId>>,
    pub(crate) storage: StorageTable,
    pub(crate) descriptors: DescriptorTable,
}

impl TypeArena {
    pub fn new(pointer_width: PointerWidth) -> Self {
        Self {
            pointer_width,
            nodes: Vec::new(),
            realized: Vec::new(),
            described: Vec::new(),
            storage: StorageTable::default(),
            descriptors: DescriptorTable::default(),
        }
    }

    pub fn pointer_width(&self) -> PointerWidth {
        self.pointer_width
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: TypeId) -> &TypeNode {
        &self.nodes[id.index()]
    }

    pub fn name(&self, id: TypeId) -> &str {
        self.get(id).name()
    }

    pub fn class(&self, id: TypeId) -> TypeClass {
        self.get(id).class()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (TypeId(index as u32), node))
    }

    pub fn storage(&self) -> &StorageTable {
        &self.storage
    }

    pub fn descriptors(&self) -> &DescriptorTable {
        &self.descriptors
    }

    fn alloc(&mut self, name: String, kind: TypeKind) -> TypeId {
        let id = TypeId(self.nodes.len() as u32);
        self.nodes.push(TypeNode {
            name,
            kind,
            kept: false,
        });
        self.realized.push(None);
        self.described.push(None);
        id
    }

    pub fn primitive(&mut self, kind: PrimitiveKind, normalized: bool) -> TypeId {
        debug_assert!(!kind.is_matrix(), "matrices have their own node");
        self.alloc(kind.name().to_string(), TypeKind::Primitive { kind, normalized })
    }

    pub fn pointer(&mut self, name: impl Into<String>, pointee: TypeId) -> TypeId {
        debug_assert!(
            self.class(pointee) != TypeClass::Pointer,
            "pointee must not itself be a pointer"
        );
        self.alloc(name.into(), TypeKind::Pointer { pointee })
    }

    pub fn vector(&mut self, element: PrimitiveKind, count: u8) -> TypeId {
        debug_assert!((2..=4).contains(&count), "vector width {}", count);
        self.alloc(
            format!("{}{}", element.name(), count),
            TypeKind::Vector { element, count },
        )
    }

    pub fn matrix(&mut self, dim: u8) -> TypeId {
        let name = PrimitiveKind::matrix_for_dim(dim)
            .map(|kind| kind.name().to_string())
            .unwrap_or_else(|| format!("rs_matrix{}x{}", dim, dim));
        debug_assert!((2..=4).contains(&dim), "matrix dimension {}", dim);
        self.alloc(name, TypeKind::Matrix { dim })
    }

    pub fn constant_array(&mut self, element: TypeId, size: u32) -> TypeId {
        debug_assert!(size > 0, "constant arrays are never empty");
        debug_assert!(
            self.class(element) != TypeClass::ConstantArray,
            "multi-dimensional arrays are not representable"
        );
        self.alloc(
            CONSTANT_ARRAY_TYPE_NAME.to_string(),
            TypeKind::ConstantArray { element, size },
        )
    }

    /// Allocates a record with no fields yet, so that field construction
    /// can already refer to it.
    pub fn begin_record(&mut self, name: impl Into<String>, packed: bool, artificial: bool) -> TypeId {
        self.alloc(
            name.into(),
            TypeKind::Record {
                fields: Vec::new(),
                packed,
                artificial,
                alloc_size: 0,
            },
        )
    }

    pub fn finish_record(&mut self, id: TypeId, new_fields: Vec<Field>, new_alloc_size: usize) {
        if let TypeKind::Record {
            fields, alloc_size, ..
        } = &mut self.nodes[id.index()].kind
        {
            *fields = new_fields;
            *alloc_size = new_alloc_size;
        } else {
            debug_assert!(false, "finish_record on a non-record node");
        }
    }

    pub fn equals(&self, a: TypeId, b: TypeId) -> bool {
        Self::equals_across(self, a, self, b, EqualityMode::Structural)
    }

    /// Structural comparison of nodes that may live in different arenas.
    pub fn equals_across(
        lhs: &TypeArena,
        a: TypeId,
        rhs: &TypeArena,
        b: TypeId,
        mode: EqualityMode,
    ) -> bool {
        let mut in_progress = HashSet::new();
        Self::equals_inner(lhs, a, rhs, b, mode, &mut in_progress)
    }

    fn equals_inner(
        lhs: &TypeArena,
        a: TypeId,
        rhs: &TypeArena,
        b: TypeId,
        mode: EqualityMode,
        in_progress: &mut HashSet<(TypeId, TypeId)>,
    ) -> bool {
        // A pair already being compared further up is assumed equal.
        if !in_progress.insert((a, b)) {
            return true;
        }
        match (lhs.get(a).kind(), rhs.get(b).kind()) {
            (TypeKind::Primitive { kind: ka, .. }, TypeKind::Primitive { kind: kb, .. }) => ka == kb,
            (TypeKind::Pointer { pointee: pa }, TypeKind::Pointer { pointee: pb }) => {
                Self::equals_inner(lhs, *pa, rhs, *pb, mode, in_progress)
            }
            (
                TypeKind::Vector {
                    element: ea,
                    count: ca,
                },
                TypeKind::Vector {
                    element: eb,
                    count: cb,
                },
            ) => ea == eb && ca == cb,
            (TypeKind::Matrix { dim: da }, TypeKind::Matrix { dim: db }) => da == db,
            (
                TypeKind::ConstantArray {
                    element: ea,
                    size: sa,
                },
                TypeKind::ConstantArray {
                    element: eb,
                    size: sb,
                },
            ) => sa == sb && Self::equals_inner(lhs, *ea, rhs, *eb, mode, in_progress),
            (TypeKind::Record { fields: fa, .. }, TypeKind::Record { fields: fb, .. }) => {
                fa.len() == fb.len()
                    && fa.iter().zip(fb).all(|(x, y)| {
                        (mode == EqualityMode::Structural || x.name == y.name)
                            && Self::equals_inner(lhs, x.ty, rhs, y.ty, mode, in_progress)
                    })
            }
            _ => false,
        }
    }

    /// Marks a node and everything it references as surviving its owner's
    /// reset. Memoized projections of newly kept nodes are dropped.
    pub fn keep(&mut self, id: TypeId) {
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let node = &mut self.nodes[current.index()];
            if node.kept {
                continue;
            }
            node.kept = true;
            self.realized[current.index()] = None;
            self.described[current.index()] = None;
            pending.extend(self.nodes[current.index()].kind.children());
        }
    }

    /// Deep-copies a node graph from another arena. `existing` maps record
    /// names to nodes already owned here, which are reused instead of copied.
    pub fn adopt(
        &mut self,
        from: &TypeArena,
        id: TypeId,
        existing: &HashMap<String, TypeId>,
    ) -> TypeId {
        let mut copied = HashMap::new();
        self.adopt_inner(from, id, existing, &mut copied)
    }

    fn adopt_inner(
        &mut self,
        from: &TypeArena,
        id: TypeId,
        existing: &HashMap<String, TypeId>,
        copied: &mut HashMap<TypeId, TypeId>,
    ) -> TypeId {
        if let Some(&done) = copied.get(&id) {
            return done;
        }
        let source = from.get(id);
        let adopted = match source.kind() {
            TypeKind::Record {
                fields,
                packed,
                artificial,
                alloc_size,
            } => {
                if let Some(&known) = existing.get(source.name()) {
                    copied.insert(id, known);
                    return known;
                }
                let record = self.begin_record(source.name(), *packed, *artificial);
                copied.insert(id, record);
                let new_fields = fields
                    .iter()
                    .map(|f| Field {
                        name: f.name.clone(),
                        ty: self.adopt_inner(from, f.ty, existing, copied),
                        offset: f.offset,
                    })
                    .collect();
                self.finish_record(record, new_fields, *alloc_size);
                record
            }
            TypeKind::Pointer { pointee } => {
                let pointee = self.adopt_inner(from, *pointee, existing, copied);
                self.alloc(source.name().to_string(), TypeKind::Pointer { pointee })
            }
            TypeKind::ConstantArray { element, size } => {
                let element = self.adopt_inner(from, *element, existing, copied);
                self.alloc(
                    source.name().to_string(),
                    TypeKind::ConstantArray {
                        element,
                        size: *size,
                    },
                )
            }
            other => self.alloc(source.name().to_string(), other.clone()),
        };
        copied.insert(id, adopted);
        self.nodes[adopted.index()].kept = true;
        adopted
    }
}
