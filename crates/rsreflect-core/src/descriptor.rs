//! Portable type descriptors for out-of-process generators
//!
//! A [`DescriptorTable`] is a flat list of POD-like nodes plus a string
//! table. Nodes refer to each other by index, so a record reachable from
//! itself through a pointer is just a back reference.
//!
//! Binary layout (little endian):
//!
//! ```text
//! "RSTD" | version u16 | string count u16 | node count u16
//! strings: (len u16, utf-8 bytes)*
//! nodes:   class u8, payload
//!   Primitive      data type u8
//!   Pointer        pointee u16
//!   Vector         data type u8, count u8
//!   Matrix         data type u8
//!   ConstantArray  count u24, element u16
//!   Record         name u16, field count u16, (name u16, type u16)*
//! ```

use serde::Serialize;

use crate::error::CoreError;
use crate::primitive::PrimitiveKind;
use crate::types::{TypeArena, TypeClass, TypeId, TypeKind};

pub const MAGIC: &[u8; 4] = b"RSTD";
pub const FORMAT_VERSION: u16 = 1;

const MAX_ARRAY_COUNT: u32 = (1 << 24) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DescId(u32);

impl DescId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct StringId(u32);

impl StringId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum DescriptorNode {
    Primitive {
        data_type: PrimitiveKind,
    },
    Pointer {
        pointee: DescId,
    },
    Vector {
        data_type: PrimitiveKind,
        count: u8,
    },
    Matrix {
        data_type: PrimitiveKind,
    },
    ConstantArray {
        element: DescId,
        count: u32,
    },
    Record {
        name: StringId,
        fields: Vec<(StringId, DescId)>,
    },
}

impl DescriptorNode {
    pub fn class(&self) -> TypeClass {
        match self {
            DescriptorNode::Primitive { .. } => TypeClass::Primitive,
            DescriptorNode::Pointer { .. } => TypeClass::Pointer,
            DescriptorNode::Vector { .. } => TypeClass::Vector,
            DescriptorNode::Matrix { .. } => TypeClass::Matrix,
            DescriptorNode::ConstantArray { .. } => TypeClass::ConstantArray,
            DescriptorNode::Record { .. } => TypeClass::Record,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DescriptorTable {
    strings: Vec<String>,
    nodes: Vec<DescriptorNode>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: DescId) -> &DescriptorNode {
        &self.nodes[id.index()]
    }

    pub fn string(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (DescId, &DescriptorNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (DescId(index as u32), node))
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    /// Finds a record node by name.
    pub fn find_record(&self, name: &str) -> Option<DescId> {
        self.nodes().find_map(|(id, node)| match node {
            DescriptorNode::Record { name: n, .. } if self.string(*n) == name => Some(id),
            _ => None,
        })
    }

    pub fn intern(&mut self, value: &str) -> StringId {
        if let Some(index) = self.strings.iter().position(|s| s == value) {
            return StringId(index as u32);
        }
        self.strings.push(value.to_string());
        StringId(self.strings.len() as u32 - 1)
    }

    pub fn push(&mut self, node: DescriptorNode) -> DescId {
        self.nodes.push(node);
        DescId(self.nodes.len() as u32 - 1)
    }

    fn set_fields(&mut self, id: DescId, new_fields: Vec<(StringId, DescId)>) {
        if let DescriptorNode::Record { fields, .. } = &mut self.nodes[id.index()] {
            *fields = new_fields;
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        let string_count = u16::try_from(self.strings.len())
            .map_err(|_| CoreError::InvalidDescriptor("too many strings".to_string()))?;
        let node_count = u16::try_from(self.nodes.len())
            .map_err(|_| CoreError::InvalidDescriptor("too many nodes".to_string()))?;

        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&string_count.to_le_bytes());
        out.extend_from_slice(&node_count.to_le_bytes());

        for value in &self.strings {
            let len = u16::try_from(value.len()).map_err(|_| {
                CoreError::InvalidDescriptor(format!("string of {} bytes", value.len()))
            })?;
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(value.as_bytes());
        }

        for node in &self.nodes {
            out.push(node.class() as u8);
            match node {
                DescriptorNode::Primitive { data_type } | DescriptorNode::Matrix { data_type } => {
                    out.push(*data_type as u8)
                }
                DescriptorNode::Vector { data_type, count } => {
                    out.push(*data_type as u8);
                    out.push(*count);
                }
                DescriptorNode::Pointer { pointee } => put_ref(&mut out, pointee.0)?,
                DescriptorNode::ConstantArray { element, count } => {
                    if *count > MAX_ARRAY_COUNT {
                        return Err(CoreError::InvalidDescriptor(format!(
                            "array count {} exceeds 24 bits",
                            count
                        )));
                    }
                    out.extend_from_slice(&count.to_le_bytes()[..3]);
                    put_ref(&mut out, element.0)?;
                }
                DescriptorNode::Record { name, fields } => {
                    put_ref(&mut out, name.0)?;
                    put_ref(&mut out, fields.len() as u32)?;
                    for (field_name, ty) in fields {
                        put_ref(&mut out, field_name.0)?;
                        put_ref(&mut out, ty.0)?;
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<DescriptorTable, CoreError> {
        let mut reader = Reader { bytes, pos: 0 };
        if reader.take(4)? != MAGIC {
            return Err(CoreError::InvalidDescriptor("bad magic".to_string()));
        }
        let version = reader.u16()?;
        if version != FORMAT_VERSION {
            return Err(CoreError::InvalidDescriptor(format!(
                "unsupported format version {}",
                version
            )));
        }
        let string_count = reader.u16()? as u32;
        let node_count = reader.u16()? as u32;

        let mut table = DescriptorTable::new();
        for _ in 0..string_count {
            let len = reader.u16()? as usize;
            let raw = reader.take(len)?;
            let value = std::str::from_utf8(raw)
                .map_err(|e| CoreError::InvalidDescriptor(format!("string table: {}", e)))?;
            table.strings.push(value.to_string());
        }

        let string = |id: u16| -> Result<StringId, CoreError> {
            if (id as u32) < string_count {
                Ok(StringId(id as u32))
            } else {
                Err(CoreError::InvalidDescriptor(format!("string ref {} out of range", id)))
            }
        };
        let node_ref = |id: u16| -> Result<DescId, CoreError> {
            if (id as u32) < node_count {
                Ok(DescId(id as u32))
            } else {
                Err(CoreError::InvalidDescriptor(format!("node ref {} out of range", id)))
            }
        };

        for _ in 0..node_count {
            let tag = reader.u8()?;
            let class = TypeClass::from_u8(tag)
                .ok_or_else(|| CoreError::InvalidDescriptor(format!("unknown class tag {}", tag)))?;
            let node = match class {
                TypeClass::Primitive => DescriptorNode::Primitive {
                    data_type: reader.data_type()?,
                },
                TypeClass::Pointer => DescriptorNode::Pointer {
                    pointee: node_ref(reader.u16()?)?,
                },
                TypeClass::Vector => DescriptorNode::Vector {
                    data_type: reader.data_type()?,
                    count: reader.u8()?,
                },
                TypeClass::Matrix => DescriptorNode::Matrix {
                    data_type: reader.data_type()?,
                },
                TypeClass::ConstantArray => {
                    let raw = reader.take(3)?;
                    let count = u32::from_le_bytes([raw[0], raw[1], raw[2], 0]);
                    DescriptorNode::ConstantArray {
                        count,
                        element: node_ref(reader.u16()?)?,
                    }
                }
                TypeClass::Record => {
                    let name = string(reader.u16()?)?;
                    let field_count = reader.u16()?;
                    let mut fields = Vec::with_capacity(field_count as usize);
                    for _ in 0..field_count {
                        let field_name = string(reader.u16()?)?;
                        fields.push((field_name, node_ref(reader.u16()?)?));
                    }
                    DescriptorNode::Record { name, fields }
                }
            };
            table.nodes.push(node);
        }

        if reader.pos != bytes.len() {
            return Err(CoreError::InvalidDescriptor(format!(
                "{} trailing bytes",
                bytes.len() - reader.pos
            )));
        }
        Ok(table)
    }
}

fn put_ref(out: &mut Vec<u8>, value: u32) -> Result<(), CoreError> {
    let value = u16::try_from(value)
        .map_err(|_| CoreError::InvalidDescriptor(format!("reference {} exceeds u16", value)))?;
    out.extend_from_slice(&value.to_le_bytes());
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], CoreError> {
        let end = self.pos + len;
        let slice = self.bytes.get(self.pos..end).ok_or_else(|| {
            CoreError::InvalidDescriptor(format!("truncated at byte {}", self.pos))
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CoreError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CoreError> {
        let raw = self.take(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn data_type(&mut self) -> Result<PrimitiveKind, CoreError> {
        let raw = self.u8()?;
        PrimitiveKind::from_u8(raw)
            .ok_or_else(|| CoreError::InvalidDescriptor(format!("unknown data type {}", raw)))
    }
}

impl TypeArena {
    /// Builds (once) the descriptor node for a type, recursing into children.
    pub fn to_descriptor(&mut self, id: TypeId) -> DescId {
        if let Some(done) = self.described[id.index()] {
            return done;
        }
        let kind = self.get(id).kind().clone();
        let desc = match kind {
            TypeKind::Primitive { kind, .. } => self
                .descriptors
                .push(DescriptorNode::Primitive { data_type: kind }),
            TypeKind::Vector { element, count } => self.descriptors.push(DescriptorNode::Vector {
                data_type: element,
                count,
            }),
            TypeKind::Matrix { dim } => {
                let data_type = PrimitiveKind::matrix_for_dim(dim).unwrap_or(PrimitiveKind::Matrix4x4);
                self.descriptors.push(DescriptorNode::Matrix { data_type })
            }
            TypeKind::Pointer { pointee } => {
                let pointee = self.to_descriptor(pointee);
                self.descriptors.push(DescriptorNode::Pointer { pointee })
            }
            TypeKind::ConstantArray { element, size } => {
                let element = self.to_descriptor(element);
                self.descriptors.push(DescriptorNode::ConstantArray {
                    element,
                    count: size,
                })
            }
            TypeKind::Record { fields, .. } => {
                let record_name = self.get(id).name().to_string();
                let name = self.descriptors.intern(&record_name);
                let record = self.descriptors.push(DescriptorNode::Record {
                    name,
                    fields: Vec::new(),
                });
                self.described[id.index()] = Some(record);
                let described = fields
                    .iter()
                    .map(|f| {
                        let field_name = self.descriptors.intern(&f.name);
                        (field_name, self.to_descriptor(f.ty))
                    })
                    .collect();
                self.descriptors.set_fields(record, described);
                record
            }
        };
        self.described[id.index()] = Some(desc);
        desc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PointerWidth;
    use crate::types::Field;

    fn linked_list() -> (TypeArena, TypeId) {
        let mut arena = TypeArena::new(PointerWidth::Bits32);
        let node = arena.begin_record("Node", false, false);
        let ptr = arena.pointer("*Node", node);
        let f4 = arena.vector(PrimitiveKind::Float32, 4);
        let values = arena.constant_array(f4, 3);
        arena.finish_record(
            node,
            vec![
                Field {
                    name: "values".to_string(),
                    ty: values,
                    offset: 0,
                },
                Field {
                    name: "next".to_string(),
                    ty: ptr,
                    offset: 48,
                },
            ],
            64,
        );
        (arena, node)
    }

    #[test]
    fn test_self_reference_becomes_back_edge() {
        let (mut arena, node) = linked_list();
        let desc = arena.to_descriptor(node);
        let table = arena.descriptors();
        let fields = match table.node(desc) {
            DescriptorNode::Record { name, fields } => {
                assert_eq!(table.string(*name), "Node");
                fields.clone()
            }
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(table.string(fields[1].0), "next");
        assert_eq!(
            table.node(fields[1].1),
            &DescriptorNode::Pointer { pointee: desc }
        );
        assert_eq!(arena.to_descriptor(node), desc);
    }

    #[test]
    fn test_binary_encoding_reads_back() {
        let (mut arena, node) = linked_list();
        arena.to_descriptor(node);
        let bytes = arena.descriptors().encode().unwrap();
        assert_eq!(&bytes[..4], MAGIC);
        let decoded = DescriptorTable::decode(&bytes).unwrap();
        assert_eq!(&decoded, arena.descriptors());
        assert!(decoded.find_record("Node").is_some());
    }

    #[test]
    fn test_array_count_is_24_bits() {
        let mut table = DescriptorTable::new();
        let float = table.push(DescriptorNode::Primitive {
            data_type: PrimitiveKind::Float32,
        });
        table.push(DescriptorNode::ConstantArray {
            element: float,
            count: 0x0102_03,
        });
        let bytes = table.encode().unwrap();
        // header (10) + primitive (2) + class tag
        assert_eq!(&bytes[13..16], &[0x03, 0x02, 0x01]);

        table.push(DescriptorNode::ConstantArray {
            element: float,
            count: 1 << 24,
        });
        assert!(matches!(table.encode(), Err(CoreError::InvalidDescriptor(_))));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(DescriptorTable::decode(b"NOPE").is_err());
        let mut table = DescriptorTable::new();
        table.push(DescriptorNode::Primitive {
            data_type: PrimitiveKind::Boolean,
        });
        let mut bytes = table.encode().unwrap();
        bytes.push(0);
        assert!(DescriptorTable::decode(&bytes).is_err());
        bytes.truncate(bytes.len() - 2);
        assert!(DescriptorTable::decode(&bytes).is_err());
    }
}
