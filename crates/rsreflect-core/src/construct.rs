//! Building type nodes from declared types
//!
//! Creation is memoized by name within a file. Records are registered
//! before their fields are built; a failing record is unregistered again
//! so later lookups do not see a half-built node.

use crate::ast::{BuiltinKind, QualType, RecordDecl, RecordId, SourceType, TranslationUnit};
use crate::context::ExportContext;
use crate::diagnostics::{Diagnostic, DiagnosticCategory};
use crate::export::Exportable;
use crate::primitive::PrimitiveKind;
use crate::types::{is_reserved_name, Field, TypeId, TypeKind, CONSTANT_ARRAY_TYPE_NAME};
use crate::validate::rs_specific_kind;

impl ExportContext {
    /// Name a type is registered under, or `None` for anonymous types.
    pub fn type_name(&self, unit: &TranslationUnit, ty: &QualType) -> Option<String> {
        let canonical = ty.canonical();
        match &canonical.ty {
            SourceType::Builtin(kind) => PrimitiveKind::from_builtin(*kind).map(|k| k.name().to_string()),
            SourceType::Record(id) => {
                let (_, record) = unit.definition(*id).or_else(|| unit.record(*id).map(|r| (*id, r)))?;
                record.name.clone().filter(|name| !name.is_empty())
            }
            SourceType::Pointer(pointee) => self
                .type_name(unit, pointee)
                .map(|name| format!("*{}", name)),
            SourceType::ExtVector { element, count } => match element.canonical().ty {
                SourceType::Builtin(kind) => {
                    PrimitiveKind::from_builtin(kind).map(|k| format!("{}{}", k.name(), count))
                }
                _ => None,
            },
            SourceType::ConstantArray { .. } => Some(CONSTANT_ARRAY_TYPE_NAME.to_string()),
            _ => None,
        }
    }

    /// Returns the node for an already validated type, creating it on
    /// first use.
    pub fn create_type(&mut self, unit: &TranslationUnit, ty: &QualType) -> Option<TypeId> {
        let Some(name) = self.type_name(unit, ty) else {
            self.diagnostics.push(Diagnostic::error(
                DiagnosticCategory::TypeRejected,
                "anonymous types cannot be exported",
            ));
            return None;
        };

        let spelled = ty.spelling(unit);
        let spelled = spelled.strip_prefix("const ").unwrap_or(&spelled);
        let normalized = spelled != name;
        self.construct_type(unit, &ty.canonical(), &name, normalized)
    }

    pub fn construct_type(
        &mut self,
        unit: &TranslationUnit,
        canonical: &QualType,
        name: &str,
        normalized: bool,
    ) -> Option<TypeId> {
        if !is_reserved_name(name) {
            if let Some(&id) = self.types.get(name) {
                return Some(id);
            }
        }

        let id = match &canonical.ty {
            SourceType::Builtin(kind) => {
                let kind = PrimitiveKind::from_builtin(*kind)?;
                self.arena.primitive(kind, normalized)
            }
            SourceType::Record(record) => return self.construct_record(unit, *record, name),
            SourceType::Pointer(pointee) => {
                let pointee = pointee.canonical();
                let target = if pointee.is_pointer() {
                    tracing::warn!(pointer = %name, "multi-level pointer reflected as a pointer to int");
                    self.create_type(unit, &QualType::int())?
                } else {
                    self.create_type(unit, &pointee)?
                };
                self.arena.pointer(name, target)
            }
            SourceType::ExtVector { element, count } => {
                let SourceType::Builtin(kind) = element.canonical().ty else {
                    return None;
                };
                let kind = PrimitiveKind::from_builtin(kind)?;
                let count = u8::try_from(*count).ok().filter(|c| (2..=4).contains(c))?;
                self.arena.vector(kind, count)
            }
            SourceType::ConstantArray { element, size } => {
                let size = u32::try_from(*size).ok().filter(|s| *s > 0)?;
                let element = self.create_type(unit, element)?;
                self.arena.constant_array(element, size)
            }
            _ => return None,
        };
        self.register(name, id);
        Some(id)
    }

    fn register(&mut self, name: &str, id: TypeId) {
        if !is_reserved_name(name) {
            self.insert_export_type(name, id);
        }
        self.exportables.push(Exportable::Type(id));
    }

    fn unregister(&mut self, name: &str, id: TypeId) {
        self.types.remove(name);
        self.type_order.retain(|n| n != name);
        self.exportables.retain(|e| *e != Exportable::Type(id));
    }

    fn construct_record(&mut self, unit: &TranslationUnit, record_id: RecordId, name: &str) -> Option<TypeId> {
        let (_, record) = unit.definition(record_id)?;

        if let Some(kind) = rs_specific_kind(record) {
            let id = match kind.matrix_dim() {
                Some(dim) => {
                    if !self.validate_matrix(record, dim) {
                        return None;
                    }
                    self.arena.matrix(dim)
                }
                None => self.arena.primitive(kind, false),
            };
            self.register(name, id);
            return Some(id);
        }

        let node = self.arena.begin_record(name, record.packed, false);
        self.register(name, node);

        let mut members = Vec::with_capacity(record.fields.len());
        for field in &record.fields {
            if field.bit_width.is_some() {
                self.unregister(name, node);
                return None;
            }
            match self.create_type(unit, &field.ty) {
                Some(ty) => members.push((field.name.clone(), ty)),
                None => {
                    self.diagnostics.push(
                        Diagnostic::error(
                            DiagnosticCategory::TypeRejected,
                            format!("field type cannot be exported: '{}.{}'", name, field.name),
                        )
                        .at(&field.location)
                        .for_decl(name),
                    );
                    self.unregister(name, node);
                    return None;
                }
            }
        }

        self.finish_fields(node, members);
        Some(node)
    }

    fn finish_fields(&mut self, node: TypeId, members: Vec<(String, TypeId)>) {
        let packed = match self.arena.get(node).kind() {
            TypeKind::Record { packed, .. } => *packed,
            _ => false,
        };
        let tys: Vec<TypeId> = members.iter().map(|(_, ty)| *ty).collect();
        let (offsets, alloc_size) = self.arena.layout_fields(&tys, packed);
        let fields = members
            .into_iter()
            .zip(offsets)
            .map(|((name, ty), offset)| Field { name, ty, offset })
            .collect();
        self.arena.finish_record(node, fields, alloc_size);
    }

    /// Compiler-synthesized record, e.g. the parameter packet of an
    /// invokable. Never cached by name.
    pub fn create_artificial_record(&mut self, name: &str, members: Vec<(String, TypeId)>) -> TypeId {
        let node = self.arena.begin_record(name, false, true);
        self.finish_fields(node, members);
        self.exportables.push(Exportable::Type(node));
        node
    }

    fn validate_matrix(&mut self, record: &RecordDecl, dim: u8) -> bool {
        let name = record.display_name();
        let failure = match record.fields.first() {
            None => Some(format!(
                "invalid matrix struct: must have 1 field for saving values: '{}'",
                name
            )),
            Some(first) => match first.ty.canonical().ty {
                SourceType::ConstantArray { element, size } => {
                    let expected = u64::from(dim) * u64::from(dim);
                    if !element.is_builtin(BuiltinKind::Float) {
                        Some(format!(
                            "invalid matrix struct: first field should be a float array: '{}'",
                            name
                        ))
                    } else if size != expected {
                        Some(format!(
                            "invalid matrix struct: first field should be an array with size {}: '{}'",
                            expected, name
                        ))
                    } else if record.fields.len() > 1 {
                        Some(format!(
                            "invalid matrix struct: must have exactly 1 field: '{}'",
                            name
                        ))
                    } else {
                        None
                    }
                }
                _ => Some(format!(
                    "invalid matrix struct: first field should be an array with constant size: '{}'",
                    name
                )),
            },
        };

        match failure {
            Some(message) => {
                self.diagnostics.push(
                    Diagnostic::error(DiagnosticCategory::TypeRejected, message)
                        .at(&record.location)
                        .for_decl(name),
                );
                false
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::api::{ApiLevel, TargetOptions};
    use crate::ast::UnitBuilder;
    use crate::types::TypeClass;

    fn context() -> ExportContext {
        ExportContext::new(TargetOptions::new(ApiLevel::MAX))
    }

    #[test]
    fn test_creation_is_memoized_by_name() {
        let unit = UnitBuilder::new("a.rs").build();
        let mut ctx = context();
        let a = ctx.create_type(&unit, &QualType::float()).unwrap();
        let b = ctx.create_type(&unit, &QualType::typedef("float_t", QualType::float())).unwrap();
        assert_eq!(a, b);
        assert_eq!(ctx.lookup_type("float"), Some(a));
    }

    #[test]
    fn test_typedef_spelling_marks_normalized() {
        let unit = UnitBuilder::new("a.rs").build();
        let mut ctx = context();
        let id = ctx
            .create_type(&unit, &QualType::typedef("uint32_t", QualType::uint()))
            .unwrap();
        assert_eq!(ctx.arena().name(id), "uint");
        assert!(matches!(
            ctx.arena().get(id).kind(),
            TypeKind::Primitive { normalized: true, .. }
        ));
    }

    #[test]
    fn test_record_fields_get_offsets() {
        let mut builder = UnitBuilder::new("a.rs");
        let rec = builder.record(
            RecordDecl::structure("Mixed")
                .field("flag", QualType::builtin(BuiltinKind::UChar))
                .field("value", QualType::float())
                .field("dir", QualType::vector(BuiltinKind::Float, 3)),
        );
        let unit = builder.build();
        let mut ctx = context();
        let id = ctx.create_type(&unit, &QualType::record(rec)).unwrap();
        let offsets: Vec<usize> = ctx.arena().get(id).fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 4, 16]);
        assert_eq!(ctx.arena().alloc_size(id), 32);
    }

    #[test]
    fn test_arrays_are_never_cached() {
        let unit = UnitBuilder::new("a.rs").build();
        let mut ctx = context();
        let ty = QualType::array(QualType::int(), 4);
        let a = ctx.create_type(&unit, &ty).unwrap();
        let b = ctx.create_type(&unit, &ty).unwrap();
        assert_ne!(a, b);
        assert!(ctx.lookup_type(CONSTANT_ARRAY_TYPE_NAME).is_none());
        assert_eq!(ctx.arena().class(a), TypeClass::ConstantArray);
    }

    #[test]
    fn test_double_pointer_becomes_pointer_to_int() {
        let unit = UnitBuilder::new("a.rs").build();
        let mut ctx = context();
        let ty = QualType::pointer_to(QualType::pointer_to(QualType::float()));
        let id = ctx.construct_type(&unit, &ty, "**float", false).unwrap();
        match ctx.arena().get(id).kind() {
            TypeKind::Pointer { pointee } => assert_eq!(ctx.arena().name(*pointee), "int"),
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(ctx.type_name(&unit, &ty).as_deref(), Some("**float"));
    }

    #[test]
    fn test_object_and_matrix_records() {
        let mut builder = UnitBuilder::new("a.rs");
        let alloc = builder.record(RecordDecl::structure("rs_allocation").field("p", QualType::int()));
        let mat = builder.record(
            RecordDecl::structure("rs_matrix2x2").field("m", QualType::array(QualType::float(), 4)),
        );
        let unit = builder.build();
        let mut ctx = context();
        let a = ctx.create_type(&unit, &QualType::record(alloc)).unwrap();
        assert_eq!(ctx.arena().get(a).primitive_kind(), Some(PrimitiveKind::Allocation));
        let m = ctx.create_type(&unit, &QualType::record(mat)).unwrap();
        assert_eq!(ctx.arena().get(m).kind(), &TypeKind::Matrix { dim: 2 });
    }

    #[test]
    fn test_malformed_matrix() {
        let mut builder = UnitBuilder::new("a.rs");
        let mat = builder.record(
            RecordDecl::structure("rs_matrix3x3").field("m", QualType::array(QualType::float(), 4)),
        );
        let unit = builder.build();
        let mut ctx = context();
        assert!(ctx.create_type(&unit, &QualType::record(mat)).is_none());
        assert_eq!(
            ctx.diagnostics().entries()[0].message,
            "invalid matrix struct: first field should be an array with size 9: 'rs_matrix3x3'"
        );
    }

    #[test]
    fn test_matrix_shape_messages() {
        let cases = [
            (
                RecordDecl::structure("rs_matrix3x3"),
                "invalid matrix struct: must have 1 field for saving values: 'rs_matrix3x3'",
            ),
            (
                RecordDecl::structure("rs_matrix3x3").field("m", QualType::float()),
                "invalid matrix struct: first field should be an array with constant size: 'rs_matrix3x3'",
            ),
            (
                RecordDecl::structure("rs_matrix3x3").field("m", QualType::array(QualType::int(), 9)),
                "invalid matrix struct: first field should be a float array: 'rs_matrix3x3'",
            ),
            (
                RecordDecl::structure("rs_matrix3x3")
                    .field("m", QualType::array(QualType::float(), 9))
                    .field("extra", QualType::float()),
                "invalid matrix struct: must have exactly 1 field: 'rs_matrix3x3'",
            ),
        ];
        for (record, message) in cases {
            let mut builder = UnitBuilder::new("a.rs");
            let mat = builder.record(record);
            let unit = builder.build();
            let mut ctx = context();
            assert!(ctx.create_type(&unit, &QualType::record(mat)).is_none());
            let messages: Vec<_> = ctx.diagnostics().entries().iter().map(|d| d.message.as_str()).collect();
            assert_eq!(messages, vec![message]);
        }
    }

    #[test]
    fn test_failed_record_is_unregistered() {
        let mut builder = UnitBuilder::new("a.rs");
        let rec = builder.record(
            RecordDecl::structure("Wide").field("v", QualType::vector(BuiltinKind::Float, 8)),
        );
        let unit = builder.build();
        let mut ctx = context();
        assert!(ctx.create_type(&unit, &QualType::record(rec)).is_none());
        assert!(ctx.lookup_type("Wide").is_none());
        assert!(ctx.exportables().is_empty());
        assert_eq!(
            ctx.diagnostics().entries()[0].message,
            "field type cannot be exported: 'Wide.v'"
        );
    }

    #[test]
    fn test_artificial_record_is_not_named() {
        let unit = UnitBuilder::new("a.rs").build();
        let mut ctx = context();
        let int = ctx.create_type(&unit, &QualType::int()).unwrap();
        let packet = ctx.create_artificial_record(
            "<helper_func_param:blend>",
            vec![("a".to_string(), int), ("b".to_string(), int)],
        );
        assert!(ctx.arena().get(packet).is_artificial());
        assert_eq!(ctx.arena().alloc_size(packet), 8);
        assert!(ctx.lookup_type("<helper_func_param:blend>").is_none());
    }
}
