//! Exportability and dialect/API-level validation
//!
//! Two independent walks over a declaration's source type:
//!
//! - [`is_type_exportable`] decides whether a type can be described to the
//!   host at all and reports the first reason it cannot.
//! - [`validate_type`] enforces the per-target rules (reduced dialect,
//!   API-level gates) and reports straight into [`Diagnostics`].
//!
//! Both keep a set of records already being checked so a record reached
//! again through its own fields does not loop.

use std::collections::HashSet;

use thiserror::Error;

use crate::api::{ApiLevel, TargetOptions};
use crate::ast::{
    FunctionDecl, Linkage, QualType, RecordDecl, RecordId, RecordKind, SourceLocation, SourceType,
    StorageClass, TranslationUnit, VarDecl,
};
use crate::diagnostics::{Diagnostic, DiagnosticCategory, Diagnostics};
use crate::primitive::PrimitiveKind;

const MAX_ARRAY_ELEMENTS: u64 = (1 << 24) - 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("unions cannot be exported: '{0}'")]
    Union(String),

    #[error("struct is not defined in this module")]
    UndefinedStruct,

    #[error("anonymous structures cannot be exported")]
    AnonymousStruct,

    #[error("structures with flexible array members cannot be exported: '{0}'")]
    FlexibleArrayMember(String),

    #[error("bit fields are not able to be exported: '{record}.{field}'")]
    BitField { record: String, field: String },

    #[error("structures containing pointers cannot be exported: '{0}'")]
    PointerInStruct(String),

    #[error("multiple levels of pointers cannot be exported: '{0}'")]
    MultiLevelPointer(String),

    #[error("pointers to arrays cannot be exported: '{0}'")]
    PointerToArray(String),

    #[error("multidimensional arrays cannot be exported: '{0}'")]
    MultidimensionalArray(String),

    #[error("vectors of non-primitive types cannot be exported: '{0}'")]
    NonPrimitiveVector(String),

    #[error("vectors of width {width} cannot be exported: '{subject}'")]
    VectorWidth { subject: String, width: u32 },

    #[error("arrays of width 3 vector types cannot be exported: '{0}'")]
    ArrayOfVector3(String),

    #[error("zero-length arrays cannot be exported: '{0}'")]
    EmptyArray(String),

    #[error("arrays of more than 16777215 elements cannot be exported: '{0}'")]
    ArrayTooLarge(String),

    #[error("type '{ty}' cannot be exported: '{subject}'")]
    Unsupported { subject: String, ty: String },
}

/// A rejection plus the location it should be reported at, when that
/// differs from the declaration being checked.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub reason: Rejection,
    pub location: Option<SourceLocation>,
}

impl Rejected {
    fn new(reason: Rejection) -> Self {
        Self {
            reason,
            location: None,
        }
    }

    fn at(reason: Rejection, location: &SourceLocation) -> Self {
        Self {
            reason,
            location: Some(location.clone()),
        }
    }

    pub fn into_diagnostic(self, decl: &str, fallback: &SourceLocation) -> Diagnostic {
        let location = self.location.unwrap_or_else(|| fallback.clone());
        Diagnostic::error(DiagnosticCategory::TypeRejected, self.reason.to_string())
            .at(&location)
            .for_decl(decl)
    }
}

/// Runtime handle or matrix kind named by a reserved record tag.
pub fn rs_specific_kind(record: &RecordDecl) -> Option<PrimitiveKind> {
    record
        .name
        .as_deref()
        .and_then(PrimitiveKind::lookup_by_name)
        .filter(|kind| kind.is_object() || kind.is_matrix())
}

/// Outermost record being checked; errors inside it are reported against it.
#[derive(Debug, Clone, Copy)]
struct Scope<'a> {
    name: &'a str,
    location: Option<&'a SourceLocation>,
}

struct ExportabilityCheck<'a> {
    unit: &'a TranslationUnit,
    subject: &'a str,
    checking: HashSet<RecordId>,
}

impl<'a> ExportabilityCheck<'a> {
    fn reject(&self, scope: Option<Scope<'a>>, make: impl FnOnce(String) -> Rejection) -> Rejected {
        match scope {
            Some(Scope {
                name,
                location: Some(location),
            }) => Rejected::at(make(name.to_string()), location),
            Some(Scope { name, location: None }) => Rejected::new(make(name.to_string())),
            None => Rejected::new(make(self.subject.to_string())),
        }
    }

    fn check(&mut self, qt: &QualType, scope: Option<Scope<'a>>) -> Result<(), Rejected> {
        let canonical = qt.canonical();
        match &canonical.ty {
            SourceType::Builtin(kind) => match PrimitiveKind::from_builtin(*kind) {
                Some(_) => Ok(()),
                None => Err(self.reject(scope, |subject| Rejection::Unsupported {
                    subject,
                    ty: kind.spelling().to_string(),
                })),
            },
            SourceType::Record(id) => self.check_record(*id, scope),
            SourceType::Pointer(pointee) => {
                if scope.is_some() {
                    return Err(self.reject(scope, Rejection::PointerInStruct));
                }
                let pointee = pointee.canonical();
                match &pointee.ty {
                    SourceType::Pointer(_) => Err(self.reject(scope, Rejection::MultiLevelPointer)),
                    SourceType::ConstantArray { .. } | SourceType::IncompleteArray(_) => {
                        Err(self.reject(scope, Rejection::PointerToArray))
                    }
                    _ => self.check(&pointee, scope),
                }
            }
            SourceType::ExtVector { element, count } => {
                if !matches!(element.canonical().ty, SourceType::Builtin(_)) {
                    return Err(self.reject(scope, Rejection::NonPrimitiveVector));
                }
                if !(2..=4).contains(count) {
                    let width = *count;
                    return Err(self.reject(scope, |subject| Rejection::VectorWidth { subject, width }));
                }
                self.check(element, scope)
            }
            SourceType::ConstantArray { element, size } => {
                let element_ty = element.canonical();
                match &element_ty.ty {
                    SourceType::ConstantArray { .. } | SourceType::IncompleteArray(_) => {
                        return Err(self.reject(scope, Rejection::MultidimensionalArray));
                    }
                    SourceType::ExtVector {
                        element: base,
                        count,
                    } => {
                        if !matches!(base.canonical().ty, SourceType::Builtin(_)) {
                            return Err(self.reject(scope, Rejection::NonPrimitiveVector));
                        }
                        if *count == 3 && *size != 1 {
                            return Err(self.reject(scope, Rejection::ArrayOfVector3));
                        }
                    }
                    _ => {}
                }
                if *size == 0 {
                    return Err(self.reject(scope, Rejection::EmptyArray));
                }
                if *size > MAX_ARRAY_ELEMENTS {
                    return Err(self.reject(scope, Rejection::ArrayTooLarge));
                }
                self.check(&element_ty, scope)
            }
            SourceType::IncompleteArray(_) if scope.is_some() => {
                Err(self.reject(scope, Rejection::FlexibleArrayMember))
            }
            other => {
                let ty = QualType::new(other.clone()).spelling(self.unit);
                Err(self.reject(scope, |subject| Rejection::Unsupported { subject, ty }))
            }
        }
    }

    fn check_record(&mut self, id: RecordId, scope: Option<Scope<'a>>) -> Result<(), Rejected> {
        let unit = self.unit;
        let Some(declared) = unit.record(id) else {
            return Err(self.reject(scope, |subject| Rejection::Unsupported {
                subject,
                ty: "<invalid record>".to_string(),
            }));
        };
        if rs_specific_kind(declared).is_some() {
            return Ok(());
        }
        if declared.kind == RecordKind::Union {
            return Err(Rejected::at(
                Rejection::Union(declared.display_name().to_string()),
                &declared.location,
            ));
        }
        let Some((id, record)) = unit.definition(id) else {
            return Err(Rejected::at(Rejection::UndefinedStruct, &declared.location));
        };

        let name = match record.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => return Err(Rejected::at(Rejection::AnonymousStruct, &record.location)),
        };
        let scope = scope.or(Some(Scope {
            name,
            location: Some(&record.location),
        }));
        if record.has_flexible_array_member {
            return Err(self.reject(scope, Rejection::FlexibleArrayMember));
        }

        if !self.checking.insert(id) {
            return Ok(());
        }
        for field in &record.fields {
            self.check(&field.ty, scope)?;
            if field.bit_width.is_some() {
                return Err(Rejected::at(
                    Rejection::BitField {
                        record: name.to_string(),
                        field: field.name.clone(),
                    },
                    &field.location,
                ));
            }
        }
        Ok(())
    }
}

/// Checks that a type can be described to the host. On success returns
/// the canonical type to build a node from.
pub fn is_type_exportable(
    unit: &TranslationUnit,
    ty: &QualType,
    subject: &str,
) -> Result<QualType, Rejected> {
    let mut check = ExportabilityCheck {
        unit,
        subject,
        checking: HashSet::new(),
    };
    check.check(ty, None)?;
    Ok(ty.canonical())
}

/// Same as [`is_type_exportable`] for a member of a compiler-synthesized
/// record, so the member is held to the rules for struct fields.
pub fn is_member_exportable(
    unit: &TranslationUnit,
    ty: &QualType,
    record_name: &str,
) -> Result<QualType, Rejected> {
    let mut check = ExportabilityCheck {
        unit,
        subject: record_name,
        checking: HashSet::new(),
    };
    let scope = Scope {
        name: record_name,
        location: None,
    };
    check.check(ty, Some(scope))?;
    Ok(ty.canonical())
}

/// The named declaration a type belongs to.
#[derive(Debug, Clone, Copy)]
pub struct DeclRef<'a> {
    pub name: &'a str,
    pub location: &'a SourceLocation,
    pub external: bool,
    /// Variables are subject to the runtime-object composite gate.
    pub is_var: bool,
}

impl<'a> DeclRef<'a> {
    pub fn var(var: &'a VarDecl) -> Self {
        Self {
            name: &var.name,
            location: &var.location,
            external: var.linkage == Linkage::External,
            is_var: true,
        }
    }
}

struct TargetCheck<'a, 'd> {
    unit: &'a TranslationUnit,
    decl: DeclRef<'a>,
    options: TargetOptions,
    top_is_pointer: bool,
    checking: HashSet<RecordId>,
    diagnostics: &'d mut Diagnostics,
}

impl<'a, 'd> TargetCheck<'a, 'd> {
    fn error(&mut self, message: String) -> bool {
        self.diagnostics.push(
            Diagnostic::error(DiagnosticCategory::TypeRejected, message)
                .at(self.decl.location)
                .for_decl(self.decl.name),
        );
        false
    }

    fn check(&mut self, qt: &QualType, in_composite: bool, union: Option<&'a str>) -> bool {
        let canonical = qt.canonical();
        match &canonical.ty {
            SourceType::Record(id) => self.check_record(*id, in_composite, union),
            SourceType::Builtin(kind) => {
                if self.options.strict_dialect && kind.is_wide() {
                    return self.error(format!(
                        "Builtin types > 32 bits in size are forbidden in Filterscript: '{}'",
                        self.decl.name
                    ));
                }
                true
            }
            SourceType::Pointer(pointee) => {
                if self.options.strict_dialect && !self.decl.location.in_system_header {
                    return self.error(format!(
                        "Pointers are forbidden in Filterscript: '{}'",
                        self.decl.name
                    ));
                }
                self.check(pointee, in_composite, union)
            }
            SourceType::ExtVector { element, count } => {
                if self.options.api < ApiLevel::ICS
                    && in_composite
                    && *count == 3
                    && self.decl.external
                {
                    return self.error(format!(
                        "structs containing vectors of dimension 3 cannot be exported at this API level: '{}'",
                        self.decl.name
                    ));
                }
                self.check(element, true, union)
            }
            SourceType::ConstantArray { element, .. } => self.check(element, true, union),
            _ => true,
        }
    }

    fn check_record(&mut self, id: RecordId, in_composite: bool, union: Option<&'a str>) -> bool {
        let unit = self.unit;
        let Some(declared) = unit.record(id) else {
            return true;
        };

        if let Some(kind) = rs_specific_kind(declared) {
            if kind.is_object() {
                if self.decl.is_var
                    && in_composite
                    && self.decl.external
                    && !self.top_is_pointer
                    && self.options.api < ApiLevel::JB
                {
                    return self.error(format!(
                        "arrays/structures containing RS object types cannot be exported in target API < {}: '{}'",
                        ApiLevel::JB,
                        self.decl.name
                    ));
                }
                if let Some(union_name) = union {
                    self.diagnostics.push(
                        Diagnostic::error(
                            DiagnosticCategory::TypeRejected,
                            "unions containing RS object types are not allowed",
                        )
                        .at(self.decl.location)
                        .for_decl(union_name),
                    );
                    return false;
                }
            }
            if union.is_none() {
                return true;
            }
        }

        let Some((id, record)) = unit.definition(id) else {
            return true;
        };
        let union = if record.kind == RecordKind::Union {
            Some(record.display_name())
        } else {
            union
        };
        // Flexible array members are an exportability error, reported when
        // the type is exported.
        if !self.checking.insert(id) {
            return true;
        }
        record
            .fields
            .iter()
            .all(|field| self.check(&field.ty, true, union))
    }
}

/// Enforces dialect and API-level rules for a declaration's type.
pub fn validate_type(
    unit: &TranslationUnit,
    ty: &QualType,
    decl: DeclRef<'_>,
    options: &TargetOptions,
    diagnostics: &mut Diagnostics,
) -> bool {
    let mut check = TargetCheck {
        unit,
        decl,
        options: *options,
        top_is_pointer: ty.is_pointer(),
        checking: HashSet::new(),
        diagnostics,
    };
    check.check(ty, false, None)
}

pub fn is_var_decl_valid(
    unit: &TranslationUnit,
    var: &VarDecl,
    options: &TargetOptions,
    diagnostics: &mut Diagnostics,
) -> bool {
    validate_type(unit, &var.ty, DeclRef::var(var), options, diagnostics)
}

/// Checks a function's parameters, return type and locals. Kernels may
/// not keep mutable state in `static` locals.
pub fn validate_function_body(
    unit: &TranslationUnit,
    function: &FunctionDecl,
    is_kernel: bool,
    options: &TargetOptions,
    diagnostics: &mut Diagnostics,
) -> bool {
    let mut valid = true;

    if is_kernel {
        for local in &function.locals {
            if local.storage == StorageClass::Static && !local.ty.canonical().is_const {
                diagnostics.push(
                    Diagnostic::error(
                        DiagnosticCategory::KernelShape,
                        format!(
                            "Non-const static variables are not allowed in kernels: '{}'",
                            local.name
                        ),
                    )
                    .at(&local.location)
                    .for_decl(&function.name),
                );
                valid = false;
            }
        }
    }

    if options.strict_dialect {
        for param in &function.params {
            let decl = DeclRef {
                name: &param.name,
                location: &param.location,
                external: false,
                is_var: false,
            };
            valid &= validate_type(unit, &param.ty, decl, options, diagnostics);
        }
        let decl = DeclRef {
            name: &function.name,
            location: &function.location,
            external: function.linkage == Linkage::External,
            is_var: false,
        };
        valid &= validate_type(unit, &function.return_type, decl, options, diagnostics);
        for local in &function.locals {
            valid &= is_var_decl_valid(unit, local, options, diagnostics);
        }
    }

    valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BuiltinKind, RecordDecl, UnitBuilder};

    fn reason(result: Result<QualType, Rejected>) -> Rejection {
        result.unwrap_err().reason
    }

    #[test]
    fn test_scalars() {
        let unit = UnitBuilder::new("a.rs").build();
        assert!(is_type_exportable(&unit, &QualType::int(), "v").is_ok());
        assert_eq!(
            reason(is_type_exportable(&unit, &QualType::builtin(BuiltinKind::LongDouble), "v")),
            Rejection::Unsupported {
                subject: "v".to_string(),
                ty: "long double".to_string()
            }
        );
    }

    #[test]
    fn test_union_reports_union_name() {
        let mut builder = UnitBuilder::new("a.rs");
        let u = builder.record(RecordDecl::union("U").field("i", QualType::int()));
        let unit = builder.build();
        let err = reason(is_type_exportable(&unit, &QualType::record(u), "v"));
        assert_eq!(err.to_string(), "unions cannot be exported: 'U'");
    }

    #[test]
    fn test_pointer_in_struct_names_top_record() {
        let mut builder = UnitBuilder::new("a.rs");
        let inner = builder.record(
            RecordDecl::structure("Inner").field("p", QualType::pointer_to(QualType::int())),
        );
        let outer = builder.record(RecordDecl::structure("Outer").field("i", QualType::record(inner)));
        let unit = builder.build();
        let err = reason(is_type_exportable(&unit, &QualType::record(outer), "v"));
        assert_eq!(err, Rejection::PointerInStruct("Outer".to_string()));
    }

    #[test]
    fn test_flexible_array_member_is_left_to_exportability() {
        let mut builder = UnitBuilder::new("a.rs");
        let flex = builder.record(
            RecordDecl::structure("Flex")
                .field("n", QualType::int())
                .with_flexible_array_member(),
        );
        let unit = builder.build();
        let var = VarDecl::global("buf", QualType::record(flex));

        let mut diags = Diagnostics::new();
        assert!(is_var_decl_valid(&unit, &var, &TargetOptions::default(), &mut diags));
        assert!(diags.is_empty());

        let err = reason(is_type_exportable(&unit, &var.ty, "buf"));
        assert_eq!(
            err.to_string(),
            "structures with flexible array members cannot be exported: 'Flex'"
        );
    }

    #[test]
    fn test_bit_field() {
        let mut builder = UnitBuilder::new("a.rs");
        let r = builder.record(RecordDecl::structure("R").bit_field("f", QualType::int(), 3));
        let unit = builder.build();
        let err = reason(is_type_exportable(&unit, &QualType::record(r), "v"));
        assert_eq!(err.to_string(), "bit fields are not able to be exported: 'R.f'");
    }

    #[test]
    fn test_forward_declaration_resolves_to_definition() {
        let mut builder = UnitBuilder::new("a.rs");
        let forward = builder.record(RecordDecl::forward("P"));
        builder.record(RecordDecl::structure("P").field("x", QualType::float()));
        let missing = builder.record(RecordDecl::forward("Missing"));
        let unit = builder.build();
        assert!(is_type_exportable(&unit, &QualType::record(forward), "v").is_ok());
        assert_eq!(
            reason(is_type_exportable(&unit, &QualType::record(missing), "v")),
            Rejection::UndefinedStruct
        );
    }

    #[test]
    fn test_pointer_rules() {
        let unit = UnitBuilder::new("a.rs").build();
        let double = QualType::pointer_to(QualType::pointer_to(QualType::int()));
        assert_eq!(
            reason(is_type_exportable(&unit, &double, "pp")),
            Rejection::MultiLevelPointer("pp".to_string())
        );
        let to_array = QualType::pointer_to(QualType::array(QualType::int(), 4));
        assert_eq!(
            reason(is_type_exportable(&unit, &to_array, "pa")),
            Rejection::PointerToArray("pa".to_string())
        );
        assert!(is_type_exportable(&unit, &QualType::pointer_to(QualType::float()), "p").is_ok());
    }

    #[test]
    fn test_arrays() {
        let unit = UnitBuilder::new("a.rs").build();
        let nested = QualType::array(QualType::array(QualType::int(), 2), 2);
        assert_eq!(
            reason(is_type_exportable(&unit, &nested, "m")),
            Rejection::MultidimensionalArray("m".to_string())
        );
        let vec3s = QualType::array(QualType::vector(BuiltinKind::Float, 3), 2);
        assert_eq!(
            reason(is_type_exportable(&unit, &vec3s, "a")),
            Rejection::ArrayOfVector3("a".to_string())
        );
        let single = QualType::array(QualType::vector(BuiltinKind::Float, 3), 1);
        assert!(is_type_exportable(&unit, &single, "a").is_ok());
    }

    #[test]
    fn test_member_exportable_rejects_pointers() {
        let unit = UnitBuilder::new("a.rs").build();
        let err = reason(is_member_exportable(
            &unit,
            &QualType::pointer_to(QualType::int()),
            "<helper_func_param:f>",
        ));
        assert_eq!(
            err,
            Rejection::PointerInStruct("<helper_func_param:f>".to_string())
        );
    }

    #[test]
    fn test_object_in_struct_gated_before_jb() {
        let mut builder = UnitBuilder::new("a.rs");
        let alloc = builder.record(RecordDecl::structure("rs_allocation"));
        let holder = builder.record(RecordDecl::structure("Holder").field("a", QualType::record(alloc)));
        let unit = builder.build();
        let var = VarDecl::global("h", QualType::record(holder));

        let mut diags = Diagnostics::new();
        assert!(!is_var_decl_valid(&unit, &var, &TargetOptions::new(ApiLevel::ICS), &mut diags));
        assert_eq!(
            diags.entries()[0].message,
            "arrays/structures containing RS object types cannot be exported in target API < 16: 'h'"
        );

        let mut diags = Diagnostics::new();
        assert!(is_var_decl_valid(&unit, &var, &TargetOptions::new(ApiLevel::JB), &mut diags));

        let local = VarDecl::global("h", QualType::record(holder)).with_static_storage();
        let mut diags = Diagnostics::new();
        assert!(is_var_decl_valid(&unit, &local, &TargetOptions::new(ApiLevel::HC), &mut diags));
    }

    #[test]
    fn test_union_with_object() {
        let mut builder = UnitBuilder::new("a.rs");
        let alloc = builder.record(RecordDecl::structure("rs_allocation"));
        let u = builder.record(RecordDecl::union("U").field("a", QualType::record(alloc)));
        let unit = builder.build();
        let var = VarDecl::global("u", QualType::record(u));
        let mut diags = Diagnostics::new();
        assert!(!is_var_decl_valid(&unit, &var, &TargetOptions::default(), &mut diags));
        assert_eq!(
            diags.entries()[0].message,
            "unions containing RS object types are not allowed"
        );
    }

    #[test]
    fn test_filterscript_rules() {
        let unit = UnitBuilder::new("a.fs").build();
        let strict = TargetOptions::default().strict(true);

        let mut diags = Diagnostics::new();
        let wide = VarDecl::global("d", QualType::builtin(BuiltinKind::ULong));
        assert!(!is_var_decl_valid(&unit, &wide, &strict, &mut diags));
        assert_eq!(
            diags.entries()[0].message,
            "Builtin types > 32 bits in size are forbidden in Filterscript: 'd'"
        );

        let mut diags = Diagnostics::new();
        let ptr = VarDecl::global("p", QualType::pointer_to(QualType::int()));
        assert!(!is_var_decl_valid(&unit, &ptr, &strict, &mut diags));
        assert_eq!(diags.entries()[0].message, "Pointers are forbidden in Filterscript: 'p'");

        let mut system = SourceLocation::new("rs_core.rsh", 1, 1);
        system.in_system_header = true;
        let builtin_ptr = VarDecl::global("p", QualType::pointer_to(QualType::int())).at(system);
        let mut diags = Diagnostics::new();
        assert!(is_var_decl_valid(&unit, &builtin_ptr, &strict, &mut diags));
    }

    #[test]
    fn test_vec3_in_struct_before_ics() {
        let mut builder = UnitBuilder::new("a.rs");
        let s = builder.record(
            RecordDecl::structure("S").field("v", QualType::vector(BuiltinKind::Float, 3)),
        );
        let unit = builder.build();
        let var = VarDecl::global("s", QualType::record(s));
        let mut diags = Diagnostics::new();
        assert!(!is_var_decl_valid(&unit, &var, &TargetOptions::new(ApiLevel::HC_MR2), &mut diags));
        let mut diags = Diagnostics::new();
        assert!(is_var_decl_valid(&unit, &var, &TargetOptions::new(ApiLevel::ICS), &mut diags));
    }

    #[test]
    fn test_static_locals_in_kernels() {
        let unit = UnitBuilder::new("a.rs").build();
        let kernel = FunctionDecl::new("k", QualType::int())
            .kernel()
            .param("in", QualType::int())
            .local(VarDecl::local("count", QualType::int()).with_static_storage())
            .local(VarDecl::local("table", QualType::int().as_const()).with_static_storage());
        let mut diags = Diagnostics::new();
        assert!(!validate_function_body(&unit, &kernel, true, &TargetOptions::default(), &mut diags));
        assert_eq!(diags.error_count(), 1);
        assert_eq!(
            diags.entries()[0].message,
            "Non-const static variables are not allowed in kernels: 'count'"
        );
    }
}
