//! Per-file export registry
//!
//! One [`ExportContext`] is live per compiled file. It owns every type node
//! created while exporting the file, the exported variables, functions and
//! kernels, and the diagnostics produced along the way. [`reset`] clears it
//! for the next file; records that must outlive the file are copied into
//! the [`DefinitionRegistry`] by the cross-unit check first.
//!
//! [`reset`]: ExportContext::reset

use std::collections::{HashMap, HashSet};

use tracing::instrument;

use crate::api::TargetOptions;
use crate::ast::{Decl, FunctionDecl, Initializer, Linkage, QualType, StorageClass, TranslationUnit, VarDecl};
use crate::diagnostics::{Diagnostic, DiagnosticCategory, Diagnostics};
use crate::error::CoreError;
use crate::export::{ExportForEach, ExportFunc, ExportParam, ExportVar, Exportable, InitValue, Scalar};
use crate::kernel::{self, FunctionClass};
use crate::metadata::ExportMetadata;
use crate::odr::DefinitionRegistry;
use crate::primitive::PrimitiveKind;
use crate::types::{is_reserved_name, TypeArena, TypeClass, TypeId, TypeKind};
use crate::validate::{self, is_member_exportable, is_type_exportable};

#[derive(Debug, Clone)]
pub struct ExportContext {
    options: TargetOptions,
    file_name: String,
    pub(crate) arena: TypeArena,
    pub(crate) types: HashMap<String, TypeId>,
    pub(crate) type_order: Vec<String>,
    vars: Vec<ExportVar>,
    funcs: Vec<ExportFunc>,
    foreach: Vec<ExportForEach>,
    pub(crate) exportables: Vec<Exportable>,
    metadata: ExportMetadata,
    pub(crate) diagnostics: Diagnostics,
}

impl ExportContext {
    pub fn new(options: TargetOptions) -> Self {
        Self {
            options,
            file_name: String::new(),
            arena: TypeArena::new(options.pointer_width),
            types: HashMap::new(),
            type_order: Vec::new(),
            vars: Vec::new(),
            funcs: Vec::new(),
            foreach: Vec::new(),
            exportables: Vec::new(),
            metadata: ExportMetadata::default(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Drops everything owned for the previous file.
    pub fn reset(&mut self, options: TargetOptions, file_name: impl Into<String>) {
        *self = Self::new(options);
        self.file_name = file_name.into();
    }

    pub fn options(&self) -> &TargetOptions {
        &self.options
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn arena(&self) -> &TypeArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut TypeArena {
        &mut self.arena
    }

    pub fn metadata(&self) -> &ExportMetadata {
        &self.metadata
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    pub fn vars(&self) -> &[ExportVar] {
        &self.vars
    }

    pub fn funcs(&self) -> &[ExportFunc] {
        &self.funcs
    }

    /// Kernels in export-slot order.
    pub fn foreach(&self) -> &[ExportForEach] {
        &self.foreach
    }

    pub fn exportables(&self) -> &[Exportable] {
        &self.exportables
    }

    /// Named types in creation order.
    pub fn export_types(&self) -> impl Iterator<Item = (&str, TypeId)> {
        self.type_order
            .iter()
            .filter_map(|name| self.types.get(name).map(|&id| (name.as_str(), id)))
    }

    pub fn lookup_type(&self, name: &str) -> Option<TypeId> {
        self.types.get(name).copied()
    }

    /// Registers a node under its name. Fails when the name is taken.
    pub fn insert_export_type(&mut self, name: &str, id: TypeId) -> bool {
        if self.types.contains_key(name) {
            return false;
        }
        self.types.insert(name.to_string(), id);
        self.type_order.push(name.to_string());
        true
    }

    pub fn keep(&mut self, id: TypeId) {
        self.arena.keep(id);
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Runs the export pass over every top-level declaration of a unit.
    #[instrument(skip(self, unit), fields(file = %unit.file_name), level = "debug")]
    pub fn process_export_all(&mut self, unit: &TranslationUnit) -> bool {
        if self.file_name.is_empty() {
            self.file_name = unit.file_name.clone();
        }
        if unit.has_errors {
            tracing::debug!("front end reported errors, skipping export");
            return false;
        }

        self.metadata =
            ExportMetadata::from_pragmas(&unit.pragmas, self.options.strict_dialect, &mut self.diagnostics);
        self.metadata
            .require_package_name(&unit.file_name, &mut self.diagnostics);
        if self.diagnostics.has_errors() {
            return false;
        }

        for decl in &unit.decls {
            match decl {
                Decl::Var(var) if var.linkage == Linkage::External => {
                    self.process_export_var(unit, var);
                }
                Decl::Var(var) => {
                    validate::is_var_decl_valid(unit, var, &self.options, &mut self.diagnostics);
                }
                Decl::Function(function) => self.route_function(unit, function),
                Decl::Record(_) | Decl::Typedef { .. } => {}
            }
        }

        self.order_kernels();

        let forced = self.metadata.export_types.clone();
        for name in &forced {
            self.process_export_type(unit, name);
        }

        tracing::debug!(
            vars = self.vars.len(),
            funcs = self.funcs.len(),
            kernels = self.foreach.len(),
            types = self.types.len(),
            "export pass finished"
        );
        !self.diagnostics.has_errors()
    }

    fn route_function(&mut self, unit: &TranslationUnit, function: &FunctionDecl) {
        if function.kernel_attr && function.storage == StorageClass::Static {
            self.report(
                Diagnostic::error(
                    DiagnosticCategory::KernelShape,
                    "Invalid use of attribute kernel with static function",
                )
                .at(&function.location)
                .for_decl(&function.name),
            );
            return;
        }
        if !function.has_body {
            return;
        }
        if function.linkage == Linkage::External {
            self.process_export_func(unit, function);
        } else {
            validate::validate_function_body(unit, function, false, &self.options, &mut self.diagnostics);
        }
    }

    /// Root kernel goes to slot 0; a placeholder takes it if there is none.
    fn order_kernels(&mut self) {
        if self.foreach.is_empty() {
            return;
        }
        match self.foreach.iter().position(|k| k.is_root()) {
            Some(0) => {}
            Some(index) => {
                let root = self.foreach.remove(index);
                self.foreach.insert(0, root);
            }
            None => {
                tracing::debug!("no root kernel, inserting placeholder at slot 0");
                self.foreach.insert(0, ExportForEach::dummy_root());
            }
        }
    }

    pub fn process_export_var(&mut self, unit: &TranslationUnit, var: &VarDecl) -> bool {
        if !validate::is_var_decl_valid(unit, var, &self.options, &mut self.diagnostics) {
            return false;
        }
        let Some(ty) = self.export_checked(unit, &var.ty, &var.name, &var.location) else {
            return false;
        };

        let init = self.fold_initializer(var, ty);
        let node = self.arena.get(ty);
        let is_unsigned = match node.kind() {
            TypeKind::Primitive { kind, .. } | TypeKind::Vector { element: kind, .. } => {
                kind.is_unsigned()
            }
            _ => false,
        };

        tracing::debug!(var = %var.name, ty = %node.name(), "exporting variable");
        self.vars.push(ExportVar {
            name: var.name.clone(),
            ty,
            init,
            is_const: var.ty.canonical().is_const,
            is_unsigned,
            location: var.location.clone(),
        });
        self.exportables.push(Exportable::Var(var.name.clone()));
        true
    }

    fn fold_initializer(&mut self, var: &VarDecl, ty: TypeId) -> Option<InitValue> {
        let init = var.init.as_ref()?;
        let node = self.arena.get(ty);
        let folded = match node.kind() {
            TypeKind::Primitive { kind, .. } if kind.is_object() => return None,
            TypeKind::Record { .. } | TypeKind::Matrix { .. } => None,
            _ => fold_value(&self.arena, ty, init),
        };
        if folded.is_none() {
            let message = format!(
                "Reflection of initializer to variable '{}' (of type '{}') is unsupported currently.",
                var.name,
                node.name()
            );
            self.diagnostics.push(
                Diagnostic::warning(DiagnosticCategory::UnsupportedInitializer, message)
                    .at(&var.location)
                    .for_decl(&var.name),
            );
        }
        folded
    }

    pub fn process_export_func(&mut self, unit: &TranslationUnit, function: &FunctionDecl) -> bool {
        if !function.has_body {
            return true;
        }
        if function.storage != StorageClass::None {
            self.report(
                Diagnostic::error(
                    DiagnosticCategory::KernelShape,
                    format!("cannot export extern or static function '{}'", function.name),
                )
                .at(&function.location)
                .for_decl(&function.name),
            );
            return false;
        }

        let class = kernel::classify(function, self.options.api);
        let body_valid = validate::validate_function_body(
            unit,
            function,
            class == FunctionClass::ForEach,
            &self.options,
            &mut self.diagnostics,
        );

        match class {
            FunctionClass::GraphicsRoot | FunctionClass::Init | FunctionClass::Dtor => {
                kernel::validate_special_function(unit, function, class, &mut self.diagnostics) && body_valid
            }
            FunctionClass::ForEach => body_valid && self.process_foreach(unit, function),
            FunctionClass::Invokable => body_valid && self.process_invokable(unit, function),
        }
    }

    fn process_foreach(&mut self, unit: &TranslationUnit, function: &FunctionDecl) -> bool {
        let Some(roles) =
            kernel::resolve_roles(unit, function, self.options.api, &mut self.diagnostics)
        else {
            return false;
        };

        let mut in_type = None;
        let mut out_type = None;
        let mut result_type = None;
        if roles.pass_by_value {
            if let Some(index) = roles.input {
                let param = &function.params[index];
                in_type = self.export_checked(unit, &param.ty, &param.name, &param.location);
                if in_type.is_none() {
                    return false;
                }
            }
            if roles.has_return {
                result_type =
                    self.export_checked(unit, &function.return_type, &function.name, &function.location);
                if result_type.is_none() {
                    return false;
                }
                out_type = result_type;
            }
        } else {
            if let Some(param) = roles.input.map(|i| &function.params[i]) {
                if let Some(pointee) = param.ty.pointee() {
                    in_type = self.create_quietly(unit, &pointee, &param.name);
                }
            }
            if let Some(param) = roles.output.map(|i| &function.params[i]) {
                if let Some(pointee) = param.ty.pointee() {
                    out_type = self.create_quietly(unit, &pointee, &param.name);
                }
            }
        }

        let mut param_packet = None;
        if let Some(index) = roles.usr_data {
            let param = &function.params[index];
            match param.ty.pointee() {
                Some(pointee) if pointee.is_void() => {
                    tracing::warn!(
                        kernel = %function.name,
                        param = %param.name,
                        "opaque user data pointer is not reflected"
                    );
                }
                Some(pointee) => {
                    let packet_name = format!("<helper_foreach_param:{}>", function.name);
                    let Some(field) = self.export_member(unit, &pointee, &packet_name, &function.name, &param.location)
                    else {
                        return false;
                    };
                    param_packet = Some(self.create_artificial_record(&packet_name, vec![(param.name.clone(), field)]));
                }
                None => {}
            }
        }

        let signature = roles.signature();
        tracing::debug!(kernel = %function.name, %signature, "exporting kernel");
        self.foreach.push(ExportForEach {
            name: function.name.clone(),
            roles,
            signature,
            in_type,
            out_type,
            result_type,
            param_packet,
            is_dummy_root: false,
            location: function.location.clone(),
        });
        self.exportables.push(Exportable::ForEach(function.name.clone()));
        true
    }

    fn process_invokable(&mut self, unit: &TranslationUnit, function: &FunctionDecl) -> bool {
        let packet_name = format!("<helper_func_param:{}>", function.name);
        let mut params = Vec::with_capacity(function.params.len());
        let mut valid = true;
        for param in &function.params {
            match self.export_member(unit, &param.ty, &packet_name, &function.name, &param.location) {
                Some(ty) => params.push(ExportParam {
                    name: param.name.clone(),
                    ty,
                }),
                None => valid = false,
            }
        }
        if !valid {
            return false;
        }

        let packet = if params.is_empty() {
            None
        } else {
            let fields = params.iter().map(|p| (p.name.clone(), p.ty)).collect();
            Some(self.create_artificial_record(&packet_name, fields))
        };

        tracing::debug!(func = %function.name, params = params.len(), "exporting invokable");
        self.funcs.push(ExportFunc {
            name: function.name.clone(),
            params,
            packet,
            location: function.location.clone(),
        });
        self.exportables.push(Exportable::Func(function.name.clone()));
        true
    }

    /// Force-exports a type named by `export_type`.
    pub fn process_export_type(&mut self, unit: &TranslationUnit, name: &str) -> bool {
        let Some(ty) = unit.lookup_type(name) else {
            self.report(
                Diagnostic::error(
                    DiagnosticCategory::Pragma,
                    format!("export_type '{}' does not name a type in this file", name),
                )
                .for_decl(name),
            );
            return false;
        };
        let location = match &ty.canonical().ty {
            crate::ast::SourceType::Record(id) => unit
                .record(*id)
                .map(|r| r.location.clone())
                .unwrap_or_default(),
            _ => Default::default(),
        };
        self.export_checked(unit, &ty, name, &location).is_some()
    }

    /// Validates then builds the node for a declaration's type.
    pub(crate) fn export_checked(
        &mut self,
        unit: &TranslationUnit,
        ty: &QualType,
        decl: &str,
        location: &crate::ast::SourceLocation,
    ) -> Option<TypeId> {
        match is_type_exportable(unit, ty, decl) {
            Ok(_) => self.create_type(unit, ty),
            Err(rejected) => {
                self.report(rejected.into_diagnostic(decl, location));
                None
            }
        }
    }

    fn export_member(
        &mut self,
        unit: &TranslationUnit,
        ty: &QualType,
        record_name: &str,
        decl: &str,
        location: &crate::ast::SourceLocation,
    ) -> Option<TypeId> {
        match is_member_exportable(unit, ty, record_name) {
            Ok(_) => self.create_type(unit, ty),
            Err(rejected) => {
                self.report(rejected.into_diagnostic(decl, location));
                None
            }
        }
    }

    /// Like [`export_checked`](Self::export_checked), but a failure leaves
    /// no diagnostics behind.
    fn create_quietly(&mut self, unit: &TranslationUnit, ty: &QualType, decl: &str) -> Option<TypeId> {
        let checkpoint = self.diagnostics.checkpoint();
        let created = self.export_checked(unit, ty, decl, &Default::default());
        if created.is_none() {
            self.diagnostics.rollback(checkpoint);
        }
        created
    }

    /// Cross-unit check of every user-visible record created for this file.
    #[instrument(skip(self, registry), level = "debug")]
    pub fn check_one_definition_rule(&mut self, registry: &mut DefinitionRegistry, file_name: &str) -> bool {
        let mut seen = HashSet::new();
        let records: Vec<TypeId> = self
            .exportables
            .iter()
            .filter_map(|e| match e {
                Exportable::Type(id) => Some(*id),
                _ => None,
            })
            .filter(|id| {
                let node = self.arena.get(*id);
                node.class() == TypeClass::Record && !node.is_artificial() && !is_reserved_name(node.name())
            })
            .filter(|id| seen.insert(*id))
            .collect();

        let mut valid = true;
        for id in records {
            match registry.check(file_name, &self.arena, id) {
                Ok(true) => self.arena.keep(id),
                Ok(false) => {}
                Err(err) => {
                    let category = match err {
                        CoreError::DefinitionConflict { .. } => DiagnosticCategory::DefinitionConflict,
                        _ => DiagnosticCategory::TypeRejected,
                    };
                    let name = self.arena.name(id).to_string();
                    self.report(Diagnostic::error(category, err.to_string()).for_decl(name));
                    valid = false;
                }
            }
        }
        valid
    }
}

fn fold_scalar(kind: PrimitiveKind, init: &Initializer) -> Option<Scalar> {
    let scalar = match (init, kind) {
        (Initializer::Bool(b), PrimitiveKind::Boolean) => Scalar::Bool(*b),
        (Initializer::Int(v), PrimitiveKind::Boolean) => Scalar::Bool(*v != 0),
        (Initializer::Int(v), k) if k.is_float() => Scalar::Float(*v as f64),
        (Initializer::Int(v), _) => Scalar::Int(*v),
        (Initializer::Float(v), k) if k.is_float() => Scalar::Float(*v),
        (Initializer::Float(v), _) => Scalar::Int(*v as i64),
        (Initializer::Bool(b), _) => Scalar::Int(i64::from(*b)),
        (Initializer::Null, _) | (Initializer::List(_), _) => return None,
    };
    Some(scalar)
}

/// Folds an initializer against the exported node; `None` when the
/// shape cannot be reflected.
fn fold_value(arena: &TypeArena, ty: TypeId, init: &Initializer) -> Option<InitValue> {
    match arena.get(ty).kind() {
        TypeKind::Primitive { kind, .. } => match init {
            Initializer::List(items) if items.len() == 1 => fold_scalar(*kind, &items[0]).map(InitValue::Scalar),
            _ => fold_scalar(*kind, init).map(InitValue::Scalar),
        },
        TypeKind::Pointer { .. } => match init {
            Initializer::Null => Some(InitValue::Scalar(Scalar::Int(0))),
            Initializer::Int(v) => Some(InitValue::Scalar(Scalar::Int(*v))),
            _ => None,
        },
        TypeKind::Vector { element, count } => match init {
            Initializer::List(items) if items.len() <= *count as usize => items
                .iter()
                .map(|item| fold_scalar(*element, item))
                .collect::<Option<Vec<_>>>()
                .map(InitValue::Vector),
            Initializer::List(_) => None,
            scalar => {
                let value = fold_scalar(*element, scalar)?;
                Some(InitValue::Vector(vec![value; *count as usize]))
            }
        },
        TypeKind::ConstantArray { element, size } => match init {
            Initializer::List(items) if items.len() <= *size as usize => items
                .iter()
                .map(|item| fold_value(arena, *element, item))
                .collect::<Option<Vec<_>>>()
                .map(InitValue::Array),
            _ => None,
        },
        TypeKind::Matrix { .. } | TypeKind::Record { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiLevel;
    use crate::ast::{BuiltinKind, RecordDecl, UnitBuilder};

    fn context() -> ExportContext {
        ExportContext::new(TargetOptions::new(ApiLevel::MAX))
    }

    #[test]
    fn test_insert_export_type_rejects_duplicates() {
        let mut ctx = context();
        let a = ctx.arena_mut().primitive(PrimitiveKind::Signed32, false);
        assert!(ctx.insert_export_type("int", a));
        let b = ctx.arena_mut().primitive(PrimitiveKind::Signed32, false);
        assert!(!ctx.insert_export_type("int", b));
        assert_eq!(ctx.lookup_type("int"), Some(a));
    }

    #[test]
    fn test_initializers() {
        let mut builder = UnitBuilder::script("init.rs", "com.example");
        builder
            .var(VarDecl::global("gain", QualType::float()).with_init(Initializer::Int(2)))
            .var(VarDecl::global("flag", QualType::builtin(BuiltinKind::Bool)).with_init(Initializer::Int(1)))
            .var(
                VarDecl::global("color", QualType::vector(BuiltinKind::Float, 4))
                    .with_init(Initializer::Float(0.5)),
            )
            .var(
                VarDecl::global("lut", QualType::array(QualType::uint(), 3)).with_init(Initializer::List(vec![
                    Initializer::Int(1),
                    Initializer::Int(2),
                    Initializer::Int(3),
                ])),
            )
            .var(VarDecl::global("ptr", QualType::pointer_to(QualType::int())).with_init(Initializer::Null))
            .var(VarDecl::global("count", QualType::uint()).with_init(Initializer::Int(7)));
        let unit = builder.build();

        let mut ctx = context();
        assert!(ctx.process_export_all(&unit), "{}", ctx.diagnostics());
        let inits: Vec<_> = ctx.vars().iter().map(|v| v.init.clone()).collect();
        assert_eq!(inits[0], Some(InitValue::Scalar(Scalar::Float(2.0))));
        assert_eq!(inits[1], Some(InitValue::Scalar(Scalar::Bool(true))));
        assert_eq!(inits[2], Some(InitValue::Vector(vec![Scalar::Float(0.5); 4])));
        assert_eq!(
            inits[3],
            Some(InitValue::Array(vec![
                InitValue::Scalar(Scalar::Int(1)),
                InitValue::Scalar(Scalar::Int(2)),
                InitValue::Scalar(Scalar::Int(3)),
            ]))
        );
        assert_eq!(inits[4], Some(InitValue::Scalar(Scalar::Int(0))));
        assert_eq!(inits[5], Some(InitValue::Scalar(Scalar::Int(7))));
        assert!(ctx.vars()[5].is_unsigned);
        assert!(!ctx.vars()[1].is_unsigned);
    }

    #[test]
    fn test_record_initializer_warns() {
        let mut builder = UnitBuilder::script("init.rs", "com.example");
        let point = builder.record(RecordDecl::structure("Point").field("x", QualType::float()));
        builder.var(
            VarDecl::global("origin", QualType::record(point))
                .with_init(Initializer::List(vec![Initializer::Float(0.0)])),
        );
        let unit = builder.build();

        let mut ctx = context();
        assert!(ctx.process_export_all(&unit));
        assert_eq!(ctx.vars()[0].init, None);
        let warning = ctx.diagnostics().warnings().next().unwrap();
        assert_eq!(
            warning.message,
            "Reflection of initializer to variable 'origin' (of type 'Point') is unsupported currently."
        );
    }

    #[test]
    fn test_front_end_errors_short_circuit() {
        let mut builder = UnitBuilder::script("broken.rs", "com.example");
        builder
            .var(VarDecl::global("a", QualType::int()))
            .with_front_end_errors();
        let mut ctx = context();
        assert!(!ctx.process_export_all(&builder.build()));
        assert!(ctx.vars().is_empty());
    }

    #[test]
    fn test_static_kernel_and_extern_function() {
        let mut builder = UnitBuilder::script("k.rs", "com.example");
        builder
            .function(
                FunctionDecl::new("k", QualType::int())
                    .kernel()
                    .param("in", QualType::int())
                    .with_storage(StorageClass::Static),
            )
            .function(FunctionDecl::new("e", QualType::void()).with_storage(StorageClass::Extern))
            .function(FunctionDecl::new("proto", QualType::void()).without_body());
        let unit = builder.build();
        let mut ctx = context();
        assert!(!ctx.process_export_all(&unit));
        let messages: Vec<_> = ctx.diagnostics().errors().map(|d| d.message.clone()).collect();
        assert_eq!(
            messages,
            vec![
                "Invalid use of attribute kernel with static function".to_string(),
                "cannot export extern or static function 'e'".to_string(),
            ]
        );
        assert!(ctx.funcs().is_empty());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut builder = UnitBuilder::script("a.rs", "com.example");
        builder.var(VarDecl::global("a", QualType::int()));
        let mut ctx = context();
        assert!(ctx.process_export_all(&builder.build()));
        assert_eq!(ctx.vars().len(), 1);

        ctx.reset(TargetOptions::new(ApiLevel::JB), "b.rs");
        assert!(ctx.vars().is_empty());
        assert!(ctx.arena().is_empty());
        assert_eq!(ctx.export_types().count(), 0);
        assert_eq!(ctx.file_name(), "b.rs");
        assert_eq!(ctx.options().api, ApiLevel::JB);
    }
}
