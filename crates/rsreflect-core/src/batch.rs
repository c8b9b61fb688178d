//! Compiling a sequence of files against one shared registry

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::api::TargetOptions;
use crate::ast::TranslationUnit;
use crate::context::ExportContext;
use crate::diagnostics::Diagnostics;
use crate::error::CoreError;
use crate::odr::DefinitionRegistry;

/// Outcome of exporting one file.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub file: String,
    pub success: bool,
    pub vars: usize,
    pub funcs: usize,
    pub kernels: usize,
    pub types: usize,
    pub diagnostics: Diagnostics,
}

impl UnitReport {
    pub fn into_result(self) -> Result<UnitReport, CoreError> {
        if self.success {
            Ok(self)
        } else {
            Err(CoreError::ExportFailed {
                file: self.file.clone(),
                errors: self.diagnostics.error_count(),
            })
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub files: usize,
    pub failed: Vec<String>,
    pub registered_types: usize,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Files are compiled one after another; the per-file context is reset
/// between them while the definition registry carries over.
#[derive(Debug)]
pub struct Batch {
    defaults: TargetOptions,
    context: ExportContext,
    registry: DefinitionRegistry,
    reports: Vec<UnitReport>,
}

impl Batch {
    pub fn new(defaults: TargetOptions) -> Self {
        Self {
            defaults,
            context: ExportContext::new(defaults),
            registry: DefinitionRegistry::new(defaults.pointer_width),
            reports: Vec::new(),
        }
    }

    /// Unit-level settings override the batch defaults.
    pub fn options_for(&self, unit: &TranslationUnit) -> TargetOptions {
        TargetOptions {
            api: unit.target_api.unwrap_or(self.defaults.api),
            strict_dialect: unit.strict_dialect || self.defaults.strict_dialect,
            pointer_width: self.defaults.pointer_width,
        }
    }

    #[instrument(skip(self, unit), fields(file = %unit.file_name))]
    pub fn compile(&mut self, unit: &TranslationUnit) -> UnitReport {
        let options = self.options_for(unit);
        if !options.api.is_supported() {
            warn!(api = %options.api, "target API level outside the supported range");
        }

        self.context.reset(options, unit.file_name.clone());
        let mut success = self.context.process_export_all(unit);
        if success {
            success = self
                .context
                .check_one_definition_rule(&mut self.registry, &unit.file_name);
        }

        let report = UnitReport {
            file: unit.file_name.clone(),
            success,
            vars: self.context.vars().len(),
            funcs: self.context.funcs().len(),
            kernels: self.context.foreach().len(),
            types: self.context.export_types().count(),
            diagnostics: self.context.diagnostics().clone(),
        };
        info!(
            success,
            vars = report.vars,
            funcs = report.funcs,
            kernels = report.kernels,
            "compiled"
        );
        self.reports.push(report.clone());
        report
    }

    /// Context of the most recently compiled file.
    pub fn context(&self) -> &ExportContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ExportContext {
        &mut self.context
    }

    pub fn registry(&self) -> &DefinitionRegistry {
        &self.registry
    }

    pub fn reports(&self) -> &[UnitReport] {
        &self.reports
    }

    pub fn finish(mut self) -> BatchSummary {
        let summary = BatchSummary {
            files: self.reports.len(),
            failed: self
                .reports
                .iter()
                .filter(|r| !r.success)
                .map(|r| r.file.clone())
                .collect(),
            registered_types: self.registry.teardown(),
        };
        info!(
            files = summary.files,
            failed = summary.failed.len(),
            "batch finished"
        );
        summary
    }
}
