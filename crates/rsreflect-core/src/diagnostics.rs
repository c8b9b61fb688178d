//! Diagnostic collection for one compiled file
//!
//! Problems found while exporting are collected rather than raised, so
//! every declaration in a file gets checked before the file is marked
//! failed.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::ast::SourceLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    Note,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DiagnosticCategory {
    /// A declaration's type failed exportability checks
    TypeRejected,
    /// Kernel parameter roles violate the active grammar
    KernelShape,
    /// Same record name, different layout across files
    DefinitionConflict,
    /// Required pragma absent or invalid
    MissingMetadata,
    UnsupportedInitializer,
    Pragma,
}

impl fmt::Display for DiagnosticCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticCategory::TypeRejected => write!(f, "TYPE_REJECTED"),
            DiagnosticCategory::KernelShape => write!(f, "KERNEL_SHAPE"),
            DiagnosticCategory::DefinitionConflict => write!(f, "DEFINITION_CONFLICT"),
            DiagnosticCategory::MissingMetadata => write!(f, "MISSING_METADATA"),
            DiagnosticCategory::UnsupportedInitializer => write!(f, "UNSUPPORTED_INITIALIZER"),
            DiagnosticCategory::Pragma => write!(f, "PRAGMA"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub category: DiagnosticCategory,
    pub location: Option<SourceLocation>,
    /// Name of the offending declaration
    pub decl: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn error(category: DiagnosticCategory, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            category,
            location: None,
            decl: None,
            message: message.into(),
        }
    }

    pub fn warning(category: DiagnosticCategory, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(category, message)
        }
    }

    pub fn at(mut self, location: &SourceLocation) -> Self {
        self.location = Some(location.clone());
        self
    }

    pub fn for_decl(mut self, decl: impl Into<String>) -> Self {
        self.decl = Some(decl.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        if let Some(location) = &self.location {
            write!(f, "{}: ", location)?;
        }
        write!(f, "{}: {}", severity, self.message)
    }
}

/// Position in a [`Diagnostics`] list that can be rolled back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => tracing::debug!(category = %diagnostic.category, "{}", diagnostic),
            Severity::Warning => tracing::warn!("{}", diagnostic),
            Severity::Note => tracing::trace!("{}", diagnostic),
        }
        self.entries.push(diagnostic);
    }

    pub fn error(&mut self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(Diagnostic::error(category, message));
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(Diagnostic::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.entries.iter().filter(|d| d.is_error()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn by_category(&self, category: DiagnosticCategory) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.category == category)
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.entries.len())
    }

    /// Discards everything reported since `checkpoint`.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.entries.truncate(checkpoint.0);
    }

    pub fn merge(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Errors grouped by category, at most ten per group.
    pub fn format_summary(&self) -> String {
        if self.entries.is_empty() {
            return "No diagnostics".to_string();
        }

        let mut by_category: BTreeMap<DiagnosticCategory, Vec<&Diagnostic>> = BTreeMap::new();
        for entry in &self.entries {
            by_category.entry(entry.category).or_default().push(entry);
        }

        let mut lines = Vec::new();
        lines.push(format!(
            "Found {} diagnostic(s), {} error(s):",
            self.entries.len(),
            self.error_count()
        ));
        lines.push(String::new());

        for (category, entries) in by_category {
            lines.push(format!("## {} ({}):", category, entries.len()));
            for entry in entries.iter().take(10) {
                lines.push(format!("  - {}", entry));
            }
            if entries.len() > 10 {
                lines.push(format!("  ... and {} more", entries.len() - 10));
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }

    pub fn format_compact(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_summary())
    }
}
