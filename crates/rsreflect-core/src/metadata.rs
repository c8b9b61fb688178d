//! Per-file metadata carried by pragmas

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::ast::Pragma;
use crate::diagnostics::{Diagnostic, DiagnosticCategory, Diagnostics};

pub const SUPPORTED_VERSION: u32 = 1;

const JAVA_PACKAGE_PATTERN: &str =
    r"^[A-Za-z_$][A-Za-z0-9_$]*(\.[A-Za-z_$][A-Za-z0-9_$]*)*$";

static JAVA_PACKAGE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(JAVA_PACKAGE_PATTERN).ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FloatPrecision {
    #[default]
    Full,
    Relaxed,
    Imprecise,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportMetadata {
    pub version: Option<u32>,
    pub package_name: Option<String>,
    pub license: Option<String>,
    /// Types named by `export_type`, in pragma order
    pub export_types: Vec<String>,
    pub precision: FloatPrecision,
}

pub fn is_valid_package_name(name: &str) -> bool {
    JAVA_PACKAGE.as_ref().is_some_and(|re| re.is_match(name))
}

fn metadata_error(diagnostics: &mut Diagnostics, message: String) {
    diagnostics.push(Diagnostic::error(DiagnosticCategory::MissingMetadata, message));
}

impl ExportMetadata {
    pub fn from_pragmas(pragmas: &[Pragma], strict_dialect: bool, diagnostics: &mut Diagnostics) -> Self {
        let mut metadata = ExportMetadata {
            precision: if strict_dialect {
                FloatPrecision::Relaxed
            } else {
                FloatPrecision::Full
            },
            ..Default::default()
        };

        for pragma in pragmas {
            let value = pragma.value.as_deref().map(str::trim);
            match pragma.name.as_str() {
                "version" => match value.map(str::parse::<u32>) {
                    Some(Ok(version)) => {
                        if version != SUPPORTED_VERSION {
                            metadata_error(
                                diagnostics,
                                format!(
                                    "pragma for version in source file must be set to {}",
                                    SUPPORTED_VERSION
                                ),
                            );
                        }
                        metadata.version = Some(version);
                    }
                    _ => metadata_error(
                        diagnostics,
                        format!("invalid value for pragma version: '{}'", value.unwrap_or("")),
                    ),
                },
                "java_package_name" => {
                    let name = value.unwrap_or("");
                    if !is_valid_package_name(name) {
                        metadata_error(diagnostics, format!("invalid java package name: '{}'", name));
                    } else if let Some(previous) = &metadata.package_name {
                        if previous != name {
                            diagnostics.push(Diagnostic::warning(
                                DiagnosticCategory::Pragma,
                                format!(
                                    "java_package_name '{}' overrides earlier '{}'",
                                    name, previous
                                ),
                            ));
                            metadata.package_name = Some(name.to_string());
                        }
                    } else {
                        metadata.package_name = Some(name.to_string());
                    }
                }
                "set_reflect_license" => {
                    metadata.license = Some(pragma.value.clone().unwrap_or_default());
                }
                "export_type" => {
                    let names = value.unwrap_or("").split(',').map(str::trim);
                    metadata
                        .export_types
                        .extend(names.filter(|n| !n.is_empty()).map(str::to_string));
                }
                "rs_fp_full" => metadata.precision = FloatPrecision::Full,
                "rs_fp_relaxed" => metadata.precision = FloatPrecision::Relaxed,
                "rs_fp_imprecise" => metadata.precision = FloatPrecision::Imprecise,
                other => diagnostics.push(Diagnostic::warning(
                    DiagnosticCategory::Pragma,
                    format!("unknown pragma '{}' ignored", other),
                )),
            }
        }

        if metadata.version.is_none() {
            metadata_error(diagnostics, "Missing pragma for version in source file".to_string());
        }
        metadata
    }

    /// The generated binding's package must be known before anything is exported.
    pub fn require_package_name(&self, file_name: &str, diagnostics: &mut Diagnostics) -> bool {
        if self.package_name.is_some() {
            return true;
        }
        metadata_error(
            diagnostics,
            format!(
                "missing \"#pragma rs java_package_name(com.foo.bar)\" in source file: {}",
                file_name
            ),
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_names() {
        assert!(JAVA_PACKAGE.is_some());
        assert!(is_valid_package_name("com.example.filters"));
        assert!(is_valid_package_name("a"));
        assert!(!is_valid_package_name("com..x"));
        assert!(!is_valid_package_name("1com.x"));
        assert!(!is_valid_package_name(""));
    }

    #[test]
    fn test_recognised_pragmas() {
        let pragmas = vec![
            Pragma::new("version", "1"),
            Pragma::new("java_package_name", "com.x.y"),
            Pragma::new("set_reflect_license", "Apache-2.0"),
            Pragma::new("export_type", "Point, Color"),
            Pragma::flag("rs_fp_relaxed"),
        ];
        let mut diags = Diagnostics::new();
        let meta = ExportMetadata::from_pragmas(&pragmas, false, &mut diags);
        assert!(diags.is_empty());
        assert_eq!(meta.version, Some(1));
        assert_eq!(meta.package_name.as_deref(), Some("com.x.y"));
        assert_eq!(meta.license.as_deref(), Some("Apache-2.0"));
        assert_eq!(meta.export_types, vec!["Point", "Color"]);
        assert_eq!(meta.precision, FloatPrecision::Relaxed);
    }

    #[test]
    fn test_version_must_be_one() {
        let mut diags = Diagnostics::new();
        ExportMetadata::from_pragmas(&[Pragma::new("version", "2")], false, &mut diags);
        assert!(diags.has_errors());
        assert_eq!(
            diags.entries()[0].message,
            "pragma for version in source file must be set to 1"
        );

        let mut diags = Diagnostics::new();
        ExportMetadata::from_pragmas(&[], false, &mut diags);
        assert_eq!(diags.by_category(DiagnosticCategory::MissingMetadata).count(), 1);
    }

    #[test]
    fn test_unknown_pragma_warns() {
        let mut diags = Diagnostics::new();
        let meta = ExportMetadata::from_pragmas(
            &[Pragma::new("version", "1"), Pragma::flag("rs_mystery")],
            true,
            &mut diags,
        );
        assert!(!diags.has_errors());
        assert_eq!(diags.warnings().count(), 1);
        assert_eq!(meta.precision, FloatPrecision::Relaxed);
    }

    #[test]
    fn test_missing_package() {
        let meta = ExportMetadata::default();
        let mut diags = Diagnostics::new();
        assert!(!meta.require_package_name("mono.rs", &mut diags));
        assert!(diags.entries()[0].message.ends_with("in source file: mono.rs"));
    }
}
