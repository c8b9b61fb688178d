//! Batch compile over translation-unit files

use anyhow::{bail, Context, Result};
use rsreflect_codegen::{Codegen, PlanGenerator};
use rsreflect_core::descriptor::DescId;
use rsreflect_core::{Batch, BatchSummary, DescriptorTable, ExportContext, TranslationUnit, UnitReport};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{Config, Emit};

/// Extension of serialized translation units.
pub const UNIT_EXTENSION: &str = "json";

#[derive(Debug)]
pub struct RunOutcome {
    pub summary: BatchSummary,
    pub reports: Vec<UnitReport>,
    /// Files written into the output directory, in compile order
    pub written: Vec<PathBuf>,
}

/// Descriptor output for one file: the shared table plus the node of each
/// named export type.
#[derive(Debug, Serialize)]
struct DescriptorDump<'a> {
    script: &'a str,
    types: Vec<(String, DescId)>,
    table: &'a DescriptorTable,
}

/// Expands directories into the unit files below them, sorted by path.
/// Plain file arguments are taken as given.
pub fn discover_units(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut units = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found = Vec::new();
            for entry in WalkDir::new(input).follow_links(true) {
                let entry = entry.with_context(|| format!("Failed to walk {}", input.display()))?;
                let path = entry.path();
                if entry.file_type().is_file()
                    && path.extension().and_then(|e| e.to_str()) == Some(UNIT_EXTENSION)
                {
                    found.push(path.to_path_buf());
                }
            }
            found.sort();
            units.extend(found);
        } else if input.is_file() {
            units.push(input.clone());
        } else {
            bail!("input not found: {}", input.display());
        }
    }
    Ok(units)
}

pub fn load_unit(path: &Path) -> Result<TranslationUnit> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read translation unit: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse translation unit: {}", path.display()))
}

/// Renders the configured output for the file currently held by `context`.
pub fn render(context: &mut ExportContext, emit: Emit) -> Result<Vec<u8>> {
    match emit {
        Emit::Plan => Ok(PlanGenerator.generate(context)?.into_bytes()),
        Emit::Json | Emit::Binary => {
            let named: Vec<(String, _)> = context
                .export_types()
                .map(|(name, id)| (name.to_string(), id))
                .collect();
            let arena = context.arena_mut();
            let types: Vec<(String, DescId)> = named
                .into_iter()
                .map(|(name, id)| {
                    let desc = arena.to_descriptor(id);
                    (name, desc)
                })
                .collect();
            if emit == Emit::Binary {
                return Ok(arena.descriptors().encode()?);
            }
            let dump = DescriptorDump {
                script: context.file_name(),
                types,
                table: context.arena().descriptors(),
            };
            Ok(serde_json::to_vec_pretty(&dump)?)
        }
    }
}

fn output_path(dir: &Path, unit_file: &str, emit: Emit) -> PathBuf {
    let stem = Path::new(unit_file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unit");
    dir.join(format!("{}.{}", stem, emit.extension()))
}

/// Compiles every unit under `inputs` against one registry.
///
/// A file that fails export is reported and skipped; the remaining files
/// are still compiled. Without an output directory, text output goes to
/// stdout.
pub fn run(config: &Config, inputs: &[PathBuf]) -> Result<RunOutcome> {
    if config.emit == Emit::Binary && config.output_dir.is_none() {
        bail!("binary output requires an output directory");
    }
    if let Some(dir) = &config.output_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    }
    compile_all(config, inputs, true)
}

/// Same batch as [`run`] without rendering anything.
pub fn check(config: &Config, inputs: &[PathBuf]) -> Result<RunOutcome> {
    compile_all(config, inputs, false)
}

fn compile_all(config: &Config, inputs: &[PathBuf], emit_output: bool) -> Result<RunOutcome> {
    let options = config.target_options()?;
    let files = discover_units(inputs)?;
    if files.is_empty() {
        bail!("no translation units found");
    }

    info!("compiling {} translation unit(s) at API level {}", files.len(), options.api);
    let mut batch = Batch::new(options);
    let mut written = Vec::new();
    for path in &files {
        let unit = load_unit(path)?;
        let report = batch.compile(&unit);
        if !report.success {
            warn!("{}: export failed\n{}", report.file, report.diagnostics.format_compact());
            continue;
        }
        for warning in report.diagnostics.warnings() {
            warn!("{}: {}", report.file, warning);
        }
        if !emit_output {
            continue;
        }

        let bytes = render(batch.context_mut(), config.emit)?;
        match &config.output_dir {
            Some(dir) => {
                let target = output_path(dir, &report.file, config.emit);
                fs::write(&target, &bytes)
                    .with_context(|| format!("Failed to write {}", target.display()))?;
                debug!("wrote {}", target.display());
                written.push(target);
            }
            None => println!("{}", String::from_utf8_lossy(&bytes)),
        }
    }

    let reports = batch.reports().to_vec();
    let summary = batch.finish();
    info!(
        "{} file(s), {} failed, {} shared type(s)",
        summary.files,
        summary.failed.len(),
        summary.registered_types
    );
    Ok(RunOutcome {
        summary,
        reports,
        written,
    })
}

/// Decodes a binary descriptor file into its JSON form.
pub fn inspect(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let table = DescriptorTable::decode(&bytes)
        .with_context(|| format!("Invalid descriptor file: {}", path.display()))?;
    Ok(serde_json::to_string_pretty(&table)?)
}
