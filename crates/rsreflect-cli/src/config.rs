//! Driver configuration (`rsreflect.toml`)

use anyhow::{bail, Context, Result};
use rsreflect_core::{ApiLevel, PointerWidth, TargetOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "rsreflect.toml";

/// What the driver writes for each successfully exported file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Emit {
    /// Type descriptors as JSON
    #[default]
    Json,
    /// Type descriptors in the `RSTD` binary form
    Binary,
    /// Reflection plans for binding generators
    Plan,
}

impl Emit {
    pub fn extension(self) -> &'static str {
        match self {
            Emit::Json => "types.json",
            Emit::Binary => "rstd",
            Emit::Plan => "plan.json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub target_api: u32,
    pub strict_dialect: bool,
    pub pointer_width: u32,
    pub output_dir: Option<PathBuf>,
    pub emit: Emit,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_api: ApiLevel::MAX.get(),
            strict_dialect: false,
            pointer_width: 32,
            output_dir: None,
            emit: Emit::default(),
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub target_api: Option<u32>,
    pub strict_dialect: bool,
    pub pointer_width: Option<u32>,
    pub output_dir: Option<PathBuf>,
    pub emit: Option<Emit>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Explicit path, else `rsreflect.toml` in `dir` if present, else defaults.
    pub fn discover(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let candidate = dir.join(DEFAULT_CONFIG_FILE);
        if candidate.is_file() {
            tracing::debug!("using {}", candidate.display());
            Self::from_file(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(api) = overrides.target_api {
            self.target_api = api;
        }
        // A flag can only turn the strict dialect on.
        self.strict_dialect |= overrides.strict_dialect;
        if let Some(width) = overrides.pointer_width {
            self.pointer_width = width;
        }
        if overrides.output_dir.is_some() {
            self.output_dir = overrides.output_dir;
        }
        if let Some(emit) = overrides.emit {
            self.emit = emit;
        }
    }

    /// Pre-flight check of the configured target.
    pub fn target_options(&self) -> Result<TargetOptions> {
        let api = ApiLevel(self.target_api);
        if !api.is_supported() {
            bail!(
                "target API level {} is outside the supported range {}-{}",
                api,
                ApiLevel::MIN,
                ApiLevel::MAX
            );
        }
        let Some(width) = PointerWidth::from_bits(self.pointer_width) else {
            bail!("pointer width must be 32 or 64, got {}", self.pointer_width);
        };
        Ok(TargetOptions::new(api)
            .strict(self.strict_dialect)
            .with_pointer_width(width))
    }
}
