//! Error types for reflection consumption

use std::fmt;

use rsreflect_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodegenError {
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Missing java package name for {0}")]
    MissingPackage(String),

    #[error("Layout error at {location}: {message}")]
    Layout {
        location: ErrorLocation,
        message: String,
    },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodegenError {
    /// Attaches the script name to a layout error; other errors pass through.
    pub fn in_script(self, script: &str) -> Self {
        match self {
            CodegenError::Layout { location, message } => CodegenError::Layout {
                location: location.in_script(script),
                message,
            },
            other => other,
        }
    }
}

/// Where in a script a consumption error occurred
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorLocation {
    /// Script file name
    pub script: Option<String>,
    pub type_name: Option<String>,
    pub field: Option<String>,
}

impl ErrorLocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn in_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn in_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.script, &self.type_name, &self.field) {
            (Some(s), Some(t), Some(field)) => write!(f, "{}:{}.{}", s, t, field),
            (Some(s), Some(t), None) => write!(f, "{}:{}", s, t),
            (Some(s), None, _) => write!(f, "{}", s),
            (None, Some(t), Some(field)) => write!(f, "{}.{}", t, field),
            (None, Some(t), None) => write!(f, "{}", t),
            (None, None, Some(field)) => write!(f, ".{}", field),
            (None, None, None) => write!(f, "<unknown location>"),
        }
    }
}
