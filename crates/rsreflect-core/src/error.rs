use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Missing or invalid metadata: {0}")]
    MissingMetadata(String),

    #[error(
        "type '{type_name}' in different translation units ({file} v.s. {first_file}) has incompatible type definition"
    )]
    DefinitionConflict {
        type_name: String,
        file: String,
        first_file: String,
    },

    #[error("Export failed for {file} ({errors} error(s))")]
    ExportFailed { file: String, errors: usize },

    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
