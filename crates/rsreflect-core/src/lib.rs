//! Export analysis and type model for RenderScript reflection
//!
//! A front end hands over one [`TranslationUnit`] per script. The
//! [`ExportContext`] decides which globals, invokables and kernels are
//! visible to the host, builds a [`TypeArena`] of the types they use and
//! collects [`Diagnostics`]. [`Batch`] drives several files against one
//! [`DefinitionRegistry`] so records keep one layout across the build.

pub mod api;
pub mod ast;
pub mod batch;
mod construct;
pub mod context;
pub mod descriptor;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod kernel;
pub mod layout;
pub mod metadata;
pub mod odr;
pub mod primitive;
pub mod types;
pub mod validate;

pub use api::{ApiLevel, PointerWidth, TargetOptions};
pub use ast::{TranslationUnit, UnitBuilder};
pub use batch::{Batch, BatchSummary, UnitReport};
pub use context::ExportContext;
pub use descriptor::{DescId, DescriptorNode, DescriptorTable};
pub use diagnostics::{Diagnostic, DiagnosticCategory, Diagnostics};
pub use error::CoreError;
pub use export::{ExportForEach, ExportFunc, ExportVar, Exportable};
pub use kernel::Signature;
pub use metadata::ExportMetadata;
pub use odr::DefinitionRegistry;
pub use primitive::PrimitiveKind;
pub use types::{TypeArena, TypeClass, TypeId, TypeKind, TypeNode};
