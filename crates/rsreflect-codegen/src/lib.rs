//! Consumption API for binding generators
//!
//! Turns the result of an export pass into host-facing names, element
//! layouts and slot-numbered reflection plans. Source templates are left
//! to the generators themselves.

pub mod element;
pub mod error;
pub mod java;
pub mod plan;

use rsreflect_core::ExportContext;

pub use element::{element_layout, ElementEntry};
pub use error::CodegenError;
pub use java::{host_type_name, ReflectionTypeData};
pub use plan::ReflectionPlan;

/// Common trait for all generators fed by an export pass
pub trait Codegen {
    fn generate(&mut self, context: &ExportContext) -> Result<String, CodegenError>;
}

/// Writes the reflection plan as pretty-printed JSON.
#[derive(Debug, Default)]
pub struct PlanGenerator;

impl Codegen for PlanGenerator {
    fn generate(&mut self, context: &ExportContext) -> Result<String, CodegenError> {
        ReflectionPlan::build(context)?.to_json()
    }
}
