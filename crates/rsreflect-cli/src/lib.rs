//! Command-line driver for RenderScript export analysis
//!
//! Loads serialized translation units, compiles them as one batch and
//! writes type descriptors or reflection plans.

pub mod config;
pub mod driver;

pub use config::{Config, Emit, Overrides};
pub use driver::{check, discover_units, inspect, load_unit, run, RunOutcome};
