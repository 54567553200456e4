//! Shared machine-readable contracts for assay auditing.
//!
//! The entity graph types are read-only views over a fully expanded
//! experiment record; the finding types are what every audit rule emits.

pub mod entities;
pub mod finding;

pub use entities::*;
pub use finding::{Finding, Severity};

pub const PROTOCOL_VERSION: &str = "v1";
