//! Common types and utilities shared across the pipeline stages.

// Submodule declarations
pub mod bom;
pub mod charset;
pub mod error;

// Re-exports for convenience
pub use bom::{BomDetection, BomKind};
pub use charset::Charset;
pub use error::{Error, Result};
