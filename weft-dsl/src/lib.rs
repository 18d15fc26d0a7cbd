//! ABOUTME: Declarative document layer for the weft runtime
//! ABOUTME: Surface DSL model, YAML loader with env/include expansion, and the semantic resolver
//!
//! The document model is two-layered: [`model`] holds the surface types
//! where cross-references are strings (normalized to `$ref` stubs at parse
//! time), and [`semantic`] holds the resolved model where every reference is
//! a direct object pointer. [`loader`] turns a file or URL into a parsed
//! tree; [`resolver::resolve`] turns that tree into the semantic model,
//! reporting every resolution and validation problem at once.

pub mod loader;
pub mod model;
pub mod resolver;
pub mod semantic;

pub use loader::{load_document, load_raw, parse_document};
pub use resolver::resolve;
