//! cppdoc: documentation generator core for C++ projects
//!
//! Turns front-end declaration records into a cross-referenced symbol graph,
//! parses doc comments into prose and code blocks, and compiles and runs
//! those code blocks as sandboxed tests.

// Core model - re-exported from cppdoc-core
pub use cppdoc_core::diagnostics;
pub use cppdoc_core::error;
pub use cppdoc_core::frontend;
pub use cppdoc_core::graph;
pub use cppdoc_core::model;
pub use cppdoc_core::output;
pub use cppdoc_core::resolve;
pub use cppdoc_core::results;
pub use cppdoc_core::types;

// Run phases
pub mod comment;
pub mod config;
pub mod doctest;
pub mod ingest;
pub mod pipeline;

// Error bridges - converts driver errors to CppdocError
mod error_bridges;
