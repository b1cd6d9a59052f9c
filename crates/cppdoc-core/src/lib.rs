//! Core model for cppdoc.
//!
//! This crate holds everything that does not touch processes or the
//! filesystem:
//! - Declaration / reference / doc-comment data model and stable ids
//! - Front-end record types and the `FrontEnd` trait
//! - Symbol graph arena and its builder
//! - Cross-reference resolver
//! - Diagnostics, run classification and doc-test result table
//! - Error types and JSON output types

pub mod diagnostics;
pub mod error;
pub mod frontend;
pub mod graph;
pub mod model;
pub mod output;
pub mod resolve;
pub mod results;
pub mod types;
