//! Front-end interface: raw declaration records.
//!
//! The static-analysis front end (a clang-based tool, or a recorded dump of
//! one) produces one [`TranslationUnit`] per input file. Each unit carries the
//! [`RawRecord`]s seen in the file plus the front end's own diagnostics. The
//! ingestion adapter turns these into a normalized record stream for the
//! graph builder.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostics::Severity;
use crate::model::{signature_key, DeclKind, Param, RecordTag};
use crate::types::Location;

// ============================================================================
// Record Types
// ============================================================================

/// Kind of a raw record.
///
/// The declaration kinds plus `UsingDirective`, which is not a declaration but
/// nominates a namespace for lookup inside its parent scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Namespace,
    Record,
    Enum,
    Function,
    Alias,
    Field,
    EnumConstant,
    TemplateParam,
    UsingDirective,
}

impl RecordKind {
    /// The declaration kind, or `None` for using-directives.
    pub fn decl_kind(&self) -> Option<DeclKind> {
        match self {
            RecordKind::Namespace => Some(DeclKind::Namespace),
            RecordKind::Record => Some(DeclKind::Record),
            RecordKind::Enum => Some(DeclKind::Enum),
            RecordKind::Function => Some(DeclKind::Function),
            RecordKind::Alias => Some(DeclKind::Alias),
            RecordKind::Field => Some(DeclKind::Field),
            RecordKind::EnumConstant => Some(DeclKind::EnumConstant),
            RecordKind::TemplateParam => Some(DeclKind::TemplateParam),
            RecordKind::UsingDirective => None,
        }
    }
}

/// Signature and type metadata attached to a record.
///
/// Every field is optional in the wire format; which ones are meaningful
/// depends on the record kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSignature {
    pub params: Vec<Param>,
    pub return_type: Option<String>,
    pub template_params: Vec<String>,
    pub bases: Vec<String>,
    pub underlying_type: Option<String>,
    /// Qualified name of the primary template, for specializations.
    pub specialization_of: Option<String>,
    pub specialization_args: Vec<String>,
    pub is_const: bool,
    pub is_static: bool,
    pub is_virtual: bool,
    pub record_tag: Option<RecordTag>,
}

impl RawSignature {
    /// Canonical identity key for a record of `kind`.
    ///
    /// Functions are keyed by parameter types and constness; specializations
    /// by their argument list; everything else by name and kind alone.
    pub fn key_for(&self, kind: DeclKind) -> String {
        match kind {
            DeclKind::Function => {
                signature_key(self.params.iter().map(|p| p.type_text.as_str()), self.is_const)
            }
            DeclKind::Record if self.specialization_of.is_some() => signature_key(
                self.specialization_args.iter().map(String::as_str),
                false,
            ),
            _ => String::new(),
        }
    }
}

/// Identity of a record's enclosing declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub qualified_name: String,
    pub kind: DeclKind,
    /// Needed to pick the right overload when the parent is a function.
    #[serde(default)]
    pub signature: Option<RawSignature>,
}

impl ParentRef {
    /// Canonical identity key of the parent.
    pub fn signature_key(&self) -> String {
        self.signature
            .as_ref()
            .map(|sig| sig.key_for(self.kind))
            .unwrap_or_default()
    }
}

/// One declaration sighting reported by the front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub kind: RecordKind,
    /// Qualified name without a leading `::`. For using-directives, the
    /// nominated namespace as written.
    pub qualified_name: String,
    /// Unqualified spelling.
    #[serde(default)]
    pub spelling: String,
    pub location: Location,
    #[serde(default)]
    pub raw_comment: Option<String>,
    #[serde(default)]
    pub parent: Option<ParentRef>,
    #[serde(default)]
    pub signature: RawSignature,
}

impl RawRecord {
    /// Create a record with no comment, parent or signature.
    pub fn new(kind: RecordKind, qualified_name: impl Into<String>, location: Location) -> Self {
        let qualified_name = qualified_name.into();
        let spelling = last_component(&qualified_name).to_string();
        RawRecord {
            kind,
            qualified_name,
            spelling,
            location,
            raw_comment: None,
            parent: None,
            signature: RawSignature::default(),
        }
    }

    /// Set the raw comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.raw_comment = Some(comment.into());
        self
    }

    /// Set the parent reference.
    pub fn with_parent(mut self, qualified_name: impl Into<String>, kind: DeclKind) -> Self {
        self.parent = Some(ParentRef {
            qualified_name: qualified_name.into(),
            kind,
            signature: None,
        });
        self
    }

    /// Set the signature metadata.
    pub fn with_signature(mut self, signature: RawSignature) -> Self {
        self.signature = signature;
        self
    }

    /// Canonical identity key for this record.
    pub fn signature_key(&self) -> String {
        self.kind
            .decl_kind()
            .map(|kind| self.signature.key_for(kind))
            .unwrap_or_default()
    }

    /// Whether the record is a template specialization.
    pub fn is_specialization(&self) -> bool {
        self.kind == RecordKind::Record && self.signature.specialization_of.is_some()
    }

    /// Whether the record is a class template deduction guide, which the
    /// front end reports as a function named `<deduction guide for T>`.
    pub fn is_deduction_guide(&self) -> bool {
        self.kind == RecordKind::Function && self.qualified_name.contains("deduction guide")
    }
}

/// Split a qualified name at top-level `::` separators.
///
/// Separators inside template argument lists are not split points, so
/// `a::B<c::D>::e` yields `["a", "B<c::D>", "e"]`.
pub fn split_qualified(name: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let bytes = name.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'<' | b'(' => depth += 1,
            b'>' | b')' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                parts.push(&name[start..i]);
                i += 2;
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&name[start..]);
    parts.retain(|p| !p.is_empty());
    parts
}

/// Last component of a qualified name.
pub fn last_component(name: &str) -> &str {
    split_qualified(name).last().copied().unwrap_or("")
}

/// Qualified name of the enclosing scope, `""` at top level.
pub fn parent_qualified_name(name: &str) -> String {
    let parts = split_qualified(name);
    match parts.split_last() {
        Some((_, prefix)) => prefix.join("::"),
        None => String::new(),
    }
}

// ============================================================================
// Translation Units
// ============================================================================

/// A diagnostic emitted by the front end itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontEndDiagnostic {
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub location: Option<Location>,
}

/// The front end's output for one file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TranslationUnit {
    pub file: String,
    #[serde(default)]
    pub records: Vec<RawRecord>,
    #[serde(default)]
    pub diagnostics: Vec<FrontEndDiagnostic>,
}

impl TranslationUnit {
    /// Create an empty unit for `file`.
    pub fn new(file: impl Into<String>) -> Self {
        TranslationUnit {
            file: file.into(),
            records: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Iterate over the unit's records in stream order.
    pub fn records(&self) -> impl Iterator<Item = &RawRecord> {
        self.records.iter()
    }

    /// First fatal diagnostic, if the front end gave up on this file.
    pub fn fatal(&self) -> Option<&FrontEndDiagnostic> {
        self.diagnostics
            .iter()
            .find(|d| d.severity == Severity::Fatal)
    }
}

// ============================================================================
// Front End Trait
// ============================================================================

/// Errors from invoking the front end on a file.
#[derive(Debug, Error)]
pub enum FrontEndError {
    /// The input file does not exist or is unreadable.
    #[error("input not found: {path}")]
    InputNotFound { path: String },

    /// The front end crashed or returned garbage.
    #[error("front end failed on {file}: {message}")]
    Crashed { file: String, message: String },

    /// A record dump could not be decoded.
    #[error("malformed record dump: {message}")]
    Malformed { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A static-analysis front end producing raw declaration records.
///
/// Implementations are invoked concurrently from the ingestion pool and must
/// be thread-safe.
pub trait FrontEnd: Send + Sync {
    /// Parse one file with the given compiler arguments.
    fn parse(&self, file: &Path, args: &[String]) -> Result<TranslationUnit, FrontEndError>;
}

// ============================================================================
// Tests
// ============================================================================
