//! Documentation model: declarations, references and doc comments.
//!
//! This module defines the node and edge types stored in the
//! [`SymbolGraph`](crate::graph::SymbolGraph):
//! - [`Declaration`]: one documented C++ entity (namespace, record, function, ...)
//! - [`Reference`]: a textual use of a name owned by a declaration
//! - [`ReferenceTarget`]: what a reference resolved to
//! - [`DocComment`] / [`CodeBlock`]: the split form of a declaration's comment
//!
//! # Identity
//!
//! [`DeclId`] is derived from content, never from allocation order or memory
//! addresses: the first eight bytes of a SHA-256 over the qualified name, the
//! kind and the canonical signature key. Regenerating from the same input
//! always produces the same ids. [`BlockId`] is derived the same way from the
//! owning declaration and the block's ordinal. [`ReferenceId`] is sequential
//! but allocated in a deterministic build order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::types::Location;

// ============================================================================
// ID Types
// ============================================================================

/// Content-derived identifier for a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId(pub u64);

impl DeclId {
    /// Compute the id for a declaration from its identity triple.
    pub fn compute(qualified_name: &str, kind: DeclKind, signature_key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(qualified_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(signature_key.as_bytes());
        DeclId(first_u64(&hasher.finalize()))
    }
}

impl fmt::Display for DeclId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decl_{:016x}", self.0)
    }
}

impl FromStr for DeclId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_prefixed_hex(s, "decl_").map(DeclId)
    }
}

/// Sequential identifier for a reference within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ReferenceId(pub u32);

impl ReferenceId {
    /// Create a new reference ID.
    pub fn new(id: u32) -> Self {
        ReferenceId(id)
    }

    /// Position of the reference in the graph's reference table.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref_{}", self.0)
    }
}

/// Content-derived identifier for a code block inside a doc comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u64);

impl BlockId {
    /// Compute the id of the `ordinal`-th code block of `owner`'s comment.
    pub fn compute(owner: DeclId, ordinal: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(owner.0.to_be_bytes());
        hasher.update((ordinal as u64).to_be_bytes());
        BlockId(first_u64(&hasher.finalize()))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block_{:016x}", self.0)
    }
}

impl FromStr for BlockId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_prefixed_hex(s, "block_").map(BlockId)
    }
}

fn first_u64(digest: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

fn parse_prefixed_hex(s: &str, prefix: &str) -> Result<u64, String> {
    let digits = s
        .strip_prefix(prefix)
        .ok_or_else(|| format!("expected '{}' prefix in '{}'", prefix, s))?;
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid id '{}': {}", s, e))
}

// Hash ids serialize as their display form: JSON consumers lose precision on
// integers above 2^53.
macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(DeclId);
string_serde!(BlockId);

// ============================================================================
// Declaration Kinds
// ============================================================================

/// Kind of a documented declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DeclKind {
    Namespace,
    Record,
    Enum,
    Function,
    Alias,
    Field,
    EnumConstant,
    TemplateParam,
}

impl DeclKind {
    /// Stable name used in id hashing and output.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclKind::Namespace => "namespace",
            DeclKind::Record => "record",
            DeclKind::Enum => "enum",
            DeclKind::Function => "function",
            DeclKind::Alias => "alias",
            DeclKind::Field => "field",
            DeclKind::EnumConstant => "enum_constant",
            DeclKind::TemplateParam => "template_param",
        }
    }

    /// Whether declarations of this kind open a lookup scope.
    ///
    /// Functions count as scopes only for their own template parameters.
    pub fn is_scope(&self) -> bool {
        matches!(
            self,
            DeclKind::Namespace | DeclKind::Record | DeclKind::Enum | DeclKind::Function
        )
    }

    /// Whether the kind names a type.
    pub fn is_type(&self) -> bool {
        matches!(
            self,
            DeclKind::Record | DeclKind::Enum | DeclKind::Alias | DeclKind::TemplateParam
        )
    }
}

impl fmt::Display for DeclKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag keyword a record was declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordTag {
    Struct,
    Class,
    Union,
}

// ============================================================================
// Signatures
// ============================================================================

/// A single function parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name, if the declaration spelled one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Parameter type as written.
    #[serde(rename = "type")]
    pub type_text: String,
}

impl Param {
    /// Create a named parameter.
    pub fn new(name: impl Into<String>, type_text: impl Into<String>) -> Self {
        Param {
            name: Some(name.into()),
            type_text: type_text.into(),
        }
    }

    /// Create an unnamed parameter.
    pub fn unnamed(type_text: impl Into<String>) -> Self {
        Param {
            name: None,
            type_text: type_text.into(),
        }
    }
}

/// Signature metadata for callables.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Signature {
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(default)]
    pub is_const: bool,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_virtual: bool,
}

impl Signature {
    /// Canonical key distinguishing overloads: normalized parameter types
    /// plus the `const` qualifier. Parameter names and the return type do
    /// not participate, matching C++ overloading rules.
    pub fn key(&self) -> String {
        signature_key(self.params.iter().map(|p| p.type_text.as_str()), self.is_const)
    }

    /// Normalized parameter types, in order.
    pub fn param_types(&self) -> Vec<String> {
        self.params
            .iter()
            .map(|p| normalize_type_text(&p.type_text))
            .collect()
    }
}

/// Build a canonical signature key from parameter type texts.
pub fn signature_key<'a>(param_types: impl Iterator<Item = &'a str>, is_const: bool) -> String {
    let params: Vec<String> = param_types.map(normalize_type_text).collect();
    let mut key = format!("({})", params.join(","));
    if is_const {
        key.push_str(" const");
    }
    key
}

/// Collapse whitespace in C++ type text.
///
/// Runs of whitespace become a single space when they separate two
/// identifier characters (`unsigned int`) and are removed otherwise
/// (`std::vector< int >` becomes `std::vector<int>`).
pub fn normalize_type_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.trim().chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            if out.chars().last().is_some_and(is_ident_char) && is_ident_char(ch) {
                out.push(' ');
            }
            pending_space = false;
        }
        out.push(ch);
    }
    out
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

// ============================================================================
// Declarations
// ============================================================================

/// A collapsed template specialization, kept as an attribute of its primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specialization {
    /// Template arguments as written, normalized.
    pub args: Vec<String>,
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_comment: Option<String>,
}

/// A documented C++ entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub id: DeclId,
    pub kind: DeclKind,
    /// Unqualified spelling.
    pub name: String,
    /// Fully qualified name without a leading `::`. Empty for the root.
    pub qualified_name: String,
    /// First location the entity was seen at.
    pub location: Location,
    /// Other locations of the same entity, in first-seen order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redeclarations: Vec<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_comment: Option<String>,
    /// Containing declaration. `None` only for the root namespace.
    pub parent: Option<DeclId>,
    pub children: Vec<DeclId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub template_params: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specializations: Vec<Specialization>,
    /// Base classes as written (records only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bases: Vec<String>,
    /// Alias target, field type, or enum underlying type, as written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying_type: Option<String>,
    /// Namespaces nominated by `using namespace` inside this scope.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub using_directives: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_tag: Option<RecordTag>,
}

impl Declaration {
    /// Create a declaration with the given identity and no attributes.
    pub fn new(
        kind: DeclKind,
        name: impl Into<String>,
        qualified_name: impl Into<String>,
        signature_key: &str,
        location: Location,
    ) -> Self {
        let qualified_name = qualified_name.into();
        Declaration {
            id: DeclId::compute(&qualified_name, kind, signature_key),
            kind,
            name: name.into(),
            qualified_name,
            location,
            redeclarations: Vec::new(),
            raw_comment: None,
            parent: None,
            children: Vec::new(),
            signature: None,
            template_params: Vec::new(),
            specializations: Vec::new(),
            bases: Vec::new(),
            underlying_type: None,
            using_directives: Vec::new(),
            record_tag: None,
        }
    }

    /// The unique root namespace.
    pub fn root() -> Self {
        Declaration::new(DeclKind::Namespace, "", "", "", Location::default())
    }

    /// Set the raw comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.raw_comment = Some(comment.into());
        self
    }

    /// Set the parent.
    pub fn with_parent(mut self, parent: DeclId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Set the signature.
    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Set the underlying type.
    pub fn with_underlying_type(mut self, text: impl Into<String>) -> Self {
        self.underlying_type = Some(text.into());
        self
    }

    /// Whether this is the root namespace.
    pub fn is_root(&self) -> bool {
        self.parent.is_none() && self.kind == DeclKind::Namespace && self.qualified_name.is_empty()
    }

    /// Record a later sighting of the same entity.
    ///
    /// The first location stays authoritative; the first non-empty comment
    /// wins.
    pub fn merge_sighting(&mut self, location: Location, raw_comment: Option<String>) {
        if location != self.location && !self.redeclarations.contains(&location) {
            self.redeclarations.push(location);
        }
        let has_comment = self
            .raw_comment
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty());
        if !has_comment {
            if let Some(comment) = raw_comment.filter(|c| !c.trim().is_empty()) {
                self.raw_comment = Some(comment);
            }
        }
    }
}

// ============================================================================
// References
// ============================================================================

/// How a name is used by its owning declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RefKind {
    /// Parameter, return or field type.
    TypeUse,
    /// Base class of a record.
    BaseClass,
    /// Target of a type alias.
    AliasOf,
    /// Name mentioned in comment prose.
    NameMention,
}

impl RefKind {
    /// Whether a declaration of `kind` may be the direct target of this
    /// reference kind.
    ///
    /// `BaseClass` admits aliases here; the alias chain must still end at a
    /// record, which the resolver checks.
    pub fn admits(&self, kind: DeclKind) -> bool {
        match self {
            RefKind::TypeUse | RefKind::AliasOf => kind.is_type(),
            RefKind::BaseClass => matches!(kind, DeclKind::Record | DeclKind::Alias),
            RefKind::NameMention => true,
        }
    }
}

/// Result of resolving a reference.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceTarget {
    /// Not yet resolved.
    #[default]
    Unresolved,
    /// Exactly one declaration.
    Single { id: DeclId },
    /// A known specialization of a class template.
    Specialization { primary: DeclId, args: Vec<String> },
    /// Several same-named functions the text cannot tell apart. Sorted and
    /// deduplicated.
    OverloadSet { ids: Vec<DeclId> },
    /// An alias chain, first element the named alias. `tail` holds the
    /// final target text when it is not in the graph.
    Alias {
        chain: Vec<DeclId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tail: Option<String>,
    },
    /// A name outside the documented set.
    External { name: String },
}

impl ReferenceTarget {
    /// Build an overload set, sorting and deduplicating ids.
    pub fn overload_set(mut ids: Vec<DeclId>) -> Self {
        ids.sort();
        ids.dedup();
        ReferenceTarget::OverloadSet { ids }
    }

    /// Whether resolution has run.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ReferenceTarget::Unresolved)
    }

    /// Every declaration id the target points at.
    pub fn decl_ids(&self) -> Vec<DeclId> {
        match self {
            ReferenceTarget::Unresolved | ReferenceTarget::External { .. } => Vec::new(),
            ReferenceTarget::Single { id } => vec![*id],
            ReferenceTarget::Specialization { primary, .. } => vec![*primary],
            ReferenceTarget::OverloadSet { ids } => ids.clone(),
            ReferenceTarget::Alias { chain, .. } => chain.clone(),
        }
    }

    /// The declaration a reader ultimately lands on, if any.
    pub fn final_decl(&self) -> Option<DeclId> {
        match self {
            ReferenceTarget::Single { id } => Some(*id),
            ReferenceTarget::Specialization { primary, .. } => Some(*primary),
            ReferenceTarget::Alias { chain, tail: None } => chain.last().copied(),
            _ => None,
        }
    }
}

/// A textual use of a name, owned by a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub id: ReferenceId,
    pub owner: DeclId,
    pub kind: RefKind,
    /// Text as written.
    pub text: String,
    pub target: ReferenceTarget,
}

// ============================================================================
// Doc Comments
// ============================================================================

/// Execution mode of a fenced code block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockMode {
    /// Compile and run.
    Tested,
    /// Compile only.
    NoRun,
    /// Queued but skipped.
    Ignore,
    /// Not C++; rendered only.
    Literal,
}

impl BlockMode {
    /// Whether a doc-test job is created for the block.
    pub fn is_queued(&self) -> bool {
        !matches!(self, BlockMode::Literal)
    }
}

/// A fenced code block extracted from a doc comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub id: BlockId,
    /// Fence language, lowercased. Empty when the fence had none.
    pub language: String,
    pub mode: BlockMode,
    /// Whether the code is wrapped in `int main()` before compiling.
    pub wrap_main: bool,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
}

/// A name mentioned in prose, resolved from the owner's scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub text: String,
    pub target: ReferenceTarget,
}

/// A contiguous piece of a doc comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    /// Markdown prose, kept as written.
    Prose {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        mentions: Vec<Mention>,
    },
    /// Position of a code block.
    Code { block: BlockId },
}

/// A declaration's comment split into prose and code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocComment {
    pub owner: DeclId,
    /// Opening paragraph, as markdown. Empty when the comment does not start
    /// with a paragraph.
    #[serde(default)]
    pub brief: String,
    /// The markdown after the brief.
    #[serde(default)]
    pub description: String,
    pub segments: Vec<Segment>,
    pub code_blocks: Vec<CodeBlock>,
}

impl DocComment {
    /// Look up a code block by id.
    pub fn block(&self, id: BlockId) -> Option<&CodeBlock> {
        self.code_blocks.iter().find(|b| b.id == id)
    }

    /// All mentions across prose segments, in order.
    pub fn mentions(&self) -> impl Iterator<Item = &Mention> {
        self.segments.iter().flat_map(|s| match s {
            Segment::Prose { mentions, .. } => mentions.as_slice(),
            Segment::Code { .. } => &[],
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
