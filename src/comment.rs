//! Doc-comment pipeline.
//!
//! Each declaration's raw comment is stripped of its comment markers and
//! parsed as markdown. Fenced code blocks become [`CodeBlock`]s; everything
//! else stays prose, kept as the original markdown text. Shortcut links such
//! as `[Widget]` or `` [`ns::f`] ``, and links whose destination starts with
//! `::`, are resolved as name mentions from the owner's scope.
//!
//! Fence info strings:
//!
//! | Info | Mode |
//! |------|------|
//! | `cpp`, `c++`, `cxx`, empty | tested |
//! | `..., no-run` | compile only |
//! | `..., ignore` | skipped |
//! | `..., nomain` (or `cpp-nomain`) | tested, not wrapped in `main` |
//! | `output` | expected stdout of the tested block just before it |
//! | anything else | literal |
//!
//! Comments are processed in parallel; the output is ordered by owner id.

use std::mem;

use cppdoc_core::diagnostics::{Diagnostic, DiagnosticKind, Owner, Severity};
use cppdoc_core::graph::DeclArena;
use cppdoc_core::model::{
    BlockId, BlockMode, CodeBlock, DeclId, DeclKind, Declaration, DocComment, Mention, RefKind,
    Segment,
};
use cppdoc_core::resolve::name::{is_fundamental, parse_type_name};
use cppdoc_core::resolve::Resolver;
use cppdoc_core::types::Location;
use pulldown_cmark::{BrokenLink, CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info, info_span};

/// Destination prefix given to shortcut links that name a declaration.
const MENTION_SCHEME: &str = "cppdoc-mention:";

// ============================================================================
// Marker Stripping
// ============================================================================

/// Remove C++ comment markers and decoration, leaving the markdown body.
///
/// Handles `///`, `//!`, `//`, `/** */`, `/*! */` and the trailing-member
/// forms `///<` and `//!<`. Leading `*` decoration inside block comments is
/// dropped, then the common indentation is removed.
pub fn strip_comment_markers(raw: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut in_block = false;

    for line in raw.lines() {
        let trimmed = line.trim_start();
        let mut rest = if in_block {
            strip_decoration(trimmed).unwrap_or(line)
        } else if let Some(body) = strip_line_marker(trimmed) {
            lines.push(body);
            continue;
        } else if let Some(body) = strip_block_opener(trimmed) {
            in_block = true;
            body
        } else {
            line
        };

        if in_block {
            if let Some(end) = rest.find("*/") {
                rest = &rest[..end];
                in_block = false;
            }
        }
        lines.push(rest);
    }

    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let body: Vec<&str> = lines
        .iter()
        .map(|l| l.get(indent..).unwrap_or("").trim_end())
        .collect();

    let start = body.iter().position(|l| !l.is_empty()).unwrap_or(body.len());
    let end = body
        .iter()
        .rposition(|l| !l.is_empty())
        .map(|i| i + 1)
        .unwrap_or(start);
    body[start..end].join("\n")
}

fn strip_line_marker(line: &str) -> Option<&str> {
    ["///<", "//!<", "///", "//!", "//"]
        .iter()
        .find_map(|marker| line.strip_prefix(marker))
        .map(strip_one_space)
}

fn strip_block_opener(line: &str) -> Option<&str> {
    ["/**<", "/*!<", "/**", "/*!", "/*"]
        .iter()
        .find_map(|marker| line.strip_prefix(marker))
        .map(strip_one_space)
}

/// Strip a leading `*` used as margin decoration.
fn strip_decoration(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('*')?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(strip_one_space(rest))
    } else {
        None
    }
}

fn strip_one_space(s: &str) -> &str {
    s.strip_prefix(' ').unwrap_or(s)
}

// ============================================================================
// Fence Info
// ============================================================================

/// Decoded fence info string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FenceInfo {
    pub language: String,
    pub mode: BlockMode,
    pub wrap_main: bool,
    /// The fence holds the expected output of the previous block.
    pub is_output: bool,
}

/// Decode a fence info string such as `cpp,no-run` or `c++ nomain`.
pub fn parse_fence_info(info: &str) -> FenceInfo {
    let tokens: Vec<String> = info
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();

    let is_attribute = |t: &str| matches!(t, "no-run" | "no_run" | "ignore" | "nomain");
    let language = tokens
        .first()
        .filter(|t| !is_attribute(t.as_str()))
        .cloned()
        .unwrap_or_default();
    let has = |attr: &[&str]| tokens.iter().any(|t| attr.contains(&t.as_str()));

    if language == "output" {
        return FenceInfo {
            language,
            mode: BlockMode::Literal,
            wrap_main: false,
            is_output: true,
        };
    }

    let (base, nomain_suffix) = match language.strip_suffix("-nomain") {
        Some(base) => (base, true),
        None => (language.as_str(), false),
    };
    let is_cpp = matches!(base, "" | "cpp" | "c++" | "cxx" | "nomain");
    if !is_cpp {
        return FenceInfo {
            language,
            mode: BlockMode::Literal,
            wrap_main: false,
            is_output: false,
        };
    }

    let mode = if has(&["ignore"]) {
        BlockMode::Ignore
    } else if has(&["no-run", "no_run"]) {
        BlockMode::NoRun
    } else {
        BlockMode::Tested
    };
    let nomain = nomain_suffix || base == "nomain" || has(&["nomain"]);

    FenceInfo {
        language: "cpp".to_string(),
        mode,
        wrap_main: !nomain,
        is_output: false,
    }
}

// ============================================================================
// Comment Parsing
// ============================================================================

/// A parsed comment plus the problems found in it.
#[derive(Debug, Clone)]
pub struct ParsedComment {
    pub comment: DocComment,
    pub diagnostics: Vec<Diagnostic>,
}

/// Whether a shortcut-link label looks like a C++ name worth resolving.
fn looks_like_name(label: &str) -> bool {
    let starts_ok = label
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == ':');
    starts_ok && !is_fundamental(label) && parse_type_name(label).is_ok()
}

fn mention_link(link: BrokenLink<'_>) -> Option<(CowStr<'_>, CowStr<'_>)> {
    let label = link.reference.trim().trim_matches('`').trim();
    if !looks_like_name(label) {
        return None;
    }
    Some((
        CowStr::from(format!("{MENTION_SCHEME}{label}")),
        CowStr::Borrowed(""),
    ))
}

/// Split stripped comment text into its opening paragraph and the rest.
pub fn split_brief(text: &str) -> (String, String) {
    let mut blocks = Parser::new_ext(text, Options::empty()).into_offset_iter();
    match blocks.next() {
        Some((Event::Start(Tag::Paragraph), range)) => {
            let brief = text.get(range.clone()).unwrap_or("").trim().to_string();
            let rest = text.get(range.end..).unwrap_or("").trim().to_string();
            (brief, rest)
        }
        _ => (String::new(), text.trim().to_string()),
    }
}

/// Parse `raw` as the comment of `owner`, resolving mentions with `resolver`.
pub fn parse_comment(owner: DeclId, raw: &str, resolver: &Resolver<'_>) -> ParsedComment {
    parse_comment_at(owner, raw, resolver, 0)
}

/// Like [`parse_comment`], numbering code blocks from `first_block`.
///
/// Used when one owner carries several comments, such as a primary template
/// and its collapsed specializations.
pub fn parse_comment_at(
    owner: DeclId,
    raw: &str,
    resolver: &Resolver<'_>,
    first_block: usize,
) -> ParsedComment {
    let text = strip_comment_markers(raw);
    let mut builder = CommentBuilder::new(owner, &text, resolver, first_block);

    let parser = Parser::new_with_broken_link_callback(&text, Options::empty(), Some(mention_link));
    for (event, range) in parser.into_offset_iter() {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
                builder.flush_prose(range.start);
                builder.fence = Some((parse_fence_info(&info), String::new()));
                builder.prose_start = range.end;
            }
            Event::Text(chunk) => {
                if let Some((_, code)) = builder.fence.as_mut() {
                    code.push_str(&chunk);
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some((info, code)) = builder.fence.take() {
                    builder.finish_fence(info, code);
                }
            }
            Event::Start(Tag::Link { dest_url, .. }) if builder.fence.is_none() => {
                if let Some(name) = dest_url.strip_prefix(MENTION_SCHEME) {
                    builder.mention(name);
                } else if dest_url.starts_with("::") {
                    builder.mention(&dest_url);
                }
            }
            _ => {}
        }
    }

    builder.finish()
}

struct CommentBuilder<'t, 'r> {
    owner: DeclId,
    first_block: usize,
    text: &'t str,
    resolver: &'r Resolver<'r>,
    segments: Vec<Segment>,
    code_blocks: Vec<CodeBlock>,
    diagnostics: Vec<Diagnostic>,
    prose_start: usize,
    mentions: Vec<Mention>,
    fence: Option<(FenceInfo, String)>,
    /// Tested block that an `output` fence may still attach to.
    awaiting_output: Option<usize>,
}

impl<'t, 'r> CommentBuilder<'t, 'r> {
    fn new(owner: DeclId, text: &'t str, resolver: &'r Resolver<'r>, first_block: usize) -> Self {
        CommentBuilder {
            owner,
            first_block,
            text,
            resolver,
            segments: Vec::new(),
            code_blocks: Vec::new(),
            diagnostics: Vec::new(),
            prose_start: 0,
            mentions: Vec::new(),
            fence: None,
            awaiting_output: None,
        }
    }

    fn mention(&mut self, text: &str) {
        let target = self.resolver.resolve(self.owner, RefKind::NameMention, text);
        debug!("mention {} from {} -> {:?}", text, self.owner, target);
        self.mentions.push(Mention {
            text: text.to_string(),
            target,
        });
    }

    fn flush_prose(&mut self, end: usize) {
        let slice = self.text.get(self.prose_start..end).unwrap_or("");
        if slice.trim().is_empty() {
            return;
        }
        self.segments.push(Segment::Prose {
            text: slice.trim_matches(['\n', '\r']).trim_end().to_string(),
            mentions: mem::take(&mut self.mentions),
        });
        self.awaiting_output = None;
    }

    fn finish_fence(&mut self, info: FenceInfo, code: String) {
        if info.is_output {
            if let Some(index) = self.awaiting_output.take() {
                self.code_blocks[index].expected_output = Some(code);
                return;
            }
            self.diagnostics.push(Diagnostic::new(
                DiagnosticKind::CommentSyntax,
                Severity::Warning,
                Owner::Declaration(self.owner),
                "`output` block does not follow a tested code block",
            ));
        }

        let index = self.code_blocks.len();
        let id = BlockId::compute(self.owner, self.first_block + index);
        self.awaiting_output = (info.mode == BlockMode::Tested).then_some(index);
        self.code_blocks.push(CodeBlock {
            id,
            language: info.language,
            mode: info.mode,
            wrap_main: info.wrap_main,
            code,
            expected_output: None,
        });
        self.segments.push(Segment::Code { block: id });
    }

    fn finish(mut self) -> ParsedComment {
        self.flush_prose(self.text.len());
        let (brief, description) = split_brief(self.text);
        ParsedComment {
            comment: DocComment {
                owner: self.owner,
                brief,
                description,
                segments: self.segments,
                code_blocks: self.code_blocks,
            },
            diagnostics: self.diagnostics,
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// A code block queued for the doc-test engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocTestJob {
    pub block: CodeBlock,
    pub owner: DeclId,
    /// File declaring the owner, included by the compilation unit.
    pub owner_file: String,
    /// Namespace brought in with `using namespace`, if any.
    pub namespace: Option<String>,
}

/// Output of the comment pipeline.
#[derive(Debug, Default)]
pub struct CommentOutput {
    /// Parsed comments ordered by owner id.
    pub comments: Vec<DocComment>,
    /// Queued blocks in comment order, then block order.
    pub jobs: Vec<DocTestJob>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Namespace a doc-test of `decl` should open.
fn job_namespace(decls: &DeclArena, decl: &Declaration) -> Option<String> {
    let ns = if decl.kind == DeclKind::Namespace {
        Some(decl)
    } else {
        decls.enclosing_namespace(decl.id)
    };
    ns.filter(|ns| !ns.is_root())
        .map(|ns| ns.qualified_name.clone())
}

/// Comments attached to `decl`: its own, then those of its collapsed
/// specializations, each with the location it was written at.
fn comment_sources(decl: &Declaration) -> Vec<(&str, &Location)> {
    let own = decl.raw_comment.as_deref().map(|c| (c, &decl.location));
    let specializations = decl
        .specializations
        .iter()
        .filter_map(|s| s.raw_comment.as_deref().map(|c| (c, &s.location)));
    own.into_iter()
        .chain(specializations)
        .filter(|(c, _)| !c.trim().is_empty())
        .collect()
}

/// Parse all comments of one owner into a single [`DocComment`].
fn parse_owner(
    decl: &Declaration,
    sources: &[(&str, &Location)],
    resolver: &Resolver<'_>,
) -> ParsedComment {
    let mut merged: Option<DocComment> = None;
    let mut diagnostics = Vec::new();
    for (raw, location) in sources {
        let first_block = merged.as_ref().map_or(0, |c| c.code_blocks.len());
        let parsed = parse_comment_at(decl.id, raw, resolver, first_block);
        diagnostics.extend(
            parsed
                .diagnostics
                .into_iter()
                .map(|d| d.with_location((*location).clone())),
        );
        merged = Some(match merged {
            None => parsed.comment,
            Some(mut comment) => {
                append_comment(&mut comment, parsed.comment);
                comment
            }
        });
    }
    ParsedComment {
        comment: merged.unwrap_or_else(|| DocComment {
            owner: decl.id,
            brief: String::new(),
            description: String::new(),
            segments: Vec::new(),
            code_blocks: Vec::new(),
        }),
        diagnostics,
    }
}

/// Append a specialization's comment to its primary's.
fn append_comment(comment: &mut DocComment, extra: DocComment) {
    let extra_text = [extra.brief, extra.description]
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    if comment.brief.is_empty() && comment.description.is_empty() {
        let (brief, description) = split_brief(&extra_text);
        comment.brief = brief;
        comment.description = description;
    } else if !extra_text.is_empty() {
        if !comment.description.is_empty() {
            comment.description.push_str("\n\n");
        }
        comment.description.push_str(&extra_text);
    }
    comment.segments.extend(extra.segments);
    comment.code_blocks.extend(extra.code_blocks);
}

/// Parse every declaration comment in `decls` on `pool`.
///
/// Comments of collapsed specializations are parsed under their primary
/// template, numbering their code blocks after the primary's own.
pub fn process_comments(decls: &DeclArena, pool: &ThreadPool) -> CommentOutput {
    let _span = info_span!("comments").entered();
    let resolver = Resolver::new(decls);

    let commented: Vec<(&Declaration, Vec<(&str, &Location)>)> = decls
        .iter()
        .map(|d| (d, comment_sources(d)))
        .filter(|(_, sources)| !sources.is_empty())
        .collect();

    let parsed: Vec<(&Declaration, ParsedComment)> = pool.install(|| {
        commented
            .par_iter()
            .map(|(decl, sources)| (*decl, parse_owner(decl, sources, &resolver)))
            .collect()
    });

    let mut output = CommentOutput::default();
    for (decl, parsed) in parsed {
        let namespace = job_namespace(decls, decl);
        for block in parsed.comment.code_blocks.iter().filter(|b| b.mode.is_queued()) {
            output.jobs.push(DocTestJob {
                block: block.clone(),
                owner: decl.id,
                owner_file: decl.location.file.clone(),
                namespace: namespace.clone(),
            });
        }
        output.diagnostics.extend(parsed.diagnostics);
        output.comments.push(parsed.comment);
    }

    info!(
        comments = output.comments.len(),
        jobs = output.jobs.len(),
        "processed doc comments"
    );
    output
}

// ============================================================================
// Tests
// ============================================================================
