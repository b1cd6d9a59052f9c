//! Cross-reference resolution.
//!
//! Turns the textual references recorded by the builder (and name mentions
//! found in comments) into graph edges, following a simplified C++ name
//! lookup:
//!
//! 1. Parse the text ([`name::parse_type_name`]) down to the named entity.
//! 2. Start at the owner's scope (the owner itself if it opens a scope,
//!    otherwise its parent) and walk outward to the root. At each scope try
//!    `scope::name`, then the namespaces nominated by using-directives in
//!    that scope. A leading `::` skips straight to the root.
//! 3. Keep only candidates whose kind the reference kind admits; an
//!    incompatible hit does not stop the walk.
//!
//! Outcomes:
//!
//! | Candidates | Target |
//! |------------|--------|
//! | none | `External(text)` |
//! | one alias | `Alias { chain, tail }`, followed transitively |
//! | one class template + matching args | `Specialization` |
//! | one | `Single` |
//! | several | `OverloadSet` of all, unless a parameter list picks one |
//!
//! Resolution never fails: anything unknown becomes `External`.

pub mod name;

use std::collections::HashSet;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info, info_span};

use crate::diagnostics::Diagnostic;
use crate::graph::{DeclArena, SymbolGraph};
use crate::model::{normalize_type_text, DeclId, DeclKind, RefKind, Reference, ReferenceTarget};

use name::{parse_type_name, TypeName};

/// Maximum number of aliases followed in one chain.
pub const MAX_ALIAS_DEPTH: usize = 16;

// ============================================================================
// Resolver
// ============================================================================

/// Scoped name lookup over a built declaration arena.
///
/// Holds only a shared borrow, so one resolver can serve many threads.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    decls: &'a DeclArena,
}

impl<'a> Resolver<'a> {
    /// Create a resolver over `decls`.
    pub fn new(decls: &'a DeclArena) -> Self {
        Resolver { decls }
    }

    /// Resolve `text` as a reference of `kind` owned by `owner`.
    pub fn resolve(&self, owner: DeclId, kind: RefKind, text: &str) -> ReferenceTarget {
        let parsed = match parse_type_name(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("unparseable reference text: {}", e);
                return external(text);
            }
        };
        if parsed.fundamental {
            return external(text);
        }
        if parsed.params.is_some() && kind != RefKind::NameMention {
            // decltype(...) and friends
            return external(text);
        }

        let candidates = self.lookup(owner, &parsed, kind);
        match candidates.len() {
            0 => external(text),
            1 => self.target_for(candidates[0], &parsed),
            _ => self.pick_overload(candidates, &parsed),
        }
    }

    /// Scope lookup starts from for references owned by `owner`.
    fn starting_scope(&self, owner: DeclId) -> DeclId {
        match self.decls.get(owner) {
            Some(decl) if decl.kind.is_scope() => owner,
            Some(decl) => decl.parent.unwrap_or(self.decls.root()),
            None => self.decls.root(),
        }
    }

    /// Compatible candidates for `name`, walking outward from `owner`.
    fn lookup(&self, owner: DeclId, name: &TypeName, kind: RefKind) -> Vec<DeclId> {
        if name.global {
            return self.candidates_in(self.decls.root(), name, kind);
        }

        for scope in self.decls.ancestors(self.starting_scope(owner)) {
            let found = self.candidates_in(scope, name, kind);
            if !found.is_empty() {
                return found;
            }

            let mut nominated = Vec::new();
            for ns in self.nominated_namespaces(scope) {
                nominated.extend(self.candidates_in(ns, name, kind));
            }
            if !nominated.is_empty() {
                nominated.sort();
                nominated.dedup();
                return nominated;
            }
        }
        Vec::new()
    }

    /// Compatible declarations named `scope::name`.
    ///
    /// Function scopes hold only their own template parameters, which share
    /// qualified names across overloads; those are matched by parent edge.
    fn candidates_in(&self, scope: DeclId, name: &TypeName, kind: RefKind) -> Vec<DeclId> {
        let Some(scope_decl) = self.decls.get(scope) else {
            return Vec::new();
        };
        let key = name.lookup_key();

        let ids: Vec<DeclId> = if scope_decl.kind == DeclKind::Function {
            if !name.is_simple() {
                return Vec::new();
            }
            self.decls
                .children(scope)
                .iter()
                .copied()
                .filter(|c| self.decls.get(*c).is_some_and(|d| d.name == key))
                .collect()
        } else {
            self.decls.named(&qualify(&scope_decl.qualified_name, &key))
        };

        ids.into_iter()
            .filter(|id| self.compatible(*id, kind))
            .collect()
    }

    /// Whether `id` may be the target of a reference of `kind`.
    fn compatible(&self, id: DeclId, kind: RefKind) -> bool {
        let Some(decl) = self.decls.get(id) else {
            return false;
        };
        if !kind.admits(decl.kind) {
            return false;
        }
        if kind == RefKind::BaseClass && decl.kind == DeclKind::Alias {
            let (chain, tail) = self.alias_chain(id);
            return tail.is_none()
                && chain
                    .last()
                    .and_then(|last| self.decls.get(*last))
                    .is_some_and(|d| d.kind == DeclKind::Record);
        }
        true
    }

    /// Namespaces nominated by using-directives written in `scope`.
    fn nominated_namespaces(&self, scope: DeclId) -> Vec<DeclId> {
        let Some(decl) = self.decls.get(scope) else {
            return Vec::new();
        };
        decl.using_directives
            .iter()
            .filter_map(|text| self.resolve_namespace(scope, text))
            .collect()
    }

    /// Find the namespace a using-directive names, without consulting
    /// further using-directives.
    fn resolve_namespace(&self, scope: DeclId, text: &str) -> Option<DeclId> {
        let trimmed = text.trim();
        if let Some(global) = trimmed.strip_prefix("::") {
            return self.decls.find(global, DeclKind::Namespace);
        }
        self.decls.ancestors(scope).into_iter().find_map(|s| {
            let prefix = &self.decls.get(s)?.qualified_name;
            self.decls.find(&qualify(prefix, trimmed), DeclKind::Namespace)
        })
    }

    /// Target for a single candidate.
    fn target_for(&self, id: DeclId, name: &TypeName) -> ReferenceTarget {
        let Some(decl) = self.decls.get(id) else {
            return ReferenceTarget::Single { id };
        };
        match decl.kind {
            DeclKind::Alias => {
                let (chain, tail) = self.alias_chain(id);
                ReferenceTarget::Alias { chain, tail }
            }
            DeclKind::Record => match name.template_args() {
                Some(args) => decl
                    .specializations
                    .iter()
                    .find(|s| s.args == args)
                    .map(|s| ReferenceTarget::Specialization {
                        primary: id,
                        args: s.args.clone(),
                    })
                    .unwrap_or(ReferenceTarget::Single { id }),
                None => ReferenceTarget::Single { id },
            },
            _ => ReferenceTarget::Single { id },
        }
    }

    /// Several candidates: narrow by parameter list if the text has one,
    /// otherwise keep all of them.
    fn pick_overload(&self, candidates: Vec<DeclId>, name: &TypeName) -> ReferenceTarget {
        if let Some(params) = &name.params {
            let narrowed: Vec<DeclId> = candidates
                .iter()
                .copied()
                .filter(|id| {
                    self.decls
                        .get(*id)
                        .and_then(|d| d.signature.as_ref())
                        .is_some_and(|sig| &sig.param_types() == params)
                })
                .collect();
            if narrowed.len() == 1 {
                return self.target_for(narrowed[0], name);
            }
        }
        ReferenceTarget::overload_set(candidates)
    }

    /// Follow an alias transitively.
    ///
    /// Returns the chain starting at `start` and, if the walk ended on text
    /// that is not in the graph, that text. Stops on cycles and after
    /// [`MAX_ALIAS_DEPTH`] hops.
    pub fn alias_chain(&self, start: DeclId) -> (Vec<DeclId>, Option<String>) {
        let mut chain = vec![start];
        let mut visited: HashSet<DeclId> = HashSet::from([start]);
        let mut current = start;

        while chain.len() <= MAX_ALIAS_DEPTH {
            let Some(text) = self
                .decls
                .get(current)
                .and_then(|d| d.underlying_type.as_deref())
            else {
                break;
            };

            let next = parse_type_name(text)
                .ok()
                .filter(|parsed| !parsed.fundamental)
                .and_then(|parsed| {
                    self.lookup(current, &parsed, RefKind::AliasOf)
                        .first()
                        .copied()
                });
            let Some(next) = next else {
                return (chain, Some(normalize_type_text(text)));
            };

            if !visited.insert(next) {
                debug!("alias cycle through {}", next);
                break;
            }
            chain.push(next);

            match self.decls.get(next) {
                Some(decl) if decl.kind == DeclKind::Alias => current = next,
                _ => break,
            }
        }
        (chain, None)
    }
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}::{}", scope, name)
    }
}

fn external(text: &str) -> ReferenceTarget {
    ReferenceTarget::External {
        name: normalize_type_text(text),
    }
}

// ============================================================================
// Bulk Resolution
// ============================================================================

/// Counts from one resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    pub total: usize,
    pub external: usize,
    pub ambiguous: usize,
}

/// Resolve every reference in `graph` on `pool`.
///
/// Returns one note per unresolved or ambiguous reference, in reference-id
/// order.
pub fn resolve_all(graph: &mut SymbolGraph, pool: &ThreadPool) -> (Vec<Diagnostic>, ResolveStats) {
    let (decls, references) = graph.split_for_resolution();
    resolve_references(decls, references, pool)
}

/// Resolve `references` against `decls` on `pool`.
///
/// Declarations are only read; each worker writes the target slot of the
/// reference it holds, so no locking is needed. Other readers of `decls`
/// (the comment pipeline) may run at the same time.
pub fn resolve_references(
    decls: &DeclArena,
    references: &mut [Reference],
    pool: &ThreadPool,
) -> (Vec<Diagnostic>, ResolveStats) {
    let _span = info_span!("resolve").entered();
    let resolver = Resolver::new(decls);

    pool.install(|| {
        references.par_iter_mut().for_each(|reference| {
            reference.target = resolver.resolve(reference.owner, reference.kind, &reference.text);
        });
    });

    let mut diagnostics = Vec::new();
    let mut stats = ResolveStats {
        total: references.len(),
        ..Default::default()
    };
    for reference in references.iter() {
        match &reference.target {
            ReferenceTarget::External { .. } => {
                stats.external += 1;
                diagnostics.push(Diagnostic::unresolved(reference.id, &reference.text));
            }
            ReferenceTarget::OverloadSet { ids } => {
                stats.ambiguous += 1;
                diagnostics.push(Diagnostic::ambiguous(reference.id, &reference.text, ids.len()));
            }
            _ => {}
        }
    }

    info!(
        references = stats.total,
        external = stats.external,
        ambiguous = stats.ambiguous,
        "resolved references"
    );
    (diagnostics, stats)
}

// ============================================================================
// Tests
// ============================================================================
