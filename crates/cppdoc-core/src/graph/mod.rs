//! Symbol graph: the declaration arena and its reference table.
//!
//! The graph is an arena of [`Declaration`]s keyed by [`DeclId`], with
//! containment edges stored as ids (`parent` / `children`), plus a flat table
//! of [`Reference`]s. It is built from scratch every run by the
//! [`builder`], mutated only by the builder and by reference resolution
//! (which writes `Reference::target` slots and nothing else), and then frozen
//! behind an `Arc` for readers.
//!
//! Iteration over declarations is in `DeclId` order, so every derived output
//! is deterministic for a given input.

pub mod builder;

use std::collections::{BTreeMap, HashMap};

use crate::model::{DeclId, DeclKind, Declaration, RefKind, Reference, ReferenceId, ReferenceTarget};

// ============================================================================
// Declaration Arena
// ============================================================================

/// Declarations plus the secondary indexes lookup needs.
#[derive(Debug, Clone)]
pub struct DeclArena {
    decls: BTreeMap<DeclId, Declaration>,
    /// Qualified name → ids (overloads share a qualified name).
    by_qualified_name: HashMap<String, Vec<DeclId>>,
    root: DeclId,
}

impl Default for DeclArena {
    fn default() -> Self {
        Self::new()
    }
}

impl DeclArena {
    /// Create an arena holding only the root namespace.
    pub fn new() -> Self {
        let root = Declaration::root();
        let root_id = root.id;
        let mut arena = DeclArena {
            decls: BTreeMap::new(),
            by_qualified_name: HashMap::new(),
            root: root_id,
        };
        arena.insert(root);
        arena
    }

    /// Id of the root namespace.
    pub fn root(&self) -> DeclId {
        self.root
    }

    /// Look up a declaration.
    pub fn get(&self, id: DeclId) -> Option<&Declaration> {
        self.decls.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: DeclId) -> Option<&mut Declaration> {
        self.decls.get_mut(&id)
    }

    /// Whether `id` is in the arena.
    pub fn contains(&self, id: DeclId) -> bool {
        self.decls.contains_key(&id)
    }

    /// Number of declarations, root included.
    pub fn len(&self) -> usize {
        self.decls.len()
    }

    /// Whether the arena holds only the root.
    pub fn is_empty(&self) -> bool {
        self.decls.len() <= 1
    }

    /// Iterate over declarations in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Declaration> {
        self.decls.values()
    }

    /// Insert a declaration. Returns `false` (and leaves the arena unchanged)
    /// if the id is already present.
    pub(crate) fn insert(&mut self, decl: Declaration) -> bool {
        if self.decls.contains_key(&decl.id) {
            return false;
        }
        self.by_qualified_name
            .entry(decl.qualified_name.clone())
            .or_default()
            .push(decl.id);
        self.decls.insert(decl.id, decl);
        true
    }

    /// Ids of every declaration with this qualified name, sorted.
    pub fn named(&self, qualified_name: &str) -> Vec<DeclId> {
        let mut ids = self
            .by_qualified_name
            .get(qualified_name)
            .cloned()
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// First declaration of `kind` with this qualified name.
    pub fn find(&self, qualified_name: &str, kind: DeclKind) -> Option<DeclId> {
        self.named(qualified_name)
            .into_iter()
            .find(|id| self.get(*id).is_some_and(|d| d.kind == kind))
    }

    /// Ordered children of `id`.
    pub fn children(&self, id: DeclId) -> &[DeclId] {
        self.get(id).map(|d| d.children.as_slice()).unwrap_or(&[])
    }

    /// Parent of `id`.
    pub fn parent(&self, id: DeclId) -> Option<DeclId> {
        self.get(id).and_then(|d| d.parent)
    }

    /// `id` followed by its ancestors up to and including the root.
    pub fn ancestors(&self, id: DeclId) -> Vec<DeclId> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            if chain.contains(&cur) || !self.contains(cur) {
                break;
            }
            chain.push(cur);
            current = self.parent(cur);
        }
        chain
    }

    /// Nearest enclosing namespace of `id` (excluding `id` itself).
    pub fn enclosing_namespace(&self, id: DeclId) -> Option<&Declaration> {
        self.ancestors(id)
            .into_iter()
            .skip(1)
            .filter_map(|a| self.get(a))
            .find(|d| d.kind == DeclKind::Namespace)
    }

    /// Check structural invariants: every parent chain ends at the root,
    /// parent and child edges agree, and ids match their arena key.
    pub fn validate(&self) -> Result<(), String> {
        for (id, decl) in &self.decls {
            if *id != decl.id {
                return Err(format!("{} stored under {}", decl.id, id));
            }
            if *id == self.root {
                if decl.parent.is_some() {
                    return Err("root namespace has a parent".to_string());
                }
                continue;
            }
            let parent = decl
                .parent
                .ok_or_else(|| format!("{} ({}) has no parent", id, decl.qualified_name))?;
            let parent_decl = self
                .get(parent)
                .ok_or_else(|| format!("{} has dangling parent {}", id, parent))?;
            if !parent_decl.children.contains(id) {
                return Err(format!("{} missing from children of {}", id, parent));
            }
            let chain = self.ancestors(*id);
            if chain.last() != Some(&self.root) {
                return Err(format!("parent chain of {} does not reach the root", id));
            }
        }
        Ok(())
    }

    /// Link `child` under `parent`, replacing any previous parent.
    pub(crate) fn set_parent(&mut self, child: DeclId, parent: DeclId) {
        if let Some(old) = self.parent(child) {
            if let Some(old_decl) = self.get_mut(old) {
                old_decl.children.retain(|c| *c != child);
            }
        }
        if let Some(decl) = self.get_mut(child) {
            decl.parent = Some(parent);
        }
        if let Some(parent_decl) = self.get_mut(parent) {
            if !parent_decl.children.contains(&child) {
                parent_decl.children.push(child);
            }
        }
    }
}

// ============================================================================
// Symbol Graph
// ============================================================================

/// The cross-referenced documentation model.
#[derive(Debug, Clone, Default)]
pub struct SymbolGraph {
    decls: DeclArena,
    references: Vec<Reference>,
}

impl SymbolGraph {
    /// Create a graph holding only the root namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// The declaration arena.
    pub fn decls(&self) -> &DeclArena {
        &self.decls
    }

    pub(crate) fn decls_mut(&mut self) -> &mut DeclArena {
        &mut self.decls
    }

    /// Look up a declaration.
    pub fn decl(&self, id: DeclId) -> Option<&Declaration> {
        self.decls.get(id)
    }

    /// Id of the root namespace.
    pub fn root(&self) -> DeclId {
        self.decls.root()
    }

    /// All references in id order.
    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// Look up a reference.
    pub fn reference(&self, id: ReferenceId) -> Option<&Reference> {
        self.references.get(id.index())
    }

    /// References owned by `owner`.
    pub fn references_of(&self, owner: DeclId) -> impl Iterator<Item = &Reference> {
        self.references.iter().filter(move |r| r.owner == owner)
    }

    /// Append an unresolved reference. Ids are allocated sequentially.
    pub(crate) fn add_reference(
        &mut self,
        owner: DeclId,
        kind: RefKind,
        text: impl Into<String>,
    ) -> ReferenceId {
        let id = ReferenceId::new(self.references.len() as u32);
        self.references.push(Reference {
            id,
            owner,
            kind,
            text: text.into(),
            target: ReferenceTarget::Unresolved,
        });
        id
    }

    /// Borrow the arena immutably and the reference table mutably at once.
    ///
    /// Resolution reads declarations while writing disjoint target slots.
    pub fn split_for_resolution(&mut self) -> (&DeclArena, &mut [Reference]) {
        (&self.decls, &mut self.references)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Location;

    fn record(qname: &str) -> Declaration {
        let name = qname.rsplit("::").next().unwrap_or(qname).to_string();
        Declaration::new(DeclKind::Record, name, qname, "", Location::new("a.hpp", 1, 1))
    }

    mod arena_tests {
        use super::*;

        #[test]
        fn new_arena_has_only_root() {
            let arena = DeclArena::new();
            assert_eq!(arena.len(), 1);
            assert!(arena.is_empty());
            assert!(arena.get(arena.root()).unwrap().is_root());
            arena.validate().unwrap();
        }

        #[test]
        fn insert_rejects_duplicate_id() {
            let mut arena = DeclArena::new();
            assert!(arena.insert(record("Widget")));
            assert!(!arena.insert(record("Widget")));
            assert_eq!(arena.named("Widget").len(), 1);
        }

        #[test]
        fn set_parent_keeps_edges_consistent() {
            let mut arena = DeclArena::new();
            let ns = Declaration::new(DeclKind::Namespace, "ui", "ui", "", Location::default());
            let ns_id = ns.id;
            let w = record("ui::Widget");
            let w_id = w.id;
            arena.insert(ns);
            arena.insert(w);
            arena.set_parent(ns_id, arena.root());
            arena.set_parent(w_id, arena.root());
            arena.set_parent(w_id, ns_id);

            assert_eq!(arena.parent(w_id), Some(ns_id));
            assert_eq!(arena.children(ns_id), &[w_id]);
            assert!(!arena.children(arena.root()).contains(&w_id));
            arena.validate().unwrap();
        }

        #[test]
        fn validate_reports_missing_parent() {
            let mut arena = DeclArena::new();
            arena.insert(record("Loose"));
            let err = arena.validate().unwrap_err();
            assert!(err.contains("has no parent"));
        }

        #[test]
        fn enclosing_namespace_skips_records() {
            let mut arena = DeclArena::new();
            let ns = Declaration::new(DeclKind::Namespace, "ui", "ui", "", Location::default());
            let ns_id = ns.id;
            let w = record("ui::Widget");
            let w_id = w.id;
            let inner = record("ui::Widget::Inner");
            let inner_id = inner.id;
            arena.insert(ns);
            arena.insert(w);
            arena.insert(inner);
            arena.set_parent(ns_id, arena.root());
            arena.set_parent(w_id, ns_id);
            arena.set_parent(inner_id, w_id);

            assert_eq!(arena.enclosing_namespace(inner_id).unwrap().id, ns_id);
            assert_eq!(arena.ancestors(inner_id), vec![inner_id, w_id, ns_id, arena.root()]);
        }
    }

    mod reference_table_tests {
        use super::*;

        #[test]
        fn reference_ids_are_sequential() {
            let mut graph = SymbolGraph::new();
            let root = graph.root();
            let a = graph.add_reference(root, RefKind::TypeUse, "Widget");
            let b = graph.add_reference(root, RefKind::BaseClass, "Base");
            assert_eq!(a, ReferenceId::new(0));
            assert_eq!(b, ReferenceId::new(1));
            assert_eq!(graph.reference(b).unwrap().text, "Base");
            assert_eq!(graph.references_of(root).count(), 2);
        }

        #[test]
        fn split_allows_writing_targets() {
            let mut graph = SymbolGraph::new();
            let root = graph.root();
            graph.add_reference(root, RefKind::TypeUse, "Widget");
            let (decls, refs) = graph.split_for_resolution();
            refs[0].target = ReferenceTarget::Single { id: decls.root() };
            assert!(graph.references()[0].target.is_resolved());
        }
    }
}
