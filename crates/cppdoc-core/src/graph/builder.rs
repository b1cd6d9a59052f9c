//! Symbol graph construction from raw front-end records.
//!
//! The builder runs single-threaded over the complete, deduplicated record
//! stream in five passes:
//!
//! 1. **Nodes**: one declaration per distinct id. A repeated id merges into
//!    the existing node (first location wins, later ones are kept as
//!    redeclarations). Namespaces have no signature, so every sighting of a
//!    namespace merges into one node.
//! 2. **Specializations**: records with `specialization_of` collapse onto
//!    their primary template as attributes; their members are re-parented to
//!    the primary.
//! 3. **Containment**: parents are linked. Missing namespaces are synthesized
//!    from the qualified name; other missing parents fall back to the nearest
//!    existing ancestor (or the root) with an `OrphanDeclaration` warning.
//! 4. **Ordering**: children are sorted by first-seen source position.
//! 5. **References**: type uses, base classes and alias targets become
//!    unresolved references, numbered in stream order.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, info_span, warn};

use super::SymbolGraph;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Owner, Severity};
use crate::frontend::{last_component, parent_qualified_name, ParentRef, RawRecord, RecordKind};
use crate::model::{
    normalize_type_text, DeclId, DeclKind, Declaration, RefKind, Signature, Specialization,
};
use crate::resolve::name::is_fundamental;
use crate::types::Location;

/// Graph plus the diagnostics produced while building it.
#[derive(Debug)]
pub struct BuildOutput {
    pub graph: SymbolGraph,
    pub diagnostics: Vec<Diagnostic>,
}

/// Build a symbol graph from a record stream.
pub fn build(records: Vec<RawRecord>) -> BuildOutput {
    let _span = info_span!("build", records = records.len()).entered();
    let output = GraphBuilder::default().run(records);
    info!(
        declarations = output.graph.decls().len(),
        references = output.graph.references().len(),
        diagnostics = output.diagnostics.len(),
        "built symbol graph"
    );
    output
}

/// Where a node's parent was said to be.
#[derive(Debug, Clone)]
struct ParentHint {
    id: DeclId,
    kind: DeclKind,
    qualified_name: String,
}

impl From<&ParentRef> for ParentHint {
    fn from(parent: &ParentRef) -> Self {
        ParentHint {
            id: DeclId::compute(&parent.qualified_name, parent.kind, &parent.signature_key()),
            kind: parent.kind,
            qualified_name: parent.qualified_name.clone(),
        }
    }
}

#[derive(Default)]
struct GraphBuilder {
    graph: SymbolGraph,
    diagnostics: Vec<Diagnostic>,
    /// Nodes in first-seen order, root excluded.
    order: Vec<DeclId>,
    parent_hints: HashMap<DeclId, Option<ParentHint>>,
    /// Collapsed specialization id → primary.
    redirects: HashMap<DeclId, DeclId>,
    /// Collapsed specialization qualified name → primary.
    redirects_by_name: HashMap<String, DeclId>,
}

impl GraphBuilder {
    fn run(mut self, records: Vec<RawRecord>) -> BuildOutput {
        let mut specializations = Vec::new();
        let mut using_directives = Vec::new();

        for record in records {
            if record.kind == RecordKind::UsingDirective {
                using_directives.push(record);
            } else if record.is_deduction_guide() {
                debug!("skipping {}", record.qualified_name);
            } else if record.is_specialization() {
                specializations.push(record);
            } else {
                self.add_node(record);
            }
        }

        for record in specializations {
            self.collapse_specialization(record);
        }

        for id in self.order.clone() {
            self.link(id);
        }

        for record in using_directives {
            self.add_using_directive(record);
        }

        self.sort_children();
        self.create_references();

        BuildOutput {
            graph: self.graph,
            diagnostics: self.diagnostics,
        }
    }

    // ------------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------------

    fn add_node(&mut self, record: RawRecord) {
        let Some(kind) = record.kind.decl_kind() else {
            return;
        };
        if record.qualified_name.is_empty() {
            warn!("skipping {} record without a qualified name at {}", kind, record.location);
            return;
        }

        let hint = record.parent.as_ref().map(ParentHint::from);
        let key = match (&hint, kind) {
            // Template parameter names repeat across overloads; key them by owner.
            (Some(h), DeclKind::TemplateParam) => h.id.to_string(),
            _ => record.signature_key(),
        };
        let id = DeclId::compute(&record.qualified_name, kind, &key);

        if let Some(existing) = self.graph.decls_mut().get_mut(id) {
            debug!("merging redeclaration of {} at {}", existing.qualified_name, record.location);
            existing.merge_sighting(record.location, record.raw_comment);
            return;
        }

        let name = if record.spelling.is_empty() {
            last_component(&record.qualified_name).to_string()
        } else {
            record.spelling.clone()
        };
        let sig = record.signature;
        let mut decl = Declaration::new(
            kind,
            name,
            record.qualified_name.clone(),
            &key,
            record.location,
        );
        decl.raw_comment = record.raw_comment.filter(|c| !c.trim().is_empty());
        decl.template_params = sig.template_params.clone();
        decl.bases = sig.bases.clone();
        decl.underlying_type = sig.underlying_type.clone();
        decl.record_tag = sig.record_tag;
        if kind == DeclKind::Function {
            decl.signature = Some(Signature {
                params: sig.params.clone(),
                return_type: sig.return_type.clone(),
                is_const: sig.is_const,
                is_static: sig.is_static,
                is_virtual: sig.is_virtual,
            });
        }
        let location = decl.location.clone();
        let qualified_name = decl.qualified_name.clone();

        self.graph.decls_mut().insert(decl);
        self.order.push(id);
        self.parent_hints.insert(id, hint);

        for param in &sig.template_params {
            self.add_template_param(id, kind, &qualified_name, param, &location);
        }
    }

    fn add_template_param(
        &mut self,
        owner: DeclId,
        owner_kind: DeclKind,
        owner_qname: &str,
        param: &str,
        location: &Location,
    ) {
        let name = template_param_name(param);
        if name.is_empty() {
            return;
        }
        let qualified_name = format!("{}::{}", owner_qname, name);
        let decl = Declaration::new(
            DeclKind::TemplateParam,
            name,
            qualified_name.clone(),
            &owner.to_string(),
            location.clone(),
        );
        let id = decl.id;
        if self.graph.decls_mut().insert(decl) {
            self.order.push(id);
            self.parent_hints.insert(
                id,
                Some(ParentHint {
                    id: owner,
                    kind: owner_kind,
                    qualified_name: owner_qname.to_string(),
                }),
            );
        }
    }

    // ------------------------------------------------------------------------
    // Specializations
    // ------------------------------------------------------------------------

    fn collapse_specialization(&mut self, record: RawRecord) {
        let Some(primary_name) = record.signature.specialization_of.clone() else {
            return;
        };
        let spec_id = DeclId::compute(
            &record.qualified_name,
            DeclKind::Record,
            &record.signature_key(),
        );
        let Some(primary) = self.graph.decls().find(&primary_name, DeclKind::Record) else {
            warn!(
                "specialization {} has no primary template {}",
                record.qualified_name, primary_name
            );
            self.diagnostics.push(
                Diagnostic::new(
                    DiagnosticKind::OrphanSpecialization,
                    Severity::Warning,
                    Owner::File(record.location.file.clone()),
                    format!(
                        "specialization '{}' dropped: primary template '{}' not found",
                        record.qualified_name, primary_name
                    ),
                )
                .with_location(record.location),
            );
            return;
        };

        self.redirects.insert(spec_id, primary);
        self.redirects_by_name
            .insert(record.qualified_name.clone(), primary);

        let args: Vec<String> = record
            .signature
            .specialization_args
            .iter()
            .map(|a| normalize_type_text(a))
            .collect();
        let Some(decl) = self.graph.decls_mut().get_mut(primary) else {
            return;
        };
        if let Some(existing) = decl.specializations.iter_mut().find(|s| s.args == args) {
            if existing.raw_comment.is_none() {
                existing.raw_comment = record.raw_comment.filter(|c| !c.trim().is_empty());
            }
            return;
        }
        debug!("collapsing {} onto {}", record.qualified_name, decl.qualified_name);
        decl.specializations.push(Specialization {
            args,
            location: record.location,
            raw_comment: record.raw_comment.filter(|c| !c.trim().is_empty()),
        });
    }

    // ------------------------------------------------------------------------
    // Containment
    // ------------------------------------------------------------------------

    fn link(&mut self, id: DeclId) {
        let Some(decl) = self.graph.decl(id) else {
            return;
        };
        let qualified_name = decl.qualified_name.clone();
        let location = decl.location.clone();
        let hint = self.parent_hints.get(&id).cloned().flatten();

        let mut parent = match hint {
            Some(hint) => self.parent_from_hint(&qualified_name, &location, &hint),
            None => {
                let prefix = parent_qualified_name(&qualified_name);
                self.ensure_scope(&prefix, &location)
            }
        };

        if parent == id || self.graph.decls().ancestors(parent).contains(&id) {
            self.orphan(id, &qualified_name, &location, "parent would form a cycle");
            parent = self.graph.root();
        }
        self.graph.decls_mut().set_parent(id, parent);
    }

    fn parent_from_hint(
        &mut self,
        qualified_name: &str,
        location: &Location,
        hint: &ParentHint,
    ) -> DeclId {
        if let Some(target) = self.redirects.get(&hint.id) {
            return *target;
        }
        if self.graph.decls().contains(hint.id) {
            return hint.id;
        }
        if let Some(target) = self.redirects_by_name.get(&hint.qualified_name) {
            return *target;
        }
        if hint.kind == DeclKind::Namespace {
            return self.ensure_scope(&hint.qualified_name, location);
        }

        let fallback = self.nearest_existing(&hint.qualified_name);
        let message = format!(
            "parent {} '{}' not found; attached to '{}'",
            hint.kind,
            hint.qualified_name,
            self.graph
                .decl(fallback)
                .map(|d| d.qualified_name.as_str())
                .unwrap_or("")
        );
        warn!("{}: {}", qualified_name, message);
        self.diagnostics.push(
            Diagnostic::new(
                DiagnosticKind::OrphanDeclaration,
                Severity::Warning,
                Owner::File(location.file.clone()),
                format!("'{}': {}", qualified_name, message),
            )
            .with_location(location.clone()),
        );
        fallback
    }

    fn orphan(&mut self, id: DeclId, qualified_name: &str, location: &Location, reason: &str) {
        warn!("{} ({}): {}", qualified_name, id, reason);
        self.diagnostics.push(
            Diagnostic::new(
                DiagnosticKind::OrphanDeclaration,
                Severity::Warning,
                Owner::Declaration(id),
                format!("'{}': {}; attached to the global namespace", qualified_name, reason),
            )
            .with_location(location.clone()),
        );
    }

    /// An existing scope with this qualified name, preferring namespaces.
    fn existing_scope(&self, qualified_name: &str) -> Option<DeclId> {
        if let Some(primary) = self.redirects_by_name.get(qualified_name) {
            return Some(*primary);
        }
        [DeclKind::Namespace, DeclKind::Record, DeclKind::Enum]
            .into_iter()
            .find_map(|kind| self.graph.decls().find(qualified_name, kind))
    }

    /// The scope named `qualified_name`, synthesizing missing namespaces.
    fn ensure_scope(&mut self, qualified_name: &str, location: &Location) -> DeclId {
        if qualified_name.is_empty() {
            return self.graph.root();
        }
        if let Some(existing) = self.existing_scope(qualified_name) {
            return existing;
        }

        let parent = self.ensure_scope(&parent_qualified_name(qualified_name), location);
        let decl = Declaration::new(
            DeclKind::Namespace,
            last_component(qualified_name),
            qualified_name,
            "",
            location.clone(),
        );
        let id = decl.id;
        debug!("synthesizing namespace {}", qualified_name);
        self.graph.decls_mut().insert(decl);
        self.graph.decls_mut().set_parent(id, parent);
        id
    }

    /// Closest existing scope among `qualified_name` and its prefixes.
    fn nearest_existing(&self, qualified_name: &str) -> DeclId {
        let mut current = qualified_name.to_string();
        while !current.is_empty() {
            if let Some(existing) = self.existing_scope(&current) {
                return existing;
            }
            current = parent_qualified_name(&current);
        }
        self.graph.root()
    }

    fn add_using_directive(&mut self, record: RawRecord) {
        let nominated = record.qualified_name.trim().to_string();
        if nominated.is_empty() {
            return;
        }
        let scope = match record.parent.as_ref().map(ParentHint::from) {
            Some(hint) => match self.redirects.get(&hint.id) {
                Some(target) => *target,
                None if self.graph.decls().contains(hint.id) => hint.id,
                None => self.nearest_existing(&hint.qualified_name),
            },
            None => self.graph.root(),
        };
        if let Some(decl) = self.graph.decls_mut().get_mut(scope) {
            if !decl.using_directives.contains(&nominated) {
                decl.using_directives.push(nominated);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Ordering
    // ------------------------------------------------------------------------

    fn sort_children(&mut self) {
        let locations: HashMap<DeclId, Location> = self
            .graph
            .decls()
            .iter()
            .map(|d| (d.id, d.location.clone()))
            .collect();
        let ids: Vec<DeclId> = locations.keys().copied().collect();
        for id in ids {
            if let Some(decl) = self.graph.decls_mut().get_mut(id) {
                // Stable: equal positions keep stream order.
                decl.children
                    .sort_by(|a, b| locations.get(a).cmp(&locations.get(b)));
            }
        }
    }

    // ------------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------------

    fn create_references(&mut self) {
        let mut pending: Vec<(DeclId, RefKind, String)> = Vec::new();
        let mut seen: HashSet<DeclId> = HashSet::new();

        for id in &self.order {
            if !seen.insert(*id) {
                continue;
            }
            let Some(decl) = self.graph.decl(*id) else {
                continue;
            };
            match decl.kind {
                DeclKind::Function => {
                    if let Some(sig) = &decl.signature {
                        for param in &sig.params {
                            pending.push((*id, RefKind::TypeUse, param.type_text.clone()));
                        }
                        if let Some(ret) = &sig.return_type {
                            pending.push((*id, RefKind::TypeUse, ret.clone()));
                        }
                    }
                }
                DeclKind::Field | DeclKind::Enum => {
                    if let Some(ty) = &decl.underlying_type {
                        pending.push((*id, RefKind::TypeUse, ty.clone()));
                    }
                }
                DeclKind::Alias => {
                    if let Some(ty) = &decl.underlying_type {
                        pending.push((*id, RefKind::AliasOf, ty.clone()));
                    }
                }
                DeclKind::Record => {
                    for base in &decl.bases {
                        pending.push((*id, RefKind::BaseClass, base.clone()));
                    }
                }
                DeclKind::Namespace | DeclKind::EnumConstant | DeclKind::TemplateParam => {}
            }
        }

        for (owner, kind, text) in pending {
            if text.trim().is_empty() || is_fundamental(&text) {
                continue;
            }
            self.graph.add_reference(owner, kind, text);
        }
    }
}

/// Name introduced by a template parameter as written.
///
/// `typename T` → `T`, `int N = 3` → `N`, `class... Ts` → `Ts`.
fn template_param_name(param: &str) -> &str {
    let declarator = param.split('=').next().unwrap_or(param).trim();
    declarator
        .rsplit(|c: char| c.is_whitespace() || c == '.' || c == '&' || c == '*')
        .find(|s| !s.is_empty())
        .unwrap_or("")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::RawSignature;
    use crate::model::Param;

    fn loc(file: &str, line: u32) -> Location {
        Location::new(file, line, 1)
    }

    fn names_of(graph: &SymbolGraph, ids: &[DeclId]) -> Vec<String> {
        ids.iter()
            .map(|id| graph.decl(*id).unwrap().qualified_name.clone())
            .collect()
    }

    mod node_tests {
        use super::*;

        #[test]
        fn same_entity_merges_with_first_location() {
            let out = build(vec![
                RawRecord::new(RecordKind::Record, "ui::Widget", loc("a.hpp", 3)),
                RawRecord::new(RecordKind::Record, "ui::Widget", loc("b.hpp", 7))
                    .with_comment("/// A widget."),
            ]);
            let id = out.graph.decls().find("ui::Widget", DeclKind::Record).unwrap();
            let decl = out.graph.decl(id).unwrap();
            assert_eq!(decl.location, loc("a.hpp", 3));
            assert_eq!(decl.redeclarations, vec![loc("b.hpp", 7)]);
            assert_eq!(decl.raw_comment.as_deref(), Some("/// A widget."));
            assert_eq!(out.graph.decls().named("ui::Widget").len(), 1);
        }

        #[test]
        fn namespaces_merge_across_files() {
            let out = build(vec![
                RawRecord::new(RecordKind::Namespace, "ns", loc("a.hpp", 1)),
                RawRecord::new(RecordKind::Function, "ns::a", loc("a.hpp", 2))
                    .with_parent("ns", DeclKind::Namespace),
                RawRecord::new(RecordKind::Namespace, "ns", loc("b.hpp", 1)),
                RawRecord::new(RecordKind::Function, "ns::b", loc("b.hpp", 2))
                    .with_parent("ns", DeclKind::Namespace),
            ]);
            let ns = out.graph.decls().named("ns");
            assert_eq!(ns.len(), 1);
            assert_eq!(
                names_of(&out.graph, out.graph.decls().children(ns[0])),
                vec!["ns::a", "ns::b"]
            );
            out.graph.decls().validate().unwrap();
        }

        #[test]
        fn overloads_stay_distinct() {
            let f = |ty: &str, line| {
                RawRecord::new(RecordKind::Function, "ns::bar", loc("a.hpp", line)).with_signature(
                    RawSignature {
                        params: vec![Param::unnamed(ty)],
                        ..Default::default()
                    },
                )
            };
            let out = build(vec![f("int", 1), f("double", 2), f("int", 3)]);
            let ids = out.graph.decls().named("ns::bar");
            assert_eq!(ids.len(), 2);
        }

        #[test]
        fn template_params_become_children() {
            let out = build(vec![RawRecord::new(RecordKind::Record, "Pair", loc("p.hpp", 1))
                .with_signature(RawSignature {
                    template_params: vec!["typename A".into(), "class... Rest".into(), "int N = 2".into()],
                    ..Default::default()
                })]);
            let pair = out.graph.decls().find("Pair", DeclKind::Record).unwrap();
            let names: Vec<&str> = out
                .graph
                .decls()
                .children(pair)
                .iter()
                .map(|c| out.graph.decl(*c).unwrap().name.as_str())
                .collect();
            assert_eq!(names, vec!["A", "Rest", "N"]);
        }
    }

    mod containment_tests {
        use super::*;

        #[test]
        fn missing_namespaces_are_synthesized() {
            let out = build(vec![RawRecord::new(
                RecordKind::Record,
                "a::b::Widget",
                loc("w.hpp", 4),
            )]);
            let graph = &out.graph;
            let a = graph.decls().find("a", DeclKind::Namespace).unwrap();
            let b = graph.decls().find("a::b", DeclKind::Namespace).unwrap();
            let w = graph.decls().find("a::b::Widget", DeclKind::Record).unwrap();
            assert_eq!(graph.decls().parent(w), Some(b));
            assert_eq!(graph.decls().parent(b), Some(a));
            assert_eq!(graph.decls().parent(a), Some(graph.root()));
            assert!(out.diagnostics.is_empty());
            graph.decls().validate().unwrap();
        }

        #[test]
        fn missing_record_parent_falls_back_with_warning() {
            let out = build(vec![
                RawRecord::new(RecordKind::Namespace, "ui", loc("w.hpp", 1)),
                RawRecord::new(RecordKind::Field, "ui::Widget::width", loc("w.hpp", 5))
                    .with_parent("ui::Widget", DeclKind::Record),
            ]);
            let graph = &out.graph;
            let ui = graph.decls().find("ui", DeclKind::Namespace).unwrap();
            let field = graph.decls().find("ui::Widget::width", DeclKind::Field).unwrap();
            assert_eq!(graph.decls().parent(field), Some(ui));
            assert_eq!(out.diagnostics.len(), 1);
            assert_eq!(out.diagnostics[0].kind, DiagnosticKind::OrphanDeclaration);
            graph.decls().validate().unwrap();
        }

        #[test]
        fn children_are_ordered_by_first_location() {
            let out = build(vec![
                RawRecord::new(RecordKind::Function, "z", loc("b.hpp", 1)),
                RawRecord::new(RecordKind::Function, "y", loc("a.hpp", 9)),
                RawRecord::new(RecordKind::Function, "x", loc("a.hpp", 2)),
            ]);
            let root = out.graph.root();
            assert_eq!(
                names_of(&out.graph, out.graph.decls().children(root)),
                vec!["x", "y", "z"]
            );
        }

        #[test]
        fn every_parent_chain_reaches_root() {
            let out = build(vec![
                RawRecord::new(RecordKind::Enum, "gfx::Color", loc("c.hpp", 1)),
                RawRecord::new(RecordKind::EnumConstant, "gfx::Color::Red", loc("c.hpp", 2))
                    .with_parent("gfx::Color", DeclKind::Enum),
                RawRecord::new(RecordKind::Field, "orphan::Thing::x", loc("c.hpp", 3))
                    .with_parent("orphan::Thing", DeclKind::Record),
                RawRecord::new(RecordKind::Alias, "gfx::Rgb", loc("c.hpp", 4)),
            ]);
            out.graph.decls().validate().unwrap();
            for decl in out.graph.decls().iter() {
                assert_eq!(
                    out.graph.decls().ancestors(decl.id).last(),
                    Some(&out.graph.root())
                );
            }
        }
    }

    mod specialization_tests {
        use super::*;

        fn spec(args: &[&str], line: u32) -> RawRecord {
            let qname = format!("Box<{}>", args.join(", "));
            RawRecord::new(RecordKind::Record, qname, loc("box.hpp", line)).with_signature(
                RawSignature {
                    specialization_of: Some("Box".into()),
                    specialization_args: args.iter().map(|a| a.to_string()).collect(),
                    ..Default::default()
                },
            )
        }

        #[test]
        fn specializations_collapse_onto_primary() {
            let out = build(vec![
                RawRecord::new(RecordKind::Record, "Box", loc("box.hpp", 1)),
                spec(&["int"], 10),
                spec(&["int"], 10),
                spec(&["std::vector< int >"], 20),
                RawRecord::new(RecordKind::Function, "Box<int>::get", loc("box.hpp", 11))
                    .with_parent("Box<int>", DeclKind::Record),
            ]);
            let graph = &out.graph;
            let primary = graph.decls().find("Box", DeclKind::Record).unwrap();
            let decl = graph.decl(primary).unwrap();
            assert_eq!(decl.specializations.len(), 2);
            assert_eq!(decl.specializations[1].args, vec!["std::vector<int>".to_string()]);
            assert!(graph.decls().named("Box<int>").is_empty());

            let get = graph.decls().find("Box<int>::get", DeclKind::Function).unwrap();
            assert_eq!(graph.decls().parent(get), Some(primary));
            graph.decls().validate().unwrap();
        }

        #[test]
        fn deduction_guides_are_skipped() {
            let out = build(vec![
                RawRecord::new(RecordKind::Record, "Box", loc("box.hpp", 1)),
                RawRecord::new(RecordKind::Function, "<deduction guide for Box>", loc("box.hpp", 5))
                    .with_comment("/// Deduces Box<T> from T."),
            ]);
            assert!(out.diagnostics.is_empty());
            assert_eq!(out.graph.decls().len(), 2);
            assert!(out.graph.decls().named("<deduction guide for Box>").is_empty());
        }

        #[test]
        fn specialization_without_primary_warns() {
            let out = build(vec![spec(&["int"], 10)]);
            assert_eq!(out.diagnostics.len(), 1);
            assert_eq!(out.diagnostics[0].kind, DiagnosticKind::OrphanSpecialization);
            assert_eq!(out.graph.decls().len(), 1);
        }
    }

    mod reference_tests {
        use super::*;

        #[test]
        fn references_for_types_bases_and_aliases() {
            let out = build(vec![
                RawRecord::new(RecordKind::Record, "Shape", loc("s.hpp", 1)),
                RawRecord::new(RecordKind::Record, "Circle", loc("s.hpp", 2)).with_signature(
                    RawSignature {
                        bases: vec!["Shape".into()],
                        ..Default::default()
                    },
                ),
                RawRecord::new(RecordKind::Field, "Circle::radius", loc("s.hpp", 3))
                    .with_parent("Circle", DeclKind::Record)
                    .with_signature(RawSignature {
                        underlying_type: Some("double".into()),
                        ..Default::default()
                    }),
                RawRecord::new(RecordKind::Alias, "Round", loc("s.hpp", 4)).with_signature(
                    RawSignature {
                        underlying_type: Some("Circle".into()),
                        ..Default::default()
                    },
                ),
                RawRecord::new(RecordKind::Function, "area", loc("s.hpp", 5)).with_signature(
                    RawSignature {
                        params: vec![Param::new("s", "const Shape &")],
                        return_type: Some("double".into()),
                        ..Default::default()
                    },
                ),
            ]);
            let kinds: Vec<(RefKind, &str)> = out
                .graph
                .references()
                .iter()
                .map(|r| (r.kind, r.text.as_str()))
                .collect();
            assert_eq!(
                kinds,
                vec![
                    (RefKind::BaseClass, "Shape"),
                    (RefKind::AliasOf, "Circle"),
                    (RefKind::TypeUse, "const Shape &"),
                ]
            );
        }

        #[test]
        fn ids_are_stable_across_builds() {
            let records = vec![
                RawRecord::new(RecordKind::Record, "ns::A", loc("a.hpp", 1)),
                RawRecord::new(RecordKind::Function, "ns::f", loc("a.hpp", 2)).with_signature(
                    RawSignature {
                        params: vec![Param::unnamed("A"), Param::unnamed("B")],
                        ..Default::default()
                    },
                ),
            ];
            let first = build(records.clone());
            let second = build(records);
            let ids = |g: &SymbolGraph| g.decls().iter().map(|d| d.id).collect::<Vec<_>>();
            assert_eq!(ids(&first.graph), ids(&second.graph));
            assert_eq!(first.graph.references(), second.graph.references());
        }
    }

    #[test]
    fn template_param_names() {
        assert_eq!(template_param_name("typename T"), "T");
        assert_eq!(template_param_name("class... Ts"), "Ts");
        assert_eq!(template_param_name("std::size_t N = 4"), "N");
        assert_eq!(template_param_name("U"), "U");
    }
}
