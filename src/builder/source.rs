//! Requirement-source provenance.
//!
//! Every fact the builder records carries a source: a node in a hash-consed
//! DAG explaining how the fact was learned. Root sources describe where a
//! requirement was written (or inferred); derived sources chain through the
//! protocol requirements, superclass bounds, concrete bindings, and parent
//! associations that implied it. Sources are interned by profile, so two
//! identical derivations share one id.

use std::collections::{HashMap, HashSet};

use crate::builder::archetype::PaId;
use crate::builder::GenericSignatureBuilder;
use crate::diag::Span;
use crate::types::{AssocTypeId, Conformance, ProtocolId, Type, PROTOCOL_SELF};

/// Bound on same-named nesting along nested-type-name-match derivations.
/// The fixed count stands in for real recursion-depth accounting on this
/// path; see DESIGN.md.
pub const SAME_NAME_NESTING_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub u32);

impl SourceId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// A requirement stated in source, or an abstract requirement with no
    /// written location.
    Explicit { loc: Option<Span> },

    /// A requirement inferred from the use of a concrete type; the note
    /// records what it was inferred from.
    Inferred { note: Option<String> },

    /// The `Self: P` conformance at the root of a protocol's own
    /// requirement signature.
    RequirementSignatureSelf { protocol: ProtocolId },

    /// Implicit equivalence of same-named nested types within one class.
    NestedTypeNameMatch,

    /// A requirement of a protocol, applied to a conforming subject. The
    /// stored type is the protocol-relative subject the requirement was
    /// written on.
    ProtocolRequirement {
        stored: Type,
        protocol: ProtocolId,
        inferred: bool,
        loc: Option<Span>,
    },

    /// Conformance supplied by a superclass bound.
    Superclass { conformance: Option<Conformance> },

    /// Conformance supplied by a concrete binding.
    Concrete { conformance: Option<Conformance> },

    /// Step from a parent archetype to one of its associated types.
    Parent { assoc: AssocTypeId },
}

#[derive(Debug, Clone)]
pub struct SourceNode {
    pub kind: SourceKind,
    pub parent: Option<SourceId>,
    /// The archetype a root source was written on; `None` for derived
    /// sources, which find their root through `parent`.
    pub root: Option<PaId>,
}

#[derive(Debug, Default)]
pub struct SourceArena {
    nodes: Vec<SourceNode>,
    interned: HashMap<(SourceKind, Option<SourceId>, Option<PaId>), SourceId>,
}

impl SourceArena {
    pub fn node(&self, id: SourceId) -> &SourceNode {
        &self.nodes[id.index()]
    }

    fn intern(&mut self, kind: SourceKind, parent: Option<SourceId>, root: Option<PaId>) -> SourceId {
        let key = (kind, parent, root);
        if let Some(&known) = self.interned.get(&key) {
            return known;
        }
        let id = SourceId(self.nodes.len() as u32);
        self.nodes.push(SourceNode {
            kind: key.0.clone(),
            parent,
            root,
        });
        self.interned.insert(key, id);
        id
    }

    pub fn for_abstract(&mut self, root: PaId) -> SourceId {
        self.intern(SourceKind::Explicit { loc: None }, None, Some(root))
    }

    pub fn for_explicit(&mut self, root: PaId, loc: Option<Span>) -> SourceId {
        self.intern(SourceKind::Explicit { loc }, None, Some(root))
    }

    pub fn for_inferred(&mut self, root: PaId, note: Option<String>) -> SourceId {
        self.intern(SourceKind::Inferred { note }, None, Some(root))
    }

    pub fn for_requirement_signature(&mut self, root: PaId, protocol: ProtocolId) -> SourceId {
        self.intern(
            SourceKind::RequirementSignatureSelf { protocol },
            None,
            Some(root),
        )
    }

    pub fn for_nested_type_name_match(&mut self, root: PaId) -> SourceId {
        self.intern(SourceKind::NestedTypeNameMatch, None, Some(root))
    }

    pub fn via_protocol_requirement(
        &mut self,
        parent: SourceId,
        stored: Type,
        protocol: ProtocolId,
        inferred: bool,
        loc: Option<Span>,
    ) -> SourceId {
        self.intern(
            SourceKind::ProtocolRequirement {
                stored,
                protocol,
                inferred,
                loc,
            },
            Some(parent),
            None,
        )
    }

    pub fn via_superclass(&mut self, parent: SourceId, conformance: Option<Conformance>) -> SourceId {
        self.intern(SourceKind::Superclass { conformance }, Some(parent), None)
    }

    pub fn via_concrete(&mut self, parent: SourceId, conformance: Option<Conformance>) -> SourceId {
        self.intern(SourceKind::Concrete { conformance }, Some(parent), None)
    }

    pub fn via_parent(&mut self, parent: SourceId, assoc: AssocTypeId) -> SourceId {
        self.intern(SourceKind::Parent { assoc }, Some(parent), None)
    }

    pub fn is_protocol_requirement(&self, id: SourceId) -> bool {
        matches!(self.node(id).kind, SourceKind::ProtocolRequirement { .. })
    }

    /// Whether any source on the parent chain was inferred.
    pub fn is_inferred(&self, id: SourceId) -> bool {
        let mut current = Some(id);
        while let Some(id) = current {
            let node = self.node(id);
            match &node.kind {
                SourceKind::Inferred { .. } => return true,
                SourceKind::ProtocolRequirement { inferred: true, .. } => return true,
                _ => {}
            }
            current = node.parent;
        }
        false
    }

    /// Whether the requirement is implied by other requirements rather than
    /// stated. Protocol requirements hanging directly off the requirement
    /// signature root still count as stated: they are the signature.
    pub fn is_derived(&self, id: SourceId) -> bool {
        let node = self.node(id);
        match &node.kind {
            SourceKind::Explicit { .. } | SourceKind::Inferred { .. } => false,
            SourceKind::NestedTypeNameMatch
            | SourceKind::Parent { .. }
            | SourceKind::Superclass { .. }
            | SourceKind::Concrete { .. }
            | SourceKind::RequirementSignatureSelf { .. } => true,
            SourceKind::ProtocolRequirement { .. } => {
                let parent = node.parent.expect("protocol requirement has a parent");
                !matches!(
                    self.node(parent).kind,
                    SourceKind::RequirementSignatureSelf { .. }
                )
            }
        }
    }

    /// Number of protocol-requirement steps on the parent chain.
    pub fn path_length(&self, id: SourceId) -> usize {
        let mut count = 0;
        let mut current = Some(id);
        while let Some(id) = current {
            if self.is_protocol_requirement(id) {
                count += 1;
            }
            current = self.node(id).parent;
        }
        count
    }

    /// Total preference order: derived first, then shorter derivation path.
    /// The final tiebreak is stable insertion order rather than anything
    /// canonical; later sources never displace an equally good earlier one.
    pub fn compare(&self, a: SourceId, b: SourceId) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        let a_derived = self.is_derived(a);
        let b_derived = self.is_derived(b);
        if a_derived != b_derived {
            return if a_derived { Ordering::Less } else { Ordering::Greater };
        }

        let a_len = self.path_length(a);
        let b_len = self.path_length(b);
        if a_len != b_len {
            return a_len.cmp(&b_len);
        }

        Ordering::Greater
    }

    /// The location a diagnostic about this requirement should point at.
    pub fn loc(&self, id: SourceId) -> Option<Span> {
        let node = self.node(id);
        if let SourceKind::ProtocolRequirement { loc, .. } = &node.kind {
            let parent = node.parent.expect("protocol requirement has a parent");
            if !matches!(
                self.node(parent).kind,
                SourceKind::RequirementSignatureSelf { .. }
            ) {
                return self.loc(parent);
            }
            if loc.is_some() {
                return *loc;
            }
            return self.loc(parent);
        }

        if let SourceKind::Explicit { loc: Some(loc) } = node.kind {
            return Some(loc);
        }

        match node.parent {
            Some(parent) => self.loc(parent),
            None => None,
        }
    }

    pub fn classify(&self, id: SourceId) -> crate::builder::errors::Provenance {
        use crate::builder::errors::Provenance;
        if self.is_inferred(id) {
            Provenance::Inferred
        } else if self.is_derived(id) {
            Provenance::Implied
        } else {
            Provenance::Written
        }
    }

    pub fn root(&self, id: SourceId) -> SourceId {
        let mut current = id;
        while let Some(parent) = self.node(current).parent {
            current = parent;
        }
        current
    }

    pub fn root_archetype(&self, id: SourceId) -> PaId {
        self.node(self.root(id))
            .root
            .expect("root source stores its archetype")
    }
}

/// A requirement source that has not yet been anchored to the archetype it
/// will constrain. Materialized once resolution decides where it lands.
#[derive(Debug, Clone)]
pub enum FloatingSource {
    Explicit {
        loc: Option<Span>,
    },
    Inferred {
        note: Option<String>,
    },
    /// A requirement carried over from a protocol's declaration, relative
    /// to the conformance recorded at `base`.
    AbstractProtocol {
        base: SourceId,
        protocol: ProtocolId,
        inferred: bool,
        loc: Option<Span>,
    },
    NestedTypeNameMatch {
        base: SourceId,
        name: String,
    },
    Resolved(SourceId),
}

impl FloatingSource {
    pub fn for_abstract() -> Self {
        FloatingSource::Explicit { loc: None }
    }

    pub fn for_explicit(loc: Span) -> Self {
        FloatingSource::Explicit { loc: Some(loc) }
    }

    pub fn for_inferred(note: Option<String>) -> Self {
        FloatingSource::Inferred { note }
    }

    pub fn via_protocol_requirement(
        base: SourceId,
        protocol: ProtocolId,
        inferred: bool,
        loc: Option<Span>,
    ) -> Self {
        FloatingSource::AbstractProtocol {
            base,
            protocol,
            inferred,
            loc,
        }
    }

    pub fn for_nested_type_name_match(base: SourceId, name: impl Into<String>) -> Self {
        FloatingSource::NestedTypeNameMatch {
            base,
            name: name.into(),
        }
    }

    pub fn resolved(source: SourceId) -> Self {
        FloatingSource::Resolved(source)
    }

    pub fn loc(&self, sources: &SourceArena) -> Option<Span> {
        match self {
            FloatingSource::Explicit { loc } => *loc,
            FloatingSource::Inferred { .. } => None,
            FloatingSource::AbstractProtocol { loc, base, .. } => loc.or_else(|| sources.loc(*base)),
            FloatingSource::NestedTypeNameMatch { .. } => None,
            FloatingSource::Resolved(source) => sources.loc(*source),
        }
    }

    /// Re-labels the source as inferred, for requirements discovered while
    /// walking the types mentioned by another requirement.
    pub fn as_inferred(&self, note: Option<String>) -> FloatingSource {
        match self {
            FloatingSource::Explicit { .. } => FloatingSource::Inferred { note },
            FloatingSource::Inferred { .. }
            | FloatingSource::Resolved(_)
            | FloatingSource::NestedTypeNameMatch { .. } => self.clone(),
            FloatingSource::AbstractProtocol {
                base,
                protocol,
                loc,
                ..
            } => FloatingSource::AbstractProtocol {
                base: *base,
                protocol: *protocol,
                inferred: true,
                loc: *loc,
            },
        }
    }
}

impl GenericSignatureBuilder<'_> {
    /// Whether a floating source counts as explicitly stated, which governs
    /// diagnostics for requirements placed on concrete types.
    pub(crate) fn floating_is_explicit(&self, source: &FloatingSource) -> bool {
        match source {
            FloatingSource::Explicit { .. } => true,
            FloatingSource::Inferred { .. } | FloatingSource::NestedTypeNameMatch { .. } => false,
            FloatingSource::AbstractProtocol { base, .. } => matches!(
                self.sources.node(*base).kind,
                SourceKind::RequirementSignatureSelf { .. }
            ),
            FloatingSource::Resolved(source) => {
                let node = self.sources.node(*source);
                match &node.kind {
                    SourceKind::Explicit { .. } => true,
                    SourceKind::ProtocolRequirement { .. } => {
                        let parent = node.parent.expect("protocol requirement has a parent");
                        matches!(
                            self.sources.node(parent).kind,
                            SourceKind::RequirementSignatureSelf { .. }
                        )
                    }
                    _ => false,
                }
            }
        }
    }

    /// Detects derivations that already revisit the same protocol
    /// requirement, which would otherwise expand without bound.
    pub(crate) fn floating_is_recursive(&mut self, source: &FloatingSource) -> bool {
        let base = match source {
            FloatingSource::AbstractProtocol { base, .. } => Some(*base),
            FloatingSource::Resolved(source) => Some(*source),
            FloatingSource::NestedTypeNameMatch { base, .. } => Some(*base),
            _ => None,
        };

        if let Some(base) = base {
            let mut seen: HashSet<(Type, ProtocolId)> = HashSet::new();
            let mut current = Some(base);
            while let Some(id) = current {
                let node = self.sources.node(id);
                if let SourceKind::ProtocolRequirement {
                    stored, protocol, ..
                } = &node.kind
                {
                    if !seen.insert((stored.clone(), *protocol)) {
                        return true;
                    }
                }
                current = node.parent;
            }
        }

        if let FloatingSource::NestedTypeNameMatch { base, name } = source {
            if let Some(mut pa) = self.source_affected_archetype(*base) {
                let mut count = 0;
                while let Some(parent) = self.pa(pa).parent {
                    if self.pa(pa).name == *name {
                        count += 1;
                        if count >= SAME_NAME_NESTING_LIMIT {
                            return true;
                        }
                    }
                    pa = parent;
                }
            }
        }

        false
    }

    /// Anchors a floating source at the archetype the requirement resolved
    /// to, producing an interned source node.
    pub(crate) fn materialize_source(&mut self, source: &FloatingSource, pa: PaId) -> SourceId {
        match source {
            FloatingSource::Resolved(source) => *source,
            FloatingSource::Explicit { loc } => self.sources.for_explicit(pa, *loc),
            FloatingSource::Inferred { note } => self.sources.for_inferred(pa, note.clone()),
            FloatingSource::NestedTypeNameMatch { .. } => {
                self.sources.for_nested_type_name_match(pa)
            }
            FloatingSource::AbstractProtocol {
                base,
                protocol,
                inferred,
                loc,
            } => {
                // The requirement was written relative to the protocol's
                // Self; rebuild that dependent type from the conformance
                // subject down to the constrained archetype.
                let base_pa = self
                    .source_affected_archetype(*base)
                    .expect("conformance source affects an archetype");
                let stored = self.protocol_relative_type(base_pa, pa);
                self.sources
                    .via_protocol_requirement(*base, stored, *protocol, *inferred, *loc)
            }
        }
    }

    /// The dependent type naming `pa` with the protocol's `Self` standing
    /// in for `base`.
    fn protocol_relative_type(&self, base: PaId, pa: PaId) -> Type {
        if base == pa {
            return Type::Param(PROTOCOL_SELF);
        }
        let node = self.pa(pa);
        let parent = node
            .parent
            .expect("dependent type chain reaches the conformance subject");
        let base_ty = self.protocol_relative_type(base, parent);
        match node.resolved_assoc() {
            Some(assoc) => Type::member_resolved(base_ty, node.name.clone(), assoc),
            None => Type::member(base_ty, node.name.clone()),
        }
    }

    /// Walks the source path from its root to the archetype it constrains,
    /// visiting each intermediate archetype. A visitor returning `true`
    /// short-circuits the walk, yielding `None`.
    pub(crate) fn visit_archetypes_along_path(
        &mut self,
        id: SourceId,
        visitor: &mut impl FnMut(&mut Self, PaId, SourceId) -> bool,
    ) -> Option<PaId> {
        let node = self.sources.node(id).clone();
        match node.kind {
            SourceKind::Explicit { .. }
            | SourceKind::Inferred { .. }
            | SourceKind::RequirementSignatureSelf { .. }
            | SourceKind::NestedTypeNameMatch => {
                let root = node.root.expect("root source stores its archetype");
                if visitor(self, root, id) {
                    return None;
                }
                Some(root)
            }

            SourceKind::Superclass { .. } | SourceKind::Concrete { .. } => {
                let parent = node.parent.expect("derived source has a parent");
                self.visit_archetypes_along_path(parent, visitor)
            }

            SourceKind::Parent { assoc } => {
                let parent = node.parent.expect("derived source has a parent");
                let parent_pa = self.visit_archetypes_along_path(parent, visitor)?;
                if visitor(self, parent_pa, id) {
                    return None;
                }
                let decl = self.decls.assoc_type(assoc);
                let dep = Type::member_resolved(
                    Type::Param(PROTOCOL_SELF),
                    decl.name.clone(),
                    assoc,
                );
                self.replace_self_with_archetype(parent_pa, &dep)
            }

            SourceKind::ProtocolRequirement { ref stored, .. } => {
                let parent = node.parent.expect("derived source has a parent");
                let parent_pa = self.visit_archetypes_along_path(parent, visitor)?;
                if visitor(self, parent_pa, id) {
                    return None;
                }
                self.replace_self_with_archetype(parent_pa, stored)
            }
        }
    }

    /// The archetype this source ultimately constrains.
    pub(crate) fn source_affected_archetype(&mut self, id: SourceId) -> Option<PaId> {
        self.visit_archetypes_along_path(id, &mut |_, _, _| false)
    }

    /// Substitutes `self_pa` for `Self` in a protocol-relative dependent
    /// type, reusing existing archetypes only.
    pub(crate) fn replace_self_with_archetype(
        &mut self,
        self_pa: PaId,
        dep_ty: &Type,
    ) -> Option<PaId> {
        match dep_ty {
            Type::Param(_) => Some(self_pa),
            Type::Member { base, name, assoc } => {
                let base_pa = self.replace_self_with_archetype(self_pa, base)?;

                let find_nested = |builder: &Self, pa: PaId| -> (Option<PaId>, Option<PaId>) {
                    let node = builder.pa(pa);
                    let Some(children) = node.nested.get(name) else {
                        return (None, None);
                    };
                    let by_name = children.first().copied();
                    let Some(assoc) = assoc else {
                        return (by_name, by_name);
                    };
                    let exact = children
                        .iter()
                        .copied()
                        .find(|child| builder.pa(*child).resolved_assoc() == Some(*assoc));
                    (by_name, exact)
                };

                let (mut by_name, exact) = find_nested(self, base_pa);
                if let Some(exact) = exact {
                    return Some(exact);
                }

                for member in self.equivalence_members(base_pa) {
                    if member == base_pa {
                        continue;
                    }
                    let (member_by_name, exact) = find_nested(self, member);
                    if by_name.is_none() {
                        by_name = member_by_name;
                    }
                    if let Some(exact) = exact {
                        return Some(exact);
                    }
                }

                by_name
            }
            _ => None,
        }
    }

    /// A derived source is self-derived when its walk passes back through
    /// the archetype it constrains. Also reports derivation through a
    /// concrete binding.
    pub(crate) fn is_self_derived_source(&mut self, id: SourceId, pa: PaId) -> (bool, bool) {
        if !self.sources.is_derived(id) {
            return (false, false);
        }

        let mut derived_via_concrete = false;
        let result = self.visit_archetypes_along_path(id, &mut |builder, current, source| {
            match builder.sources.node(source).kind {
                SourceKind::Explicit { .. }
                | SourceKind::Inferred { .. }
                | SourceKind::RequirementSignatureSelf { .. } => {
                    let mut parent = builder.pa(current).parent;
                    while let Some(ancestor) = parent {
                        if builder.in_same_equivalence_class(ancestor, pa) {
                            return true;
                        }
                        parent = builder.pa(ancestor).parent;
                    }
                    false
                }

                SourceKind::Parent { .. } => builder.in_same_equivalence_class(current, pa),

                SourceKind::ProtocolRequirement { .. } => {
                    if builder.is_concrete(current) {
                        derived_via_concrete = true;
                    }
                    false
                }

                SourceKind::NestedTypeNameMatch
                | SourceKind::Concrete { .. }
                | SourceKind::Superclass { .. } => false,
            }
        });

        (result.is_none(), derived_via_concrete)
    }

    /// A conformance constraint is self-derived when its derivation chain
    /// revisits the same (representative, protocol) pair.
    pub(crate) fn is_self_derived_conformance(
        &mut self,
        id: SourceId,
        pa: PaId,
        protocol: ProtocolId,
    ) -> (bool, bool) {
        let mut seen: HashSet<(PaId, ProtocolId)> = HashSet::new();
        let rep = self.representative(pa);
        seen.insert((rep, protocol));

        let mut derived_via_concrete = false;
        let mut saw_protocol_requirement = false;
        let mut root_pa = None;

        let result = self.visit_archetypes_along_path(id, &mut |builder, current, source| {
            match builder.sources.node(source).kind {
                SourceKind::ProtocolRequirement { protocol, .. } => {
                    saw_protocol_requirement = true;
                    if builder.is_concrete(current) {
                        derived_via_concrete = true;
                    }
                    let rep = builder.representative(current);
                    !seen.insert((rep, protocol))
                }

                SourceKind::Concrete { .. }
                | SourceKind::Superclass { .. }
                | SourceKind::Parent { .. } => false,

                SourceKind::Explicit { .. }
                | SourceKind::Inferred { .. }
                | SourceKind::NestedTypeNameMatch
                | SourceKind::RequirementSignatureSelf { .. } => {
                    root_pa = Some(current);
                    false
                }
            }
        });

        if result.is_none() {
            return (true, derived_via_concrete);
        }
        if !saw_protocol_requirement {
            return (false, derived_via_concrete);
        }

        // A nested root implies conformance constraints for each resolved
        // associated type on the way up; those count as seen as well.
        if let Some(root) = root_pa {
            let mut current = root;
            while let Some(parent) = self.pa(current).parent {
                if let Some(assoc) = self.pa(current).resolved_assoc() {
                    let protocol = self.decls.assoc_type(assoc).protocol;
                    let rep = self.representative(parent);
                    if !seen.insert((rep, protocol)) {
                        return (true, derived_via_concrete);
                    }
                }
                current = parent;
            }
        }

        (false, derived_via_concrete)
    }
}
