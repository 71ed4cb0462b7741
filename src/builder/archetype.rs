//! Potential archetypes and equivalence classes.
//!
//! Potential archetypes form a rooted forest: roots stand for generic
//! parameters, nested nodes for member types discovered under them. A
//! union-find structure over the arena groups archetypes known to denote
//! the same type; each group's representative owns the equivalence class
//! that records every fact learned about the group.

use indexmap::IndexMap;

use crate::builder::source::SourceId;
use crate::builder::GenericSignatureBuilder;
use crate::types::{
    AliasId, AssocTypeId, GenericParamKey, LayoutConstraint, ProtocolId, RenderCtx, Type,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PaId(pub u32);

impl PaId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(pub u32);

impl ClassId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaResolution {
    /// Root archetype bound to a generic parameter.
    GenericParam(GenericParamKey),
    /// Nested archetype whose name has not matched a declaration yet.
    Unresolved,
    /// Nested archetype resolved to an associated type.
    AssocType(AssocTypeId),
    /// Nested archetype resolved to a protocol type alias.
    Alias(AliasId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepLink {
    /// This archetype represents its class; no class allocated yet.
    SelfRep,
    /// Union-find parent link, compressed on lookup.
    Forward(PaId),
    /// This archetype represents its class and owns it.
    Class(ClassId),
}

#[derive(Debug)]
pub struct PotentialArchetype {
    pub parent: Option<PaId>,
    /// Nested name, or the parameter name for roots.
    pub name: String,
    pub resolution: PaResolution,
    rep_link: RepLink,
    /// Nested children by name. Multiple same-named children may coexist
    /// until they are equated.
    pub nested: IndexMap<String, Vec<PaId>>,
    pub recursive_concrete: bool,
    pub recursive_superclass: bool,
    /// Conformance expansion already hit direct recursion through this
    /// archetype.
    pub recursive_conformance: bool,
    pub invalid: bool,
    /// The name this archetype had before typo correction renamed it.
    pub original_name: Option<String>,
    pub rename_diagnosed: bool,
}

impl PotentialArchetype {
    fn new(parent: Option<PaId>, name: String, resolution: PaResolution) -> Self {
        Self {
            parent,
            name,
            resolution,
            rep_link: RepLink::SelfRep,
            nested: IndexMap::new(),
            recursive_concrete: false,
            recursive_superclass: false,
            recursive_conformance: false,
            invalid: false,
            original_name: None,
            rename_diagnosed: false,
        }
    }

    pub fn is_generic_param(&self) -> bool {
        self.parent.is_none()
    }

    pub fn generic_param_key(&self) -> Option<GenericParamKey> {
        match self.resolution {
            PaResolution::GenericParam(key) => Some(key),
            _ => None,
        }
    }

    pub fn resolved_assoc(&self) -> Option<AssocTypeId> {
        match self.resolution {
            PaResolution::AssocType(id) => Some(id),
            _ => None,
        }
    }

    pub fn resolved_alias(&self) -> Option<AliasId> {
        match self.resolution {
            PaResolution::Alias(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_unresolved_nested(&self) -> bool {
        matches!(self.resolution, PaResolution::Unresolved)
    }

    pub fn was_renamed(&self) -> bool {
        self.original_name.is_some()
    }
}

/// A recorded fact: a value constrained onto a subject archetype, with the
/// source explaining why.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint<T> {
    pub subject: PaId,
    pub value: T,
    pub source: SourceId,
}

/// One connected component of a class's derived same-type subgraph.
#[derive(Debug, Clone)]
pub struct DerivedSameTypeComponent {
    pub anchor: PaId,
    pub concrete_source: Option<SourceId>,
}

#[derive(Debug, Default)]
pub struct EquivalenceClass {
    pub members: Vec<PaId>,
    pub conforms_to: IndexMap<ProtocolId, Vec<Constraint<ProtocolId>>>,
    /// Same-type edges keyed by their left-hand archetype; each stated
    /// edge is recorded in both directions.
    pub same_type: IndexMap<PaId, Vec<Constraint<PaId>>>,
    pub concrete_constraints: Vec<Constraint<Type>>,
    pub concrete_type: Option<Type>,
    pub superclass_constraints: Vec<Constraint<Type>>,
    pub superclass: Option<Type>,
    pub layout_constraints: Vec<Constraint<LayoutConstraint>>,
    pub layout: Option<LayoutConstraint>,
    /// Computed during finalization.
    pub components: Vec<DerivedSameTypeComponent>,
}

impl EquivalenceClass {
    fn new(representative: PaId) -> Self {
        Self {
            members: vec![representative],
            ..Self::default()
        }
    }
}

impl GenericSignatureBuilder<'_> {
    pub(crate) fn pa(&self, id: PaId) -> &PotentialArchetype {
        &self.pas[id.index()]
    }

    pub(crate) fn pa_mut(&mut self, id: PaId) -> &mut PotentialArchetype {
        &mut self.pas[id.index()]
    }

    pub(crate) fn new_param_archetype(&mut self, key: GenericParamKey, name: String) -> PaId {
        let id = PaId(self.pas.len() as u32);
        self.pas
            .push(PotentialArchetype::new(None, name, PaResolution::GenericParam(key)));
        id
    }

    pub(crate) fn new_nested_archetype(
        &mut self,
        parent: PaId,
        name: String,
        resolution: PaResolution,
    ) -> PaId {
        let id = PaId(self.pas.len() as u32);
        if matches!(resolution, PaResolution::Unresolved) {
            self.unresolved_nested += 1;
        }
        self.pas
            .push(PotentialArchetype::new(Some(parent), name.clone(), resolution));
        self.pa_mut(parent).nested.entry(name).or_default().push(id);
        id
    }

    /// Union-find lookup without path rewriting, for read-only contexts.
    pub(crate) fn find(&self, pa: PaId) -> PaId {
        let mut current = pa;
        while let RepLink::Forward(next) = self.pa(current).rep_link {
            current = next;
        }
        current
    }

    /// Union-find lookup with full path compression.
    pub(crate) fn representative(&mut self, pa: PaId) -> PaId {
        let root = self.find(pa);
        let mut current = pa;
        while let RepLink::Forward(next) = self.pa(current).rep_link {
            self.pa_mut(current).rep_link = RepLink::Forward(root);
            current = next;
        }
        root
    }

    /// Redirects a representative into another class after a merge.
    pub(crate) fn set_forward(&mut self, from: PaId, to: PaId) {
        self.pa_mut(from).rep_link = RepLink::Forward(to);
    }

    /// Takes the class owned by a representative, leaving it class-less.
    pub(crate) fn take_class(&mut self, rep: PaId) -> Option<EquivalenceClass> {
        match self.pa(rep).rep_link {
            RepLink::Class(cid) => {
                self.pa_mut(rep).rep_link = RepLink::SelfRep;
                self.classes[cid.index()].take()
            }
            _ => None,
        }
    }

    /// The class of this archetype's representative, created on demand.
    pub(crate) fn ensure_class(&mut self, pa: PaId) -> ClassId {
        let rep = self.representative(pa);
        match self.pa(rep).rep_link {
            RepLink::Class(cid) => cid,
            RepLink::SelfRep => {
                let cid = ClassId(self.classes.len() as u32);
                self.classes.push(Some(EquivalenceClass::new(rep)));
                self.pa_mut(rep).rep_link = RepLink::Class(cid);
                cid
            }
            RepLink::Forward(_) => unreachable!("representative cannot forward"),
        }
    }

    pub(crate) fn class(&self, cid: ClassId) -> &EquivalenceClass {
        self.classes[cid.index()]
            .as_ref()
            .expect("equivalence class is live")
    }

    pub(crate) fn class_mut(&mut self, cid: ClassId) -> &mut EquivalenceClass {
        self.classes[cid.index()]
            .as_mut()
            .expect("equivalence class is live")
    }

    pub(crate) fn class_of(&self, pa: PaId) -> Option<&EquivalenceClass> {
        let rep = self.find(pa);
        match self.pa(rep).rep_link {
            RepLink::Class(cid) => self.classes[cid.index()].as_ref(),
            _ => None,
        }
    }

    pub(crate) fn equivalence_members(&self, pa: PaId) -> Vec<PaId> {
        let rep = self.find(pa);
        match self.class_of(rep) {
            Some(class) => class.members.clone(),
            None => vec![rep],
        }
    }

    pub(crate) fn in_same_equivalence_class(&self, a: PaId, b: PaId) -> bool {
        self.find(a) == self.find(b)
    }

    pub(crate) fn is_concrete(&self, pa: PaId) -> bool {
        self.class_of(pa)
            .map(|class| class.concrete_type.is_some())
            .unwrap_or(false)
    }

    pub(crate) fn concrete_type(&self, pa: PaId) -> Option<Type> {
        self.class_of(pa).and_then(|class| class.concrete_type.clone())
    }

    pub(crate) fn pa_superclass(&self, pa: PaId) -> Option<Type> {
        self.class_of(pa).and_then(|class| class.superclass.clone())
    }

    pub(crate) fn conforms_to(&self, pa: PaId) -> Vec<ProtocolId> {
        self.class_of(pa)
            .map(|class| class.conforms_to.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Records a conformance constraint. Returns whether the protocol was
    /// new to the class; the constraint is recorded either way.
    pub(crate) fn record_conformance_constraint(
        &mut self,
        pa: PaId,
        protocol: ProtocolId,
        source: SourceId,
    ) -> bool {
        let cid = self.ensure_class(pa);
        let class = self.class_mut(cid);
        let newly_added = !class.conforms_to.contains_key(&protocol);
        class.conforms_to.entry(protocol).or_default().push(Constraint {
            subject: pa,
            value: protocol,
            source,
        });
        newly_added
    }

    /// Records a same-type edge in both directions.
    pub(crate) fn record_same_type_edge(&mut self, a: PaId, b: PaId, source: SourceId) {
        let cid = self.ensure_class(a);
        self.class_mut(cid)
            .same_type
            .entry(a)
            .or_default()
            .push(Constraint {
                subject: a,
                value: b,
                source,
            });

        if a != b {
            let cid = self.ensure_class(b);
            self.class_mut(cid)
                .same_type
                .entry(b)
                .or_default()
                .push(Constraint {
                    subject: b,
                    value: a,
                    source,
                });
        }
    }

    /// Canonical total order on potential archetypes. Defines class
    /// representatives and archetype anchors.
    pub(crate) fn compare_dependent_types(&self, a: PaId, b: PaId) -> std::cmp::Ordering {
        use std::cmp::Ordering;

        if a == b {
            return Ordering::Equal;
        }

        let pa = self.pa(a);
        let pb = self.pa(b);

        // Type aliases sort after everything else so they never become
        // representatives when equated with an associated type.
        if pa.parent.is_some()
            && pb.parent.is_some()
            && pa.resolved_alias().is_some() != pb.resolved_alias().is_some()
        {
            return if pa.resolved_alias().is_some() {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        // Concrete-bound archetypes follow ones that are still parameters.
        let a_concrete = self.is_concrete(a);
        let b_concrete = self.is_concrete(b);
        if a_concrete != b_concrete {
            return if a_concrete { Ordering::Greater } else { Ordering::Less };
        }

        match (pa.generic_param_key(), pb.generic_param_key()) {
            (Some(ka), Some(kb)) => return ka.cmp(&kb),
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => {}
        }

        let parent_a = pa.parent.expect("nested archetype has a parent");
        let parent_b = pb.parent.expect("nested archetype has a parent");
        let by_parent = self.compare_dependent_types(parent_a, parent_b);
        if by_parent != Ordering::Equal {
            return by_parent;
        }

        let by_name = pa.name.cmp(&pb.name);
        if by_name != Ordering::Equal {
            return by_name;
        }

        match (pa.resolved_assoc(), pb.resolved_assoc()) {
            (Some(aa), Some(ab)) => {
                let order = self.decls.compare_assoc_types(aa, ab);
                if order != Ordering::Equal {
                    return order;
                }
            }
            // A resolved archetype orders before an unresolved one.
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => {}
        }

        if let (Some(la), Some(lb)) = (pa.resolved_alias(), pb.resolved_alias()) {
            let order = self.decls.compare_aliases(la, lb);
            if order != Ordering::Equal {
                return order;
            }
        }

        if pa.was_renamed() || pb.was_renamed() {
            if pa.was_renamed() != pb.was_renamed() {
                return if pa.was_renamed() { Ordering::Greater } else { Ordering::Less };
            }
            let by_original = pa.original_name.cmp(&pb.original_name);
            if by_original != Ordering::Equal {
                return by_original;
            }
        }

        unreachable!("potential archetype order is not total")
    }

    /// The canonically least archetype in this archetype's class.
    pub(crate) fn archetype_anchor(&mut self, pa: PaId) -> PaId {
        let rep = self.representative(pa);
        let mut anchor = match self.pa(pa).parent {
            Some(parent) => {
                let parent_anchor = self.archetype_anchor(parent);
                let name = self.pa(pa).name.clone();
                self.nested_archetype_anchor(
                    parent_anchor,
                    &name,
                    crate::builder::nested::NestedTypeUpdate::ResolveExisting,
                )
                .unwrap_or(rep)
            }
            None => rep,
        };

        for member in self.equivalence_members(rep) {
            if self.compare_dependent_types(member, anchor) == std::cmp::Ordering::Less {
                anchor = member;
            }
        }

        anchor
    }

    /// The dependent type naming this archetype, with associated-type
    /// resolutions preserved.
    pub(crate) fn dependent_type(&self, pa: PaId) -> Type {
        let node = self.pa(pa);
        match node.parent {
            None => Type::Param(
                node.generic_param_key()
                    .expect("root archetype is a generic parameter"),
            ),
            Some(parent) => {
                let base = self.dependent_type(parent);
                match node.resolved_assoc() {
                    Some(assoc) => Type::member_resolved(base, node.name.clone(), assoc),
                    None => Type::member(base, node.name.clone()),
                }
            }
        }
    }

    /// Like [`dependent_type`], but any step not resolved to an associated
    /// type degrades to an error type, matching the strict form used when
    /// collecting the final signature.
    pub(crate) fn dependent_type_strict(&self, pa: PaId) -> Type {
        let node = self.pa(pa);
        if node.invalid {
            return Type::Error;
        }
        match node.parent {
            None => Type::Param(
                node.generic_param_key()
                    .expect("root archetype is a generic parameter"),
            ),
            Some(parent) => {
                let base = self.dependent_type_strict(parent);
                if base.has_error() {
                    return base;
                }
                match node.resolved_assoc() {
                    Some(assoc) => Type::member_resolved(base, node.name.clone(), assoc),
                    None => Type::Error,
                }
            }
        }
    }

    pub(crate) fn render_ty(&self, ty: &Type) -> String {
        RenderCtx::new(self.decls, &self.param_names).ty(ty)
    }

    pub(crate) fn render_pa(&self, pa: PaId) -> String {
        let ty = self.dependent_type(pa);
        self.render_ty(&ty)
    }
}
