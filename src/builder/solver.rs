//! Requirement solving.
//!
//! Entry points resolve their subjects against the archetype forest, then
//! record constraints, merge equivalence classes, and fan out into derived
//! requirements. Subjects that cannot be resolved yet are parked on a
//! delayed queue and re-driven to a fixed point.

use crate::builder::archetype::{Constraint, PaId};
use crate::builder::errors::{ConstraintPosition, BDK};
use crate::builder::nested::NestedTypeUpdate;
use crate::builder::source::{FloatingSource, SourceId, SourceKind};
use crate::builder::GenericSignatureBuilder;
use crate::diag::Span;
use crate::types::{
    GenericParamKey, LayoutConstraint, NominalKind, ProtocolId, Requirement, Substitution, Type,
    TypeDeclRef,
};

/// Outcome of adding one requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintResult {
    /// The requirement was resolved and recorded.
    Resolved,
    /// The requirement referenced nested types that do not exist yet.
    Unresolved,
    /// The requirement was placed on a concrete type and rejected.
    Concrete,
    /// The requirement cannot hold together with recorded facts.
    Conflicting,
}

impl ConstraintResult {
    pub fn is_error(self) -> bool {
        matches!(self, ConstraintResult::Concrete | ConstraintResult::Conflicting)
    }
}

/// What to do with a requirement whose subject cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedHandling {
    /// Queue it for later; report `Resolved` so processing continues.
    GenerateConstraints,
    /// Report `Unresolved` to the caller. Used while draining the queue.
    ReturnUnresolved,
}

/// How eagerly type resolution may materialize archetypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    /// Only find archetypes that already exist.
    AlreadyKnown,
    /// Materialize as much as currently possible.
    AlwaysPartial,
    /// Materialize fully; used once the picture is complete.
    CompleteWellFormed,
}

/// A requirement operand: an archetype or a type yet to be resolved.
#[derive(Debug, Clone)]
pub enum UnresolvedType {
    Pa(PaId),
    Ty(Type),
}

impl From<Type> for UnresolvedType {
    fn from(ty: Type) -> Self {
        UnresolvedType::Ty(ty)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Resolved {
    Pa(PaId),
    Concrete(Type),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DelayedKind {
    Conformance,
    Superclass,
    Layout,
    SameType,
}

#[derive(Debug, Clone)]
pub(crate) enum DelayedRhs {
    Pa(PaId),
    Ty(Type),
    Layout(LayoutConstraint),
}

impl From<UnresolvedType> for DelayedRhs {
    fn from(value: UnresolvedType) -> Self {
        match value {
            UnresolvedType::Pa(pa) => DelayedRhs::Pa(pa),
            UnresolvedType::Ty(ty) => DelayedRhs::Ty(ty),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct DelayedRequirement {
    pub kind: DelayedKind,
    pub lhs: UnresolvedType,
    pub rhs: DelayedRhs,
    pub source: FloatingSource,
}

/// How a concrete/concrete mismatch should be reported.
#[derive(Debug, Clone)]
pub(crate) enum MismatchDiag {
    /// Plain "types must be the same" at the requirement's location.
    Standard,
    /// Conflict attributed to a specific archetype's binding.
    Conflict { subject: PaId, source: SourceId },
}

impl GenericSignatureBuilder<'_> {
    /// Resolves a type-parameter type to its potential archetype.
    pub(crate) fn resolve_archetype(&mut self, ty: &Type, kind: ResolutionKind) -> Option<PaId> {
        match ty {
            Type::Param(key) => self.param_archetype(*key),

            Type::Member { base, name, assoc } => {
                let base_pa = self.resolve_archetype(base, kind)?;

                let update = match kind {
                    ResolutionKind::AlreadyKnown => NestedTypeUpdate::ResolveExisting,
                    ResolutionKind::AlwaysPartial | ResolutionKind::CompleteWellFormed => {
                        NestedTypeUpdate::AddIfMissing
                    }
                };

                if let Some(assoc) = assoc {
                    return self.update_nested_for_conformance(
                        base_pa,
                        crate::builder::nested::MemberDecl::Assoc(*assoc),
                        update,
                    );
                }

                match kind {
                    ResolutionKind::AlreadyKnown => self
                        .pa(base_pa)
                        .nested
                        .get(name)
                        .and_then(|children| children.first().copied()),
                    ResolutionKind::AlwaysPartial | ResolutionKind::CompleteWellFormed => {
                        self.nested_archetype_anchor(base_pa, name, update)
                    }
                }
            }

            _ => None,
        }
    }

    pub(crate) fn param_archetype(&self, key: GenericParamKey) -> Option<PaId> {
        self.params
            .iter()
            .position(|&param| param == key)
            .map(|index| self.param_pas[index])
    }

    /// Resolves an operand to an archetype or a concrete type. `None` means
    /// resolution must wait for more facts.
    pub(crate) fn resolve(
        &mut self,
        operand: UnresolvedType,
        source: &FloatingSource,
    ) -> Option<Resolved> {
        match operand {
            UnresolvedType::Pa(pa) => Some(Resolved::Pa(pa)),
            UnresolvedType::Ty(ty) => {
                if !ty.is_type_parameter() {
                    return Some(Resolved::Concrete(ty));
                }

                // Cut expansion of requirements that would rediscover
                // themselves forever.
                let kind = if !self.floating_is_explicit(source) && self.floating_is_recursive(source)
                {
                    ResolutionKind::AlreadyKnown
                } else {
                    ResolutionKind::AlwaysPartial
                };

                self.resolve_archetype(&ty, kind).map(Resolved::Pa)
            }
        }
    }

    pub(crate) fn handle_unresolved(
        &mut self,
        kind: DelayedKind,
        lhs: UnresolvedType,
        rhs: DelayedRhs,
        source: FloatingSource,
        handling: UnresolvedHandling,
    ) -> ConstraintResult {
        match handling {
            UnresolvedHandling::GenerateConstraints => {
                self.delayed.push(DelayedRequirement {
                    kind,
                    lhs,
                    rhs,
                    source,
                });
                ConstraintResult::Resolved
            }
            UnresolvedHandling::ReturnUnresolved => ConstraintResult::Unresolved,
        }
    }

    /// Records a conformance on this archetype's class. On first recording,
    /// resolves the conformance against any superclass bound and re-checks
    /// this archetype's nested names against the protocol. Returns whether
    /// the protocol was new.
    pub(crate) fn pa_add_conformance(
        &mut self,
        pa: PaId,
        protocol: ProtocolId,
        source: SourceId,
    ) -> bool {
        if !self.record_conformance_constraint(pa, protocol, source) {
            return false;
        }

        let _ = self.resolve_super_conformance(pa, protocol);

        let names: Vec<String> = self.pa(pa).nested.keys().cloned().collect();
        for name in names {
            let _ = self.update_nested_by_name_in_protocol(
                pa,
                &name,
                protocol,
                NestedTypeUpdate::ResolveExisting,
            );
        }

        true
    }

    /// When the class's superclass bound conforms to `protocol`, record a
    /// superclass-sourced conformance and return its source.
    pub(crate) fn resolve_super_conformance(
        &mut self,
        pa: PaId,
        protocol: ProtocolId,
    ) -> Option<SourceId> {
        let superclass = self.pa_superclass(pa)?;
        let dep_ty = self.dependent_type(pa);
        let conformance = self.lookup.lookup(&dep_ty, &superclass, protocol)?;

        let cid = self.ensure_class(pa);
        let class = self.class(cid);
        let base = class
            .superclass_constraints
            .iter()
            .find(|constraint| {
                self.sources.loc(constraint.source).is_some() && constraint.subject == pa
            })
            .or_else(|| {
                class
                    .superclass_constraints
                    .iter()
                    .find(|constraint| self.sources.loc(constraint.source).is_some())
            })
            .or_else(|| class.superclass_constraints.first())?
            .source;

        let super_source = self.sources.via_superclass(base, Some(conformance));
        self.class_mut(cid)
            .conforms_to
            .entry(protocol)
            .or_default()
            .push(Constraint {
                subject: pa,
                value: protocol,
                source: super_source,
            });
        Some(super_source)
    }

    /// Adds a conformance requirement and expands the protocol's own
    /// requirements onto the subject.
    pub(crate) fn add_conformance_requirement(
        &mut self,
        pa: PaId,
        protocol: ProtocolId,
        source: SourceId,
    ) -> ConstraintResult {
        if !self.pa_add_conformance(pa, protocol, source) {
            return ConstraintResult::Resolved;
        }

        let subject_ty = self.dependent_type(pa);
        let proto_subst = Substitution::protocol_self(subject_ty.clone());

        // A finished requirement signature is authoritative and avoids
        // rewalking the declaration; recursion through it is cut because
        // computing a signature never consults itself.
        if let Some(signature) = self.decls.protocol(protocol).requirement_signature.clone() {
            let inner = FloatingSource::via_protocol_requirement(source, protocol, false, None);
            for requirement in &signature.requirements {
                let result = self.add_requirement(requirement, inner.clone(), None, Some(&proto_subst));
                if result.is_error() {
                    return result;
                }
            }
            return ConstraintResult::Resolved;
        }

        self.resolver.resolve_inherited_protocols(protocol);
        let module = self.decls.protocol(protocol).module.clone();

        let inherited_result = self.add_inherited_requirements(
            TypeDeclRef::Protocol(protocol),
            UnresolvedType::Pa(pa),
            Some(source),
            Some(module.clone()),
        );
        if inherited_result.is_error() {
            return inherited_result;
        }

        for requirement in self.decls.protocol(protocol).where_requirements.clone() {
            let inner = FloatingSource::via_protocol_requirement(source, protocol, false, None);
            self.add_requirement(&requirement, inner, None, Some(&proto_subst));
        }

        // Same-named type declarations in inherited protocols, for
        // redeclaration warnings.
        let mut inherited_assoc_names: Vec<(String, ProtocolId)> = Vec::new();
        for inherited in self.decls.inherited_protocol_closure(protocol) {
            for assoc in &self.decls.protocol(inherited).assoc_types {
                inherited_assoc_names
                    .push((self.decls.assoc_type(*assoc).name.clone(), inherited));
            }
        }

        let is_requirement_signature_root = matches!(
            self.sources.node(source).kind,
            SourceKind::RequirementSignatureSelf { .. }
        );

        for assoc in self.decls.protocol(protocol).assoc_types.clone() {
            let decl = self.decls.assoc_type(assoc);
            let name = decl.name.clone();
            let has_default = decl.has_default;
            let assoc_subject = Type::member_resolved(subject_ty.clone(), name.clone(), assoc);

            let assoc_result = self.add_inherited_requirements(
                TypeDeclRef::AssocType(assoc),
                UnresolvedType::Ty(assoc_subject),
                Some(source),
                Some(module.clone()),
            );
            if assoc_result.is_error() {
                return assoc_result;
            }

            for requirement in self.decls.assoc_type(assoc).where_requirements.clone() {
                let inner = FloatingSource::via_protocol_requirement(source, protocol, false, None);
                self.add_requirement(&requirement, inner, None, Some(&proto_subst));
            }

            let mut should_warn = is_requirement_signature_root && !has_default;
            for (inherited_name, inherited_proto) in &inherited_assoc_names {
                if *inherited_name == name && should_warn {
                    let inherited = self.decls.protocol(*inherited_proto).name.clone();
                    self.diags.push(
                        BDK::InheritedAssociatedTypeRedecl { name: name.clone(), inherited }
                            .at(Span::default()),
                    );
                    should_warn = false;
                }
            }
        }

        for alias in self.decls.protocol(protocol).aliases.clone() {
            let name = self.decls.alias(alias).name.clone();
            let mut should_warn = is_requirement_signature_root;
            for (inherited_name, inherited_proto) in &inherited_assoc_names {
                if *inherited_name == name && should_warn {
                    let inherited = self.decls.protocol(*inherited_proto).name.clone();
                    self.diags.push(
                        BDK::TypealiasOverrideAssociatedType { name: name.clone(), inherited }
                            .at(Span::default()),
                    );
                    should_warn = false;
                }
            }
        }

        ConstraintResult::Resolved
    }

    /// Adds the requirements from a declaration's inheritance clause onto
    /// `subject`, decomposing compositions.
    pub(crate) fn add_inherited_requirements(
        &mut self,
        decl: TypeDeclRef,
        subject: UnresolvedType,
        parent_source: Option<SourceId>,
        infer_module: Option<String>,
    ) -> ConstraintResult {
        if let TypeDeclRef::AssocType(assoc) = decl {
            if self.invalid_assoc_types.contains(&assoc) {
                return ConstraintResult::Resolved;
            }
        }

        self.resolver.resolve_inheritance_clause(decl);

        let (inherited, owning_protocol) = match decl {
            TypeDeclRef::Protocol(protocol) => {
                (self.decls.protocol(protocol).inherited.clone(), protocol)
            }
            TypeDeclRef::AssocType(assoc) => {
                let d = self.decls.assoc_type(assoc);
                (d.inherited.clone(), d.protocol)
            }
            TypeDeclRef::Alias(_) => return ConstraintResult::Resolved,
        };

        let floating = |inferred: bool| match parent_source {
            Some(parent) => {
                FloatingSource::via_protocol_requirement(parent, owning_protocol, inferred, None)
            }
            None if inferred => FloatingSource::for_inferred(None),
            None => FloatingSource::for_abstract(),
        };

        let mut result = ConstraintResult::Resolved;
        let mut work: Vec<Type> = inherited;
        while let Some(inherited_ty) = work.pop() {
            if let Type::Composition(members) = inherited_ty {
                work.extend(members);
                continue;
            }

            if infer_module.is_some() {
                let source = floating(true);
                self.infer_requirements_from(&inherited_ty, &source);
            }

            // An associated type whose bound names its own protocol (or a
            // descendant) would expand forever; flag it instead.
            if let TypeDeclRef::AssocType(_) = decl {
                if let Type::Protocol(inherited_proto) = inherited_ty {
                    if inherited_proto == owning_protocol
                        || self
                            .decls
                            .protocol_inherits_from(inherited_proto, owning_protocol)
                    {
                        let source = floating(false);
                        if let Some(Resolved::Pa(pa)) = self.resolve(subject.clone(), &source) {
                            let src = self.materialize_source(&source, pa);
                            self.mark_archetype_recursive(pa, owning_protocol, src);
                            if !result.is_error() {
                                result = ConstraintResult::Conflicting;
                            }
                        }
                        continue;
                    }
                }
            }

            let recursive_result = self.add_type_requirement(
                subject.clone(),
                UnresolvedType::Ty(inherited_ty),
                floating(false),
                UnresolvedHandling::GenerateConstraints,
            );
            if recursive_result.is_error() && !result.is_error() {
                result = recursive_result;
            }
        }

        result
    }

    /// Marks an archetype's conformance expansion as directly recursive,
    /// diagnosing the first occurrence.
    pub(crate) fn mark_archetype_recursive(
        &mut self,
        pa: PaId,
        protocol: ProtocolId,
        source: SourceId,
    ) {
        if self.pa(pa).recursive_conformance {
            return;
        }
        self.pa_mut(pa).recursive_conformance = true;

        self.pa_add_conformance(pa, protocol, source);
        if self.pa(pa).parent.is_none() {
            return;
        }

        let Some(assoc) = self.pa(pa).resolved_assoc() else {
            return;
        };
        if self.invalid_assoc_types.contains(&assoc) {
            return;
        }

        let name = self.decls.assoc_type(assoc).name.clone();
        self.diags
            .push(BDK::RecursiveRequirementReference { name }.at(Span::default()));

        // Silence downstream errors referencing this associated type.
        self.invalid_assoc_types.insert(assoc);
    }

    pub(crate) fn add_layout_requirement_direct(
        &mut self,
        pa: PaId,
        layout: LayoutConstraint,
        source: SourceId,
    ) -> ConstraintResult {
        let cid = self.ensure_class(pa);
        let class = self.class_mut(cid);
        class.layout_constraints.push(Constraint {
            subject: pa,
            value: layout,
            source,
        });

        match class.layout {
            None => class.layout = Some(layout),
            Some(existing) => {
                let merged = existing.merge(layout);
                if merged.is_known() && merged != existing {
                    class.layout = Some(merged);
                }
            }
        }

        ConstraintResult::Resolved
    }

    pub(crate) fn add_layout_requirement_in(
        &mut self,
        subject: UnresolvedType,
        layout: LayoutConstraint,
        source: FloatingSource,
        handling: UnresolvedHandling,
    ) -> ConstraintResult {
        let Some(resolved) = self.resolve(subject.clone(), &source) else {
            return self.handle_unresolved(
                DelayedKind::Layout,
                subject,
                DelayedRhs::Layout(layout),
                source,
                handling,
            );
        };

        match resolved {
            Resolved::Concrete(ty) => {
                if self.floating_is_explicit(&source) {
                    if let Some(loc) = source.loc(&self.sources) {
                        let rendered = self.render_ty(&ty);
                        self.diags.push(
                            BDK::RequiresNotSuitableArchetype {
                                position: ConstraintPosition::Subject,
                                ty: rendered,
                            }
                            .at(loc),
                        );
                        return ConstraintResult::Concrete;
                    }
                }
                ConstraintResult::Resolved
            }
            Resolved::Pa(pa) => {
                let src = self.materialize_source(&source, pa);
                self.add_layout_requirement_direct(pa, layout, src)
            }
        }
    }

    /// Updates the class superclass bound, tightening it when the new bound
    /// is an exact subclass of the old one.
    pub(crate) fn update_superclass(&mut self, pa: PaId, superclass: Type, source: SourceId) {
        let cid = self.ensure_class(pa);

        if self.class(cid).superclass.is_none() {
            self.class_mut(cid).superclass = Some(superclass.clone());
            self.update_superclass_conformances(pa);

            // A superclass bound implies a class layout.
            let layout = match &superclass {
                Type::Nominal { decl, .. } => match self.decls.nominal(*decl).kind {
                    NominalKind::Class { foreign: true, .. } => LayoutConstraint::Class,
                    _ => LayoutConstraint::NativeClass,
                },
                _ => LayoutConstraint::NativeClass,
            };
            let layout_source = self.sources.via_superclass(source, None);
            self.add_layout_requirement_direct(pa, layout, layout_source);
            return;
        }

        let existing = self.class(cid).superclass.clone().expect("checked above");
        if self.decls.is_exact_superclass_of(&existing, &superclass) {
            self.class_mut(cid).superclass = Some(superclass);
            // The bound tightened; a newly available superclass witness may
            // resolve more conformances.
            self.update_superclass_conformances(pa);
        }

        // An unrelated bound is left alone here; finalization diagnoses the
        // conflict.
    }

    fn update_superclass_conformances(&mut self, pa: PaId) {
        for protocol in self.conforms_to(pa) {
            let Some(super_source) = self.resolve_super_conformance(pa, protocol) else {
                continue;
            };
            for assoc in self.decls.protocol(protocol).assoc_types.clone() {
                let name = self.decls.assoc_type(assoc).name.clone();
                let Some(children) = self.pa(pa).nested.get(&name).cloned() else {
                    continue;
                };
                for nested in children {
                    if self.pa(nested).resolved_assoc() == Some(assoc) {
                        self.add_nested_same_type_via_superclass(nested, super_source);
                    }
                }
            }
        }
    }

    pub(crate) fn add_superclass_requirement_direct(
        &mut self,
        pa: PaId,
        superclass: Type,
        source: SourceId,
    ) -> ConstraintResult {
        let cid = self.ensure_class(pa);
        self.class_mut(cid).superclass_constraints.push(Constraint {
            subject: pa,
            value: superclass.clone(),
            source,
        });

        self.update_superclass(pa, superclass, source);
        ConstraintResult::Resolved
    }

    /// Adds a conformance or superclass requirement, depending on what the
    /// constraint type resolves to.
    pub(crate) fn add_type_requirement(
        &mut self,
        subject: UnresolvedType,
        constraint: UnresolvedType,
        source: FloatingSource,
        handling: UnresolvedHandling,
    ) -> ConstraintResult {
        let Some(resolved_constraint) = self.resolve(constraint.clone(), &source) else {
            return self.handle_unresolved(
                DelayedKind::Conformance,
                subject,
                constraint.into(),
                source,
                handling,
            );
        };

        let constraint_ty = match resolved_constraint {
            Resolved::Pa(constraint_pa) => {
                // The right-hand side of a conformance must be statically
                // known, not another type parameter.
                if let Some(loc) = source.loc(&self.sources) {
                    let rendered = self.render_pa(constraint_pa);
                    self.diags.push(
                        BDK::RequiresNotSuitableArchetype {
                            position: ConstraintPosition::Constraint,
                            ty: rendered,
                        }
                        .at(loc),
                    );
                }
                return ConstraintResult::Concrete;
            }
            Resolved::Concrete(ty) => ty,
        };

        let is_class_constraint = matches!(
            &constraint_ty,
            Type::Nominal { decl, .. } if self.decls.nominal(*decl).is_class()
        );
        let is_existential = matches!(&constraint_ty, Type::Protocol(_) | Type::Composition(_));

        if !is_existential && !is_class_constraint {
            if !constraint_ty.has_error() {
                if let Some(loc) = source.loc(&self.sources) {
                    let subject_str = match &subject {
                        UnresolvedType::Pa(pa) => self.render_pa(*pa),
                        UnresolvedType::Ty(ty) => self.render_ty(ty),
                    };
                    let constraint_str = self.render_ty(&constraint_ty);
                    self.diags.push(
                        BDK::RequiresConformanceNonprotocol {
                            subject: subject_str,
                            constraint: constraint_str,
                        }
                        .at(loc),
                    );
                }
            }
            return ConstraintResult::Conflicting;
        }

        let Some(resolved_subject) = self.resolve(subject.clone(), &source) else {
            let kind = if is_existential {
                DelayedKind::Conformance
            } else {
                DelayedKind::Superclass
            };
            return self.handle_unresolved(
                kind,
                subject,
                DelayedRhs::Ty(constraint_ty),
                source,
                handling,
            );
        };

        let subject_pa = match resolved_subject {
            Resolved::Concrete(ty) => {
                // Requirements stated directly on concrete types are
                // rejected; derived ones are vacuously satisfied.
                if self.floating_is_explicit(&source) {
                    if let Some(loc) = source.loc(&self.sources) {
                        let rendered = self.render_ty(&ty);
                        self.diags.push(
                            BDK::RequiresNotSuitableArchetype {
                                position: ConstraintPosition::Subject,
                                ty: rendered,
                            }
                            .at(loc),
                        );
                    }
                    return ConstraintResult::Concrete;
                }
                return ConstraintResult::Resolved;
            }
            Resolved::Pa(pa) => pa,
        };

        let src = self.materialize_source(&source, subject_pa);

        match constraint_ty {
            Type::Protocol(protocol) => {
                self.add_conformance_requirement(subject_pa, protocol, src)
            }

            Type::Composition(members) => {
                let mut any_errors = false;
                for member in members {
                    let result = match member {
                        Type::Protocol(protocol) => {
                            self.add_conformance_requirement(subject_pa, protocol, src)
                        }
                        ty => self.add_superclass_requirement_direct(subject_pa, ty, src),
                    };
                    if result.is_error() {
                        any_errors = true;
                    }
                }
                if any_errors {
                    ConstraintResult::Conflicting
                } else {
                    ConstraintResult::Resolved
                }
            }

            superclass => self.add_superclass_requirement_direct(subject_pa, superclass, src),
        }
    }

    /// Equates two archetypes, merging their equivalence classes.
    pub(crate) fn add_same_type_between_archetypes(
        &mut self,
        orig1: PaId,
        orig2: PaId,
        source: SourceId,
    ) -> ConstraintResult {
        self.record_same_type_edge(orig1, orig2, source);

        let mut t1 = self.representative(orig1);
        let mut t2 = self.representative(orig2);
        let mut orig2 = orig2;
        if t1 == t2 {
            return ConstraintResult::Resolved;
        }

        // The canonically lesser archetype becomes the surviving
        // representative.
        if self.compare_dependent_types(t2, t1) == std::cmp::Ordering::Less {
            std::mem::swap(&mut t1, &mut t2);
            orig2 = orig1;
        }

        let cid = self.ensure_class(t1);
        let members2 = self.equivalence_members(t2);
        let class2 = self.take_class(t2);
        self.set_forward(t2, t1);

        self.class_mut(cid).members.extend(members2.iter().copied());

        let Some(class2) = class2 else {
            // The losing side had no recorded facts beyond membership; only
            // same-named nesteds remain to reconcile.
            return self.merge_nested_types(t1, &members2, source);
        };

        // Same-type edge maps are keyed by archetype, so the two halves are
        // disjoint.
        for (key, constraints) in class2.same_type {
            let previous = self.class_mut(cid).same_type.insert(key, constraints);
            debug_assert!(previous.is_none(), "same-type maps overlap after merge");
        }

        if let Some(concrete2) = class2.concrete_type {
            if let Some(concrete1) = self.class(cid).concrete_type.clone() {
                self.add_same_type_requirement_diag(
                    UnresolvedType::Ty(concrete1),
                    UnresolvedType::Ty(concrete2),
                    FloatingSource::resolved(source),
                    UnresolvedHandling::GenerateConstraints,
                    MismatchDiag::Conflict {
                        subject: t1,
                        source,
                    },
                );
            } else {
                self.class_mut(cid).concrete_type = Some(concrete2);
            }
        }
        self.class_mut(cid)
            .concrete_constraints
            .extend(class2.concrete_constraints);

        if let Some(superclass2) = class2.superclass {
            let source2 = class2
                .superclass_constraints
                .iter()
                .find(|constraint| {
                    self.sources.loc(constraint.source).is_some() && constraint.subject == orig2
                })
                .or_else(|| {
                    class2
                        .superclass_constraints
                        .iter()
                        .find(|constraint| self.sources.loc(constraint.source).is_some())
                })
                .or_else(|| class2.superclass_constraints.first())
                .map(|constraint| constraint.source)
                .unwrap_or(source);

            self.update_superclass(t1, superclass2, source2);
            self.class_mut(cid)
                .superclass_constraints
                .extend(class2.superclass_constraints);
        }

        if let Some(layout2) = class2.layout {
            let class = self.class_mut(cid);
            match class.layout {
                None => class.layout = Some(layout2),
                Some(existing) => {
                    let merged = existing.merge(layout2);
                    if merged.is_known() && merged != existing {
                        class.layout = Some(merged);
                    }
                }
            }
        }
        self.class_mut(cid)
            .layout_constraints
            .extend(class2.layout_constraints);

        for (protocol, constraints) in class2.conforms_to {
            let first_source = constraints
                .first()
                .expect("conformance entry has a constraint")
                .source;
            self.pa_add_conformance(t1, protocol, first_source);
            self.class_mut(cid)
                .conforms_to
                .entry(protocol)
                .or_default()
                .extend(constraints.into_iter().skip(1));
        }

        self.merge_nested_types(t1, &members2, source)
    }

    /// Recursively equates same-named nested types of the absorbed members
    /// with the surviving representative's nesteds.
    fn merge_nested_types(
        &mut self,
        t1: PaId,
        members2: &[PaId],
        source: SourceId,
    ) -> ConstraintResult {
        let dependent_t1 = self.dependent_type(t1);
        for &member in members2 {
            let nested: Vec<(String, PaId)> = self
                .pa(member)
                .nested
                .iter()
                .filter_map(|(name, children)| {
                    children.first().map(|&first| (name.clone(), first))
                })
                .collect();

            for (name, first_child) in nested {
                let nested_t1 = Type::member(dependent_t1.clone(), name.clone());
                let result = self.add_same_type_requirement(
                    UnresolvedType::Ty(nested_t1),
                    UnresolvedType::Pa(first_child),
                    FloatingSource::for_nested_type_name_match(source, name),
                    UnresolvedHandling::GenerateConstraints,
                );
                if result.is_error() {
                    return ConstraintResult::Conflicting;
                }
            }
        }
        ConstraintResult::Resolved
    }

    /// Binds an archetype's class to a concrete type.
    pub(crate) fn add_same_type_to_concrete(
        &mut self,
        pa: PaId,
        concrete: Type,
        source: SourceId,
    ) -> ConstraintResult {
        let rep = self.representative(pa);
        let cid = self.ensure_class(rep);

        self.class_mut(cid).concrete_constraints.push(Constraint {
            subject: pa,
            value: concrete.clone(),
            source,
        });

        if let Some(existing) = self.class(cid).concrete_type.clone() {
            return self.add_same_type_requirement_diag(
                UnresolvedType::Ty(existing),
                UnresolvedType::Ty(concrete),
                FloatingSource::resolved(source),
                UnresolvedHandling::GenerateConstraints,
                MismatchDiag::Conflict { subject: pa, source },
            );
        }

        self.class_mut(cid).concrete_type = Some(concrete.clone());

        // The concrete type must satisfy every conformance the class
        // carries; record the concrete conformances that witness them.
        let dep_ty = self.dependent_type(rep);
        for protocol in self.conforms_to(rep) {
            match self.lookup.lookup(&dep_ty, &concrete, protocol) {
                None => {
                    if !concrete.has_error() {
                        if let Some(loc) = self.sources.loc(source) {
                            let concrete_str = self.render_ty(&concrete);
                            let protocol_str = self.decls.protocol(protocol).name.clone();
                            self.diags.push(
                                BDK::RequiresGenericParamSameTypeDoesNotConform {
                                    concrete: concrete_str,
                                    protocol: protocol_str,
                                }
                                .at(loc),
                            );
                        }
                    }
                    return ConstraintResult::Conflicting;
                }
                Some(conformance) => {
                    let concrete_source = self.sources.via_concrete(source, Some(conformance));
                    self.class_mut(cid)
                        .conforms_to
                        .entry(protocol)
                        .or_default()
                        .push(Constraint {
                            subject: pa,
                            value: protocol,
                            source: concrete_source,
                        });
                }
            }
        }

        // Bind existing nested types to their witnesses; newly discovered
        // ones are bound as they are created.
        for member in self.equivalence_members(rep) {
            let nested: Vec<PaId> = self
                .pa(member)
                .nested
                .values()
                .filter_map(|children| children.first().copied())
                .collect();
            for first_child in nested {
                self.concretize_nested_from_concrete_parent(member, source, first_child);
            }
        }

        ConstraintResult::Resolved
    }

    /// Structurally matches two concrete types, recursing into component
    /// type parameters through the normal same-type path.
    pub(crate) fn add_same_type_between_concrete(
        &mut self,
        t1: Type,
        t2: Type,
        source: FloatingSource,
        diag: MismatchDiag,
    ) -> ConstraintResult {
        if self.match_same_type(&t1, &t2, &t1, &t2, &source, &diag) {
            ConstraintResult::Resolved
        } else {
            ConstraintResult::Conflicting
        }
    }

    fn match_same_type(
        &mut self,
        outer1: &Type,
        outer2: &Type,
        t1: &Type,
        t2: &Type,
        source: &FloatingSource,
        diag: &MismatchDiag,
    ) -> bool {
        if t1 == t2 {
            return true;
        }

        match (t1, t2) {
            (
                Type::Nominal { decl: d1, args: a1 },
                Type::Nominal { decl: d2, args: a2 },
            ) if d1 == d2 && a1.len() == a2.len() => a1
                .iter()
                .zip(a2)
                .all(|(arg1, arg2)| self.match_same_type(outer1, outer2, arg1, arg2, source, diag)),

            (Type::Tuple(m1), Type::Tuple(m2)) if m1.len() == m2.len() => m1
                .iter()
                .zip(m2)
                .all(|(el1, el2)| self.match_same_type(outer1, outer2, el1, el2, source, diag)),

            _ => {
                // Mismatch at the outermost layer is a genuine conflict;
                // this is also what stops the mutual recursion with
                // add_same_type_requirement.
                if t1 == outer1 && t2 == outer2 {
                    self.emit_same_type_mismatch(diag, t1, t2, source);
                    return false;
                }

                let result = self.add_same_type_requirement_diag(
                    UnresolvedType::Ty(t1.clone()),
                    UnresolvedType::Ty(t2.clone()),
                    source.clone(),
                    UnresolvedHandling::GenerateConstraints,
                    diag.clone(),
                );
                !result.is_error()
            }
        }
    }

    pub(crate) fn emit_same_type_mismatch(
        &mut self,
        diag: &MismatchDiag,
        t1: &Type,
        t2: &Type,
        source: &FloatingSource,
    ) {
        let first = self.render_ty(t1);
        let second = self.render_ty(t2);
        match diag {
            MismatchDiag::Standard => {
                if let Some(loc) = source.loc(&self.sources) {
                    self.diags
                        .push(BDK::RequiresSameConcreteType { first, second }.at(loc));
                }
            }
            MismatchDiag::Conflict { subject, source } => {
                let pa = *subject;
                let alias = self.pa(pa).resolved_alias();
                if self.pa(pa).parent.is_some()
                    && alias.is_some()
                    && self.sources.loc(*source).is_none()
                {
                    let name = self
                        .decls
                        .alias(alias.expect("checked above"))
                        .name
                        .clone();
                    self.diags.push(
                        BDK::ProtocolTypealiasConflict { name, first, second }.at(Span::default()),
                    );
                } else if let Some(loc) = self.sources.loc(*source) {
                    let subject_str = self.render_pa(pa);
                    self.diags.push(
                        BDK::RequiresSameTypeConflict {
                            subject: subject_str,
                            first,
                            second,
                        }
                        .at(loc),
                    );
                }
            }
        }
    }

    pub(crate) fn add_same_type_requirement(
        &mut self,
        lhs: UnresolvedType,
        rhs: UnresolvedType,
        source: FloatingSource,
        handling: UnresolvedHandling,
    ) -> ConstraintResult {
        self.add_same_type_requirement_diag(lhs, rhs, source, handling, MismatchDiag::Standard)
    }

    pub(crate) fn add_same_type_requirement_diag(
        &mut self,
        lhs: UnresolvedType,
        rhs: UnresolvedType,
        source: FloatingSource,
        handling: UnresolvedHandling,
        diag: MismatchDiag,
    ) -> ConstraintResult {
        let Some(resolved1) = self.resolve(lhs.clone(), &source) else {
            return self.handle_unresolved(
                DelayedKind::SameType,
                lhs,
                rhs.into(),
                source,
                handling,
            );
        };
        let Some(resolved2) = self.resolve(rhs.clone(), &source) else {
            return self.handle_unresolved(
                DelayedKind::SameType,
                lhs,
                rhs.into(),
                source,
                handling,
            );
        };

        match (resolved1, resolved2) {
            (Resolved::Pa(pa1), Resolved::Pa(pa2)) => {
                let src = self.materialize_source(&source, pa1);
                self.add_same_type_between_archetypes(pa1, pa2, src)
            }
            (Resolved::Pa(pa), Resolved::Concrete(ty)) => {
                let src = self.materialize_source(&source, pa);
                self.add_same_type_to_concrete(pa, ty, src)
            }
            (Resolved::Concrete(ty), Resolved::Pa(pa)) => {
                let src = self.materialize_source(&source, pa);
                self.add_same_type_to_concrete(pa, ty, src)
            }
            (Resolved::Concrete(t1), Resolved::Concrete(t2)) => {
                self.add_same_type_between_concrete(t1, t2, source, diag)
            }
        }
    }

    /// Adds one requirement, optionally substituting its types and
    /// inferring requirements from the types it mentions.
    pub fn add_requirement(
        &mut self,
        requirement: &Requirement,
        source: FloatingSource,
        infer_module: Option<&str>,
        substitution: Option<&Substitution>,
    ) -> ConstraintResult {
        let subst = |ty: &Type| match substitution {
            Some(map) => map.apply(ty),
            None => ty.clone(),
        };

        match requirement {
            Requirement::Conformance { subject, protocol } => {
                let subject = subst(subject);
                let constraint = Type::Protocol(*protocol);
                if let Some(module) = infer_module {
                    let inferred = source.as_inferred(Some(module.to_string()));
                    self.infer_requirements_from(&subject, &inferred);
                }
                self.add_type_requirement(
                    UnresolvedType::Ty(subject),
                    UnresolvedType::Ty(constraint),
                    source,
                    UnresolvedHandling::GenerateConstraints,
                )
            }

            Requirement::Superclass {
                subject,
                superclass,
            } => {
                let subject = subst(subject);
                let superclass = subst(superclass);
                if let Some(module) = infer_module {
                    let inferred = source.as_inferred(Some(module.to_string()));
                    self.infer_requirements_from(&subject, &inferred);
                    self.infer_requirements_from(&superclass, &inferred);
                }
                self.add_type_requirement(
                    UnresolvedType::Ty(subject),
                    UnresolvedType::Ty(superclass),
                    source,
                    UnresolvedHandling::GenerateConstraints,
                )
            }

            Requirement::Layout { subject, layout } => {
                let subject = subst(subject);
                if let Some(module) = infer_module {
                    let inferred = source.as_inferred(Some(module.to_string()));
                    self.infer_requirements_from(&subject, &inferred);
                }
                self.add_layout_requirement_in(
                    UnresolvedType::Ty(subject),
                    *layout,
                    source,
                    UnresolvedHandling::GenerateConstraints,
                )
            }

            Requirement::SameType { first, second } => {
                if !first.has_type_parameter() && !second.has_type_parameter() {
                    if !first.has_error() && !second.has_error() {
                        if let Some(loc) = source.loc(&self.sources) {
                            self.diags.push(BDK::RequiresNoSameTypeArchetype.at(loc));
                        }
                    }
                    return ConstraintResult::Concrete;
                }

                let first = subst(first);
                let second = subst(second);
                if let Some(module) = infer_module {
                    let inferred = source.as_inferred(Some(module.to_string()));
                    self.infer_requirements_from(&first, &inferred);
                    self.infer_requirements_from(&second, &inferred);
                }
                self.add_same_type_requirement(
                    UnresolvedType::Ty(first),
                    UnresolvedType::Ty(second),
                    source,
                    UnresolvedHandling::GenerateConstraints,
                )
            }
        }
    }

    /// Re-adds every requirement of an applied generic declaration's
    /// signature, with the application's arguments substituted in.
    pub(crate) fn infer_requirements_from(&mut self, ty: &Type, source: &FloatingSource) {
        let mut applications: Vec<(crate::types::NominalId, Vec<Type>)> = Vec::new();
        ty.walk(&mut |component| {
            if let Type::Nominal { decl, args } = component {
                if !args.is_empty() {
                    applications.push((*decl, args.clone()));
                }
            }
        });

        for (decl, args) in applications {
            let nominal = self.decls.nominal(decl);
            let Some(signature) = nominal.generic_signature.clone() else {
                continue;
            };
            let subst = Substitution::for_params(&nominal.params.clone(), &args);
            for requirement in &signature.requirements {
                self.add_requirement(requirement, source.clone(), None, Some(&subst));
            }
        }
    }

    /// Drives the delayed queue to a fixed point: keep re-adding parked
    /// requirements until a full pass resolves nothing new.
    pub(crate) fn process_delayed_requirements(&mut self) {
        let mut any_solved = !self.delayed.is_empty();
        while any_solved {
            any_solved = false;
            let delayed = std::mem::take(&mut self.delayed);

            for requirement in delayed {
                let result = match requirement.kind {
                    DelayedKind::Conformance | DelayedKind::Superclass => self.add_type_requirement(
                        requirement.lhs.clone(),
                        match &requirement.rhs {
                            DelayedRhs::Pa(pa) => UnresolvedType::Pa(*pa),
                            DelayedRhs::Ty(ty) => UnresolvedType::Ty(ty.clone()),
                            DelayedRhs::Layout(_) => unreachable!("layout rhs on type requirement"),
                        },
                        requirement.source.clone(),
                        UnresolvedHandling::ReturnUnresolved,
                    ),
                    DelayedKind::Layout => {
                        let DelayedRhs::Layout(layout) = &requirement.rhs else {
                            unreachable!("non-layout rhs on layout requirement")
                        };
                        let layout = *layout;
                        self.add_layout_requirement_in(
                            requirement.lhs.clone(),
                            layout,
                            requirement.source.clone(),
                            UnresolvedHandling::ReturnUnresolved,
                        )
                    }
                    DelayedKind::SameType => self.add_same_type_requirement(
                        requirement.lhs.clone(),
                        match &requirement.rhs {
                            DelayedRhs::Pa(pa) => UnresolvedType::Pa(*pa),
                            DelayedRhs::Ty(ty) => UnresolvedType::Ty(ty.clone()),
                            DelayedRhs::Layout(_) => unreachable!("layout rhs on same-type"),
                        },
                        requirement.source.clone(),
                        UnresolvedHandling::ReturnUnresolved,
                    ),
                };

                match result {
                    ConstraintResult::Resolved
                    | ConstraintResult::Concrete
                    | ConstraintResult::Conflicting => any_solved = true,
                    ConstraintResult::Unresolved => self.delayed.push(requirement),
                }
            }
        }
    }
}
