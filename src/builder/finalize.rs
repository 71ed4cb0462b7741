//! Finalization.
//!
//! After all requirements are in, finalization drains the delayed queue,
//! detects recursive concrete and superclass bindings, filters self-derived
//! constraints, diagnoses redundancies and conflicts per class, computes the
//! derived same-type components used for canonical emission, checks generic
//! parameters that collapsed, and typo-corrects unresolved nested names.

use std::collections::HashSet;

use crate::builder::archetype::{Constraint, DerivedSameTypeComponent, PaId, PaResolution};
use crate::builder::errors::BDK;
use crate::builder::nested::NestedTypeUpdate;
use crate::builder::GenericSignatureBuilder;
use crate::diag::Span;
use crate::types::Type;

/// An edge of the same-type graph that crosses two derived components.
#[derive(Debug, Clone)]
struct IntercomponentEdge {
    source: usize,
    target: usize,
    constraint: Constraint<PaId>,
}

impl IntercomponentEdge {
    fn new(source: usize, target: usize, constraint: Constraint<PaId>) -> Self {
        let (source, target) = if source > target {
            (target, source)
        } else {
            (source, target)
        };
        Self {
            source,
            target,
            constraint,
        }
    }
}

impl GenericSignatureBuilder<'_> {
    /// Completes requirement processing. Must be called exactly once; the
    /// builder is read-only afterward except for signature collection.
    pub fn finalize(&mut self, loc: Span, allow_concrete_generic_params: bool) {
        assert!(!self.finalized, "builder is already finalized");

        self.process_delayed_requirements();
        self.finalized = true;

        let all = self.collect_potential_archetypes();
        for pa in all {
            if self.representative(pa) != pa {
                continue;
            }
            let cid = self.ensure_class(pa);

            self.check_recursive_parameter_equivalence(pa);

            if self.class(cid).concrete_type.is_some() {
                if self.is_recursive_binding(pa, false) {
                    if let Some(written) = self.find_concrete_constraint_as_written(pa, None) {
                        if let Some(span) = self.sources.loc(written.source) {
                            let subject = self.render_pa(pa);
                            let concrete = self.render_ty(&written.value);
                            self.diags.push(
                                BDK::RecursiveSameTypeConstraint { subject, concrete }.at(span),
                            );
                        }
                    }
                    self.pa_mut(pa).recursive_concrete = true;
                } else {
                    self.check_concrete_type_constraints(pa);
                }
            }

            if self.class(cid).superclass.is_some() {
                if self.is_recursive_binding(pa, true) {
                    if let Some(written) = self.find_superclass_constraint_as_written(pa, None) {
                        if let Some(span) = self.sources.loc(written.source) {
                            let subject = self.render_pa(written.subject);
                            let superclass = self
                                .class(cid)
                                .superclass
                                .clone()
                                .map(|ty| self.render_ty(&ty))
                                .unwrap_or_default();
                            self.diags.push(
                                BDK::RecursiveSuperclassConstraint { subject, superclass }
                                    .at(span),
                            );
                        }
                    }
                    self.pa_mut(pa).recursive_superclass = true;
                } else {
                    self.check_superclass_constraints(pa);
                }
            }

            self.check_conformance_constraints(pa);
            self.check_layout_constraints(pa);
            self.check_same_type_constraints(pa);
        }

        if !allow_concrete_generic_params {
            self.check_concrete_generic_params();
        }

        if self.unresolved_nested > 0 {
            self.correct_unresolved_nested_names();
        }

        self.diagnose_remaining_renames(loc);
    }

    /// A generic parameter equated with one of its own member types names
    /// an infinite type. Diagnose once per class and invalidate the
    /// offending members so enumeration replaces them with error types.
    fn check_recursive_parameter_equivalence(&mut self, rep: PaId) {
        let members = self.equivalence_members(rep);
        let params: Vec<PaId> = members
            .iter()
            .copied()
            .filter(|&member| self.pa(member).is_generic_param())
            .collect();
        if params.is_empty() {
            return;
        }

        let mut diagnosed = self.pa(rep).recursive_concrete;
        for &member in &members {
            let mut ancestor = self.pa(member).parent;
            while let Some(current) = ancestor {
                if params.contains(&current) {
                    if !diagnosed {
                        let subject = self.render_pa(current);
                        let concrete = self.render_pa(member);
                        let span = self
                            .class_of(rep)
                            .and_then(|class| {
                                class.same_type.values().flatten().find_map(|constraint| {
                                    self.sources.loc(constraint.source)
                                })
                            })
                            .unwrap_or_default();
                        self.diags
                            .push(BDK::RecursiveSameTypeConstraint { subject, concrete }.at(span));
                        diagnosed = true;
                        self.pa_mut(rep).recursive_concrete = true;
                    }
                    self.pa_mut(member).invalid = true;
                    break;
                }
                ancestor = self.pa(current).parent;
            }
        }
    }

    /// Whether the class binding for `rep` (concrete type, or superclass
    /// when `superclass` is set) reaches back to `rep` through the type
    /// parameters it mentions.
    fn is_recursive_binding(&mut self, rep: PaId, superclass: bool) -> bool {
        let mut visited: HashSet<PaId> = HashSet::new();
        let mut stack = vec![rep];
        visited.insert(rep);

        while let Some(pa) = stack.pop() {
            if superclass {
                if let Some(bound) = self.pa_superclass(pa) {
                    if self.type_references_rep(&bound, rep, &mut visited, &mut stack) {
                        return true;
                    }
                }
            }

            let Some(concrete) = self.concrete_type(pa) else {
                continue;
            };
            if self.type_references_rep(&concrete, rep, &mut visited, &mut stack) {
                return true;
            }
        }

        false
    }

    fn type_references_rep(
        &mut self,
        ty: &Type,
        rep: PaId,
        visited: &mut HashSet<PaId>,
        stack: &mut Vec<PaId>,
    ) -> bool {
        if !ty.has_type_parameter() {
            return false;
        }

        let mut parameters = Vec::new();
        ty.walk(&mut |component| {
            if component.is_type_parameter() {
                parameters.push(component.clone());
            }
        });

        for parameter in parameters {
            let Some(referenced) =
                self.resolve_archetype(&parameter, crate::builder::solver::ResolutionKind::AlreadyKnown)
            else {
                continue;
            };
            let referenced = self.representative(referenced);
            if referenced == rep {
                return true;
            }
            if visited.insert(referenced) {
                stack.push(referenced);
            }
        }

        false
    }

    /// Strict ordering for diagnostics determinism: canonical subject
    /// order, then source preference, then source creation order.
    pub(crate) fn sort_constraints<T>(&self, constraints: &mut [Constraint<T>]) {
        constraints.sort_by(|a, b| {
            self.compare_dependent_types(a.subject, b.subject)
                .then_with(|| {
                    let ka = (self.sources.is_derived(a.source), self.sources.path_length(a.source));
                    let kb = (self.sources.is_derived(b.source), self.sources.path_length(b.source));
                    // Derived orders first.
                    kb.0.cmp(&ka.0).then(ka.1.cmp(&kb.1))
                })
                .then_with(|| a.source.cmp(&b.source))
        });
    }

    /// The constraint diagnostics are phrased against: prefer inferred,
    /// then derived, then located, then canonically least.
    pub(crate) fn select_representative<T: Clone + PartialEq>(
        &mut self,
        constraints: &[Constraint<T>],
        suitable: impl Fn(&Constraint<T>) -> bool,
    ) -> Option<Constraint<T>> {
        let mut best: Option<&Constraint<T>> = None;
        for constraint in constraints.iter().filter(|c| suitable(c)) {
            let Some(current) = best else {
                best = Some(constraint);
                continue;
            };

            let this_inferred = self.sources.is_inferred(constraint.source);
            let best_inferred = self.sources.is_inferred(current.source);
            if this_inferred != best_inferred {
                if this_inferred {
                    best = Some(constraint);
                }
                continue;
            }

            let this_derived = self.sources.is_derived(constraint.source);
            let best_derived = self.sources.is_derived(current.source);
            if this_derived != best_derived {
                if this_derived {
                    best = Some(constraint);
                }
                continue;
            }

            let this_located = self.sources.loc(constraint.source).is_some();
            let best_located = self.sources.loc(current.source).is_some();
            if this_located != best_located {
                if this_located {
                    best = Some(constraint);
                }
                continue;
            }

            let order = self
                .compare_dependent_types(constraint.subject, current.subject)
                .then_with(|| self.sources.compare(constraint.source, current.source));
            if order == std::cmp::Ordering::Less {
                best = Some(constraint);
            }
        }
        best.cloned()
    }

    /// Removes constraints whose derivation loops back through the subject.
    /// Derived-via-concrete constraints are dropped too when requested,
    /// keeping one survivor if nothing else remains. Returns whether any
    /// derived-via-concrete constraint was seen.
    pub(crate) fn remove_self_derived<T: Clone>(
        &mut self,
        constraints: &mut Vec<Constraint<T>>,
        drop_derived_via_concrete: bool,
    ) -> bool {
        let mut any_via_concrete = false;
        let mut remaining_concrete: Option<Constraint<T>> = None;
        let mut retained = Vec::with_capacity(constraints.len());

        for constraint in constraints.drain(..) {
            let (self_derived, via_concrete) =
                self.is_self_derived_source(constraint.source, constraint.subject);
            if self_derived {
                continue;
            }
            if via_concrete {
                any_via_concrete = true;
                if drop_derived_via_concrete {
                    if remaining_concrete.is_none() {
                        remaining_concrete = Some(constraint.clone());
                    }
                    continue;
                }
            }
            retained.push(constraint);
        }

        if retained.is_empty() {
            if let Some(constraint) = remaining_concrete {
                retained.push(constraint);
            }
        }
        debug_assert!(!retained.is_empty(), "all constraints were self-derived");

        *constraints = retained;
        any_via_concrete
    }

    pub(crate) fn find_concrete_constraint_as_written(
        &mut self,
        pa: PaId,
        preferred: Option<PaId>,
    ) -> Option<Constraint<Type>> {
        let cid = self.ensure_class(pa);
        let class = self.class(cid);
        class.concrete_type.as_ref()?;

        let mut result = None;
        for constraint in &class.concrete_constraints {
            if self.sources.loc(constraint.source).is_some() {
                if preferred.is_none() || Some(constraint.subject) == preferred {
                    return Some(constraint.clone());
                }
                if result.is_none() {
                    result = Some(constraint.clone());
                }
            }
        }
        result
    }

    pub(crate) fn find_superclass_constraint_as_written(
        &mut self,
        pa: PaId,
        preferred: Option<PaId>,
    ) -> Option<Constraint<Type>> {
        let cid = self.ensure_class(pa);
        let class = self.class(cid);
        let superclass = class.superclass.clone()?;

        let mut result = None;
        for constraint in &class.superclass_constraints {
            if self.sources.loc(constraint.source).is_some() && constraint.value == superclass {
                if preferred.is_none() || Some(constraint.subject) == preferred {
                    return Some(constraint.clone());
                }
                if result.is_none() {
                    result = Some(constraint.clone());
                }
            }
        }
        result
    }

    fn check_concrete_type_constraints(&mut self, rep: PaId) {
        let cid = self.ensure_class(rep);
        let concrete_type = self
            .class(cid)
            .concrete_type
            .clone()
            .expect("checked by caller");

        let mut constraints = std::mem::take(&mut self.class_mut(cid).concrete_constraints);
        self.remove_self_derived(&mut constraints, true);
        self.sort_constraints(&mut constraints);

        let representative = self.select_representative(&constraints, |_| true);
        if let Some(representative) = &representative {
            for constraint in &constraints {
                if constraint == representative || constraint.value != concrete_type {
                    continue;
                }

                if !self.sources.is_derived(constraint.source)
                    && !self.sources.is_inferred(constraint.source)
                {
                    if let Some(span) = self.sources.loc(constraint.source) {
                        let subject = self.render_pa(constraint.subject);
                        let concrete = self.render_ty(&constraint.value);
                        self.diags
                            .push(BDK::RedundantSameTypeToConcrete { subject, concrete }.at(span));
                        self.note_concrete_representative(representative);
                    }
                }
            }
        }

        self.class_mut(cid).concrete_constraints = constraints;
    }

    fn note_concrete_representative(&mut self, representative: &Constraint<Type>) {
        if let Some(span) = self.sources.loc(representative.source) {
            let provenance = self.sources.classify(representative.source);
            let subject = self.render_pa(representative.subject);
            let concrete = self.render_ty(&representative.value);
            self.diags.push(
                BDK::SameTypeRedundancyHere {
                    provenance,
                    subject,
                    concrete,
                }
                .at(span),
            );
        }
    }

    fn check_superclass_constraints(&mut self, rep: PaId) {
        let cid = self.ensure_class(rep);
        let superclass = self
            .class(cid)
            .superclass
            .clone()
            .expect("checked by caller");

        let mut constraints = std::mem::take(&mut self.class_mut(cid).superclass_constraints);
        self.remove_self_derived(&mut constraints, true);
        self.sort_constraints(&mut constraints);

        let representative =
            self.select_representative(&constraints, |constraint| constraint.value == superclass);
        let mut diagnosed_conflicting_rep = false;

        if let Some(representative) = &representative {
            for constraint in &constraints {
                if constraint == representative {
                    continue;
                }

                if self.decls.is_exact_superclass_of(&constraint.value, &superclass) {
                    // A looser bound is subsumed by the resolved one.
                    if !self.sources.is_derived(constraint.source)
                        && !self.sources.is_inferred(constraint.source)
                    {
                        if let Some(span) = self.sources.loc(constraint.source) {
                            let subject = self.render_pa(constraint.subject);
                            let value = self.render_ty(&constraint.value);
                            self.diags.push(
                                BDK::RedundantSuperclassConstraint {
                                    subject,
                                    superclass: value,
                                }
                                .at(span),
                            );
                            self.note_superclass_representative(representative);
                        }
                    }
                } else if let Some(span) = self.sources.loc(constraint.source) {
                    let subject = self.render_pa(constraint.subject);
                    let first = self.render_ty(&constraint.value);
                    let second = self.render_ty(&representative.value);
                    self.diags.push(
                        BDK::RequiresSuperclassConflict {
                            subject,
                            first,
                            second,
                        }
                        .at(span),
                    );
                    self.note_superclass_representative(representative);
                } else if !diagnosed_conflicting_rep {
                    if let Some(span) = self.sources.loc(representative.source) {
                        let subject = self.render_pa(representative.subject);
                        let first = self.render_ty(&representative.value);
                        let second = self.render_ty(&constraint.value);
                        self.diags.push(
                            BDK::RequiresSuperclassConflict {
                                subject,
                                first,
                                second,
                            }
                            .at(span),
                        );
                        diagnosed_conflicting_rep = true;
                    }
                }
            }
        }

        self.class_mut(cid).superclass_constraints = constraints;

        // Cross-check against a concrete binding: the concrete type must
        // satisfy the bound, and once it does, the bound itself is implied.
        let concrete = self.class(cid).concrete_type.clone();
        let Some(concrete) = concrete else {
            return;
        };
        let Some(representative) = representative else {
            return;
        };

        if !self.decls.is_exact_superclass_of(&superclass, &concrete) {
            if let Some(existing) =
                self.find_concrete_constraint_as_written(rep, Some(representative.subject))
            {
                if let Some(span) = self.sources.loc(existing.source) {
                    let subject = self.render_pa(existing.subject);
                    let concrete_str = self.render_ty(&existing.value);
                    let superclass_str = self.render_ty(&superclass);
                    self.diags.push(
                        BDK::TypeDoesNotInherit {
                            subject,
                            concrete: concrete_str,
                            superclass: superclass_str,
                        }
                        .at(span),
                    );
                }
            } else if let Some(span) = self.sources.loc(representative.source) {
                let subject = self.render_pa(representative.subject);
                let concrete_str = self.render_ty(&concrete);
                let superclass_str = self.render_ty(&superclass);
                self.diags.push(
                    BDK::TypeDoesNotInherit {
                        subject,
                        concrete: concrete_str,
                        superclass: superclass_str,
                    }
                    .at(span),
                );
            }
        } else if let Some(span) = self.sources.loc(representative.source) {
            let subject = self.render_pa(representative.subject);
            let value = self.render_ty(&representative.value);
            self.diags.push(
                BDK::RedundantSuperclassConstraint {
                    subject,
                    superclass: value,
                }
                .at(span),
            );
            if let Some(existing) =
                self.find_concrete_constraint_as_written(rep, Some(representative.subject))
            {
                self.note_concrete_representative(&existing);
            }
        }
    }

    fn note_superclass_representative(&mut self, representative: &Constraint<Type>) {
        if let Some(span) = self.sources.loc(representative.source) {
            let provenance = self.sources.classify(representative.source);
            let subject = self.render_pa(representative.subject);
            let superclass = self.render_ty(&representative.value);
            self.diags.push(
                BDK::SuperclassRedundancyHere {
                    provenance,
                    subject,
                    superclass,
                }
                .at(span),
            );
        }
    }

    fn check_conformance_constraints(&mut self, rep: PaId) {
        let cid = self.ensure_class(rep);
        let protocols: Vec<_> = self.class(cid).conforms_to.keys().copied().collect();

        for protocol in protocols {
            let mut constraints = std::mem::take(
                self.class_mut(cid)
                    .conforms_to
                    .get_mut(&protocol)
                    .expect("protocol entry exists"),
            );

            // Per-protocol self-derivation filter, with derived-via-concrete
            // retention when nothing else survives.
            let mut remaining_concrete: Option<Constraint<_>> = None;
            let mut retained = Vec::with_capacity(constraints.len());
            for constraint in constraints.drain(..) {
                let (self_derived, via_concrete) = self.is_self_derived_conformance(
                    constraint.source,
                    constraint.subject,
                    protocol,
                );
                if self_derived {
                    continue;
                }
                if via_concrete {
                    if remaining_concrete.is_none() {
                        remaining_concrete = Some(constraint.clone());
                    }
                    continue;
                }
                retained.push(constraint);
            }
            if retained.is_empty() {
                if let Some(constraint) = remaining_concrete {
                    retained.push(constraint);
                }
            }
            debug_assert!(!retained.is_empty(), "all conformance constraints self-derived");

            self.sort_constraints(&mut retained);
            let representative = self.select_representative(&retained, |_| true);

            if let Some(representative) = &representative {
                for constraint in &retained {
                    if constraint == representative {
                        continue;
                    }
                    if !self.sources.is_derived(constraint.source)
                        && !self.sources.is_inferred(constraint.source)
                    {
                        if let Some(span) = self.sources.loc(constraint.source) {
                            let subject = self.render_pa(constraint.subject);
                            let protocol_name = self.decls.protocol(protocol).name.clone();
                            self.diags.push(
                                BDK::RedundantConformanceConstraint {
                                    subject,
                                    protocol: protocol_name,
                                }
                                .at(span),
                            );
                            if let Some(rep_span) = self.sources.loc(representative.source) {
                                let provenance = self.sources.classify(representative.source);
                                let subject = self.render_pa(representative.subject);
                                let protocol_name = self.decls.protocol(protocol).name.clone();
                                self.diags.push(
                                    BDK::RedundantConformanceHere {
                                        provenance,
                                        subject,
                                        protocol: protocol_name,
                                    }
                                    .at(rep_span),
                                );
                            }
                        }
                    }
                }
            }

            *self
                .class_mut(cid)
                .conforms_to
                .get_mut(&protocol)
                .expect("protocol entry exists") = retained;
        }
    }

    fn check_layout_constraints(&mut self, rep: PaId) {
        let cid = self.ensure_class(rep);
        let Some(layout) = self.class(cid).layout else {
            return;
        };

        let mut constraints = std::mem::take(&mut self.class_mut(cid).layout_constraints);
        self.remove_self_derived(&mut constraints, true);
        self.sort_constraints(&mut constraints);

        let representative =
            self.select_representative(&constraints, |constraint| constraint.value == layout);

        if let Some(representative) = &representative {
            for constraint in &constraints {
                if constraint == representative {
                    continue;
                }

                if constraint.value.merge(layout).is_known() {
                    if !self.sources.is_derived(constraint.source)
                        && !self.sources.is_inferred(constraint.source)
                    {
                        if let Some(span) = self.sources.loc(constraint.source) {
                            let subject = self.render_pa(constraint.subject);
                            self.diags.push(
                                BDK::RedundantLayoutConstraint {
                                    subject,
                                    layout: constraint.value.to_string(),
                                }
                                .at(span),
                            );
                            if let Some(rep_span) = self.sources.loc(representative.source) {
                                let provenance = self.sources.classify(representative.source);
                                let subject = self.render_pa(representative.subject);
                                self.diags.push(
                                    BDK::PreviousLayoutConstraint {
                                        provenance,
                                        subject,
                                        layout: representative.value.to_string(),
                                    }
                                    .at(rep_span),
                                );
                            }
                        }
                    }
                } else if let Some(span) = self.sources.loc(constraint.source) {
                    let subject = self.render_pa(constraint.subject);
                    self.diags.push(
                        BDK::ConflictingLayoutConstraints {
                            subject,
                            layout: constraint.value.to_string(),
                            previous: representative.value.to_string(),
                        }
                        .at(span),
                    );
                }
            }
        }

        self.class_mut(cid).layout_constraints = constraints;
    }

    /// Rebuilds this archetype using the anchors of its parent chain, so
    /// anchors exist for every member before component analysis.
    fn local_anchor(&mut self, pa: PaId) -> Option<PaId> {
        let Some(parent) = self.pa(pa).parent else {
            return Some(pa);
        };
        let parent_anchor = self.local_anchor(parent)?;
        let name = self.pa(pa).name.clone();
        self.nested_archetype_anchor(parent_anchor, &name, NestedTypeUpdate::AddIfMissing)
    }

    fn same_type_dfs(
        &mut self,
        pa: PaId,
        component: usize,
        component_of: &mut indexmap::IndexMap<PaId, usize>,
    ) -> PaId {
        let mut anchor = pa;
        if component_of.insert(pa, component).is_some() {
            return anchor;
        }

        let constraints = self
            .class_of(pa)
            .and_then(|class| class.same_type.get(&pa).cloned())
            .unwrap_or_default();
        for constraint in constraints {
            // Only derived edges define the components.
            if !self.sources.is_derived(constraint.source) {
                continue;
            }
            let new_anchor = self.same_type_dfs(constraint.value, component, component_of);
            if self.compare_dependent_types(new_anchor, anchor) == std::cmp::Ordering::Less {
                anchor = new_anchor;
            }
        }

        anchor
    }

    /// Computes derived same-type components, diagnoses redundant explicit
    /// same-type constraints, and selects the spanning-tree edges.
    pub(crate) fn check_same_type_constraints(&mut self, rep: PaId) {
        let cid = self.ensure_class(rep);
        if !self.class(cid).components.is_empty() {
            return;
        }

        // Anchors for every member must exist; some non-anchor members
        // still appear in canonicalized requirements.
        for member in self.equivalence_members(rep) {
            let _ = self.local_anchor(member);
        }

        let mut any_via_concrete = false;
        let keys: Vec<PaId> = self.class(cid).same_type.keys().copied().collect();
        for key in &keys {
            let mut constraints = std::mem::take(
                self.class_mut(cid)
                    .same_type
                    .get_mut(key)
                    .expect("same-type entry exists"),
            );
            if self.remove_self_derived(&mut constraints, false) {
                any_via_concrete = true;
            }
            self.sort_constraints(&mut constraints);
            *self
                .class_mut(cid)
                .same_type
                .get_mut(key)
                .expect("same-type entry exists") = constraints;
        }

        // Components of the derived-edge subgraph.
        let mut component_of: indexmap::IndexMap<PaId, usize> = indexmap::IndexMap::new();
        let mut components: Vec<DerivedSameTypeComponent> = Vec::new();
        for member in self.equivalence_members(rep) {
            if component_of.contains_key(&member) {
                continue;
            }
            let anchor = self.same_type_dfs(member, components.len(), &mut component_of);
            components.push(DerivedSameTypeComponent {
                anchor,
                concrete_source: None,
            });
        }

        // Best concrete source per component. Self-derived sources are
        // skipped here; their staging is known to lag behind late facts.
        for concrete in self.class(cid).concrete_constraints.clone() {
            let Some(&component) = component_of.get(&concrete.subject) else {
                continue;
            };
            let (self_derived, _) = self.is_self_derived_source(concrete.source, concrete.subject);
            if self_derived {
                continue;
            }
            let best = &mut components[component].concrete_source;
            let better = match best {
                None => true,
                Some(existing) => {
                    self.sources.compare(concrete.source, *existing) == std::cmp::Ordering::Less
                }
            };
            if better {
                components[component].concrete_source = Some(concrete.source);
            }
        }

        // Bin the recorded edges: intra-component ones are redundant,
        // inter-component ones are spanning-tree candidates.
        let num_components = components.len();
        let mut intracomponent: Vec<Vec<Constraint<PaId>>> = vec![Vec::new(); num_components];
        let mut intercomponent: Vec<IntercomponentEdge> = Vec::new();

        for key in &keys {
            let constraints = self
                .class(cid)
                .same_type
                .get(key)
                .cloned()
                .unwrap_or_default();
            for constraint in constraints {
                if constraint.subject == constraint.value {
                    if !self.sources.is_derived(constraint.source)
                        && !self.sources.is_inferred(constraint.source)
                    {
                        if let Some(span) = self.sources.loc(constraint.source) {
                            let first = self.render_pa(constraint.subject);
                            let second = self.render_pa(constraint.value);
                            self.diags
                                .push(BDK::RedundantSameTypeConstraint { first, second }.at(span));
                        }
                    }
                    continue;
                }

                // Each stated edge exists in both directions; keep the one
                // whose subject orders first.
                if self.compare_dependent_types(constraint.subject, constraint.value)
                    == std::cmp::Ordering::Greater
                {
                    continue;
                }

                let first = component_of[&constraint.subject];
                let second = component_of[&constraint.value];
                if first == second {
                    intracomponent[first].push(constraint);
                } else {
                    intercomponent.push(IntercomponentEdge::new(first, second, constraint));
                }
            }
        }

        // Now that binning is done, apply the derived-via-concrete drop.
        if any_via_concrete {
            for key in &keys {
                let mut constraints = std::mem::take(
                    self.class_mut(cid)
                        .same_type
                        .get_mut(key)
                        .expect("same-type entry exists"),
                );
                self.remove_self_derived(&mut constraints, true);
                *self
                    .class_mut(cid)
                    .same_type
                    .get_mut(key)
                    .expect("same-type entry exists") = constraints;
            }
        }

        // Explicit edges within one component restate derived equalities.
        for constraints in &intracomponent {
            if constraints.is_empty() {
                continue;
            }
            let mut constraints = constraints.clone();
            self.sort_constraints(&mut constraints);
            let representative = self.select_representative(&constraints, |_| true);
            if let Some(representative) = &representative {
                for constraint in &constraints {
                    if constraint == representative {
                        continue;
                    }
                    if !self.sources.is_derived(constraint.source)
                        && !self.sources.is_inferred(constraint.source)
                    {
                        if let Some(span) = self.sources.loc(constraint.source) {
                            let first = self.render_pa(constraint.subject);
                            let second = self.render_pa(constraint.value);
                            self.diags
                                .push(BDK::RedundantSameTypeConstraint { first, second }.at(span));
                            self.note_same_type_representative(representative);
                        }
                    }
                }
            }
        }

        // Deterministic edge order: by component pair, inferred last, then
        // constraint order.
        intercomponent.sort_by(|a, b| {
            a.source
                .cmp(&b.source)
                .then(a.target.cmp(&b.target))
                .then_with(|| {
                    let a_inferred = self.sources.is_inferred(a.constraint.source);
                    let b_inferred = self.sources.is_inferred(b.constraint.source);
                    a_inferred.cmp(&b_inferred)
                })
                .then_with(|| {
                    self.compare_dependent_types(a.constraint.subject, b.constraint.subject)
                        .then_with(|| a.constraint.source.cmp(&b.constraint.source))
                })
        });

        // Multiple edges between one component pair: all but the first are
        // redundant.
        let mut deduped: Vec<IntercomponentEdge> = Vec::with_capacity(intercomponent.len());
        for edge in intercomponent {
            let Some(kept) = deduped.last() else {
                deduped.push(edge);
                continue;
            };
            if kept.source != edge.source || kept.target != edge.target {
                deduped.push(edge);
                continue;
            }

            let kept = kept.clone();
            if self.sources.loc(kept.constraint.source).is_none()
                || self.sources.loc(edge.constraint.source).is_none()
            {
                continue;
            }
            if self.sources.is_inferred(kept.constraint.source) {
                continue;
            }

            if let Some(span) = self.sources.loc(kept.constraint.source) {
                let first = self.render_pa(kept.constraint.subject);
                let second = self.render_pa(kept.constraint.value);
                self.diags
                    .push(BDK::RedundantSameTypeConstraint { first, second }.at(span));
            }
            if let Some(span) = self.sources.loc(edge.constraint.source) {
                let provenance = self.sources.classify(edge.constraint.source);
                let first = self.render_pa(edge.constraint.subject);
                let second = self.render_pa(edge.constraint.value);
                self.diags.push(
                    BDK::PreviousSameTypeConstraint {
                        provenance,
                        first,
                        second,
                    }
                    .at(span),
                );
            }
        }

        // Any edge beyond a spanning tree over the components restates
        // connectivity the tree already provides.
        if deduped.len() + 1 > num_components {
            let mut connected = vec![false; num_components];
            let first_edge = deduped[0].clone();
            for edge in &deduped {
                if connected[edge.source] && connected[edge.target] {
                    if self.sources.loc(edge.constraint.source).is_some()
                        && !self.sources.is_inferred(edge.constraint.source)
                        && self.sources.loc(first_edge.constraint.source).is_some()
                    {
                        let span = self
                            .sources
                            .loc(edge.constraint.source)
                            .expect("checked above");
                        let first = self.render_pa(edge.constraint.subject);
                        let second = self.render_pa(edge.constraint.value);
                        self.diags
                            .push(BDK::RedundantSameTypeConstraint { first, second }.at(span));
                        self.note_same_type_representative(&first_edge.constraint);
                    }
                    continue;
                }
                connected[edge.source] = true;
                connected[edge.target] = true;
            }
        }

        components.sort_by(|a, b| self.compare_dependent_types(a.anchor, b.anchor));
        self.class_mut(cid).components = components;
    }

    fn note_same_type_representative(&mut self, representative: &Constraint<PaId>) {
        if let Some(span) = self.sources.loc(representative.source) {
            let provenance = self.sources.classify(representative.source);
            let first = self.render_pa(representative.subject);
            let second = self.render_pa(representative.value);
            self.diags.push(
                BDK::PreviousSameTypeConstraint {
                    provenance,
                    first,
                    second,
                }
                .at(span),
            );
        }
    }

    /// Generic parameters that were equated to concrete types or to each
    /// other no longer behave as parameters; diagnose unless allowed.
    fn check_concrete_generic_params(&mut self) {
        let max_depth = self.params.iter().map(|key| key.depth).max().unwrap_or(0);
        let mut visited: HashSet<PaId> = HashSet::new();

        for (index, &pa) in self.param_pas.clone().iter().enumerate() {
            let key = self.params[index];
            if key.depth < max_depth {
                continue;
            }

            let rep = self.representative(pa);
            if !visited.insert(rep) {
                continue;
            }

            let cid = self.ensure_class(rep);
            if self.class(cid).concrete_type.is_some() {
                if let Some(written) = self.find_concrete_constraint_as_written(rep, None) {
                    if let Some(span) = self.sources.loc(written.source) {
                        let param = self.render_pa(rep);
                        self.diags
                            .push(BDK::RequiresGenericParamMadeEqualToConcrete { param }.at(span));
                    }
                }
                continue;
            }

            for other in self.equivalence_members(rep) {
                if other == pa || !self.pa(other).is_generic_param() {
                    continue;
                }

                let constraints = self
                    .class(cid)
                    .same_type
                    .get(&pa)
                    .cloned()
                    .unwrap_or_default();
                let representative = self
                    .select_representative(&constraints, |constraint| constraint.value == other)
                    .or_else(|| self.select_representative(&constraints, |_| true));

                if let Some(representative) = representative {
                    if let Some(span) = self.sources.loc(representative.source) {
                        let first = self.render_pa(pa);
                        let second = self.render_pa(other);
                        self.diags
                            .push(BDK::RequiresGenericParamsMadeEqual { first, second }.at(span));
                    }
                }
                break;
            }
        }
    }

    /// Typo-corrects nested names that never resolved, equating each
    /// corrected archetype with its replacement.
    fn correct_unresolved_nested_names(&mut self) {
        for index in 0..self.pas.len() {
            let pa = PaId(index as u32);
            let node = self.pa(pa);
            if node.parent.is_none() || !node.is_unresolved_nested() {
                continue;
            }
            // A superclass bound may still resolve this member later in the
            // surrounding compiler; leave it alone.
            if self.pa_superclass(pa).is_some() {
                continue;
            }

            let Some(correction) = self.typo_correct_nested(pa) else {
                self.pa_mut(pa).invalid = true;
                continue;
            };

            let original = self.pa(pa).name.clone();
            self.pa_mut(pa).original_name = Some(original);
            self.renamed.push(pa);

            let parent = self.pa(pa).parent.expect("nested archetype has a parent");
            let replacement = self.nested_type_by_name(parent, &correction);

            self.pa_mut(pa).name = correction;
            if let Some(assoc) = self.pa(replacement).resolved_assoc() {
                self.pa_mut(pa).resolution = PaResolution::AssocType(assoc);
                self.unresolved_nested = self
                    .unresolved_nested
                    .checked_sub(1)
                    .expect("unresolved count matches unresolved archetypes");
            }

            let source = self.sources.for_nested_type_name_match(pa);
            self.add_same_type_requirement(
                crate::builder::solver::UnresolvedType::Pa(pa),
                crate::builder::solver::UnresolvedType::Pa(replacement),
                crate::builder::source::FloatingSource::resolved(source),
                crate::builder::solver::UnresolvedHandling::GenerateConstraints,
            );
        }
    }

    fn diagnose_remaining_renames(&mut self, loc: Span) {
        for pa in self.renamed.clone() {
            if self.pa(pa).rename_diagnosed {
                continue;
            }
            self.pa_mut(pa).rename_diagnosed = true;

            let parent = self.pa(pa).parent.expect("renamed archetype is nested");
            let parent_name = self.render_pa(parent);
            let original = self
                .pa(pa)
                .original_name
                .clone()
                .expect("renamed archetype keeps its original name");
            let suggestion = self.pa(pa).name.clone();
            self.diags.push(
                BDK::InvalidMemberTypeSuggest {
                    parent: parent_name,
                    original,
                    suggestion,
                }
                .at(loc),
            );
        }
    }
}

impl GenericSignatureBuilder<'_> {
    /// Used by enumeration when a class's components were not computed in
    /// the main finalize visit (e.g. classes formed during correction).
    pub(crate) fn ensure_same_type_components(&mut self, rep: PaId) {
        let cid = self.ensure_class(rep);
        if self.class(cid).components.is_empty() {
            self.check_same_type_constraints(rep);
        }
    }
}
