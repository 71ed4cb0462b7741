//! Canonical enumeration and signature collection.
//!
//! Visits every archetype in canonical dependent-type order and emits, per
//! class: the concrete binding of each component anchor, the same-type
//! chain linking consecutive component anchors, and (on the archetype
//! anchor) the superclass, layout, and per-protocol conformance
//! requirements. Collection then filters derived requirements out of the
//! final signature.

use std::collections::HashSet;

use crate::builder::archetype::{Constraint, PaId};
use crate::builder::source::SourceId;
use crate::builder::GenericSignatureBuilder;
use crate::types::{GenericSignature, LayoutConstraint, ProtocolId, Requirement, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnumeratedKind {
    Conformance,
    Superclass,
    Layout,
    SameType,
}

#[derive(Debug, Clone)]
pub(crate) enum EnumeratedRhs {
    Archetype(PaId),
    Concrete(Type),
    Protocol(ProtocolId),
    Layout(LayoutConstraint),
}

#[derive(Debug, Clone)]
pub(crate) struct EnumeratedRequirement {
    pub kind: EnumeratedKind,
    pub subject: PaId,
    pub rhs: EnumeratedRhs,
    pub source: SourceId,
}

impl GenericSignatureBuilder<'_> {
    /// Every archetype reachable from the generic parameters: class
    /// anchors, equivalence members, and nested types.
    pub(crate) fn collect_potential_archetypes(&mut self) -> Vec<PaId> {
        let mut visited: HashSet<PaId> = HashSet::new();
        let mut stack: Vec<PaId> = Vec::new();
        let mut out = Vec::new();

        for &pa in &self.param_pas.clone() {
            if visited.insert(pa) {
                stack.push(pa);
            }
        }

        while let Some(pa) = stack.pop() {
            out.push(pa);

            let anchor = self.archetype_anchor(pa);
            if visited.insert(anchor) {
                stack.push(anchor);
            }

            for member in self.equivalence_members(pa) {
                if visited.insert(member) {
                    stack.push(member);
                }
            }

            let nested: Vec<PaId> = self
                .pa(pa)
                .nested
                .values()
                .flat_map(|children| children.iter().copied())
                .collect();
            for child in nested {
                if visited.insert(child) {
                    stack.push(child);
                }
            }
        }

        out
    }

    fn best_constraint_source<T>(&self, constraints: &[Constraint<T>]) -> SourceId {
        let mut best = constraints
            .first()
            .expect("constraint list is non-empty")
            .source;
        for constraint in constraints {
            if self.sources.compare(constraint.source, best) == std::cmp::Ordering::Less {
                best = constraint.source;
            }
        }
        best
    }

    /// Emits the canonicalized requirement stream, derived and stated
    /// alike; collection filters it down to the signature.
    pub(crate) fn enumerate_requirements(&mut self) -> Vec<EnumeratedRequirement> {
        let mut archetypes = self.collect_potential_archetypes();
        archetypes.retain(|&pa| !self.pa(pa).invalid);
        archetypes.sort_by(|&a, &b| self.compare_dependent_types(a, b));

        let mut out = Vec::new();

        for archetype in archetypes {
            let rep = self.representative(archetype);
            self.ensure_same_type_components(rep);
            let cid = self.ensure_class(rep);

            let components = self.class(cid).components.clone();
            let known_anchor = components
                .iter()
                .position(|component| component.anchor == archetype);

            let mut deferred_same_type: Option<(PaId, PaId)> = None;

            if let Some(index) = known_anchor {
                if let Some(concrete) = self.class(cid).concrete_type.clone() {
                    // Under a concrete parent the whole subtree is already
                    // concrete; nothing to require.
                    if let Some(parent) = self.pa(archetype).parent {
                        if self.is_concrete(parent) {
                            continue;
                        }
                    }

                    let source = match components[index].concrete_source {
                        Some(source) => source,
                        None => self.sources.for_abstract(archetype),
                    };
                    let rhs = if self.pa(rep).recursive_concrete {
                        Type::Error
                    } else {
                        concrete
                    };
                    out.push(EnumeratedRequirement {
                        kind: EnumeratedKind::SameType,
                        subject: archetype,
                        rhs: EnumeratedRhs::Concrete(rhs),
                        source,
                    });
                    continue;
                }

                if index + 1 < components.len() {
                    deferred_same_type = Some((archetype, components[index + 1].anchor));
                }
            }

            if archetype == self.archetype_anchor(archetype) {
                let class = self.class(cid);
                if let Some(superclass) = class.superclass.clone() {
                    let source = self.best_constraint_source(&class.superclass_constraints);
                    let rhs = if self.pa(rep).recursive_superclass {
                        Type::Error
                    } else {
                        superclass
                    };
                    out.push(EnumeratedRequirement {
                        kind: EnumeratedKind::Superclass,
                        subject: archetype,
                        rhs: EnumeratedRhs::Concrete(rhs),
                        source,
                    });
                }

                let class = self.class(cid);
                if let Some(layout) = class.layout {
                    let source = self.best_constraint_source(&class.layout_constraints);
                    out.push(EnumeratedRequirement {
                        kind: EnumeratedKind::Layout,
                        subject: archetype,
                        rhs: EnumeratedRhs::Layout(layout),
                        source,
                    });
                }

                let class = self.class(cid);
                let mut protocols: Vec<(ProtocolId, SourceId)> = class
                    .conforms_to
                    .iter()
                    .map(|(&protocol, constraints)| {
                        (protocol, self.best_constraint_source(constraints))
                    })
                    .collect();
                protocols.sort_by(|a, b| self.decls.compare_protocols(a.0, b.0));

                for (protocol, source) in protocols {
                    out.push(EnumeratedRequirement {
                        kind: EnumeratedKind::Conformance,
                        subject: archetype,
                        rhs: EnumeratedRhs::Protocol(protocol),
                        source,
                    });
                }
            }

            if let Some((first, second)) = deferred_same_type {
                let source = self.sources.for_abstract(first);
                out.push(EnumeratedRequirement {
                    kind: EnumeratedKind::SameType,
                    subject: first,
                    rhs: EnumeratedRhs::Archetype(second),
                    source,
                });
            }
        }

        out
    }

    /// The canonical minimal signature. Legal only after `finalize`.
    pub fn compute_generic_signature(&mut self) -> GenericSignature {
        assert!(self.finalized, "finalize the builder before collecting");

        let mut requirements = Vec::new();
        for enumerated in self.enumerate_requirements() {
            // Derived requirements are implied by the rest and suppressed,
            // except concrete bindings of generic parameters, which
            // canonicalization must keep: a signature never drops a
            // parameter merely because it was made concrete.
            let keep_concrete_param = enumerated.kind == EnumeratedKind::SameType
                && self.pa(enumerated.subject).is_generic_param()
                && matches!(enumerated.rhs, EnumeratedRhs::Concrete(_));
            if self.sources.is_derived(enumerated.source) && !keep_concrete_param {
                continue;
            }

            let subject = self.dependent_type_strict(enumerated.subject);
            if subject.has_error() {
                continue;
            }

            match enumerated.rhs {
                EnumeratedRhs::Protocol(protocol) => {
                    requirements.push(Requirement::Conformance { subject, protocol });
                }
                EnumeratedRhs::Layout(layout) => {
                    requirements.push(Requirement::Layout { subject, layout });
                }
                EnumeratedRhs::Concrete(ty) => {
                    // Concrete right-hand sides that still mention
                    // unresolved members cannot be stated.
                    if ty.has_unresolved_member() {
                        continue;
                    }
                    match enumerated.kind {
                        EnumeratedKind::Superclass => {
                            requirements.push(Requirement::Superclass {
                                subject,
                                superclass: ty,
                            });
                        }
                        EnumeratedKind::SameType => {
                            requirements.push(Requirement::SameType {
                                first: subject,
                                second: ty,
                            });
                        }
                        EnumeratedKind::Conformance | EnumeratedKind::Layout => {
                            unreachable!("concrete rhs on conformance or layout")
                        }
                    }
                }
                EnumeratedRhs::Archetype(other) => {
                    let second = self.dependent_type_strict(other);
                    if second.has_error() {
                        continue;
                    }
                    requirements.push(Requirement::SameType {
                        first: subject,
                        second,
                    });
                }
            }
        }

        GenericSignature {
            params: self.params.clone(),
            requirements,
        }
    }
}
