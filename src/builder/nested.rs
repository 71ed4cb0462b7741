//! Nested-type discovery.
//!
//! Member names demanded under an archetype are matched against the
//! associated types and type aliases of the protocols its class conforms
//! to. Same-named nested archetypes inside one class are kept equivalent
//! through implicit name-match edges, and nested archetypes under concrete
//! parents are bound to the corresponding witnesses immediately.

use crate::builder::archetype::{PaId, PaResolution};
use crate::builder::solver::{MismatchDiag, UnresolvedHandling, UnresolvedType};
use crate::builder::source::{FloatingSource, SourceKind};
use crate::builder::GenericSignatureBuilder;
use crate::types::{AliasId, AssocTypeId, ProtocolId, Substitution, Type, TypeDeclRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestedTypeUpdate {
    /// Never create a new archetype.
    ResolveExisting,
    /// Create an archetype if nothing matches.
    AddIfMissing,
    /// Create only if the result would improve the canonical anchor.
    /// Currently resolves like `AddIfMissing`.
    AddIfBetterAnchor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberDecl {
    Assoc(AssocTypeId),
    Alias(AliasId),
}

impl GenericSignatureBuilder<'_> {
    /// The nested archetype for `name`, creating an unresolved one if the
    /// name matches nothing yet.
    pub(crate) fn nested_type_by_name(&mut self, pa: PaId, name: &str) -> PaId {
        if let Some(children) = self.pa(pa).nested.get(name) {
            if let Some(&first) = children.first() {
                return first;
            }
        }

        self.nested_archetype_anchor(pa, name, NestedTypeUpdate::AddIfMissing)
            .expect("AddIfMissing produces an archetype")
    }

    /// Finds the best declaration for `name` among the conformed protocols
    /// and materializes the nested archetype anchor for it.
    pub(crate) fn nested_archetype_anchor(
        &mut self,
        pa: PaId,
        name: &str,
        kind: NestedTypeUpdate,
    ) -> Option<PaId> {
        let rep = self.representative(pa);

        let mut best_assoc: Option<AssocTypeId> = None;
        let mut best_alias: Option<AliasId> = None;
        let mut aliases: Vec<AliasId> = Vec::new();
        for protocol in self.conforms_to(rep) {
            let (assoc, alias) = self.decls.lookup_direct(protocol, name);
            if let Some(assoc) = assoc {
                let better = match best_assoc {
                    Some(best) => {
                        self.decls.compare_assoc_types(assoc, best) == std::cmp::Ordering::Less
                    }
                    None => true,
                };
                if better {
                    best_assoc = Some(assoc);
                }
            }
            if let Some(alias) = alias {
                aliases.push(alias);
                let better = match best_alias {
                    Some(best) => self.decls.compare_aliases(alias, best) == std::cmp::Ordering::Less,
                    None => true,
                };
                if better {
                    best_alias = Some(alias);
                }
            }
        }

        let mut result = None;
        if let Some(assoc) = best_assoc {
            result = self.update_nested_for_conformance(
                pa,
                MemberDecl::Assoc(assoc),
                NestedTypeUpdate::AddIfMissing,
            );
        }

        // Aliases declared outside their protocol's module do not
        // participate; a compatibility quirk of the source language.
        aliases.retain(|alias| {
            let decl = self.decls.alias(*alias);
            decl.module == self.decls.protocol(decl.protocol).module
        });

        for alias in aliases {
            let alias_pa = self.update_nested_for_conformance(
                pa,
                MemberDecl::Alias(alias),
                NestedTypeUpdate::AddIfMissing,
            );
            if result.is_none() && Some(alias) == best_alias {
                result = alias_pa;
            }
        }

        if result.is_some() {
            return result;
        }

        match kind {
            NestedTypeUpdate::ResolveExisting => return None,
            NestedTypeUpdate::AddIfMissing | NestedTypeUpdate::AddIfBetterAnchor => {}
        }

        // Nothing resolved the name; produce an unresolved placeholder and
        // keep it equivalent to the representative's same-named nested.
        if self.pa(pa).nested.get(name).map_or(true, Vec::is_empty) {
            let created = self.new_nested_archetype(pa, name.to_string(), PaResolution::Unresolved);

            let rep = self.representative(pa);
            if rep != pa {
                let existing = self.nested_type_by_name(rep, name);
                let source = self.sources.for_nested_type_name_match(existing);
                self.add_same_type_requirement(
                    UnresolvedType::Pa(existing),
                    UnresolvedType::Pa(created),
                    FloatingSource::resolved(source),
                    UnresolvedHandling::GenerateConstraints,
                );
            }
        }

        self.pa(pa).nested.get(name).and_then(|children| children.first().copied())
    }

    /// Resolves `name` against one specific protocol, preferring its
    /// associated type over a same-named alias.
    pub(crate) fn update_nested_by_name_in_protocol(
        &mut self,
        pa: PaId,
        name: &str,
        protocol: ProtocolId,
        kind: NestedTypeUpdate,
    ) -> Option<PaId> {
        let (assoc, alias) = self.decls.lookup_direct(protocol, name);
        if let Some(assoc) = assoc {
            return self.update_nested_for_conformance(pa, MemberDecl::Assoc(assoc), kind);
        }
        if let Some(alias) = alias {
            return self.update_nested_for_conformance(pa, MemberDecl::Alias(alias), kind);
        }
        None
    }

    /// Finds or creates the nested archetype for a specific declaration,
    /// upgrading an unresolved placeholder when one exists.
    pub(crate) fn update_nested_for_conformance(
        &mut self,
        pa: PaId,
        decl: MemberDecl,
        kind: NestedTypeUpdate,
    ) -> Option<PaId> {
        let (name, protocol) = match decl {
            MemberDecl::Assoc(assoc) => {
                let d = self.decls.assoc_type(assoc);
                (d.name.clone(), d.protocol)
            }
            MemberDecl::Alias(alias) => {
                let d = self.decls.alias(alias);
                (d.name.clone(), d.protocol)
            }
        };

        let mut result = None;
        let mut should_update = false;

        if let Some(children) = self.pa(pa).nested.get(&name) {
            let children = children.clone();
            for existing in children {
                if self.pa(existing).is_unresolved_nested() {
                    self.resolve_nested(existing, decl);
                    result = Some(existing);
                    should_update = true;
                    break;
                }

                let matches = match decl {
                    MemberDecl::Assoc(assoc) => self.pa(existing).resolved_assoc() == Some(assoc),
                    MemberDecl::Alias(alias) => self.pa(existing).resolved_alias() == Some(alias),
                };
                if matches {
                    result = Some(existing);
                    break;
                }
            }
        }

        if result.is_none() {
            match kind {
                NestedTypeUpdate::AddIfMissing | NestedTypeUpdate::AddIfBetterAnchor => {
                    let resolution = match decl {
                        MemberDecl::Assoc(assoc) => PaResolution::AssocType(assoc),
                        MemberDecl::Alias(alias) => PaResolution::Alias(alias),
                    };
                    let created = self.new_nested_archetype(pa, name.clone(), resolution);
                    result = Some(created);

                    // The new archetype may name the same type as an
                    // existing sibling or the representative's nested.
                    let (sibling_count, first_sibling) = {
                        let siblings = &self.pa(pa).nested[&name];
                        (siblings.len(), siblings.first().copied())
                    };
                    let existing = if sibling_count > 1 {
                        first_sibling
                    } else {
                        let rep = self.representative(pa);
                        if rep != pa {
                            match decl {
                                MemberDecl::Assoc(assoc) => self.update_nested_for_conformance(
                                    rep,
                                    MemberDecl::Assoc(assoc),
                                    NestedTypeUpdate::AddIfMissing,
                                ),
                                MemberDecl::Alias(_) => Some(self.nested_type_by_name(rep, &name)),
                            }
                        } else {
                            None
                        }
                    };

                    if let Some(existing) = existing {
                        let source = self.sources.for_nested_type_name_match(existing);
                        self.add_same_type_requirement(
                            UnresolvedType::Pa(existing),
                            UnresolvedType::Pa(created),
                            FloatingSource::resolved(source),
                            UnresolvedHandling::GenerateConstraints,
                        );
                    }

                    should_update = true;
                }
                NestedTypeUpdate::ResolveExisting => {}
            }
        }

        let result = result?;

        if should_update {
            if let MemberDecl::Alias(alias) = decl {
                self.resolver.resolve_decl_signature(TypeDeclRef::Alias(alias));

                // Equate the alias archetype with its underlying type,
                // substituting this archetype's parent for Self.
                let underlying = self.decls.alias(alias).underlying.clone();
                let subject = self.dependent_type(pa);
                let substituted = Substitution::protocol_self(subject).apply(&underlying);
                let source = self.sources.for_nested_type_name_match(result);
                self.add_same_type_requirement(
                    UnresolvedType::Pa(result),
                    UnresolvedType::Ty(substituted),
                    FloatingSource::resolved(source),
                    UnresolvedHandling::GenerateConstraints,
                );
            }

            if let Some(super_source) = self.resolve_super_conformance(pa, protocol) {
                self.add_nested_same_type_via_superclass(result, super_source);
            }

            if self.is_concrete(pa) {
                let parent_source = self.sources.for_nested_type_name_match(pa);
                self.concretize_nested_from_concrete_parent(pa, parent_source, result);
            }
        }

        Some(result)
    }

    fn resolve_nested(&mut self, pa: PaId, decl: MemberDecl) {
        debug_assert!(self.pa(pa).is_unresolved_nested());
        self.pa_mut(pa).resolution = match decl {
            MemberDecl::Assoc(assoc) => PaResolution::AssocType(assoc),
            MemberDecl::Alias(alias) => PaResolution::Alias(alias),
        };
        self.unresolved_nested = self
            .unresolved_nested
            .checked_sub(1)
            .expect("unresolved count matches unresolved archetypes");
    }

    /// When a superclass bound supplies the conformance, bind the nested
    /// archetype to the superclass's type witness.
    pub(crate) fn add_nested_same_type_via_superclass(
        &mut self,
        nested: PaId,
        super_source: crate::builder::source::SourceId,
    ) {
        let Some(assoc) = self.pa(nested).resolved_assoc() else {
            return;
        };

        let SourceKind::Superclass { conformance } = &self.sources.node(super_source).kind else {
            return;
        };
        let Some(witness) = conformance
            .as_ref()
            .and_then(|conf| conf.type_witness(assoc).cloned())
        else {
            return;
        };

        let source = self.sources.via_parent(super_source, assoc);
        self.add_same_type_requirement(
            UnresolvedType::Pa(nested),
            UnresolvedType::Ty(witness),
            FloatingSource::resolved(source),
            UnresolvedHandling::GenerateConstraints,
        );
    }

    /// Binds a nested archetype of a concrete parent to the corresponding
    /// witness of the parent's conformance.
    pub(crate) fn concretize_nested_from_concrete_parent(
        &mut self,
        parent: PaId,
        parent_source: crate::builder::source::SourceId,
        nested: PaId,
    ) {
        let Some(concrete) = self.concrete_type(parent) else {
            return;
        };
        let Some(assoc) = self.pa(nested).resolved_assoc() else {
            return;
        };

        let concrete_source = self.sources.via_concrete(parent_source, None);
        let source = self.sources.via_parent(concrete_source, assoc);

        let protocol = self.decls.assoc_type(assoc).protocol;
        let dep_ty = self.dependent_type(nested);
        let witness = self
            .lookup
            .lookup(&dep_ty, &concrete, protocol)
            .and_then(|conf| conf.type_witness(assoc).cloned())
            .unwrap_or_else(|| {
                let decl = self.decls.assoc_type(assoc);
                Type::member_resolved(concrete.clone(), decl.name.clone(), assoc)
            });

        self.add_same_type_requirement_diag(
            UnresolvedType::Pa(nested),
            UnresolvedType::Ty(witness),
            FloatingSource::resolved(source),
            UnresolvedHandling::GenerateConstraints,
            MismatchDiag::Conflict {
                subject: nested,
                source,
            },
        );
    }

    /// Best unique associated-type name within edit distance of an
    /// unresolved nested name.
    pub(crate) fn typo_correct_nested(&mut self, pa: PaId) -> Option<String> {
        let name = self.pa(pa).name.clone();
        let parent = self.pa(pa).parent?;

        let bound = ((name.len() + 2) / 3).max(1);
        let mut best_matches: Vec<String> = Vec::new();
        let mut best_distance = 0usize;

        for protocol in self.conforms_to(parent) {
            for assoc in self.decls.protocol(protocol).assoc_types.clone() {
                let candidate = self.decls.assoc_type(assoc).name.clone();
                let Some(dist) = edit_distance(&name, &candidate, bound) else {
                    continue;
                };
                debug_assert!(dist > 0, "unresolved name cannot match exactly");
                if best_matches.is_empty() || dist < best_distance {
                    best_distance = dist;
                    best_matches.clear();
                    best_matches.push(candidate);
                } else if dist == best_distance {
                    best_matches.push(candidate);
                }
            }
        }

        let first = best_matches.first()?;
        if best_matches.iter().any(|other| other != first) {
            return None;
        }
        Some(first.clone())
    }
}

/// Levenshtein distance, bounded: `None` when the distance exceeds `bound`.
pub(crate) fn edit_distance(a: &str, b: &str, bound: usize) -> Option<usize> {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.len().abs_diff(b.len()) > bound {
        return None;
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        let mut row_min = current[0];
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
            row_min = row_min.min(current[j + 1]);
        }
        if row_min > bound {
            return None;
        }
        std::mem::swap(&mut prev, &mut current);
    }

    let distance = prev[b.len()];
    (distance <= bound).then_some(distance)
}
