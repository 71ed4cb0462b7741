//! Generic signature builder.
//!
//! `GenericSignatureBuilder` collects requirements over a set of generic
//! parameters, resolves them against a growing forest of potential
//! archetypes, and canonicalizes the result into a minimal signature. The
//! stages are kept as focused modules: requirement sources, the archetype
//! arena, nested-type discovery, the solver, finalization, and enumeration.

pub mod archetype;
pub mod enumerate;
pub mod errors;
pub mod finalize;
pub mod nested;
pub mod solver;
pub mod source;

use std::collections::HashSet;

pub use errors::{BuilderDiag, BuilderDiagKind, BDK};
pub use solver::{ConstraintResult, UnresolvedHandling, UnresolvedType};
pub use source::FloatingSource;

use archetype::{EquivalenceClass, PaId, PotentialArchetype};
use solver::DelayedRequirement;
use source::SourceArena;

use crate::types::{
    AssocTypeId, ConformanceLookup, DeclStore, GenericParamKey, GenericSignature, LayoutConstraint,
    LazyResolver, NullResolver, ProtocolId, Requirement, Type, PROTOCOL_SELF,
};

static NULL_RESOLVER: NullResolver = NullResolver;

pub struct GenericSignatureBuilder<'a> {
    pub(crate) decls: &'a DeclStore,
    pub(crate) lookup: &'a dyn ConformanceLookup,
    pub(crate) resolver: &'a dyn LazyResolver,

    pub(crate) params: Vec<GenericParamKey>,
    pub(crate) param_names: Vec<(GenericParamKey, String)>,
    pub(crate) param_pas: Vec<PaId>,

    pub(crate) pas: Vec<PotentialArchetype>,
    pub(crate) classes: Vec<Option<EquivalenceClass>>,
    pub(crate) sources: SourceArena,

    pub(crate) delayed: Vec<DelayedRequirement>,
    pub(crate) diags: Vec<BuilderDiag>,
    pub(crate) unresolved_nested: usize,
    pub(crate) renamed: Vec<PaId>,
    /// Associated types flagged for direct recursion. Kept builder-local;
    /// the declaration store is never mutated.
    pub(crate) invalid_assoc_types: HashSet<AssocTypeId>,
    pub(crate) finalized: bool,
}

impl<'a> GenericSignatureBuilder<'a> {
    pub fn new(decls: &'a DeclStore, lookup: &'a dyn ConformanceLookup) -> Self {
        Self::with_resolver(decls, lookup, &NULL_RESOLVER)
    }

    pub fn with_resolver(
        decls: &'a DeclStore,
        lookup: &'a dyn ConformanceLookup,
        resolver: &'a dyn LazyResolver,
    ) -> Self {
        Self {
            decls,
            lookup,
            resolver,
            params: Vec::new(),
            param_names: Vec::new(),
            param_pas: Vec::new(),
            pas: Vec::new(),
            classes: Vec::new(),
            sources: SourceArena::default(),
            delayed: Vec::new(),
            diags: Vec::new(),
            unresolved_nested: 0,
            renamed: Vec::new(),
            invalid_assoc_types: HashSet::new(),
            finalized: false,
        }
    }

    /// Registers a generic parameter. Keys must arrive in strictly
    /// increasing order: the next index at the same depth, or index zero
    /// at a greater depth.
    pub fn add_generic_parameter(&mut self, key: GenericParamKey, name: impl Into<String>) {
        assert!(!self.finalized, "builder is already finalized");
        if let Some(&last) = self.params.last() {
            assert!(
                (key.depth == last.depth && key.index == last.index + 1)
                    || (key.depth > last.depth && key.index == 0),
                "generic parameters must be added in order"
            );
        }

        let name = name.into();
        let pa = self.new_param_archetype(key, name.clone());
        self.params.push(key);
        self.param_names.push((key, name));
        self.param_pas.push(pa);
    }

    /// Requires `subject` to conform to a protocol.
    pub fn add_conformance(
        &mut self,
        subject: Type,
        protocol: ProtocolId,
        source: FloatingSource,
    ) -> ConstraintResult {
        self.add_type_requirement(
            UnresolvedType::Ty(subject),
            UnresolvedType::Ty(Type::Protocol(protocol)),
            source,
            UnresolvedHandling::GenerateConstraints,
        )
    }

    /// Requires `subject` to be a subclass of `superclass`.
    pub fn add_superclass(
        &mut self,
        subject: Type,
        superclass: Type,
        source: FloatingSource,
    ) -> ConstraintResult {
        self.add_type_requirement(
            UnresolvedType::Ty(subject),
            UnresolvedType::Ty(superclass),
            source,
            UnresolvedHandling::GenerateConstraints,
        )
    }

    pub fn add_layout(
        &mut self,
        subject: Type,
        layout: LayoutConstraint,
        source: FloatingSource,
    ) -> ConstraintResult {
        self.add_layout_requirement_in(
            UnresolvedType::Ty(subject),
            layout,
            source,
            UnresolvedHandling::GenerateConstraints,
        )
    }

    pub fn add_same_type(
        &mut self,
        first: Type,
        second: Type,
        source: FloatingSource,
    ) -> ConstraintResult {
        self.add_same_type_requirement(
            UnresolvedType::Ty(first),
            UnresolvedType::Ty(second),
            source,
            UnresolvedHandling::GenerateConstraints,
        )
    }

    /// Adds all parameters and requirements of an existing signature.
    /// Same-type requirements go last so the member types they mention
    /// exist by the time they are resolved.
    pub fn add_generic_signature(&mut self, signature: &GenericSignature) {
        for &key in &signature.params {
            let name = format!("τ_{}_{}", key.depth, key.index);
            self.add_generic_parameter(key, name);
        }

        let mut same_type = Vec::new();
        for requirement in &signature.requirements {
            if matches!(requirement, Requirement::SameType { .. }) {
                same_type.push(requirement);
                continue;
            }
            self.add_requirement(requirement, FloatingSource::for_abstract(), None, None);
        }
        for requirement in same_type {
            self.add_requirement(requirement, FloatingSource::for_abstract(), None, None);
        }
    }

    /// Seeds a protocol's own requirement signature: the implicit `Self`
    /// parameter conforming to the protocol.
    pub fn add_requirement_signature_self(&mut self, protocol: ProtocolId) -> ConstraintResult {
        self.add_generic_parameter(PROTOCOL_SELF, "Self");
        let pa = *self.param_pas.last().expect("parameter was just added");
        let source = self.sources.for_requirement_signature(pa, protocol);
        self.add_conformance_requirement(pa, protocol, source)
    }

    /// Walks a type and re-adds the requirements of every applied generic
    /// declaration it mentions, as inferred requirements.
    pub fn infer_requirements(&mut self, module: &str, ty: &Type) {
        let source = FloatingSource::for_inferred(Some(module.to_string()));
        self.infer_requirements_from(ty, &source);
    }

    pub fn diagnostics(&self) -> &[BuilderDiag] {
        &self.diags
    }

    pub fn take_diagnostics(&mut self) -> Vec<BuilderDiag> {
        std::mem::take(&mut self.diags)
    }

    /// Nested archetypes whose names never matched a declaration.
    pub fn unresolved_nested_count(&self) -> usize {
        self.unresolved_nested
    }

    pub fn generic_params(&self) -> &[GenericParamKey] {
        &self.params
    }
}

#[cfg(test)]
#[path = "../tests/builder/util.rs"]
pub(crate) mod test_util;

#[cfg(test)]
#[path = "../tests/builder/t_source.rs"]
mod tests_source;

#[cfg(test)]
#[path = "../tests/builder/t_archetype.rs"]
mod tests_archetype;

#[cfg(test)]
#[path = "../tests/builder/t_nested.rs"]
mod tests_nested;

#[cfg(test)]
#[path = "../tests/builder/t_solver.rs"]
mod tests_solver;

#[cfg(test)]
#[path = "../tests/builder/t_finalize.rs"]
mod tests_finalize;

#[cfg(test)]
#[path = "../tests/builder/t_enumerate.rs"]
mod tests_enumerate;

#[cfg(test)]
#[path = "../tests/builder/t_props.rs"]
mod tests_props;
