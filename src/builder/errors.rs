//! Builder diagnostics.
//!
//! The builder carries diagnostics as structured `BuilderDiagKind` values
//! with pre-rendered type strings, wrapped in spans at the emission site.

use thiserror::Error;

use crate::diag::{Span, SpannedError};

/// How a requirement came to be, for "previously stated here" notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Written,
    Implied,
    Inferred,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Written => write!(f, "written here"),
            Provenance::Implied => write!(f, "implied here"),
            Provenance::Inferred => write!(f, "inferred from a type here"),
        }
    }
}

/// Which operand of a requirement a diagnostic refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintPosition {
    Subject,
    Constraint,
}

impl std::fmt::Display for ConstraintPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstraintPosition::Subject => write!(f, "subject"),
            ConstraintPosition::Constraint => write!(f, "constraint"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuilderDiagKind {
    #[error("'{subject}' cannot be equal to both '{first}' and '{second}'")]
    RequiresSameTypeConflict {
        subject: String,
        first: String,
        second: String,
    },

    #[error("generic signature requires types '{first}' and '{second}' to be the same")]
    RequiresSameConcreteType { first: String, second: String },

    #[error("same-type constraint '{subject}' == '{concrete}' is recursive")]
    RecursiveSameTypeConstraint { subject: String, concrete: String },

    #[error("superclass constraint '{subject}: {superclass}' is recursive")]
    RecursiveSuperclassConstraint {
        subject: String,
        superclass: String,
    },

    #[error("redundant conformance constraint '{subject}: {protocol}'")]
    RedundantConformanceConstraint { subject: String, protocol: String },

    #[error("redundant same-type constraint '{first}' == '{second}'")]
    RedundantSameTypeConstraint { first: String, second: String },

    #[error("previous same-type constraint '{first}' == '{second}' {provenance}")]
    PreviousSameTypeConstraint {
        provenance: Provenance,
        first: String,
        second: String,
    },

    #[error("conflicting layout constraints '{layout}' and '{previous}' on '{subject}'")]
    ConflictingLayoutConstraints {
        subject: String,
        layout: String,
        previous: String,
    },

    #[error("redundant layout constraint '{subject}: {layout}'")]
    RedundantLayoutConstraint { subject: String, layout: String },

    #[error("previous layout constraint '{subject}: {layout}' {provenance}")]
    PreviousLayoutConstraint {
        provenance: Provenance,
        subject: String,
        layout: String,
    },

    #[error("{position} type '{ty}' is not a generic parameter or dependent member type")]
    RequiresNotSuitableArchetype {
        position: ConstraintPosition,
        ty: String,
    },

    #[error("concrete type '{concrete}' does not conform to required protocol '{protocol}'")]
    RequiresGenericParamSameTypeDoesNotConform {
        concrete: String,
        protocol: String,
    },

    #[error("'{parent}' has no member type named '{original}'; did you mean '{suggestion}'?")]
    InvalidMemberTypeSuggest {
        parent: String,
        original: String,
        suggestion: String,
    },

    #[error("associated type '{name}' is already declared in inherited protocol '{inherited}'")]
    InheritedAssociatedTypeRedecl { name: String, inherited: String },

    #[error("type alias '{name}' overrides associated type '{name}' from inherited protocol '{inherited}'")]
    TypealiasOverrideAssociatedType { name: String, inherited: String },

    #[error("'{subject}' requires that '{concrete}' inherit from '{superclass}'")]
    TypeDoesNotInherit {
        subject: String,
        concrete: String,
        superclass: String,
    },

    #[error("same-type requirement makes generic parameters '{first}' and '{second}' equivalent")]
    RequiresGenericParamsMadeEqual { first: String, second: String },

    #[error("same-type requirement makes generic parameter '{param}' non-generic")]
    RequiresGenericParamMadeEqualToConcrete { param: String },

    #[error("type '{subject}' constrained to non-protocol, non-class type '{constraint}'")]
    RequiresConformanceNonprotocol { subject: String, constraint: String },

    #[error("same-type requirement refers to neither a generic parameter nor a dependent member type")]
    RequiresNoSameTypeArchetype,

    #[error("type alias '{name}' requires '{first}' and '{second}' to be the same")]
    ProtocolTypealiasConflict {
        name: String,
        first: String,
        second: String,
    },

    #[error("'{subject}' cannot be a subclass of both '{first}' and '{second}'")]
    RequiresSuperclassConflict {
        subject: String,
        first: String,
        second: String,
    },

    #[error("redundant superclass constraint '{subject}: {superclass}'")]
    RedundantSuperclassConstraint {
        subject: String,
        superclass: String,
    },

    #[error("same-type constraint '{subject}' == '{concrete}' {provenance}")]
    SameTypeRedundancyHere {
        provenance: Provenance,
        subject: String,
        concrete: String,
    },

    #[error("superclass constraint '{subject}: {superclass}' {provenance}")]
    SuperclassRedundancyHere {
        provenance: Provenance,
        subject: String,
        superclass: String,
    },

    #[error("redundant same-type constraint '{subject}' == '{concrete}'")]
    RedundantSameTypeToConcrete { subject: String, concrete: String },

    #[error("conformance constraint '{subject}: {protocol}' {provenance}")]
    RedundantConformanceHere {
        provenance: Provenance,
        subject: String,
        protocol: String,
    },

    #[error("recursive reference to associated type '{name}' in its inheritance clause")]
    RecursiveRequirementReference { name: String },
}

pub type BuilderDiag = SpannedError<BuilderDiagKind>;
pub use BuilderDiagKind as BDK;

impl BuilderDiagKind {
    pub fn at(self, span: Span) -> BuilderDiag {
        BuilderDiag::new(self, span)
    }
}
