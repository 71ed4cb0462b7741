//! Host-facade type model.
//!
//! The builder operates on a deliberately small type representation:
//! generic parameters, dependent member types rooted at them, and a handful
//! of concrete forms (nominal types, protocol/existential types, tuples).
//! Declarations live in [`DeclStore`]; types reference them by id.

mod decls;
mod layout;
mod render;

pub use decls::{
    AliasId, AssocTypeId, AssociatedTypeDecl, Conformance, ConformanceLookup, ConformanceTable,
    DeclStore, LazyResolver, NominalDecl, NominalId, NominalKind, NullResolver, ProtocolDecl,
    ProtocolId, TypeAliasDecl, TypeDeclRef,
};
pub use layout::LayoutConstraint;
pub use render::RenderCtx;

use indexmap::IndexMap;

/// Identifies a generic parameter by nesting depth and position.
///
/// Keys order lexicographically, which is also their canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenericParamKey {
    pub depth: u32,
    pub index: u32,
}

impl GenericParamKey {
    pub fn new(depth: u32, index: u32) -> Self {
        Self { depth, index }
    }
}

/// The implicit `Self` parameter of a protocol's interface types.
pub const PROTOCOL_SELF: GenericParamKey = GenericParamKey { depth: 0, index: 0 };

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// A generic type parameter.
    Param(GenericParamKey),

    /// A member type of a dependent base, e.g. `T.Element`. The member is
    /// optionally resolved to a specific associated type declaration.
    Member {
        base: Box<Type>,
        name: String,
        assoc: Option<AssocTypeId>,
    },

    /// A concrete nominal type, possibly applied to type arguments.
    Nominal { decl: NominalId, args: Vec<Type> },

    /// The existential type of a single protocol.
    Protocol(ProtocolId),

    /// A composition of protocol and class constraints.
    Composition(Vec<Type>),

    Tuple(Vec<Type>),

    /// Stand-in produced when a constraint could not be honored.
    Error,
}

impl Type {
    pub fn param(depth: u32, index: u32) -> Type {
        Type::Param(GenericParamKey::new(depth, index))
    }

    pub fn member(base: Type, name: impl Into<String>) -> Type {
        Type::Member {
            base: Box::new(base),
            name: name.into(),
            assoc: None,
        }
    }

    pub fn member_resolved(base: Type, name: impl Into<String>, assoc: AssocTypeId) -> Type {
        Type::Member {
            base: Box::new(base),
            name: name.into(),
            assoc: Some(assoc),
        }
    }

    pub fn nominal(decl: NominalId, args: Vec<Type>) -> Type {
        Type::Nominal { decl, args }
    }

    /// A generic parameter or a dependent member chain rooted at one.
    pub fn is_type_parameter(&self) -> bool {
        match self {
            Type::Param(_) => true,
            Type::Member { base, .. } => base.is_type_parameter(),
            _ => false,
        }
    }

    /// Whether any type parameter occurs anywhere in this type.
    pub fn has_type_parameter(&self) -> bool {
        let mut found = false;
        self.walk(&mut |ty| {
            if matches!(ty, Type::Param(_)) {
                found = true;
            }
        });
        found
    }

    pub fn has_error(&self) -> bool {
        let mut found = false;
        self.walk(&mut |ty| {
            if matches!(ty, Type::Error) {
                found = true;
            }
        });
        found
    }

    /// Whether the type mentions a dependent member that was never resolved
    /// to an associated type declaration.
    pub fn has_unresolved_member(&self) -> bool {
        let mut found = false;
        self.walk(&mut |ty| {
            if matches!(ty, Type::Member { assoc: None, .. }) {
                found = true;
            }
        });
        found
    }

    /// The generic parameter at the root of a type-parameter chain.
    pub fn root_param(&self) -> Option<GenericParamKey> {
        match self {
            Type::Param(key) => Some(*key),
            Type::Member { base, .. } => base.root_param(),
            _ => None,
        }
    }

    /// Pre-order traversal over this type and all component types.
    pub fn walk(&self, f: &mut impl FnMut(&Type)) {
        f(self);
        match self {
            Type::Member { base, .. } => base.walk(f),
            Type::Nominal { args, .. } => {
                for arg in args {
                    arg.walk(f);
                }
            }
            Type::Composition(members) | Type::Tuple(members) => {
                for member in members {
                    member.walk(f);
                }
            }
            Type::Param(_) | Type::Protocol(_) | Type::Error => {}
        }
    }
}

/// A mapping from generic parameters to replacement types.
#[derive(Debug, Clone, Default)]
pub struct Substitution {
    map: IndexMap<GenericParamKey, Type>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: GenericParamKey, ty: Type) {
        self.map.insert(key, ty);
    }

    /// The substitution replacing a protocol's `Self` with `subject`.
    pub fn protocol_self(subject: Type) -> Self {
        let mut subst = Substitution::new();
        subst.insert(PROTOCOL_SELF, subject);
        subst
    }

    /// Pairs up a declaration's parameters with applied type arguments.
    pub fn for_params(params: &[GenericParamKey], args: &[Type]) -> Self {
        let mut subst = Substitution::new();
        for (key, arg) in params.iter().zip(args) {
            subst.insert(*key, arg.clone());
        }
        subst
    }

    pub fn apply(&self, ty: &Type) -> Type {
        match ty {
            Type::Param(key) => match self.map.get(key) {
                Some(replacement) => replacement.clone(),
                None => ty.clone(),
            },
            Type::Member { base, name, assoc } => Type::Member {
                base: Box::new(self.apply(base)),
                name: name.clone(),
                assoc: *assoc,
            },
            Type::Nominal { decl, args } => Type::Nominal {
                decl: *decl,
                args: args.iter().map(|arg| self.apply(arg)).collect(),
            },
            Type::Composition(members) => {
                Type::Composition(members.iter().map(|m| self.apply(m)).collect())
            }
            Type::Tuple(members) => Type::Tuple(members.iter().map(|m| self.apply(m)).collect()),
            Type::Protocol(_) | Type::Error => ty.clone(),
        }
    }
}

/// A single generic requirement, the unit of builder input and output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Conformance { subject: Type, protocol: ProtocolId },
    Superclass { subject: Type, superclass: Type },
    Layout { subject: Type, layout: LayoutConstraint },
    SameType { first: Type, second: Type },
}

impl Requirement {
    pub fn substituted(&self, subst: &Substitution) -> Requirement {
        match self {
            Requirement::Conformance { subject, protocol } => Requirement::Conformance {
                subject: subst.apply(subject),
                protocol: *protocol,
            },
            Requirement::Superclass {
                subject,
                superclass,
            } => Requirement::Superclass {
                subject: subst.apply(subject),
                superclass: subst.apply(superclass),
            },
            Requirement::Layout { subject, layout } => Requirement::Layout {
                subject: subst.apply(subject),
                layout: *layout,
            },
            Requirement::SameType { first, second } => Requirement::SameType {
                first: subst.apply(first),
                second: subst.apply(second),
            },
        }
    }
}

/// A canonicalized set of generic parameters and minimal requirements.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenericSignature {
    pub params: Vec<GenericParamKey>,
    pub requirements: Vec<Requirement>,
}

#[cfg(test)]
#[path = "../tests/types/t_types.rs"]
mod tests_types;

#[cfg(test)]
#[path = "../tests/types/t_layout.rs"]
mod tests_layout;
