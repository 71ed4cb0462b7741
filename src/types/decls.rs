//! Declaration store and host callback seams.
//!
//! The builder reads protocol, associated-type, type-alias, and nominal
//! declarations from a [`DeclStore`] it borrows but never mutates.
//! Conformance lookup and lazy resolution are traits implemented by the
//! host; [`ConformanceTable`] and [`NullResolver`] cover tests and eager
//! hosts.

use std::hash::{Hash, Hasher};

use indexmap::IndexMap;

use crate::types::{GenericParamKey, GenericSignature, Requirement, Type};

macro_rules! decl_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

decl_id!(ProtocolId);
decl_id!(AssocTypeId);
decl_id!(AliasId);
decl_id!(NominalId);

#[derive(Debug, Clone)]
pub struct ProtocolDecl {
    pub name: String,
    pub module: String,
    /// Types in the inheritance clause: protocols, compositions, classes.
    pub inherited: Vec<Type>,
    /// Requirements from the trailing where clause, in terms of `Self`.
    pub where_requirements: Vec<Requirement>,
    pub assoc_types: Vec<AssocTypeId>,
    pub aliases: Vec<AliasId>,
    /// The protocol's own canonicalized signature, once computed. Present
    /// signatures let conformance expansion recurse over a finished
    /// requirement list instead of rewalking the declaration.
    pub requirement_signature: Option<GenericSignature>,
}

#[derive(Debug, Clone)]
pub struct AssociatedTypeDecl {
    pub name: String,
    pub protocol: ProtocolId,
    /// Types in the inheritance clause of the associated type.
    pub inherited: Vec<Type>,
    pub where_requirements: Vec<Requirement>,
    /// Whether the declaration supplies a default definition. Redeclaration
    /// warnings are suppressed when it does.
    pub has_default: bool,
}

#[derive(Debug, Clone)]
pub struct TypeAliasDecl {
    pub name: String,
    pub protocol: ProtocolId,
    /// Module the alias was declared in; may differ from the protocol's
    /// module when declared in an extension.
    pub module: String,
    /// Underlying type written in terms of the protocol's `Self`.
    pub underlying: Type,
}

#[derive(Debug, Clone)]
pub enum NominalKind {
    Struct,
    Class {
        /// Superclass type, with this declaration's parameters open.
        superclass: Option<Type>,
        /// Foreign classes get the loose `Class` layout instead of
        /// `NativeClass`.
        foreign: bool,
    },
}

#[derive(Debug, Clone)]
pub struct NominalDecl {
    pub name: String,
    pub kind: NominalKind,
    pub params: Vec<GenericParamKey>,
    /// Canonical signature of the declaration, used when inferring
    /// requirements from applications of this type.
    pub generic_signature: Option<GenericSignature>,
}

impl NominalDecl {
    pub fn is_class(&self) -> bool {
        matches!(self.kind, NominalKind::Class { .. })
    }
}

#[derive(Debug, Default)]
pub struct DeclStore {
    protocols: Vec<ProtocolDecl>,
    assoc_types: Vec<AssociatedTypeDecl>,
    aliases: Vec<TypeAliasDecl>,
    nominals: Vec<NominalDecl>,
}

impl DeclStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_protocol(&mut self, name: impl Into<String>, module: impl Into<String>) -> ProtocolId {
        let id = ProtocolId(self.protocols.len() as u32);
        self.protocols.push(ProtocolDecl {
            name: name.into(),
            module: module.into(),
            inherited: Vec::new(),
            where_requirements: Vec::new(),
            assoc_types: Vec::new(),
            aliases: Vec::new(),
            requirement_signature: None,
        });
        id
    }

    pub fn add_assoc_type(&mut self, protocol: ProtocolId, name: impl Into<String>) -> AssocTypeId {
        let id = AssocTypeId(self.assoc_types.len() as u32);
        self.assoc_types.push(AssociatedTypeDecl {
            name: name.into(),
            protocol,
            inherited: Vec::new(),
            where_requirements: Vec::new(),
            has_default: false,
        });
        self.protocols[protocol.index()].assoc_types.push(id);
        id
    }

    pub fn add_alias(
        &mut self,
        protocol: ProtocolId,
        name: impl Into<String>,
        underlying: Type,
    ) -> AliasId {
        let module = self.protocols[protocol.index()].module.clone();
        self.add_alias_in_module(protocol, name, underlying, module)
    }

    pub fn add_alias_in_module(
        &mut self,
        protocol: ProtocolId,
        name: impl Into<String>,
        underlying: Type,
        module: impl Into<String>,
    ) -> AliasId {
        let id = AliasId(self.aliases.len() as u32);
        self.aliases.push(TypeAliasDecl {
            name: name.into(),
            protocol,
            module: module.into(),
            underlying,
        });
        self.protocols[protocol.index()].aliases.push(id);
        id
    }

    pub fn add_struct(&mut self, name: impl Into<String>) -> NominalId {
        let id = NominalId(self.nominals.len() as u32);
        self.nominals.push(NominalDecl {
            name: name.into(),
            kind: NominalKind::Struct,
            params: Vec::new(),
            generic_signature: None,
        });
        id
    }

    pub fn add_class(&mut self, name: impl Into<String>, superclass: Option<Type>) -> NominalId {
        let id = NominalId(self.nominals.len() as u32);
        self.nominals.push(NominalDecl {
            name: name.into(),
            kind: NominalKind::Class {
                superclass,
                foreign: false,
            },
            params: Vec::new(),
            generic_signature: None,
        });
        id
    }

    pub fn protocol(&self, id: ProtocolId) -> &ProtocolDecl {
        &self.protocols[id.index()]
    }

    pub fn protocol_mut(&mut self, id: ProtocolId) -> &mut ProtocolDecl {
        &mut self.protocols[id.index()]
    }

    pub fn assoc_type(&self, id: AssocTypeId) -> &AssociatedTypeDecl {
        &self.assoc_types[id.index()]
    }

    pub fn assoc_type_mut(&mut self, id: AssocTypeId) -> &mut AssociatedTypeDecl {
        &mut self.assoc_types[id.index()]
    }

    pub fn alias(&self, id: AliasId) -> &TypeAliasDecl {
        &self.aliases[id.index()]
    }

    pub fn nominal(&self, id: NominalId) -> &NominalDecl {
        &self.nominals[id.index()]
    }

    pub fn nominal_mut(&mut self, id: NominalId) -> &mut NominalDecl {
        &mut self.nominals[id.index()]
    }

    /// Looks up members of a protocol by name: at most one associated type
    /// and at most one type alias.
    pub fn lookup_direct(
        &self,
        protocol: ProtocolId,
        name: &str,
    ) -> (Option<AssocTypeId>, Option<AliasId>) {
        let decl = self.protocol(protocol);
        let assoc = decl
            .assoc_types
            .iter()
            .copied()
            .find(|id| self.assoc_type(*id).name == name);
        let alias = decl
            .aliases
            .iter()
            .copied()
            .find(|id| self.alias(*id).name == name);
        (assoc, alias)
    }

    /// Protocols named directly in the inheritance clause.
    pub fn direct_inherited_protocols(&self, protocol: ProtocolId) -> Vec<ProtocolId> {
        let mut found = Vec::new();
        for inherited in &self.protocol(protocol).inherited {
            collect_protocols(inherited, &mut found);
        }
        found
    }

    /// Transitive closure of inherited protocols, excluding the root.
    pub fn inherited_protocol_closure(&self, protocol: ProtocolId) -> Vec<ProtocolId> {
        let mut seen = vec![protocol];
        let mut order = Vec::new();
        let mut work = self.direct_inherited_protocols(protocol);
        while let Some(next) = work.pop() {
            if seen.contains(&next) {
                continue;
            }
            seen.push(next);
            order.push(next);
            work.extend(self.direct_inherited_protocols(next));
        }
        order
    }

    /// Whether `sub` inherits from `sup`, directly or transitively.
    pub fn protocol_inherits_from(&self, sub: ProtocolId, sup: ProtocolId) -> bool {
        self.inherited_protocol_closure(sub).contains(&sup)
    }

    /// The superclass of a concrete class type, with arguments substituted.
    pub fn superclass_of(&self, ty: &Type) -> Option<Type> {
        let Type::Nominal { decl, args } = ty else {
            return None;
        };
        let nominal = self.nominal(*decl);
        let NominalKind::Class { superclass, .. } = &nominal.kind else {
            return None;
        };
        let superclass = superclass.clone()?;
        let subst = crate::types::Substitution::for_params(&nominal.params, args);
        Some(subst.apply(&superclass))
    }

    /// Whether `sup` appears on the superclass chain of `sub` (a type is
    /// its own zero-length superclass).
    pub fn is_exact_superclass_of(&self, sup: &Type, sub: &Type) -> bool {
        let mut current = Some(sub.clone());
        while let Some(ty) = current {
            if &ty == sup {
                return true;
            }
            current = self.superclass_of(&ty);
        }
        false
    }

    /// Canonical protocol ordering: by name, then defining module, then id.
    pub fn compare_protocols(&self, a: ProtocolId, b: ProtocolId) -> std::cmp::Ordering {
        let pa = self.protocol(a);
        let pb = self.protocol(b);
        pa.name
            .cmp(&pb.name)
            .then_with(|| pa.module.cmp(&pb.module))
            .then_with(|| a.cmp(&b))
    }

    /// Canonical associated-type ordering: by name, then protocol, then id.
    pub fn compare_assoc_types(&self, a: AssocTypeId, b: AssocTypeId) -> std::cmp::Ordering {
        if a == b {
            return std::cmp::Ordering::Equal;
        }
        let da = self.assoc_type(a);
        let db = self.assoc_type(b);
        da.name
            .cmp(&db.name)
            .then_with(|| self.compare_protocols(da.protocol, db.protocol))
            .then_with(|| a.cmp(&b))
    }

    /// Canonical protocol type-alias ordering, mirroring associated types.
    pub fn compare_aliases(&self, a: AliasId, b: AliasId) -> std::cmp::Ordering {
        if a == b {
            return std::cmp::Ordering::Equal;
        }
        let da = self.alias(a);
        let db = self.alias(b);
        da.name
            .cmp(&db.name)
            .then_with(|| self.compare_protocols(da.protocol, db.protocol))
            .then_with(|| a.cmp(&b))
    }
}

fn collect_protocols(ty: &Type, out: &mut Vec<ProtocolId>) {
    match ty {
        Type::Protocol(id) => out.push(*id),
        Type::Composition(members) => {
            for member in members {
                collect_protocols(member, out);
            }
        }
        _ => {}
    }
}

/// A protocol conformance of a concrete type, carrying its type witnesses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conformance {
    pub conforming: Type,
    pub protocol: ProtocolId,
    pub witnesses: IndexMap<AssocTypeId, Type>,
}

impl Conformance {
    pub fn new(conforming: Type, protocol: ProtocolId) -> Self {
        Self {
            conforming,
            protocol,
            witnesses: IndexMap::new(),
        }
    }

    pub fn with_witness(mut self, assoc: AssocTypeId, witness: Type) -> Self {
        self.witnesses.insert(assoc, witness);
        self
    }

    pub fn type_witness(&self, assoc: AssocTypeId) -> Option<&Type> {
        self.witnesses.get(&assoc)
    }
}

impl Hash for Conformance {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.conforming.hash(state);
        self.protocol.hash(state);
    }
}

/// Host callback answering whether a concrete type conforms to a protocol.
///
/// `dependent` is the type parameter the question was asked for; hosts that
/// resolve conditionally can use it, the table implementation ignores it.
pub trait ConformanceLookup {
    fn lookup(&self, dependent: &Type, concrete: &Type, protocol: ProtocolId)
        -> Option<Conformance>;
}

#[derive(Debug, Default)]
pub struct ConformanceTable {
    entries: Vec<Conformance>,
}

impl ConformanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, conformance: Conformance) {
        self.entries.push(conformance);
    }
}

impl ConformanceLookup for ConformanceTable {
    fn lookup(
        &self,
        _dependent: &Type,
        concrete: &Type,
        protocol: ProtocolId,
    ) -> Option<Conformance> {
        // Existentials conform to their own protocol abstractly.
        if let Type::Protocol(id) = concrete {
            if *id == protocol {
                return Some(Conformance::new(concrete.clone(), protocol));
            }
        }
        self.entries
            .iter()
            .find(|entry| &entry.conforming == concrete && entry.protocol == protocol)
            .cloned()
    }
}

/// A declaration the builder is about to read requirements from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeDeclRef {
    Protocol(ProtocolId),
    AssocType(AssocTypeId),
    Alias(AliasId),
}

/// Notification seam for hosts that materialize declarations on demand.
/// Called at the points the builder is about to consult the corresponding
/// part of the store; eager hosts use [`NullResolver`].
pub trait LazyResolver {
    fn resolve_decl_signature(&self, _decl: TypeDeclRef) {}
    fn resolve_inherited_protocols(&self, _protocol: ProtocolId) {}
    fn resolve_inheritance_clause(&self, _decl: TypeDeclRef) {}
}

#[derive(Debug, Default)]
pub struct NullResolver;

impl LazyResolver for NullResolver {}
