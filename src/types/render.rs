//! Rendering of types and requirements for diagnostics.
//!
//! Types reference declarations by id, so rendering needs the declaration
//! store plus the parameter names the caller registered.

use crate::types::{DeclStore, GenericParamKey, LayoutConstraint, Requirement, Type};

pub struct RenderCtx<'a> {
    decls: &'a DeclStore,
    param_names: &'a [(GenericParamKey, String)],
}

impl<'a> RenderCtx<'a> {
    pub fn new(decls: &'a DeclStore, param_names: &'a [(GenericParamKey, String)]) -> Self {
        Self { decls, param_names }
    }

    pub fn param(&self, key: GenericParamKey) -> String {
        self.param_names
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, name)| name.clone())
            .unwrap_or_else(|| format!("τ_{}_{}", key.depth, key.index))
    }

    pub fn ty(&self, ty: &Type) -> String {
        match ty {
            Type::Param(key) => self.param(*key),
            Type::Member { base, name, .. } => format!("{}.{}", self.ty(base), name),
            Type::Nominal { decl, args } => {
                let name = &self.decls.nominal(*decl).name;
                if args.is_empty() {
                    name.clone()
                } else {
                    let args: Vec<_> = args.iter().map(|arg| self.ty(arg)).collect();
                    format!("{}<{}>", name, args.join(", "))
                }
            }
            Type::Protocol(id) => self.decls.protocol(*id).name.clone(),
            Type::Composition(members) => {
                let members: Vec<_> = members.iter().map(|m| self.ty(m)).collect();
                members.join(" & ")
            }
            Type::Tuple(members) => {
                let members: Vec<_> = members.iter().map(|m| self.ty(m)).collect();
                format!("({})", members.join(", "))
            }
            Type::Error => "<<error>>".to_string(),
        }
    }

    pub fn layout(&self, layout: LayoutConstraint) -> String {
        layout.to_string()
    }

    pub fn requirement(&self, req: &Requirement) -> String {
        match req {
            Requirement::Conformance { subject, protocol } => {
                format!("{}: {}", self.ty(subject), self.decls.protocol(*protocol).name)
            }
            Requirement::Superclass {
                subject,
                superclass,
            } => format!("{}: {}", self.ty(subject), self.ty(superclass)),
            Requirement::Layout { subject, layout } => {
                format!("{}: {}", self.ty(subject), layout)
            }
            Requirement::SameType { first, second } => {
                format!("{} == {}", self.ty(first), self.ty(second))
            }
        }
    }
}
