use crate::builder::test_util::{add_params, protocol_fixture, seq_fixture, span, t, u};
use crate::builder::{
    BuilderDiagKind, ConstraintResult, FloatingSource, GenericSignatureBuilder,
};
use crate::diag::Span;
use crate::types::{
    Conformance, DeclStore, GenericParamKey, GenericSignature, LayoutConstraint, Requirement, Type,
};

fn signature_of(builder: &mut GenericSignatureBuilder) -> GenericSignature {
    builder.finalize(Span::default(), true);
    builder.compute_generic_signature()
}

#[test]
fn test_duplicate_conformance_emitted_once_and_diagnosed() {
    let fixture = protocol_fixture(&[]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 1);

    builder.add_conformance(t(), fixture.proto, FloatingSource::for_explicit(span(1)));
    builder.add_conformance(t(), fixture.proto, FloatingSource::for_explicit(span(2)));

    let signature = signature_of(&mut builder);
    assert_eq!(
        signature.requirements,
        vec![Requirement::Conformance {
            subject: t(),
            protocol: fixture.proto,
        }]
    );

    let redundant: Vec<_> = builder
        .diagnostics()
        .iter()
        .filter(|diag| matches!(diag.kind, BuilderDiagKind::RedundantConformanceConstraint { .. }))
        .collect();
    assert_eq!(redundant.len(), 1);
    assert_eq!(redundant[0].span, span(2));
}

#[test]
fn test_same_type_between_two_members() {
    let fixture = protocol_fixture(&["A", "B"]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 1);

    builder.add_conformance(t(), fixture.proto, FloatingSource::for_abstract());
    builder.add_same_type(
        Type::member(t(), "A"),
        Type::member(t(), "B"),
        FloatingSource::for_abstract(),
    );

    let signature = signature_of(&mut builder);
    assert_eq!(
        signature.requirements,
        vec![
            Requirement::Conformance {
                subject: t(),
                protocol: fixture.proto,
            },
            Requirement::SameType {
                first: Type::member_resolved(t(), "A", fixture.assoc[0]),
                second: Type::member_resolved(t(), "B", fixture.assoc[1]),
            },
        ]
    );
}

#[test]
fn test_equated_params_share_conformance() {
    let fixture = protocol_fixture(&[]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 2);

    builder.add_same_type(t(), u(), FloatingSource::for_abstract());
    builder.add_conformance(t(), fixture.proto, FloatingSource::for_abstract());

    let signature = signature_of(&mut builder);
    assert_eq!(
        signature.requirements,
        vec![
            Requirement::Conformance {
                subject: t(),
                protocol: fixture.proto,
            },
            Requirement::SameType {
                first: t(),
                second: u(),
            },
        ]
    );
}

#[test]
fn test_derived_conformance_suppressed_in_output() {
    let fixture = seq_fixture();
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 1);

    builder.add_conformance(t(), fixture.seq, FloatingSource::for_explicit(span(1)));
    builder.add_same_type(
        Type::member(t(), "Element"),
        fixture.int_ty(),
        FloatingSource::for_explicit(span(2)),
    );

    let signature = signature_of(&mut builder);
    assert_eq!(
        signature.requirements,
        vec![
            Requirement::Conformance {
                subject: t(),
                protocol: fixture.seq,
            },
            Requirement::SameType {
                first: Type::member_resolved(t(), "Element", fixture.element),
                second: fixture.int_ty(),
            },
        ]
    );

    // The Eq conformance of T.Element exists internally but is derived.
    let pa = builder
        .param_archetype(GenericParamKey::new(0, 0))
        .expect("param exists");
    let element = builder.nested_type_by_name(pa, "Element");
    assert!(builder.conforms_to(element).contains(&fixture.eq));
}

#[test]
fn test_recursive_member_equality_diagnosed() {
    let fixture = protocol_fixture(&["A"]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 1);

    builder.add_conformance(t(), fixture.proto, FloatingSource::for_abstract());
    builder.add_same_type(
        t(),
        Type::member(t(), "A"),
        FloatingSource::for_explicit(span(4)),
    );

    let signature = signature_of(&mut builder);
    assert!(builder.diagnostics().iter().any(|diag| matches!(
        diag.kind,
        BuilderDiagKind::RecursiveSameTypeConstraint { .. }
    )));

    // The recursive equality never reaches the output.
    assert_eq!(
        signature.requirements,
        vec![Requirement::Conformance {
            subject: t(),
            protocol: fixture.proto,
        }]
    );
}

#[test]
fn test_merged_class_equates_same_named_members() {
    let mut decls = DeclStore::new();
    let p = decls.add_protocol("P", "main");
    let a_p = decls.add_assoc_type(p, "A");
    let q = decls.add_protocol("Q", "main");
    decls.add_assoc_type(q, "A");
    let int = decls.add_struct("Int");
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    add_params(&mut builder, 2);

    builder.add_conformance(t(), p, FloatingSource::for_abstract());
    builder.add_conformance(u(), q, FloatingSource::for_abstract());
    builder.add_same_type(
        Type::member(t(), "A"),
        Type::nominal(int, vec![]),
        FloatingSource::for_abstract(),
    );
    builder.add_same_type(
        Type::member(u(), "A"),
        Type::nominal(int, vec![]),
        FloatingSource::for_abstract(),
    );
    builder.add_same_type(t(), u(), FloatingSource::for_abstract());

    // Same-named members of the merged class are co-equivalent, linked by
    // an implicit name-match edge.
    let pa_t = builder
        .param_archetype(GenericParamKey::new(0, 0))
        .expect("param exists");
    let pa_u = builder
        .param_archetype(GenericParamKey::new(0, 1))
        .expect("param exists");
    let t_a = builder.nested_type_by_name(pa_t, "A");
    let u_a = builder.nested_type_by_name(pa_u, "A");
    assert!(builder.in_same_equivalence_class(t_a, u_a));
    let class = builder.class_of(t_a).expect("class exists");
    let has_name_match_edge = class.same_type.values().flatten().any(|constraint| {
        matches!(
            builder.sources.node(constraint.source).kind,
            crate::builder::source::SourceKind::NestedTypeNameMatch
        )
    });
    assert!(has_name_match_edge);

    let signature = signature_of(&mut builder);
    let conformances_on_t: Vec<_> = signature
        .requirements
        .iter()
        .filter(|req| matches!(req, Requirement::Conformance { .. }))
        .collect();
    assert_eq!(conformances_on_t.len(), 2);
    assert!(conformances_on_t.iter().all(|req| matches!(
        req,
        Requirement::Conformance { subject, .. } if *subject == t()
    )));
    assert!(signature.requirements.contains(&Requirement::SameType {
        first: t(),
        second: u(),
    }));
    assert!(signature.requirements.contains(&Requirement::SameType {
        first: Type::member_resolved(t(), "A", a_p),
        second: Type::nominal(int, vec![]),
    }));
}

#[test]
fn test_requirement_on_missing_param_is_delayed() {
    let fixture = protocol_fixture(&["A"]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 1);

    // U does not exist yet; the requirement parks on the delayed queue.
    let result = builder.add_conformance(u(), fixture.proto, FloatingSource::for_abstract());
    assert_eq!(result, ConstraintResult::Resolved);

    builder.add_generic_parameter(GenericParamKey::new(0, 1), "U");

    let signature = signature_of(&mut builder);
    assert!(signature.requirements.contains(&Requirement::Conformance {
        subject: u(),
        protocol: fixture.proto,
    }));
}

#[test]
fn test_superclass_implies_class_layout() {
    let mut decls = DeclStore::new();
    let class = decls.add_class("Base", None);
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    add_params(&mut builder, 1);
    builder.add_superclass(t(), Type::nominal(class, vec![]), FloatingSource::for_abstract());

    let pa = builder
        .param_archetype(GenericParamKey::new(0, 0))
        .expect("param exists");
    let class_facts = builder.class_of(pa).expect("class exists");
    assert_eq!(class_facts.layout, Some(LayoutConstraint::NativeClass));

    let signature = signature_of(&mut builder);
    assert!(signature.requirements.contains(&Requirement::Superclass {
        subject: t(),
        superclass: Type::nominal(class, vec![]),
    }));
    // The implied layout is derived and stays out of the signature.
    assert!(!signature
        .requirements
        .iter()
        .any(|req| matches!(req, Requirement::Layout { .. })));
}

#[test]
fn test_superclass_tightens_to_subclass() {
    let mut decls = DeclStore::new();
    let base = decls.add_class("Base", None);
    let derived = decls.add_class("Derived", Some(Type::nominal(base, vec![])));
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    add_params(&mut builder, 1);
    builder.add_superclass(t(), Type::nominal(base, vec![]), FloatingSource::for_explicit(span(1)));
    builder.add_superclass(
        t(),
        Type::nominal(derived, vec![]),
        FloatingSource::for_explicit(span(2)),
    );

    let signature = signature_of(&mut builder);
    assert!(signature.requirements.contains(&Requirement::Superclass {
        subject: t(),
        superclass: Type::nominal(derived, vec![]),
    }));
    assert!(builder.diagnostics().iter().any(|diag| matches!(
        diag.kind,
        BuilderDiagKind::RedundantSuperclassConstraint { .. }
    )));
}

#[test]
fn test_unrelated_superclasses_conflict() {
    let mut decls = DeclStore::new();
    let base = decls.add_class("Base", None);
    let other = decls.add_class("Other", None);
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    add_params(&mut builder, 1);
    builder.add_superclass(t(), Type::nominal(base, vec![]), FloatingSource::for_explicit(span(1)));
    builder.add_superclass(
        t(),
        Type::nominal(other, vec![]),
        FloatingSource::for_explicit(span(2)),
    );

    builder.finalize(Span::default(), true);
    assert!(builder.diagnostics().iter().any(|diag| matches!(
        diag.kind,
        BuilderDiagKind::RequiresSuperclassConflict { .. }
    )));
}

#[test]
fn test_conformance_satisfied_by_superclass_marks_explicit_redundant() {
    let mut decls = DeclStore::new();
    let p = decls.add_protocol("P", "main");
    let base = decls.add_class("Base", None);
    let mut conformances = crate::types::ConformanceTable::new();
    conformances.add(Conformance::new(Type::nominal(base, vec![]), p));

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    add_params(&mut builder, 1);
    builder.add_superclass(t(), Type::nominal(base, vec![]), FloatingSource::for_explicit(span(1)));
    builder.add_conformance(t(), p, FloatingSource::for_explicit(span(2)));

    builder.finalize(Span::default(), true);
    let redundant: Vec<_> = builder
        .diagnostics()
        .iter()
        .filter(|diag| matches!(diag.kind, BuilderDiagKind::RedundantConformanceConstraint { .. }))
        .collect();
    assert_eq!(redundant.len(), 1);
    assert_eq!(redundant[0].span, span(2));
}

#[test]
fn test_incompatible_layouts_conflict() {
    let fixture = protocol_fixture(&[]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 1);

    builder.add_layout(t(), LayoutConstraint::Trivial, FloatingSource::for_explicit(span(1)));
    builder.add_layout(t(), LayoutConstraint::Class, FloatingSource::for_explicit(span(2)));

    builder.finalize(Span::default(), true);
    assert!(builder.diagnostics().iter().any(|diag| matches!(
        diag.kind,
        BuilderDiagKind::ConflictingLayoutConstraints { .. }
    )));
}

#[test]
fn test_concrete_binding_must_satisfy_conformances() {
    let mut decls = DeclStore::new();
    let p = decls.add_protocol("P", "main");
    let int = Type::nominal(decls.add_struct("Int"), vec![]);
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    add_params(&mut builder, 1);
    builder.add_conformance(t(), p, FloatingSource::for_explicit(span(1)));
    let result = builder.add_same_type(t(), int, FloatingSource::for_explicit(span(2)));

    assert_eq!(result, ConstraintResult::Conflicting);
    assert!(builder.diagnostics().iter().any(|diag| matches!(
        diag.kind,
        BuilderDiagKind::RequiresGenericParamSameTypeDoesNotConform { .. }
    )));
}

#[test]
fn test_conflicting_concrete_bindings_diagnosed() {
    let mut decls = DeclStore::new();
    let int = decls.add_struct("Int");
    let bool_ty = decls.add_struct("Bool");
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    add_params(&mut builder, 1);
    builder.add_same_type(t(), Type::nominal(int, vec![]), FloatingSource::for_explicit(span(1)));
    let result = builder.add_same_type(
        t(),
        Type::nominal(bool_ty, vec![]),
        FloatingSource::for_explicit(span(2)),
    );

    assert_eq!(result, ConstraintResult::Conflicting);
    assert!(builder.diagnostics().iter().any(|diag| matches!(
        diag.kind,
        BuilderDiagKind::RequiresSameTypeConflict { .. }
    )));
}

#[test]
fn test_conformance_to_nonprotocol_rejected() {
    let mut decls = DeclStore::new();
    let int = decls.add_struct("Int");
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    add_params(&mut builder, 1);
    let result = builder.add_superclass(
        t(),
        Type::nominal(int, vec![]),
        FloatingSource::for_explicit(span(1)),
    );

    assert_eq!(result, ConstraintResult::Conflicting);
    assert!(builder.diagnostics().iter().any(|diag| matches!(
        diag.kind,
        BuilderDiagKind::RequiresConformanceNonprotocol { .. }
    )));
}

#[test]
fn test_explicit_requirement_on_concrete_subject_rejected() {
    let mut decls = DeclStore::new();
    let p = decls.add_protocol("P", "main");
    let int = decls.add_struct("Int");
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    add_params(&mut builder, 1);
    let result = builder.add_conformance(
        Type::nominal(int, vec![]),
        p,
        FloatingSource::for_explicit(span(1)),
    );

    assert_eq!(result, ConstraintResult::Concrete);
    assert!(builder.diagnostics().iter().any(|diag| matches!(
        diag.kind,
        BuilderDiagKind::RequiresNotSuitableArchetype { .. }
    )));
}

#[test]
fn test_concrete_same_type_without_parameters_rejected() {
    let mut decls = DeclStore::new();
    let int = decls.add_struct("Int");
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    add_params(&mut builder, 1);
    let result = builder.add_requirement(
        &Requirement::SameType {
            first: Type::nominal(int, vec![]),
            second: Type::nominal(int, vec![]),
        },
        FloatingSource::for_explicit(span(3)),
        None,
        None,
    );

    assert_eq!(result, ConstraintResult::Concrete);
    assert!(builder.diagnostics().iter().any(|diag| matches!(
        diag.kind,
        BuilderDiagKind::RequiresNoSameTypeArchetype
    )));
}

#[test]
fn test_inference_from_bound_generic_application() {
    let mut decls = DeclStore::new();
    let eq = decls.add_protocol("Eq", "main");
    let vec_decl = decls.add_struct("Vector");
    decls.nominal_mut(vec_decl).params = vec![GenericParamKey::new(0, 0)];
    decls.nominal_mut(vec_decl).generic_signature = Some(GenericSignature {
        params: vec![GenericParamKey::new(0, 0)],
        requirements: vec![Requirement::Conformance {
            subject: Type::param(0, 0),
            protocol: eq,
        }],
    });
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    add_params(&mut builder, 1);
    builder.infer_requirements("main", &Type::nominal(vec_decl, vec![t()]));

    let signature = signature_of(&mut builder);
    assert!(signature.requirements.contains(&Requirement::Conformance {
        subject: t(),
        protocol: eq,
    }));
}

#[test]
fn test_requirement_signature_expansion() {
    let mut decls = DeclStore::new();
    let q = decls.add_protocol("Q", "main");
    let p = decls.add_protocol("P", "main");
    decls.protocol_mut(p).requirement_signature = Some(GenericSignature {
        params: vec![GenericParamKey::new(0, 0)],
        requirements: vec![Requirement::Conformance {
            subject: Type::param(0, 0),
            protocol: q,
        }],
    });
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    add_params(&mut builder, 1);
    builder.add_conformance(t(), p, FloatingSource::for_explicit(span(1)));

    let pa = builder
        .param_archetype(GenericParamKey::new(0, 0))
        .expect("param exists");
    assert!(builder.conforms_to(pa).contains(&q));

    // The Q conformance came through P's signature and is derived.
    let signature = signature_of(&mut builder);
    assert_eq!(
        signature.requirements,
        vec![Requirement::Conformance {
            subject: t(),
            protocol: p,
        }]
    );
}

#[test]
fn test_inherited_associated_type_redeclaration_warns() {
    let mut decls = DeclStore::new();
    let a = decls.add_protocol("A", "main");
    decls.add_assoc_type(a, "X");
    let b = decls.add_protocol("B", "main");
    decls.protocol_mut(b).inherited = vec![Type::Protocol(a)];
    decls.add_assoc_type(b, "X");
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    builder.add_requirement_signature_self(b);

    assert!(builder.diagnostics().iter().any(|diag| matches!(
        &diag.kind,
        BuilderDiagKind::InheritedAssociatedTypeRedecl { name, inherited }
            if name == "X" && inherited == "A"
    )));
}

#[test]
fn test_typealias_overriding_associated_type_warns() {
    let mut decls = DeclStore::new();
    let a = decls.add_protocol("A", "main");
    decls.add_assoc_type(a, "X");
    let b = decls.add_protocol("B", "main");
    decls.protocol_mut(b).inherited = vec![Type::Protocol(a)];
    let int = decls.add_struct("Int");
    decls.add_alias(b, "X", Type::nominal(int, vec![]));
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    builder.add_requirement_signature_self(b);

    assert!(builder.diagnostics().iter().any(|diag| matches!(
        &diag.kind,
        BuilderDiagKind::TypealiasOverrideAssociatedType { name, inherited }
            if name == "X" && inherited == "A"
    )));
}

#[test]
fn test_structural_match_recurses_into_arguments() {
    let mut decls = DeclStore::new();
    let vec_decl = decls.add_struct("Vector");
    decls.nominal_mut(vec_decl).params = vec![GenericParamKey::new(0, 0)];
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    add_params(&mut builder, 2);

    // Vector<T> == Vector<U> decomposes into T == U.
    let result = builder.add_same_type(
        Type::nominal(vec_decl, vec![t()]),
        Type::nominal(vec_decl, vec![u()]),
        FloatingSource::for_explicit(span(1)),
    );
    assert_eq!(result, ConstraintResult::Resolved);

    let pa_t = builder
        .param_archetype(GenericParamKey::new(0, 0))
        .expect("param exists");
    let pa_u = builder
        .param_archetype(GenericParamKey::new(0, 1))
        .expect("param exists");
    assert!(builder.in_same_equivalence_class(pa_t, pa_u));
}
