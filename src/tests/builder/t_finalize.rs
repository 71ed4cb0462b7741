use crate::builder::test_util::{add_params, protocol_fixture, span, t, u};
use crate::builder::{BuilderDiagKind, FloatingSource, GenericSignatureBuilder};
use crate::diag::Span;
use crate::types::{DeclStore, GenericParamKey, Requirement, Type};

#[test]
fn test_recursive_concrete_binding_diagnosed() {
    let mut decls = DeclStore::new();
    let wrapper = decls.add_struct("Wrapper");
    decls.nominal_mut(wrapper).params = vec![GenericParamKey::new(0, 0)];
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    add_params(&mut builder, 1);

    // T == Wrapper<T> expands into itself.
    builder.add_same_type(
        t(),
        Type::nominal(wrapper, vec![t()]),
        FloatingSource::for_explicit(span(2)),
    );

    builder.finalize(Span::default(), true);
    let recursive: Vec<_> = builder
        .diagnostics()
        .iter()
        .filter(|diag| matches!(diag.kind, BuilderDiagKind::RecursiveSameTypeConstraint { .. }))
        .collect();
    assert_eq!(recursive.len(), 1);
    assert_eq!(recursive[0].span, span(2));
}

#[test]
fn test_recursive_superclass_binding_diagnosed() {
    let mut decls = DeclStore::new();
    let base = decls.add_class("Base", None);
    decls.nominal_mut(base).params = vec![GenericParamKey::new(0, 0)];
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    add_params(&mut builder, 1);

    builder.add_superclass(
        t(),
        Type::nominal(base, vec![t()]),
        FloatingSource::for_explicit(span(3)),
    );

    builder.finalize(Span::default(), true);
    assert!(builder.diagnostics().iter().any(|diag| matches!(
        diag.kind,
        BuilderDiagKind::RecursiveSuperclassConstraint { .. }
    )));
}

#[test]
fn test_spanning_tree_redundancy_diagnosed() {
    let fixture = protocol_fixture(&["A", "B", "C"]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 1);

    builder.add_conformance(t(), fixture.proto, FloatingSource::for_abstract());
    builder.add_same_type(
        Type::member(t(), "A"),
        Type::member(t(), "B"),
        FloatingSource::for_explicit(span(1)),
    );
    builder.add_same_type(
        Type::member(t(), "B"),
        Type::member(t(), "C"),
        FloatingSource::for_explicit(span(2)),
    );
    // Already implied by the two edges above.
    builder.add_same_type(
        Type::member(t(), "A"),
        Type::member(t(), "C"),
        FloatingSource::for_explicit(span(3)),
    );

    builder.finalize(Span::default(), true);
    let signature = builder.compute_generic_signature();

    let same_type_count = signature
        .requirements
        .iter()
        .filter(|req| matches!(req, Requirement::SameType { .. }))
        .count();
    // Three members collapse into one class with three derived components;
    // the spanning tree needs exactly two edges.
    assert_eq!(same_type_count, 2);

    assert!(builder.diagnostics().iter().any(|diag| matches!(
        diag.kind,
        BuilderDiagKind::RedundantSameTypeConstraint { .. }
    )));
}

#[test]
fn test_duplicate_edges_between_components_diagnosed() {
    let fixture = protocol_fixture(&["A", "B"]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 1);

    builder.add_conformance(t(), fixture.proto, FloatingSource::for_abstract());
    builder.add_same_type(
        Type::member(t(), "A"),
        Type::member(t(), "B"),
        FloatingSource::for_explicit(span(1)),
    );
    builder.add_same_type(
        Type::member(t(), "A"),
        Type::member(t(), "B"),
        FloatingSource::for_explicit(span(2)),
    );

    builder.finalize(Span::default(), true);
    assert!(builder.diagnostics().iter().any(|diag| matches!(
        diag.kind,
        BuilderDiagKind::RedundantSameTypeConstraint { .. }
    )));
    assert!(builder.diagnostics().iter().any(|diag| matches!(
        diag.kind,
        BuilderDiagKind::PreviousSameTypeConstraint { .. }
    )));
}

#[test]
fn test_params_made_equal_diagnosed_when_disallowed() {
    let fixture = protocol_fixture(&[]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 2);

    builder.add_same_type(t(), u(), FloatingSource::for_explicit(span(5)));

    builder.finalize(Span::default(), false);
    assert!(builder.diagnostics().iter().any(|diag| matches!(
        diag.kind,
        BuilderDiagKind::RequiresGenericParamsMadeEqual { .. }
    )));
}

#[test]
fn test_param_made_concrete_diagnosed_when_disallowed() {
    let mut decls = DeclStore::new();
    let int = decls.add_struct("Int");
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    add_params(&mut builder, 1);
    builder.add_same_type(t(), Type::nominal(int, vec![]), FloatingSource::for_explicit(span(4)));

    builder.finalize(Span::default(), false);
    assert!(builder.diagnostics().iter().any(|diag| matches!(
        diag.kind,
        BuilderDiagKind::RequiresGenericParamMadeEqualToConcrete { .. }
    )));
}

#[test]
fn test_param_made_concrete_allowed_when_requested() {
    let mut decls = DeclStore::new();
    let int = decls.add_struct("Int");
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    add_params(&mut builder, 1);
    builder.add_same_type(t(), Type::nominal(int, vec![]), FloatingSource::for_explicit(span(4)));

    builder.finalize(Span::default(), true);
    assert!(builder.diagnostics().is_empty());

    // Concrete bindings of generic parameters survive canonicalization.
    let signature = builder.compute_generic_signature();
    assert_eq!(
        signature.requirements,
        vec![Requirement::SameType {
            first: t(),
            second: Type::nominal(int, vec![]),
        }]
    );
}

#[test]
#[should_panic(expected = "already finalized")]
fn test_finalize_twice_panics() {
    let fixture = protocol_fixture(&[]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 1);
    builder.finalize(Span::default(), true);
    builder.finalize(Span::default(), true);
}
