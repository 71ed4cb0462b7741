use crate::builder::test_util::{add_params, protocol_fixture, seq_fixture, t, u};
use crate::builder::{FloatingSource, GenericSignatureBuilder};
use crate::diag::Span;
use crate::types::{DeclStore, GenericSignature, Requirement, Type};

fn signature_of(builder: &mut GenericSignatureBuilder) -> GenericSignature {
    builder.finalize(Span::default(), true);
    builder.compute_generic_signature()
}

fn round_trip(
    decls: &DeclStore,
    conformances: &crate::types::ConformanceTable,
    signature: &GenericSignature,
) -> GenericSignature {
    let mut builder = GenericSignatureBuilder::new(decls, conformances);
    builder.add_generic_signature(signature);
    signature_of(&mut builder)
}

#[test]
fn test_conformances_emitted_in_protocol_order() {
    let mut decls = DeclStore::new();
    let zebra = decls.add_protocol("Zebra", "main");
    let alpha = decls.add_protocol("Alpha", "main");
    let conformances = crate::types::ConformanceTable::new();

    let mut builder = GenericSignatureBuilder::new(&decls, &conformances);
    add_params(&mut builder, 1);
    builder.add_conformance(t(), zebra, FloatingSource::for_abstract());
    builder.add_conformance(t(), alpha, FloatingSource::for_abstract());

    let signature = signature_of(&mut builder);
    assert_eq!(
        signature.requirements,
        vec![
            Requirement::Conformance {
                subject: t(),
                protocol: alpha,
            },
            Requirement::Conformance {
                subject: t(),
                protocol: zebra,
            },
        ]
    );
}

#[test]
fn test_subjects_emitted_in_canonical_order() {
    let fixture = protocol_fixture(&["A"]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 2);

    builder.add_conformance(u(), fixture.proto, FloatingSource::for_abstract());
    builder.add_conformance(t(), fixture.proto, FloatingSource::for_abstract());

    let signature = signature_of(&mut builder);
    assert_eq!(
        signature.requirements,
        vec![
            Requirement::Conformance {
                subject: t(),
                protocol: fixture.proto,
            },
            Requirement::Conformance {
                subject: u(),
                protocol: fixture.proto,
            },
        ]
    );
}

#[test]
fn test_round_trip_is_stable() {
    let fixture = seq_fixture();
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 2);

    builder.add_conformance(t(), fixture.seq, FloatingSource::for_abstract());
    builder.add_same_type(
        Type::member(t(), "Element"),
        fixture.int_ty(),
        FloatingSource::for_abstract(),
    );
    builder.add_same_type(t(), u(), FloatingSource::for_abstract());

    let signature = signature_of(&mut builder);
    let replayed = round_trip(&fixture.decls, &fixture.conformances, &signature);
    assert_eq!(signature, replayed);

    let replayed_again = round_trip(&fixture.decls, &fixture.conformances, &replayed);
    assert_eq!(replayed, replayed_again);
}

#[test]
fn test_derived_requirements_suppressed() {
    let fixture = seq_fixture();
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 1);

    builder.add_conformance(t(), fixture.seq, FloatingSource::for_abstract());
    builder.add_same_type(
        Type::member(t(), "Element"),
        fixture.int_ty(),
        FloatingSource::for_abstract(),
    );

    let signature = signature_of(&mut builder);

    // The Eq conformance of T.Element is derived from Seq's declaration
    // and must not appear.
    let element_ty = Type::member_resolved(t(), "Element", fixture.element);
    assert!(!signature.requirements.iter().any(|req| matches!(
        req,
        Requirement::Conformance { subject, protocol }
            if *subject == element_ty && *protocol == fixture.eq
    )));
    assert_eq!(signature.requirements.len(), 2);
}

#[test]
fn test_spanning_tree_edge_count_matches_components() {
    let fixture = protocol_fixture(&["A", "B", "C", "D"]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 1);

    builder.add_conformance(t(), fixture.proto, FloatingSource::for_abstract());
    for pair in [("A", "B"), ("B", "C"), ("C", "D")] {
        builder.add_same_type(
            Type::member(t(), pair.0),
            Type::member(t(), pair.1),
            FloatingSource::for_abstract(),
        );
    }

    let signature = signature_of(&mut builder);
    let same_type_count = signature
        .requirements
        .iter()
        .filter(|req| matches!(req, Requirement::SameType { .. }))
        .count();
    // Four derived components in one class: exactly three edges.
    assert_eq!(same_type_count, 3);
}
