use crate::builder::test_util::{add_params, protocol_fixture, span};
use crate::builder::GenericSignatureBuilder;
use crate::types::{GenericParamKey, Type, PROTOCOL_SELF};

#[test]
fn test_sources_are_hash_consed() {
    let fixture = protocol_fixture(&["A"]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 1);
    let pa = builder.param_archetype(GenericParamKey::new(0, 0)).expect("param exists");

    let first = builder.sources.for_explicit(pa, Some(span(3)));
    let second = builder.sources.for_explicit(pa, Some(span(3)));
    assert_eq!(first, second);

    let elsewhere = builder.sources.for_explicit(pa, Some(span(4)));
    assert_ne!(first, elsewhere);

    let abstract_src = builder.sources.for_abstract(pa);
    assert_ne!(first, abstract_src);
    assert_eq!(abstract_src, builder.sources.for_abstract(pa));
}

#[test]
fn test_derived_classification() {
    let fixture = protocol_fixture(&["A"]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 1);
    let pa = builder.param_archetype(GenericParamKey::new(0, 0)).expect("param exists");

    let explicit = builder.sources.for_explicit(pa, Some(span(1)));
    assert!(!builder.sources.is_derived(explicit));

    let inferred = builder.sources.for_inferred(pa, None);
    assert!(!builder.sources.is_derived(inferred));
    assert!(builder.sources.is_inferred(inferred));

    let parent_step = builder.sources.via_parent(explicit, fixture.assoc[0]);
    assert!(builder.sources.is_derived(parent_step));

    // A protocol requirement hanging off the requirement-signature root is
    // the signature itself, not a derived fact.
    let req_sig = builder.sources.for_requirement_signature(pa, fixture.proto);
    let stored = Type::member(Type::Param(PROTOCOL_SELF), "A");
    let direct = builder
        .sources
        .via_protocol_requirement(req_sig, stored.clone(), fixture.proto, false, None);
    assert!(!builder.sources.is_derived(direct));

    let via_explicit = builder
        .sources
        .via_protocol_requirement(explicit, stored, fixture.proto, false, None);
    assert!(builder.sources.is_derived(via_explicit));
}

#[test]
fn test_compare_prefers_derived_then_shorter_paths() {
    let fixture = protocol_fixture(&["A"]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 1);
    let pa = builder.param_archetype(GenericParamKey::new(0, 0)).expect("param exists");

    let explicit = builder.sources.for_explicit(pa, Some(span(1)));
    let derived = builder.sources.via_parent(explicit, fixture.assoc[0]);
    assert_eq!(
        builder.sources.compare(derived, explicit),
        std::cmp::Ordering::Less
    );
    assert_eq!(
        builder.sources.compare(explicit, derived),
        std::cmp::Ordering::Greater
    );

    let stored = Type::member(Type::Param(PROTOCOL_SELF), "A");
    let one_step = builder
        .sources
        .via_protocol_requirement(explicit, stored.clone(), fixture.proto, false, None);
    let two_steps = builder
        .sources
        .via_protocol_requirement(one_step, stored, fixture.proto, false, None);
    assert_eq!(builder.sources.path_length(one_step), 1);
    assert_eq!(builder.sources.path_length(two_steps), 2);
    assert_eq!(
        builder.sources.compare(one_step, two_steps),
        std::cmp::Ordering::Less
    );
}

#[test]
fn test_inferred_propagates_through_derivations() {
    let fixture = protocol_fixture(&["A"]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 1);
    let pa = builder.param_archetype(GenericParamKey::new(0, 0)).expect("param exists");

    let inferred = builder.sources.for_inferred(pa, Some("main".to_string()));
    let derived = builder.sources.via_parent(inferred, fixture.assoc[0]);
    assert!(builder.sources.is_inferred(derived));

    let explicit = builder.sources.for_explicit(pa, None);
    let from_explicit = builder.sources.via_parent(explicit, fixture.assoc[0]);
    assert!(!builder.sources.is_inferred(from_explicit));
}

#[test]
fn test_walk_reaches_affected_archetype() {
    let fixture = protocol_fixture(&["A"]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 1);
    let pa = builder.param_archetype(GenericParamKey::new(0, 0)).expect("param exists");

    let explicit = builder.sources.for_explicit(pa, Some(span(1)));
    builder.add_conformance_requirement(pa, fixture.proto, explicit);

    let nested = builder.nested_type_by_name(pa, "A");
    let stored = Type::member_resolved(Type::Param(PROTOCOL_SELF), "A", fixture.assoc[0]);
    let source = builder
        .sources
        .via_protocol_requirement(explicit, stored, fixture.proto, false, None);

    let affected = builder
        .source_affected_archetype(source)
        .expect("walk resolves to an archetype");
    assert!(builder.in_same_equivalence_class(affected, nested));
    assert_eq!(builder.sources.root_archetype(source), pa);
}
