use crate::builder::test_util::{add_params, protocol_fixture, seq_fixture, t, u};
use crate::builder::{FloatingSource, GenericSignatureBuilder};
use crate::types::{GenericParamKey, Type};

#[test]
fn test_representative_stability() {
    let fixture = protocol_fixture(&[]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 4);

    builder.add_same_type(t(), u(), FloatingSource::for_abstract());
    builder.add_same_type(Type::param(0, 2), Type::param(0, 3), FloatingSource::for_abstract());

    let pas: Vec<_> = (0..4)
        .map(|index| {
            builder
                .param_archetype(GenericParamKey::new(0, index))
                .expect("param exists")
        })
        .collect();

    assert_eq!(builder.representative(pas[0]), builder.representative(pas[1]));
    assert_eq!(builder.representative(pas[2]), builder.representative(pas[3]));
    assert_ne!(builder.representative(pas[0]), builder.representative(pas[2]));

    // Transitive closure after linking the two pairs.
    builder.add_same_type(u(), Type::param(0, 2), FloatingSource::for_abstract());
    assert_eq!(builder.representative(pas[0]), builder.representative(pas[3]));
}

#[test]
fn test_canonical_order_of_generic_params() {
    let fixture = protocol_fixture(&[]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 2);
    builder.add_generic_parameter(GenericParamKey::new(1, 0), "V");

    let pa00 = builder
        .param_archetype(GenericParamKey::new(0, 0))
        .expect("param exists");
    let pa01 = builder
        .param_archetype(GenericParamKey::new(0, 1))
        .expect("param exists");
    let pa10 = builder
        .param_archetype(GenericParamKey::new(1, 0))
        .expect("param exists");

    assert_eq!(builder.compare_dependent_types(pa00, pa01), std::cmp::Ordering::Less);
    assert_eq!(builder.compare_dependent_types(pa01, pa10), std::cmp::Ordering::Less);
    assert_eq!(builder.compare_dependent_types(pa10, pa00), std::cmp::Ordering::Greater);
    assert_eq!(builder.compare_dependent_types(pa00, pa00), std::cmp::Ordering::Equal);
}

#[test]
fn test_canonical_order_params_before_nested_and_by_name() {
    let fixture = protocol_fixture(&["A", "B"]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 1);
    let pa = builder
        .param_archetype(GenericParamKey::new(0, 0))
        .expect("param exists");

    let source = builder.sources.for_abstract(pa);
    builder.add_conformance_requirement(pa, fixture.proto, source);

    let nested_a = builder.nested_type_by_name(pa, "A");
    let nested_b = builder.nested_type_by_name(pa, "B");

    assert_eq!(builder.compare_dependent_types(pa, nested_a), std::cmp::Ordering::Less);
    assert_eq!(
        builder.compare_dependent_types(nested_a, nested_b),
        std::cmp::Ordering::Less
    );
}

#[test]
fn test_concrete_bound_orders_last() {
    let fixture = seq_fixture();
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 2);

    builder.add_same_type(u(), fixture.int_ty(), FloatingSource::for_abstract());

    let pa_t = builder
        .param_archetype(GenericParamKey::new(0, 0))
        .expect("param exists");
    let pa_u = builder
        .param_archetype(GenericParamKey::new(0, 1))
        .expect("param exists");

    // U is bound to a concrete type, so it orders after T even though the
    // parameter keys alone would agree.
    assert_eq!(builder.compare_dependent_types(pa_t, pa_u), std::cmp::Ordering::Less);
    assert_eq!(builder.compare_dependent_types(pa_u, pa_t), std::cmp::Ordering::Greater);
}

#[test]
fn test_conformance_recorded_once_per_protocol() {
    let fixture = protocol_fixture(&[]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 1);
    let pa = builder
        .param_archetype(GenericParamKey::new(0, 0))
        .expect("param exists");

    let first = builder.sources.for_abstract(pa);
    assert!(builder.pa_add_conformance(pa, fixture.proto, first));

    let second = builder.sources.for_explicit(pa, None);
    assert!(!builder.pa_add_conformance(pa, fixture.proto, second));

    let class = builder.class_of(pa).expect("class exists");
    assert_eq!(class.conforms_to.len(), 1);
    assert_eq!(class.conforms_to[&fixture.proto].len(), 2);
}

#[test]
fn test_anchor_is_canonically_least_member() {
    let fixture = protocol_fixture(&[]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 2);

    builder.add_same_type(u(), t(), FloatingSource::for_abstract());

    let pa_t = builder
        .param_archetype(GenericParamKey::new(0, 0))
        .expect("param exists");
    let pa_u = builder
        .param_archetype(GenericParamKey::new(0, 1))
        .expect("param exists");

    assert_eq!(builder.archetype_anchor(pa_u), pa_t);
    assert_eq!(builder.representative(pa_u), pa_t);
}

#[test]
fn test_same_type_edges_recorded_in_both_directions() {
    let fixture = protocol_fixture(&[]);
    let mut builder = GenericSignatureBuilder::new(&fixture.decls, &fixture.conformances);
    add_params(&mut builder, 2);

    builder.add_same_type(t(), u(), FloatingSource::for_abstract());

    let pa_t = builder
        .param_archetype(GenericParamKey::new(0, 0))
        .expect("param exists");
    let pa_u = builder
        .param_archetype(GenericParamKey::new(0, 1))
        .expect("param exists");

    let class = builder.class_of(pa_t).expect("class exists");
    let from_t = class.same_type.get(&pa_t).expect("edge from T");
    let from_u = class.same_type.get(&pa_u).expect("edge from U");
    assert!(from_t.iter().any(|c| c.value == pa_u));
    assert!(from_u.iter().any(|c| c.value == pa_t));
}
