//! DSL tests: syntax (parse success/failure) and semantics (resolve, layout analysis).

use rawstruct::ast::{LengthUnit, StructKind, TypeSpec};
use rawstruct::{parse, ResolvedSchema, SchemaError};

fn resolve(src: &str) -> Result<ResolvedSchema, SchemaError> {
    ResolvedSchema::resolve(parse(src).expect("parse"))
}

// ==================== Syntax ====================

#[test]
fn parse_empty_schema() {
    let s = parse("").expect("empty schema can parse");
    assert!(s.types.is_empty());
}

#[test]
fn parse_record_and_set() {
    let src = r#"
// comments are allowed
record R {
  a: integer(8),
  b: optional octetstring(2),
}
set S { x: boolean, y: charstring }
"#;
    let s = parse(src).expect("parse");
    assert_eq!(s.types.len(), 2);
    match (&s.types[0].spec, &s.types[1].spec) {
        (TypeSpec::Struct(r), TypeSpec::Struct(set)) => {
            assert_eq!(r.kind, StructKind::Record);
            assert_eq!(set.kind, StructKind::Set);
            assert!(r.fields[1].optional);
            assert_eq!(r.fields[1].spec, TypeSpec::OctetString { octets: Some(2) });
            assert_eq!(set.fields[0].spec, TypeSpec::Boolean { bits: 1 });
        }
        other => panic!("expected two structs, got {:?}", other),
    }
}

#[test]
fn parse_union_and_record_of() {
    let src = r#"
type Choice = union { n: integer(8), s: charstring(1) } json [as_value];
type Pairs = record of Pair json [as_map];
record Pair { key: charstring, value: integer(8) }
"#;
    let s = parse(src).expect("parse");
    match &s.types[0].spec {
        TypeSpec::Union(u) => {
            assert!(u.as_value);
            assert_eq!(u.alternatives.len(), 2);
        }
        other => panic!("expected union, got {:?}", other),
    }
    match &s.types[1].spec {
        TypeSpec::RecordOf(ro) => {
            assert!(ro.as_map);
            assert_eq!(*ro.element, TypeSpec::Named("Pair".into()));
        }
        other => panic!("expected record of, got {:?}", other),
    }
}

#[test]
fn parse_length_and_pointer_attributes() {
    let src = r#"
record M {
  cnt: integer(8) raw [lengthto(items), unit(elements)],
  ptr: integer(8) raw [pointerto(tail), ptrunit(8), ptroffset(-8), pointerbase(cnt)],
  items: record of integer(8),
  tail: octetstring,
}
"#;
    let s = parse(src).expect("parse");
    let def = match &s.types[0].spec {
        TypeSpec::Struct(d) => d,
        other => panic!("expected record, got {:?}", other),
    };
    assert_eq!(def.fields[0].raw.unit, LengthUnit::Elements);
    assert_eq!(def.fields[1].raw.pointerto.as_deref(), Some("tail"));
    assert_eq!(def.fields[1].raw.ptroffset, -8);
    assert_eq!(def.fields[1].raw.pointerbase.as_deref(), Some("cnt"));
}

#[test]
fn parse_json_field_attributes() {
    let src = r#"
record J {
  kind: integer(8),
  body: optional union { a: integer(8), b: boolean }
    json [chosen(a = kind == 1; omit = kind == 0; b = otherwise), metainfo_unbound],
  note: charstring json [alias("n"), default("\"x\"")],
}
"#;
    let s = parse(src).expect("parse");
    let def = match &s.types[0].spec {
        TypeSpec::Struct(d) => d,
        other => panic!("expected record, got {:?}", other),
    };
    let body = &def.fields[1].json;
    assert!(body.metainfo_unbound);
    assert_eq!(body.chosen.len(), 3);
    assert_eq!(body.chosen[1].alternative, None);
    assert!(body.chosen[2].checks.is_empty());
    assert_eq!(def.fields[2].json.default.as_deref(), Some("\"x\""));
}

#[test]
fn parse_rejects_bad_syntax() {
    assert!(parse("record { a: integer(8) }").is_err());
    assert!(parse("record R { a: integer(8) b: boolean }").is_err());
    assert!(parse("record R { a: enumerated(8) { } }").is_err());
    assert!(parse("record R { a: integer(8) raw [bogus(1)] }").is_err());
    assert!(parse("type T = integer(8)").is_err());
    assert!(parse("record R { a: integer(8) raw [ptrunit(0)] }").is_err());
}

// ==================== Semantics ====================

#[test]
fn resolve_rejects_unknown_type_and_field() {
    assert!(matches!(resolve("record R { a: Missing }"), Err(SchemaError::UnknownType(_))));
    assert!(matches!(
        resolve("record R { a: integer(8) raw [lengthto(nope)], b: octetstring }"),
        Err(SchemaError::UnknownField { .. })
    ));
    assert!(matches!(
        resolve("type A = integer(8); type A = boolean;"),
        Err(SchemaError::DuplicateType(_))
    ));
}

#[test]
fn resolve_rejects_self_references() {
    let err = resolve("record R { a: integer(8) raw [lengthto(a)] }").expect_err("self length");
    assert!(matches!(err, SchemaError::SelfReference { attribute: "lengthto", .. }));
    let err = resolve("record R { p: integer(8) raw [pointerto(p)] }").expect_err("self pointer");
    assert!(matches!(err, SchemaError::SelfReference { attribute: "pointerto", .. }));
}

#[test]
fn resolve_rejects_crosstag_cycles() {
    let src = r#"
record C {
  a: union { x: integer(8), y: integer(8) } raw [crosstag(x = b.x == 1; y = otherwise)],
  b: union { x: integer(8), y: integer(8) } raw [crosstag(x = a.x == 1; y = otherwise)],
}
"#;
    match resolve(src) {
        Err(SchemaError::DelayedDecodeCycle { fields, .. }) => {
            assert_eq!(fields, vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("expected a cycle error, got {:?}", other),
    }
}

#[test]
fn resolve_schedules_forward_crosstag() {
    let src = r#"
record F {
  body: union { short: integer(8), long: integer(8) } raw [crosstag(short = kind == 1; long = otherwise)],
  kind: integer(8),
  rest: integer(8),
}
"#;
    let schema = resolve(src).expect("resolve");
    let layout = schema.layout("F").expect("layout");
    assert!(layout.fields[0].delayed);
    assert!(!layout.fields[1].delayed);
    assert_eq!(layout.fields[1].dependents, vec![0]);
    assert!(layout.has_crosstag);
}

#[test]
fn resolve_requires_fixed_length_for_delayed_fields() {
    let src = r#"
record F {
  body: union { a: octetstring, b: integer(8) } raw [crosstag(a = kind == 1; b = otherwise)],
  kind: integer(8),
}
"#;
    assert!(matches!(resolve(src), Err(SchemaError::Field { .. })));
}

#[test]
fn resolve_pointer_order_and_types() {
    assert!(resolve("record P { t: octetstring, p: integer(8) raw [pointerto(t)] }").is_err());
    assert!(resolve("record P { p: octetstring raw [pointerto(t)], t: octetstring }").is_err());
    let schema = resolve("record P { p: integer(8) raw [pointerto(t)], t: octetstring }").expect("resolve");
    let layout = schema.layout("P").expect("layout");
    assert_eq!(layout.fields[0].pointerto, Some(1));
    assert_eq!(layout.fields[1].pointerof, Some(0));
    assert_eq!(layout.fields[0].ptrbase, Some(0));
    assert_eq!(layout.fields[0].ptrunit, 8);
}

#[test]
fn resolve_length_facts() {
    let src = r#"
record L {
  len: integer(8) raw [lengthto(a, b), unit(8), offset(1)],
  a: octetstring,
  b: octetstring,
}
"#;
    let schema = resolve(src).expect("resolve");
    let layout = schema.layout("L").expect("layout");
    assert_eq!(layout.fields[0].lengthto, vec![1, 2]);
    assert_eq!(layout.fields[1].lengthof, vec![0]);
    assert_eq!(layout.fields[2].lengthof, vec![0]);
    assert_eq!(layout.fields[0].lengthto_offset, 1);
}

#[test]
fn resolve_rejects_elements_unit_on_scalar_target() {
    let src = "record L { n: integer(8) raw [lengthto(a), unit(elements)], a: octetstring }";
    assert!(matches!(resolve(src), Err(SchemaError::Field { .. })));
}

#[test]
fn resolve_tag_table_and_ext_groups() {
    let src = r#"
type Kind = enumerated(8) { A = 1, B = 2 };
record T {
  kind: Kind,
  a: optional integer(8),
  b: optional integer(8),
  c: optional integer(8),
} raw [tag(a = kind == A; b = kind == 2; c = otherwise), extbitgroup(yes, a, b)]
"#;
    let schema = resolve(src).expect("resolve");
    let layout = schema.layout("T").expect("layout");
    assert_eq!(layout.tags.len(), 3);
    assert!(layout.tag_of(3).map(|t| t.is_otherwise()).unwrap_or(false));
    assert_eq!(layout.fields[1].ext_group, Some(0));
    assert_eq!(layout.fields[2].ext_group, Some(0));
    assert_eq!(layout.fields[3].ext_group, None);

    let overlap = r#"
record O { a: integer(8), b: integer(8), c: integer(8) } raw [extbitgroup(yes, a, b), extbitgroup(yes, b, c)]
"#;
    assert!(resolve(overlap).is_err());
}

#[test]
fn resolve_rejects_bad_literals() {
    let src = r#"
type Kind = enumerated(8) { A = 1 };
record T { kind: Kind, a: optional integer(8) raw [presence(kind == Z)] }
"#;
    assert!(matches!(resolve(src), Err(SchemaError::Field { .. })));
    let omit_on_mandatory = "record T { k: integer(8), a: optional integer(8) raw [presence(k == omit)] }";
    assert!(resolve(omit_on_mandatory).is_err());
}

#[test]
fn resolve_fixed_offset_for_nested_tag_key() {
    let src = r#"
record Hdr { version: integer(4), code: integer(4) }
record Item { hdr: Hdr, data: integer(8) }
set S { item: Item, other: optional integer(16) } raw [tag(item = item.hdr.code == 3)]
"#;
    let schema = resolve(src).expect("resolve");
    let layout = schema.layout("S").expect("layout");
    assert_eq!(layout.tags[0].checks[0].fixed_offset, Some(4));
}

#[test]
fn resolve_rejects_length_target_before_source() {
    let src = "record R { payload: octetstring, len: integer(8) raw [lengthto(payload)], tail: integer(8) }";
    match resolve(src) {
        Err(SchemaError::Field { field, reason, .. }) => {
            assert_eq!(field, "len");
            assert!(reason.contains("precedes"), "{}", reason);
        }
        other => panic!("expected a field error, got {:?}", other),
    }
    assert!(resolve("record R { len: integer(8) raw [lengthto(payload)], payload: octetstring }").is_ok());
}

#[test]
fn resolve_rejects_union_length_field() {
    let src = "record R { len: union { a: integer(8) } raw [lengthto(p)], p: octetstring }";
    assert!(matches!(resolve(src), Err(SchemaError::Field { .. })));
}

#[test]
fn resolve_rejects_checks_on_later_fields() {
    let presence = "record Pr { extra: optional integer(8) raw [presence(flag == 1)], flag: integer(8) }";
    match resolve(presence) {
        Err(SchemaError::Field { field, .. }) => assert_eq!(field, "extra"),
        other => panic!("expected a field error, got {:?}", other),
    }
    let own = "record Pr { flag: integer(8), extra: optional integer(8) raw [presence(extra == 1)] }";
    assert!(resolve(own).is_err());

    let tag = "record T { a: optional integer(8), kind: integer(8) } raw [tag(a = kind == 1)]";
    assert!(matches!(resolve(tag), Err(SchemaError::Field { .. })));

    // a tag may read the tagged field itself
    let own_tag = r#"
record Key { id: integer(8), v: integer(8) }
record T { k: optional Key } raw [tag(k = k.id == 1)]
"#;
    assert!(resolve(own_tag).is_ok());
}

#[test]
fn resolve_checks_against_delayed_fields() {
    // `body` is decoded after `kind`, so `note` (between them) cannot depend on it
    let src = r#"
record D {
  body: union { a: integer(8), b: integer(8) } raw [crosstag(a = kind == 1; b = otherwise)],
  note: optional integer(8) raw [presence(body.a == 1)],
  kind: integer(8),
}
"#;
    assert!(matches!(resolve(src), Err(SchemaError::Field { .. })));
}
