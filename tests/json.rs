//! JSON coding: object form, aliases, omit/null handling, metainfo, defaults, chosen, as_value, as_map.

use rawstruct::{parse, Codec, CodecConfig, CodingType, ErrorKind, ResolvedSchema, Slot, Value};

const SCHEMA: &str = r#"
type Kind = enumerated(8) { A = 1, B = 2 };
record Msg {
  kind: Kind,
  len: integer(8) raw [lengthto(payload), unit(1)],
  payload: octetstring,
}
record Opts {
  id: integer(8) json [alias("ID")],
  note: optional charstring,
  flag: optional boolean json [omit_as_null],
  extra: optional integer(8) json [metainfo_unbound],
  level: integer(8) json [default("3")],
}
record Ch {
  kind: integer(8),
  body: optional union { num: integer(8), text: charstring }
    json [chosen(num = kind == 1; text = kind == 2; omit = otherwise)],
}
type Num = union { n: integer(8), s: charstring } json [as_value];
type Plain = union { n: integer(8), bits: bitstring };
record Pair { key: charstring, value: integer(8) }
type Pairs = record of Pair json [as_map];
type Nums = record of integer(8);
record Wrap { inner: optional integer(8) } json [as_value];
"#;

fn codec() -> Codec {
    codec_with(CodecConfig::default())
}

fn codec_with(config: CodecConfig) -> Codec {
    let resolved = ResolvedSchema::resolve(parse(SCHEMA).expect("parse")).expect("resolve");
    Codec::new(resolved, config)
}

fn opts(extra: Slot, level: i64) -> Value {
    Value::Record(vec![
        Slot::Present(Value::Integer(1)),
        Slot::Omit,
        Slot::Omit,
        extra,
        Slot::Present(Value::Integer(level)),
    ])
}

#[test]
fn record_as_object() {
    let codec = codec();
    let value = Value::record([Value::enumerated("B"), Value::Integer(16), Value::octets(&[0xde, 0xad])]);
    let text = codec.encode_json("Msg", &value).expect("encode");
    assert_eq!(text, r#"{"kind":"B","len":16,"payload":"DEAD"}"#);
    assert_eq!(codec.decode_json("Msg", &text).expect("decode"), value);
    let bytes = codec.encode("Msg", &value, CodingType::Json).expect("encode");
    assert_eq!(codec.decode("Msg", &bytes, CodingType::Json).expect("decode"), value);
}

#[test]
fn json_then_raw() {
    let codec = codec();
    let value = codec
        .decode_json("Msg", r#"{ "kind": "B", "len": 0, "payload": "dead" }"#)
        .expect("decode");
    assert_eq!(codec.encode_raw("Msg", &value).expect("encode"), vec![0x02, 0x10, 0xde, 0xad]);
}

#[test]
fn omitted_null_and_unbound_fields() {
    let codec = codec();
    let value = opts(Slot::Unbound, 5);
    let text = codec.encode_json("Opts", &value).expect("encode");
    assert_eq!(
        text,
        r#"{"ID":1,"flag":null,"extra":null,"metainfo extra":"unbound","level":5}"#
    );
    assert_eq!(codec.decode_json("Opts", &text).expect("decode"), value);
}

#[test]
fn mandatory_field_with_metainfo() {
    let src = r#"record U { a: integer(8) json [metainfo_unbound], b: integer(8) }"#;
    let resolved = ResolvedSchema::resolve(parse(src).expect("parse")).expect("resolve");
    let codec = Codec::new(resolved, CodecConfig::default());
    let value = Value::Record(vec![Slot::Unbound, Slot::Present(Value::Integer(2))]);
    let text = codec.encode_json("U", &value).expect("encode");
    assert_eq!(text, r#"{"a":null,"metainfo a":"unbound","b":2}"#);
    assert_eq!(codec.decode_json("U", &text).expect("decode"), value);

    let err = codec.decode_json("U", r#"{"a":null,"b":2}"#).expect_err("null without metainfo");
    assert_eq!(err.kind, ErrorKind::InvalidMessage);
    let err = codec.decode_json("U", r#"{"metainfo a":"bound","b":2}"#).expect_err("bad metainfo");
    assert!(err.message.contains("unbound"), "{}", err);
}

#[test]
fn defaults_fill_missing_fields() {
    let codec = codec();
    let decoded = codec.decode_json("Opts", r#"{"ID":1}"#).expect("decode");
    assert_eq!(decoded, opts(Slot::Omit, 3));
}

#[test]
fn missing_and_unknown_fields() {
    let codec = codec();
    let err = codec.decode_json("Opts", r#"{"level":2}"#).expect_err("missing id");
    assert_eq!(err.kind, ErrorKind::InvalidMessage);
    assert!(err.to_string().starts_with("While JSON-decoding type 'Opts': "), "{}", err);

    let err = codec.decode_json("Opts", r#"{"ID":1,"bogus":2}"#).expect_err("unknown field");
    assert_eq!(err.kind, ErrorKind::InvalidMessage);

    let err = codec.decode_json("Opts", r#"{"ID":1,"metainfo note":"unbound"}"#).expect_err("not applicable");
    assert!(err.message.contains("not applicable"), "{}", err);

    let silent = codec_with(CodecConfig {
        json_silent: true,
        ..CodecConfig::default()
    });
    let err = silent.decode_json("Opts", r#"{"ID":1,"bogus":2}"#).expect_err("unknown field");
    assert_eq!(err.kind, ErrorKind::InvalidToken);
}

#[test]
fn trailing_tokens_and_bad_tokens() {
    let codec = codec();
    let err = codec.decode_json("Nums", "[1, 2] 3").expect_err("trailing");
    assert_eq!(err.kind, ErrorKind::ExtraData);
    let err = codec.decode_json("Nums", "\"x\"").expect_err("not an array");
    assert_eq!(err.kind, ErrorKind::InvalidToken);
    let err = codec.decode_json("Msg", r#"{"kind":"Z","len":0,"payload":""}"#).expect_err("bad enum");
    assert_eq!(err.kind, ErrorKind::InvalidMessage);
}

#[test]
fn chosen_selects_alternative() {
    let codec = codec();
    let decoded = codec.decode_json("Ch", r#"{"kind":2,"body":"hi"}"#).expect("decode");
    assert_eq!(decoded.field(1), Some(&Value::union("text", Value::Chars("hi".into()))));
    assert_eq!(codec.encode_json("Ch", &decoded).expect("encode"), r#"{"kind":2,"body":"hi"}"#);

    let decoded = codec.decode_json("Ch", r#"{"kind":3}"#).expect("decode");
    assert_eq!(decoded.slot(1), Some(&Slot::Omit));

    codec.decode_json("Ch", r#"{"kind":1}"#).expect_err("body required by chosen");
    codec.decode_json("Ch", r#"{"kind":3,"body":5}"#).expect_err("body must be omitted");
}

#[test]
fn union_forms() {
    let codec = codec();
    let v = Value::union("s", Value::Chars("x".into()));
    assert_eq!(codec.encode_json("Num", &v).expect("encode"), r#""x""#);
    assert_eq!(codec.decode_json("Num", r#""x""#).expect("decode"), v);
    assert_eq!(codec.decode_json("Num", "7").expect("decode"), Value::union("n", Value::Integer(7)));
    codec.decode_json("Num", "true").expect_err("no alternative");

    let v = Value::union("bits", Value::Bits(vec![true, false, true]));
    assert_eq!(codec.encode_json("Plain", &v).expect("encode"), r#"{"bits":"101"}"#);
    assert_eq!(codec.decode_json("Plain", r#"{ "bits" : "101" }"#).expect("decode"), v);
    codec.decode_json("Plain", r#"{"other":1}"#).expect_err("unknown alternative");
}

#[test]
fn record_of_forms() {
    let codec = codec();
    let map = Value::List(vec![
        Value::record([Value::Chars("a".into()), Value::Integer(1)]),
        Value::record([Value::Chars("b".into()), Value::Integer(2)]),
    ]);
    let text = codec.encode_json("Pairs", &map).expect("encode");
    assert_eq!(text, r#"{"a":1,"b":2}"#);
    assert_eq!(codec.decode_json("Pairs", &text).expect("decode"), map);

    let nums = Value::List(vec![Value::Integer(1), Value::Integer(2)]);
    assert_eq!(codec.encode_json("Nums", &nums).expect("encode"), "[1,2]");
    assert_eq!(codec.decode_json("Nums", "[ 1, 2 ]").expect("decode"), nums);
    assert_eq!(codec.decode_json("Nums", "[]").expect("decode"), Value::List(vec![]));
}

#[test]
fn single_field_as_value() {
    let codec = codec();
    let v = Value::record([Value::Integer(4)]);
    assert_eq!(codec.encode_json("Wrap", &v).expect("encode"), "4");
    assert_eq!(codec.decode_json("Wrap", "4").expect("decode"), v);
    let omitted = Value::Record(vec![Slot::Omit]);
    assert_eq!(codec.encode_json("Wrap", &omitted).expect("encode"), "{}");
    assert_eq!(codec.decode_json("Wrap", "{}").expect("decode"), omitted);
    codec.decode_json("Wrap", "null").expect_err("null is not a value");
}

#[test]
fn pretty_printing() {
    let codec = codec_with(CodecConfig {
        json_pretty: true,
        ..CodecConfig::default()
    });
    let value = Value::record([Value::Chars("k".into()), Value::Integer(1)]);
    assert_eq!(codec.encode_json("Pair", &value).expect("encode"), "{\n  \"key\": \"k\",\n  \"value\": 1\n}");
}

#[test]
fn encoding_unbound_field_fails() {
    let codec = codec();
    let value = Value::Record(vec![Slot::Present(Value::enumerated("A")), Slot::Unbound, Slot::Present(Value::octets(&[]))]);
    let err = codec.encode_json("Msg", &value).expect_err("unbound len");
    assert_eq!(err.kind, ErrorKind::Unbound);
    assert!(err.to_string().contains("Field 'len': "), "{}", err);
}
