//! Benchmark: RAW decode of a block of back-to-back records (by extent), RAW decode+encode,
//! and JSON decode+encode of the same values.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rawstruct::{parse, Codec, CodecConfig, ResolvedSchema, Slot, Value};

const SCHEMA: &str = r#"
type Kind = enumerated(8) { A = 1, B = 2 };
record Hdr { version: integer(4), code: integer(4) }
record Msg {
  hdr: Hdr,
  kind: Kind,
  len: integer(8) raw [lengthto(payload), unit(8)],
  count: integer(8) raw [lengthto(items), unit(elements)],
  body: union { short: integer(8), long: integer(16) }
    raw [crosstag(short = kind == A; long = otherwise)],
  items: record of integer(8),
  payload: octetstring,
  note: optional integer(8) raw [presence(hdr.code == 3)],
}
"#;

/// Decode one block: repeatedly decode_with_extent until consumed or no progress.
fn decode_block(block: &[u8], codec: &Codec) -> usize {
    let mut offset = 0usize;
    let mut records = 0usize;
    while offset < block.len() {
        let (consumed, result) = codec.decode_with_extent("Msg", &block[offset..]);
        if consumed == 0 || result.is_err() {
            break;
        }
        offset += consumed;
        records += 1;
    }
    records
}

/// Decode then encode each record. Same record count as decode.
fn decode_encode_block(block: &[u8], codec: &Codec) -> usize {
    let mut offset = 0usize;
    let mut records = 0usize;
    while offset < block.len() {
        let (consumed, result) = codec.decode_with_extent("Msg", &block[offset..]);
        let value = match result {
            Ok(v) if consumed > 0 => v,
            _ => break,
        };
        let _ = codec.encode_raw("Msg", &value);
        offset += consumed;
        records += 1;
    }
    records
}

fn sample(i: i64) -> Value {
    let code = if i % 2 == 0 { 3 } else { 1 };
    let body = if i % 3 == 0 {
        Value::union("short", Value::Integer(i % 100))
    } else {
        Value::union("long", Value::Integer(i * 7))
    };
    let note = if code == 3 { Slot::Present(Value::Integer(i % 50)) } else { Slot::Omit };
    let mut slots: Vec<Slot> = vec![
        Value::record([Value::Integer(1), Value::Integer(code)]),
        Value::enumerated(if i % 3 == 0 { "A" } else { "B" }),
        Value::Integer(0),
        Value::Integer(0),
        body,
        Value::List((0..(i % 5)).map(Value::Integer).collect()),
        Value::octets(&[0xde, 0xad, (i % 256) as u8]),
    ]
    .into_iter()
    .map(Slot::Present)
    .collect();
    slots.push(note);
    Value::Record(slots)
}

fn bench_roundtrip(c: &mut Criterion) {
    let resolved = ResolvedSchema::resolve(parse(SCHEMA).expect("parse schema")).expect("resolve");
    let codec = Codec::new(resolved, CodecConfig::default());

    let values: Vec<Value> = (0..256).map(sample).collect();
    let mut block = Vec::new();
    for v in &values {
        block.extend(codec.encode_raw("Msg", v).expect("encode sample"));
    }
    let records = decode_block(&block, &codec);
    eprintln!("roundtrip: {} records, {} bytes (one warm-up pass)", records, block.len());

    c.bench_function("raw_decode_block", |b| {
        b.iter(|| black_box(decode_block(black_box(&block), &codec)));
    });

    c.bench_function("raw_decode_encode_block", |b| {
        b.iter(|| black_box(decode_encode_block(black_box(&block), &codec)));
    });

    let texts: Vec<String> = values
        .iter()
        .map(|v| codec.encode_json("Msg", v).expect("encode json"))
        .collect();
    c.bench_function("json_decode_encode", |b| {
        b.iter(|| {
            let mut n = 0usize;
            for text in &texts {
                if let Ok(v) = codec.decode_json("Msg", black_box(text)) {
                    n += codec.encode_json("Msg", &v).map(|s| s.len()).unwrap_or(0);
                }
            }
            black_box(n)
        });
    });
}

criterion_group!(benches, bench_roundtrip);
criterion_main!(benches);
