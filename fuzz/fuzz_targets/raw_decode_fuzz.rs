//! RAW decoder fuzz target: decode arbitrary bytes against a schema that uses lengths,
//! element counts, pointers, tags, crosstag and extension bits. Decoding must return Ok or Err, never panic.
//! Build with: cargo fuzz run raw_decode_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
const SCHEMA: &str = r#"
type Kind = enumerated(8) { A = 1, B = 2, C = 3 };
record Ext {
    a: integer(7),
    b: optional integer(7),
} raw [extension_bit(yes)];
record Msg {
    kind: Kind,
    len: integer(8) raw [lengthto(payload), unit(8)],
    ptr: integer(8) raw [pointerto(tail)],
    body: union { num: integer(16), text: charstring(2) } raw [crosstag(num = kind == A; text = otherwise)],
    payload: octetstring,
    ext: optional Ext raw [presence(kind == C)],
    tail: optional record of integer(8),
} raw [msb];
record Counted {
    n: integer(32) raw [lengthto(items), unit(elements)],
    items: record of octetstring,
    tail: optional integer(8),
};
"#;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let schema = match rawstruct::parse(SCHEMA).map(rawstruct::ResolvedSchema::resolve) {
        Ok(Ok(s)) => s,
        _ => return,
    };
    let codec = rawstruct::Codec::new(schema, rawstruct::CodecConfig::default());
    let _ = codec.decode_with_extent("Msg", data);
    let _ = codec.decode_with_extent("Counted", data);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run raw_decode_fuzz");
}
