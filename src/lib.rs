//! # rawstruct: RAW/JSON encoding for structured record/set types
//!
//! A schema DSL for record/set types with RAW (bit-packed) and JSON encoding attributes,
//! a layout analyzer that works out how fields depend on each other, and a codec that
//! runs the resulting encode/decode algorithm.
//!
//! ## What the layout analyzer handles
//!
//! - `lengthto(f, ...)` with `unit(n | elements)` and `offset(n)`, or `lengthindex(sub)`
//! - `pointerto(f)` with `ptrunit`, `ptroffset`, `pointerbase`
//! - `tag(...)` rules with `otherwise`, field and type-level `presence(...)`
//! - `crosstag(...)` union dispatch, including forward references (delayed decoding)
//! - `extension_bit` and `extbitgroup` markers, `prepadding`/`padding`, `msb`/`lsb`
//! - JSON `alias`, `default`, `omit_as_null`, `metainfo_unbound`, `chosen`, `as_value`, `as_map`
//!
//! ## Example DSL
//!
//! ```text
//! type Kind = enumerated(8) { A = 1, B = 2 };
//!
//! record Msg {
//!   kind: Kind,
//!   len: integer(8) raw [lengthto(payload), unit(1)],
//!   payload: octetstring,
//! } raw [msb];
//! ```
//!
//! ## Usage
//!
//! ```text
//! let schema = ResolvedSchema::resolve(parse(src)?)?;
//! let codec = Codec::new(schema, CodecConfig::default());
//! let bytes = codec.encode("Msg", &value, CodingType::Raw)?;
//! ```
//!
//! See `tests/integration.rs` for complete examples.

pub mod ast;
pub mod bits;
pub mod codec;
pub mod dump;
pub mod error;
pub mod json;
pub mod layout;
pub mod parser;
mod raw;
pub mod value;

pub use ast::{ResolvedSchema, Schema};
pub use bits::BitOrder;
pub use codec::{Codec, CodecConfig, CodingType};
pub use error::{CodecError, ErrorKind, SchemaError};
pub use parser::parse;
pub use value::{Slot, Value};
