//! Coder driver: dispatches RAW/JSON encoding and decoding of top-level types.
//!
//! Every call gets its own [`ErrorContext`], encode tree and decode cursor, so a [`Codec`]
//! can be shared between threads.

use crate::ast::{ResolvedSchema, TypeSpec};
use crate::bits::{BitOrder, BitReader};
use crate::error::{CodecError, ErrorContext, ErrorKind};
use crate::json::token::{JsonReader, JsonWriter, Token};
use crate::json::{JsonDecoder, JsonEncoder, JsonFail};
use crate::raw::{Hint, RawDecoder, RawEncoder};
use crate::value::Value;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Coding selector. Only RAW and JSON are implemented for structured types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingType {
    Raw,
    Json,
    Ber,
    Per,
    Xer,
    Text,
}

impl fmt::Display for CodingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CodingType::Raw => "RAW",
            CodingType::Json => "JSON",
            CodingType::Ber => "BER",
            CodingType::Per => "PER",
            CodingType::Xer => "XER",
            CodingType::Text => "TEXT",
        })
    }
}

impl FromStr for CodingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RAW" => Ok(CodingType::Raw),
            "JSON" => Ok(CodingType::Json),
            "BER" => Ok(CodingType::Ber),
            "PER" => Ok(CodingType::Per),
            "XER" => Ok(CodingType::Xer),
            "TEXT" => Ok(CodingType::Text),
            other => Err(format!("unknown coding type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    /// Bit order of types that do not set one.
    pub bit_order: BitOrder,
    pub json_pretty: bool,
    /// JSON decoding reports unknown field names as `InvalidToken` instead of failing hard.
    pub json_silent: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            bit_order: BitOrder::Lsb,
            json_pretty: false,
            json_silent: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Codec {
    pub config: CodecConfig,
    resolved: ResolvedSchema,
}

impl Codec {
    pub fn new(resolved: ResolvedSchema, config: CodecConfig) -> Self {
        Codec { config, resolved }
    }

    pub fn schema(&self) -> &ResolvedSchema {
        &self.resolved
    }

    fn top_spec(&self, type_name: &str) -> Result<TypeSpec, CodecError> {
        match self.resolved.get_type(type_name) {
            Some(_) => Ok(TypeSpec::Named(type_name.to_string())),
            None => Err(CodecError::new(ErrorKind::UnknownType, format!("Unknown type {}.", type_name))),
        }
    }

    /// Encode a value of `type_name` with the selected coding. JSON is returned as UTF-8 bytes.
    pub fn encode(&self, type_name: &str, value: &Value, coding: CodingType) -> Result<Vec<u8>, CodecError> {
        match coding {
            CodingType::Raw => self.encode_raw(type_name, value),
            CodingType::Json => self.encode_json(type_name, value).map(String::into_bytes),
            _ => Err(CodecError::new(
                ErrorKind::UnsupportedCoding,
                format!("Unknown coding method requested to encode type `{}'", type_name),
            )),
        }
    }

    /// Decode one value; leftover octets are an `ExtraData` error.
    pub fn decode(&self, type_name: &str, bytes: &[u8], coding: CodingType) -> Result<Value, CodecError> {
        match coding {
            CodingType::Raw => self.decode_raw(type_name, bytes),
            CodingType::Json => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| CodecError::new(ErrorKind::InvalidMessage, format!("JSON input is not UTF-8: {}", e)))?;
                self.decode_json(type_name, text)
            }
            _ => Err(CodecError::new(
                ErrorKind::UnsupportedCoding,
                format!("Unknown coding method requested to decode type `{}'", type_name),
            )),
        }
    }

    pub fn encode_raw(&self, type_name: &str, value: &Value) -> Result<Vec<u8>, CodecError> {
        let spec = self.top_spec(type_name)?;
        let ctx = ErrorContext::new();
        let _g = ctx.enter(format!("While RAW-encoding type '{}': ", type_name));
        RawEncoder::new(&self.resolved, &ctx).encode(&spec, value, self.config.bit_order)
    }

    pub fn decode_raw(&self, type_name: &str, bytes: &[u8]) -> Result<Value, CodecError> {
        let (consumed, res) = self.decode_with_extent(type_name, bytes);
        let value = res?;
        if consumed < bytes.len() {
            return Err(CodecError::new(
                ErrorKind::ExtraData,
                format!(
                    "While RAW-decoding type '{}': {} octets of extra data after the decoded value.",
                    type_name,
                    bytes.len() - consumed
                ),
            ));
        }
        Ok(value)
    }

    /// RAW-decode one value from the front of `bytes` and return (octets consumed, result).
    /// Trailing data is left for the caller.
    pub fn decode_with_extent(&self, type_name: &str, bytes: &[u8]) -> (usize, Result<Value, CodecError>) {
        let spec = match self.top_spec(type_name) {
            Ok(s) => s,
            Err(e) => return (0, Err(e)),
        };
        let ctx = ErrorContext::new();
        let _g = ctx.enter(format!("While RAW-decoding type '{}': ", type_name));
        let mut r = BitReader::new(bytes);
        let limit = r.len_bits();
        match RawDecoder::new(&self.resolved, &ctx).decode(&spec, &mut r, limit, self.config.bit_order, Hint::None) {
            Ok((value, bits)) => {
                debug!(type_name, bits, "decoded RAW value");
                (bits.div_ceil(8), Ok(value))
            }
            Err(e) => (0, Err(e)),
        }
    }

    pub fn encode_json(&self, type_name: &str, value: &Value) -> Result<String, CodecError> {
        let spec = self.top_spec(type_name)?;
        let ctx = ErrorContext::new();
        let _g = ctx.enter(format!("While JSON-encoding type '{}': ", type_name));
        let mut w = JsonWriter::new(self.config.json_pretty);
        JsonEncoder::new(&self.resolved, &ctx).encode(&spec, value, &mut w)?;
        Ok(w.finish())
    }

    pub fn decode_json(&self, type_name: &str, text: &str) -> Result<Value, CodecError> {
        let spec = self.top_spec(type_name)?;
        let ctx = ErrorContext::new();
        let _g = ctx.enter(format!("While JSON-decoding type '{}': ", type_name));
        let mut r = JsonReader::new(text);
        let value = match JsonDecoder::new(&self.resolved, &ctx, self.config.json_silent).decode(&spec, &mut r) {
            Ok(v) => v,
            Err(JsonFail::InvalidToken) => {
                return Err(ctx.error(ErrorKind::InvalidToken, format!("Invalid JSON token for type {}.", type_name)))
            }
            Err(JsonFail::Fatal(e)) => return Err(e),
        };
        if r.next_token() != Token::End {
            return Err(ctx.error(ErrorKind::ExtraData, "Extra data after the decoded JSON value."));
        }
        Ok(value)
    }
}
