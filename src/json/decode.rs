use super::token::{JsonReader, Token};
use super::{from_bits, from_hex};
use crate::ast::{FieldDef, ResolvedSchema, StructDef, TypeSpec};
use crate::error::{CodecError, ErrorContext, ErrorKind};
use crate::layout::{any_holds, Layout};
use crate::value::{Slot, Value};
use tracing::debug;

/// A JSON decode failure: `InvalidToken` lets the caller rewind and try something else.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum JsonFail {
    InvalidToken,
    Fatal(CodecError),
}

impl From<CodecError> for JsonFail {
    fn from(e: CodecError) -> Self {
        JsonFail::Fatal(e)
    }
}

/// Metainfo state of a `metainfo_unbound` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Meta {
    None,
    /// A `null` value was seen; the `"metainfo x": "unbound"` member must follow.
    Needed,
    Unbound,
}

/// `chosen` outcome for a field: `Some(None)` means the field must be omitted.
type Chosen = Option<Option<usize>>;

pub(crate) struct JsonDecoder<'a> {
    schema: &'a ResolvedSchema,
    ctx: &'a ErrorContext,
    silent: bool,
}

impl<'a> JsonDecoder<'a> {
    pub fn new(schema: &'a ResolvedSchema, ctx: &'a ErrorContext, silent: bool) -> Self {
        JsonDecoder { schema, ctx, silent }
    }

    fn fatal(&self, message: impl Into<String>) -> JsonFail {
        JsonFail::Fatal(self.ctx.error(ErrorKind::InvalidMessage, message))
    }

    /// Decode one value; on failure the reader is back where it started.
    pub fn decode(&self, spec: &TypeSpec, r: &mut JsonReader) -> Result<Value, JsonFail> {
        self.value(spec, r, false, None)
    }

    fn value(&self, spec: &TypeSpec, r: &mut JsonReader, parent_is_map: bool, chosen: Option<usize>) -> Result<Value, JsonFail> {
        let pos = r.buf_pos();
        let res = self.value_inner(spec, r, parent_is_map, chosen);
        if res.is_err() {
            r.set_buf_pos(pos);
        }
        res
    }

    fn value_inner(&self, spec: &TypeSpec, r: &mut JsonReader, parent_is_map: bool, chosen: Option<usize>) -> Result<Value, JsonFail> {
        let name = || self.schema.display_name(spec);
        match self.schema.spec_of(spec) {
            TypeSpec::Integer { .. } => match r.next_token() {
                Token::Number(n) => n
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| self.fatal(format!("Invalid JSON number '{}' for integer type {}.", n, name()))),
                Token::Error => Err(self.fatal("Failed to extract valid token, invalid JSON format.")),
                _ => Err(JsonFail::InvalidToken),
            },
            TypeSpec::Boolean { .. } => match r.next_token() {
                Token::True => Ok(Value::Bool(true)),
                Token::False => Ok(Value::Bool(false)),
                Token::Error => Err(self.fatal("Failed to extract valid token, invalid JSON format.")),
                _ => Err(JsonFail::InvalidToken),
            },
            TypeSpec::Enumerated { items, .. } => match r.next_token() {
                Token::Str(s) if items.iter().any(|(n, _)| *n == s) => Ok(Value::Enum(s)),
                Token::Str(s) => Err(self.fatal(format!("Invalid enumerated value '{}' for type {}.", s, name()))),
                Token::Error => Err(self.fatal("Failed to extract valid token, invalid JSON format.")),
                _ => Err(JsonFail::InvalidToken),
            },
            TypeSpec::OctetString { .. } => match r.next_token() {
                Token::Str(s) => from_hex(&s)
                    .map(Value::Octets)
                    .ok_or_else(|| self.fatal(format!("Invalid hex string '{}' for type {}.", s, name()))),
                Token::Error => Err(self.fatal("Failed to extract valid token, invalid JSON format.")),
                _ => Err(JsonFail::InvalidToken),
            },
            TypeSpec::BitString { .. } => match r.next_token() {
                Token::Str(s) => from_bits(&s)
                    .map(Value::Bits)
                    .ok_or_else(|| self.fatal(format!("Invalid bit string '{}' for type {}.", s, name()))),
                Token::Error => Err(self.fatal("Failed to extract valid token, invalid JSON format.")),
                _ => Err(JsonFail::InvalidToken),
            },
            TypeSpec::CharString { .. } => match r.next_token() {
                Token::Str(s) => Ok(Value::Chars(s)),
                Token::Error => Err(self.fatal("Failed to extract valid token, invalid JSON format.")),
                _ => Err(JsonFail::InvalidToken),
            },
            TypeSpec::Union(u) => {
                if let Some(k) = chosen {
                    let alt = u
                        .alternatives
                        .get(k)
                        .ok_or_else(|| self.fatal(format!("Union {} has no alternative {}.", name(), k)))?;
                    let v = self.value(&alt.spec, r, false, None)?;
                    return Ok(Value::union(&alt.name, v));
                }
                if u.as_value {
                    for alt in &u.alternatives {
                        if let Ok(v) = self.value(&alt.spec, r, false, None) {
                            return Ok(Value::union(&alt.name, v));
                        }
                    }
                    return Err(self.fatal(format!("Failed to extract valid data for any alternative of union {}.", name())));
                }
                match r.next_token() {
                    Token::ObjectStart => {}
                    Token::Error => return Err(self.fatal("Failed to extract valid token, invalid JSON format.")),
                    _ => return Err(JsonFail::InvalidToken),
                }
                let alt_name = match r.next_token() {
                    Token::Name(n) => n,
                    _ => return Err(self.fatal(format!("Expected a field name for union {}.", name()))),
                };
                let alt = u
                    .alternatives
                    .iter()
                    .find(|a| a.name == alt_name)
                    .ok_or_else(|| self.fatal(format!("Invalid field name '{}' for union {}.", alt_name, name())))?;
                let v = match self.value(&alt.spec, r, false, None) {
                    Ok(v) => v,
                    Err(JsonFail::InvalidToken) => {
                        return Err(self.fatal(format!("Invalid JSON token found while decoding field '{}'.", alt.name)))
                    }
                    Err(e) => return Err(e),
                };
                match r.next_token() {
                    Token::ObjectEnd => Ok(Value::union(&alt.name, v)),
                    _ => Err(self.fatal("Expected JSON object end token.")),
                }
            }
            TypeSpec::RecordOf(ro) => {
                let (open, close) = if ro.as_map {
                    (Token::ObjectStart, Token::ObjectEnd)
                } else {
                    (Token::ArrayStart, Token::ArrayEnd)
                };
                match r.next_token() {
                    t if t == open => {}
                    Token::Error => return Err(self.fatal("Failed to extract valid token, invalid JSON format.")),
                    _ => return Err(JsonFail::InvalidToken),
                }
                let mut items = Vec::new();
                loop {
                    if r.peek_token() == close {
                        r.next_token();
                        break;
                    }
                    let _g = self.ctx.enter(format!("Element {}: ", items.len()));
                    match self.value(&ro.element, r, ro.as_map, None) {
                        Ok(v) => items.push(v),
                        Err(JsonFail::InvalidToken) => {
                            return Err(self.fatal(format!("Invalid JSON token found while decoding element {}.", items.len())))
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(Value::List(items))
            }
            TypeSpec::Struct(def) => self.record(def, r, parent_is_map),
            TypeSpec::Named(n) => Err(JsonFail::Fatal(self.ctx.error(ErrorKind::UnknownType, format!("Unknown type {}.", n)))),
        }
    }

    fn chosen_for(layout: &Layout, i: usize, slots: &[Slot]) -> Chosen {
        let rules = &layout.fields[i].chosen;
        rules
            .iter()
            .find(|c| !c.checks.is_empty() && any_holds(slots, &c.checks))
            .or_else(|| rules.iter().find(|c| c.checks.is_empty()))
            .map(|c| c.alternative)
    }

    /// An omitted optional field is an error when its `chosen` rules say it must be present.
    fn chosen_violated(layout: &Layout, i: usize, slots: &[Slot]) -> bool {
        let rules = &layout.fields[i].chosen;
        let otherwise = rules.iter().find(|c| c.checks.is_empty());
        match otherwise {
            Some(o) if o.alternative.is_some() => {
                let omit_rules: Vec<_> = rules.iter().filter(|c| !c.checks.is_empty() && c.alternative.is_none()).collect();
                !omit_rules.is_empty() && !omit_rules.iter().any(|c| any_holds(slots, &c.checks))
            }
            _ => rules
                .iter()
                .filter(|c| !c.checks.is_empty() && c.alternative.is_some())
                .any(|c| any_holds(slots, &c.checks)),
        }
    }

    fn field(&self, f: &FieldDef, r: &mut JsonReader, chosen: Chosen) -> Result<Slot, JsonFail> {
        if f.optional && r.peek_token() == Token::Null {
            r.next_token();
            return Ok(Slot::Omit);
        }
        if let Some(None) = chosen {
            return Err(self.fatal(format!("Field '{}' must be omitted, found a value.", f.name)));
        }
        Ok(Slot::Present(self.value(&f.spec, r, false, chosen.flatten())?))
    }

    fn record(&self, def: &StructDef, r: &mut JsonReader, parent_is_map: bool) -> Result<Value, JsonFail> {
        let layout = self
            .schema
            .layout(&def.name)
            .ok_or_else(|| JsonFail::Fatal(self.ctx.error(ErrorKind::UnknownType, format!("Unknown type {}.", def.name))))?;

        if def.fields.len() == 1 && def.json.as_value {
            let f = &def.fields[0];
            if f.optional {
                let pos = r.buf_pos();
                match r.next_token() {
                    Token::Null => return Err(self.fatal(format!("Invalid JSON null for single-field type {}.", def.name))),
                    Token::ObjectStart if r.next_token() == Token::ObjectEnd => return Ok(Value::Record(vec![Slot::Omit])),
                    _ => r.set_buf_pos(pos),
                }
            }
            let v = self.value(&f.spec, r, false, None)?;
            return Ok(Value::Record(vec![Slot::Present(v)]));
        }

        if parent_is_map && def.fields.len() == 2 {
            let key = match r.next_token() {
                Token::Name(k) => k,
                Token::Error => return Err(self.fatal("Failed to extract valid token, invalid JSON format.")),
                _ => return Err(JsonFail::InvalidToken),
            };
            let _g = self.ctx.enter(format!("Field '{}': ", def.fields[1].name));
            let value = self.field(&def.fields[1], r, None)?;
            return Ok(Value::Record(vec![Slot::Present(Value::Chars(key)), value]));
        }

        match r.next_token() {
            Token::ObjectStart => {}
            Token::Error => return Err(self.fatal("Failed to extract valid token, invalid JSON format.")),
            _ => return Err(JsonFail::InvalidToken),
        }

        let n = def.fields.len();
        let mut slots = vec![Slot::Unbound; n];
        let mut found = vec![false; n];
        let mut meta = vec![Meta::None; n];
        for (i, f) in def.fields.iter().enumerate() {
            if let Some(text) = &f.json.default {
                let _g = self.ctx.enter(format!("Field '{}': ", f.name));
                let mut dr = JsonReader::new(text);
                slots[i] = self
                    .field(f, &mut dr, None)
                    .map_err(|_| self.fatal(format!("Invalid default value {} for field '{}'.", text, f.name)))?;
                found[i] = true;
            }
        }

        loop {
            let pos = r.buf_pos();
            let (name, is_meta) = match r.next_token() {
                Token::Name(n) => match n.strip_prefix("metainfo ") {
                    Some(rest) if !rest.is_empty() => (rest.to_string(), true),
                    _ => (n, false),
                },
                Token::Error => return Err(self.fatal("Failed to extract field name, invalid JSON format.")),
                _ => {
                    r.set_buf_pos(pos);
                    break;
                }
            };
            let i = match def.fields.iter().position(|f| f.json.alias.as_deref().unwrap_or(&f.name) == name) {
                Some(i) => i,
                None if self.silent => return Err(JsonFail::InvalidToken),
                None if is_meta => return Err(self.fatal(format!("Invalid field name in JSON meta info: '{}'.", name))),
                None => return Err(self.fatal(format!("Invalid field name '{}'.", name))),
            };
            let f = &def.fields[i];
            let _g = self.ctx.enter(format!("Field '{}': ", f.name));
            found[i] = true;
            if is_meta {
                if !f.json.metainfo_unbound {
                    return Err(self.fatal("Meta info is not applicable to this field."));
                }
                match r.next_token() {
                    Token::Str(s) if s == "unbound" => meta[i] = Meta::Unbound,
                    _ => return Err(self.fatal("Invalid meta info value, expecting \"unbound\".")),
                }
                continue;
            }
            let value_pos = r.buf_pos();
            let chosen = Self::chosen_for(layout, i, &slots);
            match self.field(f, r, chosen) {
                Ok(slot) => slots[i] = slot,
                Err(JsonFail::InvalidToken) => {
                    if f.json.metainfo_unbound {
                        r.set_buf_pos(value_pos);
                        if r.next_token() == Token::Null {
                            if meta[i] == Meta::None {
                                meta[i] = Meta::Needed;
                            }
                            continue;
                        }
                    }
                    return Err(self.fatal("Invalid JSON token found while decoding the field."));
                }
                Err(e) => return Err(e),
            }
        }

        if r.next_token() != Token::ObjectEnd {
            return Err(self.fatal("Expected JSON object end token."));
        }

        for (i, f) in def.fields.iter().enumerate() {
            match meta[i] {
                Meta::Unbound => {
                    slots[i] = Slot::Unbound;
                    continue;
                }
                Meta::Needed => {
                    return Err(self.fatal(format!("Field '{}' is null but has no \"unbound\" meta info.", f.name)));
                }
                Meta::None => {}
            }
            if found[i] {
                continue;
            }
            if !f.optional {
                return Err(self.fatal(format!("Missing field '{}' of type {}.", f.name, def.name)));
            }
            if Self::chosen_violated(layout, i, &slots) {
                return Err(self.fatal(format!("Field '{}' is omitted, but its chosen rules require it.", f.name)));
            }
            debug!(type_name = %def.name, field = %f.name, "missing optional JSON field decoded as omit");
            slots[i] = Slot::Omit;
        }
        Ok(Value::Record(slots))
    }
}
