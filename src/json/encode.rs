use super::token::{JsonWriter, Token};
use super::{to_bits, to_hex};
use crate::ast::{FieldDef, ResolvedSchema, StructDef, TypeSpec};
use crate::error::{CodecError, ErrorContext, ErrorKind};
use crate::value::{Slot, Value};

pub(crate) struct JsonEncoder<'a> {
    schema: &'a ResolvedSchema,
    ctx: &'a ErrorContext,
}

impl<'a> JsonEncoder<'a> {
    pub fn new(schema: &'a ResolvedSchema, ctx: &'a ErrorContext) -> Self {
        JsonEncoder { schema, ctx }
    }

    pub fn encode(&self, spec: &TypeSpec, value: &Value, w: &mut JsonWriter) -> Result<(), CodecError> {
        self.value(spec, value, w, false)
    }

    fn mismatch(&self, spec: &TypeSpec, value: &Value) -> CodecError {
        self.ctx.error(
            ErrorKind::InvalidValue,
            format!("Value {} does not match type {}.", crate::dump::format_value(value), self.schema.display_name(spec)),
        )
    }

    fn value(&self, spec: &TypeSpec, value: &Value, w: &mut JsonWriter, parent_is_map: bool) -> Result<(), CodecError> {
        let bad = || self.mismatch(spec, value);
        match self.schema.spec_of(spec) {
            TypeSpec::Integer { .. } => w.put(Token::Number(value.as_i64().ok_or_else(bad)?.to_string())),
            TypeSpec::Boolean { .. } => w.put(if value.as_bool().ok_or_else(bad)? { Token::True } else { Token::False }),
            TypeSpec::Enumerated { items, .. } => {
                let name = value.as_enum().ok_or_else(bad)?;
                if !items.iter().any(|(n, _)| n == name) {
                    return Err(self.ctx.error(
                        ErrorKind::InvalidValue,
                        format!("Unknown enumerated value '{}' for type {}.", name, self.schema.display_name(spec)),
                    ));
                }
                w.put(Token::Str(name.to_string()));
            }
            TypeSpec::OctetString { .. } => w.put(Token::Str(to_hex(value.as_octets().ok_or_else(bad)?))),
            TypeSpec::BitString { .. } => match value {
                Value::Bits(b) => w.put(Token::Str(to_bits(b))),
                _ => return Err(bad()),
            },
            TypeSpec::CharString { .. } => w.put(Token::Str(value.as_str().ok_or_else(bad)?.to_string())),
            TypeSpec::Union(u) => {
                let (alt, inner) = value.as_union().ok_or_else(bad)?;
                let a = u.alternatives.iter().find(|a| a.name == alt).ok_or_else(bad)?;
                if u.as_value {
                    self.value(&a.spec, inner, w, false)?;
                } else {
                    w.put(Token::ObjectStart);
                    w.put(Token::Name(a.name.clone()));
                    self.value(&a.spec, inner, w, false)?;
                    w.put(Token::ObjectEnd);
                }
            }
            TypeSpec::RecordOf(ro) => {
                let items = value.as_list().ok_or_else(bad)?;
                w.put(if ro.as_map { Token::ObjectStart } else { Token::ArrayStart });
                for (k, item) in items.iter().enumerate() {
                    let _g = self.ctx.enter(format!("Element {}: ", k));
                    self.value(&ro.element, item, w, ro.as_map)?;
                }
                w.put(if ro.as_map { Token::ObjectEnd } else { Token::ArrayEnd });
            }
            TypeSpec::Struct(def) => self.record(def, value, w, parent_is_map)?,
            TypeSpec::Named(n) => return Err(self.ctx.error(ErrorKind::UnknownType, format!("Unknown type {}.", n))),
        }
        Ok(())
    }

    fn record(&self, def: &StructDef, value: &Value, w: &mut JsonWriter, parent_is_map: bool) -> Result<(), CodecError> {
        let slots = match value {
            Value::Record(s) if s.len() == def.fields.len() => s,
            _ => return Err(self.mismatch(&TypeSpec::Named(def.name.clone()), value)),
        };
        if !value.is_bound() {
            return Err(self.ctx.error(ErrorKind::Unbound, format!("Encoding an unbound value of type {}.", def.name)));
        }
        if def.fields.len() == 1 && def.json.as_value {
            if let Slot::Omit = slots[0] {
                w.put(Token::ObjectStart);
                w.put(Token::ObjectEnd);
                return Ok(());
            }
            return self.field(&def.fields[0], &slots[0], w);
        }
        if parent_is_map {
            let (key, f, slot) = match (slots.first().and_then(Slot::value), def.fields.get(1), slots.get(1)) {
                (Some(Value::Chars(k)), Some(f), Some(slot)) => (k, f, slot),
                _ => {
                    return Err(self.ctx.error(
                        ErrorKind::InvalidValue,
                        format!("Map element of type {} needs a charstring key and a value.", def.name),
                    ))
                }
            };
            w.put(Token::Name(key.clone()));
            return self.field(f, slot, w);
        }
        w.put(Token::ObjectStart);
        for (f, slot) in def.fields.iter().zip(slots) {
            if f.optional && !f.json.omit_as_null && !f.json.metainfo_unbound && !slot.is_present() {
                continue;
            }
            let name = f.json.alias.as_deref().unwrap_or(&f.name);
            w.put(Token::Name(name.to_string()));
            if f.json.metainfo_unbound && !slot.is_bound() {
                w.put(Token::Null);
                w.put(Token::Name(format!("metainfo {}", name)));
                w.put(Token::Str("unbound".to_string()));
            } else {
                self.field(f, slot, w)?;
            }
        }
        w.put(Token::ObjectEnd);
        Ok(())
    }

    fn field(&self, f: &FieldDef, slot: &Slot, w: &mut JsonWriter) -> Result<(), CodecError> {
        let _g = self.ctx.enter(format!("Field '{}': ", f.name));
        match slot {
            // decoding picks the alternative from `chosen`, so it is written bare
            Slot::Present(v) if !f.json.chosen.is_empty() => match (self.schema.spec_of(&f.spec), v.as_union()) {
                (TypeSpec::Union(u), Some((alt, inner))) => {
                    let a = u
                        .alternatives
                        .iter()
                        .find(|a| a.name == alt)
                        .ok_or_else(|| self.mismatch(&f.spec, v))?;
                    self.value(&a.spec, inner, w, false)
                }
                _ => Err(self.mismatch(&f.spec, v)),
            },
            Slot::Present(v) => self.value(&f.spec, v, w, false),
            Slot::Omit if f.optional => {
                w.put(Token::Null);
                Ok(())
            }
            Slot::Omit => Err(self.ctx.error(ErrorKind::InvalidValue, "Omitting a mandatory field.")),
            Slot::Unbound => Err(self.ctx.error(ErrorKind::Unbound, "Encoding an unbound value.")),
        }
    }
}
