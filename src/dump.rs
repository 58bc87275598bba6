//! Format values as log text: `{ kind := B, len := 16, payload := 'DEAD'O }`.

use crate::ast::{ResolvedSchema, StructDef, TypeSpec};
use crate::value::{Slot, Value};
use std::fmt::Write;

/// Format a value without field names (records list their slots positionally).
pub fn format_value(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value, None, None);
    out
}

/// Format a value of a named type, with field names taken from the schema.
pub fn format_typed(schema: &ResolvedSchema, type_name: &str, value: &Value) -> String {
    let mut out = String::new();
    let spec = TypeSpec::Named(type_name.to_string());
    write_value(&mut out, value, Some(schema), Some(&spec));
    out
}

fn struct_of<'a>(schema: Option<&'a ResolvedSchema>, spec: Option<&'a TypeSpec>) -> Option<(&'a ResolvedSchema, &'a StructDef)> {
    let schema = schema?;
    match schema.spec_of(spec?) {
        TypeSpec::Struct(def) => Some((schema, def)),
        _ => None,
    }
}

fn write_slot(out: &mut String, slot: &Slot, schema: Option<&ResolvedSchema>, spec: Option<&TypeSpec>) {
    match slot {
        Slot::Unbound => out.push_str("<unbound>"),
        Slot::Omit => out.push_str("omit"),
        Slot::Present(v) => write_value(out, v, schema, spec),
    }
}

fn write_value(out: &mut String, value: &Value, schema: Option<&ResolvedSchema>, spec: Option<&TypeSpec>) {
    let resolved = match (schema, spec) {
        (Some(s), Some(sp)) => Some(s.spec_of(sp)),
        _ => None,
    };
    match value {
        Value::Integer(x) => {
            let _ = write!(out, "{}", x);
        }
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Enum(name) => out.push_str(name),
        Value::Octets(bytes) => {
            out.push('\'');
            for b in bytes {
                let _ = write!(out, "{:02X}", b);
            }
            out.push_str("'O");
        }
        Value::Bits(bits) => {
            out.push('\'');
            out.extend(bits.iter().map(|b| if *b { '1' } else { '0' }));
            out.push_str("'B");
        }
        Value::Chars(s) => {
            let _ = write!(out, "{:?}", s);
        }
        Value::Union { alt, value } => {
            let alt_spec = match resolved {
                Some(TypeSpec::Union(u)) => u.alternatives.iter().find(|a| a.name == *alt).map(|a| &a.spec),
                _ => None,
            };
            let _ = write!(out, "{{ {} := ", alt);
            write_value(out, value, schema, alt_spec);
            out.push_str(" }");
        }
        Value::List(items) => {
            let elem = match resolved {
                Some(TypeSpec::RecordOf(ro)) => Some(ro.element.as_ref()),
                _ => None,
            };
            if items.is_empty() {
                out.push_str("{ }");
                return;
            }
            out.push_str("{ ");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, item, schema, elem);
            }
            out.push_str(" }");
        }
        Value::Record(slots) => {
            if slots.is_empty() {
                out.push_str("{ }");
                return;
            }
            let def = struct_of(schema, spec);
            out.push_str("{ ");
            for (i, slot) in slots.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let field = def.and_then(|(_, d)| d.fields.get(i));
                match field {
                    Some(f) => {
                        let _ = write!(out, "{} := ", f.name);
                        write_slot(out, slot, schema, Some(&f.spec));
                    }
                    None => write_slot(out, slot, None, None),
                }
            }
            out.push_str(" }");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_text() {
        let v = Value::Record(vec![
            Slot::Present(Value::enumerated("B")),
            Slot::Present(Value::Integer(16)),
            Slot::Present(Value::octets(&[0xde, 0xad])),
            Slot::Omit,
            Slot::Unbound,
        ]);
        assert_eq!(format_value(&v), "{ B, 16, 'DEAD'O, omit, <unbound> }");
        assert_eq!(format_value(&Value::Bits(vec![false, true, false, true])), "'0101'B");
        assert_eq!(format_value(&Value::Chars("a\"b".into())), "\"a\\\"b\"");
        assert_eq!(format_value(&Value::union("x", Value::Bool(true))), "{ x := true }");
        assert_eq!(format_value(&Value::List(vec![])), "{ }");
    }
}
