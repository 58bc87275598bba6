//! Parse schema DSL source into the field model using PEST.

use crate::ast::*;
use crate::bits::BitOrder;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct SchemaParser;

/// Parse schema source into a [`Schema`]. References are checked later by
/// [`ResolvedSchema::resolve`].
pub fn parse(source: &str) -> Result<Schema, String> {
    let pairs = SchemaParser::parse(Rule::schema, source).map_err(|e| format!("Parse error: {}", e))?;
    let pair = pairs.into_iter().next().ok_or("Empty parse")?;
    let mut types = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::type_alias => {
                let mut it = inner.into_inner();
                let name = it.next().ok_or("type alias: name")?.as_str().to_string();
                let spec = build_type_spec(it.next().ok_or("type alias: type")?)?;
                types.push(TypeDef { name, spec });
            }
            Rule::struct_def => {
                let def = build_struct(inner)?;
                types.push(TypeDef {
                    name: def.name.clone(),
                    spec: TypeSpec::Struct(def),
                });
            }
            _ => {}
        }
    }
    Ok(Schema { types })
}

fn build_struct(pair: Pair<Rule>) -> Result<StructDef, String> {
    let mut def = StructDef {
        name: String::new(),
        kind: StructKind::Record,
        fields: Vec::new(),
        raw: RawTypeAttrs::default(),
        json: JsonTypeAttrs::default(),
    };
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::struct_kind => {
                if inner.as_str().starts_with("set") {
                    def.kind = StructKind::Set;
                }
            }
            Rule::ident => def.name = inner.as_str().to_string(),
            Rule::field => def.fields.push(build_field(inner)?),
            Rule::raw_type_attrs => def.raw = build_raw_type_attrs(inner)?,
            Rule::json_type_attrs => {
                for attr in inner.into_inner() {
                    if attr.as_str() == "as_value" {
                        def.json.as_value = true;
                    } else {
                        return Err(format!("{}: as_map applies to 'record of' types only", def.name));
                    }
                }
            }
            _ => {}
        }
    }
    if def.name.is_empty() {
        return Err("record/set: missing name".to_string());
    }
    Ok(def)
}

fn build_field(pair: Pair<Rule>) -> Result<FieldDef, String> {
    let mut it = pair.into_inner();
    let name = it.next().ok_or("field: name")?.as_str().to_string();
    let mut field = FieldDef::new(name, TypeSpec::Named(String::new()));
    for inner in it {
        match inner.as_rule() {
            Rule::optional_kw => field.optional = true,
            Rule::type_spec => field.spec = build_type_spec(inner)?,
            Rule::raw_field_attrs => build_raw_field_attrs(inner, &mut field.raw)?,
            Rule::json_field_attrs => build_json_field_attrs(inner, &mut field.json)?,
            _ => {}
        }
    }
    Ok(field)
}

fn number(pair: Pair<Rule>) -> Result<u32, String> {
    pair.as_str().parse().map_err(|e| format!("invalid number '{}': {}", pair.as_str(), e))
}

fn int_lit(pair: Pair<Rule>) -> Result<i64, String> {
    pair.as_str().parse().map_err(|e| format!("invalid integer '{}': {}", pair.as_str(), e))
}

/// Optional `(n)` size argument of string types.
fn size_arg(pair: Pair<Rule>) -> Result<Option<usize>, String> {
    pair.into_inner()
        .find(|p| p.as_rule() == Rule::number)
        .map(|p| number(p).map(|n| n as usize))
        .transpose()
}

fn build_type_spec(pair: Pair<Rule>) -> Result<TypeSpec, String> {
    let inner = pair.into_inner().next().ok_or("empty type spec")?;
    match inner.as_rule() {
        Rule::integer_spec => {
            let mut bits = 0;
            let mut signed = false;
            let mut endianness = None;
            for p in inner.into_inner() {
                match p.as_rule() {
                    Rule::number => bits = number(p)?,
                    Rule::int_modifier => match p.as_str() {
                        "signed" => signed = true,
                        "big" => endianness = Some(Endianness::Big),
                        _ => endianness = Some(Endianness::Little),
                    },
                    _ => {}
                }
            }
            Ok(TypeSpec::Integer { bits, signed, endianness })
        }
        Rule::boolean_spec => Ok(TypeSpec::Boolean {
            bits: size_arg(inner)?.unwrap_or(1) as u32,
        }),
        Rule::enum_spec => {
            let mut bits = 0;
            let mut items = Vec::new();
            for p in inner.into_inner() {
                match p.as_rule() {
                    Rule::number => bits = number(p)?,
                    Rule::enum_item => {
                        let mut it = p.into_inner();
                        let name = it.next().ok_or("enum item: name")?.as_str().to_string();
                        let value = int_lit(it.next().ok_or("enum item: value")?)?;
                        if items.iter().any(|(n, _)| *n == name) {
                            return Err(format!("duplicate enumerated item '{}'", name));
                        }
                        items.push((name, value));
                    }
                    _ => {}
                }
            }
            Ok(TypeSpec::Enumerated { bits, items })
        }
        Rule::octet_spec => Ok(TypeSpec::OctetString { octets: size_arg(inner)? }),
        Rule::bit_spec => Ok(TypeSpec::BitString { bits: size_arg(inner)? }),
        Rule::char_spec => Ok(TypeSpec::CharString { chars: size_arg(inner)? }),
        Rule::union_spec => {
            let mut alternatives = Vec::new();
            let mut as_value = false;
            for p in inner.into_inner() {
                match p.as_rule() {
                    Rule::alternative => {
                        let mut it = p.into_inner();
                        let name = it.next().ok_or("alternative: name")?.as_str().to_string();
                        let spec = build_type_spec(it.next().ok_or("alternative: type")?)?;
                        alternatives.push(Alternative { name, spec });
                    }
                    Rule::json_type_attrs => {
                        for attr in p.into_inner() {
                            if attr.as_str() != "as_value" {
                                return Err("as_map applies to 'record of' types only".to_string());
                            }
                            as_value = true;
                        }
                    }
                    _ => {}
                }
            }
            Ok(TypeSpec::Union(UnionDef { alternatives, as_value }))
        }
        Rule::record_of_spec => {
            let mut element = None;
            let mut as_map = false;
            for p in inner.into_inner() {
                match p.as_rule() {
                    Rule::type_spec => element = Some(build_type_spec(p)?),
                    Rule::json_type_attrs => {
                        for attr in p.into_inner() {
                            if attr.as_str() != "as_map" {
                                return Err("as_value does not apply to 'record of' types".to_string());
                            }
                            as_map = true;
                        }
                    }
                    _ => {}
                }
            }
            Ok(TypeSpec::RecordOf(RecordOfDef {
                element: Box::new(element.ok_or("record of: element type")?),
                as_map,
            }))
        }
        Rule::named => Ok(TypeSpec::Named(inner.as_str().to_string())),
        r => Err(format!("unexpected type spec {:?}", r)),
    }
}

fn single_ident(pair: Pair<Rule>) -> Result<String, String> {
    let what = pair.as_str().to_string();
    pair.into_inner()
        .find(|p| p.as_rule() == Rule::ident)
        .map(|p| p.as_str().to_string())
        .ok_or_else(|| format!("{}: missing field name", what))
}

fn single_number(pair: Pair<Rule>) -> Result<u32, String> {
    let what = pair.as_str().to_string();
    number(pair.into_inner().next().ok_or_else(|| format!("{}: missing number", what))?)
}

fn single_int(pair: Pair<Rule>) -> Result<i64, String> {
    let what = pair.as_str().to_string();
    int_lit(pair.into_inner().next().ok_or_else(|| format!("{}: missing value", what))?)
}

fn build_raw_field_attrs(pair: Pair<Rule>, raw: &mut RawFieldAttrs) -> Result<(), String> {
    for attr in pair.into_inner() {
        match attr.as_rule() {
            Rule::fieldlength => raw.fieldlength = Some(single_number(attr)?),
            Rule::lengthto => raw.lengthto = attr.into_inner().map(|p| p.as_str().to_string()).collect(),
            Rule::unit => {
                let p = attr.into_inner().next().ok_or("unit: missing value")?;
                raw.unit = match p.as_rule() {
                    Rule::elements_kw => LengthUnit::Elements,
                    _ => match number(p)? {
                        0 => return Err("unit(0) is not a valid length unit".to_string()),
                        n => LengthUnit::Bits(n),
                    },
                };
            }
            Rule::offset => raw.lengthto_offset = single_int(attr)?,
            Rule::lengthindex => raw.lengthindex = Some(single_ident(attr)?),
            Rule::pointerto => raw.pointerto = Some(single_ident(attr)?),
            Rule::ptrunit => {
                raw.ptrunit = match single_number(attr)? {
                    0 => return Err("ptrunit(0) is not a valid pointer unit".to_string()),
                    n => Some(n),
                }
            }
            Rule::ptroffset => raw.ptroffset = single_int(attr)?,
            Rule::pointerbase => raw.pointerbase = Some(single_ident(attr)?),
            Rule::crosstag => {
                for rule in attr.into_inner() {
                    let (name, checks) = build_select_rule(rule)?;
                    raw.crosstag.push(CrossTagRule {
                        alternative: name.ok_or("crosstag: 'omit' is not an alternative")?,
                        checks,
                    });
                }
            }
            Rule::presence => raw.presence = build_check_list(attr.into_inner().next().ok_or("presence: checks")?)?,
            _ => {}
        }
    }
    Ok(())
}

fn ext_mode(pair: Pair<Rule>) -> ExtBit {
    match pair.as_str() {
        "yes" => ExtBit::Yes,
        "reverse" => ExtBit::Reverse,
        _ => ExtBit::No,
    }
}

fn build_raw_type_attrs(pair: Pair<Rule>) -> Result<RawTypeAttrs, String> {
    let mut raw = RawTypeAttrs::default();
    for attr in pair.into_inner() {
        match attr.as_rule() {
            Rule::bit_order => {
                raw.bit_order = Some(if attr.as_str() == "msb" { BitOrder::Msb } else { BitOrder::Lsb });
            }
            Rule::prepadding => raw.prepadding = single_number(attr)?,
            Rule::padding => raw.padding = single_number(attr)?,
            Rule::extension_bit => raw.extension_bit = ext_mode(attr.into_inner().next().ok_or("extension_bit: mode")?),
            Rule::extbitgroup => {
                let mut it = attr.into_inner();
                let mode = ext_mode(it.next().ok_or("extbitgroup: mode")?);
                let from = it.next().ok_or("extbitgroup: first field")?.as_str().to_string();
                let to = it.next().ok_or("extbitgroup: last field")?.as_str().to_string();
                raw.ext_bit_groups.push(ExtBitGroupDef { mode, from, to });
            }
            Rule::tag => {
                for rule in attr.into_inner() {
                    let (name, checks) = build_select_rule(rule)?;
                    raw.taglist.push(TagRule {
                        field: name.ok_or("tag: 'omit' is not a field")?,
                        checks,
                    });
                }
            }
            Rule::presence => raw.presence = build_check_list(attr.into_inner().next().ok_or("presence: checks")?)?,
            _ => {}
        }
    }
    Ok(raw)
}

fn build_json_field_attrs(pair: Pair<Rule>, json: &mut JsonFieldAttrs) -> Result<(), String> {
    for attr in pair.into_inner() {
        match attr.as_rule() {
            Rule::alias => json.alias = Some(string_literal(attr.into_inner().next().ok_or("alias: name")?)?),
            Rule::default_value => json.default = Some(string_literal(attr.into_inner().next().ok_or("default: value")?)?),
            Rule::omit_as_null => json.omit_as_null = true,
            Rule::metainfo_unbound => json.metainfo_unbound = true,
            Rule::chosen => {
                for rule in attr.into_inner() {
                    let (alternative, checks) = build_select_rule(rule)?;
                    json.chosen.push(ChosenRule { alternative, checks });
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// `name = checks`; `None` for `omit = ...`, empty checks for `otherwise`.
fn build_select_rule(pair: Pair<Rule>) -> Result<(Option<String>, Vec<FieldCheck>), String> {
    let mut it = pair.into_inner();
    let head = it.next().ok_or("rule: name")?;
    let name = match head.as_rule() {
        Rule::omit_kw => None,
        _ => Some(head.as_str().to_string()),
    };
    let body = it.next().ok_or("rule: checks")?;
    let checks = match body.as_rule() {
        Rule::otherwise_kw => Vec::new(),
        _ => build_check_list(body)?,
    };
    Ok((name, checks))
}

fn build_check_list(pair: Pair<Rule>) -> Result<Vec<FieldCheck>, String> {
    pair.into_inner().map(build_check).collect()
}

fn build_check(pair: Pair<Rule>) -> Result<FieldCheck, String> {
    let mut it = pair.into_inner();
    let path = it
        .next()
        .ok_or("check: path")?
        .into_inner()
        .map(|p| p.as_str().to_string())
        .collect();
    let v = it.next().ok_or("check: value")?;
    let value = match v.as_rule() {
        Rule::omit_kw => CheckValue::Omit,
        _ => CheckValue::Literal(build_literal(v)?),
    };
    Ok(FieldCheck { path, value })
}

fn string_literal(pair: Pair<Rule>) -> Result<String, String> {
    serde_json::from_str::<String>(pair.as_str()).map_err(|e| format!("invalid string literal {}: {}", pair.as_str(), e))
}

fn build_literal(pair: Pair<Rule>) -> Result<Literal, String> {
    let s = pair.as_str();
    match pair.as_rule() {
        Rule::int_lit => Ok(Literal::Int(int_lit(pair)?)),
        Rule::bool_lit => Ok(Literal::Bool(s == "true")),
        Rule::str_lit => Ok(Literal::Str(string_literal(pair)?)),
        Rule::ident => Ok(Literal::Ident(s.to_string())),
        Rule::octets_lit => {
            let hex = &s[1..s.len() - 2];
            if hex.len() % 2 != 0 {
                return Err(format!("octetstring literal {} has an odd number of digits", s));
            }
            (0..hex.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| format!("invalid octetstring literal {}: {}", s, e)))
                .collect::<Result<Vec<u8>, String>>()
                .map(Literal::Octets)
        }
        Rule::bits_lit => Ok(Literal::Bits(s[1..s.len() - 2].chars().map(|c| c == '1').collect())),
        r => Err(format!("unexpected literal {:?}", r)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_attributes_and_literals() {
        let schema = parse(
            r#"
            type Kind = enumerated(8) { A = 1, B = 2 };
            record Msg {
                kind: Kind,
                len: integer(16, big) raw [lengthto(payload), unit(8), offset(-2)],
                payload: octetstring,
                flag: optional boolean raw [presence(kind == A, payload == 'BEEF'O)] json [alias("f"), omit_as_null],
            } raw [msb, padding(8), tag(flag = kind == B; payload = otherwise)];
            "#,
        )
        .expect("parse");
        assert_eq!(schema.types.len(), 2);
        let def = match &schema.types[1].spec {
            TypeSpec::Struct(d) => d,
            other => panic!("expected record, got {:?}", other),
        };
        assert_eq!(def.raw.bit_order, Some(BitOrder::Msb));
        assert_eq!(def.raw.taglist.len(), 2);
        assert!(def.raw.taglist[1].checks.is_empty());
        let len = &def.fields[1];
        assert_eq!(len.spec, TypeSpec::Integer { bits: 16, signed: false, endianness: Some(Endianness::Big) });
        assert_eq!(len.raw.lengthto, vec!["payload".to_string()]);
        assert_eq!(len.raw.lengthto_offset, -2);
        let flag = &def.fields[3];
        assert!(flag.optional);
        assert_eq!(flag.json.alias.as_deref(), Some("f"));
        assert_eq!(
            flag.raw.presence[1].value,
            CheckValue::Literal(Literal::Octets(vec![0xbe, 0xef]))
        );
    }

    #[test]
    fn keywords_need_a_boundary() {
        let schema = parse("type integerish = integer(8); record R { a: integerish }").expect("parse");
        match &schema.types[1].spec {
            TypeSpec::Struct(d) => assert_eq!(d.fields[0].spec, TypeSpec::Named("integerish".into())),
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn reports_syntax_errors() {
        assert!(parse("record R { a integer(8) }").is_err());
        assert!(parse("record R { a: integer(8) raw [unit(0)] }").is_err());
    }
}
