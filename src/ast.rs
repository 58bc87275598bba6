//! Field model for structured types: type specs, fields and their RAW/JSON attribute blocks.
//!
//! The model is pure data. [`ResolvedSchema::resolve`] checks references and runs the layout
//! analyzer for every record/set so the coders only ever see validated definitions.

use crate::bits::BitOrder;
use crate::error::SchemaError;
use crate::layout::{self, Layout};
use std::collections::HashMap;

/// Root schema: named type definitions in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub types: Vec<TypeDef>,
}

#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: String,
    pub spec: TypeSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeSpec {
    Integer {
        bits: u32,
        signed: bool,
        /// Explicit byte order for octet-multiple widths; `None` follows the bit order.
        endianness: Option<Endianness>,
    },
    Boolean {
        bits: u32,
    },
    Enumerated {
        bits: u32,
        items: Vec<(String, i64)>,
    },
    /// `octets: None` means the length comes from a length field or the remaining limit.
    OctetString {
        octets: Option<usize>,
    },
    BitString {
        bits: Option<usize>,
    },
    CharString {
        chars: Option<usize>,
    },
    Union(UnionDef),
    RecordOf(RecordOfDef),
    Struct(StructDef),
    /// Reference to a top-level [`TypeDef`].
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Big,
    Little,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionDef {
    pub alternatives: Vec<Alternative>,
    /// JSON: encode the selected alternative without the wrapping object.
    pub as_value: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    pub name: String,
    pub spec: TypeSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordOfDef {
    pub element: Box<TypeSpec>,
    /// JSON: elements are two-field records encoded as `"key": value` members of one object.
    pub as_map: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructKind {
    Record,
    Set,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    pub name: String,
    pub kind: StructKind,
    pub fields: Vec<FieldDef>,
    pub raw: RawTypeAttrs,
    pub json: JsonTypeAttrs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub spec: TypeSpec,
    pub optional: bool,
    pub raw: RawFieldAttrs,
    pub json: JsonFieldAttrs,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, spec: TypeSpec) -> Self {
        FieldDef {
            name: name.into(),
            spec,
            optional: false,
            raw: RawFieldAttrs::default(),
            json: JsonFieldAttrs::default(),
        }
    }
}

/// Unit of a `lengthto` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Bits(u32),
    /// Number of elements of a `record of` target.
    Elements,
}

impl Default for LengthUnit {
    fn default() -> Self {
        LengthUnit::Bits(8)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawFieldAttrs {
    /// Fixed bit length overriding the type's own.
    pub fieldlength: Option<u32>,
    pub lengthto: Vec<String>,
    pub unit: LengthUnit,
    pub lengthto_offset: i64,
    pub lengthindex: Option<String>,
    pub pointerto: Option<String>,
    pub ptrunit: Option<u32>,
    pub ptroffset: i64,
    pub pointerbase: Option<String>,
    pub crosstag: Vec<CrossTagRule>,
    /// Alternatives are ORed; empty means no presence condition.
    pub presence: Vec<FieldCheck>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtBit {
    #[default]
    No,
    Yes,
    Reverse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtBitGroupDef {
    pub mode: ExtBit,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTypeAttrs {
    /// `None` inherits the order of the enclosing type (or the codec default).
    pub bit_order: Option<BitOrder>,
    pub prepadding: u32,
    pub padding: u32,
    pub extension_bit: ExtBit,
    pub ext_bit_groups: Vec<ExtBitGroupDef>,
    pub taglist: Vec<TagRule>,
    pub presence: Vec<FieldCheck>,
}

/// `tag(field = checks)`; an empty check list is an OTHERWISE rule.
#[derive(Debug, Clone, PartialEq)]
pub struct TagRule {
    pub field: String,
    pub checks: Vec<FieldCheck>,
}

/// Selects union alternative `alternative` when any check holds; empty checks = OTHERWISE.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossTagRule {
    pub alternative: String,
    pub checks: Vec<FieldCheck>,
}

/// JSON `chosen` rule; `alternative: None` means the field is omitted.
#[derive(Debug, Clone, PartialEq)]
pub struct ChosenRule {
    pub alternative: Option<String>,
    pub checks: Vec<FieldCheck>,
}

/// `a.b.c == value`: the path starts at a field of the enclosing record and walks nested
/// record fields or union alternatives.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCheck {
    pub path: Vec<String>,
    pub value: CheckValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckValue {
    Literal(Literal),
    Omit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    Ident(String),
    Str(String),
    Octets(Vec<u8>),
    Bits(Vec<bool>),
}

impl Literal {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Literal::Int(x) => Some(*x),
            Literal::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct JsonFieldAttrs {
    pub alias: Option<String>,
    /// JSON text decoded when the field is missing from the document.
    pub default: Option<String>,
    pub omit_as_null: bool,
    pub metainfo_unbound: bool,
    pub chosen: Vec<ChosenRule>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct JsonTypeAttrs {
    pub as_value: bool,
}

/// Validated schema with a layout per record/set type.
#[derive(Debug, Clone)]
pub struct ResolvedSchema {
    pub schema: Schema,
    types_by_name: HashMap<String, usize>,
    layouts: HashMap<String, Layout>,
}

impl ResolvedSchema {
    pub fn resolve(schema: Schema) -> Result<Self, SchemaError> {
        let mut types_by_name = HashMap::new();
        for (i, t) in schema.types.iter().enumerate() {
            if types_by_name.insert(t.name.clone(), i).is_some() {
                return Err(SchemaError::DuplicateType(t.name.clone()));
            }
        }
        let mut resolved = ResolvedSchema {
            schema,
            types_by_name,
            layouts: HashMap::new(),
        };
        for t in &resolved.schema.types {
            resolved.check_spec(&t.name, &t.spec, true)?;
            resolved.check_alias_chain(&t.name)?;
        }
        let mut layouts = HashMap::new();
        for t in &resolved.schema.types {
            if let TypeSpec::Struct(def) = &t.spec {
                if def.name != t.name {
                    return Err(SchemaError::Invalid {
                        type_name: t.name.clone(),
                        reason: format!("record/set is named '{}'", def.name),
                    });
                }
                layouts.insert(t.name.clone(), layout::analyze(&resolved, def)?);
            }
        }
        resolved.layouts = layouts;
        Ok(resolved)
    }

    pub fn get_type(&self, name: &str) -> Option<&TypeDef> {
        self.types_by_name.get(name).map(|&i| &self.schema.types[i])
    }

    pub fn get_struct(&self, name: &str) -> Option<&StructDef> {
        match self.get_type(name).map(|t| self.spec_of(&t.spec)) {
            Some(TypeSpec::Struct(def)) => Some(def),
            _ => None,
        }
    }

    pub fn layout(&self, name: &str) -> Option<&Layout> {
        self.layouts.get(name)
    }

    /// Follow `Named` references down to a concrete spec.
    pub fn spec_of<'a>(&'a self, spec: &'a TypeSpec) -> &'a TypeSpec {
        let mut cur = spec;
        // alias chains are checked acyclic at resolve time
        for _ in 0..=self.schema.types.len() {
            match cur {
                TypeSpec::Named(n) => match self.get_type(n) {
                    Some(t) => cur = &t.spec,
                    None => return cur,
                },
                _ => return cur,
            }
        }
        cur
    }

    /// Display name of a spec: the referenced type name or a short description.
    pub fn display_name(&self, spec: &TypeSpec) -> String {
        match spec {
            TypeSpec::Named(n) => n.clone(),
            TypeSpec::Struct(def) => def.name.clone(),
            TypeSpec::Integer { .. } => "integer".to_string(),
            TypeSpec::Boolean { .. } => "boolean".to_string(),
            TypeSpec::Enumerated { .. } => "enumerated".to_string(),
            TypeSpec::OctetString { .. } => "octetstring".to_string(),
            TypeSpec::BitString { .. } => "bitstring".to_string(),
            TypeSpec::CharString { .. } => "charstring".to_string(),
            TypeSpec::Union(_) => "union".to_string(),
            TypeSpec::RecordOf(_) => "record of".to_string(),
        }
    }

    /// Static bit length of a spec, when every value of it encodes to the same length.
    pub fn fixed_bits(&self, spec: &TypeSpec) -> Option<usize> {
        self.fixed_bits_depth(spec, 0)
    }

    fn fixed_bits_depth(&self, spec: &TypeSpec, depth: usize) -> Option<usize> {
        if depth > self.schema.types.len() + 8 {
            return None;
        }
        match self.spec_of(spec) {
            TypeSpec::Integer { bits, .. }
            | TypeSpec::Boolean { bits }
            | TypeSpec::Enumerated { bits, .. } => Some(*bits as usize),
            TypeSpec::OctetString { octets } => octets.map(|n| n * 8),
            TypeSpec::BitString { bits } => *bits,
            TypeSpec::CharString { chars } => chars.map(|n| n * 8),
            TypeSpec::Union(u) => {
                let mut len = None;
                for alt in &u.alternatives {
                    let l = self.fixed_bits_depth(&alt.spec, depth + 1)?;
                    match len {
                        None => len = Some(l),
                        Some(prev) if prev == l => {}
                        Some(_) => return None,
                    }
                }
                len
            }
            TypeSpec::RecordOf(_) => None,
            TypeSpec::Struct(def) => {
                if def.raw.prepadding > 1 || def.raw.padding > 1 || def.kind == StructKind::Set {
                    return None;
                }
                let mut total = 0;
                for f in &def.fields {
                    if f.optional {
                        return None;
                    }
                    total += match f.raw.fieldlength {
                        Some(n) => n as usize,
                        None => self.fixed_bits_depth(&f.spec, depth + 1)?,
                    };
                }
                Some(total)
            }
            TypeSpec::Named(_) => None,
        }
    }

    fn check_spec(&self, owner: &str, spec: &TypeSpec, top: bool) -> Result<(), SchemaError> {
        match spec {
            TypeSpec::Named(n) => {
                if self.get_type(n).is_none() {
                    return Err(SchemaError::UnknownType(n.clone()));
                }
            }
            TypeSpec::Integer { bits, .. } | TypeSpec::Boolean { bits } | TypeSpec::Enumerated { bits, .. } => {
                if *bits == 0 || *bits > 64 {
                    return Err(SchemaError::Invalid {
                        type_name: owner.to_string(),
                        reason: format!("bit width {} out of range 1..=64", bits),
                    });
                }
            }
            TypeSpec::Union(u) => {
                if u.alternatives.is_empty() {
                    return Err(SchemaError::Invalid {
                        type_name: owner.to_string(),
                        reason: "union without alternatives".to_string(),
                    });
                }
                for alt in &u.alternatives {
                    self.check_spec(owner, &alt.spec, false)?;
                }
            }
            TypeSpec::RecordOf(r) => self.check_spec(owner, &r.element, false)?,
            TypeSpec::Struct(def) => {
                if !top {
                    return Err(SchemaError::Invalid {
                        type_name: owner.to_string(),
                        reason: format!("record/set '{}' must be a top-level definition", def.name),
                    });
                }
                for f in &def.fields {
                    self.check_spec(owner, &f.spec, false)?;
                }
            }
            TypeSpec::OctetString { .. } | TypeSpec::BitString { .. } | TypeSpec::CharString { .. } => {}
        }
        Ok(())
    }

    fn check_alias_chain(&self, name: &str) -> Result<(), SchemaError> {
        let mut cur = name;
        let mut seen = vec![name];
        while let Some(TypeSpec::Named(next)) = self.get_type(cur).map(|t| &t.spec) {
            if seen.contains(&next.as_str()) {
                return Err(SchemaError::Invalid {
                    type_name: name.to_string(),
                    reason: "type alias refers to itself".to_string(),
                });
            }
            seen.push(next);
            cur = next;
        }
        Ok(())
    }
}
